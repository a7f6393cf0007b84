use std::io::Write;

/// 以 Info 级别初始化日志
#[inline]
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

/// 初始化全局 logger
///
/// - 日志级别按 `level` 过滤，之后会被 `RUST_LOG` 覆盖
/// - 重复初始化（例如多个测试）时静默忽略
pub fn init_log_with_level(level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = level_style(buf, record.level());
            let info_style = buf.default_level_style(log::Level::Info);
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let body_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
                 {body_style}{}{body_style:#}",
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();

    if result.is_err() {
        log::debug!("logger already initialized");
    }
}

fn level_style(buf: &env_logger::fmt::Formatter, level: log::Level) -> anstyle::Style {
    let color = match level {
        log::Level::Info => anstyle::AnsiColor::Green,
        log::Level::Warn => anstyle::AnsiColor::Yellow,
        log::Level::Error => anstyle::AnsiColor::Red,
        _ => return buf.default_level_style(level),
    };
    buf.default_level_style(level).fg_color(Some(anstyle::Color::Ansi(color)))
}
