use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use lumen_render_interface::config::ReclaimConfig;

use crate::frame_loop::FrameLoopDesc;

pub const USAGE: &str = "\
usage: <bin> [--config <reclaim.toml>] [--frames <n>] [--upload-interval <n>] [--resize-interval <n>] [--lag <n>] [--unpaced]";

/// 两个演示程序共用的命令行参数
#[derive(Debug, Clone, Default)]
pub struct AppArgs {
    pub config: Option<PathBuf>,
    pub frame_loop: FrameLoopDesc,
    /// headless 后端模拟的 GPU 延迟帧数，0 表示立即完成
    pub lag: u64,
}
impl AppArgs {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |name: &str| args.next().ok_or_else(|| anyhow!("{} requires a value", name));
            match arg.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--frames" => parsed.frame_loop.frames = parse_number("--frames", &value("--frames")?)?,
                "--upload-interval" => {
                    parsed.frame_loop.upload_interval = parse_number("--upload-interval", &value("--upload-interval")?)?
                }
                "--resize-interval" => {
                    parsed.frame_loop.resize_interval =
                        Some(parse_number("--resize-interval", &value("--resize-interval")?)?)
                }
                "--lag" => parsed.lag = parse_number("--lag", &value("--lag")?)?,
                "--unpaced" => parsed.frame_loop.paced = false,
                other => bail!("unknown argument {:?}\n{}", other, USAGE),
            }
        }
        Ok(parsed)
    }

    /// 读取 `--config` 指定的配置，没有指定时使用默认配置
    pub fn load_config(&self) -> anyhow::Result<ReclaimConfig> {
        match &self.config {
            Some(path) => ReclaimConfig::load(path).with_context(|| format!("load config {}", path.display())),
            None => Ok(ReclaimConfig::default()),
        }
    }
}

fn parse_number(name: &str, value: &str) -> anyhow::Result<u64> {
    value.parse().with_context(|| format!("{} expects a number, got {:?}", name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> anyhow::Result<AppArgs> {
        AppArgs::parse(line.split_whitespace().map(str::to_string))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args("--frames 10 --lag 2 --resize-interval 5 --unpaced --config a.toml").unwrap();
        assert_eq!(parsed.frame_loop.frames, 10);
        assert_eq!(parsed.frame_loop.resize_interval, Some(5));
        assert!(!parsed.frame_loop.paced);
        assert_eq!(parsed.lag, 2);
        assert_eq!(parsed.config, Some(PathBuf::from("a.toml")));

        let defaults = args("").unwrap();
        assert_eq!(defaults.frame_loop.frames, FrameLoopDesc::default().frames);
        assert!(defaults.frame_loop.paced);
        assert_eq!(defaults.load_config().unwrap(), ReclaimConfig::default());
    }

    #[test]
    fn test_bad_args_are_reported() {
        assert!(args("--frames").unwrap_err().to_string().contains("requires a value"));
        assert!(args("--frames ten").unwrap_err().to_string().contains("expects a number"));
        assert!(args("--verbose").unwrap_err().to_string().contains("unknown argument"));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/reclaim.toml");
        let parsed = AppArgs::parse(["--config".to_string(), path.to_string()]).unwrap();
        let config = parsed.load_config().unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.default_render_targets, 3);
        assert_eq!(config.heaps.depth_stencil_view.capacity, 4);
    }
}
