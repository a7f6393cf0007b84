use lumen_app::cli::AppArgs;
use lumen_app::frame_loop::run_frame_loop;
use lumen_gfx::headless::{HeadlessBackend, HeadlessTimelineMode};
use lumen_render_interface::reclaimer::GfxReclaimer;

/// 在没有 GPU 的环境下跑帧循环，`--lag` 模拟 GPU 落后的帧数
fn main() -> anyhow::Result<()> {
    lumen_crate_tools::init_log::init_log();
    let _client = tracy_client::Client::start();

    let args = AppArgs::from_env()?;
    let config = args.load_config()?;

    let timeline_mode = match args.lag {
        0 => HeadlessTimelineMode::Immediate,
        lag => HeadlessTimelineMode::Lagging(lag),
    };
    let backend = HeadlessBackend::with_timeline_mode(timeline_mode);
    let mut reclaimer = GfxReclaimer::try_new(&backend, config)?;

    let stats = run_frame_loop(&backend, &mut reclaimer, &args.frame_loop);
    reclaimer.destroy(&backend);
    let stats = stats?;

    log::info!(
        "headless loop done: {} frames, {} uploads, peak pending {}; live buffers {}, live bytes {}",
        stats.frames,
        stats.uploads,
        stats.peak_pending_resources,
        backend.live_buffer_count(),
        backend.allocated_bytes()
    );
    Ok(())
}
