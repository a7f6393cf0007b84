use anyhow::Context;
use lumen_app::cli::AppArgs;
use lumen_app::frame_loop::run_frame_loop;
use lumen_app::vulkan_context::VulkanContext;
use lumen_gfx::vulkan::VulkanBackend;
use lumen_render_interface::reclaimer::GfxReclaimer;

/// 在真实 GPU 上跑帧循环
fn main() -> anyhow::Result<()> {
    lumen_crate_tools::init_log::init_log();
    let _client = tracy_client::Client::start();

    let args = AppArgs::from_env()?;
    let config = args.load_config()?;
    if args.lag != 0 {
        log::warn!("--lag only applies to the headless backend");
    }

    let context = VulkanContext::new("lumen-vulkan-loop")?;
    let backend = match VulkanBackend::new(&context.backend_create_info()) {
        Ok(backend) => backend,
        Err(e) => {
            context.destroy();
            return Err(e).context("failed to create vulkan backend");
        }
    };

    let stats = GfxReclaimer::try_new(&backend, config).map_err(anyhow::Error::from).and_then(|mut reclaimer| {
        let stats = run_frame_loop(&backend, &mut reclaimer, &args.frame_loop);
        reclaimer.destroy(&backend);
        stats
    });

    if let Err(e) = unsafe { context.device().device_wait_idle() } {
        log::error!("device_wait_idle failed: {:?}", e);
    }
    backend.destroy();
    context.destroy();

    let stats = stats?;
    log::info!(
        "vulkan loop done: {} frames, {} uploads, {} resizes, peak pending {}",
        stats.frames,
        stats.uploads,
        stats.resizes,
        stats.peak_pending_resources
    );
    Ok(())
}
