use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use itertools::Itertools;
use lumen_gfx::backend::GfxBackend;
use lumen_gfx::descriptors::heap::SlotKind;
use lumen_gfx::resources::state::ResourceState;
use lumen_gfx::sampler::{GfxSamplerDesc, GfxWrapMode};
use lumen_render_interface::handles::ResourceHandle;
use lumen_render_interface::reclaimer::GfxReclaimer;

/// 每帧写入 scratch 的常量
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FrameConstants {
    pub frame_index: u32,
    pub time: f32,
    pub mesh_srv: u32,
    pub sampler_group: u32,
}

/// 模拟一个渲染器的负载
#[derive(Debug, Clone)]
pub struct FrameLoopDesc {
    pub frames: u64,
    /// 每隔多少帧重新上传一次 mesh，旧的 mesh 延迟释放
    pub upload_interval: u64,
    pub mesh_bytes: u64,
    /// 每隔多少帧触发一次 resize
    pub resize_interval: Option<u64>,
    /// 使用带节流的 end_frame；GPU 可能落后超过 frames_in_flight 帧时需要开启
    pub paced: bool,
}
impl Default for FrameLoopDesc {
    fn default() -> Self {
        Self {
            frames: 120,
            upload_interval: 8,
            mesh_bytes: 4096,
            resize_interval: None,
            paced: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameLoopStats {
    pub frames: u64,
    pub uploads: u64,
    pub resizes: u64,
    pub scratch_bytes: u64,
    /// 任意时刻等待回收的资源数量的最大值
    pub peak_pending_resources: usize,
    pub last_frame: u64,
}

/// 跑 `desc.frames` 帧：每一帧写入常量，分配临时描述符和 SRV slot，周期性地重新上传 mesh
pub fn run_frame_loop<B: GfxBackend>(
    backend: &B,
    reclaimer: &mut GfxReclaimer<B>,
    desc: &FrameLoopDesc,
) -> anyhow::Result<FrameLoopStats> {
    let mut stats = FrameLoopStats::default();
    let sampler_groups = [
        vec![GfxSamplerDesc::linear(GfxWrapMode::Repeat)],
        vec![
            GfxSamplerDesc::linear(GfxWrapMode::ClampToEdge),
            GfxSamplerDesc::default().with_anisotropy(8),
        ],
    ];
    let mut mesh: Option<ResourceHandle> = None;

    for _ in 0..desc.frames {
        let _span = tracy_client::span!("run_frame_loop::frame");
        let frame = reclaimer.try_begin_frame(backend).context("begin frame")?;

        if desc.upload_interval > 0 && (frame - 1) % desc.upload_interval == 0 {
            let new_mesh = upload_mesh(backend, reclaimer, frame, desc.mesh_bytes)
                .with_context(|| format!("upload mesh at frame {}", frame))?;
            if let Some(old) = mesh.replace(new_mesh) {
                reclaimer.pool_mut().try_release_deferred(old, frame)?;
            }
            stats.uploads += 1;
        }

        // mesh 的 SRV：每帧重新分配，当帧释放
        let mesh_srv = reclaimer.heap_mut(SlotKind::ShaderResourceView).try_alloc_slot()?;
        let sampler_group = reclaimer
            .try_lookup_samplers(backend, &sampler_groups[(frame % 2) as usize])
            .context("sampler lookup")?;

        let constants = FrameConstants {
            frame_index: frame as u32,
            time: frame as f32 / 60.0,
            mesh_srv,
            sampler_group,
        };
        let ring = reclaimer.ring_mut();
        let alloc = ring.write_scratch_pod(backend, &[constants]);
        ring.try_alloc_transient_descriptors(4)?;
        stats.scratch_bytes += alloc.size;

        reclaimer.heap_mut(SlotKind::ShaderResourceView).try_release_slot_deferred(mesh_srv, frame)?;

        stats.peak_pending_resources = stats.peak_pending_resources.max(reclaimer.pool().pending_count());
        if desc.resize_interval.is_some_and(|interval| interval > 0 && frame % interval == 0) {
            reclaimer.try_resize(backend).context("resize")?;
            stats.resizes += 1;
        }

        stats.last_frame = frame;
        stats.frames += 1;
        let end_frame = if desc.paced {
            reclaimer.try_end_frame_paced(backend)
        } else {
            reclaimer.try_end_frame(backend)
        };
        end_frame.with_context(|| format!("end frame {}", frame))?;
    }

    if let Some(mesh) = mesh {
        let frame = reclaimer.current_frame();
        reclaimer.pool_mut().try_release_deferred(mesh, frame)?;
    }
    log::info!("frame loop finished: {:?}", stats);
    Ok(stats)
}

/// 录制一个 command buffer 上传 mesh，提交之后在当前帧释放 command buffer
fn upload_mesh<B: GfxBackend>(
    backend: &B,
    reclaimer: &mut GfxReclaimer<B>,
    frame: u64,
    mesh_bytes: u64,
) -> anyhow::Result<ResourceHandle> {
    let data = (0..mesh_bytes).map(|i| (i as u8) ^ (frame as u8)).collect_vec();

    let pool = reclaimer.pool_mut();
    let cmd = pool.try_allocate_command_buffer(backend, "mesh-upload")?;
    backend.begin_command_buffer(&cmd)?;
    let handle = pool.try_allocate_static_buffer(
        backend,
        &cmd,
        mesh_bytes,
        Some(&data),
        ResourceState::VertexAndConstantBuffer,
        frame,
        &format!("mesh-{}", frame),
    )?;
    backend.end_command_buffer(&cmd)?;
    backend.submit(&[&cmd])?;
    pool.release_command_buffer_deferred(cmd, frame);
    Ok(handle)
}
