use lumen_gfx::backend::GfxBackend;
use lumen_gfx::descriptors::heap::SlotKind;
use lumen_gfx::sampler::GfxSamplerDesc;

use crate::config::ReclaimConfig;
use crate::error::{OrFatal, ReclaimError};
use crate::frame_clock::FrameClock;
use crate::frame_ring::FrameResourceRing;
use crate::handles::ResourceHandle;
use crate::resource_pool::ResourcePool;
use crate::sampler_cache::SamplerCache;
use crate::slot_heap::SlotHeap;

/// 资源生命周期的上下文
///
/// 持有帧时钟、资源池、每种描述符的 slot 堆、sampler 缓存和 frame ring。
/// 一帧的流程：
/// 1. [`GfxReclaimer::begin_frame`]：回收所有已经安全的资源和 slot
/// 2. 构建这一帧：分配、上传、释放
/// 3. 提交这一帧的命令之后，[`GfxReclaimer::end_frame`]：signal fence，推进帧号，轮转 frame ring
///
/// sampler 堆由 [`SamplerCache`] 持有，`heap(SlotKind::Sampler)` 返回的就是它。
pub struct GfxReclaimer<B: GfxBackend> {
    config: ReclaimConfig,

    clock: FrameClock<B>,
    pool: ResourcePool<B>,
    rtv_heap: SlotHeap<B>,
    dsv_heap: SlotHeap<B>,
    srv_heap: SlotHeap<B>,
    sampler_cache: SamplerCache<B>,
    ring: FrameResourceRing<B>,

    /// swapchain 大小相关的 slot，resize 时整体重建
    default_render_targets: Vec<u32>,
    default_depth_stencil: u32,
}
// new & init
impl<B: GfxBackend> GfxReclaimer<B> {
    pub fn new(backend: &B, config: ReclaimConfig) -> Self {
        Self::try_new(backend, config).or_fatal()
    }

    pub fn try_new(backend: &B, config: ReclaimConfig) -> Result<Self, ReclaimError> {
        config.validate()?;

        let clock = FrameClock::try_new(backend, config.frames_in_flight, config.safety_margin)?;
        let heaps = &config.heaps;
        let mut rtv_heap =
            SlotHeap::try_new(backend, SlotKind::RenderTargetView, heaps.render_target_view, "rtv-heap")?;
        let mut dsv_heap =
            SlotHeap::try_new(backend, SlotKind::DepthStencilView, heaps.depth_stencil_view, "dsv-heap")?;
        let srv_heap =
            SlotHeap::try_new(backend, SlotKind::ShaderResourceView, heaps.shader_resource_view, "srv-heap")?;
        let sampler_cache = SamplerCache::try_new(backend, heaps.sampler)?;
        let ring = FrameResourceRing::try_new(backend, &config, clock.current_frame())?;

        let default_render_targets = Self::alloc_default_render_targets(&mut rtv_heap, &config)?;
        let default_depth_stencil = dsv_heap.try_alloc_slot()?;

        log::info!("gfx reclaimer created: {:?}", config);
        Ok(Self {
            config,
            clock,
            pool: ResourcePool::new(),
            rtv_heap,
            dsv_heap,
            srv_heap,
            sampler_cache,
            ring,
            default_render_targets,
            default_depth_stencil,
        })
    }

    fn alloc_default_render_targets(
        rtv_heap: &mut SlotHeap<B>,
        config: &ReclaimConfig,
    ) -> Result<Vec<u32>, ReclaimError> {
        (0..config.default_render_targets).map(|_| rtv_heap.try_alloc_slot()).collect()
    }
}
// destroy
impl<B: GfxBackend> GfxReclaimer<B> {
    /// 等待 GPU 空闲，然后销毁所有资源
    pub fn destroy(self, backend: &B) {
        let _span = tracy_client::span!("GfxReclaimer::destroy");
        let Self {
            mut clock,
            mut pool,
            rtv_heap,
            dsv_heap,
            srv_heap,
            sampler_cache,
            ring,
            ..
        } = self;

        clock.wait_idle(backend);
        pool.destroy_all(backend);
        rtv_heap.destroy(backend);
        dsv_heap.destroy(backend);
        srv_heap.destroy(backend);
        sampler_cache.destroy(backend);
        ring.destroy(backend);
        log::info!("gfx reclaimer destroyed at {}", clock.frame_name());
        clock.destroy(backend);
    }
}
// getters
impl<B: GfxBackend> GfxReclaimer<B> {
    #[inline]
    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }
    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.clock.current_frame()
    }
    #[inline]
    pub fn clock(&self) -> &FrameClock<B> {
        &self.clock
    }
    #[inline]
    pub fn pool(&self) -> &ResourcePool<B> {
        &self.pool
    }
    #[inline]
    pub fn pool_mut(&mut self) -> &mut ResourcePool<B> {
        &mut self.pool
    }
    #[inline]
    pub fn heap(&self, kind: SlotKind) -> &SlotHeap<B> {
        match kind {
            SlotKind::RenderTargetView => &self.rtv_heap,
            SlotKind::DepthStencilView => &self.dsv_heap,
            SlotKind::ShaderResourceView => &self.srv_heap,
            SlotKind::Sampler => self.sampler_cache.heap(),
        }
    }
    #[inline]
    pub fn heap_mut(&mut self, kind: SlotKind) -> &mut SlotHeap<B> {
        match kind {
            SlotKind::RenderTargetView => &mut self.rtv_heap,
            SlotKind::DepthStencilView => &mut self.dsv_heap,
            SlotKind::ShaderResourceView => &mut self.srv_heap,
            SlotKind::Sampler => self.sampler_cache.heap_mut(),
        }
    }
    #[inline]
    pub fn sampler_cache(&self) -> &SamplerCache<B> {
        &self.sampler_cache
    }
    #[inline]
    pub fn ring(&self) -> &FrameResourceRing<B> {
        &self.ring
    }
    #[inline]
    pub fn ring_mut(&mut self) -> &mut FrameResourceRing<B> {
        &mut self.ring
    }
    #[inline]
    pub fn default_render_targets(&self) -> &[u32] {
        &self.default_render_targets
    }
    #[inline]
    pub fn default_depth_stencil(&self) -> u32 {
        self.default_depth_stencil
    }
}
// update
impl<B: GfxBackend> GfxReclaimer<B> {
    /// 刷新 GPU 进度，回收所有已经安全的资源，返回当前帧号
    pub fn begin_frame(&mut self, backend: &B) -> u64 {
        self.try_begin_frame(backend).or_fatal()
    }

    pub fn try_begin_frame(&mut self, backend: &B) -> Result<u64, ReclaimError> {
        let _span = tracy_client::span!("GfxReclaimer::begin_frame");

        self.clock.try_poll(backend)?;
        let frame = self.clock.current_frame();
        let mut freed = self.pool.garbage_collect(backend, &self.clock, frame);
        let heaps = [
            &mut self.rtv_heap,
            &mut self.dsv_heap,
            &mut self.srv_heap,
            self.sampler_cache.heap_mut(),
        ];
        for heap in heaps {
            freed += heap.garbage_collect(&self.clock, frame);
        }
        if freed > 0 {
            log::debug!("{} reclaimed {} objects", self.clock.frame_name(), freed);
        }
        Ok(frame)
    }

    /// 这一帧的命令已经提交：signal fence，推进帧号并轮转 frame ring，返回新的帧号
    ///
    /// 下一帧的 ring slot 还在被 GPU 使用时返回 [`ReclaimError::RingSlotInFlight`]，
    /// 此时帧号和 ring 都保持不变（fence 已经 signal，重试时不会重复 signal）。
    pub fn end_frame(&mut self, backend: &B) -> u64 {
        self.try_end_frame(backend).or_fatal()
    }

    pub fn try_end_frame(&mut self, backend: &B) -> Result<u64, ReclaimError> {
        let _span = tracy_client::span!("GfxReclaimer::end_frame");

        self.clock.try_signal_current(backend)?;
        self.ring.check_reusable(&self.clock, self.clock.current_frame() + 1)?;
        let frame = self.clock.try_advance(backend)?;
        self.ring.try_advance(&self.clock, frame)?;
        Ok(frame)
    }

    /// 和 [`GfxReclaimer::end_frame`] 相同，但 GPU 落后太多时阻塞，直到新帧的 ring slot 可以复用
    ///
    /// 这是渲染器的帧节流（类似 swapchain acquire 的等待），CPU 最多领先 GPU `frames_in_flight` 帧。
    pub fn end_frame_paced(&mut self, backend: &B) -> u64 {
        self.try_end_frame_paced(backend).or_fatal()
    }

    pub fn try_end_frame_paced(&mut self, backend: &B) -> Result<u64, ReclaimError> {
        let _span = tracy_client::span!("GfxReclaimer::end_frame_paced");

        self.clock.try_signal_current(backend)?;
        let previous = self.ring.previous_user(self.clock.current_frame() + 1);
        self.clock.try_wait_for_frame(backend, previous)?;
        let frame = self.clock.try_advance(backend)?;
        self.ring.try_advance(&self.clock, frame)?;
        Ok(frame)
    }

    /// 显示尺寸变化：等待 GPU 空闲，立即回收默认 render target / depth stencil 的 slot 并重新分配
    pub fn resize(&mut self, backend: &B) {
        self.try_resize(backend).or_fatal()
    }

    pub fn try_resize(&mut self, backend: &B) -> Result<(), ReclaimError> {
        self.clock.try_wait_idle(backend)?;

        for slot in self.default_render_targets.drain(..) {
            self.rtv_heap.try_release_slot_immediate(slot)?;
        }
        self.dsv_heap.try_release_slot_immediate(self.default_depth_stencil)?;

        self.default_render_targets = Self::alloc_default_render_targets(&mut self.rtv_heap, &self.config)?;
        self.default_depth_stencil = self.dsv_heap.try_alloc_slot()?;
        log::info!(
            "{} resized: render targets {:?}, depth stencil {}",
            self.clock.frame_name(),
            self.default_render_targets,
            self.default_depth_stencil
        );
        Ok(())
    }

    /// 在当前帧释放资源
    #[inline]
    pub fn release_resource(&mut self, handle: ResourceHandle) {
        let frame = self.clock.current_frame();
        self.pool.release_deferred(handle, frame);
    }

    /// 在当前帧释放描述符 slot
    ///
    /// sampler 缓存持有的 slot 不能释放，返回 [`ReclaimError::InvalidSlot`]。
    #[inline]
    pub fn release_slot(&mut self, kind: SlotKind, index: u32) {
        self.try_release_slot(kind, index).or_fatal()
    }

    pub fn try_release_slot(&mut self, kind: SlotKind, index: u32) -> Result<(), ReclaimError> {
        let frame = self.clock.current_frame();
        self.heap_mut(kind).try_release_slot_deferred(index, frame)
    }

    #[inline]
    pub fn lookup_samplers(&mut self, backend: &B, descs: &[GfxSamplerDesc]) -> u32 {
        self.sampler_cache.lookup(backend, descs)
    }

    #[inline]
    pub fn try_lookup_samplers(&mut self, backend: &B, descs: &[GfxSamplerDesc]) -> Result<u32, ReclaimError> {
        self.sampler_cache.try_lookup(backend, descs)
    }
}
