use std::ptr::NonNull;

use lumen_gfx::backend::GfxBackend;
use lumen_gfx::resources::buffer::GfxBufferDesc;
use lumen_gfx::resources::image::GfxImageDesc;
use lumen_gfx::resources::state::ResourceState;
use slotmap::SlotMap;

use crate::error::{OrFatal, ReclaimError};
use crate::frame_clock::FrameClock;
use crate::handles::ResourceHandle;
use crate::retire_queue::{RetireQueue, RetirementEntry};

/// 资源的生命周期阶段
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Live,
    /// 已经在 `frame` 帧释放，等待 GPU 完成
    Retired { frame: u64 },
}

pub enum NativeResource<B: GfxBackend> {
    Buffer(B::Buffer),
    Image(B::Image),
}

struct PoolEntry<B: GfxBackend> {
    native: NativeResource<B>,
    state: ResourceState,
    size: u64,
    /// 一次上传的字节数：buffer 为 `size`，image 只上传 mip 0
    upload_size: u64,
    lifecycle: Lifecycle,
    name: String,
}

enum RetiredObject<B: GfxBackend> {
    Resource(ResourceHandle),
    CommandBuffer(B::CommandBuffer),
}

/// GPU 资源池
///
/// 负责 buffer / image 的分配与延迟释放，所有资源通过带代际的 [`ResourceHandle`] 访问。
///
/// # 延迟释放
/// `release_deferred(handle, frame)` 只是把资源放入 retire queue；
/// 每一帧开始时的 `garbage_collect` 会从队首销毁所有 [`FrameClock::safe_to_free`] 的条目。
/// 资源被销毁之后，旧的 handle 会解析失败（[`ReclaimError::StaleHandle`]）。
///
/// `destroy_all` 之后所有的分配、写入和释放都返回 [`ReclaimError::PoolDestroyed`]。
pub struct ResourcePool<B: GfxBackend> {
    resources: SlotMap<ResourceHandle, PoolEntry<B>>,
    retire_queue: RetireQueue<RetiredObject<B>>,

    live_command_buffers: usize,
    destroyed: bool,
}
impl<B: GfxBackend> Default for ResourcePool<B> {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl<B: GfxBackend> ResourcePool<B> {
    pub fn new() -> Self {
        Self {
            resources: SlotMap::with_key(),
            retire_queue: RetireQueue::new(),
            live_command_buffers: 0,
            destroyed: false,
        }
    }
}
// destroy
impl<B: GfxBackend> ResourcePool<B> {
    /// 无条件销毁所有的资源，包括还在 retire queue 中的
    ///
    /// 只能在 GPU 空闲之后调用（见 [`FrameClock::wait_idle`]）。
    pub fn destroy_all(&mut self, backend: &B) {
        let _span = tracy_client::span!("ResourcePool::destroy_all");

        let mut freed = 0;
        let pending: Vec<_> = self.retire_queue.drain_all().collect();
        for entry in pending {
            self.free_retired(backend, entry);
            freed += 1;
        }
        for (_, entry) in self.resources.drain() {
            Self::destroy_native(backend, entry.native);
            freed += 1;
        }
        if self.live_command_buffers > 0 {
            log::warn!("{} command buffers were never released", self.live_command_buffers);
        }

        self.destroyed = true;
        log::info!("resource pool destroyed, {} objects freed", freed);
    }
}
impl<B: GfxBackend> Drop for ResourcePool<B> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.destroyed || (self.resources.is_empty() && self.retire_queue.is_empty()),
                "ResourcePool dropped with live resources, call destroy_all()"
            );
        }
    }
}
// 分配
impl<B: GfxBackend> ResourcePool<B> {
    /// CPU 可写、GPU 可读的 buffer，整个生命周期内保持 map，初始状态为 `GenericRead`
    pub fn allocate_upload(&mut self, backend: &B, size: u64, debug_name: &str) -> ResourceHandle {
        self.try_allocate_upload(backend, size, debug_name).or_fatal()
    }

    pub fn try_allocate_upload(
        &mut self,
        backend: &B,
        size: u64,
        debug_name: &str,
    ) -> Result<ResourceHandle, ReclaimError> {
        self.try_allocate_buffer(backend, &GfxBufferDesc::upload(size), ResourceState::GenericRead, debug_name)
    }

    /// GPU 本地的 buffer
    pub fn allocate_default(
        &mut self,
        backend: &B,
        size: u64,
        initial_state: ResourceState,
        debug_name: &str,
    ) -> ResourceHandle {
        self.try_allocate_default(backend, size, initial_state, debug_name).or_fatal()
    }

    pub fn try_allocate_default(
        &mut self,
        backend: &B,
        size: u64,
        initial_state: ResourceState,
        debug_name: &str,
    ) -> Result<ResourceHandle, ReclaimError> {
        self.try_allocate_buffer(backend, &GfxBufferDesc::device(size), initial_state, debug_name)
    }

    /// GPU 本地的 2D image
    pub fn allocate_image(
        &mut self,
        backend: &B,
        desc: &GfxImageDesc,
        initial_state: ResourceState,
        debug_name: &str,
    ) -> ResourceHandle {
        self.try_allocate_image(backend, desc, initial_state, debug_name).or_fatal()
    }

    pub fn try_allocate_image(
        &mut self,
        backend: &B,
        desc: &GfxImageDesc,
        initial_state: ResourceState,
        debug_name: &str,
    ) -> Result<ResourceHandle, ReclaimError> {
        self.check_not_destroyed()?;
        let size = desc.total_bytes();
        if size == 0 {
            return Err(ReclaimError::ZeroSizeAllocation);
        }
        let image = backend.create_image(desc, debug_name).map_err(|e| ReclaimError::from_alloc(e, size))?;
        let handle = self.insert(NativeResource::Image(image), initial_state, size, desc.base_level_bytes(), debug_name);
        log::debug!("> allocated image {} {:?}: {}x{}", debug_name, handle, desc.width, desc.height);
        Ok(handle)
    }

    /// 静态 buffer：GPU 本地，可选的初始数据，最后转换到 `usage_state`
    ///
    /// 初始数据通过临时的 upload buffer 上传，该 upload buffer 在 `frame` 帧退休。
    pub fn allocate_static_buffer(
        &mut self,
        backend: &B,
        cmd: &B::CommandBuffer,
        size: u64,
        data: Option<&[u8]>,
        usage_state: ResourceState,
        frame: u64,
        debug_name: &str,
    ) -> ResourceHandle {
        self.try_allocate_static_buffer(backend, cmd, size, data, usage_state, frame, debug_name)
            .or_fatal()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn try_allocate_static_buffer(
        &mut self,
        backend: &B,
        cmd: &B::CommandBuffer,
        size: u64,
        data: Option<&[u8]>,
        usage_state: ResourceState,
        frame: u64,
        debug_name: &str,
    ) -> Result<ResourceHandle, ReclaimError> {
        let handle = self.try_allocate_default(backend, size, ResourceState::CopyDst, debug_name)?;
        if let Some(data) = data {
            self.try_upload_and_copy(backend, cmd, handle, data, frame, None)?;
        }
        self.try_transition(backend, cmd, handle, usage_state)?;
        Ok(handle)
    }

    /// 分配一个 command buffer，录制和提交由调用方负责
    pub fn allocate_command_buffer(&mut self, backend: &B, debug_name: &str) -> B::CommandBuffer {
        self.try_allocate_command_buffer(backend, debug_name).or_fatal()
    }

    pub fn try_allocate_command_buffer(
        &mut self,
        backend: &B,
        debug_name: &str,
    ) -> Result<B::CommandBuffer, ReclaimError> {
        self.check_not_destroyed()?;
        let cmd = backend.allocate_command_buffer(debug_name)?;
        self.live_command_buffers += 1;
        Ok(cmd)
    }

    fn try_allocate_buffer(
        &mut self,
        backend: &B,
        desc: &GfxBufferDesc,
        initial_state: ResourceState,
        debug_name: &str,
    ) -> Result<ResourceHandle, ReclaimError> {
        self.check_not_destroyed()?;
        if desc.size == 0 {
            return Err(ReclaimError::ZeroSizeAllocation);
        }
        let buffer = backend.create_buffer(desc, debug_name).map_err(|e| ReclaimError::from_alloc(e, desc.size))?;
        let handle = self.insert(NativeResource::Buffer(buffer), initial_state, desc.size, desc.size, debug_name);
        log::debug!("> allocated buffer {} {:?}: {} bytes", debug_name, handle, desc.size);
        Ok(handle)
    }

    fn insert(
        &mut self,
        native: NativeResource<B>,
        state: ResourceState,
        size: u64,
        upload_size: u64,
        debug_name: &str,
    ) -> ResourceHandle {
        self.resources.insert(PoolEntry {
            native,
            state,
            size,
            upload_size,
            lifecycle: Lifecycle::Live,
            name: debug_name.to_string(),
        })
    }
}
// 写入与命令
impl<B: GfxBackend> ResourcePool<B> {
    /// 直接写入 upload buffer 的 mapped 内存
    pub fn write_mapped(&mut self, backend: &B, handle: ResourceHandle, offset: u64, bytes: &[u8]) {
        self.try_write_mapped(backend, handle, offset, bytes).or_fatal()
    }

    pub fn try_write_mapped(
        &mut self,
        backend: &B,
        handle: ResourceHandle,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), ReclaimError> {
        self.check_not_destroyed()?;
        let entry = self.live_entry(handle)?;
        let NativeResource::Buffer(buffer) = &entry.native else {
            return Err(ReclaimError::NotMapped(handle));
        };
        let ptr = backend.buffer_mapped_ptr(buffer).ok_or(ReclaimError::NotMapped(handle))?;
        let len = bytes.len() as u64;
        if offset.checked_add(len).is_none_or(|end| end > entry.size) {
            return Err(ReclaimError::OutOfBounds {
                offset,
                len,
                size: entry.size,
            });
        }

        // SAFETY: 范围已经检查过，mapped 内存在 buffer 销毁之前一直有效
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(offset as usize), bytes.len());
        }
        backend.flush_buffer(buffer, offset, len)?;
        Ok(())
    }

    /// 两阶段写入：先写入 upload 内存，再在 `cmd` 中录制 copy
    ///
    /// - `staging` 为 `None` 时创建一个临时的 upload buffer，并在 `frame` 帧退休；中途失败时同样退休
    /// - buffer 目标：`bytes` 不能超过 buffer 的大小，写入从 offset 0 开始
    /// - image 目标：只写入 mip 0，`bytes` 的长度必须正好是 mip 0 的字节数
    /// - `dst` 在 copy 前后的状态：当前状态 -> `CopyDst` -> copy -> 当前状态；
    ///   已经处于 `CopyDst` 的资源不会录制任何 transition，`Undefined` 的资源在 copy 之后停留在 `CopyDst`
    /// - `bytes` 为空时什么都不做
    pub fn upload_and_copy(
        &mut self,
        backend: &B,
        cmd: &B::CommandBuffer,
        dst: ResourceHandle,
        bytes: &[u8],
        frame: u64,
        staging: Option<ResourceHandle>,
    ) {
        self.try_upload_and_copy(backend, cmd, dst, bytes, frame, staging).or_fatal()
    }

    pub fn try_upload_and_copy(
        &mut self,
        backend: &B,
        cmd: &B::CommandBuffer,
        dst: ResourceHandle,
        bytes: &[u8],
        frame: u64,
        staging: Option<ResourceHandle>,
    ) -> Result<(), ReclaimError> {
        self.check_not_destroyed()?;
        if bytes.is_empty() {
            return Ok(());
        }
        let len = bytes.len() as u64;

        // 先检查目标，避免创建了 staging 之后才失败
        let dst_entry = self.live_entry(dst)?;
        match dst_entry.native {
            NativeResource::Buffer(_) if len > dst_entry.upload_size => {
                return Err(ReclaimError::OutOfBounds {
                    offset: 0,
                    len,
                    size: dst_entry.upload_size,
                });
            }
            NativeResource::Image(_) if len != dst_entry.upload_size => {
                return Err(ReclaimError::UploadSizeMismatch {
                    handle: dst,
                    len,
                    expected: dst_entry.upload_size,
                });
            }
            _ => {}
        }

        let Some(staging) = staging else {
            let name = format!("{}-staging", dst_entry.name);
            let staging = self.try_allocate_upload(backend, len, &name)?;
            let recorded = self.record_upload(backend, cmd, dst, bytes, staging);
            // 录制失败时 cmd 里可能已经有引用 staging 的命令，同样走延迟释放
            let released = self.try_release_deferred(staging, frame);
            recorded.and(released)?;
            log::debug!("> upload {} bytes to {:?} at frame {}", len, dst, frame);
            return Ok(());
        };
        self.record_upload(backend, cmd, dst, bytes, staging)?;
        log::debug!("> upload {} bytes to {:?} via {:?} at frame {}", len, dst, staging, frame);
        Ok(())
    }

    fn record_upload(
        &mut self,
        backend: &B,
        cmd: &B::CommandBuffer,
        dst: ResourceHandle,
        bytes: &[u8],
        staging: ResourceHandle,
    ) -> Result<(), ReclaimError> {
        self.try_write_mapped(backend, staging, 0, bytes)?;

        let prior_state = self.live_entry(dst)?.state;
        self.try_transition(backend, cmd, dst, ResourceState::CopyDst)?;
        {
            let NativeResource::Buffer(src) = &self.live_entry(staging)?.native else {
                return Err(ReclaimError::WrongResourceKind(staging));
            };
            match &self.live_entry(dst)?.native {
                NativeResource::Buffer(dst_buffer) => {
                    backend.cmd_copy_buffer(cmd, src, 0, dst_buffer, 0, bytes.len() as u64)
                }
                NativeResource::Image(dst_image) => backend.cmd_copy_buffer_to_image(cmd, src, 0, dst_image),
            }
        }
        if prior_state != ResourceState::Undefined {
            self.try_transition(backend, cmd, dst, prior_state)?;
        }
        Ok(())
    }

    /// 录制一个状态转换，并更新记录的状态；相同状态之间不录制任何命令
    pub fn transition(&mut self, backend: &B, cmd: &B::CommandBuffer, handle: ResourceHandle, to: ResourceState) {
        self.try_transition(backend, cmd, handle, to).or_fatal()
    }

    pub fn try_transition(
        &mut self,
        backend: &B,
        cmd: &B::CommandBuffer,
        handle: ResourceHandle,
        to: ResourceState,
    ) -> Result<(), ReclaimError> {
        let entry = self.live_entry_mut(handle)?;
        let from = entry.state;
        if from == to {
            return Ok(());
        }
        match &entry.native {
            NativeResource::Buffer(buffer) => {
                if to.is_image_only() {
                    return Err(ReclaimError::WrongResourceKind(handle));
                }
                backend.cmd_buffer_transition(cmd, buffer, from, to)
            }
            NativeResource::Image(image) => backend.cmd_image_transition(cmd, image, from, to),
        }
        entry.state = to;
        Ok(())
    }

    /// 调用方自己录制了 barrier 之后，同步记录的状态
    pub fn set_state(&mut self, handle: ResourceHandle, state: ResourceState) -> Result<(), ReclaimError> {
        self.live_entry_mut(handle)?.state = state;
        Ok(())
    }
}
// 释放与回收
impl<B: GfxBackend> ResourcePool<B> {
    /// 在 `frame` 帧释放资源，真正的销毁发生在之后的 `garbage_collect` 中
    pub fn release_deferred(&mut self, handle: ResourceHandle, frame: u64) {
        self.try_release_deferred(handle, frame).or_fatal()
    }

    pub fn try_release_deferred(&mut self, handle: ResourceHandle, frame: u64) -> Result<(), ReclaimError> {
        self.check_not_destroyed()?;
        let entry = self.resources.get_mut(handle).ok_or(ReclaimError::StaleHandle(handle))?;
        if let Lifecycle::Retired { .. } = entry.lifecycle {
            return Err(ReclaimError::DoubleRelease(handle));
        }
        self.retire_queue.try_push(frame, RetiredObject::Resource(handle))?;
        entry.lifecycle = Lifecycle::Retired { frame };
        log::debug!("> released {} {:?} at frame {}", entry.name, handle, frame);
        Ok(())
    }

    /// command buffer 也可能被 in-flight 的帧引用，和资源走同一个 retire queue
    pub fn release_command_buffer_deferred(&mut self, cmd: B::CommandBuffer, frame: u64) {
        self.try_release_command_buffer_deferred(cmd, frame).or_fatal()
    }

    pub fn try_release_command_buffer_deferred(&mut self, cmd: B::CommandBuffer, frame: u64) -> Result<(), ReclaimError> {
        self.check_not_destroyed()?;
        self.retire_queue.try_push(frame, RetiredObject::CommandBuffer(cmd))
    }

    /// 销毁所有可以安全释放的对象，返回销毁的数量
    ///
    /// 每一帧开始时调用一次，非阻塞。
    pub fn garbage_collect(&mut self, backend: &B, clock: &FrameClock<B>, frame: u64) -> usize {
        let _span = tracy_client::span!("ResourcePool::garbage_collect");

        let mut freed = 0;
        while let Some(entry) = self.retire_queue.pop_ready(|retired_at| clock.safe_to_free(retired_at)) {
            self.free_retired(backend, entry);
            freed += 1;
        }
        if freed > 0 {
            log::debug!(
                "frame {}: freed {} objects, {} still pending (gpu at {})",
                frame,
                freed,
                self.retire_queue.len(),
                clock.fence_last_signaled()
            );
        }
        freed
    }

    fn free_retired(&mut self, backend: &B, entry: RetirementEntry<RetiredObject<B>>) {
        match entry.payload {
            RetiredObject::Resource(handle) => {
                if let Some(resource) = self.resources.remove(handle) {
                    debug_assert_eq!(resource.lifecycle, Lifecycle::Retired { frame: entry.frame_index });
                    log::debug!("> freed {} {:?} (retired at frame {})", resource.name, handle, entry.frame_index);
                    Self::destroy_native(backend, resource.native);
                }
            }
            RetiredObject::CommandBuffer(cmd) => {
                self.live_command_buffers -= 1;
                backend.free_command_buffer(cmd);
            }
        }
    }

    fn destroy_native(backend: &B, native: NativeResource<B>) {
        match native {
            NativeResource::Buffer(buffer) => backend.destroy_buffer(buffer),
            NativeResource::Image(image) => backend.destroy_image(image),
        }
    }
}
// getters
impl<B: GfxBackend> ResourcePool<B> {
    /// 只解析 live 的资源
    #[inline]
    pub fn get(&self, handle: ResourceHandle) -> Option<&NativeResource<B>> {
        self.live_entry(handle).ok().map(|entry| &entry.native)
    }
    #[inline]
    pub fn buffer(&self, handle: ResourceHandle) -> Option<&B::Buffer> {
        match self.get(handle)? {
            NativeResource::Buffer(buffer) => Some(buffer),
            NativeResource::Image(_) => None,
        }
    }
    #[inline]
    pub fn image(&self, handle: ResourceHandle) -> Option<&B::Image> {
        match self.get(handle)? {
            NativeResource::Image(image) => Some(image),
            NativeResource::Buffer(_) => None,
        }
    }
    #[inline]
    pub fn state(&self, handle: ResourceHandle) -> Option<ResourceState> {
        self.live_entry(handle).ok().map(|entry| entry.state)
    }
    #[inline]
    pub fn size(&self, handle: ResourceHandle) -> Option<u64> {
        self.live_entry(handle).ok().map(|entry| entry.size)
    }
    /// 包括已经退休但还没有被回收的资源；回收之后返回 `None`
    #[inline]
    pub fn lifecycle(&self, handle: ResourceHandle) -> Option<Lifecycle> {
        self.resources.get(handle).map(|entry| entry.lifecycle)
    }
    #[inline]
    pub fn cpu_ptr(&self, backend: &B, handle: ResourceHandle) -> Option<NonNull<u8>> {
        backend.buffer_mapped_ptr(self.buffer(handle)?)
    }
    #[inline]
    pub fn gpu_address(&self, backend: &B, handle: ResourceHandle) -> Option<u64> {
        Some(backend.buffer_device_address(self.buffer(handle)?))
    }
    /// 还没有被回收的资源数量（包括已经退休的）
    #[inline]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
    /// retire queue 中的条目数量
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.retire_queue.len()
    }
    #[inline]
    pub fn live_command_buffer_count(&self) -> usize {
        self.live_command_buffers
    }
}
// tools
impl<B: GfxBackend> ResourcePool<B> {
    #[inline]
    fn check_not_destroyed(&self) -> Result<(), ReclaimError> {
        if self.destroyed { Err(ReclaimError::PoolDestroyed) } else { Ok(()) }
    }

    fn live_entry(&self, handle: ResourceHandle) -> Result<&PoolEntry<B>, ReclaimError> {
        match self.resources.get(handle) {
            Some(entry) if entry.lifecycle == Lifecycle::Live => Ok(entry),
            _ => Err(ReclaimError::StaleHandle(handle)),
        }
    }

    fn live_entry_mut(&mut self, handle: ResourceHandle) -> Result<&mut PoolEntry<B>, ReclaimError> {
        match self.resources.get_mut(handle) {
            Some(entry) if entry.lifecycle == Lifecycle::Live => Ok(entry),
            _ => Err(ReclaimError::StaleHandle(handle)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_gfx::headless::{HeadlessBackend, HeadlessCommand, HeadlessTimelineMode};
    use lumen_gfx::resources::image::GfxTexelFormat;

    struct Fixture {
        backend: HeadlessBackend,
        clock: FrameClock<HeadlessBackend>,
        pool: ResourcePool<HeadlessBackend>,
    }
    impl Fixture {
        fn new(frames_in_flight: u32) -> Self {
            let backend = HeadlessBackend::with_timeline_mode(HeadlessTimelineMode::Manual);
            let clock = FrameClock::new(&backend, frames_in_flight, 1);
            Self {
                backend,
                clock,
                pool: ResourcePool::new(),
            }
        }

        /// 推进到 `frame`，GPU 不做任何进度
        fn advance_to(&mut self, frame: u64) {
            while self.clock.current_frame() < frame {
                self.clock.advance(&self.backend);
            }
        }

        fn complete(&mut self, value: u64) {
            self.backend.complete_fence(self.clock.fence(), value);
            self.clock.poll(&self.backend);
        }

        fn gc(&mut self) -> usize {
            let frame = self.clock.current_frame();
            self.pool.garbage_collect(&self.backend, &self.clock, frame)
        }

        fn buffer_id(&self, handle: ResourceHandle) -> u64 {
            self.pool.buffer(handle).unwrap().id()
        }

        fn teardown(mut self) {
            self.clock.wait_idle(&self.backend);
            self.pool.destroy_all(&self.backend);
            self.clock.destroy(&self.backend);
        }
    }

    #[test]
    fn test_release_is_deferred_until_fence_passes_safe_frame() {
        let mut fx = Fixture::new(2);
        fx.advance_to(10);
        let handle = fx.pool.allocate_default(&fx.backend, 64, ResourceState::General, "deferred");
        let id = fx.buffer_id(handle);
        fx.pool.release_deferred(handle, 10);
        assert_eq!(fx.pool.lifecycle(handle), Some(Lifecycle::Retired { frame: 10 }));
        // 立即释放是不允许的
        assert!(fx.backend.is_buffer_alive(id));

        fx.advance_to(14);
        for fence in [11, 12] {
            fx.complete(fence);
            assert_eq!(fx.gc(), 0, "fence at {fence}");
            assert!(fx.backend.is_buffer_alive(id));
        }
        fx.complete(13);
        assert_eq!(fx.gc(), 1);
        assert!(!fx.backend.is_buffer_alive(id));
        assert_eq!(fx.pool.lifecycle(handle), None);
        assert_eq!(fx.pool.try_release_deferred(handle, 14), Err(ReclaimError::StaleHandle(handle)));
        fx.teardown();
    }

    #[test]
    fn test_gc_frees_in_retirement_order() {
        let mut fx = Fixture::new(2);
        let mut expected = Vec::new();
        for frame in [3, 5, 5, 7] {
            fx.advance_to(frame);
            let handle = fx.pool.allocate_upload(&fx.backend, 16, &format!("upload-{frame}"));
            expected.push(fx.buffer_id(handle));
            fx.pool.release_deferred(handle, frame);
        }

        fx.advance_to(20);
        // 每次只完成一帧，逐步回收
        for fence in 1..=19 {
            fx.complete(fence);
            fx.gc();
        }
        assert_eq!(fx.backend.destroyed_buffers(), expected);
        assert_eq!(fx.pool.pending_count(), 0);
        fx.teardown();
    }

    #[test]
    fn test_gc_stops_at_first_unsafe_entry() {
        let mut fx = Fixture::new(2);
        fx.advance_to(3);
        let early = fx.pool.allocate_upload(&fx.backend, 16, "early");
        fx.pool.release_deferred(early, 3);
        fx.advance_to(8);
        let late = fx.pool.allocate_upload(&fx.backend, 16, "late");
        fx.pool.release_deferred(late, 8);

        fx.advance_to(12);
        fx.complete(6);
        assert_eq!(fx.gc(), 1);
        assert_eq!(fx.pool.lifecycle(late), Some(Lifecycle::Retired { frame: 8 }));
        fx.teardown();
    }

    #[test]
    fn test_zero_size_allocation_is_rejected() {
        let mut fx = Fixture::new(2);
        assert_eq!(fx.pool.try_allocate_upload(&fx.backend, 0, "zero"), Err(ReclaimError::ZeroSizeAllocation));
        assert_eq!(
            fx.pool.try_allocate_default(&fx.backend, 0, ResourceState::General, "zero"),
            Err(ReclaimError::ZeroSizeAllocation)
        );
        assert_eq!(fx.backend.live_buffer_count(), 0);
        fx.teardown();
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_is_fatal() {
        let mut fx = Fixture::new(2);
        let handle = fx.pool.allocate_upload(&fx.backend, 16, "twice");
        fx.pool.release_deferred(handle, 1);
        fx.pool.release_deferred(handle, 1);
    }

    #[test]
    #[should_panic(expected = "out of device memory")]
    fn test_out_of_memory_is_fatal() {
        let backend = HeadlessBackend::new().with_memory_budget(1024);
        let mut pool = ResourcePool::<HeadlessBackend>::new();
        pool.allocate_default(&backend, 512, ResourceState::General, "a");
        pool.allocate_default(&backend, 1024, ResourceState::General, "b");
    }

    #[test]
    fn test_out_of_memory_reports_size() {
        let backend = HeadlessBackend::new().with_memory_budget(100);
        let mut pool = ResourcePool::<HeadlessBackend>::new();
        assert_eq!(
            pool.try_allocate_default(&backend, 200, ResourceState::General, "big"),
            Err(ReclaimError::OutOfDeviceMemory { size: 200 })
        );
    }

    #[test]
    fn test_upload_and_copy_with_temporary_staging() {
        let mut fx = Fixture::new(2);
        let dst = fx.pool.allocate_default(&fx.backend, 8, ResourceState::VertexAndConstantBuffer, "vertices");
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "upload");
        fx.backend.begin_command_buffer(&cmd).unwrap();
        fx.pool.upload_and_copy(&fx.backend, &cmd, dst, &[9, 8, 7, 6], 1, None);
        fx.backend.end_command_buffer(&cmd).unwrap();

        let dst_id = fx.buffer_id(dst);
        let commands = cmd.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            HeadlessCommand::BufferTransition {
                buffer: dst_id,
                from: ResourceState::VertexAndConstantBuffer,
                to: ResourceState::CopyDst,
            }
        );
        let HeadlessCommand::CopyBuffer { dst: copy_dst, size, .. } = commands[1] else {
            panic!("expected a copy, got {:?}", commands[1]);
        };
        assert_eq!((copy_dst, size), (dst_id, 4));
        assert_eq!(
            commands[2],
            HeadlessCommand::BufferTransition {
                buffer: dst_id,
                from: ResourceState::CopyDst,
                to: ResourceState::VertexAndConstantBuffer,
            }
        );
        assert_eq!(fx.pool.state(dst), Some(ResourceState::VertexAndConstantBuffer));

        // 临时 staging 已经在第 1 帧退休，提交时仍然存活
        assert_eq!(fx.pool.pending_count(), 1);
        fx.backend.submit(&[&cmd]).unwrap();
        assert_eq!(&fx.pool.buffer(dst).unwrap().contents()[..4], &[9, 8, 7, 6]);

        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.advance_to(6);
        fx.complete(4);
        assert_eq!(fx.gc(), 2);
        assert_eq!(fx.backend.live_buffer_count(), 1);
        assert_eq!(fx.backend.live_command_buffer_count(), 0);
        fx.teardown();
    }

    #[test]
    fn test_upload_into_copy_dst_records_no_transition() {
        let mut fx = Fixture::new(2);
        let dst = fx.pool.allocate_default(&fx.backend, 8, ResourceState::CopyDst, "dst");
        let staging = fx.pool.allocate_upload(&fx.backend, 8, "persistent-staging");
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "upload");
        fx.pool.upload_and_copy(&fx.backend, &cmd, dst, &[1; 8], 1, Some(staging));

        let commands = cmd.commands();
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], HeadlessCommand::CopyBuffer { .. }));
        // 调用方提供的 staging 不会被释放
        assert_eq!(fx.pool.pending_count(), 0);
        assert_eq!(fx.pool.lifecycle(staging), Some(Lifecycle::Live));

        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.teardown();
    }

    #[test]
    fn test_empty_upload_is_noop() {
        let mut fx = Fixture::new(2);
        let dst = fx.pool.allocate_default(&fx.backend, 8, ResourceState::General, "dst");
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "upload");
        fx.pool.upload_and_copy(&fx.backend, &cmd, dst, &[], 1, None);
        assert!(cmd.commands().is_empty());
        assert_eq!(fx.pool.pending_count(), 0);
        assert_eq!(fx.backend.live_buffer_count(), 1);
        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.teardown();
    }

    #[test]
    fn test_upload_larger_than_destination_is_rejected() {
        let mut fx = Fixture::new(2);
        let dst = fx.pool.allocate_default(&fx.backend, 4, ResourceState::General, "small");
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "upload");
        assert_eq!(
            fx.pool.try_upload_and_copy(&fx.backend, &cmd, dst, &[0; 8], 1, None),
            Err(ReclaimError::OutOfBounds { offset: 0, len: 8, size: 4 })
        );
        assert!(cmd.commands().is_empty());
        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.teardown();
    }

    #[test]
    fn test_static_buffer_ends_in_usage_state() {
        let mut fx = Fixture::new(2);
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "static");
        let handle = fx.pool.allocate_static_buffer(
            &fx.backend,
            &cmd,
            12,
            Some(&[5; 12]),
            ResourceState::IndexBuffer,
            1,
            "indices",
        );
        let id = fx.buffer_id(handle);
        assert_eq!(fx.pool.state(handle), Some(ResourceState::IndexBuffer));
        let commands = cmd.commands();
        assert!(matches!(commands[0], HeadlessCommand::CopyBuffer { dst, .. } if dst == id));
        assert_eq!(
            commands.last(),
            Some(&HeadlessCommand::BufferTransition {
                buffer: id,
                from: ResourceState::CopyDst,
                to: ResourceState::IndexBuffer,
            })
        );

        // 没有初始数据时只有 transition
        let empty_cmd = fx.pool.allocate_command_buffer(&fx.backend, "static-empty");
        fx.pool.allocate_static_buffer(&fx.backend, &empty_cmd, 4, None, ResourceState::General, 1, "empty");
        assert_eq!(empty_cmd.commands().len(), 1);

        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.pool.release_command_buffer_deferred(empty_cmd, 1);
        fx.teardown();
    }

    #[test]
    fn test_image_upload_uses_buffer_to_image_copy() {
        let mut fx = Fixture::new(2);
        let desc = GfxImageDesc::new_2d(2, 2, GfxTexelFormat::Rgba8Unorm);
        let image = fx.pool.allocate_image(&fx.backend, &desc, ResourceState::Undefined, "albedo");
        let image_id = fx.pool.image(image).unwrap().id();
        assert!(fx.pool.buffer(image).is_none());

        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "image-upload");
        fx.pool.upload_and_copy(&fx.backend, &cmd, image, &[0xff; 16], 1, None);
        fx.pool.transition(&fx.backend, &cmd, image, ResourceState::ShaderRead);

        let commands = cmd.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            HeadlessCommand::ImageTransition {
                image: image_id,
                from: ResourceState::Undefined,
                to: ResourceState::CopyDst,
            }
        );
        assert!(matches!(commands[1], HeadlessCommand::CopyBufferToImage { image, .. } if image == image_id));
        assert_eq!(fx.pool.state(image), Some(ResourceState::ShaderRead));

        fx.pool.release_deferred(image, 1);
        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.advance_to(5);
        fx.complete(4);
        fx.gc();
        assert_eq!(fx.backend.destroyed_images(), vec![image_id]);
        fx.teardown();
    }

    #[test]
    fn test_image_upload_requires_exact_base_level_size() {
        let mut fx = Fixture::new(2);
        // mip 链共 84 字节，mip 0 只有 64 字节
        let desc = GfxImageDesc::new_2d(4, 4, GfxTexelFormat::Rgba8Unorm).with_mip_levels(3);
        let image = fx.pool.allocate_image(&fx.backend, &desc, ResourceState::Undefined, "mipped");
        assert_eq!(fx.pool.size(image), Some(84));
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "image-upload");

        for len in [16, 84] {
            assert_eq!(
                fx.pool.try_upload_and_copy(&fx.backend, &cmd, image, &vec![0; len], 1, None),
                Err(ReclaimError::UploadSizeMismatch {
                    handle: image,
                    len: len as u64,
                    expected: 64,
                })
            );
        }
        assert!(cmd.commands().is_empty());
        assert_eq!(fx.backend.live_buffer_count(), 0);

        fx.pool.upload_and_copy(&fx.backend, &cmd, image, &[7; 64], 1, None);
        let HeadlessCommand::CopyBufferToImage { size, .. } = cmd.commands()[1] else {
            panic!("expected an image copy, got {:?}", cmd.commands());
        };
        assert_eq!(size, 64);
        fx.backend.submit(&[&cmd]).unwrap();

        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.teardown();
    }

    #[test]
    fn test_failed_upload_retires_temporary_staging() {
        let mut fx = Fixture::new(2);
        let dst = fx.pool.allocate_default(&fx.backend, 8, ResourceState::General, "dst");
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "upload");
        fx.backend.lose_device();

        assert_eq!(
            fx.pool.try_upload_and_copy(&fx.backend, &cmd, dst, &[1; 8], 1, None),
            Err(ReclaimError::DeviceLost)
        );
        assert!(cmd.commands().is_empty());
        // staging 已经进入 retire queue，dst 还是 live
        assert_eq!(fx.pool.resource_count(), 2);
        assert_eq!(fx.pool.pending_count(), 1);
        assert_eq!(fx.pool.lifecycle(dst), Some(Lifecycle::Live));

        fx.pool.release_command_buffer_deferred(cmd, 1);
        fx.pool.destroy_all(&fx.backend);
        assert_eq!(fx.backend.live_buffer_count(), 0);
        fx.clock.destroy(&fx.backend);
    }

    #[test]
    fn test_pool_rejects_use_after_destroy_all() {
        let mut fx = Fixture::new(2);
        let handle = fx.pool.allocate_upload(&fx.backend, 16, "before");
        fx.clock.wait_idle(&fx.backend);
        fx.pool.destroy_all(&fx.backend);

        assert_eq!(fx.pool.try_allocate_upload(&fx.backend, 16, "after"), Err(ReclaimError::PoolDestroyed));
        assert_eq!(
            fx.pool.try_allocate_image(
                &fx.backend,
                &GfxImageDesc::new_2d(2, 2, GfxTexelFormat::Rgba8Unorm),
                ResourceState::Undefined,
                "after"
            ),
            Err(ReclaimError::PoolDestroyed)
        );
        assert!(matches!(
            fx.pool.try_allocate_command_buffer(&fx.backend, "after"),
            Err(ReclaimError::PoolDestroyed)
        ));
        assert_eq!(fx.pool.try_write_mapped(&fx.backend, handle, 0, &[1]), Err(ReclaimError::PoolDestroyed));
        assert_eq!(fx.pool.try_release_deferred(handle, 1), Err(ReclaimError::PoolDestroyed));

        assert_eq!(fx.pool.resource_count(), 0);
        assert_eq!(fx.backend.live_buffer_count(), 0);
        assert_eq!(fx.backend.live_image_count(), 0);
        assert_eq!(fx.backend.live_command_buffer_count(), 0);
        fx.clock.destroy(&fx.backend);
    }

    #[test]
    #[should_panic(expected = "used after destroy_all")]
    fn test_release_after_destroy_all_is_fatal() {
        let mut fx = Fixture::new(2);
        let handle = fx.pool.allocate_upload(&fx.backend, 16, "late");
        fx.clock.wait_idle(&fx.backend);
        fx.pool.destroy_all(&fx.backend);
        fx.pool.release_deferred(handle, 1);
    }

    #[test]
    fn test_write_mapped_bounds_and_kind() {
        let mut fx = Fixture::new(2);
        let upload = fx.pool.allocate_upload(&fx.backend, 8, "upload");
        let device = fx.pool.allocate_default(&fx.backend, 8, ResourceState::General, "device");

        fx.pool.write_mapped(&fx.backend, upload, 4, &[1, 2, 3, 4]);
        assert_eq!(fx.pool.buffer(upload).unwrap().contents(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(fx.pool.cpu_ptr(&fx.backend, upload).is_some());
        assert!(fx.pool.gpu_address(&fx.backend, upload).is_some());

        assert_eq!(
            fx.pool.try_write_mapped(&fx.backend, upload, 6, &[0; 4]),
            Err(ReclaimError::OutOfBounds { offset: 6, len: 4, size: 8 })
        );
        assert_eq!(fx.pool.try_write_mapped(&fx.backend, device, 0, &[0]), Err(ReclaimError::NotMapped(device)));
        fx.teardown();
    }

    #[test]
    fn test_destroy_all_frees_live_and_pending() {
        let mut fx = Fixture::new(3);
        let a = fx.pool.allocate_upload(&fx.backend, 8, "a");
        fx.pool.allocate_default(&fx.backend, 8, ResourceState::General, "b");
        fx.pool.allocate_image(
            &fx.backend,
            &GfxImageDesc::new_2d(4, 4, GfxTexelFormat::Depth32Float),
            ResourceState::DepthWrite,
            "depth",
        );
        fx.pool.release_deferred(a, 1);
        let cmd = fx.pool.allocate_command_buffer(&fx.backend, "cmd");
        fx.pool.release_command_buffer_deferred(cmd, 1);

        fx.clock.advance(&fx.backend);
        fx.clock.wait_idle(&fx.backend);
        fx.pool.destroy_all(&fx.backend);
        assert_eq!(fx.backend.live_buffer_count(), 0);
        assert_eq!(fx.backend.live_image_count(), 0);
        assert_eq!(fx.backend.live_command_buffer_count(), 0);
        assert_eq!(fx.backend.allocated_bytes(), 0);
        fx.clock.destroy(&fx.backend);
    }
}
