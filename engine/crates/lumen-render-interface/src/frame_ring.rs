use std::ptr::NonNull;

use bytemuck::Pod;
use lumen_gfx::backend::GfxBackend;
use lumen_gfx::descriptors::heap::{GfxDescriptorHeapInfo, SlotKind};
use lumen_gfx::error::GfxError;
use lumen_gfx::resources::buffer::GfxBufferDesc;

use crate::config::ReclaimConfig;
use crate::error::{OrFatal, ReclaimError};
use crate::frame_clock::FrameClock;
use crate::slot_heap::SlotAddress;

/// 每帧一份的临时资源：一块 scratch upload 内存，以及一段临时的 SRV 描述符
pub struct RingSlot<B: GfxBackend> {
    buffer: B::Buffer,
    cpu_write_ptr: NonNull<u8>,
    gpu_address: u64,
    scratch_offset: u64,

    /// 在 ring 描述符堆中的起始下标
    descriptor_base: u32,
    descriptor_cursor: u32,

    /// 最近一次使用这个 slot 的帧
    frame_index: u64,
}
// getters
impl<B: GfxBackend> RingSlot<B> {
    #[inline]
    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }
    #[inline]
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }
    #[inline]
    pub fn scratch_offset(&self) -> u64 {
        self.scratch_offset
    }
    #[inline]
    pub fn descriptor_base(&self) -> u32 {
        self.descriptor_base
    }
    #[inline]
    pub fn descriptor_cursor(&self) -> u32 {
        self.descriptor_cursor
    }
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

/// 一次 scratch 分配
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScratchAlloc {
    pub cpu_ptr: NonNull<u8>,
    pub gpu_address: u64,
    /// 在当前 slot buffer 中的偏移
    pub offset: u64,
    pub size: u64,
}

/// 按帧轮转的临时资源
///
/// 第 N 帧使用 `N % frames_in_flight` 号 slot。slot 在轮转回来时整体重置，
/// 所以只有 GPU 完成了上一次使用它的帧之后，才能再次使用（[`FrameResourceRing::advance`] 会检查）。
pub struct FrameResourceRing<B: GfxBackend> {
    slots: Vec<RingSlot<B>>,
    current: usize,

    scratch_budget: u64,
    scratch_alignment: u64,
    transient_per_frame: u32,

    descriptor_heap: Option<B::DescriptorHeap>,
    descriptor_info: GfxDescriptorHeapInfo,
}
// new & init
impl<B: GfxBackend> FrameResourceRing<B> {
    pub fn new(backend: &B, config: &ReclaimConfig, first_frame: u64) -> Self {
        Self::try_new(backend, config, first_frame).or_fatal()
    }

    pub fn try_new(backend: &B, config: &ReclaimConfig, first_frame: u64) -> Result<Self, ReclaimError> {
        let fif = config.frames_in_flight;
        if fif == 0 {
            return Err(ReclaimError::InvalidConfig("frames_in_flight must be at least 1".to_string()));
        }
        let transient_per_frame = config.transient_descriptors_per_frame;
        let num_descriptors = fif.checked_mul(transient_per_frame).ok_or_else(|| {
            ReclaimError::InvalidConfig(format!("{} x {} transient descriptors overflow", fif, transient_per_frame))
        })?;

        let descriptor_heap =
            backend.create_descriptor_heap(SlotKind::ShaderResourceView, num_descriptors, "frame-ring-descriptors")?;
        let descriptor_info = backend.descriptor_heap_info(&descriptor_heap);

        let buffer_desc = GfxBufferDesc::upload(config.scratch_bytes_per_frame).with_alignment(config.scratch_alignment);
        let slots = (0..fif)
            .map(|i| -> Result<RingSlot<B>, ReclaimError> {
                let buffer = backend
                    .create_buffer(&buffer_desc, &format!("frame-ring-scratch-{}", i))
                    .map_err(|e| ReclaimError::from_alloc(e, buffer_desc.size))?;
                let cpu_write_ptr = backend.buffer_mapped_ptr(&buffer).ok_or_else(|| {
                    ReclaimError::Gfx(GfxError::Unsupported("frame ring scratch buffer is not mapped".to_string()))
                })?;
                Ok(RingSlot {
                    gpu_address: backend.buffer_device_address(&buffer),
                    buffer,
                    cpu_write_ptr,
                    scratch_offset: 0,
                    descriptor_base: i * transient_per_frame,
                    descriptor_cursor: 0,
                    frame_index: 0,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "frame ring created: {} slots, {} scratch bytes and {} descriptors each",
            fif,
            config.scratch_bytes_per_frame,
            transient_per_frame
        );

        let mut ring = Self {
            slots,
            current: 0,
            scratch_budget: config.scratch_bytes_per_frame,
            scratch_alignment: config.scratch_alignment,
            transient_per_frame,
            descriptor_heap: Some(descriptor_heap),
            descriptor_info,
        };
        ring.current = ring.slot_index(first_frame);
        ring.slots[ring.current].frame_index = first_frame;
        Ok(ring)
    }
}
// destroy
impl<B: GfxBackend> FrameResourceRing<B> {
    /// 调用前 GPU 必须已经空闲
    pub fn destroy(mut self, backend: &B) {
        self.destroy_mut(backend);
    }

    pub fn destroy_mut(&mut self, backend: &B) {
        for slot in self.slots.drain(..) {
            backend.destroy_buffer(slot.buffer);
        }
        if let Some(heap) = self.descriptor_heap.take() {
            backend.destroy_descriptor_heap(heap);
            log::info!("frame ring destroyed");
        }
    }
}
impl<B: GfxBackend> Drop for FrameResourceRing<B> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.descriptor_heap.is_none(), "FrameResourceRing dropped without destroy()");
        }
    }
}
// getters
impl<B: GfxBackend> FrameResourceRing<B> {
    #[inline]
    pub fn current(&self) -> &RingSlot<B> {
        &self.slots[self.current]
    }
    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
    /// 第 `frame` 帧将要使用的 slot 上一次被哪一帧使用
    #[inline]
    pub fn previous_user(&self, frame: u64) -> u64 {
        self.slots[self.slot_index(frame)].frame_index
    }
    #[inline]
    pub fn scratch_budget(&self) -> u64 {
        self.scratch_budget
    }
    /// 当前帧剩余的 scratch 字节数（不考虑对齐）
    #[inline]
    pub fn scratch_remaining(&self) -> u64 {
        self.scratch_budget - self.current().scratch_offset
    }
    #[inline]
    pub fn descriptor_heap(&self) -> &B::DescriptorHeap {
        self.descriptor_heap.as_ref().expect("FrameResourceRing used after destroy()")
    }
    /// ring 描述符堆中某个描述符的地址
    #[inline]
    pub fn transient_descriptor_address(&self, descriptor_index: u32) -> SlotAddress {
        SlotAddress {
            cpu: self.descriptor_info.cpu_address(descriptor_index),
            gpu: self.descriptor_info.gpu_address(descriptor_index),
        }
    }
}
// update
impl<B: GfxBackend> FrameResourceRing<B> {
    /// 切换到 `frame` 对应的 slot，并重置它的 scratch 偏移和描述符游标
    ///
    /// 在 [`FrameClock::advance`] 之后调用。上一次使用这个 slot 的帧必须已经被 GPU 完成。
    pub fn advance(&mut self, clock: &FrameClock<B>, frame: u64) {
        self.try_advance(clock, frame).or_fatal()
    }

    pub fn try_advance(&mut self, clock: &FrameClock<B>, frame: u64) -> Result<(), ReclaimError> {
        self.check_reusable(clock, frame)?;

        let index = self.slot_index(frame);
        let slot = &mut self.slots[index];
        slot.scratch_offset = 0;
        slot.descriptor_cursor = 0;
        slot.frame_index = frame;
        self.current = index;
        Ok(())
    }

    /// `frame` 对应的 slot 能否复用：上一次使用它的帧已经被 GPU 完成。不修改任何状态
    pub fn check_reusable(&self, clock: &FrameClock<B>, frame: u64) -> Result<(), ReclaimError> {
        let previous = self.previous_user(frame);
        debug_assert!(previous < frame || previous == 0, "frame ring must move forward");
        if !clock.is_frame_complete(previous) {
            return Err(ReclaimError::RingSlotInFlight {
                frame,
                previous,
                completed: clock.fence_last_signaled(),
            });
        }
        Ok(())
    }

    /// 当前帧的 bump 分配；`align` 为 0 时使用配置的默认对齐
    pub fn alloc_scratch(&mut self, size: u64, align: u64) -> ScratchAlloc {
        self.try_alloc_scratch(size, align).or_fatal()
    }

    pub fn try_alloc_scratch(&mut self, size: u64, align: u64) -> Result<ScratchAlloc, ReclaimError> {
        if size == 0 {
            return Err(ReclaimError::ZeroSizeAllocation);
        }
        let align = if align == 0 { self.scratch_alignment } else { align };
        debug_assert!(align.is_power_of_two(), "scratch alignment {align} is not a power of two");

        let budget = self.scratch_budget;
        let slot = &mut self.slots[self.current];
        let offset = slot.scratch_offset.next_multiple_of(align);
        if offset.checked_add(size).is_none_or(|end| end > budget) {
            return Err(ReclaimError::ScratchExhausted {
                requested: size,
                offset: slot.scratch_offset,
                budget,
            });
        }
        slot.scratch_offset = offset + size;

        // SAFETY: offset + size <= budget，mapped 内存在 slot 存在期间有效
        let cpu_ptr = unsafe { slot.cpu_write_ptr.add(offset as usize) };
        Ok(ScratchAlloc {
            cpu_ptr,
            gpu_address: slot.gpu_address + offset,
            offset,
            size,
        })
    }

    /// 分配并写入 `bytes`
    ///
    /// `bytes` 为空时不分配，返回当前偏移处大小为 0 的 [`ScratchAlloc`]。
    pub fn write_scratch(&mut self, backend: &B, bytes: &[u8], align: u64) -> ScratchAlloc {
        self.try_write_scratch(backend, bytes, align).or_fatal()
    }

    pub fn try_write_scratch(&mut self, backend: &B, bytes: &[u8], align: u64) -> Result<ScratchAlloc, ReclaimError> {
        if bytes.is_empty() {
            let slot = self.current();
            let offset = slot.scratch_offset;
            // SAFETY: offset <= budget，最多指向 mapped 内存的末尾
            let cpu_ptr = unsafe { slot.cpu_write_ptr.add(offset as usize) };
            return Ok(ScratchAlloc {
                cpu_ptr,
                gpu_address: slot.gpu_address + offset,
                offset,
                size: 0,
            });
        }
        let alloc = self.try_alloc_scratch(bytes.len() as u64, align)?;
        // SAFETY: 刚刚分配的区域，长度等于 bytes.len()
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), alloc.cpu_ptr.as_ptr(), bytes.len());
        }
        backend.flush_buffer(&self.current().buffer, alloc.offset, alloc.size)?;
        Ok(alloc)
    }

    /// 按 `T` 的对齐写入一段 POD 数据，例如每帧的 constant buffer
    pub fn write_scratch_pod<T: Pod>(&mut self, backend: &B, data: &[T]) -> ScratchAlloc {
        let align = (std::mem::align_of::<T>() as u64).max(self.scratch_alignment);
        self.write_scratch(backend, bytemuck::cast_slice(data), align)
    }

    /// 从当前帧的描述符段中分配 `count` 个连续描述符，返回第一个的下标
    pub fn alloc_transient_descriptors(&mut self, count: u32) -> u32 {
        self.try_alloc_transient_descriptors(count).or_fatal()
    }

    pub fn try_alloc_transient_descriptors(&mut self, count: u32) -> Result<u32, ReclaimError> {
        let budget = self.transient_per_frame;
        let slot = &mut self.slots[self.current];
        if slot.descriptor_cursor.checked_add(count).is_none_or(|end| end > budget) {
            return Err(ReclaimError::TransientDescriptorsExhausted {
                requested: count,
                cursor: slot.descriptor_cursor,
                budget,
            });
        }
        let first = slot.descriptor_base + slot.descriptor_cursor;
        slot.descriptor_cursor += count;
        Ok(first)
    }
}
// tools
impl<B: GfxBackend> FrameResourceRing<B> {
    #[inline]
    fn slot_index(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_gfx::headless::{HeadlessBackend, HeadlessTimelineMode};

    fn config(frames_in_flight: u32) -> ReclaimConfig {
        ReclaimConfig {
            frames_in_flight,
            scratch_bytes_per_frame: 1024,
            scratch_alignment: 256,
            transient_descriptors_per_frame: 8,
            ..Default::default()
        }
    }

    struct Fixture {
        backend: HeadlessBackend,
        clock: FrameClock<HeadlessBackend>,
        ring: FrameResourceRing<HeadlessBackend>,
    }
    impl Fixture {
        fn new(backend: HeadlessBackend, config: &ReclaimConfig) -> Self {
            let clock = FrameClock::new(&backend, config.frames_in_flight, config.safety_margin);
            let ring = FrameResourceRing::new(&backend, config, clock.current_frame());
            Self { backend, clock, ring }
        }

        fn end_frame(&mut self) -> Result<(), ReclaimError> {
            let frame = self.clock.advance(&self.backend);
            self.ring.try_advance(&self.clock, frame)
        }

        fn teardown(mut self) {
            self.clock.wait_idle(&self.backend);
            self.ring.destroy(&self.backend);
            self.clock.destroy(&self.backend);
            assert_eq!(self.backend.live_buffer_count(), 0);
        }
    }

    #[test]
    fn test_in_flight_frames_never_alias() {
        let mut fx = Fixture::new(HeadlessBackend::new(), &config(3));

        let mut frames = Vec::new();
        for _ in 0..3 {
            let frame = fx.clock.current_frame();
            let scratch = fx.ring.alloc_scratch(512, 0);
            let descriptors = fx.ring.alloc_transient_descriptors(8);
            frames.push((frame, scratch, descriptors));
            fx.end_frame().unwrap();
        }

        for (i, (_, a, da)) in frames.iter().enumerate() {
            for (_, b, db) in frames.iter().skip(i + 1) {
                let a_range = a.gpu_address..a.gpu_address + a.size;
                assert!(!a_range.contains(&b.gpu_address) && !a_range.contains(&(b.gpu_address + b.size - 1)));
                assert_ne!(a.cpu_ptr, b.cpu_ptr);
                assert!(da.abs_diff(*db) >= 8);
            }
        }

        // 第 4 帧复用第 1 帧的 slot，并且从头开始
        let (first_frame, first_scratch, first_descriptors) = frames[0];
        assert_eq!(fx.clock.current_frame(), first_frame + 3);
        let reused = fx.ring.alloc_scratch(16, 0);
        assert_eq!(reused.gpu_address, first_scratch.gpu_address);
        assert_eq!(reused.offset, 0);
        assert_eq!(fx.ring.alloc_transient_descriptors(1), first_descriptors);
        fx.teardown();
    }

    #[test]
    fn test_scratch_alignment_and_exhaustion() {
        let mut fx = Fixture::new(HeadlessBackend::new(), &config(2));
        let a = fx.ring.alloc_scratch(10, 0);
        let b = fx.ring.alloc_scratch(10, 16);
        let c = fx.ring.alloc_scratch(10, 0);
        assert_eq!((a.offset, b.offset, c.offset), (0, 16, 256));
        assert_eq!(c.gpu_address % 256, 0);

        assert_eq!(
            fx.ring.try_alloc_scratch(1024, 0),
            Err(ReclaimError::ScratchExhausted {
                requested: 1024,
                offset: 266,
                budget: 1024,
            })
        );
        assert_eq!(fx.ring.try_alloc_scratch(0, 0), Err(ReclaimError::ZeroSizeAllocation));

        // 下一帧的 slot 是空的
        fx.end_frame().unwrap();
        assert_eq!(fx.ring.scratch_remaining(), 1024);
        fx.teardown();
    }

    #[test]
    #[should_panic(expected = "frame scratch exhausted")]
    fn test_scratch_exhaustion_is_fatal() {
        let mut fx = Fixture::new(HeadlessBackend::new(), &config(2));
        fx.ring.alloc_scratch(1000, 0);
        fx.ring.alloc_scratch(100, 0);
    }

    #[test]
    fn test_write_scratch_copies_bytes() {
        let mut fx = Fixture::new(HeadlessBackend::new(), &config(2));
        fx.ring.alloc_scratch(4, 0);
        let alloc = fx.ring.write_scratch_pod(&fx.backend, &[1.0f32, 2.0, 3.0]);
        assert_eq!(alloc.offset, 256);
        assert_eq!(alloc.size, 12);

        let contents = fx.ring.current().buffer().contents();
        assert_eq!(&contents[256..268], bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0]));
        fx.teardown();
    }

    #[test]
    fn test_empty_write_scratch_consumes_nothing() {
        let mut fx = Fixture::new(HeadlessBackend::new(), &config(2));
        fx.ring.alloc_scratch(10, 0);
        let empty = fx.ring.write_scratch(&fx.backend, &[], 0);
        assert_eq!((empty.offset, empty.size), (10, 0));
        assert_eq!(fx.ring.current().scratch_offset(), 10);

        // scratch 用完之后也不会失败
        fx.ring.alloc_scratch(1014, 1);
        let empty = fx.ring.write_scratch_pod::<u32>(&fx.backend, &[]);
        assert_eq!((empty.offset, empty.size), (1024, 0));
        assert_eq!(fx.ring.scratch_remaining(), 0);
        fx.teardown();
    }

    #[test]
    fn test_transient_descriptors_reset_each_frame() {
        let mut fx = Fixture::new(HeadlessBackend::new(), &config(2));
        let base = fx.ring.current().descriptor_base();
        assert_eq!(fx.ring.alloc_transient_descriptors(3), base);
        assert_eq!(fx.ring.alloc_transient_descriptors(5), base + 3);
        assert_eq!(
            fx.ring.try_alloc_transient_descriptors(1),
            Err(ReclaimError::TransientDescriptorsExhausted {
                requested: 1,
                cursor: 8,
                budget: 8,
            })
        );
        let address = fx.ring.transient_descriptor_address(base + 3);
        assert!(address.gpu.is_some());

        fx.end_frame().unwrap();
        fx.end_frame().unwrap();
        assert_eq!(fx.ring.current().descriptor_cursor(), 0);
        assert_eq!(fx.ring.alloc_transient_descriptors(8), base);
        fx.teardown();
    }

    #[test]
    fn test_slot_reuse_requires_completed_frame() {
        let mut fx = Fixture::new(
            HeadlessBackend::with_timeline_mode(HeadlessTimelineMode::Manual),
            &config(2),
        );
        // 第 2 帧的 slot 从未使用过
        fx.end_frame().unwrap();
        // 第 3 帧复用第 1 帧的 slot，GPU 还没有完成第 1 帧
        assert_eq!(
            fx.end_frame(),
            Err(ReclaimError::RingSlotInFlight {
                frame: 3,
                previous: 1,
                completed: 0,
            })
        );

        fx.backend.complete_fence(fx.clock.fence(), 1);
        fx.clock.poll(&fx.backend);
        fx.ring.advance(&fx.clock, 3);
        assert_eq!(fx.ring.current().frame_index(), 3);
        fx.teardown();
    }
}
