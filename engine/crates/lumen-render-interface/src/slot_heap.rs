use itertools::Itertools;
use lumen_gfx::backend::GfxBackend;
use lumen_gfx::descriptors::heap::{GfxDescriptorHeapInfo, SlotKind};

use crate::config::HeapConfig;
use crate::error::{OrFatal, ReclaimError};
use crate::frame_clock::FrameClock;
use crate::retire_queue::RetireQueue;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Allocated,
    /// 已经延迟释放，等待 GPU 完成
    PendingRelease,
    /// 由所有者永久持有，不能释放，例如 sampler 缓存的组
    Pinned,
}

/// 某个描述符的 CPU 地址，以及 shader visible 堆上的 GPU 地址
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotAddress {
    pub cpu: usize,
    pub gpu: Option<u64>,
}

/// 固定容量的描述符 slot 堆
///
/// 每个 slot 包含 `descriptors_per_slot` 个连续的描述符（slot group）。
/// 空闲的 slot 保存在一个栈中，最近释放的 slot 最先被复用。
///
/// slot 的状态转换只有 `Free -> Allocated -> PendingRelease -> Free`，
/// 以及 resize 时的 `Allocated -> Free`（[`SlotHeap::release_slot_immediate`]）。
/// `Allocated -> Pinned` 之后 slot 直到堆销毁都不会再被释放。
pub struct SlotHeap<B: GfxBackend> {
    kind: SlotKind,
    capacity: u32,
    descriptors_per_slot: u32,
    slot_stride: u64,

    free_list: Vec<u32>,
    slot_states: Vec<SlotState>,
    retire_queue: RetireQueue<u32>,

    info: GfxDescriptorHeapInfo,
    heap: Option<B::DescriptorHeap>,
}
// new & init
impl<B: GfxBackend> SlotHeap<B> {
    pub fn new(backend: &B, kind: SlotKind, config: HeapConfig, debug_name: &str) -> Self {
        Self::try_new(backend, kind, config, debug_name).or_fatal()
    }

    pub fn try_new(backend: &B, kind: SlotKind, config: HeapConfig, debug_name: &str) -> Result<Self, ReclaimError> {
        let HeapConfig {
            capacity,
            descriptors_per_slot,
        } = config;
        if capacity == 0 || descriptors_per_slot == 0 {
            return Err(ReclaimError::InvalidConfig(format!(
                "{} heap {} needs a non-zero capacity and slot size",
                kind.short_name(),
                debug_name
            )));
        }
        let num_descriptors = capacity.checked_mul(descriptors_per_slot).ok_or_else(|| {
            ReclaimError::InvalidConfig(format!("{} heap {} is too large", kind.short_name(), debug_name))
        })?;

        let heap = backend.create_descriptor_heap(kind, num_descriptors, debug_name)?;
        let info = backend.descriptor_heap_info(&heap);
        log::info!(
            "{} heap {} created: {} slots x {} descriptors",
            kind.short_name(),
            debug_name,
            capacity,
            descriptors_per_slot
        );

        Ok(Self {
            kind,
            capacity,
            descriptors_per_slot,
            slot_stride: info.descriptor_size * descriptors_per_slot as u64,
            // 栈顶是 0，分配顺序为 0, 1, 2...
            free_list: (0..capacity).rev().collect_vec(),
            slot_states: vec![SlotState::Free; capacity as usize],
            retire_queue: RetireQueue::new(),
            info,
            heap: Some(heap),
        })
    }
}
// destroy
impl<B: GfxBackend> SlotHeap<B> {
    /// 调用前 GPU 必须已经空闲
    pub fn destroy(mut self, backend: &B) {
        self.destroy_mut(backend);
    }

    pub fn destroy_mut(&mut self, backend: &B) {
        if let Some(heap) = self.heap.take() {
            let pending = self.retire_queue.drain_all().count();
            log::info!("{} heap destroyed ({} slots still pending release)", self.kind.short_name(), pending);
            backend.destroy_descriptor_heap(heap);
        }
    }
}
impl<B: GfxBackend> Drop for SlotHeap<B> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.heap.is_none(), "{:?} SlotHeap dropped without destroy()", self.kind);
        }
    }
}
// getters
impl<B: GfxBackend> SlotHeap<B> {
    #[inline]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
    #[inline]
    pub fn descriptors_per_slot(&self) -> u32 {
        self.descriptors_per_slot
    }
    /// 相邻 slot 的字节间隔
    #[inline]
    pub fn slot_stride(&self) -> u64 {
        self.slot_stride
    }
    #[inline]
    pub fn info(&self) -> &GfxDescriptorHeapInfo {
        &self.info
    }
    #[inline]
    pub fn native_heap(&self) -> &B::DescriptorHeap {
        self.heap.as_ref().expect("SlotHeap used after destroy()")
    }
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
    /// 空闲栈的快照，栈顶在最后
    #[inline]
    pub fn free_slots(&self) -> &[u32] {
        &self.free_list
    }
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.retire_queue.len()
    }
    #[inline]
    pub fn slot_state(&self, index: u32) -> Option<SlotState> {
        self.slot_states.get(index as usize).copied()
    }

    /// slot 第一个描述符的 CPU 地址
    #[inline]
    pub fn cpu_address(&self, index: u32) -> usize {
        self.descriptor_address(index, 0).cpu
    }
    /// slot 第一个描述符的 GPU 地址，只有 shader visible 的堆才有
    #[inline]
    pub fn gpu_address(&self, index: u32) -> Option<u64> {
        self.descriptor_address(index, 0).gpu
    }
    /// slot group 中第 `descriptor` 个描述符的地址
    pub fn descriptor_address(&self, index: u32, descriptor: u32) -> SlotAddress {
        self.try_descriptor_address(index, descriptor).or_fatal()
    }

    pub fn try_descriptor_address(&self, index: u32, descriptor: u32) -> Result<SlotAddress, ReclaimError> {
        self.check_range(index)?;
        if descriptor >= self.descriptors_per_slot {
            return Err(self.invalid(index, "descriptor offset outside the slot group"));
        }
        let descriptor_index = self.descriptor_index(index, descriptor);
        Ok(SlotAddress {
            cpu: self.info.cpu_address(descriptor_index),
            gpu: self.info.gpu_address(descriptor_index),
        })
    }

    /// 堆中的扁平描述符下标
    #[inline]
    pub fn descriptor_index(&self, index: u32, descriptor: u32) -> u32 {
        index * self.descriptors_per_slot + descriptor
    }
}
// update
impl<B: GfxBackend> SlotHeap<B> {
    pub fn alloc_slot(&mut self) -> u32 {
        self.try_alloc_slot().or_fatal()
    }

    pub fn try_alloc_slot(&mut self) -> Result<u32, ReclaimError> {
        let index = self.free_list.pop().ok_or(ReclaimError::HeapExhausted {
            kind: self.kind,
            capacity: self.capacity,
        })?;
        debug_assert_eq!(self.slot_states[index as usize], SlotState::Free);
        self.slot_states[index as usize] = SlotState::Allocated;
        Ok(index)
    }

    /// 在 `frame` 帧释放 slot，之后的 `garbage_collect` 会把它放回空闲栈
    pub fn release_slot_deferred(&mut self, index: u32, frame: u64) {
        self.try_release_slot_deferred(index, frame).or_fatal()
    }

    pub fn try_release_slot_deferred(&mut self, index: u32, frame: u64) -> Result<(), ReclaimError> {
        self.expect_allocated(index)?;
        self.retire_queue.try_push(frame, index)?;
        self.slot_states[index as usize] = SlotState::PendingRelease;
        log::debug!("> released {} slot {} at frame {}", self.kind.short_name(), index, frame);
        Ok(())
    }

    /// 立即回收 slot，只能在 GPU 空闲时使用（例如 resize）
    pub fn release_slot_immediate(&mut self, index: u32) {
        self.try_release_slot_immediate(index).or_fatal()
    }

    pub fn try_release_slot_immediate(&mut self, index: u32) -> Result<(), ReclaimError> {
        self.expect_allocated(index)?;
        self.slot_states[index as usize] = SlotState::Free;
        self.free_list.push(index);
        Ok(())
    }

    /// 永久持有一个已经分配的 slot，之后任何释放都会返回错误
    pub fn try_pin_slot(&mut self, index: u32) -> Result<(), ReclaimError> {
        self.expect_allocated(index)?;
        self.slot_states[index as usize] = SlotState::Pinned;
        Ok(())
    }

    /// 把所有可以安全回收的 slot 放回空闲栈，返回回收的数量
    pub fn garbage_collect(&mut self, clock: &FrameClock<B>, frame: u64) -> usize {
        let _span = tracy_client::span!("SlotHeap::garbage_collect");

        let mut freed = 0;
        while let Some(entry) = self.retire_queue.pop_ready(|retired_at| clock.safe_to_free(retired_at)) {
            let state = &mut self.slot_states[entry.payload as usize];
            debug_assert_eq!(*state, SlotState::PendingRelease);
            *state = SlotState::Free;
            self.free_list.push(entry.payload);
            freed += 1;
        }
        if freed > 0 {
            log::debug!("frame {}: {} heap reclaimed {} slots", frame, self.kind.short_name(), freed);
        }
        freed
    }
}
// tools
impl<B: GfxBackend> SlotHeap<B> {
    fn invalid(&self, index: u32, reason: &'static str) -> ReclaimError {
        ReclaimError::InvalidSlot {
            kind: self.kind,
            index,
            reason,
        }
    }

    fn check_range(&self, index: u32) -> Result<(), ReclaimError> {
        if index >= self.capacity { Err(self.invalid(index, "index out of range")) } else { Ok(()) }
    }

    fn expect_allocated(&self, index: u32) -> Result<(), ReclaimError> {
        self.check_range(index)?;
        match self.slot_states[index as usize] {
            SlotState::Allocated => Ok(()),
            SlotState::Free => Err(self.invalid(index, "slot is not allocated")),
            SlotState::PendingRelease => Err(self.invalid(index, "slot released twice")),
            SlotState::Pinned => Err(self.invalid(index, "slot is pinned")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_gfx::headless::{HeadlessBackend, HeadlessTimelineMode};

    fn new_heap(backend: &HeadlessBackend, kind: SlotKind, capacity: u32, descriptors_per_slot: u32) -> SlotHeap<HeadlessBackend> {
        SlotHeap::new(backend, kind, HeapConfig::new(capacity, descriptors_per_slot), "test-heap")
    }

    #[test]
    fn test_alloc_order_and_exhaustion() {
        let backend = HeadlessBackend::new();
        let mut heap = new_heap(&backend, SlotKind::RenderTargetView, 4, 1);
        let slots = (0..4).map(|_| heap.alloc_slot()).collect_vec();
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert_eq!(heap.free_count(), 0);
        assert_eq!(
            heap.try_alloc_slot(),
            Err(ReclaimError::HeapExhausted {
                kind: SlotKind::RenderTargetView,
                capacity: 4,
            })
        );
        heap.destroy(&backend);
    }

    #[test]
    #[should_panic(expected = "heap exhausted")]
    fn test_alloc_past_capacity_is_fatal() {
        let backend = HeadlessBackend::new();
        let mut heap = new_heap(&backend, SlotKind::Sampler, 8, 1);
        for _ in 0..9 {
            heap.alloc_slot();
        }
    }

    #[test]
    fn test_free_list_idempotence() {
        let backend = HeadlessBackend::with_timeline_mode(HeadlessTimelineMode::Manual);
        let mut clock = FrameClock::new(&backend, 2, 1);
        let mut heap = new_heap(&backend, SlotKind::ShaderResourceView, 4, 1);

        let slot = heap.alloc_slot();
        heap.release_slot_deferred(slot, 1);
        assert_eq!(heap.slot_state(slot), Some(SlotState::PendingRelease));
        assert_eq!(heap.free_count(), 3);

        while clock.current_frame() < 6 {
            clock.advance(&backend);
        }
        backend.complete_fence(clock.fence(), 4);
        clock.poll(&backend);
        assert_eq!(heap.garbage_collect(&clock, 6), 1);
        // 再次回收不会把同一个 slot 放回两次
        assert_eq!(heap.garbage_collect(&clock, 6), 0);
        assert_eq!(heap.free_count(), 4);
        assert_eq!(heap.free_slots().iter().filter(|&&s| s == slot).count(), 1);
        assert_eq!(heap.slot_state(slot), Some(SlotState::Free));

        // 最近回收的 slot 最先被复用
        assert_eq!(heap.alloc_slot(), slot);

        clock.wait_idle(&backend);
        heap.destroy(&backend);
        clock.destroy(&backend);
    }

    #[test]
    fn test_slot_not_reused_before_safe_frame() {
        let backend = HeadlessBackend::with_timeline_mode(HeadlessTimelineMode::Manual);
        let mut clock = FrameClock::new(&backend, 2, 1);
        let mut heap = new_heap(&backend, SlotKind::DepthStencilView, 1, 1);

        let slot = heap.alloc_slot();
        heap.release_slot_deferred(slot, 1);
        clock.advance(&backend);
        clock.advance(&backend);
        clock.advance(&backend);
        backend.complete_fence(clock.fence(), 3);
        clock.poll(&backend);
        assert_eq!(heap.garbage_collect(&clock, 4), 0);
        assert!(heap.try_alloc_slot().is_err());

        clock.advance(&backend);
        backend.complete_fence(clock.fence(), 4);
        clock.poll(&backend);
        assert_eq!(heap.garbage_collect(&clock, 5), 1);
        assert_eq!(heap.alloc_slot(), slot);

        clock.wait_idle(&backend);
        heap.destroy(&backend);
        clock.destroy(&backend);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let backend = HeadlessBackend::new();
        let mut heap = new_heap(&backend, SlotKind::ShaderResourceView, 2, 1);

        assert!(matches!(
            heap.try_release_slot_deferred(1, 1),
            Err(ReclaimError::InvalidSlot { index: 1, reason: "slot is not allocated", .. })
        ));
        assert!(matches!(
            heap.try_release_slot_immediate(7),
            Err(ReclaimError::InvalidSlot { index: 7, reason: "index out of range", .. })
        ));

        let slot = heap.alloc_slot();
        heap.release_slot_deferred(slot, 1);
        assert!(matches!(
            heap.try_release_slot_deferred(slot, 1),
            Err(ReclaimError::InvalidSlot { reason: "slot released twice", .. })
        ));
        assert!(heap.try_release_slot_immediate(slot).is_err());
        heap.destroy(&backend);
    }

    #[test]
    fn test_pinned_slot_cannot_be_released() {
        let backend = HeadlessBackend::new();
        let mut heap = new_heap(&backend, SlotKind::Sampler, 2, 1);
        let slot = heap.alloc_slot();
        heap.try_pin_slot(slot).unwrap();
        assert_eq!(heap.slot_state(slot), Some(SlotState::Pinned));

        for result in [heap.try_release_slot_deferred(slot, 1), heap.try_release_slot_immediate(slot)] {
            assert!(matches!(
                result,
                Err(ReclaimError::InvalidSlot { kind: SlotKind::Sampler, reason: "slot is pinned", .. })
            ));
        }
        // 只能 pin 已经分配的 slot
        assert!(heap.try_pin_slot(1).is_err());
        assert_eq!(heap.alloc_slot(), 1);
        heap.destroy(&backend);
    }

    #[test]
    fn test_release_immediate_returns_slot() {
        let backend = HeadlessBackend::new();
        let mut heap = new_heap(&backend, SlotKind::RenderTargetView, 2, 1);
        let a = heap.alloc_slot();
        let b = heap.alloc_slot();
        heap.release_slot_immediate(a);
        heap.release_slot_immediate(b);
        assert_eq!(heap.free_count(), 2);
        assert_eq!(heap.alloc_slot(), b);
        heap.destroy(&backend);
    }

    #[test]
    fn test_slot_group_addressing() {
        let backend = HeadlessBackend::new();
        let heap = new_heap(&backend, SlotKind::ShaderResourceView, 4, 16);
        let stride = heap.slot_stride();
        assert_eq!(stride, heap.info().descriptor_size * 16);

        assert_eq!(heap.cpu_address(2) - heap.cpu_address(0), 2 * stride as usize);
        let base = heap.descriptor_address(1, 0);
        let third = heap.descriptor_address(1, 3);
        assert_eq!(third.cpu - base.cpu, 3 * heap.info().descriptor_size as usize);
        assert_eq!(third.gpu.unwrap() - base.gpu.unwrap(), 3 * heap.info().descriptor_size);
        assert!(heap.try_descriptor_address(1, 16).is_err());
        assert!(heap.try_descriptor_address(4, 0).is_err());
        heap.destroy(&backend);
    }

    #[test]
    fn test_cpu_only_heap_has_no_gpu_address() {
        let backend = HeadlessBackend::new();
        let heap = new_heap(&backend, SlotKind::DepthStencilView, 2, 1);
        assert_eq!(heap.gpu_address(0), None);
        assert_ne!(heap.cpu_address(1), 0);
        heap.destroy(&backend);
    }
}
