use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;

use crate::backend::GfxBackend;
use crate::descriptors::heap::{GfxDescriptorHeapInfo, SlotKind};
use crate::error::{GfxError, GfxResult};
use crate::headless::command::{HeadlessCommand, HeadlessCommandBuffer};
use crate::headless::memory::{HostMemory, HostSpan};
use crate::headless::resources::{HeadlessBuffer, HeadlessDescriptorHeap, HeadlessFence, HeadlessImage};
use crate::resources::buffer::GfxBufferDesc;
use crate::resources::image::GfxImageDesc;
use crate::resources::state::ResourceState;
use crate::sampler::GfxSamplerDesc;

/// 模拟的 GPU 何时完成 signal 过的 fence 值
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadlessTimelineMode {
    /// signal 之后立刻完成
    Immediate,
    /// 完成值总是落后最新的 signal 值 n
    Lagging(u64),
    /// 只有 [`HeadlessBackend::complete_fence`] 或者 `wait_fence` 才会推进完成值
    Manual,
}

const DEFAULT_BUFFER_ALIGNMENT: u64 = 256;
const DEVICE_ADDRESS_BASE: u64 = 0x1_0000_0000;

pub struct HeadlessBackend {
    timeline_mode: HeadlessTimelineMode,
    /// 超出预算的分配返回 OutOfDeviceMemory
    memory_budget: Option<u64>,

    next_id: Cell<u64>,
    next_device_address: Cell<u64>,
    allocated_bytes: Cell<u64>,
    device_lost: Cell<bool>,

    buffers: RefCell<HashMap<u64, HostSpan>>,
    images: RefCell<HashSet<u64>>,
    live_command_buffers: Cell<usize>,
    live_descriptor_heaps: Cell<usize>,

    destroyed_buffers: RefCell<Vec<u64>>,
    destroyed_images: RefCell<Vec<u64>>,
    sampler_writes: Cell<usize>,
}
impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessBackend {
    #[inline]
    pub fn new() -> Self {
        Self::with_timeline_mode(HeadlessTimelineMode::Immediate)
    }

    pub fn with_timeline_mode(timeline_mode: HeadlessTimelineMode) -> Self {
        log::info!("headless backend created, timeline mode: {:?}", timeline_mode);
        Self {
            timeline_mode,
            memory_budget: None,
            next_id: Cell::new(1),
            next_device_address: Cell::new(DEVICE_ADDRESS_BASE),
            allocated_bytes: Cell::new(0),
            device_lost: Cell::new(false),
            buffers: RefCell::new(HashMap::new()),
            images: RefCell::new(HashSet::new()),
            live_command_buffers: Cell::new(0),
            live_descriptor_heaps: Cell::new(0),
            destroyed_buffers: RefCell::new(Vec::new()),
            destroyed_images: RefCell::new(Vec::new()),
            sampler_writes: Cell::new(0),
        }
    }

    /// builder
    #[inline]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }
}
// 测试控制
impl HeadlessBackend {
    /// 让模拟的 GPU 完成 fence 上 `value` 之前的所有工作
    pub fn complete_fence(&self, fence: &HeadlessFence, value: u64) {
        let value = value.min(fence.signaled.get());
        if value > fence.completed.get() {
            fence.completed.set(value);
        }
    }

    /// 之后所有的 fence 操作都会返回 DeviceLost
    pub fn lose_device(&self) {
        log::warn!("headless device marked as lost");
        self.device_lost.set(true);
    }
}
// getters
impl HeadlessBackend {
    #[inline]
    pub fn timeline_mode(&self) -> HeadlessTimelineMode {
        self.timeline_mode
    }
    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.borrow().len()
    }
    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.images.borrow().len()
    }
    #[inline]
    pub fn live_command_buffer_count(&self) -> usize {
        self.live_command_buffers.get()
    }
    #[inline]
    pub fn live_descriptor_heap_count(&self) -> usize {
        self.live_descriptor_heaps.get()
    }
    #[inline]
    pub fn is_buffer_alive(&self, id: u64) -> bool {
        self.buffers.borrow().contains_key(&id)
    }
    #[inline]
    pub fn is_image_alive(&self, id: u64) -> bool {
        self.images.borrow().contains(&id)
    }
    /// 按销毁顺序排列的 buffer id
    #[inline]
    pub fn destroyed_buffers(&self) -> Vec<u64> {
        self.destroyed_buffers.borrow().clone()
    }
    #[inline]
    pub fn destroyed_images(&self) -> Vec<u64> {
        self.destroyed_images.borrow().clone()
    }
    #[inline]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.get()
    }
    /// 原生 sampler 描述符的写入次数
    #[inline]
    pub fn sampler_writes(&self) -> usize {
        self.sampler_writes.get()
    }
}
// tools
impl HeadlessBackend {
    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn alloc_device_address(&self, size: u64, alignment: u64) -> u64 {
        let alignment = alignment.max(1);
        let address = self.next_device_address.get().div_ceil(alignment) * alignment;
        self.next_device_address.set(address + size.max(1));
        address
    }

    fn reserve_memory(&self, size: u64) -> GfxResult<()> {
        let allocated = self.allocated_bytes.get();
        if let Some(budget) = self.memory_budget {
            if allocated + size > budget {
                return Err(GfxError::OutOfDeviceMemory);
            }
        }
        self.allocated_bytes.set(allocated + size);
        Ok(())
    }

    fn check_device(&self) -> GfxResult<()> {
        if self.device_lost.get() { Err(GfxError::DeviceLost) } else { Ok(()) }
    }

    fn execute(&self, cmd: &HeadlessCommandBuffer) {
        let buffers = self.buffers.borrow();
        let images = self.images.borrow();
        let buffer_span = |id: u64| {
            buffers.get(&id).copied().unwrap_or_else(|| {
                log::error!("command buffer {} references destroyed buffer {}", cmd.name, id);
                panic!("headless: submitted command references destroyed buffer {id}");
            })
        };
        let check_image = |id: u64| {
            if !images.contains(&id) {
                log::error!("command buffer {} references destroyed image {}", cmd.name, id);
                panic!("headless: submitted command references destroyed image {id}");
            }
        };

        for command in cmd.commands.borrow().iter() {
            match *command {
                HeadlessCommand::BufferTransition { buffer, .. } => {
                    buffer_span(buffer);
                }
                HeadlessCommand::ImageTransition { image, .. } => check_image(image),
                HeadlessCommand::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let copied = buffer_span(src).copy_to(src_offset, buffer_span(dst), dst_offset, size);
                    assert!(copied, "headless: copy of {size} bytes out of range");
                }
                HeadlessCommand::CopyBufferToImage {
                    src,
                    src_offset,
                    image,
                    size,
                } => {
                    let src_len = buffer_span(src).len as u64;
                    check_image(image);
                    assert!(
                        src_offset.checked_add(size).is_some_and(|end| end <= src_len),
                        "headless: image copy reads {size} bytes at offset {src_offset} from a buffer of {src_len} bytes"
                    );
                }
            }
        }
    }
}

impl GfxBackend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Image = HeadlessImage;
    type CommandBuffer = HeadlessCommandBuffer;
    type DescriptorHeap = HeadlessDescriptorHeap;
    type Fence = HeadlessFence;

    fn create_buffer(&self, desc: &GfxBufferDesc, debug_name: &str) -> GfxResult<Self::Buffer> {
        self.reserve_memory(desc.size)?;
        let id = self.alloc_id();
        let memory = HostMemory::zeroed(desc.size as usize);
        self.buffers.borrow_mut().insert(id, memory.span());
        let device_address = self.alloc_device_address(desc.size, desc.alignment.unwrap_or(DEFAULT_BUFFER_ALIGNMENT));
        log::trace!("headless buffer #{} created: {} ({} bytes)", id, debug_name, desc.size);

        Ok(HeadlessBuffer {
            id,
            desc: *desc,
            memory,
            device_address,
        })
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        self.buffers.borrow_mut().remove(&buffer.id);
        self.destroyed_buffers.borrow_mut().push(buffer.id);
        self.allocated_bytes.set(self.allocated_bytes.get() - buffer.desc.size);
        buffer.memory.free();
    }

    #[inline]
    fn buffer_mapped_ptr(&self, buffer: &Self::Buffer) -> Option<NonNull<u8>> {
        buffer.mapped_ptr()
    }

    #[inline]
    fn buffer_device_address(&self, buffer: &Self::Buffer) -> u64 {
        buffer.device_address
    }

    #[inline]
    fn buffer_size(&self, buffer: &Self::Buffer) -> u64 {
        buffer.desc.size
    }

    fn flush_buffer(&self, buffer: &Self::Buffer, offset: u64, size: u64) -> GfxResult<()> {
        debug_assert!(offset + size <= buffer.desc.size);
        self.check_device()
    }

    fn create_image(&self, desc: &GfxImageDesc, debug_name: &str) -> GfxResult<Self::Image> {
        self.reserve_memory(desc.total_bytes())?;
        let id = self.alloc_id();
        self.images.borrow_mut().insert(id);
        log::trace!("headless image #{} created: {} ({}x{})", id, debug_name, desc.width, desc.height);
        Ok(HeadlessImage { id, desc: *desc })
    }

    fn destroy_image(&self, image: Self::Image) {
        self.images.borrow_mut().remove(&image.id);
        self.destroyed_images.borrow_mut().push(image.id);
        self.allocated_bytes.set(self.allocated_bytes.get() - image.desc.total_bytes());
    }

    fn allocate_command_buffer(&self, debug_name: &str) -> GfxResult<Self::CommandBuffer> {
        self.live_command_buffers.set(self.live_command_buffers.get() + 1);
        Ok(HeadlessCommandBuffer::new(self.alloc_id(), debug_name))
    }

    fn free_command_buffer(&self, cmd: Self::CommandBuffer) {
        self.live_command_buffers.set(self.live_command_buffers.get() - 1);
        drop(cmd);
    }

    fn begin_command_buffer(&self, cmd: &Self::CommandBuffer) -> GfxResult<()> {
        cmd.commands.borrow_mut().clear();
        cmd.recording.set(true);
        Ok(())
    }

    fn end_command_buffer(&self, cmd: &Self::CommandBuffer) -> GfxResult<()> {
        cmd.recording.set(false);
        Ok(())
    }

    fn submit(&self, cmds: &[&Self::CommandBuffer]) -> GfxResult<()> {
        self.check_device()?;
        for cmd in cmds {
            if cmd.is_recording() {
                log::error!("command buffer {} submitted while recording", cmd.name);
                panic!("headless: command buffer {} submitted while recording", cmd.name);
            }
            self.execute(cmd);
            cmd.submit_count.set(cmd.submit_count.get() + 1);
        }
        Ok(())
    }

    fn cmd_buffer_transition(
        &self,
        cmd: &Self::CommandBuffer,
        buffer: &Self::Buffer,
        from: ResourceState,
        to: ResourceState,
    ) {
        cmd.record(HeadlessCommand::BufferTransition {
            buffer: buffer.id,
            from,
            to,
        });
    }

    fn cmd_image_transition(&self, cmd: &Self::CommandBuffer, image: &Self::Image, from: ResourceState, to: ResourceState) {
        cmd.record(HeadlessCommand::ImageTransition {
            image: image.id,
            from,
            to,
        });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: &Self::CommandBuffer,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        cmd.record(HeadlessCommand::CopyBuffer {
            src: src.id,
            src_offset,
            dst: dst.id,
            dst_offset,
            size,
        });
    }

    fn cmd_copy_buffer_to_image(&self, cmd: &Self::CommandBuffer, src: &Self::Buffer, src_offset: u64, dst: &Self::Image) {
        cmd.record(HeadlessCommand::CopyBufferToImage {
            src: src.id,
            src_offset,
            image: dst.id,
            size: dst.desc.base_level_bytes(),
        });
    }

    fn create_descriptor_heap(
        &self,
        kind: SlotKind,
        num_descriptors: u32,
        debug_name: &str,
    ) -> GfxResult<Self::DescriptorHeap> {
        let descriptor_size = match kind {
            SlotKind::RenderTargetView | SlotKind::DepthStencilView => 8,
            SlotKind::ShaderResourceView => 32,
            SlotKind::Sampler => 16,
        };
        let bytes = descriptor_size * num_descriptors as u64;
        let memory = HostMemory::zeroed(bytes as usize);
        let gpu_base = kind.is_shader_visible().then(|| self.alloc_device_address(bytes, 64));
        let info = GfxDescriptorHeapInfo {
            cpu_base: memory.span().ptr.as_ptr() as usize,
            gpu_base,
            descriptor_size,
            num_descriptors,
        };
        self.live_descriptor_heaps.set(self.live_descriptor_heaps.get() + 1);
        log::debug!("headless descriptor heap {} created: {} x {:?}", debug_name, num_descriptors, kind);

        Ok(HeadlessDescriptorHeap {
            id: self.alloc_id(),
            kind,
            memory,
            info,
            samplers: RefCell::new(vec![None; num_descriptors as usize]),
        })
    }

    #[inline]
    fn descriptor_heap_info(&self, heap: &Self::DescriptorHeap) -> GfxDescriptorHeapInfo {
        heap.info
    }

    fn destroy_descriptor_heap(&self, heap: Self::DescriptorHeap) {
        self.live_descriptor_heaps.set(self.live_descriptor_heaps.get() - 1);
        heap.memory.free();
    }

    fn write_sampler_descriptor(
        &self,
        heap: &Self::DescriptorHeap,
        descriptor_index: u32,
        desc: &GfxSamplerDesc,
    ) -> GfxResult<()> {
        self.check_device()?;
        if heap.kind != SlotKind::Sampler {
            return Err(GfxError::Unsupported(format!("sampler descriptor in a {:?} heap", heap.kind)));
        }
        if descriptor_index >= heap.info.num_descriptors {
            return Err(GfxError::InvalidDescriptorIndex {
                index: descriptor_index,
                count: heap.info.num_descriptors,
            });
        }

        let bytes = desc.to_bytes();
        let dst = heap.info.cpu_address(descriptor_index) as *mut u8;
        // SAFETY: descriptor_size(16) >= 编码长度，且 index 已经检查过范围
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        heap.samplers.borrow_mut()[descriptor_index as usize] = Some(*desc);
        self.sampler_writes.set(self.sampler_writes.get() + 1);
        Ok(())
    }

    fn create_fence(&self, initial_value: u64, debug_name: &str) -> GfxResult<Self::Fence> {
        log::debug!("headless fence {} created at {}", debug_name, initial_value);
        Ok(HeadlessFence {
            id: self.alloc_id(),
            signaled: Cell::new(initial_value),
            completed: Cell::new(initial_value),
        })
    }

    fn destroy_fence(&self, fence: Self::Fence) {
        log::debug!("headless fence #{} destroyed at {}", fence.id, fence.completed.get());
    }

    fn signal_fence(&self, fence: &Self::Fence, value: u64) -> GfxResult<()> {
        self.check_device()?;
        debug_assert!(value >= fence.signaled.get(), "timeline value must not decrease");
        fence.signaled.set(value);
        match self.timeline_mode {
            HeadlessTimelineMode::Immediate => fence.completed.set(value),
            HeadlessTimelineMode::Lagging(lag) => self.complete_fence(fence, value.saturating_sub(lag)),
            HeadlessTimelineMode::Manual => {}
        }
        Ok(())
    }

    fn fence_completed_value(&self, fence: &Self::Fence) -> GfxResult<u64> {
        self.check_device()?;
        Ok(fence.completed.get())
    }

    fn wait_fence(&self, fence: &Self::Fence, value: u64) -> GfxResult<()> {
        self.check_device()?;
        if value > fence.signaled.get() {
            return Err(GfxError::NeverSignaled {
                value,
                signaled: fence.signaled.get(),
            });
        }
        // CPU 阻塞期间，模拟的 GPU 把工作做完
        self.complete_fence(fence, value);
        Ok(())
    }
}
