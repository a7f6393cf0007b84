use std::ptr::NonNull;

use crate::descriptors::heap::{GfxDescriptorHeapInfo, SlotKind};
use crate::error::GfxResult;
use crate::resources::buffer::GfxBufferDesc;
use crate::resources::image::GfxImageDesc;
use crate::resources::state::ResourceState;
use crate::sampler::GfxSamplerDesc;

/// 资源生命周期子系统和原生图形 API 之间的边界
///
/// # 约定
/// - 所有的创建和销毁都是非阻塞的；唯一会阻塞的调用是 [`GfxBackend::wait_fence`]
/// - 销毁资源之前，调用方需要保证 GPU 已经不再使用它（由上层的 retire queue 保证）
/// - 单线程使用，所有方法都只需要 `&self`
/// - fence 是单调递增的 64 位 timeline：`signal_fence(v)` 之后，GPU 完成之前提交的所有工作时，完成值达到 `v`
pub trait GfxBackend {
    type Buffer;
    type Image;
    type CommandBuffer;
    type DescriptorHeap;
    type Fence;

    // buffer
    fn create_buffer(&self, desc: &GfxBufferDesc, debug_name: &str) -> GfxResult<Self::Buffer>;
    fn destroy_buffer(&self, buffer: Self::Buffer);
    /// upload buffer 在整个生命周期内保持 map；device buffer 返回 `None`
    fn buffer_mapped_ptr(&self, buffer: &Self::Buffer) -> Option<NonNull<u8>>;
    fn buffer_device_address(&self, buffer: &Self::Buffer) -> u64;
    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;
    /// CPU 写入 mapped 内存之后调用，保证 GPU 可见
    fn flush_buffer(&self, buffer: &Self::Buffer, offset: u64, size: u64) -> GfxResult<()>;

    // image
    fn create_image(&self, desc: &GfxImageDesc, debug_name: &str) -> GfxResult<Self::Image>;
    fn destroy_image(&self, image: Self::Image);

    // command buffer
    fn allocate_command_buffer(&self, debug_name: &str) -> GfxResult<Self::CommandBuffer>;
    fn free_command_buffer(&self, cmd: Self::CommandBuffer);
    fn begin_command_buffer(&self, cmd: &Self::CommandBuffer) -> GfxResult<()>;
    fn end_command_buffer(&self, cmd: &Self::CommandBuffer) -> GfxResult<()>;
    /// 按顺序提交到 queue，不 signal 任何 fence
    fn submit(&self, cmds: &[&Self::CommandBuffer]) -> GfxResult<()>;

    // 命令录制
    fn cmd_buffer_transition(
        &self,
        cmd: &Self::CommandBuffer,
        buffer: &Self::Buffer,
        from: ResourceState,
        to: ResourceState,
    );
    fn cmd_image_transition(&self, cmd: &Self::CommandBuffer, image: &Self::Image, from: ResourceState, to: ResourceState);
    fn cmd_copy_buffer(
        &self,
        cmd: &Self::CommandBuffer,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Buffer,
        dst_offset: u64,
        size: u64,
    );
    /// 将 `src` 的内容整体 copy 到 image 的第 0 层 mip，image 需要处于 `CopyDst`
    fn cmd_copy_buffer_to_image(&self, cmd: &Self::CommandBuffer, src: &Self::Buffer, src_offset: u64, dst: &Self::Image);

    // descriptor heap
    fn create_descriptor_heap(
        &self,
        kind: SlotKind,
        num_descriptors: u32,
        debug_name: &str,
    ) -> GfxResult<Self::DescriptorHeap>;
    fn descriptor_heap_info(&self, heap: &Self::DescriptorHeap) -> GfxDescriptorHeapInfo;
    fn destroy_descriptor_heap(&self, heap: Self::DescriptorHeap);
    /// 在 `descriptor_index` 处写入一个原生 sampler 描述符，heap 必须是 [`SlotKind::Sampler`]
    fn write_sampler_descriptor(
        &self,
        heap: &Self::DescriptorHeap,
        descriptor_index: u32,
        desc: &GfxSamplerDesc,
    ) -> GfxResult<()>;

    // timeline fence
    fn create_fence(&self, initial_value: u64, debug_name: &str) -> GfxResult<Self::Fence>;
    fn destroy_fence(&self, fence: Self::Fence);
    /// 在 queue 上追加一个 signal，非阻塞
    fn signal_fence(&self, fence: &Self::Fence, value: u64) -> GfxResult<()>;
    /// GPU 已经完成的值，非阻塞
    fn fence_completed_value(&self, fence: &Self::Fence) -> GfxResult<u64>;
    /// 阻塞等待，直到完成值 >= `value`，没有超时
    fn wait_fence(&self, fence: &Self::Fence, value: u64) -> GfxResult<()>;
}
