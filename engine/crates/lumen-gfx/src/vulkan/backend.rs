use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use ash::vk;
use itertools::Itertools;

use crate::backend::GfxBackend;
use crate::descriptors::heap::{GfxDescriptorHeapInfo, SlotKind};
use crate::error::GfxResult;
use crate::resources::buffer::GfxBufferDesc;
use crate::resources::image::GfxImageDesc;
use crate::resources::state::ResourceState;
use crate::sampler::GfxSamplerDesc;
use crate::vulkan::barrier;
use crate::vulkan::buffer::VulkanBuffer;
use crate::vulkan::command_buffer::VulkanCommandBuffer;
use crate::vulkan::descriptor_heap::VulkanDescriptorHeap;
use crate::vulkan::fence::VulkanFence;
use crate::vulkan::image::VulkanImage;

/// 外部创建好的 Vulkan 对象
///
/// device 需要开启：Vulkan 1.3（synchronization2、timelineSemaphore、bufferDeviceAddress）以及
/// `VK_EXT_descriptor_buffer`。
pub struct VulkanBackendCreateInfo<'a> {
    pub instance: &'a ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: &'a ash::Device,
    pub queue_family_index: u32,
    pub queue_index: u32,
    /// 是否通过 `VK_EXT_debug_utils` 给对象命名
    pub debug_names: bool,
}

/// 描述符在 descriptor buffer 中的大小
#[derive(Copy, Clone, Debug)]
pub(crate) struct DescriptorSizes {
    pub sampler: u64,
    /// SRV 堆中的一个位置需要能放下任意一种资源描述符
    pub resource: u64,
    pub offset_alignment: u64,
}

pub struct VulkanBackend {
    pub(crate) device: ash::Device,
    pub(crate) descriptor_buffer: ash::ext::descriptor_buffer::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,

    queue: vk::Queue,
    queue_family_index: u32,
    command_pool: vk::CommandPool,

    allocator: ManuallyDrop<vk_mem::Allocator>,
    descriptor_sizes: DescriptorSizes,

    destroyed: bool,
}
// new & init
impl VulkanBackend {
    pub fn new(info: &VulkanBackendCreateInfo) -> GfxResult<Self> {
        let device = info.device.clone();
        let queue = unsafe { device.get_device_queue(info.queue_family_index, info.queue_index) };

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(info.instance, info.device, info.physical_device);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci)? };

        let command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(info.queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )?
        };

        let descriptor_sizes = Self::query_descriptor_sizes(info.instance, info.physical_device);
        log::info!(
            "vulkan backend created: queue family {}, descriptor sizes {:?}",
            info.queue_family_index,
            descriptor_sizes
        );

        Ok(Self {
            descriptor_buffer: ash::ext::descriptor_buffer::Device::new(info.instance, &device),
            debug_utils: info.debug_names.then(|| ash::ext::debug_utils::Device::new(info.instance, &device)),
            device,
            queue,
            queue_family_index: info.queue_family_index,
            command_pool,
            allocator: ManuallyDrop::new(allocator),
            descriptor_sizes,
            destroyed: false,
        })
    }

    fn query_descriptor_sizes(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> DescriptorSizes {
        let mut db_props = vk::PhysicalDeviceDescriptorBufferPropertiesEXT::default();
        {
            let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut db_props);
            unsafe { instance.get_physical_device_properties2(physical_device, &mut props2) };
        }

        let resource = [
            db_props.sampled_image_descriptor_size,
            db_props.storage_image_descriptor_size,
            db_props.uniform_buffer_descriptor_size,
            db_props.storage_buffer_descriptor_size,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        DescriptorSizes {
            sampler: db_props.sampler_descriptor_size as u64,
            resource: resource as u64,
            offset_alignment: db_props.descriptor_buffer_offset_alignment.max(1),
        }
    }
}
// destroy
impl VulkanBackend {
    /// 调用前需要保证 GPU 空闲，并且所有通过本 backend 创建的对象都已经销毁
    pub fn destroy(mut self) {
        self.destroy_mut();
    }

    pub fn destroy_mut(&mut self) {
        if self.destroyed {
            return;
        }
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            ManuallyDrop::drop(&mut self.allocator);
        }
        self.destroyed = true;
        log::info!("vulkan backend destroyed");
    }
}
impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.destroyed, "VulkanBackend dropped without destroy()");
        }
    }
}
// getters
impl VulkanBackend {
    #[inline]
    pub fn vk_device(&self) -> &ash::Device {
        &self.device
    }
    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
    #[inline]
    pub(crate) fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }
    #[inline]
    pub(crate) fn descriptor_sizes(&self) -> DescriptorSizes {
        self.descriptor_sizes
    }
}
// tools
impl VulkanBackend {
    pub(crate) fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {}", name, e);
        }
    }
}

impl GfxBackend for VulkanBackend {
    type Buffer = VulkanBuffer;
    type Image = VulkanImage;
    type CommandBuffer = VulkanCommandBuffer;
    type DescriptorHeap = VulkanDescriptorHeap;
    type Fence = VulkanFence;

    #[inline]
    fn create_buffer(&self, desc: &GfxBufferDesc, debug_name: &str) -> GfxResult<Self::Buffer> {
        VulkanBuffer::new(self, desc, vk::BufferUsageFlags::empty(), debug_name)
    }

    #[inline]
    fn destroy_buffer(&self, buffer: Self::Buffer) {
        buffer.destroy(self)
    }

    #[inline]
    fn buffer_mapped_ptr(&self, buffer: &Self::Buffer) -> Option<NonNull<u8>> {
        buffer.mapped_ptr()
    }

    #[inline]
    fn buffer_device_address(&self, buffer: &Self::Buffer) -> u64 {
        buffer.device_address()
    }

    #[inline]
    fn buffer_size(&self, buffer: &Self::Buffer) -> u64 {
        buffer.size()
    }

    #[inline]
    fn flush_buffer(&self, buffer: &Self::Buffer, offset: u64, size: u64) -> GfxResult<()> {
        buffer.flush(self, offset, size)
    }

    #[inline]
    fn create_image(&self, desc: &GfxImageDesc, debug_name: &str) -> GfxResult<Self::Image> {
        VulkanImage::new(self, desc, debug_name)
    }

    #[inline]
    fn destroy_image(&self, image: Self::Image) {
        image.destroy(self)
    }

    fn allocate_command_buffer(&self, debug_name: &str) -> GfxResult<Self::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = unsafe { self.device.allocate_command_buffers(&info)?[0] };
        self.set_debug_name(handle, debug_name);
        Ok(VulkanCommandBuffer {
            handle,
            #[cfg(debug_assertions)]
            name: debug_name.to_string(),
        })
    }

    fn free_command_buffer(&self, cmd: Self::CommandBuffer) {
        unsafe { self.device.free_command_buffers(self.command_pool, std::slice::from_ref(&cmd.handle)) };
    }

    fn begin_command_buffer(&self, cmd: &Self::CommandBuffer) -> GfxResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd.handle, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: &Self::CommandBuffer) -> GfxResult<()> {
        unsafe { self.device.end_command_buffer(cmd.handle)? };
        Ok(())
    }

    fn submit(&self, cmds: &[&Self::CommandBuffer]) -> GfxResult<()> {
        let cmd_infos = cmds
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd.handle))
            .collect_vec();
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
        unsafe {
            self.device.queue_submit2(self.queue, std::slice::from_ref(&submit_info), vk::Fence::null())?;
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
        let barrier = barrier::buffer_barrier(buffer.vk_buffer(), from, to);
        let dependency_info = vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(cmd.handle, &dependency_info) };
    }

    fn cmd_image_transition(&self, cmd: &Self::CommandBuffer, image: &Self::Image, from: ResourceState, to: ResourceState) {
        let barrier = barrier::image_barrier(image.vk_image(), image.full_range(), from, to);
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(cmd.handle, &dependency_info) };
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
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(cmd.handle, src.vk_buffer(), dst.vk_buffer(), std::slice::from_ref(&region));
        }
    }

    fn cmd_copy_buffer_to_image(&self, cmd: &Self::CommandBuffer, src: &Self::Buffer, src_offset: u64, dst: &Self::Image) {
        let desc = dst.desc();
        let region = vk::BufferImageCopy::default()
            .buffer_offset(src_offset)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: dst.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd.handle,
                src.vk_buffer(),
                dst.vk_image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }
    }

    #[inline]
    fn create_descriptor_heap(
        &self,
        kind: SlotKind,
        num_descriptors: u32,
        debug_name: &str,
    ) -> GfxResult<Self::DescriptorHeap> {
        VulkanDescriptorHeap::new(self, kind, num_descriptors, debug_name)
    }

    #[inline]
    fn descriptor_heap_info(&self, heap: &Self::DescriptorHeap) -> GfxDescriptorHeapInfo {
        heap.info()
    }

    #[inline]
    fn destroy_descriptor_heap(&self, heap: Self::DescriptorHeap) {
        heap.destroy(self)
    }

    #[inline]
    fn write_sampler_descriptor(
        &self,
        heap: &Self::DescriptorHeap,
        descriptor_index: u32,
        desc: &GfxSamplerDesc,
    ) -> GfxResult<()> {
        heap.write_sampler(self, descriptor_index, desc)
    }

    fn create_fence(&self, initial_value: u64, debug_name: &str) -> GfxResult<Self::Fence> {
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore = unsafe { self.device.create_semaphore(&timeline_semaphore_ci, None)? };
        self.set_debug_name(semaphore, debug_name);
        Ok(VulkanFence { semaphore })
    }

    fn destroy_fence(&self, fence: Self::Fence) {
        unsafe { self.device.destroy_semaphore(fence.semaphore, None) };
    }

    fn signal_fence(&self, fence: &Self::Fence, value: u64) -> GfxResult<()> {
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let submit_info = vk::SubmitInfo2::default().signal_semaphore_infos(std::slice::from_ref(&signal_info));
        unsafe {
            self.device.queue_submit2(self.queue, std::slice::from_ref(&submit_info), vk::Fence::null())?;
        }
        Ok(())
    }

    fn fence_completed_value(&self, fence: &Self::Fence) -> GfxResult<u64> {
        Ok(unsafe { self.device.get_semaphore_counter_value(fence.semaphore)? })
    }

    fn wait_fence(&self, fence: &Self::Fence, value: u64) -> GfxResult<()> {
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(std::slice::from_ref(&fence.semaphore))
            .values(std::slice::from_ref(&value));
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }
}
