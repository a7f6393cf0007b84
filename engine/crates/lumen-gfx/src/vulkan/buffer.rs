use std::ptr::NonNull;

use ash::vk;
use vk_mem::Alloc;

use crate::error::GfxResult;
use crate::resources::buffer::{GfxBufferDesc, GfxMemoryLocation};
use crate::vulkan::backend::VulkanBackend;

/// 默认对齐到 256 字节，满足 uniform / storage buffer 的 offset 要求
const DEFAULT_ALIGNMENT: vk::DeviceSize = 256;

pub struct VulkanBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,
    desc: GfxBufferDesc,

    /// upload buffer 在创建时 map，直到销毁
    mapped_ptr: Option<NonNull<u8>>,
    device_address: vk::DeviceAddress,
}
// new & init
impl VulkanBuffer {
    pub(crate) fn new(
        backend: &VulkanBackend,
        desc: &GfxBufferDesc,
        extra_usage: vk::BufferUsageFlags,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let usage = match desc.location {
            GfxMemoryLocation::Upload => vk::BufferUsageFlags::TRANSFER_SRC,
            GfxMemoryLocation::Device => vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
        } | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | extra_usage;

        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = match desc.location {
            GfxMemoryLocation::Upload => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            GfxMemoryLocation::Device => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
        };

        let allocator = backend.allocator();
        let align = desc.alignment.unwrap_or(DEFAULT_ALIGNMENT);
        let (handle, mut allocation) =
            unsafe { allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, align)? };

        let mapped_ptr = if desc.is_mapped() {
            match unsafe { allocator.map_memory(&mut allocation) } {
                Ok(ptr) => NonNull::new(ptr),
                Err(e) => {
                    unsafe { allocator.destroy_buffer(handle, &mut allocation) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let device_address = unsafe {
            backend.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(handle))
        };

        backend.set_debug_name(handle, &format!("Buffer::{debug_name}"));
        Ok(Self {
            handle,
            allocation,
            desc: *desc,
            mapped_ptr,
            device_address,
        })
    }
}
// destroy
impl VulkanBuffer {
    pub(crate) fn destroy(mut self, backend: &VulkanBackend) {
        let allocator = backend.allocator();
        unsafe {
            if self.mapped_ptr.is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
    }
}
// getters
impl VulkanBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }
    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }
    #[inline]
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped_ptr
    }
}
// tools
impl VulkanBuffer {
    #[inline]
    pub(crate) fn flush(&self, backend: &VulkanBackend, offset: vk::DeviceSize, size: vk::DeviceSize) -> GfxResult<()> {
        backend.allocator().flush_allocation(&self.allocation, offset, size)?;
        Ok(())
    }
}
