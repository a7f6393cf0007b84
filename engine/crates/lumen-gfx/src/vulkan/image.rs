use ash::vk;
use vk_mem::Alloc;

use crate::error::GfxResult;
use crate::resources::image::{GfxImageDesc, GfxTexelFormat};
use crate::vulkan::backend::VulkanBackend;

pub struct VulkanImage {
    handle: vk::Image,
    allocation: vk_mem::Allocation,
    desc: GfxImageDesc,
}
// new & init
impl VulkanImage {
    pub(crate) fn new(backend: &VulkanBackend, desc: &GfxImageDesc, debug_name: &str) -> GfxResult<Self> {
        let attachment_usage = if desc.format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | attachment_usage,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (handle, allocation) = unsafe { backend.allocator().create_image(&image_ci, &alloc_ci)? };
        backend.set_debug_name(handle, &format!("Image::{debug_name}"));
        Ok(Self {
            handle,
            allocation,
            desc: *desc,
        })
    }
}
// destroy
impl VulkanImage {
    pub(crate) fn destroy(mut self, backend: &VulkanBackend) {
        unsafe { backend.allocator().destroy_image(self.handle, &mut self.allocation) };
    }
}
// getters
impl VulkanImage {
    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.handle
    }
    #[inline]
    pub fn desc(&self) -> &GfxImageDesc {
        &self.desc
    }
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.desc.format.is_depth() { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR }
    }
    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: self.desc.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

pub(crate) fn vk_format(format: GfxTexelFormat) -> vk::Format {
    match format {
        GfxTexelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        GfxTexelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        GfxTexelFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        GfxTexelFormat::R32Float => vk::Format::R32_SFLOAT,
        GfxTexelFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}
