use std::cell::RefCell;

use ash::vk;

use crate::descriptors::heap::{GfxDescriptorHeapInfo, SlotKind};
use crate::error::{GfxError, GfxResult};
use crate::resources::buffer::GfxBufferDesc;
use crate::sampler::{GfxFilter, GfxSamplerDesc, GfxWrapMode};
use crate::vulkan::backend::VulkanBackend;
use crate::vulkan::buffer::VulkanBuffer;

enum HeapStorage {
    /// shader visible：mapped 的 descriptor buffer
    DescriptorBuffer(VulkanBuffer),
    /// 只在 CPU 侧使用：一张 image view 表
    Host(Box<[vk::ImageView]>),
}

pub struct VulkanDescriptorHeap {
    kind: SlotKind,
    storage: HeapStorage,
    info: GfxDescriptorHeapInfo,
    /// 写入 descriptor buffer 的 sampler 对象，需要和堆活得一样久
    samplers: RefCell<Vec<vk::Sampler>>,
}
// new & init
impl VulkanDescriptorHeap {
    pub(crate) fn new(backend: &VulkanBackend, kind: SlotKind, num_descriptors: u32, debug_name: &str) -> GfxResult<Self> {
        let sizes = backend.descriptor_sizes();
        let (storage, info) = if kind.is_shader_visible() {
            let (descriptor_size, usage) = match kind {
                SlotKind::Sampler => (sizes.sampler, vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT),
                _ => (sizes.resource, vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT),
            };
            let desc =
                GfxBufferDesc::upload(descriptor_size * num_descriptors as u64).with_alignment(sizes.offset_alignment);
            let buffer = VulkanBuffer::new(backend, &desc, usage, debug_name)?;
            let cpu_base = match buffer.mapped_ptr() {
                Some(ptr) => ptr.as_ptr() as usize,
                None => {
                    buffer.destroy(backend);
                    return Err(GfxError::Unsupported("descriptor buffer is not host visible".to_string()));
                }
            };
            let info = GfxDescriptorHeapInfo {
                cpu_base,
                gpu_base: Some(buffer.device_address()),
                descriptor_size,
                num_descriptors,
            };
            (HeapStorage::DescriptorBuffer(buffer), info)
        } else {
            let table = vec![vk::ImageView::null(); num_descriptors as usize].into_boxed_slice();
            let info = GfxDescriptorHeapInfo {
                cpu_base: table.as_ptr() as usize,
                gpu_base: None,
                descriptor_size: size_of::<vk::ImageView>() as u64,
                num_descriptors,
            };
            (HeapStorage::Host(table), info)
        };

        log::info!("descriptor heap {} created: {} x {:?}", debug_name, num_descriptors, kind);
        Ok(Self {
            kind,
            storage,
            info,
            samplers: RefCell::new(Vec::new()),
        })
    }
}
// destroy
impl VulkanDescriptorHeap {
    pub(crate) fn destroy(self, backend: &VulkanBackend) {
        for sampler in self.samplers.into_inner() {
            unsafe { backend.device.destroy_sampler(sampler, None) };
        }
        match self.storage {
            HeapStorage::DescriptorBuffer(buffer) => buffer.destroy(backend),
            HeapStorage::Host(table) => drop(table),
        }
    }
}
// getters
impl VulkanDescriptorHeap {
    #[inline]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }
    #[inline]
    pub fn info(&self) -> GfxDescriptorHeapInfo {
        self.info
    }
    /// descriptor buffer 本身，RTV/DSV 堆没有
    #[inline]
    pub fn descriptor_buffer(&self) -> Option<&VulkanBuffer> {
        match &self.storage {
            HeapStorage::DescriptorBuffer(buffer) => Some(buffer),
            HeapStorage::Host(_) => None,
        }
    }
}
// tools
impl VulkanDescriptorHeap {
    pub(crate) fn write_sampler(
        &self,
        backend: &VulkanBackend,
        descriptor_index: u32,
        desc: &GfxSamplerDesc,
    ) -> GfxResult<()> {
        if self.kind != SlotKind::Sampler {
            return Err(GfxError::Unsupported(format!("sampler descriptor in a {:?} heap", self.kind)));
        }
        if descriptor_index >= self.info.num_descriptors {
            return Err(GfxError::InvalidDescriptorIndex {
                index: descriptor_index,
                count: self.info.num_descriptors,
            });
        }

        let sampler = unsafe { backend.device.create_sampler(&sampler_create_info(desc), None)? };
        self.samplers.borrow_mut().push(sampler);

        let get_info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::SAMPLER)
            .data(vk::DescriptorDataEXT { p_sampler: &sampler });
        // SAFETY: 范围已经检查过，descriptor buffer 在 heap 的生命周期内保持 map
        let dst = unsafe {
            std::slice::from_raw_parts_mut(
                self.info.cpu_address(descriptor_index) as *mut u8,
                self.info.descriptor_size as usize,
            )
        };
        unsafe { backend.descriptor_buffer.get_descriptor(&get_info, dst) };

        if let HeapStorage::DescriptorBuffer(buffer) = &self.storage {
            let offset = descriptor_index as u64 * self.info.descriptor_size;
            buffer.flush(backend, offset, self.info.descriptor_size)?;
        }
        Ok(())
    }
}

fn sampler_create_info(desc: &GfxSamplerDesc) -> vk::SamplerCreateInfo<'static> {
    fn address_mode(wrap: GfxWrapMode) -> vk::SamplerAddressMode {
        match wrap {
            GfxWrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
            GfxWrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            GfxWrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            GfxWrapMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
    fn filter(filter: GfxFilter) -> vk::Filter {
        match filter {
            GfxFilter::Nearest => vk::Filter::NEAREST,
            GfxFilter::Linear => vk::Filter::LINEAR,
        }
    }
    let mipmap_mode = match desc.mipmap_filter {
        GfxFilter::Nearest => vk::SamplerMipmapMode::NEAREST,
        GfxFilter::Linear => vk::SamplerMipmapMode::LINEAR,
    };

    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(filter(desc.mag_filter))
        .min_filter(filter(desc.min_filter))
        .mipmap_mode(mipmap_mode)
        .address_mode_u(address_mode(desc.wrap_u))
        .address_mode_v(address_mode(desc.wrap_v))
        .address_mode_w(address_mode(desc.wrap_w))
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .compare_enable(false);

    if desc.max_anisotropy > 0 {
        create_info.anisotropy_enable(true).max_anisotropy(desc.max_anisotropy as f32)
    } else {
        create_info.anisotropy_enable(false)
    }
}
