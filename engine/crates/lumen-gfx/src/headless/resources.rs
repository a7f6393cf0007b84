use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use crate::descriptors::heap::{GfxDescriptorHeapInfo, SlotKind};
use crate::headless::memory::HostMemory;
use crate::resources::buffer::GfxBufferDesc;
use crate::resources::image::GfxImageDesc;
use crate::sampler::GfxSamplerDesc;

pub struct HeadlessBuffer {
    pub(crate) id: u64,
    pub(crate) desc: GfxBufferDesc,
    pub(crate) memory: HostMemory,
    pub(crate) device_address: u64,
}
// getters
impl HeadlessBuffer {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
    #[inline]
    pub fn desc(&self) -> &GfxBufferDesc {
        &self.desc
    }
    /// 模拟的显存内容，device buffer 也可以读取
    #[inline]
    pub fn contents(&self) -> &[u8] {
        self.memory.as_slice()
    }
    #[inline]
    pub(crate) fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.desc.is_mapped().then(|| self.memory.span().ptr)
    }
}
impl std::fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBuffer").field("id", &self.id).field("desc", &self.desc).finish()
    }
}

#[derive(Debug)]
pub struct HeadlessImage {
    pub(crate) id: u64,
    pub(crate) desc: GfxImageDesc,
}
// getters
impl HeadlessImage {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
    #[inline]
    pub fn desc(&self) -> &GfxImageDesc {
        &self.desc
    }
}

pub struct HeadlessDescriptorHeap {
    pub(crate) id: u64,
    pub(crate) kind: SlotKind,
    pub(crate) memory: HostMemory,
    pub(crate) info: GfxDescriptorHeapInfo,
    /// 每个描述符位置上最后一次写入的 sampler
    pub(crate) samplers: RefCell<Vec<Option<GfxSamplerDesc>>>,
}
// getters
impl HeadlessDescriptorHeap {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
    #[inline]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }
    /// 描述符位置上的原始字节
    pub fn descriptor_bytes(&self, descriptor_index: u32) -> &[u8] {
        let size = self.info.descriptor_size as usize;
        let start = descriptor_index as usize * size;
        &self.memory.as_slice()[start..start + size]
    }
    pub fn sampler_at(&self, descriptor_index: u32) -> Option<GfxSamplerDesc> {
        self.samplers.borrow().get(descriptor_index as usize).copied().flatten()
    }
}

/// 模拟的 timeline fence
pub struct HeadlessFence {
    pub(crate) id: u64,
    pub(crate) signaled: Cell<u64>,
    pub(crate) completed: Cell<u64>,
}
// getters
impl HeadlessFence {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
    /// 最近一次 signal 的值
    #[inline]
    pub fn last_signaled(&self) -> u64 {
        self.signaled.get()
    }
}
