use std::collections::HashMap;

use itertools::Itertools;
use lumen_gfx::backend::GfxBackend;
use lumen_gfx::descriptors::heap::SlotKind;
use lumen_gfx::sampler::GfxSamplerDesc;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::config::HeapConfig;
use crate::error::{OrFatal, ReclaimError};
use crate::slot_heap::SlotHeap;

const SAMPLER_HASH_SEED: u64 = 0xABAD_FEED_DEAD_BEEF;

/// sampler 组的内容哈希：所有 desc 的稳定编码拼接之后做 xxh3
pub fn sampler_group_hash(descs: &[GfxSamplerDesc]) -> u64 {
    let bytes = descs.iter().flat_map(|desc| desc.to_bytes()).collect_vec();
    xxh3_64_with_seed(&bytes, SAMPLER_HASH_SEED)
}

/// 按内容去重的 sampler 组缓存
///
/// 相同的 desc 数组总是得到同一个 slot，原生的 sampler 描述符只写入一次。缓存不会淘汰条目，
/// 容量由 sampler 堆的 slot 数决定。缓存的 slot 在堆中是 [`SlotState::Pinned`](crate::slot_heap::SlotState::Pinned)，不能被释放。
///
/// debug 构建会保存每个组的 desc，命中时逐项比较，用来发现哈希碰撞。
pub struct SamplerCache<B: GfxBackend> {
    heap: SlotHeap<B>,
    groups: HashMap<u64, u32>,
    #[cfg(debug_assertions)]
    group_descs: HashMap<u64, Vec<GfxSamplerDesc>>,

    hash_fn: fn(&[GfxSamplerDesc]) -> u64,
}
// new & init
impl<B: GfxBackend> SamplerCache<B> {
    pub fn new(backend: &B, config: HeapConfig) -> Self {
        Self::try_new(backend, config).or_fatal()
    }

    pub fn try_new(backend: &B, config: HeapConfig) -> Result<Self, ReclaimError> {
        Ok(Self {
            heap: SlotHeap::try_new(backend, SlotKind::Sampler, config, "sampler-cache")?,
            groups: HashMap::new(),
            #[cfg(debug_assertions)]
            group_descs: HashMap::new(),
            hash_fn: sampler_group_hash,
        })
    }

    /// 替换哈希函数，用于构造碰撞
    #[cfg(test)]
    fn with_hash_fn(mut self, hash_fn: fn(&[GfxSamplerDesc]) -> u64) -> Self {
        self.hash_fn = hash_fn;
        self
    }
}
// destroy
impl<B: GfxBackend> SamplerCache<B> {
    pub fn destroy(self, backend: &B) {
        log::info!("sampler cache destroyed with {} groups", self.groups.len());
        self.heap.destroy(backend);
    }
}
// getters
impl<B: GfxBackend> SamplerCache<B> {
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
    #[inline]
    pub fn heap(&self) -> &SlotHeap<B> {
        &self.heap
    }
    /// 直接从 sampler 堆分配的 slot 和缓存的组互不影响，缓存的组不能通过它释放
    #[inline]
    pub(crate) fn heap_mut(&mut self) -> &mut SlotHeap<B> {
        &mut self.heap
    }
    /// 组中第一个 sampler 的 GPU 地址
    #[inline]
    pub fn gpu_address(&self, slot: u32) -> Option<u64> {
        self.heap.gpu_address(slot)
    }
}
// update
impl<B: GfxBackend> SamplerCache<B> {
    /// 返回 `descs` 对应的 slot，没有缓存时分配一个新的 slot 并写入描述符
    pub fn lookup(&mut self, backend: &B, descs: &[GfxSamplerDesc]) -> u32 {
        self.try_lookup(backend, descs).or_fatal()
    }

    pub fn try_lookup(&mut self, backend: &B, descs: &[GfxSamplerDesc]) -> Result<u32, ReclaimError> {
        let max = self.heap.descriptors_per_slot();
        if descs.is_empty() || descs.len() > max as usize {
            return Err(ReclaimError::SamplerGroupSize { len: descs.len(), max });
        }

        let hash = (self.hash_fn)(descs);
        if let Some(&slot) = self.groups.get(&hash) {
            #[cfg(debug_assertions)]
            if self.group_descs.get(&hash).is_some_and(|cached| cached.as_slice() != descs) {
                return Err(ReclaimError::SamplerHashCollision { hash });
            }
            return Ok(slot);
        }

        let slot = self.heap.try_alloc_slot()?;
        if let Err(e) = self.write_group(backend, slot, descs) {
            // 描述符还没有被 GPU 看到，可以立即回收
            self.heap.try_release_slot_immediate(slot)?;
            return Err(e);
        }
        self.heap.try_pin_slot(slot)?;
        self.groups.insert(hash, slot);
        #[cfg(debug_assertions)]
        self.group_descs.insert(hash, descs.to_vec());

        log::debug!("> sampler group {:#018x} -> slot {} ({} samplers)", hash, slot, descs.len());
        Ok(slot)
    }

    fn write_group(&self, backend: &B, slot: u32, descs: &[GfxSamplerDesc]) -> Result<(), ReclaimError> {
        for (i, desc) in descs.iter().enumerate() {
            let descriptor_index = self.heap.descriptor_index(slot, i as u32);
            backend.write_sampler_descriptor(self.heap.native_heap(), descriptor_index, desc)?;
        }
        Ok(())
    }
}
