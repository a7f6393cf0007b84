use std::path::Path;

use lumen_gfx::descriptors::heap::SlotKind;
use serde::{Deserialize, Serialize};

use crate::error::ReclaimError;

/// 单个描述符堆的容量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// slot 的数量，创建之后不会增长
    pub capacity: u32,
    /// 每个 slot 中连续的描述符数量（slot group）
    pub descriptors_per_slot: u32,
}
impl Default for HeapConfig {
    fn default() -> Self {
        Self::new(8, 1)
    }
}
impl HeapConfig {
    #[inline]
    pub const fn new(capacity: u32, descriptors_per_slot: u32) -> Self {
        Self {
            capacity,
            descriptors_per_slot,
        }
    }

    #[inline]
    pub fn total_descriptors(&self) -> u32 {
        self.capacity * self.descriptors_per_slot
    }
}

/// 每种描述符堆的容量
///
/// TOML 中只写了部分字段的堆，缺少的字段取这种堆自己的默认值（见 [`HeapsConfig::default`]）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HeapsOverride")]
pub struct HeapsConfig {
    pub render_target_view: HeapConfig,
    pub depth_stencil_view: HeapConfig,
    pub shader_resource_view: HeapConfig,
    pub sampler: HeapConfig,
}
impl Default for HeapsConfig {
    fn default() -> Self {
        Self {
            render_target_view: HeapConfig::new(8, 1),
            depth_stencil_view: HeapConfig::new(8, 1),
            shader_resource_view: HeapConfig::new(256, 16),
            sampler: HeapConfig::new(64, 16),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HeapOverride {
    capacity: Option<u32>,
    descriptors_per_slot: Option<u32>,
}
impl HeapOverride {
    fn apply(self, base: HeapConfig) -> HeapConfig {
        HeapConfig {
            capacity: self.capacity.unwrap_or(base.capacity),
            descriptors_per_slot: self.descriptors_per_slot.unwrap_or(base.descriptors_per_slot),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HeapsOverride {
    render_target_view: HeapOverride,
    depth_stencil_view: HeapOverride,
    shader_resource_view: HeapOverride,
    sampler: HeapOverride,
}
impl From<HeapsOverride> for HeapsConfig {
    fn from(heaps: HeapsOverride) -> Self {
        let base = Self::default();
        Self {
            render_target_view: heaps.render_target_view.apply(base.render_target_view),
            depth_stencil_view: heaps.depth_stencil_view.apply(base.depth_stencil_view),
            shader_resource_view: heaps.shader_resource_view.apply(base.shader_resource_view),
            sampler: heaps.sampler.apply(base.sampler),
        }
    }
}

impl HeapsConfig {
    #[inline]
    pub fn get(&self, kind: SlotKind) -> HeapConfig {
        match kind {
            SlotKind::RenderTargetView => self.render_target_view,
            SlotKind::DepthStencilView => self.depth_stencil_view,
            SlotKind::ShaderResourceView => self.shader_resource_view,
            SlotKind::Sampler => self.sampler,
        }
    }
}

/// 资源回收子系统的配置
///
/// 所有的容量都在创建时固定，用尽即为致命错误。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// CPU 最多领先 GPU 的帧数，也是 frame ring 的长度
    pub frames_in_flight: u32,
    /// 在 frames_in_flight 之外额外等待的帧数
    pub safety_margin: u32,
    pub heaps: HeapsConfig,
    /// 每一帧的 scratch 内存预算
    pub scratch_bytes_per_frame: u64,
    /// scratch 分配的默认对齐
    pub scratch_alignment: u64,
    /// 每一帧可用的临时 SRV 描述符数量
    pub transient_descriptors_per_frame: u32,
    /// 默认 render target 的数量（通常等于 swapchain image 数量），resize 时整体重建
    pub default_render_targets: u32,
}
impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            safety_margin: 1,
            heaps: HeapsConfig::default(),
            scratch_bytes_per_frame: 64 * 1024,
            scratch_alignment: 256,
            transient_descriptors_per_frame: 1024,
            default_render_targets: 2,
        }
    }
}
impl ReclaimConfig {
    /// 读取 TOML 配置并检查
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReclaimError> {
        let config: Self =
            lumen_crate_tools::config::load_toml(path).map_err(|e| ReclaimError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReclaimError> {
        let invalid = |message: String| Err(ReclaimError::InvalidConfig(message));

        if self.frames_in_flight == 0 {
            return invalid("frames_in_flight must be at least 1".to_string());
        }
        for kind in SlotKind::ALL {
            let heap = self.heaps.get(kind);
            if heap.capacity == 0 || heap.descriptors_per_slot == 0 {
                return invalid(format!("{} heap needs a non-zero capacity and slot size", kind.short_name()));
            }
            if heap.capacity.checked_mul(heap.descriptors_per_slot).is_none() {
                return invalid(format!("{} heap holds more than u32::MAX descriptors", kind.short_name()));
            }
        }
        if self.default_render_targets > self.heaps.render_target_view.capacity {
            return invalid(format!(
                "{} default render targets do not fit in {} rtv slots",
                self.default_render_targets, self.heaps.render_target_view.capacity
            ));
        }
        if self.scratch_bytes_per_frame == 0 {
            return invalid("scratch_bytes_per_frame must be non-zero".to_string());
        }
        if !self.scratch_alignment.is_power_of_two() {
            return invalid(format!("scratch_alignment {} is not a power of two", self.scratch_alignment));
        }
        if self.transient_descriptors_per_frame == 0 {
            return invalid("transient_descriptors_per_frame must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_crate_tools::config::parse_toml;

    #[test]
    fn test_default_is_valid() {
        let config = ReclaimConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.safety_margin, 1);
        assert_eq!(config.heaps.get(SlotKind::Sampler), HeapConfig::new(64, 16));
        assert_eq!(config.heaps.get(SlotKind::ShaderResourceView).total_descriptors(), 4096);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ReclaimConfig = parse_toml(
            r#"
            frames_in_flight = 3
            scratch_bytes_per_frame = 1024

            [heaps.sampler]
            capacity = 4
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.safety_margin, 1);
        assert_eq!(config.scratch_bytes_per_frame, 1024);
        assert_eq!(config.heaps.sampler, HeapConfig::new(4, 16));
        assert_eq!(config.heaps.render_target_view, HeapConfig::new(8, 1));
    }

    #[test]
    fn test_partial_heap_keeps_its_own_defaults() {
        let config: ReclaimConfig = parse_toml(
            r#"
            [heaps.shader_resource_view]
            descriptors_per_slot = 4

            [heaps.sampler]
            capacity = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.heaps.shader_resource_view, HeapConfig::new(256, 4));
        assert_eq!(config.heaps.sampler.descriptors_per_slot, 16);
        assert_eq!(config.heaps.depth_stencil_view, HeapConfig::new(8, 1));

        // 序列化之后再读回来不变
        let text = toml::to_string(&config).unwrap();
        assert_eq!(parse_toml::<ReclaimConfig>(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut config = ReclaimConfig::default();
        config.frames_in_flight = 0;
        assert!(matches!(config.validate(), Err(ReclaimError::InvalidConfig(_))));

        let mut config = ReclaimConfig::default();
        config.heaps.shader_resource_view.capacity = 0;
        assert!(matches!(config.validate(), Err(ReclaimError::InvalidConfig(_))));

        let mut config = ReclaimConfig::default();
        config.scratch_alignment = 48;
        assert!(matches!(config.validate(), Err(ReclaimError::InvalidConfig(_))));

        let mut config = ReclaimConfig::default();
        config.default_render_targets = 9;
        assert!(matches!(config.validate(), Err(ReclaimError::InvalidConfig(_))));
    }
}
