#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum GfxWrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum GfxFilter {
    #[default]
    Nearest,
    Linear,
}

/// Sampler 的描述
///
/// 默认值为 Repeat + Nearest。`max_anisotropy == 0` 表示不开启各向异性过滤。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct GfxSamplerDesc {
    pub wrap_u: GfxWrapMode,
    pub wrap_v: GfxWrapMode,
    pub wrap_w: GfxWrapMode,
    pub mag_filter: GfxFilter,
    pub min_filter: GfxFilter,
    pub mipmap_filter: GfxFilter,
    pub max_anisotropy: u8,
}

impl GfxSamplerDesc {
    pub const ENCODED_SIZE: usize = 7;

    pub fn linear(wrap: GfxWrapMode) -> Self {
        Self {
            wrap_u: wrap,
            wrap_v: wrap,
            wrap_w: wrap,
            mag_filter: GfxFilter::Linear,
            min_filter: GfxFilter::Linear,
            mipmap_filter: GfxFilter::Linear,
            max_anisotropy: 0,
        }
    }

    /// builder
    #[inline]
    pub fn with_anisotropy(mut self, max_anisotropy: u8) -> Self {
        self.max_anisotropy = max_anisotropy;
        self
    }

    /// 稳定的字节编码
    ///
    /// 和编译器生成的 enum 判别值无关，可以用作内容哈希的输入。
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_SIZE] {
        fn wrap(mode: GfxWrapMode) -> u8 {
            match mode {
                GfxWrapMode::Repeat => 0,
                GfxWrapMode::MirroredRepeat => 1,
                GfxWrapMode::ClampToEdge => 2,
                GfxWrapMode::ClampToBorder => 3,
            }
        }
        fn filter(filter: GfxFilter) -> u8 {
            match filter {
                GfxFilter::Nearest => 0,
                GfxFilter::Linear => 1,
            }
        }
        [
            wrap(self.wrap_u),
            wrap(self.wrap_v),
            wrap(self.wrap_w),
            filter(self.mag_filter),
            filter(self.min_filter),
            filter(self.mipmap_filter),
            self.max_anisotropy,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_repeat_nearest() {
        let desc = GfxSamplerDesc::default();
        assert_eq!(desc.wrap_u, GfxWrapMode::Repeat);
        assert_eq!(desc.min_filter, GfxFilter::Nearest);
        assert_eq!(desc.to_bytes(), [0; GfxSamplerDesc::ENCODED_SIZE]);
    }

    #[test]
    fn test_encoding_distinguishes_fields() {
        let a = GfxSamplerDesc::linear(GfxWrapMode::ClampToEdge);
        let b = GfxSamplerDesc {
            wrap_w: GfxWrapMode::Repeat,
            ..a
        };
        assert_ne!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.with_anisotropy(8).to_bytes()[6], 8);
    }
}
