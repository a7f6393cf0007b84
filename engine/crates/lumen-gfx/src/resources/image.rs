/// 分配 image 所需要的最少的格式信息
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxTexelFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl GfxTexelFormat {
    #[inline]
    pub fn bytes_per_texel(self) -> u64 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8Srgb | Self::R32Float | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }

    #[inline]
    pub fn is_depth(self) -> bool {
        self == Self::Depth32Float
    }
}

/// 2D image 的创建信息
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: GfxTexelFormat,
}

impl GfxImageDesc {
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: GfxTexelFormat) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            format,
        }
    }

    /// builder
    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// 第 0 层 mip 的字节数，也就是上传时一次 copy 的大小
    #[inline]
    pub fn base_level_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_texel()
    }

    /// 整条 mip 链的字节数（不考虑硬件的对齐和 padding）
    pub fn total_bytes(&self) -> u64 {
        (0..self.mip_levels)
            .map(|level| {
                let w = (self.width >> level).max(1) as u64;
                let h = (self.height >> level).max(1) as u64;
                w * h * self.format.bytes_per_texel()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_chain_bytes() {
        let desc = GfxImageDesc::new_2d(4, 4, GfxTexelFormat::Rgba8Unorm).with_mip_levels(3);
        // 4x4 + 2x2 + 1x1
        assert_eq!(desc.total_bytes(), (16 + 4 + 1) * 4);
        assert_eq!(desc.base_level_bytes(), 64);
    }

    #[test]
    fn test_mip_chain_clamps_to_one_texel() {
        let desc = GfxImageDesc::new_2d(2, 1, GfxTexelFormat::Rgba16Float).with_mip_levels(3);
        assert_eq!(desc.total_bytes(), (2 + 1 + 1) * 8);
    }
}
