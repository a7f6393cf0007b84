/// 描述符堆的种类
///
/// RTV/DSV 只在 CPU 侧可见；SRV 和 Sampler 是 shader visible 的，拥有 GPU 地址。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKind {
    RenderTargetView,
    DepthStencilView,
    ShaderResourceView,
    Sampler,
}

impl SlotKind {
    pub const ALL: [SlotKind; 4] = [
        SlotKind::RenderTargetView,
        SlotKind::DepthStencilView,
        SlotKind::ShaderResourceView,
        SlotKind::Sampler,
    ];

    #[inline]
    pub fn is_shader_visible(self) -> bool {
        matches!(self, Self::ShaderResourceView | Self::Sampler)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::RenderTargetView => "rtv",
            Self::DepthStencilView => "dsv",
            Self::ShaderResourceView => "srv",
            Self::Sampler => "sampler",
        }
    }
}

/// 原生描述符堆创建之后的地址信息
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxDescriptorHeapInfo {
    /// CPU 可写的起始地址
    pub cpu_base: usize,
    /// shader visible 的堆才有 GPU 地址
    pub gpu_base: Option<u64>,
    /// 单个描述符占用的字节数（D3D 中的 increment size）
    pub descriptor_size: u64,
    pub num_descriptors: u32,
}

impl GfxDescriptorHeapInfo {
    #[inline]
    pub fn cpu_address(&self, descriptor_index: u32) -> usize {
        self.cpu_base + (descriptor_index as u64 * self.descriptor_size) as usize
    }

    #[inline]
    pub fn gpu_address(&self, descriptor_index: u32) -> Option<u64> {
        self.gpu_base.map(|base| base + descriptor_index as u64 * self.descriptor_size)
    }
}
