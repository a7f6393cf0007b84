/// buffer 所在的内存
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxMemoryLocation {
    /// host visible，创建后一直处于 map 状态，GPU 可读
    Upload,
    /// device local，只能通过 copy 命令写入
    Device,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBufferDesc {
    pub size: u64,
    pub location: GfxMemoryLocation,
    /// 起始地址的对齐，`None` 表示使用后端的默认对齐
    pub alignment: Option<u64>,
}

impl GfxBufferDesc {
    #[inline]
    pub fn upload(size: u64) -> Self {
        Self {
            size,
            location: GfxMemoryLocation::Upload,
            alignment: None,
        }
    }

    #[inline]
    pub fn device(size: u64) -> Self {
        Self {
            size,
            location: GfxMemoryLocation::Device,
            alignment: None,
        }
    }

    /// builder
    #[inline]
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = Some(alignment);
        self
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.location == GfxMemoryLocation::Upload
    }
}
