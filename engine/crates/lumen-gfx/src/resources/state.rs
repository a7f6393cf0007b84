/// 资源的抽象访问状态
///
/// 每个状态对应一组 (pipeline stage, access, image layout)，由各个后端自行翻译。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    #[default]
    Undefined,
    General,
    /// upload heap 上的资源：CPU 写，GPU 读
    GenericRead,
    VertexAndConstantBuffer,
    IndexBuffer,
    ShaderRead,
    RenderTarget,
    DepthWrite,
    CopySrc,
    CopyDst,
    Present,
}

impl ResourceState {
    /// GPU 在该状态下是否会写入资源
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, Self::General | Self::RenderTarget | Self::DepthWrite | Self::CopyDst)
    }

    /// 是否只对 image 有意义
    #[inline]
    pub fn is_image_only(self) -> bool {
        matches!(self, Self::ShaderRead | Self::RenderTarget | Self::DepthWrite | Self::Present)
    }
}
