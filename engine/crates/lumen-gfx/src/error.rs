use ash::vk;

/// 原生 API 层的错误
///
/// 上层（资源生命周期子系统）会把这些错误统一视为致命错误，不会重试。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GfxError {
    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("device lost")]
    DeviceLost,

    /// 等待一个从未被 signal 的 fence 值，会永远阻塞
    #[error("fence value {value} was never signaled (last signaled {signaled})")]
    NeverSignaled { value: u64, signaled: u64 },

    #[error("descriptor index {index} out of range (heap holds {count})")]
    InvalidDescriptorIndex { index: u32, count: u32 },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("vulkan error: {0}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }
}

pub type GfxResult<T> = Result<T, GfxError>;
