use lumen_gfx::descriptors::heap::SlotKind;
use lumen_gfx::error::GfxError;

use crate::handles::ResourceHandle;

/// 资源生命周期子系统的错误
///
/// 这里的每一种错误都是致命的：要么是配置的容量不够，要么是调用方违反了约定，要么是设备已经不可用。
/// 各组件的 `try_*` 方法返回它；不带 `try_` 的版本记录日志后直接 panic。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReclaimError {
    #[error("out of device memory while allocating {size} bytes")]
    OutOfDeviceMemory { size: u64 },

    #[error("{kind:?} heap exhausted (capacity {capacity})")]
    HeapExhausted { kind: SlotKind, capacity: u32 },

    #[error("frame scratch exhausted: requested {requested} bytes at offset {offset}, budget {budget}")]
    ScratchExhausted { requested: u64, offset: u64, budget: u64 },

    #[error("transient descriptors exhausted: requested {requested} at {cursor}, budget {budget}")]
    TransientDescriptorsExhausted { requested: u32, cursor: u32, budget: u32 },

    #[error("frame ring slot for frame {frame} is still used by frame {previous} (gpu at {completed})")]
    RingSlotInFlight { frame: u64, previous: u64, completed: u64 },

    #[error("zero-size allocation")]
    ZeroSizeAllocation,

    #[error("stale resource handle {0:?}")]
    StaleHandle(ResourceHandle),

    #[error("resource {0:?} released twice")]
    DoubleRelease(ResourceHandle),

    #[error("resource {0:?} is not a mapped upload buffer")]
    NotMapped(ResourceHandle),

    #[error("resource {0:?} has the wrong kind for this operation")]
    WrongResourceKind(ResourceHandle),

    #[error("access of {len} bytes at offset {offset} overflows a resource of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("upload of {len} bytes does not match the {expected} bytes of image {handle:?}")]
    UploadSizeMismatch { handle: ResourceHandle, len: u64, expected: u64 },

    #[error("resource pool used after destroy_all")]
    PoolDestroyed,

    #[error("invalid {kind:?} slot {index}: {reason}")]
    InvalidSlot { kind: SlotKind, index: u32, reason: &'static str },

    #[error("retire queue order violated: frame {frame} pushed after frame {last}")]
    RetireOrder { frame: u64, last: u64 },

    #[error("frame {frame} has not been submitted yet (current frame {current})")]
    FrameNotSubmitted { frame: u64, current: u64 },

    #[error("sampler hash collision on {hash:#018x}")]
    SamplerHashCollision { hash: u64 },

    #[error("sampler group of {len} descriptors, expected 1..={max}")]
    SamplerGroupSize { len: usize, max: u32 },

    #[error("device lost")]
    DeviceLost,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("gfx error: {0}")]
    Gfx(GfxError),
}

impl From<GfxError> for ReclaimError {
    fn from(e: GfxError) -> Self {
        match e {
            GfxError::DeviceLost => Self::DeviceLost,
            GfxError::OutOfDeviceMemory => Self::OutOfDeviceMemory { size: 0 },
            other => Self::Gfx(other),
        }
    }
}

impl ReclaimError {
    /// 带上请求大小的分配错误
    pub(crate) fn from_alloc(e: GfxError, size: u64) -> Self {
        match e {
            GfxError::OutOfDeviceMemory => Self::OutOfDeviceMemory { size },
            other => other.into(),
        }
    }
}

/// 致命错误的统一出口：先记录日志，再 panic
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T, ReclaimError> {
    #[track_caller]
    #[inline]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                log::error!("fatal: {e}");
                panic!("{e}");
            }
        }
    }
}
