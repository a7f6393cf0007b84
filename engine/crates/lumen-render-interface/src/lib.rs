//! GPU 资源的生命周期与延迟回收
//!
//! GPU 落后 CPU 若干帧执行，一个资源在 CPU 侧被释放时，之前提交的命令可能仍然在读它。
//! 这里的所有组件都遵循同一个规则：释放只是把资源连同当前帧号放进 retire queue，
//! 等 fence 证明那一帧（以及之后的 frames in flight + safety margin 帧）已经完成，才真正销毁。
//!
//! - [`frame_clock::FrameClock`]：帧号与 fence 的对应关系，判断某一帧退休的资源能否释放
//! - [`resource_pool::ResourcePool`]：buffer / image / command buffer 的分配与延迟释放
//! - [`slot_heap::SlotHeap`]：固定容量的描述符堆，按 slot 分配
//! - [`sampler_cache::SamplerCache`]：按内容去重的 sampler 组
//! - [`frame_ring::FrameResourceRing`]：每帧一个的 scratch 内存与临时描述符
//! - [`reclaimer::GfxReclaimer`]：持有以上所有组件的上下文，驱动每一帧

pub mod config;
pub mod error;
pub mod frame_clock;
pub mod frame_ring;
pub mod handles;
pub mod reclaimer;
pub mod resource_pool;
pub mod retire_queue;
pub mod sampler_cache;
pub mod slot_heap;
