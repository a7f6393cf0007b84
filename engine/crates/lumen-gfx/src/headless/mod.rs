//! 纯 CPU 的后端
//!
//! - 所有 buffer 都有一块 host 内存，copy 命令在 submit 时立即执行
//! - fence 是一个模拟的 timeline，完成的时机由 [`HeadlessTimelineMode`] 决定
//! - 记录下所有的命令和销毁事件，供测试检查

mod backend;
mod command;
mod memory;
mod resources;

pub use backend::{HeadlessBackend, HeadlessTimelineMode};
pub use command::{HeadlessCommand, HeadlessCommandBuffer};
pub use resources::{HeadlessBuffer, HeadlessDescriptorHeap, HeadlessFence, HeadlessImage};
