//! 资源回收子系统的演示程序
//!
//! - [`frame_loop`]：与后端无关的帧循环负载
//! - [`vulkan_context`]：创建 Vulkan instance / device
//! - [`cli`]：命令行参数

pub mod cli;
pub mod frame_loop;
pub mod vulkan_context;
