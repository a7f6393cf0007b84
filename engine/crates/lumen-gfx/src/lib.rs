//! GPU 的设备层
//!
//! 资源生命周期子系统只通过 [`backend::GfxBackend`] 和原生 API 打交道：
//! - [`vulkan::VulkanBackend`]：基于 ash + vk-mem 的实现，fence 使用 timeline semaphore
//! - [`headless::HeadlessBackend`]：纯 CPU 的实现，模拟 GPU timeline，用于测试以及没有 GPU 的环境

pub mod backend;
pub mod descriptors;
pub mod error;
pub mod headless;
pub mod resources;
pub mod sampler;
pub mod vulkan;
