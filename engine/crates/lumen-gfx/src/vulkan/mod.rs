//! 基于 ash + vk-mem 的后端
//!
//! - instance / device / queue 由外部创建并持有，这里只做引用
//! - fence 是 timeline semaphore
//! - shader visible 的描述符堆使用 `VK_EXT_descriptor_buffer`，RTV/DSV 堆是 host 内存中的 image view 表

mod backend;
mod barrier;
mod buffer;
mod command_buffer;
mod descriptor_heap;
mod fence;
mod image;

pub use backend::{VulkanBackend, VulkanBackendCreateInfo};
pub use buffer::VulkanBuffer;
pub use command_buffer::VulkanCommandBuffer;
pub use descriptor_heap::VulkanDescriptorHeap;
pub use fence::VulkanFence;
pub use image::VulkanImage;
