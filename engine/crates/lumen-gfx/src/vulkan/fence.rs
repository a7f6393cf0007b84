use ash::vk;

/// timeline semaphore
///
/// 不实现 Drop，需要通过 backend 手动 destroy
pub struct VulkanFence {
    pub(crate) semaphore: vk::Semaphore,
}
// getters
impl VulkanFence {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}
