use ash::vk;

/// 从 backend 的 command pool 中分配的 primary command buffer
pub struct VulkanCommandBuffer {
    pub(crate) handle: vk::CommandBuffer,
    #[cfg(debug_assertions)]
    pub(crate) name: String,
}
// getters
impl VulkanCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.handle
    }
}
impl std::fmt::Debug for VulkanCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("VulkanCommandBuffer");
        s.field("handle", &self.handle);
        #[cfg(debug_assertions)]
        s.field("name", &self.name);
        s.finish()
    }
}
