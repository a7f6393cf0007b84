use ash::vk;

use crate::resources::state::ResourceState;

/// 一个 [`ResourceState`] 在 Vulkan 中对应的同步范围
#[derive(Copy, Clone, Debug)]
pub(crate) struct VulkanStateMask {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl VulkanStateMask {
    const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }
}

pub(crate) fn state_mask(state: ResourceState) -> VulkanStateMask {
    type S = vk::PipelineStageFlags2;
    type A = vk::AccessFlags2;
    type L = vk::ImageLayout;

    let shader_stages = S::VERTEX_SHADER | S::FRAGMENT_SHADER | S::COMPUTE_SHADER;
    match state {
        ResourceState::Undefined => VulkanStateMask::new(S::NONE, A::NONE, L::UNDEFINED),
        ResourceState::General => {
            VulkanStateMask::new(S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE, L::GENERAL)
        }
        ResourceState::GenericRead => VulkanStateMask::new(S::ALL_COMMANDS, A::MEMORY_READ, L::READ_ONLY_OPTIMAL),
        ResourceState::VertexAndConstantBuffer => VulkanStateMask::new(
            S::VERTEX_ATTRIBUTE_INPUT | shader_stages,
            A::VERTEX_ATTRIBUTE_READ | A::UNIFORM_READ | A::SHADER_STORAGE_READ,
            L::UNDEFINED,
        ),
        ResourceState::IndexBuffer => VulkanStateMask::new(S::INDEX_INPUT, A::INDEX_READ, L::UNDEFINED),
        ResourceState::ShaderRead => VulkanStateMask::new(
            shader_stages,
            A::SHADER_SAMPLED_READ | A::SHADER_STORAGE_READ,
            L::SHADER_READ_ONLY_OPTIMAL,
        ),
        ResourceState::RenderTarget => VulkanStateMask::new(
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            L::COLOR_ATTACHMENT_OPTIMAL,
        ),
        ResourceState::DepthWrite => VulkanStateMask::new(
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
        ResourceState::CopySrc => VulkanStateMask::new(S::COPY, A::TRANSFER_READ, L::TRANSFER_SRC_OPTIMAL),
        ResourceState::CopyDst => VulkanStateMask::new(S::COPY, A::TRANSFER_WRITE, L::TRANSFER_DST_OPTIMAL),
        // present 由 swapchain 的 semaphore 同步
        ResourceState::Present => VulkanStateMask::new(S::NONE, A::NONE, L::PRESENT_SRC_KHR),
    }
}

pub(crate) fn buffer_barrier(
    buffer: vk::Buffer,
    from: ResourceState,
    to: ResourceState,
) -> vk::BufferMemoryBarrier2<'static> {
    let src = state_mask(from);
    let dst = state_mask(to);
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

pub(crate) fn image_barrier(
    image: vk::Image,
    subresource_range: vk::ImageSubresourceRange,
    from: ResourceState,
    to: ResourceState,
) -> vk::ImageMemoryBarrier2<'static> {
    let src = state_mask(from);
    let dst = state_mask(to);
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .old_layout(src.layout)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_states_use_transfer_layouts() {
        assert_eq!(state_mask(ResourceState::CopyDst).layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(state_mask(ResourceState::CopySrc).layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert!(state_mask(ResourceState::CopyDst).access.contains(vk::AccessFlags2::TRANSFER_WRITE));
    }

    #[test]
    fn test_write_states_have_write_access() {
        for state in [
            ResourceState::General,
            ResourceState::RenderTarget,
            ResourceState::DepthWrite,
            ResourceState::CopyDst,
        ] {
            assert!(state.is_write());
            let access = state_mask(state).access;
            let writes = vk::AccessFlags2::MEMORY_WRITE
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags2::TRANSFER_WRITE;
            assert!(access.intersects(writes), "{state:?}");
        }
    }
}
