//! The native side of descriptor management. Everything the cache needs from Vulkan goes through
//! the [`DescriptorDevice`] trait, which is implemented for [`ash::Device`].

use ash::prelude::VkResult;
use ash::vk;

use crate::descriptor::descriptor_set::{DescriptorContents, DescriptorWrite};

/// Native descriptor operations used by the descriptor cache.
///
/// # Safety
/// All methods map directly to Vulkan calls, and inherit their valid usage rules. Handles passed in
/// must have been created through the same device.
pub trait DescriptorDevice {
    /// Create a descriptor set layout from a list of bindings.
    unsafe fn create_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout.
    unsafe fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Create a descriptor pool that can hold `max_sets` sets.
    unsafe fn create_pool(&self, sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> VkResult<vk::DescriptorPool>;

    /// Destroy a descriptor pool, implicitly freeing all sets allocated from it.
    unsafe fn destroy_pool(&self, pool: vk::DescriptorPool);

    /// Allocate `count` descriptor sets with the same layout in a single call.
    unsafe fn allocate_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>>;

    /// Write descriptor entries into one or more descriptor sets.
    unsafe fn write_sets(&self, writes: &[DescriptorWrite]);

    /// Create the pipeline layout of a program from its descriptor set layouts.
    unsafe fn create_program_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout>;

    /// Destroy a pipeline layout.
    unsafe fn destroy_program_layout(&self, layout: vk::PipelineLayout);

    /// Record a `vkCmdBindDescriptorSets` command. Dynamic offsets must be ordered by set, then by binding number.
    unsafe fn cmd_bind_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
}

impl DescriptorDevice for ash::Device {
    unsafe fn create_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings).build();
        self.create_descriptor_set_layout(&info, None)
    }

    unsafe fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy_descriptor_set_layout(layout, None);
    }

    unsafe fn create_pool(&self, sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> VkResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::DescriptorPoolCreateFlags::empty(),
            max_sets,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
        };
        self.create_descriptor_pool(&info, None)
    }

    unsafe fn destroy_pool(&self, pool: vk::DescriptorPool) {
        self.destroy_descriptor_pool(pool, None);
    }

    unsafe fn allocate_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            p_next: std::ptr::null(),
            descriptor_pool: pool,
            descriptor_set_count: count,
            p_set_layouts: layouts.as_ptr(),
        };
        self.allocate_descriptor_sets(&info)
    }

    unsafe fn write_sets(&self, writes: &[DescriptorWrite]) {
        // The info arrays are owned by `writes`, which outlives this call.
        let vk_writes = writes
            .iter()
            .map(|write| {
                let mut info = vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    p_next: std::ptr::null(),
                    dst_set: write.set,
                    dst_binding: write.binding,
                    dst_array_element: write.array_element,
                    descriptor_count: write.count(),
                    descriptor_type: write.ty,
                    p_image_info: std::ptr::null(),
                    p_buffer_info: std::ptr::null(),
                    p_texel_buffer_view: std::ptr::null(),
                };
                match &write.contents {
                    DescriptorContents::Buffer(buffers) => info.p_buffer_info = buffers.as_ptr(),
                    DescriptorContents::Image(images) => info.p_image_info = images.as_ptr(),
                    DescriptorContents::TexelBuffer(views) => info.p_texel_buffer_view = views.as_ptr(),
                }
                info
            })
            .collect::<Vec<_>>();
        self.update_descriptor_sets(vk_writes.as_slice(), &[]);
    }

    unsafe fn create_program_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts).build();
        self.create_pipeline_layout(&info, None)
    }

    unsafe fn destroy_program_layout(&self, layout: vk::PipelineLayout) {
        self.destroy_pipeline_layout(layout, None);
    }

    unsafe fn cmd_bind_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, dynamic_offsets);
    }
}
