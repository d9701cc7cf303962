//! [`GpuDevice`] for [`VulkanDevice`].

use super::VulkanDevice;
use crate::barrier::PipelineBarrier;
use crate::device::{
    BufferInfo, DescriptorPayload, DescriptorWrite, DeviceLimits, GpuDevice, ImageInfo,
    ImageViewInfo, LayoutBinding, QueueFamilies, QueueKind, SubmitInfo,
};
use crate::error::{GpuError, Result};
use ash::vk;

fn mapped_range(len: usize, offset: u64, count: usize) -> Result<std::ops::Range<usize>> {
    let start = usize::try_from(offset)
        .map_err(|_| GpuError::InvalidState(format!("Offset {offset} too large")))?;
    let end = start
        .checked_add(count)
        .filter(|&end| end <= len)
        .ok_or_else(|| {
            GpuError::InvalidState(format!(
                "Mapped range {start}..{} exceeds buffer of {len} bytes",
                start.saturating_add(count)
            ))
        })?;
    Ok(start..end)
}

// SAFETY (whole impl): every handle passed in was created by this device and
// the callers uphold Vulkan's external synchronization rules; queue access is
// serialized through `with_queue`.
impl GpuDevice for VulkanDevice {
    fn queue_families(&self) -> QueueFamilies {
        self.queue_family_indices()
    }

    fn limits(&self) -> DeviceLimits {
        self.adapter.limits
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None)? };
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&create_info, None)? };
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns)? };
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn create_command_pool(&self, queue: QueueKind) -> Result<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family_indices().family(queue))
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { self.device.create_command_pool(&create_info, None)? };
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cb, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cb)? };
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn submit(&self, queue: QueueKind, submit: &SubmitInfo<'_>) -> Result<()> {
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(submit.command_buffers)
            .wait_semaphores(submit.wait_semaphores)
            .wait_dst_stage_mask(submit.wait_stages)
            .signal_semaphores(submit.signal_semaphores);

        self.with_queue(queue, |queue| unsafe {
            self.device
                .queue_submit(queue, &[submit_info], submit.fence)
        })?;
        Ok(())
    }

    fn cmd_pipeline_barrier(&self, cb: vk::CommandBuffer, barrier: &PipelineBarrier) {
        let buffer_barriers = barrier.buffer_barriers();
        let image_barriers = barrier.image_barriers();
        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                barrier.src_stages,
                barrier.dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    fn cmd_copy_buffer(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cb, src, dst, regions) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cb,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                cb,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                regions,
            );
        }
    }

    fn cmd_blit_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.device.cmd_blit_image(
                cb,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
                filter,
            );
        }
    }

    fn create_buffer(&self, info: &BufferInfo<'_>) -> Result<vk::Buffer> {
        self.allocator
            .lock()
            .create_buffer(info.size, info.usage, info.location, info.name)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) -> Result<()> {
        self.allocator.lock().free_buffer(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut allocator = self.allocator.lock();
        let mapped = allocator.mapped_mut(buffer)?;
        let range = mapped_range(mapped.len(), offset, data.len())?;
        mapped[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let mut allocator = self.allocator.lock();
        let mapped = allocator.mapped_mut(buffer)?;
        let range = mapped_range(mapped.len(), offset, out.len())?;
        out.copy_from_slice(&mapped[range]);
        Ok(())
    }

    fn create_image(&self, info: &ImageInfo<'_>) -> Result<vk::Image> {
        let create_info = vk::ImageCreateInfo::default()
            .flags(info.flags)
            .image_type(info.image_type())
            .format(info.format)
            .extent(info.extent)
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.allocator.lock().create_image(&create_info, info.name)
    }

    fn destroy_image(&self, image: vk::Image) -> Result<()> {
        self.allocator.lock().free_image(image)
    }

    fn create_image_view(&self, image: vk::Image, info: &ImageViewInfo) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(info.view_type)
            .format(info.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(info.range);

        let view = unsafe { self.device.create_image_view(&view_info, None)? };
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None)? };
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.ty)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None)? };
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        // Sets are released individually back to their pool
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);

        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None)? };
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()> {
        unsafe { self.device.free_descriptor_sets(pool, sets)? };
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.ty);
                match &write.payload {
                    DescriptorPayload::Buffers(infos) => base.buffer_info(infos),
                    DescriptorPayload::Images(infos) => base.image_info(infos),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cb,
                bind_point,
                pipeline_layout,
                set_index,
                &[set],
                dynamic_offsets,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_range_bounds() {
        assert_eq!(mapped_range(16, 4, 8).ok(), Some(4..12));
        assert_eq!(mapped_range(16, 8, 8).ok(), Some(8..16));
        assert!(mapped_range(16, 12, 8).is_err());
        assert!(mapped_range(16, u64::MAX, 1).is_err());
    }
}
