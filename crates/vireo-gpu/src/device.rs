//! Device and queue collaborator interface.
//!
//! Everything the synchronization core needs from the GPU goes through
//! [`GpuDevice`]. The Vulkan binding lives in [`crate::vulkan`]; a headless
//! software device for tests lives in the `vireo-test` crate.

use crate::barrier::PipelineBarrier;
use crate::error::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Shared handle to a device implementation.
pub type DeviceRef = Arc<dyn GpuDevice>;

/// Queue a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Present,
    Transfer,
}

/// Queue family indices for each queue kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Family index for a queue kind.
    pub fn family(&self, kind: QueueKind) -> u32 {
        match kind {
            QueueKind::Graphics => self.graphics,
            QueueKind::Present => self.present,
            QueueKind::Transfer => self.transfer,
        }
    }

    /// Whether presentation happens on a different family than drawing.
    pub fn present_is_separate(&self) -> bool {
        self.present != self.graphics
    }
}

/// Device limits relevant to resource layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub min_uniform_buffer_offset_alignment: u64,
    pub min_storage_buffer_offset_alignment: u64,
    pub optimal_buffer_copy_offset_alignment: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 64,
            optimal_buffer_copy_offset_alignment: 4,
        }
    }
}

/// Parameters for creating a buffer.
#[derive(Debug, Clone)]
pub struct BufferInfo<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

/// Parameters for creating an image.
#[derive(Debug, Clone)]
pub struct ImageInfo<'a> {
    pub name: &'a str,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}

impl ImageInfo<'_> {
    pub fn image_type(&self) -> vk::ImageType {
        if self.extent.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        }
    }
}

/// Parameters for creating an image view.
#[derive(Debug, Clone, Copy)]
pub struct ImageViewInfo {
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub range: vk::ImageSubresourceRange,
}

/// A queue submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Payload of a descriptor write.
#[derive(Debug, Clone)]
pub enum DescriptorPayload {
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Images(Vec<vk::DescriptorImageInfo>),
}

/// A pending descriptor update.
#[derive(Debug, Clone)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub ty: vk::DescriptorType,
    pub payload: DescriptorPayload,
}

/// Device and queue operations consumed by the synchronization core.
///
/// Implementations own the raw API objects; every method takes `&self` and
/// performs whatever internal locking the binding needs.
pub trait GpuDevice: Send + Sync {
    fn queue_families(&self) -> QueueFamilies;
    fn limits(&self) -> DeviceLimits;
    fn wait_idle(&self) -> Result<()>;

    // Synchronization objects.
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    // Command recording and submission.
    fn create_command_pool(&self, queue: QueueKind) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()>;
    fn begin_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()>;
    fn submit(&self, queue: QueueKind, submit: &SubmitInfo<'_>) -> Result<()>;

    fn cmd_pipeline_barrier(&self, cb: vk::CommandBuffer, barrier: &PipelineBarrier);
    fn cmd_copy_buffer(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    /// Copy into an image in `TRANSFER_DST_OPTIMAL`.
    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    );
    /// Copy out of an image in `TRANSFER_SRC_OPTIMAL`.
    fn cmd_copy_image_to_buffer(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
    /// Blit from `TRANSFER_SRC_OPTIMAL` into `TRANSFER_DST_OPTIMAL`.
    fn cmd_blit_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );

    // Memory.
    fn create_buffer(&self, info: &BufferInfo<'_>) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer) -> Result<()>;
    /// Write into a host-visible buffer.
    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    /// Read from a host-visible buffer.
    fn read_buffer(&self, buffer: vk::Buffer, offset: u64, out: &mut [u8]) -> Result<()>;
    fn create_image(&self, info: &ImageInfo<'_>) -> Result<vk::Image>;
    fn destroy_image(&self, image: vk::Image) -> Result<()>;
    fn create_image_view(&self, image: vk::Image, info: &ImageViewInfo) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Descriptors.
    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>>;
    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()>;
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);
    fn cmd_bind_descriptor_set(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );
}

/// Bytes per texel for the uncompressed formats the core knows how to stage.
pub fn format_texel_size(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB | vk::Format::R8_UINT | vk::Format::S8_UINT => 1,
        vk::Format::R8G8_UNORM
        | vk::Format::R16_SFLOAT
        | vk::Format::R16_UNORM
        | vk::Format::R16_UINT
        | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::D32_SFLOAT
        | vk::Format::D24_UNORM_S8_UINT => 4,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,
        _ => return None,
    };
    Some(size)
}

/// Aspect flags implied by a format.
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT => vk::ImageAspectFlags::DEPTH,
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_sizes() {
        assert_eq!(format_texel_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(format_texel_size(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(format_texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(
            format_aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            format_aspect(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn separate_present_family() {
        let families = QueueFamilies {
            graphics: 0,
            present: 1,
            transfer: 0,
        };
        assert!(families.present_is_separate());
        assert_eq!(families.family(QueueKind::Present), 1);
    }
}
