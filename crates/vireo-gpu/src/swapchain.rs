//! Swapchain management.

use crate::barrier::Usage;
use crate::device::DeviceRef;
use crate::error::{GpuError, Result};
use crate::resource::{EarliestUse, Texture, TextureDesc};
use crate::surface::{PresentSurface, SwapchainInfo};
use ash::vk;

/// Swapchain wrapper: images tracked as textures, plus one view and one
/// framebuffer per image and an optional shared depth attachment.
///
/// Has no `Drop`; the owner calls [`Swapchain::destroy`] with the surface
/// that created it.
pub struct Swapchain {
    device: DeviceRef,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<Texture>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    depth: Option<(Texture, vk::ImageView)>,
}

impl Swapchain {
    /// Create a swapchain with views, depth and framebuffers.
    ///
    /// `attachment_count` is the render pass's attachment count and must be
    /// one color attachment plus the depth attachment if any. On failure
    /// everything created so far is destroyed.
    pub fn new(
        device: DeviceRef,
        surface: &mut dyn PresentSurface,
        info: &SwapchainInfo,
        render_pass: vk::RenderPass,
        attachment_count: u32,
        depth_format: Option<vk::Format>,
    ) -> Result<Self> {
        let provided = 1 + u32::from(depth_format.is_some());
        if attachment_count != provided {
            return Err(GpuError::AttachmentMismatch {
                expected: attachment_count,
                actual: provided,
            });
        }

        let (handle, images) = surface.create_swapchain(info)?;
        let mut swapchain = Self {
            device,
            handle,
            format: info.format,
            present_mode: info.present_mode,
            extent: info.extent,
            images: Vec::with_capacity(images.len()),
            views: Vec::with_capacity(images.len()),
            framebuffers: Vec::with_capacity(images.len()),
            depth: None,
        };

        match swapchain.populate(&images, render_pass, depth_format) {
            Ok(()) => {
                tracing::info!(
                    "Swapchain created: {}x{} ({} images, {:?}, {:?})",
                    info.extent.width,
                    info.extent.height,
                    swapchain.images.len(),
                    info.format.format,
                    info.present_mode
                );
                Ok(swapchain)
            }
            Err(e) => {
                swapchain.destroy(surface);
                Err(e)
            }
        }
    }

    fn populate(
        &mut self,
        images: &[vk::Image],
        render_pass: vk::RenderPass,
        depth_format: Option<vk::Format>,
    ) -> Result<()> {
        for (i, &image) in images.iter().enumerate() {
            let texture = Texture::borrowed(
                self.device.clone(),
                image,
                format!("swapchain image {i}"),
                self.format.format,
                self.extent,
                EarliestUse::color_attachment(),
            );
            self.views.push(texture.create_view(texture.full_range())?);
            self.images.push(texture);
        }

        if let Some(format) = depth_format {
            let desc = TextureDesc::new_2d(
                "swapchain depth",
                format,
                self.extent.width,
                self.extent.height,
            )
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .earliest_use(EarliestUse::new(
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                Usage::DepthStencilAttachment,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            ));
            let texture = Texture::new(self.device.clone(), &desc)?;
            let view = texture.create_view(texture.full_range())?;
            self.depth = Some((texture, view));
        }

        let depth_view = self.depth.as_ref().map(|(_, view)| *view);
        for &view in &self.views {
            let attachments: Vec<vk::ImageView> =
                std::iter::once(view).chain(depth_view).collect();
            let framebuffer = self
                .device
                .create_framebuffer(render_pass, &attachments, self.extent)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Destroy framebuffers, views, depth and the swapchain itself.
    /// Safe to call more than once.
    pub fn destroy(&mut self, surface: &mut dyn PresentSurface) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        for view in self.views.drain(..) {
            self.device.destroy_image_view(view);
        }
        if let Some((texture, view)) = self.depth.take() {
            self.device.destroy_image_view(view);
            drop(texture);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            surface.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: usize) -> &Texture {
        &self.images[index]
    }

    pub fn image_mut(&mut self, index: usize) -> &mut Texture {
        &mut self.images[index]
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn depth(&self) -> Option<&Texture> {
        self.depth.as_ref().map(|(texture, _)| texture)
    }
}
