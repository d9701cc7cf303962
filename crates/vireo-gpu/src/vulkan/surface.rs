//! Window surface and swapchain extension calls.

use super::VulkanDevice;
use crate::device::QueueKind;
use crate::error::{GpuError, Result};
use crate::surface::{
    AcquireOutcome, PresentOutcome, PresentSurface, SurfaceCapabilities, SwapchainInfo,
};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Create a raw surface for a window.
///
/// # Safety
/// The instance must be valid and outlive the surface.
pub(crate) unsafe fn create_raw_surface<W>(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &W,
) -> Result<vk::SurfaceKHR>
where
    W: HasDisplayHandle + HasWindowHandle + ?Sized,
{
    let display = window
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

    // SAFETY: forwarded from the function contract; the handles are live.
    unsafe {
        ash_window::create_surface(
            entry,
            instance,
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
    }
    .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
}

/// Vulkan surface for a window, with the swapchain extension loaded.
pub struct VulkanSurface<W> {
    device: Arc<VulkanDevice>,
    window: Arc<W>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    desired_extent: vk::Extent2D,
}

impl<W> VulkanSurface<W>
where
    W: HasDisplayHandle + HasWindowHandle + Send + Sync,
{
    pub(crate) fn from_parts(
        device: Arc<VulkanDevice>,
        window: Arc<W>,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Self {
        let swapchain_loader = ash::khr::swapchain::Device::new(device.instance(), device.raw());
        Self {
            device,
            window,
            surface,
            surface_loader,
            swapchain_loader,
            desired_extent: vk::Extent2D::default(),
        }
    }

    pub fn window(&self) -> &Arc<W> {
        &self.window
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl<W> PresentSurface for VulkanSurface<W>
where
    W: HasDisplayHandle + HasWindowHandle + Send + Sync,
{
    fn capabilities(&self) -> Result<SurfaceCapabilities> {
        let physical_device = self.device.physical_device();
        // SAFETY: surface and physical device belong to the same live instance.
        let queried = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .and_then(|capabilities| {
                    let formats = self
                        .surface_loader
                        .get_physical_device_surface_formats(physical_device, self.surface)?;
                    let present_modes = self
                        .surface_loader
                        .get_physical_device_surface_present_modes(physical_device, self.surface)?;
                    Ok(SurfaceCapabilities {
                        capabilities,
                        formats,
                        present_modes,
                    })
                })
        };
        queried.map_err(|e| match e {
            vk::Result::ERROR_SURFACE_LOST_KHR => GpuError::SurfaceLost,
            other => GpuError::Vulkan(other),
        })
    }

    fn desired_extent(&self) -> vk::Extent2D {
        self.desired_extent
    }

    fn set_desired_extent(&mut self, extent: vk::Extent2D) {
        self.desired_extent = extent;
    }

    fn recreate_surface(&mut self) -> Result<()> {
        // SAFETY: the scheduler destroyed every swapchain of the old surface.
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            self.surface = vk::SurfaceKHR::null();
            self.surface = create_raw_surface(
                self.device.entry(),
                self.device.instance(),
                self.window.as_ref(),
            )?;
        }
        tracing::info!("Surface recreated");
        Ok(())
    }

    fn create_swapchain(
        &mut self,
        info: &SwapchainInfo,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(info.image_count)
            .image_format(info.format.format)
            .image_color_space(info.format.color_space)
            .image_extent(info.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            // Cross-family use goes through explicit ownership transfers
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(info.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(info.present_mode)
            .clipped(true);

        // SAFETY: surface is live and no other swapchain targets it.
        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| match e {
                vk::Result::ERROR_SURFACE_LOST_KHR => GpuError::SurfaceLost,
                other => GpuError::SwapchainCreation(other.to_string()),
            })?;

        // SAFETY: swapchain was just created.
        match unsafe { self.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => Ok((swapchain, images)),
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
                Err(e.into())
            }
        }
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        // SAFETY: the caller waited for the device to go idle.
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        // SAFETY: swapchain and semaphore are live; the semaphore is unsignaled.
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            // No image was acquired in either case
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Ok(AcquireOutcome::SurfaceLost),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> PresentOutcome {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = self.device.with_queue(QueueKind::Present, |queue| {
            // SAFETY: queue access is serialized by `with_queue`.
            unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
        });

        match result {
            Ok(false) => PresentOutcome::Presented,
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => PresentOutcome::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentOutcome::OutOfDate,
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => PresentOutcome::SurfaceLost,
            Err(e) => PresentOutcome::Failed(e),
        }
    }
}

impl<W> Drop for VulkanSurface<W> {
    fn drop(&mut self) {
        // SAFETY: the frame scheduler owning this surface destroyed its swapchain.
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}
