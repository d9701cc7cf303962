//! Presentation surface interface.
//!
//! [`PresentSurface`] is everything the frame scheduler needs from the window
//! system: capability queries, swapchain creation, image acquisition and
//! presentation. Transient outcomes (out of date, suboptimal, surface lost)
//! are reported as values rather than errors so the scheduler can recover
//! from them locally.

use crate::error::{GpuError, Result};
use ash::vk;

/// Surface capabilities query result.
#[derive(Debug, Clone)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// Get the recommended surface format.
    pub fn recommended_format(&self, preferred: Option<vk::Format>) -> Result<vk::SurfaceFormatKHR> {
        select_surface_format(&self.formats, preferred)
    }

    /// Get the recommended present mode.
    pub fn recommended_present_mode(
        &self,
        preferred: Option<vk::PresentModeKHR>,
    ) -> vk::PresentModeKHR {
        select_present_mode(&self.present_modes, preferred)
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; `suboptimal` asks for a rebuild at a convenient point.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface. No image was acquired.
    OutOfDate,
    /// The surface itself must be recreated. No image was acquired.
    SurfaceLost,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
    SurfaceLost,
    /// Any other failure. Reported, not fatal.
    Failed(vk::Result),
}

/// Parameters for creating a swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainInfo {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

/// Window-system surface consumed by the frame scheduler.
pub trait PresentSurface: Send {
    /// Query capabilities. Fails with [`GpuError::SurfaceLost`] if the
    /// surface has to be recreated first.
    fn capabilities(&self) -> Result<SurfaceCapabilities>;

    /// Extent the window would like when the surface leaves it up to us.
    fn desired_extent(&self) -> vk::Extent2D;

    fn set_desired_extent(&mut self, extent: vk::Extent2D);

    /// Recreate the underlying surface after it was lost.
    fn recreate_surface(&mut self) -> Result<()>;

    /// Create a swapchain and return it with its images.
    fn create_swapchain(
        &mut self,
        info: &SwapchainInfo,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)>;

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);

    /// Acquire the next image, signaling `semaphore` when it is ready.
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome>;

    /// Queue `image_index` for presentation on the present queue once
    /// `wait_semaphores` are signaled.
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> PresentOutcome;
}

const FALLBACK_FORMATS: [vk::Format; 3] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
];

/// Select the best surface format.
///
/// The preferred format wins if available, then the common 8-bit formats
/// in sRGB nonlinear color space, then whatever the surface lists first.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: Option<vk::Format>,
) -> Result<vk::SurfaceFormatKHR> {
    if let Some(found) = preferred.and_then(|p| available.iter().find(|f| f.format == p)) {
        return Ok(*found);
    }

    for candidate in FALLBACK_FORMATS {
        if let Some(found) = available.iter().find(|f| {
            f.format == candidate && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            return Ok(*found);
        }
    }

    available
        .first()
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".into()))
}

/// Select the best present mode.
pub fn select_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: Option<vk::PresentModeKHR>,
) -> vk::PresentModeKHR {
    let chain = preferred
        .into_iter()
        .chain([vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]);
    for mode in chain {
        if available.contains(&mode) {
            return mode;
        }
    }
    // FIFO is always supported
    vk::PresentModeKHR::FIFO
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Requested buffering clamped to what the surface supports
/// (`max_image_count == 0` means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, buffering: u32) -> u32 {
    let mut count = buffering.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn preferred_format_wins() {
        let available = [
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::A2B10G10R10_UNORM_PACK32),
        ];
        let chosen = select_surface_format(&available, Some(vk::Format::A2B10G10R10_UNORM_PACK32));
        assert_eq!(chosen.ok().map(|f| f.format), Some(vk::Format::A2B10G10R10_UNORM_PACK32));
    }

    #[test]
    fn format_falls_back_to_common_then_first() {
        let available = [
            format(vk::Format::R16G16B16A16_SFLOAT),
            format(vk::Format::R8G8B8A8_UNORM),
        ];
        let chosen = select_surface_format(&available, Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(chosen.ok().map(|f| f.format), Some(vk::Format::R8G8B8A8_UNORM));

        let odd = [format(vk::Format::R16G16B16A16_SFLOAT)];
        let chosen = select_surface_format(&odd, None);
        assert_eq!(chosen.ok().map(|f| f.format), Some(vk::Format::R16G16B16A16_SFLOAT));

        assert!(select_surface_format(&[], None).is_err());
    }

    #[test]
    fn present_mode_chain() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            select_present_mode(&all, Some(vk::PresentModeKHR::FIFO)),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(select_present_mode(&all, None), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], None),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&[], Some(vk::PresentModeKHR::MAILBOX)),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_is_clamped() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps, 2), 2);
        assert_eq!(choose_image_count(&caps, 3), 3);
        assert_eq!(choose_image_count(&caps, 4), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&unbounded, 2), 3);
    }

    #[test]
    fn extent_follows_surface_or_clamps() {
        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let desired = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(calculate_extent(&fixed, desired).width, 800);

        let free = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1000,
                height: 1000,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&free, desired);
        assert_eq!((extent.width, extent.height), (1000, 768));
    }
}
