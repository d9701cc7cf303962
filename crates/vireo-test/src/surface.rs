//! Headless window surface.
//!
//! Behaves like a window system that reports its window size as the surface
//! extent. Acquire and present outcomes can be scripted to drive the frame
//! scheduler through swapchain rebuilds and surface loss.

use crate::state::{Event, ImageObject, QueueOp, State};
use ash::vk;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use vireo_gpu::device::{format_texel_size, QueueKind};
use vireo_gpu::surface::{
    AcquireOutcome, PresentOutcome, PresentSurface, SurfaceCapabilities, SwapchainInfo,
};
use vireo_gpu::{GpuError, Result};

/// Scripted result of the next acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedAcquire {
    /// Acquire an image but report the swapchain as suboptimal.
    Suboptimal,
    OutOfDate,
    SurfaceLost,
    /// Fail with a raw error.
    Error(vk::Result),
}

struct HeadlessSwapchain {
    images: Vec<vk::Image>,
    acquired: Vec<bool>,
    next: usize,
}

/// Surface presenting into images owned by a [`crate::HeadlessDevice`].
pub struct HeadlessSurface {
    state: Arc<Mutex<State>>,
    extent: vk::Extent2D,
    min_images: u32,
    max_images: u32,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    lost: bool,
    lost_recreations: u32,
    recreations: u32,
    acquire_script: VecDeque<ScriptedAcquire>,
    present_script: VecDeque<PresentOutcome>,
    swapchains: HashMap<vk::SwapchainKHR, HeadlessSwapchain>,
    created: u32,
}

impl HeadlessSurface {
    pub(crate) fn new(state: Arc<Mutex<State>>, extent: vk::Extent2D) -> Self {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        Self {
            state,
            extent,
            min_images: 2,
            max_images: 3,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: srgb,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: srgb,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            lost: false,
            lost_recreations: 0,
            recreations: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            swapchains: HashMap::new(),
            created: 0,
        }
    }

    /// Resize the window behind the surface.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
    }

    pub fn set_formats(&mut self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.formats = formats;
    }

    pub fn set_present_modes(&mut self, modes: Vec<vk::PresentModeKHR>) {
        self.present_modes = modes;
    }

    /// Swapchain image count bounds; `max == 0` means unbounded.
    pub fn set_image_count_range(&mut self, min: u32, max: u32) {
        self.min_images = min;
        self.max_images = max;
    }

    /// The surface becomes unusable until recreated.
    pub fn lose_surface(&mut self) {
        self.lost = true;
    }

    /// The next `count` surface recreations produce a surface that is
    /// already lost again.
    pub fn fail_surface_recreation(&mut self, count: u32) {
        self.lost_recreations = count;
    }

    pub fn script_acquire(&mut self, outcome: ScriptedAcquire) {
        self.acquire_script.push_back(outcome);
    }

    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// How many times the surface was recreated.
    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    /// Live swapchains.
    pub fn swapchain_count(&self) -> usize {
        self.swapchains.len()
    }

    /// Swapchains created over the surface's lifetime.
    pub fn swapchains_created(&self) -> u32 {
        self.created
    }
}

impl PresentSurface for HeadlessSurface {
    fn capabilities(&self) -> Result<SurfaceCapabilities> {
        if self.lost {
            return Err(GpuError::SurfaceLost);
        }
        Ok(SurfaceCapabilities {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: self.min_images,
                max_image_count: self.max_images,
                current_extent: self.extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: self.formats.clone(),
            present_modes: self.present_modes.clone(),
        })
    }

    fn desired_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn set_desired_extent(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
    }

    fn recreate_surface(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if !self.swapchains.is_empty() {
            state.violation("surface recreated while a swapchain still exists".into());
        }
        self.recreations += 1;
        self.lost = self.lost_recreations > 0;
        self.lost_recreations = self.lost_recreations.saturating_sub(1);
        state.events.push(Event::SurfaceRecreated);
        Ok(())
    }

    fn create_swapchain(
        &mut self,
        info: &SwapchainInfo,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        if self.lost {
            return Err(GpuError::SurfaceLost);
        }
        let mut state = self.state.lock();
        if !self.swapchains.is_empty() {
            state.violation("second swapchain created on one surface".into());
        }
        let texel = format_texel_size(info.format.format).unwrap_or(4) as usize;
        let extent = vk::Extent3D {
            width: info.extent.width,
            height: info.extent.height,
            depth: 1,
        };

        self.created += 1;
        let handle: vk::SwapchainKHR = state.mint();
        let mut images = Vec::with_capacity(info.image_count as usize);
        for i in 0..info.image_count {
            let image: vk::Image = state.mint();
            let name = format!("swapchain {} image {i}", self.created);
            state
                .images
                .insert(image, ImageObject::new(name, extent, 1, 1, texel));
            images.push(image);
        }
        state.events.push(Event::SwapchainCreated {
            image_count: info.image_count,
            extent: info.extent,
            format: info.format.format,
        });

        self.swapchains.insert(
            handle,
            HeadlessSwapchain {
                acquired: vec![false; images.len()],
                images: images.clone(),
                next: 0,
            },
        );
        Ok((handle, images))
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        let Some(chain) = self.swapchains.remove(&swapchain) else {
            state.violation(format!("destroy of unknown swapchain {swapchain:?}"));
            return;
        };
        for image in chain.images {
            if state.image_in_use(image) {
                state.violation(format!(
                    "swapchain destroyed while {image:?} is still in use"
                ));
            }
            state.images.remove(&image);
        }
        state.events.push(Event::SwapchainDestroyed);
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        _timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        let suboptimal = match self.acquire_script.pop_front() {
            Some(ScriptedAcquire::OutOfDate) => return Ok(AcquireOutcome::OutOfDate),
            Some(ScriptedAcquire::SurfaceLost) => {
                self.lost = true;
                return Ok(AcquireOutcome::SurfaceLost);
            }
            Some(ScriptedAcquire::Error(result)) => return Err(GpuError::Vulkan(result)),
            Some(ScriptedAcquire::Suboptimal) => true,
            None => false,
        };
        if self.lost {
            return Ok(AcquireOutcome::SurfaceLost);
        }

        let mut state = self.state.lock();
        let Some(chain) = self.swapchains.get_mut(&swapchain) else {
            return Err(GpuError::InvalidState(format!(
                "acquire from unknown swapchain {swapchain:?}"
            )));
        };
        let count = chain.images.len();
        let Some(index) = (0..count)
            .map(|i| (chain.next + i) % count)
            .find(|&i| !chain.acquired[i])
        else {
            state.violation("every swapchain image is acquired; acquire would block".into());
            return Err(GpuError::Vulkan(vk::Result::TIMEOUT));
        };
        chain.acquired[index] = true;
        chain.next = (index + 1) % count;

        state.signal_semaphore(semaphore, "acquire");
        state.events.push(Event::Acquire {
            image_index: index as u32,
            semaphore,
        });
        Ok(AcquireOutcome::Acquired {
            image_index: index as u32,
            suboptimal,
        })
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> PresentOutcome {
        let mut state = self.state.lock();
        for &semaphore in wait_semaphores {
            state.consume_semaphore(semaphore, "present");
        }
        state.events.push(Event::Present {
            image_index,
            wait: wait_semaphores.to_vec(),
        });

        let image = match self.swapchains.get_mut(&swapchain) {
            None => {
                state.violation(format!("present to unknown swapchain {swapchain:?}"));
                return PresentOutcome::Failed(vk::Result::ERROR_UNKNOWN);
            }
            Some(chain) => match chain.acquired.get_mut(image_index as usize) {
                Some(acquired) if *acquired => {
                    *acquired = false;
                    chain.images[image_index as usize]
                }
                _ => {
                    state.violation(format!(
                        "present of swapchain image {image_index}, which was not acquired"
                    ));
                    return PresentOutcome::Failed(vk::Result::ERROR_UNKNOWN);
                }
            },
        };

        let outcome = match self.present_script.pop_front() {
            Some(outcome) => outcome,
            None if self.lost => PresentOutcome::SurfaceLost,
            None => PresentOutcome::Presented,
        };
        match outcome {
            PresentOutcome::Presented | PresentOutcome::Suboptimal => {
                let family = state.family(QueueKind::Present);
                state.queue.push_back(QueueOp::Present { family, image });
            }
            PresentOutcome::SurfaceLost => self.lost = true,
            PresentOutcome::OutOfDate | PresentOutcome::Failed(_) => {}
        }
        outcome
    }
}
