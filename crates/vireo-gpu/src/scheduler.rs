//! Swapchain frame scheduling.
//!
//! [`FrameScheduler`] drives the acquire / record / present cycle over a
//! [`PresentSurface`], with one set of [`FrameResources`] per swapchain image.
//! The only CPU wait per frame is on the reused slot's fence. Swapchain
//! staleness is handled by rebuilding in place and skipping the frame.
//!
//! When the present queue family differs from the graphics family, the
//! swapchain image is moved between the two with queue ownership transfers
//! chained by semaphores.

use crate::barrier::{BarrierPlan, Transition};
use crate::device::{DeviceRef, QueueKind, SubmitInfo};
use crate::error::{GpuError, Result};
use crate::surface::{
    calculate_extent, choose_image_count, select_present_mode, select_surface_format,
    AcquireOutcome, PresentOutcome, PresentSurface, SwapchainInfo,
};
use crate::swapchain::Swapchain;
use crate::sync::FrameResources;
use ash::vk;

/// Lifecycle of the scheduler between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Presenting,
    /// The swapchain must be rebuilt before the next frame.
    Invalidated,
}

/// Frame scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct FrameSchedulerConfig {
    /// Requested swapchain image count (2 or 3), clamped to the surface.
    pub buffering: u32,
    pub preferred_format: Option<vk::Format>,
    pub preferred_present_mode: Option<vk::PresentModeKHR>,
    /// Render pass the per-image framebuffers are created for.
    pub render_pass: vk::RenderPass,
    /// Attachment count of `render_pass`.
    pub attachment_count: u32,
    /// Format of the shared depth attachment, if any.
    pub depth_format: Option<vk::Format>,
    /// How many times a lost surface is recreated during one rebuild.
    pub surface_retry_limit: u32,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            buffering: 2,
            preferred_format: None,
            preferred_present_mode: None,
            render_pass: vk::RenderPass::null(),
            attachment_count: 1,
            depth_format: None,
            surface_retry_limit: 3,
        }
    }
}

impl FrameSchedulerConfig {
    pub fn new(render_pass: vk::RenderPass) -> Self {
        Self {
            render_pass,
            ..Self::default()
        }
    }

    /// Double (2) or triple (3) buffering.
    pub fn with_buffering(mut self, images: u32) -> Self {
        self.buffering = images.clamp(2, 3);
        self
    }

    pub fn with_preferred_format(mut self, format: vk::Format) -> Self {
        self.preferred_format = Some(format);
        self
    }

    pub fn with_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.preferred_present_mode = Some(mode);
        self
    }

    /// Add a shared depth attachment; the render pass gets a second attachment.
    pub fn with_depth(mut self, format: vk::Format) -> Self {
        self.depth_format = Some(format);
        self.attachment_count = 2;
        self
    }

    pub fn with_attachment_count(mut self, count: u32) -> Self {
        self.attachment_count = count;
        self
    }

    pub fn with_surface_retry_limit(mut self, attempts: u32) -> Self {
        self.surface_retry_limit = attempts;
        self
    }
}

/// Everything needed to record one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub framebuffer: vk::Framebuffer,
    pub image_index: u32,
    pub frame_slot: usize,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub frame_number: u64,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    image_index: u32,
    slot: usize,
    /// What the graphics submission waits on before color output.
    wait_semaphore: vk::Semaphore,
}

enum Rebuild {
    Ready,
    ZeroExtent,
}

/// Swapchain frame scheduler.
pub struct FrameScheduler<S: PresentSurface> {
    device: DeviceRef,
    surface: S,
    config: FrameSchedulerConfig,
    state: FrameState,
    swapchain: Option<Swapchain>,
    frames: Vec<FrameResources>,
    graphics_pool: vk::CommandPool,
    present_pool: Option<vk::CommandPool>,
    current_slot: usize,
    frame_number: u64,
    in_flight: Option<InFlight>,
    rebuild_pending: bool,
}

impl<S: PresentSurface> FrameScheduler<S> {
    /// Create the scheduler and its first swapchain.
    ///
    /// If the surface currently has zero area the scheduler starts out
    /// [`FrameState::Invalidated`] and builds the swapchain once it grows.
    pub fn new(device: DeviceRef, surface: S, config: FrameSchedulerConfig) -> Result<Self> {
        let families = device.queue_families();
        let graphics_pool = device.create_command_pool(QueueKind::Graphics)?;
        let present_pool = if families.present_is_separate() {
            match device.create_command_pool(QueueKind::Present) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    device.destroy_command_pool(graphics_pool);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let mut scheduler = Self {
            device,
            surface,
            config,
            state: FrameState::Invalidated,
            swapchain: None,
            frames: Vec::new(),
            graphics_pool,
            present_pool,
            current_slot: 0,
            frame_number: 0,
            in_flight: None,
            rebuild_pending: false,
        };
        scheduler.recreate()?;
        Ok(scheduler)
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn config(&self) -> &FrameSchedulerConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// Slot the next frame will use.
    pub fn frame_slot(&self) -> usize {
        self.current_slot
    }

    /// Frames presented (or attempted) so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Number of frames in flight, equal to the swapchain image count.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(Swapchain::extent)
    }

    pub fn format(&self) -> Option<vk::Format> {
        self.swapchain.as_ref().map(|s| s.format().format)
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.swapchain.as_ref().map(Swapchain::present_mode)
    }

    /// Request a rebuild before the next frame.
    pub fn invalidate(&mut self) {
        if self.state == FrameState::Recording {
            self.rebuild_pending = true;
        } else {
            self.state = FrameState::Invalidated;
        }
    }

    /// Window resized: remember the new size and rebuild before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface
            .set_desired_extent(vk::Extent2D { width, height });
        self.invalidate();
    }

    pub fn set_preferred_format(&mut self, format: Option<vk::Format>) {
        if self.config.preferred_format != format {
            self.config.preferred_format = format;
            self.invalidate();
        }
    }

    pub fn set_present_mode(&mut self, mode: Option<vk::PresentModeKHR>) {
        if self.config.preferred_present_mode != mode {
            self.config.preferred_present_mode = mode;
            self.invalidate();
        }
    }

    /// Begin a frame.
    ///
    /// Returns `Ok(None)` when no frame can be rendered right now: the
    /// swapchain was stale and has been rebuilt, or the window has zero area.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn try_begin_frame(&mut self) -> Result<Option<FrameContext>> {
        match self.state {
            FrameState::Idle | FrameState::Invalidated => {}
            state => {
                return Err(GpuError::InvalidState(format!(
                    "try_begin_frame called while {state:?}"
                )))
            }
        }

        if self.state == FrameState::Invalidated || self.swapchain.is_none() {
            self.recreate()?;
            if self.state == FrameState::Invalidated {
                return Ok(None);
            }
        }

        let result = self.begin_frame_inner();
        if result.is_err() {
            self.state = FrameState::Invalidated;
        }
        result
    }

    fn begin_frame_inner(&mut self) -> Result<Option<FrameContext>> {
        self.state = FrameState::Acquiring;
        let slot = self.current_slot;
        let device = self.device.clone();
        let families = device.queue_families();

        let frame = &self.frames[slot];
        let (image_available, cb, fence, handoff) = (
            frame.image_available,
            frame.command_buffer,
            frame.in_flight,
            frame.handoff,
        );
        let swapchain_handle = self.swapchain_ref()?.handle();

        device.wait_for_fence(fence, u64::MAX)?;

        let outcome =
            self.surface
                .acquire_next_image(swapchain_handle, image_available, u64::MAX)?;
        let image_index = match outcome {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    self.rebuild_pending = true;
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                tracing::debug!("swapchain out of date on acquire, rebuilding");
                self.rebuild(false)?;
                return Ok(None);
            }
            AcquireOutcome::SurfaceLost => {
                tracing::warn!("surface lost on acquire, rebuilding");
                self.rebuild(true)?;
                return Ok(None);
            }
        };

        device.reset_fence(fence)?;
        device.reset_command_buffer(cb)?;
        device.begin_command_buffer(cb)?;

        let swapchain = self.swapchain_mut()?;
        let extent = swapchain.extent();
        let format = swapchain.format().format;
        let framebuffer = swapchain.framebuffer(image_index as usize);
        let image = swapchain.image_mut(image_index as usize);
        image.discard_contents(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let mut wait_semaphore = image_available;
        match image.transition_all(&Transition::color_attachment(families.graphics)) {
            BarrierPlan::Local(barrier) => barrier.record(device.as_ref(), cb),
            BarrierPlan::Transfer(transfer) => {
                let handoff = handoff.ok_or_else(|| {
                    GpuError::InvalidState("cross-queue image without present handoff".into())
                })?;
                let (release, acquire) = transfer.into_halves();
                device.reset_command_buffer(handoff.release_cb)?;
                device.begin_command_buffer(handoff.release_cb)?;
                release.record(device.as_ref(), handoff.release_cb);
                device.end_command_buffer(handoff.release_cb)?;
                device.submit(
                    QueueKind::Present,
                    &SubmitInfo {
                        command_buffers: &[handoff.release_cb],
                        wait_semaphores: &[image_available],
                        wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                        signal_semaphores: &[handoff.to_graphics],
                        fence: vk::Fence::null(),
                    },
                )?;
                acquire.record(device.as_ref(), cb);
                wait_semaphore = handoff.to_graphics;
            }
        }

        self.in_flight = Some(InFlight {
            image_index,
            slot,
            wait_semaphore,
        });
        self.state = FrameState::Recording;

        Ok(Some(FrameContext {
            command_buffer: cb,
            framebuffer,
            image_index,
            frame_slot: slot,
            extent,
            format,
            frame_number: self.frame_number,
        }))
    }

    /// Submit the recorded frame and present it.
    ///
    /// Returns `Ok(false)` if the image was not presented cleanly; the
    /// swapchain has then been rebuilt (or the failure logged) and the next
    /// frame proceeds normally.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present_frame(&mut self) -> Result<bool> {
        if self.state != FrameState::Recording {
            return Err(GpuError::InvalidState(format!(
                "present_frame called while {:?}",
                self.state
            )));
        }
        let Some(in_flight) = self.in_flight.take() else {
            self.state = FrameState::Invalidated;
            return Err(GpuError::InvalidState("no frame in flight".into()));
        };

        let submitted = self.submit_frame(in_flight);
        let present_wait = match submitted {
            Ok(semaphore) => semaphore,
            Err(e) => {
                self.state = FrameState::Invalidated;
                return Err(e);
            }
        };

        let swapchain_handle = self.swapchain_ref()?.handle();
        let outcome =
            self.surface
                .present(swapchain_handle, in_flight.image_index, &[present_wait]);

        self.current_slot = (in_flight.slot + 1) % self.frames.len();
        self.frame_number += 1;
        self.state = FrameState::Idle;

        match outcome {
            PresentOutcome::Presented => {
                if self.rebuild_pending {
                    self.rebuild(false)?;
                }
                Ok(true)
            }
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                tracing::debug!(?outcome, "rebuilding swapchain after present");
                self.rebuild(false)?;
                Ok(false)
            }
            PresentOutcome::SurfaceLost => {
                tracing::warn!("surface lost on present, rebuilding");
                self.rebuild(true)?;
                Ok(false)
            }
            PresentOutcome::Failed(e) => {
                tracing::warn!("present failed: {e}");
                Ok(false)
            }
        }
    }

    /// Record the hand-off to the present queue, end and submit. Returns the
    /// semaphore present must wait on.
    fn submit_frame(&mut self, in_flight: InFlight) -> Result<vk::Semaphore> {
        self.state = FrameState::Presenting;
        let device = self.device.clone();
        let families = device.queue_families();
        let frame = &self.frames[in_flight.slot];
        let (cb, render_finished, fence, handoff) = (
            frame.command_buffer,
            frame.render_finished,
            frame.in_flight,
            frame.handoff,
        );

        let image = self
            .swapchain_mut()?
            .image_mut(in_flight.image_index as usize);
        let plan = image.transition_all(&Transition::present(families.present));

        let graphics_submit = |fence: vk::Fence| -> Result<()> {
            device.end_command_buffer(cb)?;
            device.submit(
                QueueKind::Graphics,
                &SubmitInfo {
                    command_buffers: &[cb],
                    wait_semaphores: &[in_flight.wait_semaphore],
                    wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                    signal_semaphores: &[render_finished],
                    fence,
                },
            )
        };

        match plan {
            BarrierPlan::Local(barrier) => {
                barrier.record(device.as_ref(), cb);
                graphics_submit(fence)?;
                Ok(render_finished)
            }
            BarrierPlan::Transfer(transfer) => {
                let handoff = handoff.ok_or_else(|| {
                    GpuError::InvalidState("cross-queue image without present handoff".into())
                })?;
                let (release, acquire) = transfer.into_halves();
                release.record(device.as_ref(), cb);
                graphics_submit(vk::Fence::null())?;

                device.reset_command_buffer(handoff.acquire_cb)?;
                device.begin_command_buffer(handoff.acquire_cb)?;
                acquire.record(device.as_ref(), handoff.acquire_cb);
                device.end_command_buffer(handoff.acquire_cb)?;
                device.submit(
                    QueueKind::Present,
                    &SubmitInfo {
                        command_buffers: &[handoff.acquire_cb],
                        wait_semaphores: &[render_finished],
                        wait_stages: &[vk::PipelineStageFlags::ALL_COMMANDS],
                        signal_semaphores: &[handoff.present_ready],
                        fence,
                    },
                )?;
                Ok(handoff.present_ready)
            }
        }
    }

    /// Tear down and rebuild the swapchain and every frame resource.
    pub fn recreate(&mut self) -> Result<()> {
        self.rebuild(false)
    }

    fn rebuild(&mut self, surface_lost: bool) -> Result<()> {
        self.device.wait_idle()?;
        self.teardown();
        self.rebuild_pending = false;
        self.in_flight = None;
        self.current_slot = 0;

        if surface_lost {
            self.surface.recreate_surface()?;
        }

        let mut attempts = 0;
        loop {
            match self.build() {
                Ok(Rebuild::Ready) => {
                    self.state = FrameState::Idle;
                    return Ok(());
                }
                Ok(Rebuild::ZeroExtent) => {
                    tracing::debug!("surface has zero extent, waiting for resize");
                    self.state = FrameState::Invalidated;
                    return Ok(());
                }
                Err(GpuError::SurfaceLost) if attempts < self.config.surface_retry_limit => {
                    attempts += 1;
                    tracing::warn!(attempt = attempts, "surface lost during rebuild, recreating");
                    self.teardown();
                    if let Err(e) = self.surface.recreate_surface() {
                        self.state = FrameState::Invalidated;
                        return Err(e);
                    }
                }
                Err(e) => {
                    self.teardown();
                    self.state = FrameState::Invalidated;
                    return Err(e);
                }
            }
        }
    }

    fn build(&mut self) -> Result<Rebuild> {
        let caps = self.surface.capabilities()?;
        let extent = calculate_extent(&caps.capabilities, self.surface.desired_extent());
        if extent.width == 0 || extent.height == 0 {
            return Ok(Rebuild::ZeroExtent);
        }

        let info = SwapchainInfo {
            format: select_surface_format(&caps.formats, self.config.preferred_format)?,
            present_mode: select_present_mode(
                &caps.present_modes,
                self.config.preferred_present_mode,
            ),
            extent,
            image_count: choose_image_count(&caps.capabilities, self.config.buffering),
            transform: caps.capabilities.current_transform,
        };

        let swapchain = Swapchain::new(
            self.device.clone(),
            &mut self.surface,
            &info,
            self.config.render_pass,
            self.config.attachment_count,
            self.config.depth_format,
        )?;
        let image_count = swapchain.image_count();
        self.swapchain = Some(swapchain);

        for _ in 0..image_count {
            let frame =
                FrameResources::new(self.device.clone(), self.graphics_pool, self.present_pool)?;
            self.frames.push(frame);
        }
        Ok(Rebuild::Ready)
    }

    fn teardown(&mut self) {
        self.frames.clear();
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy(&mut self.surface);
        }
    }

    fn swapchain_ref(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("no swapchain".into()))
    }

    fn swapchain_mut(&mut self) -> Result<&mut Swapchain> {
        self.swapchain
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("no swapchain".into()))
    }
}

impl<S: PresentSurface> Drop for FrameScheduler<S> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("wait_idle failed while dropping frame scheduler: {e}");
        }
        self.teardown();
        if let Some(pool) = self.present_pool.take() {
            self.device.destroy_command_pool(pool);
        }
        self.device.destroy_command_pool(self.graphics_pool);
    }
}
