//! Per-frame synchronization resources.

use crate::device::DeviceRef;
use crate::error::{GpuError, Result};
use ash::vk;

/// Present-queue objects used when presentation happens on a different
/// queue family than rendering.
///
/// The swapchain image travels present -> graphics at the start of a frame
/// and graphics -> present at the end; each leg needs a present-family
/// command buffer for its half of the ownership transfer.
#[derive(Debug, Clone, Copy)]
pub struct PresentHandoff {
    /// Releases the acquired image to the graphics queue.
    pub release_cb: vk::CommandBuffer,
    /// Acquires the rendered image back on the present queue.
    pub acquire_cb: vk::CommandBuffer,
    /// Signaled by the release submission, waited on by the graphics submission.
    pub to_graphics: vk::Semaphore,
    /// Signaled by the acquire submission, waited on by present.
    pub present_ready: vk::Semaphore,
}

/// Frame synchronization resources for one frame in flight.
///
/// Destroyed on drop; a partially constructed value cleans up whatever was
/// created before the failure.
pub struct FrameResources {
    device: DeviceRef,
    graphics_pool: vk::CommandPool,
    present_pool: vk::CommandPool,
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Graphics command buffer recorded each frame
    pub command_buffer: vk::CommandBuffer,
    /// Fence to wait for frame completion
    pub in_flight: vk::Fence,
    /// Present-family objects, when presentation is cross-queue
    pub handoff: Option<PresentHandoff>,
}

impl FrameResources {
    /// Create the resources for one frame slot. `present_pool` is given
    /// only when the present queue family differs from graphics.
    pub fn new(
        device: DeviceRef,
        graphics_pool: vk::CommandPool,
        present_pool: Option<vk::CommandPool>,
    ) -> Result<Self> {
        let mut frame = Self {
            device,
            graphics_pool,
            present_pool: present_pool.unwrap_or_default(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            command_buffer: vk::CommandBuffer::null(),
            in_flight: vk::Fence::null(),
            handoff: None,
        };

        frame.image_available = frame.device.create_semaphore()?;
        frame.render_finished = frame.device.create_semaphore()?;
        frame.in_flight = frame.device.create_fence(true)?;
        frame.command_buffer = frame
            .device
            .allocate_command_buffers(graphics_pool, 1)?
            .pop()
            .ok_or_else(|| GpuError::Other("no frame command buffer allocated".into()))?;

        if let Some(pool) = present_pool {
            let buffers = frame.device.allocate_command_buffers(pool, 2)?;
            let &[release_cb, acquire_cb] = buffers.as_slice() else {
                return Err(GpuError::Other("expected two present command buffers".into()));
            };
            let mut handoff = PresentHandoff {
                release_cb,
                acquire_cb,
                to_graphics: vk::Semaphore::null(),
                present_ready: vk::Semaphore::null(),
            };
            // Record the buffers first so they are freed if a semaphore fails.
            frame.handoff = Some(handoff);
            handoff.to_graphics = frame.device.create_semaphore()?;
            frame.handoff = Some(handoff);
            handoff.present_ready = frame.device.create_semaphore()?;
            frame.handoff = Some(handoff);
        }

        Ok(frame)
    }

    /// Wait for this frame to be available.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait(&self) -> Result<()> {
        self.device.wait_for_fence(self.in_flight, u64::MAX)
    }

    /// Reset the fence for the next frame.
    pub fn reset(&self) -> Result<()> {
        self.device.reset_fence(self.in_flight)
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        let device = &self.device;
        if let Some(handoff) = self.handoff.take() {
            device.free_command_buffers(
                self.present_pool,
                &[handoff.release_cb, handoff.acquire_cb],
            );
            if handoff.to_graphics != vk::Semaphore::null() {
                device.destroy_semaphore(handoff.to_graphics);
            }
            if handoff.present_ready != vk::Semaphore::null() {
                device.destroy_semaphore(handoff.present_ready);
            }
        }
        if self.command_buffer != vk::CommandBuffer::null() {
            device.free_command_buffers(self.graphics_pool, &[self.command_buffer]);
        }
        if self.in_flight != vk::Fence::null() {
            device.destroy_fence(self.in_flight);
        }
        if self.render_finished != vk::Semaphore::null() {
            device.destroy_semaphore(self.render_finished);
        }
        if self.image_available != vk::Semaphore::null() {
            device.destroy_semaphore(self.image_available);
        }
    }
}
