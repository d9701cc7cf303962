//! Per-frame data handed to the application.

use ash::vk;
use vireo_gpu::FrameContext;

/// The frame being recorded.
pub struct Frame {
    /// Command buffer, framebuffer and image of this frame.
    pub gpu: FrameContext,
    /// Seconds since the previous frame.
    pub dt: f32,
}

impl Frame {
    pub(crate) fn new(gpu: FrameContext, dt: f32) -> Self {
        Self { gpu, dt }
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.gpu.command_buffer
    }

    /// Slot index in `0..frames_in_flight`, for per-frame resources.
    pub fn slot(&self) -> usize {
        self.gpu.frame_slot
    }

    pub fn frame_number(&self) -> u64 {
        self.gpu.frame_number
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.gpu.extent
    }
}
