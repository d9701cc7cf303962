//! `RhiApp` trait definition.

use crate::context::AppContext;
use crate::frame::Frame;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};

/// Trait for applications driven by [`crate::run_app`].
///
/// The framework owns the window, the device and the frame scheduler. The
/// application records into the frame's command buffer between acquire and
/// present.
pub trait RhiApp: Sized {
    /// Called once after the window, device and scheduler exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Advance application state by `dt` seconds. Called before `render`.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record the frame.
    ///
    /// The swapchain image is already in `COLOR_ATTACHMENT_OPTIMAL` and is
    /// moved to presentation after this returns. Skipped frames (stale
    /// swapchain, minimized window) never reach this method.
    fn render(&mut self, ctx: &AppContext, frame: &mut Frame) -> anyhow::Result<()>;

    /// The window was resized to a non-zero size. The swapchain is rebuilt
    /// before the next frame; size-dependent resources belong here.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return `true` to stop the framework from handling `event`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    #[allow(unused_variables)]
    fn on_device_event(&mut self, device_id: DeviceId, event: &DeviceEvent) {}

    /// Called before shutdown with the device idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
