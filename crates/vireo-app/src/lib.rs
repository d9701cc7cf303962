//! Application framework for the Vireo RHI.
//!
//! Handles the boilerplate around the RHI core:
//! - Window creation and the winit event loop
//! - Vulkan device and surface creation
//! - A clear-and-present render pass matching the surface format
//! - Frame scheduling through [`vireo_gpu::FrameScheduler`]
//!
//! # Example
//!
//! ```no_run
//! use vireo_app::{run_app, AppConfig, AppContext, Frame, RhiApp};
//!
//! struct MyApp;
//!
//! impl RhiApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, ctx: &AppContext, frame: &mut Frame) -> anyhow::Result<()> {
//!         ctx.begin_render_pass(frame, [0.1, 0.2, 0.3, 1.0]);
//!         ctx.end_render_pass(frame);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::RhiApp;
pub use context::AppContext;
pub use frame::Frame;
pub use runner::{run_app, AppConfig};

pub use winit::event::{DeviceEvent, DeviceId, WindowEvent};
