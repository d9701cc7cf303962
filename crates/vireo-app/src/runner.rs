//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use vireo_gpu::GpuDevice;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::RhiApp;
use crate::context::AppContext;
use crate::frame::Frame;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Force FIFO presentation.
    pub vsync: bool,
    /// Requested swapchain images, and so frames in flight.
    pub buffering: u32,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Vireo".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: false,
            buffering: 2,
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_buffering(mut self, images: u32) -> Self {
        self.buffering = images;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Run an [`RhiApp`] until its window closes.
///
/// Installs the `tracing` subscriber (`RUST_LOG`, default `info`), creates
/// the window, device and frame scheduler, and drives the event loop.
pub fn run_app<A: RhiApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
    }

    Ok(())
}

struct AppRunner<A: RhiApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

struct AppState<A: RhiApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    skipped_frames: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: RhiApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e:#}");
                        if let Some(mut state) = self.state.take() {
                            state.cleanup();
                        }
                        event_loop.exit();
                        return;
                    }
                    state.ctx.window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e:#}");
                    }
                }
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let Some(state) = &mut self.state {
            state.app.on_device_event(device_id, &event);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: RhiApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut ctx = AppContext::new(window, &self.config)?;
        let app = A::init(&mut ctx)?;

        let target_frame_time = self
            .config
            .target_fps
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1))));

        Ok(AppState {
            ctx,
            app,
            target_frame_time,
            skipped_frames: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }
}

impl<A: RhiApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
        }

        self.app.update(&self.ctx, dt);

        let Some(gpu_frame) = self.ctx.scheduler.try_begin_frame()? else {
            // Stale swapchain or minimized window; nothing to record.
            self.skipped_frames += 1;
            return Ok(());
        };

        let mut frame = Frame::new(gpu_frame, dt);
        let rendered = {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.record").entered();
            self.app.render(&self.ctx, &mut frame)
        };

        // Present even if recording failed so the scheduler returns to idle.
        let presented = self.ctx.scheduler.present_frame()?;
        rendered?;
        if presented {
            self.ctx.frame_count += 1;
        } else {
            debug!(frame = frame.frame_number(), "frame was not presented");
        }

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.ctx.scheduler.resize(width, height);
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.app.on_resize(&mut self.ctx, width, height)?;
        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.ctx.frame_count > 0 {
            let avg_fps = self.fps_sum / self.ctx.frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.frame_count);
            info!("  Skipped frames: {}", self.skipped_frames);
        }

        if let Err(e) = self.ctx.vulkan().wait_idle() {
            error!("Failed to wait idle: {e}");
        }
        self.app.cleanup(&mut self.ctx);
        info!("Cleanup complete");
    }
}
