//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use vireo_gpu::surface::select_surface_format;
use vireo_gpu::{
    DeviceRef, FrameScheduler, FrameSchedulerConfig, GpuDevice, PresentSurface, QueueKind,
    StagingCoordinator, SubmitInfo, VulkanDevice, VulkanDeviceBuilder, VulkanSurface,
};
use winit::window::Window;

use crate::frame::Frame;
use crate::runner::AppConfig;

/// Single-subpass render pass clearing one color attachment.
///
/// The scheduler moves the swapchain image into and out of
/// `COLOR_ATTACHMENT_OPTIMAL`, so the pass neither starts from `UNDEFINED`
/// nor ends in `PRESENT_SRC_KHR`.
struct ClearPass {
    device: Arc<VulkanDevice>,
    raw: vk::RenderPass,
}

impl ClearPass {
    fn new(device: Arc<VulkanDevice>, format: vk::Format) -> anyhow::Result<Self> {
        let attachments = [vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);

        // SAFETY: the device is live and the create info borrows locals only.
        let raw = unsafe { device.raw().create_render_pass(&info, None)? };
        Ok(Self { device, raw })
    }
}

impl Drop for ClearPass {
    fn drop(&mut self) {
        // SAFETY: dropped after the scheduler, which waited for the device
        // to go idle and destroyed every framebuffer using the pass.
        unsafe { self.device.raw().destroy_render_pass(self.raw, None) };
    }
}

/// Application context shared across all app methods.
pub struct AppContext {
    pub window: Arc<Window>,
    /// Frame scheduler over the window's surface. Declared before the render
    /// pass so its framebuffers go first.
    pub scheduler: FrameScheduler<VulkanSurface<Window>>,
    /// Records uploads on the graphics queue, inside the frame's command buffer.
    pub staging: StagingCoordinator,
    clear_pass: ClearPass,
    device: Arc<VulkanDevice>,
    pub(crate) last_frame_time: Instant,
    /// Frames actually rendered (skipped frames excluded).
    pub frame_count: u64,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        let (device, mut surface) = VulkanDeviceBuilder::new()
            .app_name(config.title.clone())
            .validation(config.validation)
            .build_for_window(window.clone())?;
        tracing::info!("GPU: {}", device.adapter().summary());

        let size = window.inner_size();
        surface.set_desired_extent(vk::Extent2D {
            width: size.width,
            height: size.height,
        });

        // The render pass is tied to one format, so pin the scheduler to it.
        let format = select_surface_format(&surface.capabilities()?.formats, None)?;
        let clear_pass = ClearPass::new(device.clone(), format.format)?;

        let mut scheduler_config = FrameSchedulerConfig::new(clear_pass.raw)
            .with_buffering(config.buffering)
            .with_preferred_format(format.format);
        if config.vsync {
            scheduler_config = scheduler_config.with_present_mode(vk::PresentModeKHR::FIFO);
        }

        let device_ref: DeviceRef = device.clone();
        let scheduler = FrameScheduler::new(device_ref.clone(), surface, scheduler_config)?;
        let staging = StagingCoordinator::new(device_ref);

        Ok(Self {
            window,
            scheduler,
            staging,
            clear_pass,
            device,
            last_frame_time: Instant::now(),
            frame_count: 0,
        })
    }

    /// Device as the RHI trait object.
    pub fn device(&self) -> DeviceRef {
        self.device.clone()
    }

    /// The Vulkan device, for raw `ash` calls.
    pub fn vulkan(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.clear_pass.raw
    }

    /// Current swapchain extent, or the window size while there is none.
    pub fn extent(&self) -> vk::Extent2D {
        self.scheduler.extent().unwrap_or_else(|| {
            let size = self.window.inner_size();
            vk::Extent2D {
                width: size.width,
                height: size.height,
            }
        })
    }

    pub fn width(&self) -> u32 {
        self.extent().width
    }

    pub fn height(&self) -> u32 {
        self.extent().height
    }

    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    pub fn frames_in_flight(&self) -> usize {
        self.scheduler.frames_in_flight()
    }

    /// Record into a throwaway graphics command buffer, submit it and wait.
    ///
    /// For uploads made outside the frame loop, such as during `init`.
    pub fn submit_now<F>(&self, record: F) -> anyhow::Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> anyhow::Result<()>,
    {
        let device = self.device.as_ref();
        let pool = device.create_command_pool(QueueKind::Graphics)?;
        let result = (|| {
            let cb = device.allocate_command_buffers(pool, 1)?[0];
            let fence = device.create_fence(false)?;
            let submitted = (|| {
                device.begin_command_buffer(cb)?;
                record(cb)?;
                device.end_command_buffer(cb)?;
                device.submit(
                    QueueKind::Graphics,
                    &SubmitInfo {
                        command_buffers: &[cb],
                        wait_semaphores: &[],
                        wait_stages: &[],
                        signal_semaphores: &[],
                        fence,
                    },
                )?;
                device.wait_for_fence(fence, u64::MAX)?;
                anyhow::Ok(())
            })();
            if submitted.is_err() {
                // A failed wait may leave work queued that still uses the pool.
                let _ = device.wait_idle();
            }
            device.destroy_fence(fence);
            submitted
        })();
        device.destroy_command_pool(pool);
        result
    }

    /// Begin the clear pass on the frame's framebuffer.
    pub fn begin_render_pass(&self, frame: &Frame, clear_color: [f32; 4]) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(self.clear_pass.raw)
            .framebuffer(frame.gpu.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: frame.extent(),
            })
            .clear_values(&clear_values);

        // SAFETY: the command buffer is recording and the framebuffer was
        // created for this render pass.
        unsafe {
            self.device.raw().cmd_begin_render_pass(
                frame.command_buffer(),
                &info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self, frame: &Frame) {
        // SAFETY: paired with `begin_render_pass` on the same command buffer.
        unsafe { self.device.raw().cmd_end_render_pass(frame.command_buffer()) };
    }
}
