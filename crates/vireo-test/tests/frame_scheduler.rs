//! Frame scheduling over the headless surface: slot rotation, swapchain
//! rebuilds, surface loss and cross-queue presentation.

use ash::vk;
use std::sync::Arc;
use vireo_gpu::{
    DeviceRef, FrameContext, FrameScheduler, FrameSchedulerConfig, FrameState, GpuError,
    PresentOutcome,
};
use vireo_test::{Event, HeadlessDevice, HeadlessSurface, LiveObjects, ScriptedAcquire};

fn scheduler_with(
    headless: &Arc<HeadlessDevice>,
    surface: HeadlessSurface,
    config: FrameSchedulerConfig,
) -> FrameScheduler<HeadlessSurface> {
    let device: DeviceRef = headless.clone();
    FrameScheduler::new(device, surface, config).expect("scheduler")
}

fn setup(width: u32, height: u32) -> (Arc<HeadlessDevice>, FrameScheduler<HeadlessSurface>) {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let surface = headless.create_surface(width, height);
    let scheduler = scheduler_with(
        &headless,
        surface,
        FrameSchedulerConfig::new(vk::RenderPass::null()),
    );
    (headless, scheduler)
}

fn frame(scheduler: &mut FrameScheduler<HeadlessSurface>) -> FrameContext {
    scheduler
        .try_begin_frame()
        .expect("begin frame")
        .expect("a frame should be available")
}

fn run_frames(scheduler: &mut FrameScheduler<HeadlessSurface>, count: usize) {
    for _ in 0..count {
        frame(scheduler);
        assert!(scheduler.present_frame().expect("present"));
    }
}

#[test]
fn frames_rotate_through_slots() {
    let (headless, mut scheduler) = setup(800, 600);
    assert_eq!(scheduler.state(), FrameState::Idle);
    assert_eq!(scheduler.frames_in_flight(), 2);

    for i in 0..6u64 {
        let ctx = frame(&mut scheduler);
        assert_eq!(ctx.frame_slot, (i % 2) as usize);
        assert_eq!(ctx.image_index, (i % 2) as u32);
        assert_eq!(ctx.frame_number, i);
        assert_eq!((ctx.extent.width, ctx.extent.height), (800, 600));
        assert_eq!(scheduler.state(), FrameState::Recording);
        assert!(scheduler.present_frame().expect("present"));
        assert_eq!(scheduler.state(), FrameState::Idle);
    }

    // One fence wait per frame, nothing else blocks
    assert_eq!(headless.fence_waits(), 6);
    assert_eq!(scheduler.frame_number(), 6);
    headless.assert_no_violations();
}

#[test]
fn frame_submits_and_presents_in_order() {
    let (headless, mut scheduler) = setup(640, 480);
    headless.take_events();

    frame(&mut scheduler);
    scheduler.present_frame().expect("present");

    let events = headless.take_events();
    let semaphores: Vec<(&str, Vec<vk::Semaphore>, Vec<vk::Semaphore>)> = events
        .iter()
        .filter_map(|event| match event {
            Event::Acquire { semaphore, .. } => Some(("acquire", vec![], vec![*semaphore])),
            Event::Submit { wait, signal, .. } => Some(("submit", wait.clone(), signal.clone())),
            Event::Present { wait, .. } => Some(("present", wait.clone(), vec![])),
            _ => None,
        })
        .collect();

    assert_eq!(semaphores.len(), 3);
    let (acquire, submit, present) = (&semaphores[0], &semaphores[1], &semaphores[2]);
    assert_eq!((acquire.0, submit.0, present.0), ("acquire", "submit", "present"));
    assert_eq!(submit.1, acquire.2);
    assert_eq!(present.1, submit.2);
    headless.assert_no_violations();
}

#[test]
fn misuse_of_the_frame_cycle_is_rejected() {
    let (_headless, mut scheduler) = setup(320, 240);
    assert!(matches!(
        scheduler.present_frame(),
        Err(GpuError::InvalidState(_))
    ));

    frame(&mut scheduler);
    assert!(matches!(
        scheduler.try_begin_frame(),
        Err(GpuError::InvalidState(_))
    ));
    assert!(scheduler.present_frame().expect("present"));
}

#[test]
fn image_count_follows_buffering_and_surface_limits() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let config = FrameSchedulerConfig::new(vk::RenderPass::null()).with_buffering(3);

    let scheduler = scheduler_with(&headless, headless.create_surface(64, 64), config);
    assert_eq!(scheduler.frames_in_flight(), 3);
    drop(scheduler);

    let mut surface = headless.create_surface(64, 64);
    surface.set_image_count_range(2, 2);
    let mut scheduler = scheduler_with(&headless, surface, config);
    assert_eq!(scheduler.frames_in_flight(), 2);
    run_frames(&mut scheduler, 3);
    headless.assert_no_violations();
}

#[test]
fn out_of_date_acquire_rebuilds_and_skips_the_frame() {
    let (headless, mut scheduler) = setup(800, 600);
    run_frames(&mut scheduler, 3);

    scheduler
        .surface_mut()
        .script_acquire(ScriptedAcquire::OutOfDate);
    assert!(scheduler.try_begin_frame().expect("begin").is_none());
    assert_eq!(scheduler.state(), FrameState::Idle);
    assert_eq!(scheduler.surface().swapchains_created(), 2);
    assert_eq!(scheduler.surface().swapchain_count(), 1);

    let ctx = frame(&mut scheduler);
    assert_eq!(ctx.frame_slot, 0);
    assert!(scheduler.present_frame().expect("present"));
    headless.assert_no_violations();
}

#[test]
fn suboptimal_acquire_rebuilds_after_presenting() {
    let (headless, mut scheduler) = setup(800, 600);
    scheduler
        .surface_mut()
        .script_acquire(ScriptedAcquire::Suboptimal);

    frame(&mut scheduler);
    assert_eq!(scheduler.surface().swapchains_created(), 1);
    assert!(scheduler.present_frame().expect("present"));
    assert_eq!(scheduler.surface().swapchains_created(), 2);

    run_frames(&mut scheduler, 2);
    headless.assert_no_violations();
}

fn assert_matches_surface(
    scheduler: &FrameScheduler<HeadlessSurface>,
    width: u32,
    height: u32,
    images: usize,
) {
    assert_eq!(scheduler.extent(), Some(vk::Extent2D { width, height }));
    let swapchain = scheduler.swapchain().expect("swapchain");
    assert_eq!(swapchain.image_count(), images);
    assert_eq!(swapchain.framebuffers().len(), images);
    assert_eq!(scheduler.frames_in_flight(), images);
}

#[test]
fn rebuilds_follow_changed_surface_capabilities() {
    let (headless, mut scheduler) = setup(800, 600);
    assert_matches_surface(&scheduler, 800, 600, 2);
    run_frames(&mut scheduler, 3);

    // Out of date: the frame is skipped and the next one uses the new swapchain
    let surface = scheduler.surface_mut();
    surface.set_window_size(1280, 720);
    surface.set_image_count_range(3, 4);
    surface.script_acquire(ScriptedAcquire::OutOfDate);
    assert!(scheduler.try_begin_frame().expect("begin").is_none());
    assert_matches_surface(&scheduler, 1280, 720, 3);

    for slot in 0..3 {
        let ctx = frame(&mut scheduler);
        assert_eq!(ctx.frame_slot, slot);
        assert_eq!((ctx.extent.width, ctx.extent.height), (1280, 720));
        assert!(scheduler.present_frame().expect("present"));
    }

    // Suboptimal: the frame still renders at the old size, then the rebuild lands
    let surface = scheduler.surface_mut();
    surface.set_window_size(640, 480);
    surface.set_image_count_range(2, 2);
    surface.script_acquire(ScriptedAcquire::Suboptimal);
    let ctx = frame(&mut scheduler);
    assert_eq!((ctx.extent.width, ctx.extent.height), (1280, 720));
    assert!(scheduler.present_frame().expect("present"));
    assert_matches_surface(&scheduler, 640, 480, 2);

    run_frames(&mut scheduler, 4);
    assert_eq!(scheduler.surface().swapchain_count(), 1);
    assert_eq!(scheduler.surface().swapchains_created(), 3);
    headless.assert_no_violations();
}

#[test]
fn stale_present_reports_a_dropped_frame() {
    let (headless, mut scheduler) = setup(800, 600);

    scheduler
        .surface_mut()
        .script_present(PresentOutcome::OutOfDate);
    frame(&mut scheduler);
    assert!(!scheduler.present_frame().expect("present"));
    assert_eq!(scheduler.surface().swapchains_created(), 2);

    scheduler
        .surface_mut()
        .script_present(PresentOutcome::Failed(vk::Result::ERROR_UNKNOWN));
    frame(&mut scheduler);
    assert!(!scheduler.present_frame().expect("present"));
    // A plain failure is logged, not rebuilt
    assert_eq!(scheduler.surface().swapchains_created(), 2);

    run_frames(&mut scheduler, 4);
    headless.assert_no_violations();
}

#[test]
fn resize_rebuilds_before_the_next_frame() {
    let (headless, mut scheduler) = setup(800, 600);
    run_frames(&mut scheduler, 2);

    scheduler.resize(1024, 768);
    assert_eq!(scheduler.state(), FrameState::Invalidated);

    let ctx = frame(&mut scheduler);
    assert_eq!((ctx.extent.width, ctx.extent.height), (1024, 768));
    assert_eq!(ctx.frame_slot, 0);
    assert!(scheduler.present_frame().expect("present"));
    headless.assert_no_violations();
}

#[test]
fn zero_extent_waits_for_the_window_to_grow() {
    let (headless, mut scheduler) = setup(800, 600);
    run_frames(&mut scheduler, 1);

    scheduler.resize(0, 0);
    assert!(scheduler.try_begin_frame().expect("begin").is_none());
    assert_eq!(scheduler.state(), FrameState::Invalidated);
    assert!(scheduler.swapchain().is_none());
    assert!(scheduler.try_begin_frame().expect("begin").is_none());

    scheduler.resize(640, 360);
    let ctx = frame(&mut scheduler);
    assert_eq!((ctx.extent.width, ctx.extent.height), (640, 360));
    assert!(scheduler.present_frame().expect("present"));
    headless.assert_no_violations();
}

#[test]
fn scheduler_can_start_minimized() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let surface = headless.create_surface(0, 0);
    let mut scheduler = scheduler_with(
        &headless,
        surface,
        FrameSchedulerConfig::new(vk::RenderPass::null()),
    );
    assert_eq!(scheduler.state(), FrameState::Invalidated);
    assert!(scheduler.try_begin_frame().expect("begin").is_none());

    scheduler.surface_mut().set_window_size(200, 100);
    let ctx = frame(&mut scheduler);
    assert_eq!(ctx.extent.width, 200);
    assert!(scheduler.present_frame().expect("present"));
}

#[test]
fn lost_surface_is_recreated() {
    let (headless, mut scheduler) = setup(800, 600);
    run_frames(&mut scheduler, 2);

    scheduler
        .surface_mut()
        .script_acquire(ScriptedAcquire::SurfaceLost);
    assert!(scheduler.try_begin_frame().expect("begin").is_none());
    assert_eq!(scheduler.surface().recreations(), 1);
    assert!(!scheduler.surface().is_lost());

    run_frames(&mut scheduler, 2);

    scheduler
        .surface_mut()
        .script_present(PresentOutcome::SurfaceLost);
    frame(&mut scheduler);
    assert!(!scheduler.present_frame().expect("present"));
    assert_eq!(scheduler.surface().recreations(), 2);

    run_frames(&mut scheduler, 2);
    headless.assert_no_violations();
}

#[test]
fn surface_recreation_is_retried() {
    let (headless, mut scheduler) = setup(800, 600);
    scheduler.surface_mut().lose_surface();
    scheduler.surface_mut().fail_surface_recreation(2);

    assert!(scheduler.try_begin_frame().expect("begin").is_none());
    assert_eq!(scheduler.surface().recreations(), 3);
    assert_eq!(scheduler.state(), FrameState::Idle);

    run_frames(&mut scheduler, 2);
    headless.assert_no_violations();
}

#[test]
fn surface_recreation_gives_up_after_the_retry_limit() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let surface = headless.create_surface(800, 600);
    let config =
        FrameSchedulerConfig::new(vk::RenderPass::null()).with_surface_retry_limit(3);
    let mut scheduler = scheduler_with(&headless, surface, config);

    scheduler.surface_mut().lose_surface();
    scheduler.surface_mut().fail_surface_recreation(10);

    assert!(matches!(
        scheduler.try_begin_frame(),
        Err(GpuError::SurfaceLost)
    ));
    assert_eq!(scheduler.surface().recreations(), 4);
    assert_eq!(scheduler.state(), FrameState::Invalidated);
    assert!(scheduler.swapchain().is_none());
    headless.assert_no_violations();
}

#[test]
fn cross_queue_present_transfers_ownership() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::with_separate_present();
    let surface = headless.create_surface(800, 600);
    let mut scheduler = scheduler_with(
        &headless,
        surface,
        FrameSchedulerConfig::new(vk::RenderPass::null()),
    );

    run_frames(&mut scheduler, 6);

    // The first use of each image only hands it to the present queue; later
    // uses also take it back first.
    assert_eq!(headless.submissions(vireo_gpu::QueueKind::Present), 2 + 4 * 2);
    assert_eq!(headless.submissions(vireo_gpu::QueueKind::Graphics), 6);

    scheduler.device().wait_idle().expect("idle");
    let image = scheduler
        .swapchain()
        .expect("swapchain")
        .image(0)
        .image();
    assert_eq!(headless.image_owner(image, 0, 0), Some(1));
    assert_eq!(
        headless.image_layout(image, 0, 0),
        Some(vk::ImageLayout::PRESENT_SRC_KHR)
    );
    headless.assert_no_violations();
}

#[test]
fn cross_queue_present_survives_rebuilds() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::with_separate_present();
    let surface = headless.create_surface(800, 600);
    let mut scheduler = scheduler_with(
        &headless,
        surface,
        FrameSchedulerConfig::new(vk::RenderPass::null()).with_buffering(3),
    );

    run_frames(&mut scheduler, 4);
    scheduler.resize(400, 300);
    run_frames(&mut scheduler, 4);
    scheduler
        .surface_mut()
        .script_acquire(ScriptedAcquire::OutOfDate);
    assert!(scheduler.try_begin_frame().expect("begin").is_none());
    run_frames(&mut scheduler, 4);
    headless.assert_no_violations();
}

#[test]
fn preferences_trigger_a_rebuild() {
    let (headless, mut scheduler) = setup(800, 600);
    assert_eq!(scheduler.format(), Some(vk::Format::B8G8R8A8_SRGB));
    assert_eq!(scheduler.present_mode(), Some(vk::PresentModeKHR::MAILBOX));

    scheduler.set_preferred_format(Some(vk::Format::B8G8R8A8_UNORM));
    scheduler.set_present_mode(Some(vk::PresentModeKHR::FIFO));
    let ctx = frame(&mut scheduler);
    assert_eq!(ctx.format, vk::Format::B8G8R8A8_UNORM);
    assert_eq!(scheduler.present_mode(), Some(vk::PresentModeKHR::FIFO));
    assert!(scheduler.present_frame().expect("present"));

    // Setting the same preference again changes nothing
    scheduler.set_present_mode(Some(vk::PresentModeKHR::FIFO));
    assert_eq!(scheduler.state(), FrameState::Idle);
    headless.assert_no_violations();
}

#[test]
fn depth_attachment_is_shared_across_images() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let config =
        FrameSchedulerConfig::new(vk::RenderPass::null()).with_depth(vk::Format::D32_SFLOAT);
    let mut scheduler = scheduler_with(&headless, headless.create_surface(320, 200), config);

    let swapchain = scheduler.swapchain().expect("swapchain");
    assert!(swapchain.depth().is_some());
    assert_eq!(swapchain.framebuffers().len(), 2);
    // Two swapchain images plus the depth image
    assert_eq!(headless.live_objects().images, 3);

    run_frames(&mut scheduler, 2);
    headless.assert_no_violations();
}

#[test]
fn attachment_count_mismatch_fails_creation() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let config = FrameSchedulerConfig::new(vk::RenderPass::null()).with_attachment_count(2);
    let device: DeviceRef = headless.clone();
    let result = FrameScheduler::new(device, headless.create_surface(320, 200), config);

    assert!(matches!(
        result,
        Err(GpuError::AttachmentMismatch {
            expected: 2,
            actual: 1
        })
    ));
    assert_eq!(headless.live_objects(), LiveObjects::default());
}

#[test]
fn dropping_the_scheduler_releases_everything() {
    let (headless, mut scheduler) = setup(800, 600);
    run_frames(&mut scheduler, 5);
    drop(scheduler);

    assert_eq!(headless.live_objects(), LiveObjects::default());
    assert_eq!(headless.pending_submissions(), 0);
    headless.assert_no_violations();
}

#[test]
fn missing_frame_command_buffer_fails_creation() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    headless.return_no_command_buffers();
    let device: DeviceRef = headless.clone();
    let result = FrameScheduler::new(
        device,
        headless.create_surface(320, 200),
        FrameSchedulerConfig::new(vk::RenderPass::null()),
    );

    assert!(matches!(result, Err(GpuError::Other(_))));
    assert_eq!(headless.live_objects(), LiveObjects::default());
}
