//! Per-frame buffers retired through the deferred deletion queue are never
//! destroyed while a frame still uses them.

use ash::vk;
use vireo_gpu::resource::{Buffer, BufferDesc, EarliestUse};
use vireo_gpu::{
    DeferredDeletionQueue, DeviceRef, FrameScheduler, FrameSchedulerConfig, StagingCoordinator,
};
use vireo_test::{HeadlessDevice, LiveObjects};

fn frame_uniforms(device: &DeviceRef, frame: u64) -> Buffer {
    Buffer::new(
        device.clone(),
        &BufferDesc::elements(format!("frame {frame} uniforms"), 64, 1)
            .earliest_use(EarliestUse::uniform(vk::PipelineStageFlags::VERTEX_SHADER)),
    )
    .expect("buffer")
}

#[test]
fn retired_buffers_outlive_their_frames() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let device: DeviceRef = headless.clone();
    let surface = headless.create_surface(320, 240);
    let mut scheduler = FrameScheduler::new(
        device.clone(),
        surface,
        FrameSchedulerConfig::new(vk::RenderPass::null()),
    )
    .expect("scheduler");
    let staging = StagingCoordinator::new(device.clone());
    let mut retired = DeferredDeletionQueue::new(scheduler.frames_in_flight());
    let mut dropped = 0;

    for i in 0..8u64 {
        if i == 4 {
            scheduler.resize(640, 480);
        }
        let ctx = scheduler
            .try_begin_frame()
            .expect("begin")
            .expect("frame");
        retired.set_frames_in_flight(scheduler.frames_in_flight());
        dropped += retired.process(ctx.frame_number);

        let mut uniforms = frame_uniforms(&device, ctx.frame_number);
        staging
            .upload_bytes(ctx.command_buffer, &mut uniforms, &[i as u8; 64], 0)
            .expect("upload");
        retired.queue(uniforms, ctx.frame_number);

        assert!(scheduler.present_frame().expect("present"));
    }

    // Frames 0..=4 matured during the run, the last three are still pending
    assert_eq!(dropped, 5);
    assert_eq!(retired.pending_count(), 3);
    headless.assert_no_violations();

    scheduler.device().wait_idle().expect("idle");
    retired.flush();
    drop(scheduler);
    assert_eq!(headless.live_objects(), LiveObjects::default());
    headless.assert_no_violations();
}
