//! Queue ownership transfers between a dedicated transfer queue and the
//! graphics queue, checked by the headless device.

use ash::vk;
use std::sync::Arc;
use vireo_gpu::barrier::SubresourceRange;
use vireo_gpu::resource::{Buffer, BufferDesc, EarliestUse, Texture, TextureDesc};
use vireo_gpu::{
    BarrierPlan, DeviceRef, GpuDevice, GpuError, QueueFamilies, QueueKind, StagingCoordinator,
    SubmitInfo, Transition,
};
use vireo_test::HeadlessDevice;

const GRAPHICS: u32 = 0;
const TRANSFER: u32 = 2;

fn setup() -> (Arc<HeadlessDevice>, DeviceRef) {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::with_families(QueueFamilies {
        graphics: GRAPHICS,
        present: GRAPHICS,
        transfer: TRANSFER,
    });
    let device: DeviceRef = headless.clone();
    (headless, device)
}

/// One command buffer per queue plus the semaphore chaining them.
struct QueuePair {
    device: DeviceRef,
    transfer_pool: vk::CommandPool,
    graphics_pool: vk::CommandPool,
    transfer_cb: vk::CommandBuffer,
    graphics_cb: vk::CommandBuffer,
    handoff: vk::Semaphore,
    fence: vk::Fence,
}

impl QueuePair {
    fn new(device: &DeviceRef) -> Self {
        let transfer_pool = device.create_command_pool(QueueKind::Transfer).unwrap();
        let graphics_pool = device.create_command_pool(QueueKind::Graphics).unwrap();
        let transfer_cb = device.allocate_command_buffers(transfer_pool, 1).unwrap()[0];
        let graphics_cb = device.allocate_command_buffers(graphics_pool, 1).unwrap()[0];
        device.begin_command_buffer(transfer_cb).unwrap();
        device.begin_command_buffer(graphics_cb).unwrap();
        Self {
            device: device.clone(),
            transfer_pool,
            graphics_pool,
            transfer_cb,
            graphics_cb,
            handoff: device.create_semaphore().unwrap(),
            fence: device.create_fence(false).unwrap(),
        }
    }

    fn submit_and_wait(&self) {
        let device = self.device.as_ref();
        device.end_command_buffer(self.transfer_cb).unwrap();
        device.end_command_buffer(self.graphics_cb).unwrap();
        device
            .submit(
                QueueKind::Transfer,
                &SubmitInfo {
                    command_buffers: &[self.transfer_cb],
                    wait_semaphores: &[],
                    wait_stages: &[],
                    signal_semaphores: &[self.handoff],
                    fence: vk::Fence::null(),
                },
            )
            .unwrap();
        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo {
                    command_buffers: &[self.graphics_cb],
                    wait_semaphores: &[self.handoff],
                    wait_stages: &[vk::PipelineStageFlags::VERTEX_INPUT],
                    signal_semaphores: &[],
                    fence: self.fence,
                },
            )
            .unwrap();
        device.wait_for_fence(self.fence, u64::MAX).unwrap();
    }
}

impl Drop for QueuePair {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        self.device.destroy_semaphore(self.handoff);
        self.device.destroy_command_pool(self.transfer_pool);
        self.device.destroy_command_pool(self.graphics_pool);
    }
}

#[test]
fn buffer_uploaded_on_transfer_queue_moves_to_graphics() {
    let (headless, device) = setup();
    let staging = StagingCoordinator::new(device.clone()).with_queue_family(TRANSFER);
    let mut vertices = Buffer::new(
        device.clone(),
        &BufferDesc::elements("vertices", 4, 6).earliest_use(EarliestUse::vertex_buffer()),
    )
    .unwrap();
    let data: [u32; 6] = [1, 2, 3, 4, 5, 6];

    let queues = QueuePair::new(&device);
    staging
        .upload_elements(queues.transfer_cb, &mut vertices, &data, 0)
        .unwrap();
    assert_eq!(vertices.state().queue_family, TRANSFER);

    let transfer = vertices
        .transfer_ownership(
            TRANSFER,
            GRAPHICS,
            &EarliestUse::vertex_buffer().on_queue(GRAPHICS),
        )
        .unwrap();
    assert_eq!((transfer.src_family(), transfer.dst_family()), (TRANSFER, GRAPHICS));
    transfer.record(device.as_ref(), queues.transfer_cb, queues.graphics_cb);
    assert_eq!(vertices.state().queue_family, GRAPHICS);
    queues.submit_and_wait();

    headless.assert_no_violations();
    assert_eq!(headless.buffer_owner(vertices.handle()), Some(GRAPHICS));
    assert_eq!(
        headless.buffer_contents(vertices.handle()).unwrap(),
        bytemuck::cast_slice::<u32, u8>(&data)
    );

    // The transfer queue no longer owns it
    let queues = QueuePair::new(&device);
    assert!(matches!(
        staging.upload_elements(queues.transfer_cb, &mut vertices, &data, 0),
        Err(GpuError::ForeignQueueOwner {
            owner: GRAPHICS,
            requested: TRANSFER,
            ..
        })
    ));
}

#[test]
fn ownership_requests_are_checked() {
    let (_headless, device) = setup();
    let mut buffer = Buffer::new(device.clone(), &BufferDesc::new("data", 64)).unwrap();
    let target = Transition::transfer_dst(GRAPHICS);

    assert!(matches!(
        buffer.transfer_ownership(GRAPHICS, GRAPHICS, &target),
        Err(GpuError::InvalidState(_))
    ));

    // Unowned resources have nothing to transfer
    let before = buffer.state();
    assert!(buffer.transfer_ownership(TRANSFER, GRAPHICS, &target).is_err());
    assert_eq!(buffer.state(), before);

    let plan = buffer.transition(&Transition::transfer_dst(TRANSFER));
    assert!(matches!(plan, BarrierPlan::Local(_)));
    assert!(buffer.transfer_ownership(GRAPHICS, TRANSFER, &target).is_err());
    assert_eq!(buffer.state().queue_family, TRANSFER);
}

#[test]
fn cross_queue_plan_cannot_be_recorded_locally() {
    let (_headless, device) = setup();
    let mut buffer = Buffer::new(device.clone(), &BufferDesc::new("data", 64)).unwrap();
    let _ = buffer.transition(&Transition::transfer_dst(TRANSFER));

    let plan = buffer.transition(&Transition::transfer_src(GRAPHICS));
    assert!(plan.is_transfer());
    assert!(matches!(
        plan.record_local(device.as_ref(), vk::CommandBuffer::null()),
        Err(GpuError::InvalidState(_))
    ));
}

#[test]
fn texture_levels_move_between_queues_independently() {
    let (headless, device) = setup();
    let staging = StagingCoordinator::new(device.clone()).with_queue_family(TRANSFER);
    let mut texture = Texture::new(
        device.clone(),
        &TextureDesc::new_2d("atlas", vk::Format::R8G8B8A8_UNORM, 4, 4)
            .mip_levels(2)
            .earliest_use(EarliestUse::sampled(vk::PipelineStageFlags::FRAGMENT_SHADER)),
    )
    .unwrap();
    let level0 = vec![7u8; 4 * 4 * 4];
    let level1 = vec![9u8; 2 * 2 * 4];

    let queues = QueuePair::new(&device);
    staging
        .upload_texture(queues.transfer_cb, &mut texture, &level0, 0, 0)
        .unwrap();
    staging
        .upload_texture(queues.transfer_cb, &mut texture, &level1, 1, 0)
        .unwrap();

    // Only the base level goes to graphics
    let base = texture.level_range(0);
    let transfer = texture
        .transfer_ownership(
            base,
            TRANSFER,
            GRAPHICS,
            &Transition::shader_read(vk::PipelineStageFlags::FRAGMENT_SHADER, GRAPHICS),
        )
        .unwrap();
    transfer.record(device.as_ref(), queues.transfer_cb, queues.graphics_cb);
    queues.submit_and_wait();

    headless.assert_no_violations();
    let image = texture.image();
    assert_eq!(headless.image_owner(image, 0, 0), Some(GRAPHICS));
    assert_eq!(headless.image_owner(image, 0, 1), Some(TRANSFER));
    assert_eq!(
        headless.image_layout(image, 0, 0),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );
    assert_eq!(headless.image_contents(image, 0, 0).unwrap(), level0);
    assert_eq!(headless.image_contents(image, 0, 1).unwrap(), level1);
    assert_eq!(texture.state(0, 1).queue_family, TRANSFER);

    // Level 1 can still be rewritten on the transfer queue, level 0 cannot
    let queues = QueuePair::new(&device);
    staging
        .upload_texture(queues.transfer_cb, &mut texture, &level1, 1, 0)
        .unwrap();
    assert!(matches!(
        staging.upload_texture(queues.transfer_cb, &mut texture, &level0, 0, 0),
        Err(GpuError::ForeignQueueOwner { .. })
    ));
}

#[test]
fn mip_generation_checks_every_level_before_recording() {
    let (headless, device) = setup();
    let graphics = StagingCoordinator::new(device.clone());
    let transfer = StagingCoordinator::new(device.clone()).with_queue_family(TRANSFER);
    let mut texture = Texture::new(
        device.clone(),
        &TextureDesc::new_2d("chain", vk::Format::R8G8B8A8_UNORM, 4, 4)
            .mip_levels(2)
            .earliest_use(EarliestUse::sampled(vk::PipelineStageFlags::FRAGMENT_SHADER)),
    )
    .unwrap();
    let to_graphics = Transition::transfer_dst(GRAPHICS);

    let queues = QueuePair::new(&device);
    transfer
        .upload_texture(queues.transfer_cb, &mut texture, &[7u8; 4 * 4 * 4], 0, 0)
        .unwrap();
    transfer
        .upload_texture(queues.transfer_cb, &mut texture, &[9u8; 2 * 2 * 4], 1, 0)
        .unwrap();
    texture
        .transfer_ownership(texture.level_range(0), TRANSFER, GRAPHICS, &to_graphics)
        .unwrap()
        .record(device.as_ref(), queues.transfer_cb, queues.graphics_cb);
    queues.submit_and_wait();

    // Level 1 still belongs to the transfer queue
    let before = [texture.state(0, 0), texture.state(0, 1)];
    let queues = QueuePair::new(&device);
    assert!(matches!(
        graphics.generate_mipmaps(queues.graphics_cb, &mut texture),
        Err(GpuError::ForeignQueueOwner {
            owner: TRANSFER,
            requested: GRAPHICS,
            ..
        })
    ));
    assert_eq!([texture.state(0, 0), texture.state(0, 1)], before);
    assert_eq!(headless.recorded_commands(queues.graphics_cb), 0);

    // Once level 1 has been handed over the chain can be built
    texture
        .transfer_ownership(texture.level_range(1), TRANSFER, GRAPHICS, &to_graphics)
        .unwrap()
        .record(device.as_ref(), queues.transfer_cb, queues.graphics_cb);
    graphics
        .generate_mipmaps(queues.graphics_cb, &mut texture)
        .unwrap();
    queues.submit_and_wait();

    headless.assert_no_violations();
    let image = texture.image();
    for level in 0..2 {
        assert_eq!(texture.state(0, level).queue_family, GRAPHICS);
        assert_eq!(headless.image_owner(image, 0, level), Some(GRAPHICS));
        assert_eq!(
            headless.image_layout(image, 0, level),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }
}

#[test]
fn multi_layer_transfers_check_every_layer() {
    let (headless, device) = setup();
    let graphics = StagingCoordinator::new(device.clone());
    let transfer = StagingCoordinator::new(device.clone()).with_queue_family(TRANSFER);
    let mut texture = Texture::new(
        device.clone(),
        &TextureDesc::new_2d("layers", vk::Format::R8G8B8A8_UNORM, 2, 2)
            .array_layers(2)
            .earliest_use(EarliestUse::sampled(vk::PipelineStageFlags::FRAGMENT_SHADER)),
    )
    .unwrap();
    let layer = [3u8; 2 * 2 * 4];
    let both = [layer, layer].concat();

    let queues = QueuePair::new(&device);
    transfer
        .upload_texture(queues.transfer_cb, &mut texture, &both, 0, 0)
        .unwrap();
    let first_layer = SubresourceRange::level(texture.aspect(), 0, 0, 1);
    texture
        .transfer_ownership(
            first_layer,
            TRANSFER,
            GRAPHICS,
            &Transition::shader_read(vk::PipelineStageFlags::FRAGMENT_SHADER, GRAPHICS),
        )
        .unwrap()
        .record(device.as_ref(), queues.transfer_cb, queues.graphics_cb);
    queues.submit_and_wait();

    let queues = QueuePair::new(&device);
    assert!(matches!(
        graphics.upload_texture(queues.graphics_cb, &mut texture, &both, 0, 0),
        Err(GpuError::ForeignQueueOwner {
            owner: TRANSFER,
            requested: GRAPHICS,
            ..
        })
    ));
    assert!(matches!(
        graphics.download_texture(queues.graphics_cb, &mut texture, 0, 0, 2),
        Err(GpuError::ForeignQueueOwner { owner: TRANSFER, .. })
    ));
    assert!(matches!(
        transfer.upload_texture(queues.transfer_cb, &mut texture, &both, 0, 0),
        Err(GpuError::ForeignQueueOwner {
            owner: GRAPHICS,
            requested: TRANSFER,
            ..
        })
    ));
    assert_eq!(headless.recorded_commands(queues.graphics_cb), 0);
    assert_eq!(headless.recorded_commands(queues.transfer_cb), 0);
    assert_eq!(texture.state(0, 0).queue_family, GRAPHICS);
    assert_eq!(texture.state(1, 0).queue_family, TRANSFER);

    // The transfer queue can still rewrite the layer it owns
    transfer
        .upload_texture(queues.transfer_cb, &mut texture, &layer, 0, 1)
        .unwrap();
    queues.submit_and_wait();

    headless.assert_no_violations();
    let image = texture.image();
    assert_eq!(headless.image_owner(image, 0, 0), Some(GRAPHICS));
    assert_eq!(headless.image_owner(image, 1, 0), Some(TRANSFER));
}

#[test]
fn skipped_acquire_is_reported() {
    let (headless, device) = setup();
    let staging = StagingCoordinator::new(device.clone()).with_queue_family(TRANSFER);
    let mut buffer = Buffer::new(device.clone(), &BufferDesc::new("data", 16)).unwrap();

    let queues = QueuePair::new(&device);
    staging
        .upload_bytes(queues.transfer_cb, &mut buffer, &[1; 16], 0)
        .unwrap();
    let transfer = buffer
        .transfer_ownership(TRANSFER, GRAPHICS, &Transition::transfer_src(GRAPHICS))
        .unwrap();
    let (release, _acquire) = transfer.into_halves();
    release.record(device.as_ref(), queues.transfer_cb);

    // Use on graphics without the acquire half
    let mut other = Buffer::new(device.clone(), &BufferDesc::new("other", 16)).unwrap();
    let _ = other.transition(&Transition::transfer_dst(GRAPHICS));
    device.cmd_copy_buffer(
        queues.graphics_cb,
        buffer.handle(),
        other.handle(),
        &[vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: 16,
        }],
    );
    queues.submit_and_wait();

    let violations = headless.violations();
    assert!(
        violations
            .iter()
            .any(|v| v.contains("`data` used on family 0 while owned by family 2")),
        "{violations:?}"
    );
}
