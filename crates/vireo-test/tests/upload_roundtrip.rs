//! Staged uploads and downloads against the headless device.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use vireo_gpu::resource::{Buffer, BufferDesc, EarliestUse, Texture, TextureDesc};
use vireo_gpu::{DeviceRef, GpuDevice, GpuError, QueueKind, StagingCoordinator};
use vireo_test::{submit_and_wait, HeadlessDevice};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
}

fn setup() -> (Arc<HeadlessDevice>, DeviceRef, StagingCoordinator) {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::new();
    let device: DeviceRef = headless.clone();
    let staging = StagingCoordinator::new(device.clone());
    (headless, device, staging)
}

fn vertices(n: usize) -> Vec<Vertex> {
    (0..n)
        .map(|i| Vertex {
            position: [i as f32, i as f32 * 2.0, -(i as f32)],
        })
        .collect()
}

#[test]
fn buffer_upload_reaches_device_memory() {
    let (headless, device, staging) = setup();
    let mut buffer = Buffer::new(
        device.clone(),
        &BufferDesc::elements("vertices", 12, 4)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .earliest_use(EarliestUse::vertex_buffer()),
    )
    .expect("buffer");

    let data = vertices(4);
    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.upload_elements(cb, &mut buffer, &data, 0)
    })
    .expect("upload");

    let contents = headless.buffer_contents(buffer.handle()).expect("buffer exists");
    assert_eq!(contents, bytemuck::cast_slice::<Vertex, u8>(&data));
    assert!(buffer.staging_binding().is_some_and(|s| s.is_owned()));
    headless.assert_no_violations();
}

#[test]
fn partial_upload_leaves_other_elements_alone() {
    let (headless, device, staging) = setup();
    let mut buffer =
        Buffer::new(device.clone(), &BufferDesc::elements("vertices", 12, 4)).expect("buffer");

    let first = vertices(4);
    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.upload_elements(cb, &mut buffer, &first, 0)
    })
    .expect("upload");

    let patch = [Vertex {
        position: [9.0, 9.0, 9.0],
    }];
    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.upload_elements(cb, &mut buffer, &patch, 2)
    })
    .expect("patch");

    let contents = headless.buffer_contents(buffer.handle()).expect("buffer exists");
    let on_device: Vec<Vertex> = bytemuck::pod_collect_to_vec(&contents);
    assert_eq!(on_device[0], first[0]);
    assert_eq!(on_device[2], patch[0]);
    assert_eq!(on_device[3], first[3]);
    headless.assert_no_violations();
}

#[test]
fn strided_uniforms_round_trip() {
    let (headless, device, staging) = setup();
    let alignment = device.limits().min_uniform_buffer_offset_alignment;
    let mut uniforms = Buffer::new(
        device.clone(),
        &BufferDesc::elements("transforms", 64, 3)
            .aligned(alignment)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .earliest_use(EarliestUse::uniform(vk::PipelineStageFlags::VERTEX_SHADER)),
    )
    .expect("buffer");
    assert_eq!(uniforms.stride(), 256);

    let matrices = [
        Mat4::IDENTITY,
        Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0)),
        Mat4::from_scale(glam::Vec3::splat(4.0)),
    ];
    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.upload_elements(cb, &mut uniforms, &matrices, 0)
    })
    .expect("upload");

    let contents = headless.buffer_contents(uniforms.handle()).expect("buffer exists");
    assert_eq!(&contents[256..320], bytemuck::bytes_of(&matrices[1]));
    // Padding between elements stays untouched
    assert!(contents[64..256].iter().all(|&b| b == 0));

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.download_elements(cb, &mut uniforms, 0, 3)
    })
    .expect("download");
    let back: Vec<Mat4> = staging
        .read_staged_elements(&uniforms, 0, 3)
        .expect("read back");
    assert_eq!(back, matrices);
    headless.assert_no_violations();
}

#[test]
fn host_visible_buffers_skip_staging() {
    let (headless, device, staging) = setup();
    let mut buffer = Buffer::new(
        device.clone(),
        &BufferDesc::new("readback", 16).location(MemoryLocation::GpuToCpu),
    )
    .expect("buffer");

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.upload_bytes(cb, &mut buffer, &[7; 16], 0)
    })
    .expect("upload");
    assert!(buffer.staging_binding().is_none());

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.download_bytes(cb, &mut buffer, 4, 8)
    })
    .expect("download");
    let bytes = staging.read_staged_bytes(&buffer, 4, 8).expect("read");
    assert_eq!(bytes, vec![7; 8]);
    headless.assert_no_violations();
}

#[test]
fn shared_staging_buffer_with_offsets() {
    let (headless, device, _) = setup();
    let coordinator = StagingCoordinator::new(device.clone()).with_owned_staging(false);
    let ring = Buffer::staging(device.clone(), "ring", 1024).expect("staging");

    let mut a = Buffer::new(device.clone(), &BufferDesc::new("a", 64)).expect("a");
    let mut b = Buffer::new(device.clone(), &BufferDesc::new("b", 64)).expect("b");

    let missing = submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        coordinator.upload_bytes(cb, &mut a, &[1; 64], 0)
    });
    assert!(matches!(missing, Err(GpuError::MissingStagingBuffer { .. })));

    assert!(a.bind_staging(&ring, 0, 0).expect("bind").is_none());
    assert!(b.bind_staging(&ring, 512, 0).expect("bind").is_none());

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        coordinator.upload_bytes(cb, &mut a, &[1; 64], 0)?;
        coordinator.upload_bytes(cb, &mut b, &[2; 64], 0)
    })
    .expect("upload");

    assert_eq!(headless.buffer_contents(a.handle()), Some(vec![1; 64]));
    assert_eq!(headless.buffer_contents(b.handle()), Some(vec![2; 64]));
    let ring_bytes = headless.buffer_contents(ring.handle()).expect("ring");
    assert_eq!(&ring_bytes[512..576], &[2; 64]);
    headless.assert_no_violations();
}

#[test]
fn out_of_range_and_mismatched_uploads_fail_before_recording() {
    let (headless, device, staging) = setup();
    let mut buffer =
        Buffer::new(device.clone(), &BufferDesc::elements("vertices", 12, 2)).expect("buffer");
    let small = Buffer::staging(device.clone(), "small", 8).expect("staging");

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        let err = staging.upload_elements(cb, &mut buffer, &vertices(3), 0);
        assert!(matches!(err, Err(GpuError::UploadOutOfRange { end: 36, .. })));

        let err = staging.upload_elements(cb, &mut buffer, &[1.0f32, 2.0], 0);
        assert!(matches!(
            err,
            Err(GpuError::ElementSizeMismatch {
                expected: 12,
                actual: 4,
                ..
            })
        ));

        buffer.bind_staging(&small, 0, 0)?;
        let err = staging.upload_elements(cb, &mut buffer, &vertices(2), 0);
        assert!(matches!(
            err,
            Err(GpuError::StagingTooSmall {
                required: 24,
                capacity: 8,
                ..
            })
        ));
        Ok(())
    })
    .expect("submission");

    assert_eq!(buffer.state(), vireo_gpu::ResourceState::UNUSED);
    headless.assert_no_violations();
}

#[test]
fn foreign_owner_is_rejected() {
    vireo_test::init_tracing();
    let headless = HeadlessDevice::with_families(vireo_gpu::QueueFamilies {
        graphics: 0,
        present: 0,
        transfer: 2,
    });
    let device: DeviceRef = headless.clone();
    let on_transfer = StagingCoordinator::new(device.clone()).with_queue_family(2);
    let on_graphics = StagingCoordinator::new(device.clone());

    let mut buffer = Buffer::new(device.clone(), &BufferDesc::new("data", 32)).expect("buffer");
    submit_and_wait(device.as_ref(), QueueKind::Transfer, |cb| {
        on_transfer.upload_bytes(cb, &mut buffer, &[3; 32], 0)
    })
    .expect("upload on transfer queue");
    assert_eq!(buffer.state().queue_family, 2);

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        let err = on_graphics.upload_bytes(cb, &mut buffer, &[4; 32], 0);
        assert!(matches!(
            err,
            Err(GpuError::ForeignQueueOwner {
                owner: 2,
                requested: 0,
                ..
            })
        ));
        Ok(())
    })
    .expect("submission");
    headless.assert_no_violations();
}

fn checkerboard(width: u32, height: u32) -> Vec<u8> {
    let mut texels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let v = if (x + y) % 2 == 0 { 255 } else { 0 };
            texels.extend_from_slice(&[v, x as u8, y as u8, 255]);
        }
    }
    texels
}

#[test]
fn texture_layers_and_levels_upload_independently() {
    let (headless, device, staging) = setup();
    let mut texture = Texture::new(
        device.clone(),
        &TextureDesc::new_2d("atlas", vk::Format::R8G8B8A8_UNORM, 4, 4)
            .mip_levels(2)
            .array_layers(2),
    )
    .expect("texture");
    assert_eq!(texture.capacity().expect("capacity"), (64 + 16) * 2);
    assert_eq!(texture.staging_offset(1, 1).expect("offset"), 2 * 64 + 4 * 4);

    let layer1 = checkerboard(4, 4);
    let level1 = vec![9u8; 2 * 2 * 4 * 2];
    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.upload_texture(cb, &mut texture, &layer1, 0, 1)?;
        staging.upload_texture(cb, &mut texture, &level1, 1, 0)
    })
    .expect("upload");

    let image = texture.image();
    assert_eq!(headless.image_contents(image, 1, 0), Some(layer1));
    assert_eq!(headless.image_contents(image, 0, 0), Some(vec![0; 64]));
    assert_eq!(headless.image_contents(image, 1, 1), Some(vec![9; 16]));
    assert_eq!(
        headless.image_layout(image, 1, 0),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );
    assert_eq!(headless.image_layout(image, 0, 0), Some(vk::ImageLayout::UNDEFINED));
    headless.assert_no_violations();
}

#[test]
fn mip_chain_generation_and_download() {
    let (headless, device, staging) = setup();
    let mut texture = Texture::new(
        device.clone(),
        &TextureDesc::new_2d("albedo", vk::Format::R8G8B8A8_UNORM, 4, 4).full_mip_chain(),
    )
    .expect("texture");
    assert_eq!(texture.mip_levels(), 3);

    let base = checkerboard(4, 4);
    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.upload_texture(cb, &mut texture, &base, 0, 0)?;
        staging.generate_mipmaps(cb, &mut texture)
    })
    .expect("upload");

    for level in 0..3 {
        assert_eq!(
            headless.image_layout(texture.image(), 0, level),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }
    // Level 1 samples every other texel of level 0
    let level1 = headless.image_contents(texture.image(), 0, 1).expect("level 1");
    assert_eq!(&level1[0..4], &base[0..4]);
    assert_eq!(&level1[4..8], &base[8..12]);

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        staging.download_texture(cb, &mut texture, 1, 0, 1)
    })
    .expect("download");
    let back = staging
        .read_staged_texture(&texture, 1, 0, 1)
        .expect("read back");
    assert_eq!(back, level1);
    headless.assert_no_violations();
}

#[test]
fn texture_upload_rejects_partial_layers() {
    let (headless, device, staging) = setup();
    let mut texture = Texture::new(
        device.clone(),
        &TextureDesc::new_2d("tile", vk::Format::R8G8B8A8_UNORM, 2, 2),
    )
    .expect("texture");

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        let err = staging.upload_texture(cb, &mut texture, &[0; 10], 0, 0);
        assert!(matches!(err, Err(GpuError::ElementSizeMismatch { .. })));
        let err = staging.upload_texture(cb, &mut texture, &[0; 32], 0, 0);
        assert!(matches!(err, Err(GpuError::UploadOutOfRange { .. })));
        Ok(())
    })
    .expect("submission");
    headless.assert_no_violations();
}

#[test]
fn out_of_range_mip_level_is_an_error() {
    let (headless, device, staging) = setup();
    let mut texture = Texture::new(
        device.clone(),
        &TextureDesc::new_2d("tile", vk::Format::R8G8B8A8_UNORM, 2, 2).mip_levels(2),
    )
    .expect("texture");

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        for level in [2, 31, 32, 40] {
            let err = staging.upload_texture(cb, &mut texture, &[0; 4], level, 0);
            assert!(matches!(err, Err(GpuError::InvalidArgument(_))), "{err:?}");
            let err = staging.download_texture(cb, &mut texture, level, 0, 1);
            assert!(matches!(err, Err(GpuError::InvalidArgument(_))), "{err:?}");
        }
        Ok(())
    })
    .expect("submission");

    assert!(matches!(
        staging.read_staged_texture(&texture, 40, 0, 1),
        Err(GpuError::InvalidArgument(_))
    ));
    assert_eq!(
        texture.level_extent(40),
        vk::Extent3D {
            width: 1,
            height: 1,
            depth: 1
        }
    );
    assert_eq!(
        texture.state(0, 0).layout,
        vk::ImageLayout::UNDEFINED,
        "rejected transfers leave the state alone"
    );
    headless.assert_no_violations();
}

#[test]
fn overflowing_offsets_are_rejected() {
    let (headless, device, staging) = setup();
    let mut buffer = Buffer::new(
        device.clone(),
        &BufferDesc::elements("vertices", 12, 4).aligned(16),
    )
    .expect("buffer");

    submit_and_wait(device.as_ref(), QueueKind::Graphics, |cb| {
        let err = staging.upload_elements(cb, &mut buffer, &vertices(1), u64::MAX / 8);
        assert!(matches!(err, Err(GpuError::InvalidArgument(_))), "{err:?}");
        let err = staging.upload_bytes(cb, &mut buffer, &[1, 2, 3], u64::MAX - 1);
        assert!(matches!(err, Err(GpuError::InvalidArgument(_))), "{err:?}");
        let err = staging.download_elements(cb, &mut buffer, u64::MAX / 8, 1);
        assert!(matches!(err, Err(GpuError::InvalidArgument(_))), "{err:?}");
        Ok(())
    })
    .expect("submission");

    assert!(matches!(
        staging.read_staged_elements::<Vertex>(&buffer, u64::MAX / 8, 1),
        Err(GpuError::InvalidArgument(_))
    ));
    headless.assert_no_violations();
}
