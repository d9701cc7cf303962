//! Viewer application implementation.

use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{error, info};
use winit::event::ElementState;
use winit::keyboard::{Key, NamedKey};

use vireo_app::{AppContext, Frame, RhiApp, WindowEvent};
use vireo_gpu::{
    Buffer, BufferDesc, DeferredDeletionQueue, DescriptorLayout, DescriptorLayoutBuilder,
    DescriptorSet, DeviceRef, EarliestUse, GpuDevice, Texture, TextureDesc, VulkanDevice,
};

/// Texture edge length; the mip chain goes down to 1x1.
const TEXTURE_SIZE: u32 = 256;

/// Checkerboard cell size in texels.
const CELL: u32 = 16;

/// Transform slots in the uniform buffer. Frame slots beyond this wrap.
const UNIFORM_SLOTS: u64 = 8;

/// A texture with the view the descriptor sets sample it through.
struct SampledTexture {
    device: DeviceRef,
    texture: Texture,
    view: vk::ImageView,
}

impl SampledTexture {
    fn new(device: &DeviceRef, generation: u32) -> anyhow::Result<Self> {
        let texture = Texture::new(
            device.clone(),
            &TextureDesc::new_2d(
                format!("checker {generation}"),
                vk::Format::R8G8B8A8_SRGB,
                TEXTURE_SIZE,
                TEXTURE_SIZE,
            )
            .full_mip_chain(),
        )?;
        let view = texture.create_view(texture.full_range())?;
        Ok(Self {
            device: device.clone(),
            texture,
            view,
        })
    }
}

impl Drop for SampledTexture {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.view);
    }
}

/// Checkerboard whose colors depend on `generation`.
fn checkerboard(generation: u32) -> Vec<u8> {
    let hue = (generation.wrapping_mul(67) % 256) as u8;
    let a = [hue, 255 - hue, 128, 255];
    let b = [32, 32, 32, 255];
    let mut texels = Vec::with_capacity((TEXTURE_SIZE * TEXTURE_SIZE * 4) as usize);
    for y in 0..TEXTURE_SIZE {
        for x in 0..TEXTURE_SIZE {
            let texel = if (x / CELL + y / CELL) % 2 == 0 { a } else { b };
            texels.extend_from_slice(&texel);
        }
    }
    texels
}

/// Viewer application state.
pub struct Viewer {
    vulkan: Arc<VulkanDevice>,
    layout: DescriptorLayout,
    /// One set per frame slot, so rebinding never touches a set in flight.
    sets: Vec<DescriptorSet>,
    pipeline_layout: vk::PipelineLayout,
    sampler: vk::Sampler,
    transforms: Buffer,
    texture: SampledTexture,
    /// Set when the texture was replaced but not yet uploaded.
    texture_dirty: bool,
    generation: u32,
    retired: DeferredDeletionQueue<SampledTexture>,
    regenerate: bool,
    elapsed: f32,
}

impl RhiApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let device = ctx.device();
        let vulkan = ctx.vulkan().clone();

        let layout = DescriptorLayoutBuilder::new()
            .uniform_buffer_dynamic(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image(1, vk::ShaderStageFlags::FRAGMENT)
            .build(device.clone())?;

        let set_layouts = [layout.handle()];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        // SAFETY: the device is live and the set layout outlives the call.
        let pipeline_layout = unsafe { vulkan.raw().create_pipeline_layout(&layout_info, None)? };

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        // SAFETY: as above.
        let sampler = unsafe { vulkan.raw().create_sampler(&sampler_info, None)? };

        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let transforms = Buffer::new(
            device.clone(),
            &BufferDesc::elements(
                "transforms",
                std::mem::size_of::<Mat4>() as u64,
                UNIFORM_SLOTS,
            )
            .aligned(alignment)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .earliest_use(EarliestUse::uniform(vk::PipelineStageFlags::VERTEX_SHADER)),
        )?;
        info!(
            stride = transforms.stride(),
            slots = UNIFORM_SLOTS,
            "transform buffer created"
        );

        // The first texture is uploaded up front; later ones go through the
        // frame's own command buffer.
        let mut texture = SampledTexture::new(&device, 0)?;
        ctx.submit_now(|cb| {
            ctx.staging
                .upload_texture(cb, &mut texture.texture, &checkerboard(0), 0, 0)?;
            ctx.staging.generate_mipmaps(cb, &mut texture.texture)?;
            Ok(())
        })?;
        info!(
            levels = texture.texture.mip_levels(),
            "texture uploaded and mip-mapped"
        );

        let mut viewer = Self {
            vulkan,
            layout,
            sets: Vec::new(),
            pipeline_layout,
            sampler,
            transforms,
            texture,
            texture_dirty: false,
            generation: 0,
            retired: DeferredDeletionQueue::new(ctx.frames_in_flight()),
            regenerate: false,
            elapsed: 0.0,
        };
        viewer.ensure_sets(ctx.frames_in_flight())?;
        Ok(viewer)
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.elapsed += dt;
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render(&mut self, ctx: &AppContext, frame: &mut Frame) -> anyhow::Result<()> {
        let cb = frame.command_buffer();
        let slot = frame.slot();
        self.retired.set_frames_in_flight(ctx.frames_in_flight());
        self.retired.process(frame.frame_number());
        self.ensure_sets(slot + 1)?;

        if self.regenerate {
            self.regenerate = false;
            self.replace_texture(ctx, frame.frame_number())?;
        }
        if self.texture_dirty {
            ctx.staging.upload_texture(
                cb,
                &mut self.texture.texture,
                &checkerboard(self.generation),
                0,
                0,
            )?;
            ctx.staging.generate_mipmaps(cb, &mut self.texture.texture)?;
            self.texture_dirty = false;
        }

        // Uploads happen outside the render pass.
        let data_index = slot as u64 % UNIFORM_SLOTS;
        let transform = Mat4::from_rotation_z(self.elapsed)
            * Mat4::from_scale(Vec3::splat(0.5 + 0.25 * self.elapsed.sin()));
        ctx.staging
            .upload_elements(cb, &mut self.transforms, &[transform], data_index)?;

        let t = self.elapsed;
        let clear = [
            0.5 + 0.5 * t.sin(),
            0.5 + 0.5 * (t * 0.7 + 2.0).sin(),
            0.5 + 0.5 * (t * 1.3 + 4.0).sin(),
            1.0,
        ];
        ctx.begin_render_pass(frame, clear);
        self.sets[slot].bind(
            ctx.device().as_ref(),
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout,
            0,
            data_index as u32,
        )?;
        ctx.end_render_pass(frame);
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed
                && !event.repeat
                && event.logical_key == Key::Named(NamedKey::Space)
            {
                self.regenerate = true;
                return true;
            }
        }
        false
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        self.retired.flush();
        for set in self.sets.drain(..) {
            if let Err(e) = self.layout.release(set) {
                error!("Failed to release descriptor set: {e}");
            }
        }
        // SAFETY: the device is idle during cleanup and nothing else uses
        // these handles.
        unsafe {
            self.vulkan.raw().destroy_sampler(self.sampler, None);
            self.vulkan
                .raw()
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
        self.sampler = vk::Sampler::null();
        self.pipeline_layout = vk::PipelineLayout::null();
    }
}

impl Viewer {
    /// Grow `sets` to `count`, binding the current resources into new sets.
    fn ensure_sets(&mut self, count: usize) -> anyhow::Result<()> {
        if self.sets.len() >= count {
            return Ok(());
        }
        let missing = (count - self.sets.len()) as u32;
        for mut set in self.layout.create_sets(missing)? {
            set.bind_buffer_dynamic(0, &self.transforms)?;
            set.bind_texture(1, &self.texture.texture, self.texture.view, self.sampler)?;
            self.sets.push(set);
        }
        Ok(())
    }

    /// Swap in a fresh texture. Sets pick it up lazily when next bound, which
    /// for any slot is after that slot's previous frame completed.
    fn replace_texture(&mut self, ctx: &AppContext, frame_number: u64) -> anyhow::Result<()> {
        self.generation += 1;
        let fresh = SampledTexture::new(&ctx.device(), self.generation)?;
        let old = std::mem::replace(&mut self.texture, fresh);
        self.retired.queue(old, frame_number);
        self.texture_dirty = true;

        for set in &mut self.sets {
            set.bind_texture(1, &self.texture.texture, self.texture.view, self.sampler)?;
        }
        info!(generation = self.generation, "texture regenerated");
        Ok(())
    }
}
