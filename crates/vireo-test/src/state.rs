//! Shared state of the headless device and surface.
//!
//! Submissions are queued and only executed when a fence they signal is
//! waited on or the device goes idle, the way a slow GPU would behave. While
//! executing, every barrier, copy and present is checked against the tracked
//! layouts and queue family owners; anything a real driver's validation layer
//! would complain about is recorded as a violation.

use ash::vk::{self, Handle};
use std::collections::{HashMap, HashSet, VecDeque};
use vireo_gpu::barrier::{BarrierKind, BarrierTarget, PipelineBarrier};
use vireo_gpu::device::{DescriptorPayload, DeviceLimits, LayoutBinding, QueueFamilies, QueueKind};

/// A recorded command.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    Barrier(PipelineBarrier),
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: vk::Image,
        dst: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
    Blit {
        src: vk::Image,
        dst: vk::Image,
        regions: Vec<vk::ImageBlit>,
    },
    BindDescriptorSet {
        set: vk::DescriptorSet,
        dynamic_offsets: Vec<u32>,
    },
}

/// Something the device or surface was asked to do, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Submit {
        queue: QueueKind,
        command_buffers: Vec<vk::CommandBuffer>,
        wait: Vec<vk::Semaphore>,
        signal: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    FenceWait(vk::Fence),
    WaitIdle,
    Acquire {
        image_index: u32,
        semaphore: vk::Semaphore,
    },
    Present {
        image_index: u32,
        wait: Vec<vk::Semaphore>,
    },
    SwapchainCreated {
        image_count: u32,
        extent: vk::Extent2D,
        format: vk::Format,
    },
    SwapchainDestroyed,
    SurfaceRecreated,
    DescriptorPoolCreated {
        max_sets: u32,
    },
    DescriptorUpdate {
        writes: usize,
    },
}

/// Counts of live device objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub images: usize,
    pub image_views: usize,
    pub framebuffers: usize,
    pub semaphores: usize,
    pub fences: usize,
    pub command_pools: usize,
    pub command_buffers: usize,
    pub set_layouts: usize,
    pub descriptor_pools: usize,
    pub descriptor_sets: usize,
}

pub(crate) struct BufferObject {
    pub name: String,
    pub data: Vec<u8>,
    pub host_visible: bool,
    pub owner: Option<u32>,
}

pub(crate) struct Subresource {
    pub layout: vk::ImageLayout,
    pub owner: Option<u32>,
    pub data: Vec<u8>,
}

pub(crate) struct ImageObject {
    pub name: String,
    pub extent: vk::Extent3D,
    pub levels: u32,
    pub texel: usize,
    pub subresources: Vec<Subresource>,
}

impl ImageObject {
    pub fn new(
        name: String,
        extent: vk::Extent3D,
        levels: u32,
        layers: u32,
        texel: usize,
    ) -> Self {
        let mut subresources = Vec::with_capacity((levels * layers) as usize);
        for _layer in 0..layers {
            for level in 0..levels {
                let e = level_extent(extent, level);
                subresources.push(Subresource {
                    layout: vk::ImageLayout::UNDEFINED,
                    owner: None,
                    data: vec![0; e.width as usize * e.height as usize * e.depth as usize * texel],
                });
            }
        }
        Self {
            name,
            extent,
            levels,
            texel,
            subresources,
        }
    }

    pub fn index(&self, layer: u32, level: u32) -> usize {
        (layer * self.levels + level) as usize
    }

    pub fn level_extent(&self, level: u32) -> vk::Extent3D {
        level_extent(self.extent, level)
    }
}

pub(crate) fn level_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (extent.width >> level).max(1),
        height: (extent.height >> level).max(1),
        depth: (extent.depth >> level).max(1),
    }
}

pub(crate) struct CommandBufferObject {
    pub family: u32,
    pub pool: vk::CommandPool,
    pub commands: Vec<Command>,
    pub recording: bool,
}

pub(crate) struct DescriptorPoolObject {
    pub max_sets: u32,
    pub live_sets: u32,
    pub remaining: HashMap<vk::DescriptorType, u32>,
}

pub(crate) struct DescriptorSetObject {
    pub pool: vk::DescriptorPool,
    pub layout: vk::DescriptorSetLayout,
    pub writes: HashMap<u32, DescriptorPayload>,
}

pub(crate) enum QueueOp {
    Batch {
        family: u32,
        commands: Vec<Command>,
        command_buffers: Vec<vk::CommandBuffer>,
        fence: vk::Fence,
    },
    Present {
        family: u32,
        image: vk::Image,
    },
}

pub(crate) struct State {
    next_handle: u64,
    pub families: QueueFamilies,
    pub limits: DeviceLimits,
    pub buffers: HashMap<vk::Buffer, BufferObject>,
    pub images: HashMap<vk::Image, ImageObject>,
    pub views: HashMap<vk::ImageView, vk::Image>,
    pub framebuffers: HashSet<vk::Framebuffer>,
    pub semaphores: HashMap<vk::Semaphore, bool>,
    pub fences: HashMap<vk::Fence, bool>,
    pub command_pools: HashMap<vk::CommandPool, u32>,
    pub command_buffers: HashMap<vk::CommandBuffer, CommandBufferObject>,
    pub set_layouts: HashMap<vk::DescriptorSetLayout, Vec<LayoutBinding>>,
    pub descriptor_pools: HashMap<vk::DescriptorPool, DescriptorPoolObject>,
    pub descriptor_sets: HashMap<vk::DescriptorSet, DescriptorSetObject>,
    pub queue: VecDeque<QueueOp>,
    pub events: Vec<Event>,
    pub violations: Vec<String>,
    pub pool_failures: VecDeque<vk::Result>,
    /// Command buffer allocations that come back empty.
    pub empty_allocations: u32,
    pub bound_sets: Vec<(vk::DescriptorSet, Vec<u32>)>,
}

impl State {
    pub fn new(families: QueueFamilies) -> Self {
        Self {
            next_handle: 0x1000,
            families,
            limits: DeviceLimits::default(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            views: HashMap::new(),
            framebuffers: HashSet::new(),
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            command_pools: HashMap::new(),
            command_buffers: HashMap::new(),
            set_layouts: HashMap::new(),
            descriptor_pools: HashMap::new(),
            descriptor_sets: HashMap::new(),
            queue: VecDeque::new(),
            events: Vec::new(),
            violations: Vec::new(),
            pool_failures: VecDeque::new(),
            empty_allocations: 0,
            bound_sets: Vec::new(),
        }
    }

    /// A fresh, never reused handle.
    pub fn mint<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    pub fn violation(&mut self, message: String) {
        tracing::warn!("headless device violation: {message}");
        self.violations.push(message);
    }

    pub fn family(&self, kind: QueueKind) -> u32 {
        self.families.family(kind)
    }

    pub fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            buffers: self.buffers.len(),
            images: self.images.len(),
            image_views: self.views.len(),
            framebuffers: self.framebuffers.len(),
            semaphores: self.semaphores.len(),
            fences: self.fences.len(),
            command_pools: self.command_pools.len(),
            command_buffers: self.command_buffers.len(),
            set_layouts: self.set_layouts.len(),
            descriptor_pools: self.descriptor_pools.len(),
            descriptor_sets: self.descriptor_sets.len(),
        }
    }

    // Semaphores.

    pub fn signal_semaphore(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => {
                self.violation(format!("{by} signals {semaphore:?}, which is already signaled"));
            }
            Some(signaled) => *signaled = true,
            None => self.violation(format!("{by} signals unknown semaphore {semaphore:?}")),
        }
    }

    pub fn consume_semaphore(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self.violation(format!(
                "{by} waits on {semaphore:?}, which nothing has signaled"
            )),
            None => self.violation(format!("{by} waits on unknown semaphore {semaphore:?}")),
        }
    }

    // Pending work.

    pub fn is_pending_cb(&self, cb: vk::CommandBuffer) -> bool {
        self.queue.iter().any(|op| match op {
            QueueOp::Batch {
                command_buffers, ..
            } => command_buffers.contains(&cb),
            QueueOp::Present { .. } => false,
        })
    }

    pub fn is_pending_fence(&self, fence: vk::Fence) -> bool {
        self.queue
            .iter()
            .any(|op| matches!(op, QueueOp::Batch { fence: f, .. } if *f == fence))
    }

    fn pending_commands(&self) -> impl Iterator<Item = &Command> {
        self.queue.iter().flat_map(|op| match op {
            QueueOp::Batch { commands, .. } => commands.as_slice(),
            QueueOp::Present { .. } => &[],
        })
    }

    pub fn buffer_in_use(&self, buffer: vk::Buffer) -> bool {
        self.pending_commands().any(|command| match command {
            Command::CopyBuffer { src, dst, .. } => *src == buffer || *dst == buffer,
            Command::CopyBufferToImage { src, .. } => *src == buffer,
            Command::CopyImageToBuffer { dst, .. } => *dst == buffer,
            Command::Barrier(barrier) => barrier.barriers.iter().any(
                |b| matches!(b.target, BarrierTarget::Buffer { buffer: t, .. } if t == buffer),
            ),
            _ => false,
        })
    }

    pub fn image_in_use(&self, image: vk::Image) -> bool {
        let in_commands = self.pending_commands().any(|command| match command {
            Command::CopyBufferToImage { dst, .. } => *dst == image,
            Command::CopyImageToBuffer { src, .. } => *src == image,
            Command::Blit { src, dst, .. } => *src == image || *dst == image,
            Command::Barrier(barrier) => barrier.barriers.iter().any(
                |b| matches!(b.target, BarrierTarget::Image { image: t, .. } if t == image),
            ),
            _ => false,
        });
        in_commands
            || self
                .queue
                .iter()
                .any(|op| matches!(op, QueueOp::Present { image: i, .. } if *i == image))
    }

    /// Byte ranges of `buffer` that pending copies read (`reads`) or write.
    pub fn pending_buffer_ranges(&self, buffer: vk::Buffer, reads: bool) -> Vec<(u64, u64)> {
        let mut ranges = Vec::new();
        for command in self.pending_commands() {
            match command {
                Command::CopyBuffer { src, dst, regions } => {
                    let hit = if reads { *src == buffer } else { *dst == buffer };
                    if hit {
                        ranges.extend(regions.iter().map(|r| {
                            let start = if reads { r.src_offset } else { r.dst_offset };
                            (start, start + r.size)
                        }));
                    }
                }
                Command::CopyBufferToImage { src, dst, regions } if reads && *src == buffer => {
                    ranges.extend(regions.iter().map(|r| self.image_region_span(*dst, r)));
                }
                Command::CopyImageToBuffer { src, dst, regions } if !reads && *dst == buffer => {
                    ranges.extend(regions.iter().map(|r| self.image_region_span(*src, r)));
                }
                _ => {}
            }
        }
        ranges
    }

    fn image_region_span(&self, image: vk::Image, region: &vk::BufferImageCopy) -> (u64, u64) {
        let texel = self.images.get(&image).map_or(4, |i| i.texel) as u64;
        let (row, height) = region_pitch(region);
        let size = u64::from(region.image_subresource.layer_count)
            * u64::from(region.image_extent.depth)
            * u64::from(height)
            * u64::from(row)
            * texel;
        (region.buffer_offset, region.buffer_offset + size)
    }

    // Execution.

    /// Run queued work up to and including the batch signaling `fence`.
    /// Returns whether such a batch was found.
    pub fn execute_until_fence(&mut self, fence: vk::Fence) -> bool {
        if !self.is_pending_fence(fence) {
            return false;
        }
        while let Some(op) = self.queue.pop_front() {
            let hit = matches!(&op, QueueOp::Batch { fence: f, .. } if *f == fence);
            self.execute(op);
            if hit {
                return true;
            }
        }
        false
    }

    pub fn execute_all(&mut self) {
        while let Some(op) = self.queue.pop_front() {
            self.execute(op);
        }
    }

    fn execute(&mut self, op: QueueOp) {
        match op {
            QueueOp::Batch {
                family,
                commands,
                fence,
                ..
            } => {
                for command in &commands {
                    self.run(family, command);
                }
                if let Some(signaled) = self.fences.get_mut(&fence) {
                    *signaled = true;
                }
            }
            QueueOp::Present { family, image } => {
                let Some(obj) = self.images.get_mut(&image) else {
                    self.violation(format!("presented image {image:?} no longer exists"));
                    return;
                };
                let sub = &mut obj.subresources[0];
                let mut problems = Vec::new();
                if sub.layout != vk::ImageLayout::PRESENT_SRC_KHR {
                    problems.push(format!(
                        "`{}` presented in layout {:?}",
                        obj.name, sub.layout
                    ));
                }
                match sub.owner {
                    Some(owner) if owner != family => problems.push(format!(
                        "`{}` presented on family {family} while owned by family {owner}",
                        obj.name
                    )),
                    _ => sub.owner = Some(family),
                }
                for problem in problems {
                    self.violation(problem);
                }
            }
        }
    }

    fn run(&mut self, family: u32, command: &Command) {
        match command {
            Command::Barrier(barrier) => self.apply_barrier(family, barrier),
            Command::CopyBuffer { src, dst, regions } => {
                self.claim_buffer(*src, family);
                self.claim_buffer(*dst, family);
                for region in regions {
                    self.copy_buffer(*src, *dst, region);
                }
            }
            Command::CopyBufferToImage { src, dst, regions } => {
                self.claim_buffer(*src, family);
                for region in regions {
                    self.check_image_use(
                        *dst,
                        family,
                        &region.image_subresource,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    );
                    self.copy_buffer_image(*src, *dst, region, true);
                }
            }
            Command::CopyImageToBuffer { src, dst, regions } => {
                self.claim_buffer(*dst, family);
                for region in regions {
                    self.check_image_use(
                        *src,
                        family,
                        &region.image_subresource,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    );
                    self.copy_buffer_image(*dst, *src, region, false);
                }
            }
            Command::Blit { src, dst, regions } => {
                for region in regions {
                    self.check_image_use(
                        *src,
                        family,
                        &region.src_subresource,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    );
                    self.check_image_use(
                        *dst,
                        family,
                        &region.dst_subresource,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    );
                    self.blit(*src, *dst, region);
                }
            }
            Command::BindDescriptorSet {
                set,
                dynamic_offsets,
            } => {
                if !self.descriptor_sets.contains_key(set) {
                    self.violation(format!("bound descriptor set {set:?} was freed"));
                }
                self.bound_sets.push((*set, dynamic_offsets.clone()));
            }
        }
    }

    fn apply_barrier(&mut self, family: u32, barrier: &PipelineBarrier) {
        for b in &barrier.barriers {
            match barrier.kind {
                BarrierKind::Release if family != b.src_queue_family => {
                    self.violation(format!(
                        "release from family {} recorded on family {family}",
                        b.src_queue_family
                    ));
                }
                BarrierKind::Acquire if family != b.dst_queue_family => {
                    self.violation(format!(
                        "acquire for family {} recorded on family {family}",
                        b.dst_queue_family
                    ));
                }
                _ => {}
            }

            match b.target {
                BarrierTarget::Buffer { buffer, .. } => match barrier.kind {
                    BarrierKind::Local => self.claim_buffer(buffer, family),
                    BarrierKind::Release => self.claim_buffer(buffer, b.src_queue_family),
                    BarrierKind::Acquire => {
                        if let Some(obj) = self.buffers.get_mut(&buffer) {
                            obj.owner = Some(b.dst_queue_family);
                        }
                    }
                },
                BarrierTarget::Image { image, range } => {
                    let mut problems = Vec::new();
                    let Some(obj) = self.images.get_mut(&image) else {
                        self.violation(format!("barrier on unknown image {image:?}"));
                        continue;
                    };
                    for layer in range.base_array_layer..range.base_array_layer + range.layer_count {
                        for level in range.base_mip_level..range.base_mip_level + range.level_count
                        {
                            let index = obj.index(layer, level);
                            let Some(sub) = obj.subresources.get_mut(index) else {
                                problems.push(format!(
                                    "barrier on `{}` outside its subresources",
                                    obj.name
                                ));
                                continue;
                            };
                            let released = barrier.kind == BarrierKind::Acquire
                                && sub.layout == b.new_layout;
                            if !released
                                && b.old_layout != vk::ImageLayout::UNDEFINED
                                && b.old_layout != sub.layout
                            {
                                problems.push(format!(
                                    "`{}` layer {layer} level {level}: barrier from {:?} but image is in {:?}",
                                    obj.name, b.old_layout, sub.layout
                                ));
                            }
                            sub.layout = b.new_layout;

                            let claimant = match barrier.kind {
                                BarrierKind::Local => Some(family),
                                BarrierKind::Release => Some(b.src_queue_family),
                                BarrierKind::Acquire => {
                                    sub.owner = Some(b.dst_queue_family);
                                    None
                                }
                            };
                            if let Some(claimant) = claimant {
                                match sub.owner {
                                    Some(owner) if owner != claimant => problems.push(format!(
                                        "`{}` used on family {claimant} while owned by family {owner}",
                                        obj.name
                                    )),
                                    _ => sub.owner = Some(claimant),
                                }
                            }
                        }
                    }
                    for problem in problems {
                        self.violation(problem);
                    }
                }
            }
        }
    }

    fn claim_buffer(&mut self, buffer: vk::Buffer, family: u32) {
        let problem = match self.buffers.get_mut(&buffer) {
            None => Some(format!("command uses unknown buffer {buffer:?}")),
            Some(obj) => match obj.owner {
                Some(owner) if owner != family => Some(format!(
                    "`{}` used on family {family} while owned by family {owner}",
                    obj.name
                )),
                _ => {
                    obj.owner = Some(family);
                    None
                }
            },
        };
        if let Some(problem) = problem {
            self.violation(problem);
        }
    }

    fn check_image_use(
        &mut self,
        image: vk::Image,
        family: u32,
        layers: &vk::ImageSubresourceLayers,
        layout: vk::ImageLayout,
    ) {
        let mut problems = Vec::new();
        match self.images.get_mut(&image) {
            None => problems.push(format!("command uses unknown image {image:?}")),
            Some(obj) => {
                for layer in layers.base_array_layer..layers.base_array_layer + layers.layer_count {
                    let index = obj.index(layer, layers.mip_level);
                    let Some(sub) = obj.subresources.get_mut(index) else {
                        problems.push(format!("copy outside the subresources of `{}`", obj.name));
                        continue;
                    };
                    if sub.layout != layout {
                        problems.push(format!(
                            "`{}` layer {layer} level {} used as {layout:?} while in {:?}",
                            obj.name, layers.mip_level, sub.layout
                        ));
                    }
                    match sub.owner {
                        Some(owner) if owner != family => problems.push(format!(
                            "`{}` used on family {family} while owned by family {owner}",
                            obj.name
                        )),
                        _ => sub.owner = Some(family),
                    }
                }
            }
        }
        for problem in problems {
            self.violation(problem);
        }
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, region: &vk::BufferCopy) {
        let start = region.src_offset as usize;
        let end = start + region.size as usize;
        let Some(bytes) = self
            .buffers
            .get(&src)
            .and_then(|obj| obj.data.get(start..end))
            .map(<[u8]>::to_vec)
        else {
            self.violation(format!("buffer copy reads past the end of {src:?}"));
            return;
        };
        let start = region.dst_offset as usize;
        let target = self
            .buffers
            .get_mut(&dst)
            .and_then(|obj| obj.data.get_mut(start..start + bytes.len()));
        match target {
            Some(target) => target.copy_from_slice(&bytes),
            None => self.violation(format!("buffer copy writes past the end of {dst:?}")),
        }
    }

    /// Copy between a buffer and an image. `to_image` selects the direction.
    fn copy_buffer_image(
        &mut self,
        buffer: vk::Buffer,
        image: vk::Image,
        region: &vk::BufferImageCopy,
        to_image: bool,
    ) {
        let Some(mut buffer_obj) = self.buffers.remove(&buffer) else {
            return;
        };
        let mut problem = None;
        if let Some(obj) = self.images.get_mut(&image) {
            let texel = obj.texel;
            let level = region.image_subresource.mip_level;
            let full = obj.level_extent(level);
            let e = region.image_extent;
            let (row, height) = region_pitch(region);
            let (ox, oy, oz) = (
                region.image_offset.x.max(0) as usize,
                region.image_offset.y.max(0) as usize,
                region.image_offset.z.max(0) as usize,
            );
            let row_bytes = e.width as usize * texel;
            let layer_bytes = row as usize * height as usize * e.depth as usize * texel;

            'copy: for i in 0..region.image_subresource.layer_count {
                let layer = region.image_subresource.base_array_layer + i;
                let index = obj.index(layer, level);
                let Some(sub) = obj.subresources.get_mut(index) else {
                    problem = Some(format!("copy outside the subresources of `{}`", obj.name));
                    break;
                };
                for z in 0..e.depth as usize {
                    for y in 0..e.height as usize {
                        let b = region.buffer_offset as usize
                            + i as usize * layer_bytes
                            + (z * height as usize + y) * row as usize * texel;
                        let t = (((oz + z) * full.height as usize + oy + y)
                            * full.width as usize
                            + ox)
                            * texel;
                        let (Some(buf), Some(img)) = (
                            buffer_obj.data.get_mut(b..b + row_bytes),
                            sub.data.get_mut(t..t + row_bytes),
                        ) else {
                            problem = Some(format!(
                                "buffer/image copy out of bounds for `{}`",
                                obj.name
                            ));
                            break 'copy;
                        };
                        if to_image {
                            img.copy_from_slice(buf);
                        } else {
                            buf.copy_from_slice(img);
                        }
                    }
                }
            }
        }
        self.buffers.insert(buffer, buffer_obj);
        if let Some(problem) = problem {
            self.violation(problem);
        }
    }

    /// Nearest-neighbour blit between two levels of one image or two images.
    fn blit(&mut self, src: vk::Image, dst: vk::Image, region: &vk::ImageBlit) {
        let Some(source) = self.images.get(&src) else {
            return;
        };
        let texel = source.texel;
        let src_level = region.src_subresource.mip_level;
        let src_extent = source.level_extent(src_level);
        let src_layers: Vec<Vec<u8>> = (0..region.src_subresource.layer_count)
            .filter_map(|i| {
                let index = source.index(region.src_subresource.base_array_layer + i, src_level);
                source.subresources.get(index).map(|s| s.data.clone())
            })
            .collect();

        let Some(target) = self.images.get_mut(&dst) else {
            return;
        };
        let dst_level = region.dst_subresource.mip_level;
        let dst_extent = target.level_extent(dst_level);
        for (i, src_data) in src_layers.iter().enumerate() {
            let index = target.index(region.dst_subresource.base_array_layer + i as u32, dst_level);
            let Some(sub) = target.subresources.get_mut(index) else {
                continue;
            };
            for y in 0..dst_extent.height as usize {
                let sy = y * src_extent.height as usize / dst_extent.height as usize;
                for x in 0..dst_extent.width as usize {
                    let sx = x * src_extent.width as usize / dst_extent.width as usize;
                    let s = (sy * src_extent.width as usize + sx) * texel;
                    let d = (y * dst_extent.width as usize + x) * texel;
                    if let (Some(from), Some(to)) =
                        (src_data.get(s..s + texel), sub.data.get_mut(d..d + texel))
                    {
                        to.copy_from_slice(from);
                    }
                }
            }
        }
    }
}

/// Row length and image height of a copy region's buffer side, in texels.
fn region_pitch(region: &vk::BufferImageCopy) -> (u32, u32) {
    let row = if region.buffer_row_length == 0 {
        region.image_extent.width
    } else {
        region.buffer_row_length
    };
    let height = if region.buffer_image_height == 0 {
        region.image_extent.height
    } else {
        region.buffer_image_height
    };
    (row, height)
}
