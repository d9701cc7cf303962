//! Headless software implementation of [`GpuDevice`].

use crate::state::{
    BufferObject, Command, CommandBufferObject, DescriptorPoolObject, DescriptorSetObject, Event,
    ImageObject, LiveObjects, QueueOp, State,
};
use crate::surface::HeadlessSurface;
use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use vireo_gpu::barrier::PipelineBarrier;
use vireo_gpu::device::{
    format_texel_size, BufferInfo, DescriptorWrite, DeviceLimits, GpuDevice, ImageInfo,
    ImageViewInfo, LayoutBinding, QueueFamilies, QueueKind, SubmitInfo,
};
use vireo_gpu::{GpuError, Result};

/// Device that executes transfers on host memory and validates
/// synchronization instead of rendering.
pub struct HeadlessDevice {
    state: Arc<Mutex<State>>,
}

impl HeadlessDevice {
    /// Device whose graphics, present and transfer queues share family 0.
    pub fn new() -> Arc<Self> {
        Self::with_families(QueueFamilies {
            graphics: 0,
            present: 0,
            transfer: 0,
        })
    }

    /// Device with presentation on its own queue family (1).
    pub fn with_separate_present() -> Arc<Self> {
        Self::with_families(QueueFamilies {
            graphics: 0,
            present: 1,
            transfer: 0,
        })
    }

    pub fn with_families(families: QueueFamilies) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(State::new(families))),
        })
    }

    /// A surface presenting through this device.
    pub fn create_surface(&self, width: u32, height: u32) -> HeadlessSurface {
        HeadlessSurface::new(self.state.clone(), vk::Extent2D { width, height })
    }

    pub fn set_limits(&self, limits: DeviceLimits) {
        self.state.lock().limits = limits;
    }

    /// Make the next descriptor set allocation fail with `result`.
    pub fn fail_next_descriptor_allocation(&self, result: vk::Result) {
        self.state.lock().pool_failures.push_back(result);
    }

    /// Make the next command buffer allocation return no buffers.
    pub fn return_no_command_buffers(&self) {
        self.state.lock().empty_allocations += 1;
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    /// Drain the event log.
    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.state.lock().events)
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Panic with every recorded violation, if any.
    pub fn assert_no_violations(&self) {
        let violations = self.violations();
        assert!(
            violations.is_empty(),
            "synchronization violations:\n  {}",
            violations.join("\n  ")
        );
    }

    pub fn live_objects(&self) -> LiveObjects {
        self.state.lock().live_objects()
    }

    /// Submissions recorded but not executed yet.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn fence_waits(&self) -> usize {
        self.count_events(|e| matches!(e, Event::FenceWait(_)))
    }

    pub fn submissions(&self, queue: QueueKind) -> usize {
        self.count_events(|e| matches!(e, Event::Submit { queue: q, .. } if *q == queue))
    }

    pub fn descriptor_updates(&self) -> usize {
        self.count_events(|e| matches!(e, Event::DescriptorUpdate { .. }))
    }

    fn count_events(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| f(e)).count()
    }

    /// Commands recorded into `cb` since it was last begun.
    pub fn recorded_commands(&self, cb: vk::CommandBuffer) -> usize {
        self.state
            .lock()
            .command_buffers
            .get(&cb)
            .map_or(0, |obj| obj.commands.len())
    }

    /// Descriptor sets bound by executed command buffers, with their
    /// dynamic offsets.
    pub fn bound_sets(&self) -> Vec<(vk::DescriptorSet, Vec<u32>)> {
        self.state.lock().bound_sets.clone()
    }

    /// Contents of a buffer as the device sees them.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).map(|b| b.data.clone())
    }

    pub fn buffer_owner(&self, buffer: vk::Buffer) -> Option<u32> {
        self.state.lock().buffers.get(&buffer).and_then(|b| b.owner)
    }

    /// Texels of one subresource.
    pub fn image_contents(&self, image: vk::Image, layer: u32, level: u32) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let obj = state.images.get(&image)?;
        obj.subresources
            .get(obj.index(layer, level))
            .map(|s| s.data.clone())
    }

    pub fn image_layout(&self, image: vk::Image, layer: u32, level: u32) -> Option<vk::ImageLayout> {
        let state = self.state.lock();
        let obj = state.images.get(&image)?;
        obj.subresources.get(obj.index(layer, level)).map(|s| s.layout)
    }

    pub fn image_owner(&self, image: vk::Image, layer: u32, level: u32) -> Option<u32> {
        let state = self.state.lock();
        let obj = state.images.get(&image)?;
        obj.subresources
            .get(obj.index(layer, level))
            .and_then(|s| s.owner)
    }

    /// Descriptor pool capacities in creation order.
    pub fn descriptor_pool_sizes(&self) -> Vec<u32> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::DescriptorPoolCreated { max_sets } => Some(*max_sets),
                _ => None,
            })
            .collect()
    }

    fn record(&self, cb: vk::CommandBuffer, command: Command) {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&cb) {
            Some(obj) if obj.recording => obj.commands.push(command),
            Some(_) => state.violation(format!("command recorded into {cb:?} outside begin/end")),
            None => state.violation(format!("command recorded into unknown {cb:?}")),
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn queue_families(&self) -> QueueFamilies {
        self.state.lock().families
    }

    fn limits(&self) -> DeviceLimits {
        self.state.lock().limits
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push(Event::WaitIdle);
        state.execute_all();
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = state.mint();
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let fence = state.mint();
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if state.is_pending_fence(fence) {
            state.violation(format!("{fence:?} destroyed while its submission is pending"));
        }
        state.fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push(Event::FenceWait(fence));
        match state.fences.get(&fence) {
            None => return Err(GpuError::InvalidState(format!("unknown fence {fence:?}"))),
            Some(true) => return Ok(()),
            Some(false) => {}
        }
        if state.execute_until_fence(fence) {
            Ok(())
        } else {
            // Nothing will ever signal it
            Err(GpuError::Vulkan(vk::Result::TIMEOUT))
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_pending_fence(fence) {
            state.violation(format!("{fence:?} reset while its submission is pending"));
        }
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(GpuError::InvalidState(format!("unknown fence {fence:?}"))),
        }
    }

    fn create_command_pool(&self, queue: QueueKind) -> Result<vk::CommandPool> {
        let mut state = self.state.lock();
        let pool = state.mint();
        let family = state.family(queue);
        state.command_pools.insert(pool, family);
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        let buffers: Vec<vk::CommandBuffer> = state
            .command_buffers
            .iter()
            .filter(|(_, obj)| obj.pool == pool)
            .map(|(cb, _)| *cb)
            .collect();
        for cb in buffers {
            if state.is_pending_cb(cb) {
                state.violation(format!("pool of pending {cb:?} destroyed"));
            }
            state.command_buffers.remove(&cb);
        }
        state.command_pools.remove(&pool);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        let family = *state
            .command_pools
            .get(&pool)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown command pool {pool:?}")))?;
        if state.empty_allocations > 0 {
            state.empty_allocations -= 1;
            return Ok(Vec::new());
        }
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let cb = state.mint();
            state.command_buffers.insert(
                cb,
                CommandBufferObject {
                    family,
                    pool,
                    commands: Vec::new(),
                    recording: false,
                },
            );
            buffers.push(cb);
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for &cb in buffers {
            if state.is_pending_cb(cb) {
                state.violation(format!("{cb:?} freed while pending"));
            }
            state.command_buffers.remove(&cb);
        }
    }

    fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_pending_cb(cb) {
            state.violation(format!("{cb:?} reset while pending"));
        }
        let obj = state
            .command_buffers
            .get_mut(&cb)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown {cb:?}")))?;
        obj.commands.clear();
        obj.recording = false;
        Ok(())
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_pending_cb(cb) {
            state.violation(format!("{cb:?} re-recorded while pending"));
        }
        let obj = state
            .command_buffers
            .get_mut(&cb)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown {cb:?}")))?;
        obj.commands.clear();
        obj.recording = true;
        Ok(())
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let obj = state
            .command_buffers
            .get_mut(&cb)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown {cb:?}")))?;
        if !obj.recording {
            return Err(GpuError::InvalidState(format!("{cb:?} is not recording")));
        }
        obj.recording = false;
        Ok(())
    }

    fn submit(&self, queue: QueueKind, submit: &SubmitInfo<'_>) -> Result<()> {
        let mut state = self.state.lock();
        let family = state.family(queue);
        let by = format!("{queue:?} submission");

        let mut commands = Vec::new();
        for cb in submit.command_buffers {
            let Some(obj) = state.command_buffers.get(cb) else {
                return Err(GpuError::InvalidState(format!("unknown {cb:?}")));
            };
            let problem = if obj.recording {
                Some(format!("{cb:?} submitted while still recording"))
            } else if obj.family != family {
                Some(format!(
                    "{cb:?} from family {} submitted to family {family}",
                    obj.family
                ))
            } else {
                None
            };
            commands.extend(obj.commands.iter().cloned());
            if let Some(problem) = problem {
                state.violation(problem);
            }
            if state.is_pending_cb(*cb) {
                state.violation(format!("{cb:?} submitted again while pending"));
            }
        }

        for &semaphore in submit.wait_semaphores {
            state.consume_semaphore(semaphore, &by);
        }
        for &semaphore in submit.signal_semaphores {
            state.signal_semaphore(semaphore, &by);
        }
        if submit.fence != vk::Fence::null() {
            if state.fences.get(&submit.fence) == Some(&true) {
                state.violation(format!("{:?} submitted while signaled", submit.fence));
            }
            if state.is_pending_fence(submit.fence) {
                state.violation(format!("{:?} submitted twice", submit.fence));
            }
        }

        state.events.push(Event::Submit {
            queue,
            command_buffers: submit.command_buffers.to_vec(),
            wait: submit.wait_semaphores.to_vec(),
            signal: submit.signal_semaphores.to_vec(),
            fence: submit.fence,
        });
        state.queue.push_back(QueueOp::Batch {
            family,
            commands,
            command_buffers: submit.command_buffers.to_vec(),
            fence: submit.fence,
        });
        Ok(())
    }

    fn cmd_pipeline_barrier(&self, cb: vk::CommandBuffer, barrier: &PipelineBarrier) {
        self.record(cb, Command::Barrier(barrier.clone()));
    }

    fn cmd_copy_buffer(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.record(
            cb,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        self.record(
            cb,
            Command::CopyBufferToImage {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.record(
            cb,
            Command::CopyImageToBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_blit_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        regions: &[vk::ImageBlit],
        _filter: vk::Filter,
    ) {
        self.record(
            cb,
            Command::Blit {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn create_buffer(&self, info: &BufferInfo<'_>) -> Result<vk::Buffer> {
        let mut state = self.state.lock();
        let buffer = state.mint();
        state.buffers.insert(
            buffer,
            BufferObject {
                name: info.name.to_string(),
                data: vec![0; info.size as usize],
                host_visible: info.location != MemoryLocation::GpuOnly,
                owner: None,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) -> Result<()> {
        let mut state = self.state.lock();
        if state.buffer_in_use(buffer) {
            let name = state.buffers.get(&buffer).map(|b| b.name.clone());
            state.violation(format!(
                "buffer `{}` destroyed while a pending submission uses it",
                name.unwrap_or_default()
            ));
        }
        state
            .buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidState(format!("unknown buffer {buffer:?}")))
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let end = offset + data.len() as u64;
        let overlapping = state
            .pending_buffer_ranges(buffer, true)
            .into_iter()
            .any(|(start, stop)| start < end && offset < stop);

        let obj = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown buffer {buffer:?}")))?;
        if !obj.host_visible {
            return Err(GpuError::InvalidState(format!(
                "buffer `{}` is not host visible",
                obj.name
            )));
        }
        let name = obj.name.clone();
        let target = obj
            .data
            .get_mut(offset as usize..end as usize)
            .ok_or_else(|| GpuError::InvalidState(format!("write past the end of `{name}`")))?;
        target.copy_from_slice(data);

        if overlapping {
            state.violation(format!(
                "host write to `{name}` overlaps a pending transfer reading it"
            ));
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        let end = offset + out.len() as u64;
        let overlapping = state
            .pending_buffer_ranges(buffer, false)
            .into_iter()
            .any(|(start, stop)| start < end && offset < stop);

        let obj = state
            .buffers
            .get(&buffer)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown buffer {buffer:?}")))?;
        if !obj.host_visible {
            return Err(GpuError::InvalidState(format!(
                "buffer `{}` is not host visible",
                obj.name
            )));
        }
        let name = obj.name.clone();
        let source = obj
            .data
            .get(offset as usize..end as usize)
            .ok_or_else(|| GpuError::InvalidState(format!("read past the end of `{name}`")))?;
        out.copy_from_slice(source);

        if overlapping {
            state.violation(format!(
                "host read of `{name}` before the pending copy into it executed"
            ));
        }
        Ok(())
    }

    fn create_image(&self, info: &ImageInfo<'_>) -> Result<vk::Image> {
        let mut state = self.state.lock();
        let image = state.mint();
        let texel = format_texel_size(info.format).unwrap_or(4) as usize;
        state.images.insert(
            image,
            ImageObject::new(
                info.name.to_string(),
                info.extent,
                info.mip_levels,
                info.array_layers,
                texel,
            ),
        );
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) -> Result<()> {
        let mut state = self.state.lock();
        if state.image_in_use(image) {
            state.violation(format!(
                "image {image:?} destroyed while a pending submission uses it"
            ));
        }
        state
            .images
            .remove(&image)
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidState(format!("unknown image {image:?}")))
    }

    fn create_image_view(&self, image: vk::Image, _info: &ImageViewInfo) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&image) {
            return Err(GpuError::InvalidState(format!("unknown image {image:?}")));
        }
        let view = state.mint();
        state.views.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().views.remove(&view);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut state = self.state.lock();
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::InvalidState("framebuffer with zero extent".into()));
        }
        if let Some(view) = attachments.iter().find(|v| !state.views.contains_key(v)) {
            return Err(GpuError::InvalidState(format!("unknown image view {view:?}")));
        }
        let framebuffer = state.mint();
        state.framebuffers.insert(framebuffer);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let mut state = self.state.lock();
        let layout = state.mint();
        state.set_layouts.insert(layout, bindings.to_vec());
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().set_layouts.remove(&layout);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let pool = state.mint();
        let mut remaining = HashMap::new();
        for size in sizes {
            *remaining.entry(size.ty).or_insert(0) += size.descriptor_count;
        }
        state.descriptor_pools.insert(
            pool,
            DescriptorPoolObject {
                max_sets,
                live_sets: 0,
                remaining,
            },
        );
        state.events.push(Event::DescriptorPoolCreated { max_sets });
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        state.descriptor_sets.retain(|_, set| set.pool != pool);
        state.descriptor_pools.remove(&pool);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        if let Some(failure) = state.pool_failures.pop_front() {
            return Err(GpuError::Vulkan(failure));
        }
        let bindings = state
            .set_layouts
            .get(&layout)
            .cloned()
            .ok_or_else(|| GpuError::InvalidState(format!("unknown layout {layout:?}")))?;
        let obj = state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown pool {pool:?}")))?;

        if obj.live_sets + count > obj.max_sets {
            return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        let mut needed: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for binding in &bindings {
            *needed.entry(binding.ty).or_insert(0) += binding.count * count;
        }
        for (ty, need) in &needed {
            if obj.remaining.get(ty).copied().unwrap_or(0) < *need {
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
            }
        }
        for (ty, need) in needed {
            if let Some(left) = obj.remaining.get_mut(&ty) {
                *left -= need;
            }
        }
        obj.live_sets += count;

        let mut sets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let set = state.mint();
            state.descriptor_sets.insert(
                set,
                DescriptorSetObject {
                    pool,
                    layout,
                    writes: HashMap::new(),
                },
            );
            sets.push(set);
        }
        Ok(sets)
    }

    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()> {
        let mut state = self.state.lock();
        for set in sets {
            let Some(obj) = state.descriptor_sets.remove(set) else {
                return Err(GpuError::InvalidState(format!("unknown descriptor set {set:?}")));
            };
            if obj.pool != pool {
                state.violation(format!("{set:?} freed to a pool it did not come from"));
            }
            let bindings = state.set_layouts.get(&obj.layout).cloned().unwrap_or_default();
            if let Some(pool) = state.descriptor_pools.get_mut(&obj.pool) {
                pool.live_sets -= 1;
                for binding in bindings {
                    *pool.remaining.entry(binding.ty).or_insert(0) += binding.count;
                }
            }
        }
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        for write in writes {
            let problem = match state.descriptor_sets.get(&write.set) {
                None => Some(format!("update of unknown descriptor set {:?}", write.set)),
                Some(set) => {
                    let declared = state
                        .set_layouts
                        .get(&set.layout)
                        .and_then(|b| b.iter().find(|b| b.binding == write.binding))
                        .map(|b| b.ty);
                    match declared {
                        Some(ty) if ty == write.ty => None,
                        other => Some(format!(
                            "write of {:?} to binding {} declared as {other:?}",
                            write.ty, write.binding
                        )),
                    }
                }
            };
            match problem {
                Some(problem) => state.violation(problem),
                None => {
                    if let Some(set) = state.descriptor_sets.get_mut(&write.set) {
                        set.writes.insert(write.binding, write.payload.clone());
                    }
                }
            }
        }
        state.events.push(Event::DescriptorUpdate {
            writes: writes.len(),
        });
    }

    fn cmd_bind_descriptor_set(
        &self,
        cb: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _pipeline_layout: vk::PipelineLayout,
        _set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        self.record(
            cb,
            Command::BindDescriptorSet {
                set,
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        );
    }
}

/// Record commands into a fresh command buffer on `queue`, submit, and wait.
///
/// The headless counterpart of a one-time-submit helper; works with any
/// [`GpuDevice`].
pub fn submit_and_wait<F>(device: &dyn GpuDevice, queue: QueueKind, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let pool = device.create_command_pool(queue)?;
    let result = (|| {
        let cb = device
            .allocate_command_buffers(pool, 1)?
            .pop()
            .ok_or_else(|| GpuError::Other("no command buffer allocated".into()))?;
        let fence = device.create_fence(false)?;
        let submitted = (|| {
            device.begin_command_buffer(cb)?;
            record(cb)?;
            device.end_command_buffer(cb)?;
            device.submit(
                queue,
                &SubmitInfo {
                    command_buffers: &[cb],
                    fence,
                    ..SubmitInfo::default()
                },
            )?;
            device.wait_for_fence(fence, u64::MAX)
        })();
        device.destroy_fence(fence);
        submitted
    })();
    device.destroy_command_pool(pool);
    result
}
