//! Tracked GPU resources.
//!
//! [`Buffer`] and [`Texture`] own their device handle and carry the
//! synchronization state the barrier planner works from. Buffers keep one
//! [`ResourceState`]; textures keep one per (array layer, mip level) so that
//! partial views can be transitioned independently.

use crate::barrier::{
    self, BarrierPlan, BarrierTarget, OwnershipTransfer, ResourceState, SubresourceRange,
    Transition, Usage,
};
use crate::device::{
    format_aspect, format_texel_size, BufferInfo, DeviceRef, GpuDevice, ImageInfo,
    ImageViewInfo,
};
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Round `value` up to a multiple of `alignment` (0 and 1 mean no alignment).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// The state a resource rests in between uploads: the first use it was
/// created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarliestUse {
    pub layout: vk::ImageLayout,
    pub usage: Usage,
    pub stages: vk::PipelineStageFlags,
}

impl EarliestUse {
    pub const fn new(layout: vk::ImageLayout, usage: Usage, stages: vk::PipelineStageFlags) -> Self {
        Self {
            layout,
            usage,
            stages,
        }
    }

    pub const fn vertex_buffer() -> Self {
        Self::new(
            vk::ImageLayout::UNDEFINED,
            Usage::VertexBuffer,
            vk::PipelineStageFlags::VERTEX_INPUT,
        )
    }

    pub const fn index_buffer() -> Self {
        Self::new(
            vk::ImageLayout::UNDEFINED,
            Usage::IndexBuffer,
            vk::PipelineStageFlags::VERTEX_INPUT,
        )
    }

    pub const fn uniform(stages: vk::PipelineStageFlags) -> Self {
        Self::new(vk::ImageLayout::UNDEFINED, Usage::UniformRead, stages)
    }

    pub const fn storage(stages: vk::PipelineStageFlags) -> Self {
        Self::new(vk::ImageLayout::UNDEFINED, Usage::ShaderWrite, stages)
    }

    pub const fn sampled(stages: vk::PipelineStageFlags) -> Self {
        Self::new(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, Usage::ShaderRead, stages)
    }

    pub const fn color_attachment() -> Self {
        Self::new(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Usage::ColorAttachment,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )
    }

    /// The transition back to this use on `queue_family`.
    pub const fn on_queue(self, queue_family: u32) -> Transition {
        Transition::new(self.layout, self.usage, self.stages, queue_family)
    }
}

/// Association between a device-only resource and the host-visible buffer
/// used to stage its transfers.
#[derive(Debug)]
pub struct StagingBinding {
    buffer: vk::Buffer,
    capacity: u64,
    byte_offset: u64,
    element_offset: u64,
    owned: Option<Box<Buffer>>,
}

impl StagingBinding {
    /// Staging buffer handle.
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    /// Total size of the staging buffer in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    pub fn element_offset(&self) -> u64 {
        self.element_offset
    }

    /// Whether the staging buffer is created and destroyed with its owner.
    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    /// Offset in the staging buffer where the owner's byte 0 lives.
    pub fn base_offset(&self, stride: u64) -> u64 {
        self.byte_offset + self.element_offset * stride
    }
}

/// Description of a [`Buffer`].
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub name: String,
    /// Tight size of one element.
    pub element_size: u64,
    pub element_count: u64,
    /// Element stride alignment (e.g. the dynamic uniform offset alignment).
    pub alignment: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    pub earliest_use: EarliestUse,
}

impl BufferDesc {
    /// An untyped buffer of `size` bytes.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            element_size: 1,
            element_count: size,
            alignment: 1,
            usage: vk::BufferUsageFlags::empty(),
            location: MemoryLocation::GpuOnly,
            earliest_use: EarliestUse::new(
                vk::ImageLayout::UNDEFINED,
                Usage::General,
                vk::PipelineStageFlags::VERTEX_INPUT,
            ),
        }
    }

    /// A buffer of `count` elements of `element_size` bytes.
    pub fn elements(name: impl Into<String>, element_size: u64, count: u64) -> Self {
        Self {
            element_size,
            element_count: count,
            ..Self::new(name, 0)
        }
    }

    /// Align each element to `alignment` bytes.
    pub fn aligned(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }

    pub fn earliest_use(mut self, earliest_use: EarliestUse) -> Self {
        self.earliest_use = earliest_use;
        self
    }

    /// Distance between consecutive elements.
    pub fn stride(&self) -> u64 {
        align_up(self.element_size, self.alignment)
    }

    /// Total size in bytes.
    pub fn capacity(&self) -> u64 {
        self.stride() * self.element_count
    }
}

/// A GPU buffer with tracked synchronization state.
pub struct Buffer {
    device: DeviceRef,
    handle: vk::Buffer,
    name: String,
    element_size: u64,
    element_count: u64,
    stride: u64,
    location: MemoryLocation,
    earliest_use: EarliestUse,
    state: ResourceState,
    staging: Option<StagingBinding>,
}

impl Buffer {
    /// Create a buffer. Device-only buffers get transfer usage added so they
    /// can be staged.
    pub fn new(device: DeviceRef, desc: &BufferDesc) -> Result<Self> {
        let mut usage = desc.usage;
        if desc.location == MemoryLocation::GpuOnly {
            usage |= vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        }
        let capacity = desc.capacity();
        if capacity == 0 {
            return Err(GpuError::InvalidState(format!(
                "buffer `{}` has zero capacity",
                desc.name
            )));
        }

        let handle = device.create_buffer(&BufferInfo {
            name: &desc.name,
            size: capacity,
            usage,
            location: desc.location,
        })?;

        Ok(Self {
            device,
            handle,
            name: desc.name.clone(),
            element_size: desc.element_size,
            element_count: desc.element_count,
            stride: desc.stride(),
            location: desc.location,
            earliest_use: desc.earliest_use,
            state: ResourceState::UNUSED,
            staging: None,
        })
    }

    /// Create a host-visible staging buffer sized for `capacity` bytes.
    pub fn staging(device: DeviceRef, name: impl Into<String>, capacity: u64) -> Result<Self> {
        let desc = BufferDesc::new(name, capacity)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
            .location(MemoryLocation::CpuToGpu)
            .earliest_use(EarliestUse::new(
                vk::ImageLayout::UNDEFINED,
                Usage::HostWrite,
                vk::PipelineStageFlags::HOST,
            ));
        Self::new(device, &desc)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    pub fn capacity(&self) -> u64 {
        self.stride * self.element_count
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    /// Aligned distance between elements.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    pub fn is_host_visible(&self) -> bool {
        self.location != MemoryLocation::GpuOnly
    }

    pub fn earliest_use(&self) -> EarliestUse {
        self.earliest_use
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    /// Plan the barrier for the next use and advance the recorded state.
    pub fn transition(&mut self, target: &Transition) -> BarrierPlan {
        let plan = barrier::plan(&self.state, target, self.whole());
        self.state = target.resulting_state();
        plan
    }

    /// Record the same-queue barrier for the next use into `cb`, then
    /// advance the state.
    ///
    /// Fails with `ForeignQueueOwner`, recording nothing, if the buffer
    /// belongs to another queue family.
    pub fn record_transition(
        &mut self,
        device: &dyn GpuDevice,
        cb: vk::CommandBuffer,
        target: &Transition,
    ) -> Result<()> {
        if self.state.owned_by_other(target.queue_family) {
            return Err(GpuError::ForeignQueueOwner {
                resource: self.name.clone(),
                owner: self.state.queue_family,
                requested: target.queue_family,
            });
        }
        barrier::plan(&self.state, target, self.whole()).record_local(device, cb)?;
        self.state = target.resulting_state();
        Ok(())
    }

    /// Move ownership from queue family `from` to `to`.
    ///
    /// Fails without touching the state if `from == to` or the buffer is not
    /// currently owned by `from`.
    pub fn transfer_ownership(
        &mut self,
        from: u32,
        to: u32,
        target: &Transition,
    ) -> Result<OwnershipTransfer> {
        check_ownership_request(&self.name, self.state.queue_family, from, to)?;
        match self.transition(&target.on_queue(to)) {
            BarrierPlan::Transfer(transfer) => Ok(transfer),
            BarrierPlan::Local(_) => Err(GpuError::InvalidState(format!(
                "`{}` did not change queue family",
                self.name
            ))),
        }
    }

    /// Bind an externally managed staging buffer.
    ///
    /// Replaces any previous binding; an owned staging buffer that gets
    /// replaced is returned so the caller can retire it once the GPU is done
    /// with it.
    pub fn bind_staging(
        &mut self,
        staging: &Buffer,
        byte_offset: u64,
        element_offset: u64,
    ) -> Result<Option<Buffer>> {
        if !staging.is_host_visible() {
            return Err(GpuError::InvalidState(format!(
                "staging buffer `{}` for `{}` is not host visible",
                staging.name, self.name
            )));
        }
        let previous = self.unbind_staging();
        self.staging = Some(StagingBinding {
            buffer: staging.handle,
            capacity: staging.capacity(),
            byte_offset,
            element_offset,
            owned: None,
        });
        Ok(previous)
    }

    /// Drop the current staging binding, returning it if it was owned.
    pub fn unbind_staging(&mut self) -> Option<Buffer> {
        self.staging
            .take()
            .and_then(|binding| binding.owned)
            .map(|owned| *owned)
    }

    pub fn staging_binding(&self) -> Option<&StagingBinding> {
        self.staging.as_ref()
    }

    /// Return the bound staging buffer, creating an owned one when allowed.
    pub(crate) fn resolve_staging(&mut self, may_own: bool) -> Result<&StagingBinding> {
        if self.staging.is_none() {
            if !may_own {
                return Err(GpuError::MissingStagingBuffer {
                    resource: self.name.clone(),
                });
            }
            let owned = Buffer::staging(
                self.device.clone(),
                format!("{} (staging)", self.name),
                self.capacity(),
            )?;
            tracing::debug!(
                resource = %self.name,
                bytes = owned.capacity(),
                "created owned staging buffer"
            );
            self.staging = Some(StagingBinding {
                buffer: owned.handle,
                capacity: owned.capacity(),
                byte_offset: 0,
                element_offset: 0,
                owned: Some(Box::new(owned)),
            });
        }
        self.staging
            .as_ref()
            .ok_or_else(|| GpuError::MissingStagingBuffer {
                resource: self.name.clone(),
            })
    }

    fn whole(&self) -> BarrierTarget {
        BarrierTarget::Buffer {
            buffer: self.handle,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.destroy_buffer(self.handle) {
            tracing::warn!(buffer = %self.name, "failed to destroy buffer: {e}");
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("capacity", &self.capacity())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn check_ownership_request(name: &str, owner: u32, from: u32, to: u32) -> Result<()> {
    if from == to {
        return Err(GpuError::InvalidState(format!(
            "ownership transfer of `{name}` within queue family {from}"
        )));
    }
    if owner == vk::QUEUE_FAMILY_IGNORED || to == vk::QUEUE_FAMILY_IGNORED {
        return Err(GpuError::InvalidState(format!(
            "`{name}` has no owner to release from; transition it directly"
        )));
    }
    if owner != from {
        return Err(GpuError::ForeignQueueOwner {
            resource: name.to_string(),
            owner,
            requested: from,
        });
    }
    Ok(())
}

/// Per-subresource state table, indexed by `layer * levels + level`.
#[derive(Debug, Clone)]
pub struct SubresourceStates {
    layers: u32,
    levels: u32,
    states: Vec<ResourceState>,
}

impl SubresourceStates {
    pub fn new(layers: u32, levels: u32) -> Self {
        Self {
            layers,
            levels,
            states: vec![ResourceState::UNUSED; (layers * levels) as usize],
        }
    }

    fn index(&self, layer: u32, level: u32) -> usize {
        debug_assert!(layer < self.layers && level < self.levels);
        (layer * self.levels + level) as usize
    }

    pub fn get(&self, layer: u32, level: u32) -> ResourceState {
        self.states[self.index(layer, level)]
    }

    fn indices<'a>(&'a self, range: &'a SubresourceRange) -> impl Iterator<Item = usize> + 'a {
        let layers = range.base_array_layer..range.base_array_layer + range.layer_count;
        layers.flat_map(move |layer| {
            (range.base_mip_level..range.base_mip_level + range.level_count)
                .map(move |level| self.index(layer, level))
        })
    }

    /// Whether every subresource in `range` is in `layout`.
    pub fn layouts_agree(&self, range: &SubresourceRange, layout: vk::ImageLayout) -> bool {
        self.indices(range).all(|i| self.states[i].layout == layout)
    }

    /// First owner in `range` that is neither unowned nor `family`.
    pub fn foreign_owner(&self, range: &SubresourceRange, family: u32) -> Option<u32> {
        self.indices(range)
            .map(|i| self.states[i])
            .find(|state| state.owned_by_other(family))
            .map(|state| state.queue_family)
    }

    pub fn set_range(&mut self, range: &SubresourceRange, state: ResourceState) {
        let indices: Vec<usize> = self.indices(range).collect();
        for i in indices {
            self.states[i] = state;
        }
    }

    pub fn contains(&self, range: &SubresourceRange) -> bool {
        range.level_count > 0
            && range.layer_count > 0
            && range.base_mip_level + range.level_count <= self.levels
            && range.base_array_layer + range.layer_count <= self.layers
    }
}

/// Description of a [`Texture`].
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub name: String,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub cube: bool,
    pub usage: vk::ImageUsageFlags,
    pub earliest_use: EarliestUse,
}

impl TextureDesc {
    pub fn new_2d(name: impl Into<String>, format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            cube: false,
            usage: vk::ImageUsageFlags::SAMPLED,
            earliest_use: EarliestUse::sampled(vk::PipelineStageFlags::FRAGMENT_SHADER),
        }
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels.max(1);
        self
    }

    /// Every level down to 1x1.
    pub fn full_mip_chain(mut self) -> Self {
        let largest = self.extent.width.max(self.extent.height).max(1);
        self.mip_levels = 32 - largest.leading_zeros();
        self
    }

    pub fn array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers.max(1);
        self
    }

    /// Six-layer cube map.
    pub fn cube(mut self) -> Self {
        self.cube = true;
        self.array_layers = 6;
        self
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn earliest_use(mut self, earliest_use: EarliestUse) -> Self {
        self.earliest_use = earliest_use;
        self
    }
}

/// A GPU image with per-subresource synchronization state.
pub struct Texture {
    device: DeviceRef,
    image: vk::Image,
    owned: bool,
    name: String,
    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    array_layers: u32,
    cube: bool,
    aspect: vk::ImageAspectFlags,
    earliest_use: EarliestUse,
    states: SubresourceStates,
    staging: Option<StagingBinding>,
}

impl Texture {
    /// Create a texture. Transfer usage is always added so it can be staged
    /// and mip-mapped.
    pub fn new(device: DeviceRef, desc: &TextureDesc) -> Result<Self> {
        let flags = if desc.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image = device.create_image(&ImageInfo {
            name: &desc.name,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            usage: desc.usage
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            flags,
        })?;

        Ok(Self {
            device,
            image,
            owned: true,
            name: desc.name.clone(),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            cube: desc.cube,
            aspect: format_aspect(desc.format),
            earliest_use: desc.earliest_use,
            states: SubresourceStates::new(desc.array_layers, desc.mip_levels),
            staging: None,
        })
    }

    /// Wrap an image owned by someone else (e.g. a swapchain image).
    pub fn borrowed(
        device: DeviceRef,
        image: vk::Image,
        name: impl Into<String>,
        format: vk::Format,
        extent: vk::Extent2D,
        earliest_use: EarliestUse,
    ) -> Self {
        Self {
            device,
            image,
            owned: false,
            name: name.into(),
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            cube: false,
            aspect: format_aspect(format),
            earliest_use,
            states: SubresourceStates::new(1, 1),
            staging: None,
        }
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn earliest_use(&self) -> EarliestUse {
        self.earliest_use
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    /// State of one subresource.
    pub fn state(&self, layer: u32, level: u32) -> ResourceState {
        self.states.get(layer, level)
    }

    /// Every level and layer.
    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange {
            aspect: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    /// All layers of one mip level.
    pub fn level_range(&self, level: u32) -> SubresourceRange {
        SubresourceRange::level(self.aspect, level, 0, self.array_layers)
    }

    /// Extent of a mip level.
    pub fn level_extent(&self, level: u32) -> vk::Extent3D {
        let shrink = |edge: u32| edge.checked_shr(level).unwrap_or(0).max(1);
        vk::Extent3D {
            width: shrink(self.extent.width),
            height: shrink(self.extent.height),
            depth: shrink(self.extent.depth),
        }
    }

    /// Bytes per texel, if the format is stageable.
    pub fn texel_size(&self) -> Option<u32> {
        format_texel_size(self.format)
    }

    /// Tightly packed size of one layer of a mip level.
    pub fn level_layer_size(&self, level: u32) -> Result<u64> {
        let texel = self.texel_size().ok_or_else(|| {
            GpuError::Other(format!(
                "format {:?} of `{}` cannot be staged",
                self.format, self.name
            ))
        })?;
        let e = self.level_extent(level);
        Ok(u64::from(e.width) * u64::from(e.height) * u64::from(e.depth) * u64::from(texel))
    }

    /// Offset of `(layer, level)` in the tightly packed staging layout
    /// (levels outermost, then layers).
    pub fn staging_offset(&self, layer: u32, level: u32) -> Result<u64> {
        let mut offset = 0;
        for l in 0..level {
            offset += self.level_layer_size(l)? * u64::from(self.array_layers);
        }
        Ok(offset + self.level_layer_size(level)? * u64::from(layer))
    }

    /// Tightly packed size of the whole texture.
    pub fn capacity(&self) -> Result<u64> {
        let mut total = 0;
        for level in 0..self.mip_levels {
            total += self.level_layer_size(level)? * u64::from(self.array_layers);
        }
        Ok(total)
    }

    /// Plan the barrier for the next use of `range` and advance the state of
    /// every subresource in it.
    ///
    /// The subresources must share one layout and owner beforehand; the
    /// state at `(base_array_layer, base_mip_level)` stands for all of them.
    pub fn transition(&mut self, range: SubresourceRange, target: &Transition) -> BarrierPlan {
        let plan = self.plan(range, target);
        self.states.set_range(&range, target.resulting_state());
        plan
    }

    /// Record the same-queue barrier for the next use of `range` into `cb`,
    /// then advance the state of every subresource in it.
    ///
    /// Fails with `ForeignQueueOwner`, recording nothing and leaving the
    /// state untouched, if any subresource in `range` belongs to another
    /// queue family.
    pub fn record_transition(
        &mut self,
        device: &dyn GpuDevice,
        cb: vk::CommandBuffer,
        range: SubresourceRange,
        target: &Transition,
    ) -> Result<()> {
        self.check_owner(range, target.queue_family)?;
        self.plan(range, target).record_local(device, cb)?;
        self.states.set_range(&range, target.resulting_state());
        Ok(())
    }

    /// Fail with `ForeignQueueOwner` if any subresource in `range` belongs
    /// to a queue family other than `family`.
    pub fn check_owner(&self, range: SubresourceRange, family: u32) -> Result<()> {
        match self.states.foreign_owner(&range, family) {
            Some(owner) => Err(GpuError::ForeignQueueOwner {
                resource: self.name.clone(),
                owner,
                requested: family,
            }),
            None => Ok(()),
        }
    }

    fn plan(&self, range: SubresourceRange, target: &Transition) -> BarrierPlan {
        debug_assert!(
            self.states.contains(&range),
            "range {range:?} outside `{}`",
            self.name
        );
        let current = self
            .states
            .get(range.base_array_layer, range.base_mip_level);
        debug_assert!(
            self.states.layouts_agree(&range, current.layout),
            "subresources of `{}` in {range:?} disagree on layout {:?}",
            self.name,
            current.layout
        );
        debug_assert!(
            self.states
                .foreign_owner(&range, current.queue_family)
                .is_none(),
            "subresources of `{}` in {range:?} disagree on owner",
            self.name
        );
        barrier::plan(
            &current,
            target,
            BarrierTarget::Image {
                image: self.image,
                range,
            },
        )
    }

    /// Transition every subresource.
    pub fn transition_all(&mut self, target: &Transition) -> BarrierPlan {
        self.transition(self.full_range(), target)
    }

    /// Move ownership of `range` from queue family `from` to `to`.
    pub fn transfer_ownership(
        &mut self,
        range: SubresourceRange,
        from: u32,
        to: u32,
        target: &Transition,
    ) -> Result<OwnershipTransfer> {
        let owner = self
            .states
            .get(range.base_array_layer, range.base_mip_level)
            .queue_family;
        check_ownership_request(&self.name, owner, from, to)?;
        match self.transition(range, &target.on_queue(to)) {
            BarrierPlan::Transfer(transfer) => Ok(transfer),
            BarrierPlan::Local(_) => Err(GpuError::InvalidState(format!(
                "`{}` did not change queue family",
                self.name
            ))),
        }
    }

    /// Forget the contents: the next barrier starts from `UNDEFINED`.
    ///
    /// `stages` becomes the source scope of that barrier, so it should name
    /// whatever semaphore wait precedes it.
    pub fn discard_contents(&mut self, stages: vk::PipelineStageFlags) {
        let range = self.full_range();
        let owner = self.states.get(0, 0).queue_family;
        self.states.set_range(
            &range,
            ResourceState {
                layout: vk::ImageLayout::UNDEFINED,
                access: vk::AccessFlags::empty(),
                stages,
                queue_family: owner,
            },
        );
    }

    /// Create a view over `range`. The caller destroys it.
    pub fn create_view(&self, range: SubresourceRange) -> Result<vk::ImageView> {
        let view_type = if self.cube && range.layer_count == 6 {
            vk::ImageViewType::CUBE
        } else if self.extent.depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else if range.layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        self.device.create_image_view(
            self.image,
            &ImageViewInfo {
                view_type,
                format: self.format,
                range: range.to_vk(),
            },
        )
    }

    /// Bind an externally managed staging buffer; see [`Buffer::bind_staging`].
    pub fn bind_staging(&mut self, staging: &Buffer, byte_offset: u64) -> Result<Option<Buffer>> {
        if !staging.is_host_visible() {
            return Err(GpuError::InvalidState(format!(
                "staging buffer `{}` for `{}` is not host visible",
                staging.name(),
                self.name
            )));
        }
        let previous = self.unbind_staging();
        self.staging = Some(StagingBinding {
            buffer: staging.handle(),
            capacity: staging.capacity(),
            byte_offset,
            element_offset: 0,
            owned: None,
        });
        Ok(previous)
    }

    pub fn unbind_staging(&mut self) -> Option<Buffer> {
        self.staging
            .take()
            .and_then(|binding| binding.owned)
            .map(|owned| *owned)
    }

    pub fn staging_binding(&self) -> Option<&StagingBinding> {
        self.staging.as_ref()
    }

    pub(crate) fn resolve_staging(&mut self, may_own: bool) -> Result<&StagingBinding> {
        if self.staging.is_none() {
            if !may_own {
                return Err(GpuError::MissingStagingBuffer {
                    resource: self.name.clone(),
                });
            }
            let owned = Buffer::staging(
                self.device.clone(),
                format!("{} (staging)", self.name),
                self.capacity()?,
            )?;
            tracing::debug!(
                resource = %self.name,
                bytes = owned.capacity(),
                "created owned staging buffer"
            );
            self.staging = Some(StagingBinding {
                buffer: owned.handle(),
                capacity: owned.capacity(),
                byte_offset: 0,
                element_offset: 0,
                owned: Some(Box::new(owned)),
            });
        }
        self.staging
            .as_ref()
            .ok_or_else(|| GpuError::MissingStagingBuffer {
                resource: self.name.clone(),
            })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(e) = self.device.destroy_image(self.image) {
            tracing::warn!(texture = %self.name, "failed to destroy image: {e}");
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("mip_levels", &self.mip_levels)
            .field("array_layers", &self.array_layers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(12, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(12, 0), 12);
    }

    #[test]
    fn buffer_desc_stride_and_capacity() {
        let desc = BufferDesc::elements("uniforms", 64, 10).aligned(256);
        assert_eq!(desc.stride(), 256);
        assert_eq!(desc.capacity(), 2560);

        let tight = BufferDesc::elements("vertices", 12, 10);
        assert_eq!(tight.stride(), 12);
    }

    #[test]
    fn full_mip_chain_counts_levels() {
        let desc = TextureDesc::new_2d("t", vk::Format::R8G8B8A8_UNORM, 256, 64).full_mip_chain();
        assert_eq!(desc.mip_levels, 9);
        let one = TextureDesc::new_2d("t", vk::Format::R8G8B8A8_UNORM, 1, 1).full_mip_chain();
        assert_eq!(one.mip_levels, 1);
    }

    #[test]
    fn subresource_table_tracks_ranges_independently() {
        let mut states = SubresourceStates::new(6, 4);
        let face = SubresourceRange::level(vk::ImageAspectFlags::COLOR, 2, 3, 1);
        let target = Transition::transfer_dst(0).resulting_state();
        states.set_range(&face, target);

        assert_eq!(states.get(3, 2), target);
        assert_eq!(states.get(3, 1), ResourceState::UNUSED);
        assert_eq!(states.get(2, 2), ResourceState::UNUSED);
        assert!(states.layouts_agree(&face, vk::ImageLayout::TRANSFER_DST_OPTIMAL));

        let all = SubresourceRange {
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 4,
            base_array_layer: 0,
            layer_count: 6,
        };
        assert!(!states.layouts_agree(&all, vk::ImageLayout::UNDEFINED));
        assert!(states.contains(&all));
    }

    #[test]
    fn ownership_request_validation() {
        assert!(check_ownership_request("b", 0, 0, 1).is_ok());
        assert!(matches!(
            check_ownership_request("b", vk::QUEUE_FAMILY_IGNORED, 0, 1),
            Err(GpuError::InvalidState(_))
        ));
        assert!(matches!(
            check_ownership_request("b", 0, 1, 1),
            Err(GpuError::InvalidState(_))
        ));
        assert!(matches!(
            check_ownership_request("b", 2, 0, 1),
            Err(GpuError::ForeignQueueOwner { owner: 2, .. })
        ));
    }
}
