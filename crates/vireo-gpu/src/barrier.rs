//! Barrier planning.
//!
//! Turns a resource's recorded [`ResourceState`] plus a requested [`Transition`]
//! into the pipeline barrier that orders the two uses. The planner never talks
//! to the device; it only computes descriptors. Tracked resources
//! ([`crate::resource::Buffer`], [`crate::resource::Texture`]) call into it and
//! commit the new state once per emitted plan.
//!
//! When the requesting queue family differs from the current owner the plan is
//! an [`OwnershipTransfer`]: a release half for the source queue and an acquire
//! half for the destination queue.

use crate::device::GpuDevice;
use crate::error::{GpuError, Result};
use ash::vk;

/// Synchronization state recorded for a buffer or a single texture subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceState {
    /// Current image layout (`UNDEFINED` for buffers).
    pub layout: vk::ImageLayout,
    /// Accesses performed by the last use.
    pub access: vk::AccessFlags,
    /// Stages of the last use.
    pub stages: vk::PipelineStageFlags,
    /// Owning queue family, `QUEUE_FAMILY_IGNORED` if never owned.
    pub queue_family: u32,
}

impl ResourceState {
    /// State of a resource that has never been used.
    pub const UNUSED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        access: vk::AccessFlags::empty(),
        stages: vk::PipelineStageFlags::TOP_OF_PIPE,
        queue_family: vk::QUEUE_FAMILY_IGNORED,
    };

    /// Whether the resource is owned by a queue family other than `family`.
    pub fn owned_by_other(&self, family: u32) -> bool {
        self.queue_family != vk::QUEUE_FAMILY_IGNORED
            && family != vk::QUEUE_FAMILY_IGNORED
            && self.queue_family != family
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::UNUSED
    }
}

/// Usage category of the next access to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    /// No specific category; access is derived from the consuming stage.
    General,
    TransferSrc,
    TransferDst,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilRead,
    ShaderRead,
    ShaderWrite,
    UniformRead,
    VertexBuffer,
    IndexBuffer,
    IndirectBuffer,
    HostRead,
    HostWrite,
    /// Handed to the presentation engine.
    Present,
}

impl Usage {
    /// Access flags implied by the category alone. Empty when the category
    /// has no specific flag.
    pub fn access_flags(self) -> vk::AccessFlags {
        match self {
            Self::General | Self::Present => vk::AccessFlags::empty(),
            Self::TransferSrc => vk::AccessFlags::TRANSFER_READ,
            Self::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
            Self::ColorAttachment => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilAttachment => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthStencilRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            Self::ShaderRead => vk::AccessFlags::SHADER_READ,
            Self::ShaderWrite => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            Self::UniformRead => vk::AccessFlags::UNIFORM_READ,
            Self::VertexBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            Self::IndexBuffer => vk::AccessFlags::INDEX_READ,
            Self::IndirectBuffer => vk::AccessFlags::INDIRECT_COMMAND_READ,
            Self::HostRead => vk::AccessFlags::HOST_READ,
            Self::HostWrite => vk::AccessFlags::HOST_WRITE,
        }
    }
}

/// Stages in pipeline order, earliest first.
const PIPELINE_ORDER: [vk::PipelineStageFlags; 14] = [
    vk::PipelineStageFlags::DRAW_INDIRECT,
    vk::PipelineStageFlags::VERTEX_INPUT,
    vk::PipelineStageFlags::VERTEX_SHADER,
    vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER,
    vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
    vk::PipelineStageFlags::GEOMETRY_SHADER,
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
    vk::PipelineStageFlags::FRAGMENT_SHADER,
    vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    vk::PipelineStageFlags::COMPUTE_SHADER,
    vk::PipelineStageFlags::TRANSFER,
    vk::PipelineStageFlags::HOST,
    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
];

/// Earliest pipeline stage contained in `stages`.
///
/// `ALL_GRAPHICS`/`ALL_COMMANDS` start at indirect-command fetch. Returns
/// `TOP_OF_PIPE` when nothing later is present.
pub fn earliest_stage(stages: vk::PipelineStageFlags) -> vk::PipelineStageFlags {
    if stages.intersects(vk::PipelineStageFlags::ALL_COMMANDS | vk::PipelineStageFlags::ALL_GRAPHICS)
    {
        return vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    PIPELINE_ORDER
        .iter()
        .copied()
        .find(|&stage| stages.contains(stage))
        .unwrap_or(vk::PipelineStageFlags::TOP_OF_PIPE)
}

/// Access flags implied by the earliest stage that consumes the resource.
///
/// Used when a usage category carries no access flag of its own, so that a
/// barrier never goes out with an all-zero destination mask for a real use.
/// The table errs on the side of over-synchronization (read and write for
/// attachment and transfer stages).
pub fn access_for_earliest_stage(stages: vk::PipelineStageFlags) -> vk::AccessFlags {
    let stage = earliest_stage(stages);
    if stage == vk::PipelineStageFlags::DRAW_INDIRECT {
        vk::AccessFlags::INDIRECT_COMMAND_READ
    } else if stage == vk::PipelineStageFlags::VERTEX_INPUT {
        vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ
    } else if stage.intersects(
        vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
            | vk::PipelineStageFlags::GEOMETRY_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER,
    ) {
        vk::AccessFlags::SHADER_READ | vk::AccessFlags::UNIFORM_READ
    } else if stage == vk::PipelineStageFlags::FRAGMENT_SHADER {
        vk::AccessFlags::SHADER_READ
            | vk::AccessFlags::UNIFORM_READ
            | vk::AccessFlags::INPUT_ATTACHMENT_READ
    } else if stage.intersects(
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
    ) {
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
    } else if stage == vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT {
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
    } else if stage == vk::PipelineStageFlags::TRANSFER {
        vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE
    } else if stage == vk::PipelineStageFlags::HOST {
        vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE
    } else {
        vk::AccessFlags::empty()
    }
}

/// A requested next use of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Layout required by the next use (ignored for buffers).
    pub layout: vk::ImageLayout,
    /// Usage category of the next use.
    pub usage: Usage,
    /// Stages that will perform the next use.
    pub stages: vk::PipelineStageFlags,
    /// Queue family that will perform the next use.
    pub queue_family: u32,
}

impl Transition {
    pub const fn new(
        layout: vk::ImageLayout,
        usage: Usage,
        stages: vk::PipelineStageFlags,
        queue_family: u32,
    ) -> Self {
        Self {
            layout,
            usage,
            stages,
            queue_family,
        }
    }

    /// Copy destination on `queue_family`.
    pub const fn transfer_dst(queue_family: u32) -> Self {
        Self::new(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Usage::TransferDst,
            vk::PipelineStageFlags::TRANSFER,
            queue_family,
        )
    }

    /// Copy or blit source on `queue_family`.
    pub const fn transfer_src(queue_family: u32) -> Self {
        Self::new(
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Usage::TransferSrc,
            vk::PipelineStageFlags::TRANSFER,
            queue_family,
        )
    }

    /// Sampled read from the given shader stages.
    pub const fn shader_read(stages: vk::PipelineStageFlags, queue_family: u32) -> Self {
        Self::new(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Usage::ShaderRead,
            stages,
            queue_family,
        )
    }

    /// Color attachment output.
    pub const fn color_attachment(queue_family: u32) -> Self {
        Self::new(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Usage::ColorAttachment,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            queue_family,
        )
    }

    /// Depth/stencil attachment read and write.
    pub const fn depth_attachment(queue_family: u32) -> Self {
        Self::new(
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Usage::DepthStencilAttachment,
            vk::PipelineStageFlags::from_raw(
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
            ),
            queue_family,
        )
    }

    /// Hand-off to the presentation engine.
    pub const fn present(queue_family: u32) -> Self {
        Self::new(
            vk::ImageLayout::PRESENT_SRC_KHR,
            Usage::Present,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            queue_family,
        )
    }

    /// Same use, performed on another queue family.
    pub const fn on_queue(mut self, queue_family: u32) -> Self {
        self.queue_family = queue_family;
        self
    }

    /// Destination access mask, with the stage-derived fallback applied.
    pub fn access(&self) -> vk::AccessFlags {
        let access = self.usage.access_flags();
        if access.is_empty() {
            access_for_earliest_stage(self.stages)
        } else {
            access
        }
    }

    /// State recorded on the resource once the barrier for this transition
    /// has been emitted.
    pub fn resulting_state(&self) -> ResourceState {
        ResourceState {
            layout: self.layout,
            access: self.access(),
            stages: non_empty_or(self.stages, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
            queue_family: self.queue_family,
        }
    }
}

fn non_empty_or(
    stages: vk::PipelineStageFlags,
    fallback: vk::PipelineStageFlags,
) -> vk::PipelineStageFlags {
    if stages.is_empty() {
        fallback
    } else {
        stages
    }
}

/// Image subresource range addressed by a barrier or copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceRange {
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// A single mip level across `layer_count` layers.
    pub fn level(aspect: vk::ImageAspectFlags, level: u32, base_layer: u32, layers: u32) -> Self {
        Self {
            aspect,
            base_mip_level: level,
            level_count: 1,
            base_array_layer: base_layer,
            layer_count: layers,
        }
    }

    pub fn to_vk(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .base_mip_level(self.base_mip_level)
            .level_count(self.level_count)
            .base_array_layer(self.base_array_layer)
            .layer_count(self.layer_count)
    }
}

/// What a single barrier addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierTarget {
    Buffer {
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
    },
    Image {
        image: vk::Image,
        range: SubresourceRange,
    },
}

/// One memory barrier inside a [`PipelineBarrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub target: BarrierTarget,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

/// Which half of a queue-ownership transfer a barrier is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// Same-queue dependency.
    Local,
    /// Recorded on the source queue; gives up ownership.
    Release,
    /// Recorded on the destination queue; takes ownership.
    Acquire,
}

/// A `vkCmdPipelineBarrier` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineBarrier {
    pub kind: BarrierKind,
    pub src_stages: vk::PipelineStageFlags,
    pub dst_stages: vk::PipelineStageFlags,
    pub barriers: Vec<Barrier>,
}

impl PipelineBarrier {
    /// Buffer barriers in Vulkan form.
    pub fn buffer_barriers(&self) -> Vec<vk::BufferMemoryBarrier<'static>> {
        self.barriers
            .iter()
            .filter_map(|b| match b.target {
                BarrierTarget::Buffer {
                    buffer,
                    offset,
                    size,
                } => Some(
                    vk::BufferMemoryBarrier::default()
                        .buffer(buffer)
                        .offset(offset)
                        .size(size)
                        .src_access_mask(b.src_access)
                        .dst_access_mask(b.dst_access)
                        .src_queue_family_index(b.src_queue_family)
                        .dst_queue_family_index(b.dst_queue_family),
                ),
                BarrierTarget::Image { .. } => None,
            })
            .collect()
    }

    /// Image barriers in Vulkan form.
    pub fn image_barriers(&self) -> Vec<vk::ImageMemoryBarrier<'static>> {
        self.barriers
            .iter()
            .filter_map(|b| match b.target {
                BarrierTarget::Image { image, range } => Some(
                    vk::ImageMemoryBarrier::default()
                        .image(image)
                        .subresource_range(range.to_vk())
                        .old_layout(b.old_layout)
                        .new_layout(b.new_layout)
                        .src_access_mask(b.src_access)
                        .dst_access_mask(b.dst_access)
                        .src_queue_family_index(b.src_queue_family)
                        .dst_queue_family_index(b.dst_queue_family),
                ),
                BarrierTarget::Buffer { .. } => None,
            })
            .collect()
    }

    /// Record this barrier into `cb`.
    pub fn record(&self, device: &dyn GpuDevice, cb: vk::CommandBuffer) {
        tracing::trace!(
            kind = ?self.kind,
            src = ?self.src_stages,
            dst = ?self.dst_stages,
            count = self.barriers.len(),
            "pipeline barrier"
        );
        device.cmd_pipeline_barrier(cb, self);
    }
}

/// Release/acquire pair moving a resource between queue families.
///
/// The release half must be recorded on a command buffer of the source queue,
/// the acquire half on one of the destination queue, and the source submission
/// must signal a semaphore the destination submission waits on.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "both halves of an ownership transfer must be recorded"]
pub struct OwnershipTransfer {
    release: PipelineBarrier,
    acquire: PipelineBarrier,
}

impl OwnershipTransfer {
    /// Source queue family.
    pub fn src_family(&self) -> u32 {
        self.release.barriers[0].src_queue_family
    }

    /// Destination queue family.
    pub fn dst_family(&self) -> u32 {
        self.release.barriers[0].dst_queue_family
    }

    pub fn release(&self) -> &PipelineBarrier {
        &self.release
    }

    pub fn acquire(&self) -> &PipelineBarrier {
        &self.acquire
    }

    /// Record both halves, release first.
    pub fn record(
        self,
        device: &dyn GpuDevice,
        release_cb: vk::CommandBuffer,
        acquire_cb: vk::CommandBuffer,
    ) {
        self.release.record(device, release_cb);
        self.acquire.record(device, acquire_cb);
    }

    /// Split into `(release, acquire)` for recording at different times.
    pub fn into_halves(self) -> (PipelineBarrier, PipelineBarrier) {
        (self.release, self.acquire)
    }
}

/// Result of planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a planned barrier must be recorded; the resource state has already advanced"]
pub enum BarrierPlan {
    /// Same-queue barrier.
    Local(PipelineBarrier),
    /// Cross-queue release/acquire pair.
    Transfer(OwnershipTransfer),
}

impl BarrierPlan {
    /// Record a same-queue plan into `cb`.
    ///
    /// Fails with `InvalidState` for a cross-queue plan, which needs a command
    /// buffer on each queue.
    pub fn record_local(self, device: &dyn GpuDevice, cb: vk::CommandBuffer) -> Result<()> {
        match self {
            Self::Local(barrier) => {
                barrier.record(device, cb);
                Ok(())
            }
            Self::Transfer(transfer) => Err(GpuError::InvalidState(format!(
                "barrier needs a queue ownership transfer from family {} to {}",
                transfer.src_family(),
                transfer.dst_family()
            ))),
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }
}

/// Compute the barrier that moves a resource from `current` to `target`.
///
/// Pure: the caller commits `target.resulting_state()` to every subresource the
/// barrier addresses, exactly once per plan.
pub fn plan(current: &ResourceState, target: &Transition, what: BarrierTarget) -> BarrierPlan {
    let dst_access = target.access();
    let src_stages = non_empty_or(current.stages, vk::PipelineStageFlags::TOP_OF_PIPE);
    let dst_stages = non_empty_or(target.stages, vk::PipelineStageFlags::BOTTOM_OF_PIPE);

    if !current.owned_by_other(target.queue_family) {
        return BarrierPlan::Local(PipelineBarrier {
            kind: BarrierKind::Local,
            src_stages,
            dst_stages,
            barriers: vec![Barrier {
                target: what,
                src_access: current.access,
                dst_access,
                old_layout: current.layout,
                new_layout: target.layout,
                src_queue_family: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
            }],
        });
    }

    let half = Barrier {
        target: what,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::empty(),
        old_layout: current.layout,
        new_layout: target.layout,
        src_queue_family: current.queue_family,
        dst_queue_family: target.queue_family,
    };

    BarrierPlan::Transfer(OwnershipTransfer {
        release: PipelineBarrier {
            kind: BarrierKind::Release,
            src_stages,
            dst_stages: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            barriers: vec![Barrier {
                src_access: current.access,
                ..half
            }],
        },
        acquire: PipelineBarrier {
            kind: BarrierKind::Acquire,
            src_stages: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stages,
            barriers: vec![Barrier { dst_access, ..half }],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPHICS: u32 = 0;
    const TRANSFER: u32 = 2;

    fn buffer_target() -> BarrierTarget {
        BarrierTarget::Buffer {
            buffer: vk::Buffer::null(),
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }

    #[test]
    fn earliest_stage_follows_pipeline_order() {
        let stages = vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::VERTEX_SHADER;
        assert_eq!(earliest_stage(stages), vk::PipelineStageFlags::VERTEX_SHADER);
        assert_eq!(
            earliest_stage(vk::PipelineStageFlags::ALL_GRAPHICS),
            vk::PipelineStageFlags::DRAW_INDIRECT
        );
        assert_eq!(
            earliest_stage(vk::PipelineStageFlags::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
    }

    #[test]
    fn depth_tests_precede_fragment_shading() {
        let stages = vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        assert_eq!(
            earliest_stage(stages),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        );
        assert_eq!(
            earliest_stage(
                vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            ),
            vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(
            access_for_earliest_stage(stages),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn general_usage_falls_back_to_stage_access() {
        let t = Transition::new(
            vk::ImageLayout::GENERAL,
            Usage::General,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            GRAPHICS,
        );
        assert_eq!(
            t.access(),
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::UNIFORM_READ
        );

        let vertex = Transition::new(
            vk::ImageLayout::UNDEFINED,
            Usage::General,
            vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::VERTEX_SHADER,
            GRAPHICS,
        );
        assert!(vertex
            .access()
            .contains(vk::AccessFlags::VERTEX_ATTRIBUTE_READ));
    }

    #[test]
    fn specific_usage_wins_over_stage() {
        let t = Transition::shader_read(vk::PipelineStageFlags::FRAGMENT_SHADER, GRAPHICS);
        assert_eq!(t.access(), vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn present_has_no_access() {
        assert!(Transition::present(GRAPHICS).access().is_empty());
    }

    #[test]
    fn same_family_plans_local_barrier() {
        let current = Transition::transfer_dst(GRAPHICS).resulting_state();
        let target = Transition::shader_read(vk::PipelineStageFlags::FRAGMENT_SHADER, GRAPHICS);
        let BarrierPlan::Local(barrier) = plan(&current, &target, buffer_target()) else {
            panic!("expected a local barrier");
        };
        assert_eq!(barrier.kind, BarrierKind::Local);
        assert_eq!(barrier.src_stages, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(barrier.dst_stages, vk::PipelineStageFlags::FRAGMENT_SHADER);
        let b = barrier.barriers[0];
        assert_eq!(b.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(b.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(b.src_queue_family, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(b.dst_queue_family, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn unowned_resource_needs_no_transfer() {
        let target = Transition::transfer_dst(TRANSFER);
        let result = plan(&ResourceState::UNUSED, &target, buffer_target());
        assert!(!result.is_transfer());
    }

    #[test]
    fn cross_family_plans_release_and_acquire() {
        let current = Transition::transfer_dst(TRANSFER).resulting_state();
        let target = Transition::shader_read(vk::PipelineStageFlags::VERTEX_SHADER, GRAPHICS);
        let BarrierPlan::Transfer(transfer) = plan(&current, &target, buffer_target()) else {
            panic!("expected an ownership transfer");
        };
        assert_eq!(transfer.src_family(), TRANSFER);
        assert_eq!(transfer.dst_family(), GRAPHICS);

        let (release, acquire) = transfer.into_halves();
        assert_eq!(release.kind, BarrierKind::Release);
        assert_eq!(acquire.kind, BarrierKind::Acquire);
        assert_eq!(release.dst_stages, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(acquire.src_stages, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert!(release.barriers[0].dst_access.is_empty());
        assert!(acquire.barriers[0].src_access.is_empty());
        assert_eq!(
            release.barriers[0].new_layout,
            acquire.barriers[0].new_layout
        );
    }

    #[test]
    fn resulting_state_never_has_empty_stages() {
        let t = Transition::new(
            vk::ImageLayout::GENERAL,
            Usage::HostRead,
            vk::PipelineStageFlags::empty(),
            GRAPHICS,
        );
        let state = t.resulting_state();
        assert_eq!(state.stages, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(state.access, vk::AccessFlags::HOST_READ);
        assert_eq!(state.queue_family, GRAPHICS);
    }

    #[test]
    fn vk_conversion_splits_by_kind() {
        let image = BarrierTarget::Image {
            image: vk::Image::null(),
            range: SubresourceRange::level(vk::ImageAspectFlags::COLOR, 0, 0, 1),
        };
        let barrier = PipelineBarrier {
            kind: BarrierKind::Local,
            src_stages: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stages: vk::PipelineStageFlags::TRANSFER,
            barriers: vec![
                Barrier {
                    target: image,
                    src_access: vk::AccessFlags::empty(),
                    dst_access: vk::AccessFlags::TRANSFER_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    src_queue_family: vk::QUEUE_FAMILY_IGNORED,
                    dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
                },
                Barrier {
                    target: buffer_target(),
                    src_access: vk::AccessFlags::empty(),
                    dst_access: vk::AccessFlags::TRANSFER_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::UNDEFINED,
                    src_queue_family: vk::QUEUE_FAMILY_IGNORED,
                    dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
                },
            ],
        };
        assert_eq!(barrier.image_barriers().len(), 1);
        assert_eq!(barrier.buffer_barriers().len(), 1);
        assert_eq!(
            barrier.image_barriers()[0].new_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
    }
}
