//! Explicit-synchronization rendering hardware interface for the Vireo engine.
//!
//! This crate provides:
//! - Barrier planning from tracked resource state, including queue family
//!   ownership transfers
//! - Host-to-device uploads and readbacks through staging buffers
//! - Descriptor sets allocated from growing pools per layout
//! - A swapchain frame scheduler with bounded frames in flight
//!
//! The core talks to the GPU through [`GpuDevice`] and [`PresentSurface`];
//! [`vulkan`] binds both to Vulkan.

pub mod barrier;
pub mod deferred;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod resource;
pub mod scheduler;
pub mod staging;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use barrier::{
    plan, BarrierPlan, BarrierTarget, OwnershipTransfer, PipelineBarrier, ResourceState,
    SubresourceRange, Transition, Usage,
};
pub use deferred::DeferredDeletionQueue;
pub use descriptors::{DescriptorLayout, DescriptorLayoutBuilder, DescriptorSet, PoolConfig};
pub use device::{DeviceLimits, DeviceRef, GpuDevice, QueueFamilies, QueueKind, SubmitInfo};
pub use error::{GpuError, Result};
pub use resource::{Buffer, BufferDesc, EarliestUse, Texture, TextureDesc};
pub use scheduler::{FrameContext, FrameScheduler, FrameSchedulerConfig, FrameState};
pub use staging::StagingCoordinator;
pub use surface::{AcquireOutcome, PresentOutcome, PresentSurface, SurfaceCapabilities};
pub use swapchain::Swapchain;
pub use vulkan::{VulkanDevice, VulkanDeviceBuilder, VulkanSurface};
