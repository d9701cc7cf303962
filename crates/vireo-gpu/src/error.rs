//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Transient swapchain staleness never surfaces here: the frame scheduler
/// recovers from it locally and reports a skipped frame instead.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The platform surface was lost and must be recreated.
    #[error("Surface lost")]
    SurfaceLost,

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// An upload or download needs a staging buffer but none is bound.
    #[error("No staging buffer bound to `{resource}` and the coordinator may not create one")]
    MissingStagingBuffer { resource: String },

    /// The bound staging buffer cannot hold the requested range.
    #[error("Staging buffer for `{resource}` too small: need {required} bytes, have {capacity}")]
    StagingTooSmall {
        resource: String,
        required: u64,
        capacity: u64,
    },

    /// The requested range lies outside the destination resource.
    #[error("Range {offset}..{end} out of bounds for `{resource}` (capacity {capacity} bytes)")]
    UploadOutOfRange {
        resource: String,
        offset: u64,
        end: u64,
        capacity: u64,
    },

    /// Typed data does not match the element size the resource was created with.
    #[error("Element size mismatch for `{resource}`: expected {expected} bytes, got {actual}")]
    ElementSizeMismatch {
        resource: String,
        expected: u64,
        actual: u64,
    },

    /// The resource is owned by another queue family and must be transferred first.
    #[error("`{resource}` is owned by queue family {owner}, but queue family {requested} tried to use it")]
    ForeignQueueOwner {
        resource: String,
        owner: u32,
        requested: u32,
    },

    /// The descriptor layout does not declare the binding.
    #[error("Descriptor layout has no binding {binding}")]
    UnknownBinding { binding: u32 },

    /// A resource of the wrong kind was bound to a descriptor binding.
    #[error("Descriptor binding {binding} expects {expected}, got {actual}")]
    BindingMismatch {
        binding: u32,
        expected: String,
        actual: String,
    },

    /// Render pass attachment count disagrees with the framebuffer attachments.
    #[error("Render pass expects {expected} attachments, framebuffer provides {actual}")]
    AttachmentMismatch { expected: u32, actual: u32 },

    /// An offset, count or level that cannot address the resource.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
