//! GPU memory management.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::collections::HashMap;

/// GPU memory allocator wrapper.
///
/// Keeps the allocation backing every buffer and image it created, keyed by
/// handle, so resources can be freed and host-mapped by handle alone.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
    buffers: HashMap<vk::Buffer, Allocation>,
    images: HashMap<vk::Image, Allocation>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device: device.clone(),
            buffers: HashMap::new(),
            images: HashMap::new(),
        })
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    /// Allocate a buffer.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: the device outlives the allocator.
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // SAFETY: fresh buffer, memory sized from its requirements.
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            let _ = self.allocator().map(|allocator| allocator.free(allocation));
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        self.buffers.insert(buffer, allocation);
        Ok(buffer)
    }

    /// Free a buffer and its allocation.
    pub fn free_buffer(&mut self, buffer: vk::Buffer) -> Result<()> {
        if let Some(allocation) = self.buffers.remove(&buffer) {
            self.allocator()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }
        // SAFETY: the caller guarantees the GPU no longer uses the buffer.
        unsafe { self.device.destroy_buffer(buffer, None) };
        Ok(())
    }

    /// Mapped bytes of a host-visible buffer.
    pub fn mapped_mut(&mut self, buffer: vk::Buffer) -> Result<&mut [u8]> {
        self.buffers
            .get_mut(&buffer)
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))
    }

    /// Allocate an image.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo<'_>,
        name: &str,
    ) -> Result<vk::Image> {
        // SAFETY: the device outlives the allocator.
        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // SAFETY: fresh image, memory sized from its requirements.
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            let _ = self.allocator().map(|allocator| allocator.free(allocation));
            unsafe { self.device.destroy_image(image, None) };
            return Err(e.into());
        }

        self.images.insert(image, allocation);
        Ok(image)
    }

    /// Free an image and its allocation.
    pub fn free_image(&mut self, image: vk::Image) -> Result<()> {
        if let Some(allocation) = self.images.remove(&image) {
            self.allocator()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }
        // SAFETY: the caller guarantees the GPU no longer uses the image.
        unsafe { self.device.destroy_image(image, None) };
        Ok(())
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if !self.buffers.is_empty() || !self.images.is_empty() {
            tracing::warn!(
                buffers = self.buffers.len(),
                images = self.images.len(),
                "GPU resources still alive at allocator shutdown"
            );
        }
        self.buffers.clear();
        self.images.clear();
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
