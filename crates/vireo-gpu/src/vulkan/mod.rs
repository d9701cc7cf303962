//! Vulkan binding of the device and surface interfaces, built on `ash` and
//! `gpu-allocator`.

mod device;
pub mod instance;
pub mod memory;
pub mod surface;

pub use instance::{AdapterInfo, GpuVendor};
pub use memory::GpuAllocator;
pub use surface::VulkanSurface;

use crate::device::{QueueFamilies, QueueKind};
use crate::error::{GpuError, Result};
use ash::vk;
use instance::{create_instance, find_queue_families, FamilyIndices};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Vulkan device: instance, logical device, queues and memory allocator.
pub struct VulkanDevice {
    // Entry must be kept alive for the lifetime of the instance
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    adapter: AdapterInfo,
    allocator: Mutex<GpuAllocator>,
    families: FamilyIndices,
    /// One queue per unique family; submission is externally synchronized.
    queues: Vec<(u32, Mutex<vk::Queue>)>,
}

impl VulkanDevice {
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan device handle.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Run `f` with exclusive access to the queue of `kind`.
    pub fn with_queue<R>(&self, kind: QueueKind, f: impl FnOnce(vk::Queue) -> R) -> R {
        let family = self.queue_family_indices().family(kind);
        let (_, queue) = self
            .queues
            .iter()
            .find(|(f, _)| *f == family)
            .unwrap_or(&self.queues[0]);
        let queue = queue.lock();
        f(*queue)
    }

    pub(crate) fn queue_family_indices(&self) -> QueueFamilies {
        QueueFamilies {
            graphics: self.families.graphics,
            present: self.families.present,
            transfer: self.families.transfer,
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // SAFETY: last owner; every resource created from the device is gone.
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a [`VulkanDevice`].
pub struct VulkanDeviceBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for VulkanDeviceBuilder {
    fn default() -> Self {
        Self {
            app_name: "Vireo".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl VulkanDeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a device without presentation support.
    pub fn build(self) -> Result<Arc<VulkanDevice>> {
        // SAFETY: loading the system Vulkan library.
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;
        // SAFETY: entry was just loaded.
        let instance =
            unsafe { create_instance(&entry, &self.app_name, &[], self.enable_validation)? };
        // SAFETY: the instance is valid; on error it is destroyed here.
        match unsafe { finish_device(entry, instance, None) } {
            Ok(device) => Ok(Arc::new(device)),
            Err((e, instance)) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    /// Build a device able to present to `window`, plus the window's surface.
    pub fn build_for_window<W>(self, window: Arc<W>) -> Result<(Arc<VulkanDevice>, VulkanSurface<W>)>
    where
        W: HasDisplayHandle + HasWindowHandle + Send + Sync + 'static,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;

        // SAFETY: loading the system Vulkan library.
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| GpuError::ExtensionNotSupported(e.to_string()))?;
        // SAFETY: entry was just loaded.
        let instance = unsafe {
            create_instance(&entry, &self.app_name, extensions, self.enable_validation)?
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        // SAFETY: instance is valid and the window handles are live.
        let surface = match unsafe { surface::create_raw_surface(&entry, &instance, window.as_ref()) }
        {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        // SAFETY: instance and surface are valid; on error both are destroyed.
        let device =
            match unsafe { finish_device(entry, instance, Some((&surface_loader, surface))) } {
                Ok(device) => Arc::new(device),
                Err((e, instance)) => {
                    unsafe {
                        surface_loader.destroy_surface(surface, None);
                        instance.destroy_instance(None);
                    }
                    return Err(e);
                }
            };

        let surface = VulkanSurface::from_parts(device.clone(), window, surface_loader, surface);
        Ok((device, surface))
    }
}

/// Pick a physical device, create the logical device and the allocator.
///
/// On failure the instance is handed back so the caller can destroy it
/// after anything created from it.
///
/// # Safety
/// The instance (and surface, if given) must be valid.
unsafe fn finish_device(
    entry: ash::Entry,
    instance: ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> std::result::Result<VulkanDevice, (GpuError, ash::Instance)> {
    // SAFETY: forwarded from the function contract.
    match unsafe { select_and_create(&instance, surface) } {
        Ok((physical_device, device, adapter, families, queues, allocator)) => Ok(VulkanDevice {
            entry,
            instance,
            physical_device,
            device,
            adapter,
            allocator: Mutex::new(allocator),
            families,
            queues,
        }),
        Err(e) => Err((e, instance)),
    }
}

type Created = (
    vk::PhysicalDevice,
    ash::Device,
    AdapterInfo,
    FamilyIndices,
    Vec<(u32, Mutex<vk::Queue>)>,
    GpuAllocator,
);

unsafe fn select_and_create(
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Result<Created> {
    // SAFETY: instance is valid per the caller.
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };

    let mut best: Option<(i64, vk::PhysicalDevice, AdapterInfo, FamilyIndices)> = None;
    for physical_device in physical_devices {
        let adapter = unsafe { AdapterInfo::query(instance, physical_device) };
        let score = adapter.score();
        if score < 0 {
            continue;
        }
        let properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let check = |family: u32| {
            surface.is_some_and(|(loader, surface)| unsafe {
                loader
                    .get_physical_device_surface_support(physical_device, family, surface)
                    .unwrap_or(false)
            })
        };
        let can_present: Option<&dyn Fn(u32) -> bool> = surface.map(|_| &check as _);
        let Some(families) = find_queue_families(&properties, can_present) else {
            continue;
        };
        if best.as_ref().map_or(true, |(s, ..)| score > *s) {
            best = Some((score, physical_device, adapter, families));
        }
    }

    let (_, physical_device, adapter, families) = best.ok_or(GpuError::NoSuitableDevice)?;
    tracing::info!("Selected GPU: {}", adapter.summary());
    tracing::info!(
        graphics = families.graphics,
        present = families.present,
        transfer = families.transfer,
        "Queue families"
    );

    let unique = families.unique();
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];
    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(if surface.is_some() {
            &extension_names
        } else {
            &[]
        });

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };

    let queues = unique
        .iter()
        .map(|&family| (family, Mutex::new(unsafe { device.get_device_queue(family, 0) })))
        .collect();

    let allocator = match unsafe { GpuAllocator::new(instance, &device, physical_device) } {
        Ok(allocator) => allocator,
        Err(e) => {
            unsafe { device.destroy_device(None) };
            return Err(e);
        }
    };

    Ok((physical_device, device, adapter, families, queues, allocator))
}
