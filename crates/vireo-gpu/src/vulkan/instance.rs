//! Vulkan instance creation and physical device selection.

use crate::device::DeviceLimits;
use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance with the given extra extensions.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    extensions: &[*const c_char],
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;
    let engine_name = c"Vireo";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extension_names: Vec<*const c_char> = extensions.to_vec();
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // SAFETY: entry is valid per the function contract.
    let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let layers: Vec<&CStr> = layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
            if !found {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect();
    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    // SAFETY: every pointer in create_info outlives this call.
    let instance = unsafe { entry.create_instance(&create_info, None)? };
    Ok(instance)
}

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// What the device selection learned about the chosen GPU.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub device_local_memory_mb: u64,
    pub limits: DeviceLimits,
}

impl AdapterInfo {
    /// Query from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // SAFETY: forwarded from the function contract.
        let (properties, memory) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
            )
        };

        let device_local_memory_mb = memory
            .memory_heaps
            .iter()
            .take(memory.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            api_version: properties.api_version,
            device_type: properties.device_type,
            device_local_memory_mb,
            limits: DeviceLimits {
                min_uniform_buffer_offset_alignment: properties
                    .limits
                    .min_uniform_buffer_offset_alignment,
                min_storage_buffer_offset_alignment: properties
                    .limits
                    .min_storage_buffer_offset_alignment,
                optimal_buffer_copy_offset_alignment: properties
                    .limits
                    .optimal_buffer_copy_offset_alignment,
            },
        }
    }

    /// Selection score; negative means unusable.
    pub fn score(&self) -> i64 {
        let major = vk::api_version_major(self.api_version);
        let minor = vk::api_version_minor(self.api_version);
        if major < 1 || (major == 1 && minor < 1) {
            return -1;
        }

        let mut score = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 0,
        };
        // +1 per GB of VRAM
        score += (self.device_local_memory_mb / 1024) as i64;
        score
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Queue family indices chosen for a physical device.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl FamilyIndices {
    pub fn unique(&self) -> Vec<u32> {
        let mut seen = HashSet::new();
        [self.graphics, self.present, self.transfer]
            .into_iter()
            .filter(|family| seen.insert(*family))
            .collect()
    }
}

/// Pick graphics, present and transfer families.
///
/// Present prefers the graphics family when it can present, so that the
/// common case needs no ownership transfers. `can_present` is `None` when no
/// surface is involved.
pub(crate) fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    can_present: Option<&dyn Fn(u32) -> bool>,
) -> Option<FamilyIndices> {
    let indexed = || (0u32..).zip(families.iter());

    let graphics = indexed()
        .find(|(_, f)| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i)?;

    let present = match can_present {
        None => graphics,
        Some(check) if check(graphics) => graphics,
        Some(check) => indexed().map(|(i, _)| i).find(|&i| check(i))?,
    };

    // Dedicated transfer queue (no graphics or compute), else graphics
    let transfer = indexed()
        .find(|(_, f)| {
            f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && !f.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map_or(graphics, |(i, _)| i);

    Some(FamilyIndices {
        graphics,
        present,
        transfer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn present_prefers_graphics_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let any = |_: u32| true;
        let found = find_queue_families(&families, Some(&any));
        let found = found.map(|f| (f.graphics, f.present, f.transfer));
        assert_eq!(found, Some((0, 0, 1)));
    }

    #[test]
    fn present_falls_back_to_other_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let only_second = |i: u32| i == 1;
        let found = find_queue_families(&families, Some(&only_second));
        assert_eq!(found.map(|f| f.present), Some(1));
        assert_eq!(found.map(|f| f.unique()), Some(vec![0, 1]));

        let none = |_: u32| false;
        assert!(find_queue_families(&families, Some(&none)).is_none());
    }
}
