//! Descriptor set management.
//!
//! A [`DescriptorLayout`] owns its set layout plus a growable array of
//! descriptor pools. Sets are carved out of the first pool with room; a new
//! pool is created only when none has. Pools live as long as the layout.
//!
//! [`DescriptorSet`] batches its writes and applies them lazily in
//! [`DescriptorSet::bind`], so rebinding an unchanged set costs no update.

use crate::device::{DescriptorPayload, DescriptorWrite, DeviceRef, GpuDevice, LayoutBinding};
use crate::error::{GpuError, Result};
use crate::resource::{Buffer, Texture};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pool sizing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Sets per pool for small requests.
    pub default_pool_size: u32,
    /// Requests larger than this get an over-provisioned pool.
    pub growth_threshold: u32,
    /// Multiplier applied to pools for large requests.
    pub growth_factor: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_pool_size: 16,
            growth_threshold: 64,
            growth_factor: 8,
        }
    }
}

impl PoolConfig {
    pub fn with_default_pool_size(mut self, sets: u32) -> Self {
        self.default_pool_size = sets.max(1);
        self
    }

    pub fn with_growth(mut self, threshold: u32, factor: u32) -> Self {
        self.growth_threshold = threshold;
        self.growth_factor = factor.max(1);
        self
    }

    /// Number of sets a new pool is created with to satisfy a request for `n`.
    pub fn pool_capacity_for(&self, n: u32) -> u32 {
        let base = self.default_pool_size.max(n);
        if n > self.growth_threshold {
            base.saturating_mul(self.growth_factor)
        } else {
            base
        }
    }
}

fn is_dynamic(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

fn is_buffer(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

fn is_image(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::STORAGE_IMAGE
    )
}

fn kind_name(ty: vk::DescriptorType) -> &'static str {
    if is_dynamic(ty) {
        "dynamic buffer"
    } else if is_buffer(ty) {
        "buffer"
    } else if is_image(ty) {
        "image"
    } else {
        "other"
    }
}

#[derive(Debug, Clone, Copy)]
struct BindingSlot {
    ty: vk::DescriptorType,
    /// Position among the dynamic bindings, in binding order.
    dynamic_index: Option<usize>,
}

/// Binding table shared by a layout and every set allocated from it.
#[derive(Debug)]
struct LayoutInfo {
    handle: vk::DescriptorSetLayout,
    bindings: BTreeMap<u32, BindingSlot>,
    dynamic_count: usize,
}

impl LayoutInfo {
    fn new(handle: vk::DescriptorSetLayout, bindings: &[LayoutBinding]) -> Self {
        let mut table: BTreeMap<u32, BindingSlot> = bindings
            .iter()
            .map(|b| {
                (
                    b.binding,
                    BindingSlot {
                        ty: b.ty,
                        dynamic_index: None,
                    },
                )
            })
            .collect();

        let mut dynamic_count = 0;
        for slot in table.values_mut() {
            if is_dynamic(slot.ty) {
                slot.dynamic_index = Some(dynamic_count);
                dynamic_count += 1;
            }
        }

        Self {
            handle,
            bindings: table,
            dynamic_count,
        }
    }

    fn slot(&self, binding: u32) -> Result<BindingSlot> {
        self.bindings
            .get(&binding)
            .copied()
            .ok_or(GpuError::UnknownBinding { binding })
    }
}

/// Descriptor set layout builder.
#[derive(Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<LayoutBinding>,
    config: PoolConfig,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(LayoutBinding {
            binding,
            ty,
            count,
            stages,
        });
        self
    }

    pub fn uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stages)
    }

    /// Uniform buffer addressed per draw through a dynamic offset.
    pub fn uniform_buffer_dynamic(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1, stages)
    }

    pub fn storage_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stages)
    }

    pub fn storage_buffer_dynamic(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1, stages)
    }

    pub fn sampled_image(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1, stages)
    }

    pub fn storage_image(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stages)
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Create the layout. No pool is created until the first allocation.
    pub fn build(self, device: DeviceRef) -> Result<DescriptorLayout> {
        DescriptorLayout::new(device, &self.bindings, self.config)
    }
}

#[derive(Debug)]
struct PoolSlot {
    pool: vk::DescriptorPool,
    remaining: u32,
    capacity: u32,
}

const INITIAL_POOL_SLOTS: usize = 4;

/// A descriptor set layout together with the pools its sets come from.
pub struct DescriptorLayout {
    device: DeviceRef,
    info: Arc<LayoutInfo>,
    set_sizes: Vec<vk::DescriptorPoolSize>,
    config: PoolConfig,
    pools: Vec<Option<PoolSlot>>,
}

impl DescriptorLayout {
    pub fn new(device: DeviceRef, bindings: &[LayoutBinding], config: PoolConfig) -> Result<Self> {
        let handle = device.create_descriptor_set_layout(bindings)?;

        let mut per_type: BTreeMap<i32, u32> = BTreeMap::new();
        for b in bindings {
            *per_type.entry(b.ty.as_raw()).or_default() += b.count;
        }
        let set_sizes = per_type
            .into_iter()
            .map(|(ty, count)| vk::DescriptorPoolSize {
                ty: vk::DescriptorType::from_raw(ty),
                descriptor_count: count,
            })
            .collect();

        Ok(Self {
            device,
            info: Arc::new(LayoutInfo::new(handle, bindings)),
            set_sizes,
            config,
            pools: (0..INITIAL_POOL_SLOTS).map(|_| None).collect(),
        })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.info.handle
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Number of pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.iter().flatten().count()
    }

    /// Length of the pool slot array.
    pub fn pool_slots(&self) -> usize {
        self.pools.len()
    }

    /// Sets still available across all pools.
    pub fn remaining(&self) -> u32 {
        self.pools.iter().flatten().map(|slot| slot.remaining).sum()
    }

    /// Total set capacity across all pools.
    pub fn capacity(&self) -> u32 {
        self.pools.iter().flatten().map(|slot| slot.capacity).sum()
    }

    /// Allocate one set.
    pub fn create_set(&mut self) -> Result<DescriptorSet> {
        let mut sets = self.create_sets(1)?;
        sets.pop()
            .ok_or_else(|| GpuError::Other("descriptor allocation returned no sets".into()))
    }

    /// Allocate `n` sets from a single pool.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn create_sets(&mut self, n: u32) -> Result<Vec<DescriptorSet>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let found = self
            .pools
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.remaining >= n));
        let index = match found {
            Some(index) => index,
            None => self.add_pool(n)?,
        };

        let handles = match self.allocate_from(index, n) {
            Ok(handles) => handles,
            // A pool with enough sets left can still be too fragmented.
            Err(GpuError::Vulkan(
                vk::Result::ERROR_FRAGMENTED_POOL | vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            )) if found.is_some() => {
                tracing::debug!(pool = index, "descriptor pool fragmented, adding a pool");
                let index = self.add_pool(n)?;
                let handles = self.allocate_from(index, n)?;
                return Ok(self.wrap(index, handles));
            }
            Err(e) => return Err(e),
        };
        Ok(self.wrap(index, handles))
    }

    fn allocate_from(&mut self, index: usize, n: u32) -> Result<Vec<vk::DescriptorSet>> {
        let slot = self.pools[index]
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState(format!("descriptor pool slot {index} is empty")))?;
        let handles = self
            .device
            .allocate_descriptor_sets(slot.pool, self.info.handle, n)?;
        slot.remaining -= n;
        Ok(handles)
    }

    fn wrap(&self, index: usize, handles: Vec<vk::DescriptorSet>) -> Vec<DescriptorSet> {
        handles
            .into_iter()
            .map(|handle| DescriptorSet::new(handle, index, self.info.clone()))
            .collect()
    }

    fn add_pool(&mut self, n: u32) -> Result<usize> {
        let capacity = self.config.pool_capacity_for(n);
        let sizes: Vec<vk::DescriptorPoolSize> = self
            .set_sizes
            .iter()
            .map(|size| vk::DescriptorPoolSize {
                ty: size.ty,
                descriptor_count: size.descriptor_count * capacity,
            })
            .collect();
        let pool = self.device.create_descriptor_pool(capacity, &sizes)?;

        let index = match self.pools.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                let len = self.pools.len();
                self.pools.resize_with((len * 2).max(1), || None);
                len
            }
        };
        self.pools[index] = Some(PoolSlot {
            pool,
            remaining: capacity,
            capacity,
        });

        tracing::debug!(
            slot = index,
            sets = capacity,
            requested = n,
            "created descriptor pool"
        );
        Ok(index)
    }

    /// Return a set to the pool it came from.
    pub fn release(&mut self, set: DescriptorSet) -> Result<()> {
        if !Arc::ptr_eq(&set.info, &self.info) {
            return Err(GpuError::InvalidState(
                "descriptor set released to a different layout".into(),
            ));
        }
        let slot = self
            .pools
            .get_mut(set.pool_index)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                GpuError::InvalidState(format!("descriptor pool slot {} is empty", set.pool_index))
            })?;
        self.device.free_descriptor_sets(slot.pool, &[set.handle])?;
        slot.remaining += 1;
        Ok(())
    }
}

impl Drop for DescriptorLayout {
    fn drop(&mut self) {
        for slot in self.pools.drain(..).flatten() {
            self.device.destroy_descriptor_pool(slot.pool);
        }
        self.device.destroy_descriptor_set_layout(self.info.handle);
    }
}

/// A descriptor set with batched, lazily applied writes.
#[derive(Debug)]
pub struct DescriptorSet {
    handle: vk::DescriptorSet,
    pool_index: usize,
    info: Arc<LayoutInfo>,
    pending: Vec<DescriptorWrite>,
    update_needed: bool,
    dynamic_strides: Vec<u64>,
}

impl DescriptorSet {
    fn new(handle: vk::DescriptorSet, pool_index: usize, info: Arc<LayoutInfo>) -> Self {
        let dynamic_strides = vec![0; info.dynamic_count];
        Self {
            handle,
            pool_index,
            info,
            pending: Vec::new(),
            update_needed: false,
            dynamic_strides,
        }
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// Slot of the pool this set was allocated from.
    pub fn pool_index(&self) -> usize {
        self.pool_index
    }

    /// Whether writes are waiting for the next [`Self::bind`].
    pub fn is_update_needed(&self) -> bool {
        self.update_needed
    }

    fn push(&mut self, binding: u32, ty: vk::DescriptorType, payload: DescriptorPayload) {
        self.pending.retain(|w| w.binding != binding);
        self.pending.push(DescriptorWrite {
            set: self.handle,
            binding,
            array_element: 0,
            ty,
            payload,
        });
        self.update_needed = true;
    }

    /// Bind a whole buffer to a static buffer binding.
    pub fn bind_buffer(&mut self, binding: u32, buffer: &Buffer) -> Result<()> {
        let slot = self.info.slot(binding)?;
        if !is_buffer(slot.ty) || is_dynamic(slot.ty) {
            return Err(mismatch(binding, slot.ty, "buffer"));
        }
        self.push(
            binding,
            slot.ty,
            DescriptorPayload::Buffers(vec![vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            }]),
        );
        Ok(())
    }

    /// Bind one element window of a strided buffer to a dynamic binding.
    ///
    /// The element selected at bind time is chosen by `data_index` in
    /// [`Self::bind`].
    pub fn bind_buffer_dynamic(&mut self, binding: u32, buffer: &Buffer) -> Result<()> {
        let slot = self.info.slot(binding)?;
        let Some(dynamic_index) = slot.dynamic_index else {
            return Err(mismatch(binding, slot.ty, "dynamic buffer"));
        };
        self.push(
            binding,
            slot.ty,
            DescriptorPayload::Buffers(vec![vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: 0,
                range: buffer.element_size(),
            }]),
        );
        self.dynamic_strides[dynamic_index] = buffer.stride();
        Ok(())
    }

    /// Bind a texture view, in the layout the texture rests in.
    pub fn bind_texture(
        &mut self,
        binding: u32,
        texture: &Texture,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<()> {
        let slot = self.info.slot(binding)?;
        if !is_image(slot.ty) {
            return Err(mismatch(binding, slot.ty, "image"));
        }
        let image_layout = if slot.ty == vk::DescriptorType::STORAGE_IMAGE {
            vk::ImageLayout::GENERAL
        } else {
            texture.earliest_use().layout
        };
        self.push(
            binding,
            slot.ty,
            DescriptorPayload::Images(vec![vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout,
            }]),
        );
        Ok(())
    }

    /// Offsets passed for the dynamic bindings when selecting element
    /// `data_index`, in binding order.
    pub fn dynamic_offsets(&self, data_index: u32) -> Result<Vec<u32>> {
        self.dynamic_strides
            .iter()
            .map(|stride| {
                u32::try_from(stride * u64::from(data_index)).map_err(|_| {
                    GpuError::InvalidState(format!(
                        "dynamic offset for element {data_index} exceeds u32"
                    ))
                })
            })
            .collect()
    }

    /// Flush pending writes if any, then bind the set with dynamic offsets
    /// selecting element `data_index`.
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        &mut self,
        device: &dyn GpuDevice,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        data_index: u32,
    ) -> Result<()> {
        let offsets = self.dynamic_offsets(data_index)?;
        if self.update_needed {
            device.update_descriptor_sets(&self.pending);
            self.pending.clear();
            self.update_needed = false;
        }
        device.cmd_bind_descriptor_set(
            cb,
            bind_point,
            pipeline_layout,
            set_index,
            self.handle,
            &offsets,
        );
        Ok(())
    }
}

fn mismatch(binding: u32, expected: vk::DescriptorType, actual: &str) -> GpuError {
    GpuError::BindingMismatch {
        binding,
        expected: kind_name(expected).to_string(),
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_capacity_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.pool_capacity_for(1), 16);
        assert_eq!(config.pool_capacity_for(16), 16);
        assert_eq!(config.pool_capacity_for(40), 40);
        assert_eq!(config.pool_capacity_for(64), 64);
        assert_eq!(config.pool_capacity_for(65), 65 * 8);
    }

    #[test]
    fn dynamic_indices_follow_binding_order() {
        let bindings = [
            LayoutBinding {
                binding: 3,
                ty: vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                count: 1,
                stages: vk::ShaderStageFlags::COMPUTE,
            },
            LayoutBinding {
                binding: 0,
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                count: 1,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
            LayoutBinding {
                binding: 1,
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            },
        ];
        let info = LayoutInfo::new(vk::DescriptorSetLayout::null(), &bindings);
        assert_eq!(info.dynamic_count, 2);
        assert_eq!(info.slot(1).map(|s| s.dynamic_index).ok(), Some(Some(0)));
        assert_eq!(info.slot(3).map(|s| s.dynamic_index).ok(), Some(Some(1)));
        assert_eq!(info.slot(0).map(|s| s.dynamic_index).ok(), Some(None));
        assert!(matches!(
            info.slot(7),
            Err(GpuError::UnknownBinding { binding: 7 })
        ));
    }

    #[test]
    fn dynamic_offsets_scale_with_stride() {
        let bindings = [
            LayoutBinding {
                binding: 0,
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            },
            LayoutBinding {
                binding: 1,
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            },
        ];
        let info = Arc::new(LayoutInfo::new(vk::DescriptorSetLayout::null(), &bindings));
        let mut set = DescriptorSet::new(vk::DescriptorSet::null(), 0, info);
        set.dynamic_strides = vec![256, 64];
        assert_eq!(set.dynamic_offsets(0).ok(), Some(vec![0, 0]));
        assert_eq!(set.dynamic_offsets(3).ok(), Some(vec![768, 192]));
    }

    #[test]
    fn binding_kinds() {
        assert_eq!(kind_name(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC), "dynamic buffer");
        assert_eq!(kind_name(vk::DescriptorType::STORAGE_BUFFER), "buffer");
        assert_eq!(kind_name(vk::DescriptorType::STORAGE_IMAGE), "image");
    }
}
