//! Staging-buffer mediated transfers between host memory and device-only
//! resources.
//!
//! Uploads copy host data into the destination's staging buffer, transition
//! the destination to a transfer target, record the copy, and transition it
//! back to the use it was created for. Downloads run the same protocol in
//! reverse; the staged bytes become readable once the caller's submission has
//! completed.
//!
//! A staging buffer is reused by every transfer of its owner, so a second
//! upload to the same region must not be recorded before the first one's
//! submission has executed.

use crate::barrier::{SubresourceRange, Transition, Usage};
use crate::device::DeviceRef;
use crate::error::{GpuError, Result};
use crate::resource::{Buffer, Texture};
use ash::vk;
use bytemuck::Pod;

/// Number of bytes covered by `count` elements laid out `stride` apart.
pub fn strided_span(count: usize, tight: usize, stride: usize) -> usize {
    if count == 0 {
        0
    } else {
        (count - 1) * stride + tight
    }
}

/// Spread tightly packed elements of `tight` bytes into `dst`, one every
/// `stride` bytes. Padding bytes in `dst` are left untouched.
pub fn scatter_strided(src: &[u8], dst: &mut [u8], tight: usize, stride: usize) {
    debug_assert!(tight > 0 && stride >= tight);
    for (i, element) in src.chunks_exact(tight).enumerate() {
        let at = i * stride;
        dst[at..at + tight].copy_from_slice(element);
    }
}

/// Inverse of [`scatter_strided`]: collect `dst.len() / tight` elements
/// spaced `stride` bytes apart in `src` into tightly packed `dst`.
pub fn gather_strided(src: &[u8], dst: &mut [u8], tight: usize, stride: usize) {
    debug_assert!(tight > 0 && stride >= tight);
    for (i, element) in dst.chunks_exact_mut(tight).enumerate() {
        let at = i * stride;
        element.copy_from_slice(&src[at..at + tight]);
    }
}

/// Records staged uploads and downloads on one queue family.
pub struct StagingCoordinator {
    device: DeviceRef,
    queue_family: u32,
    may_own_staging: bool,
}

impl StagingCoordinator {
    /// Coordinator recording on the graphics queue, allowed to create staging
    /// buffers for resources that have none bound.
    pub fn new(device: DeviceRef) -> Self {
        let queue_family = device.queue_families().graphics;
        Self {
            device,
            queue_family,
            may_own_staging: true,
        }
    }

    /// Record on another queue family (e.g. a dedicated transfer queue).
    pub fn with_queue_family(mut self, queue_family: u32) -> Self {
        self.queue_family = queue_family;
        self
    }

    /// Whether missing staging buffers may be created on demand.
    pub fn with_owned_staging(mut self, allowed: bool) -> Self {
        self.may_own_staging = allowed;
        self
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Upload typed elements starting at element `first_element`.
    ///
    /// `T` must have the element size the buffer was created with. When the
    /// buffer's stride is wider than `T`, elements are spread out in staging
    /// and the padding between them is copied as well.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn upload_elements<T: Pod>(
        &self,
        cb: vk::CommandBuffer,
        dst: &mut Buffer,
        data: &[T],
        first_element: u64,
    ) -> Result<()> {
        check_element_size::<T>(dst)?;
        let tight = dst.element_size() as usize;
        let stride = dst.stride() as usize;
        let bytes: &[u8] = bytemuck::cast_slice(data);

        let offset = element_offset(dst, first_element)?;

        if stride == tight {
            return self.upload_bytes(cb, dst, bytes, offset);
        }

        let mut staged = vec![0u8; strided_span(data.len(), tight, stride)];
        scatter_strided(bytes, &mut staged, tight, stride);
        self.upload_range(cb, dst, &staged, offset)
    }

    /// Upload raw bytes at byte `offset` of `dst`.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn upload_bytes(
        &self,
        cb: vk::CommandBuffer,
        dst: &mut Buffer,
        data: &[u8],
        offset: u64,
    ) -> Result<()> {
        self.upload_range(cb, dst, data, offset)
    }

    fn upload_range(
        &self,
        cb: vk::CommandBuffer,
        dst: &mut Buffer,
        staged: &[u8],
        dst_offset: u64,
    ) -> Result<()> {
        if staged.is_empty() {
            return Ok(());
        }
        let span = staged.len() as u64;
        check_buffer_range(dst, dst_offset, span)?;
        self.check_owner(dst.name(), dst.state().queue_family)?;

        if dst.is_host_visible() {
            return self.device.write_buffer(dst.handle(), dst_offset, staged);
        }

        let stride = dst.stride();
        let name = dst.name().to_string();
        let staging = dst.resolve_staging(self.may_own_staging)?;
        let staging_offset = checked_end(&name, staging.base_offset(stride), dst_offset)?;
        check_staging_capacity(
            &name,
            checked_end(&name, staging_offset, span)?,
            staging.capacity(),
        )?;
        let staging_buffer = staging.buffer();

        self.device
            .write_buffer(staging_buffer, staging_offset, staged)?;

        let device = self.device.as_ref();
        dst.record_transition(device, cb, &Transition::transfer_dst(self.queue_family))?;
        device.cmd_copy_buffer(
            cb,
            staging_buffer,
            dst.handle(),
            &[vk::BufferCopy {
                src_offset: staging_offset,
                dst_offset,
                size: span,
            }],
        );
        let resting = dst.earliest_use().on_queue(self.queue_family);
        dst.record_transition(device, cb, &resting)
    }

    /// Upload tightly packed texels into one mip level, starting at array
    /// layer `base_layer`. The number of layers written is derived from the
    /// data length.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn upload_texture(
        &self,
        cb: vk::CommandBuffer,
        dst: &mut Texture,
        data: &[u8],
        mip_level: u32,
        base_layer: u32,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let range = texture_region(dst, data.len() as u64, mip_level, base_layer)?;
        dst.check_owner(range, self.queue_family)?;

        let region_offset = dst.staging_offset(base_layer, mip_level)?;
        let copy = level_copy(dst, &range, 0);
        let name = dst.name().to_string();
        let staging = dst.resolve_staging(self.may_own_staging)?;
        let staging_offset = checked_end(&name, staging.byte_offset(), region_offset)?;
        check_staging_capacity(
            &name,
            checked_end(&name, staging_offset, data.len() as u64)?,
            staging.capacity(),
        )?;
        let staging_buffer = staging.buffer();

        self.device
            .write_buffer(staging_buffer, staging_offset, data)?;

        let device = self.device.as_ref();
        dst.record_transition(
            device,
            cb,
            range,
            &Transition::transfer_dst(self.queue_family),
        )?;
        device.cmd_copy_buffer_to_image(
            cb,
            staging_buffer,
            dst.image(),
            &[vk::BufferImageCopy {
                buffer_offset: staging_offset,
                ..copy
            }],
        );
        let resting = dst.earliest_use().on_queue(self.queue_family);
        dst.record_transition(device, cb, range, &resting)
    }

    /// Fill mip levels 1.. by successive linear blits from level 0.
    ///
    /// Every level is first moved to transfer-destination; each level then
    /// becomes a blit source for the next and goes to its resting layout.
    /// Every level must be usable from this coordinator's queue family;
    /// otherwise nothing is recorded.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn generate_mipmaps(&self, cb: vk::CommandBuffer, texture: &mut Texture) -> Result<()> {
        texture.check_owner(texture.full_range(), self.queue_family)?;

        let device = self.device.as_ref();
        let levels = texture.mip_levels();
        let resting = texture.earliest_use().on_queue(self.queue_family);
        let transfer_dst = Transition::transfer_dst(self.queue_family);
        let transfer_src = Transition::transfer_src(self.queue_family);

        for level in 0..levels {
            texture.record_transition(device, cb, texture.level_range(level), &transfer_dst)?;
        }

        for level in 0..levels - 1 {
            let src = texture.level_range(level);
            texture.record_transition(device, cb, src, &transfer_src)?;
            device.cmd_blit_image(
                cb,
                texture.image(),
                texture.image(),
                &[level_blit(texture, level)],
                vk::Filter::LINEAR,
            );
            texture.record_transition(device, cb, src, &resting)?;
        }

        texture.record_transition(device, cb, texture.level_range(levels - 1), &resting)
    }

    /// Record a copy of `count` elements starting at `first_element` into
    /// `src`'s staging buffer. Read them with [`Self::read_staged_elements`]
    /// once the command buffer has executed.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn download_elements(
        &self,
        cb: vk::CommandBuffer,
        src: &mut Buffer,
        first_element: u64,
        count: u64,
    ) -> Result<()> {
        let span = strided_span(
            count as usize,
            src.element_size() as usize,
            src.stride() as usize,
        ) as u64;
        let offset = element_offset(src, first_element)?;
        self.download_range(cb, src, offset, span)
    }

    /// Record a copy of `len` bytes at `offset` into `src`'s staging buffer.
    pub fn download_bytes(
        &self,
        cb: vk::CommandBuffer,
        src: &mut Buffer,
        offset: u64,
        len: u64,
    ) -> Result<()> {
        self.download_range(cb, src, offset, len)
    }

    fn download_range(
        &self,
        cb: vk::CommandBuffer,
        src: &mut Buffer,
        src_offset: u64,
        span: u64,
    ) -> Result<()> {
        if span == 0 {
            return Ok(());
        }
        check_buffer_range(src, src_offset, span)?;
        self.check_owner(src.name(), src.state().queue_family)?;
        let device = self.device.as_ref();

        if src.is_host_visible() {
            let host_read = Transition::new(
                vk::ImageLayout::UNDEFINED,
                Usage::HostRead,
                vk::PipelineStageFlags::HOST,
                self.queue_family,
            );
            return src.record_transition(device, cb, &host_read);
        }

        let stride = src.stride();
        let name = src.name().to_string();
        let staging = src.resolve_staging(self.may_own_staging)?;
        let staging_offset = checked_end(&name, staging.base_offset(stride), src_offset)?;
        check_staging_capacity(
            &name,
            checked_end(&name, staging_offset, span)?,
            staging.capacity(),
        )?;
        let staging_buffer = staging.buffer();

        src.record_transition(device, cb, &Transition::transfer_src(self.queue_family))?;
        device.cmd_copy_buffer(
            cb,
            src.handle(),
            staging_buffer,
            &[vk::BufferCopy {
                src_offset,
                dst_offset: staging_offset,
                size: span,
            }],
        );
        let resting = src.earliest_use().on_queue(self.queue_family);
        src.record_transition(device, cb, &resting)
    }

    /// Record a copy of one mip level (layers `base_layer..base_layer +
    /// layer_count`) into `src`'s staging buffer.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn download_texture(
        &self,
        cb: vk::CommandBuffer,
        src: &mut Texture,
        mip_level: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<()> {
        check_mip_level(src, mip_level)?;
        let layer_size = src.level_layer_size(mip_level)?;
        let range = texture_region(
            src,
            layer_size * u64::from(layer_count),
            mip_level,
            base_layer,
        )?;
        src.check_owner(range, self.queue_family)?;

        let region_offset = src.staging_offset(base_layer, mip_level)?;
        let copy = level_copy(src, &range, 0);
        let name = src.name().to_string();
        let staging = src.resolve_staging(self.may_own_staging)?;
        let staging_offset = checked_end(&name, staging.byte_offset(), region_offset)?;
        check_staging_capacity(
            &name,
            checked_end(&name, staging_offset, layer_size * u64::from(layer_count))?,
            staging.capacity(),
        )?;
        let staging_buffer = staging.buffer();

        let device = self.device.as_ref();
        src.record_transition(
            device,
            cb,
            range,
            &Transition::transfer_src(self.queue_family),
        )?;
        device.cmd_copy_image_to_buffer(
            cb,
            src.image(),
            staging_buffer,
            &[vk::BufferImageCopy {
                buffer_offset: staging_offset,
                ..copy
            }],
        );
        let resting = src.earliest_use().on_queue(self.queue_family);
        src.record_transition(device, cb, range, &resting)
    }

    /// Read back elements staged by [`Self::download_elements`].
    pub fn read_staged_elements<T: Pod>(
        &self,
        src: &Buffer,
        first_element: u64,
        count: u64,
    ) -> Result<Vec<T>> {
        check_element_size::<T>(src)?;
        let tight = src.element_size() as usize;
        let stride = src.stride() as usize;
        let span = strided_span(count as usize, tight, stride);
        let raw = self.read_staged_range(src, element_offset(src, first_element)?, span as u64)?;

        let mut out = vec![T::zeroed(); count as usize];
        let packed: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        if stride == tight {
            packed.copy_from_slice(&raw);
        } else {
            gather_strided(&raw, packed, tight, stride);
        }
        Ok(out)
    }

    /// Read back bytes staged by [`Self::download_bytes`].
    pub fn read_staged_bytes(&self, src: &Buffer, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.read_staged_range(src, offset, len)
    }

    fn read_staged_range(&self, src: &Buffer, src_offset: u64, span: u64) -> Result<Vec<u8>> {
        check_buffer_range(src, src_offset, span)?;
        let mut out = vec![0u8; span as usize];
        if src.is_host_visible() {
            self.device.read_buffer(src.handle(), src_offset, &mut out)?;
            return Ok(out);
        }
        let staging = src
            .staging_binding()
            .ok_or_else(|| GpuError::MissingStagingBuffer {
                resource: src.name().to_string(),
            })?;
        let staging_offset = checked_end(src.name(), staging.base_offset(src.stride()), src_offset)?;
        check_staging_capacity(
            src.name(),
            checked_end(src.name(), staging_offset, span)?,
            staging.capacity(),
        )?;
        self.device
            .read_buffer(staging.buffer(), staging_offset, &mut out)?;
        Ok(out)
    }

    /// Read back texels staged by [`Self::download_texture`].
    pub fn read_staged_texture(
        &self,
        src: &Texture,
        mip_level: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<Vec<u8>> {
        check_mip_level(src, mip_level)?;
        let len = src.level_layer_size(mip_level)? * u64::from(layer_count);
        texture_region(src, len, mip_level, base_layer)?;
        let staging = src
            .staging_binding()
            .ok_or_else(|| GpuError::MissingStagingBuffer {
                resource: src.name().to_string(),
            })?;
        let staging_offset = staging.byte_offset() + src.staging_offset(base_layer, mip_level)?;
        check_staging_capacity(src.name(), staging_offset + len, staging.capacity())?;
        let mut out = vec![0u8; len as usize];
        self.device
            .read_buffer(staging.buffer(), staging_offset, &mut out)?;
        Ok(out)
    }

    fn check_owner(&self, name: &str, owner: u32) -> Result<()> {
        if owner != vk::QUEUE_FAMILY_IGNORED && owner != self.queue_family {
            return Err(GpuError::ForeignQueueOwner {
                resource: name.to_string(),
                owner,
                requested: self.queue_family,
            });
        }
        Ok(())
    }
}

fn check_element_size<T>(buffer: &Buffer) -> Result<()> {
    let actual = std::mem::size_of::<T>() as u64;
    if actual != buffer.element_size() {
        return Err(GpuError::ElementSizeMismatch {
            resource: buffer.name().to_string(),
            expected: buffer.element_size(),
            actual,
        });
    }
    Ok(())
}

fn check_buffer_range(buffer: &Buffer, offset: u64, span: u64) -> Result<()> {
    let end = checked_end(buffer.name(), offset, span)?;
    if end > buffer.capacity() {
        return Err(GpuError::UploadOutOfRange {
            resource: buffer.name().to_string(),
            offset,
            end,
            capacity: buffer.capacity(),
        });
    }
    Ok(())
}

/// Byte offset of element `first_element` of `buffer`.
fn element_offset(buffer: &Buffer, first_element: u64) -> Result<u64> {
    first_element.checked_mul(buffer.stride()).ok_or_else(|| {
        GpuError::InvalidArgument(format!(
            "element {first_element} of `{}` is beyond addressable memory",
            buffer.name()
        ))
    })
}

/// `offset + len`, failing instead of wrapping.
fn checked_end(name: &str, offset: u64, len: u64) -> Result<u64> {
    offset.checked_add(len).ok_or_else(|| {
        GpuError::InvalidArgument(format!(
            "range of {len} bytes at {offset} in `{name}` overflows"
        ))
    })
}

fn check_mip_level(texture: &Texture, mip_level: u32) -> Result<()> {
    if mip_level >= texture.mip_levels() {
        return Err(GpuError::InvalidArgument(format!(
            "mip level {mip_level} of `{}`, which has {} levels",
            texture.name(),
            texture.mip_levels()
        )));
    }
    Ok(())
}

fn check_staging_capacity(name: &str, required: u64, capacity: u64) -> Result<()> {
    if required > capacity {
        return Err(GpuError::StagingTooSmall {
            resource: name.to_string(),
            required,
            capacity,
        });
    }
    Ok(())
}

/// Resolve `len` bytes of tightly packed layers of `mip_level` into a
/// subresource range, validating it against the texture.
fn texture_region(
    texture: &Texture,
    len: u64,
    mip_level: u32,
    base_layer: u32,
) -> Result<SubresourceRange> {
    check_mip_level(texture, mip_level)?;
    let layer_size = texture.level_layer_size(mip_level)?;
    if len % layer_size != 0 {
        return Err(GpuError::ElementSizeMismatch {
            resource: texture.name().to_string(),
            expected: layer_size,
            actual: len,
        });
    }
    let layer_count = u32::try_from(len / layer_size).unwrap_or(u32::MAX);
    if layer_count == 0 || base_layer.saturating_add(layer_count) > texture.array_layers() {
        let start = texture.staging_offset(base_layer.min(texture.array_layers()), mip_level)?;
        return Err(GpuError::UploadOutOfRange {
            resource: texture.name().to_string(),
            offset: start,
            end: start + len,
            capacity: texture.capacity()?,
        });
    }
    Ok(SubresourceRange::level(
        texture.aspect(),
        mip_level,
        base_layer,
        layer_count,
    ))
}

fn level_copy(texture: &Texture, range: &SubresourceRange, buffer_offset: u64) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: range.aspect,
            mip_level: range.base_mip_level,
            base_array_layer: range.base_array_layer,
            layer_count: range.layer_count,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: texture.level_extent(range.base_mip_level),
    }
}

fn extent_corner(extent: vk::Extent3D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

/// Blit covering all layers of `level` into `level + 1`.
fn level_blit(texture: &Texture, level: u32) -> vk::ImageBlit {
    let layers = |mip_level| vk::ImageSubresourceLayers {
        aspect_mask: texture.aspect(),
        mip_level,
        base_array_layer: 0,
        layer_count: texture.array_layers(),
    };
    vk::ImageBlit {
        src_subresource: layers(level),
        src_offsets: [
            vk::Offset3D::default(),
            extent_corner(texture.level_extent(level)),
        ],
        dst_subresource: layers(level + 1),
        dst_offsets: [
            vk::Offset3D::default(),
            extent_corner(texture.level_extent(level + 1)),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_covers_last_element_tightly() {
        assert_eq!(strided_span(0, 12, 256), 0);
        assert_eq!(strided_span(1, 12, 256), 12);
        assert_eq!(strided_span(3, 12, 256), 2 * 256 + 12);
        assert_eq!(strided_span(4, 16, 16), 64);
    }

    #[test]
    fn scatter_places_elements_at_stride() {
        let src = [1u8, 2, 3, 4, 5, 6];
        let mut dst = vec![0xAAu8; strided_span(3, 2, 4)];
        scatter_strided(&src, &mut dst, 2, 4);
        assert_eq!(dst, [1, 2, 0xAA, 0xAA, 3, 4, 0xAA, 0xAA, 5, 6]);
    }

    #[test]
    fn gather_inverts_scatter() {
        let src: Vec<u8> = (0..24).collect();
        let mut spread = vec![0u8; strided_span(6, 4, 16)];
        scatter_strided(&src, &mut spread, 4, 16);

        let mut packed = vec![0u8; 24];
        gather_strided(&spread, &mut packed, 4, 16);
        assert_eq!(packed, src);
    }

    #[test]
    fn gather_skips_padding() {
        let src = [9u8, 9, 0, 0, 8, 8, 0, 0];
        let mut dst = [0u8; 4];
        gather_strided(&src, &mut dst, 2, 4);
        assert_eq!(dst, [9, 9, 8, 8]);
    }
}
