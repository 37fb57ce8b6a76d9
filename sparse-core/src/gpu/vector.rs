use super::context::GpuContext;
use crate::error::{Result, SparseError};
use crate::traits::Vector;
use std::sync::Arc;

pub(crate) const VECTOR_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// A dense `f32` vector resident in a GPU storage buffer.
///
/// The vector is the window `[offset, offset + len)` of its buffer, so
/// several vectors can share one allocation. Kernels receive the offset in
/// their parameters.
#[derive(Debug)]
pub struct GpuVector {
    buffer: Arc<wgpu::Buffer>,
    offset: usize,
    len: usize,
    capacity: usize,
    label: String,
}

impl GpuVector {
    pub(crate) fn from_slice(context: &GpuContext, label: &str, data: &[f32]) -> Self {
        let buffer =
            context.create_gpu_buffer_with_data(label, bytemuck::cast_slice(data), VECTOR_USAGE);
        Self {
            buffer: Arc::new(buffer),
            offset: 0,
            len: data.len(),
            capacity: data.len(),
            label: label.to_string(),
        }
    }

    /// Uploads the whole of `data` and exposes `len` elements from `offset`.
    pub(crate) fn with_offset(
        context: &GpuContext,
        label: &str,
        data: &[f32],
        offset: usize,
        len: usize,
    ) -> Result<Self> {
        let mut vector = Self::from_slice(context, label, data);
        vector.set_window(offset, len)?;
        Ok(vector)
    }

    pub(crate) fn zeros(context: &GpuContext, label: &str, len: usize) -> Self {
        let buffer = context.create_empty_buffer(label, len as u64 * F32_BYTES, VECTOR_USAGE);
        Self {
            buffer: Arc::new(buffer),
            offset: 0,
            len,
            capacity: len,
            label: label.to_string(),
        }
    }

    /// A window of `len` elements starting `offset` elements into this
    /// vector. The view shares the buffer; nothing is copied.
    ///
    /// Views of one buffer must not be the input and the output of the same
    /// operation: wgpu rejects the binding and the call fails with
    /// `DeviceFailure`.
    pub fn view(&self, offset: usize, len: usize) -> Result<GpuVector> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(SparseError::InvalidArgument(format!(
                "View {}..{} is outside '{}' of length {}",
                offset,
                offset.saturating_add(len),
                self.label,
                self.len
            )));
        }
        Ok(GpuVector {
            buffer: self.buffer.clone(),
            offset: self.offset + offset,
            len,
            capacity: self.capacity,
            label: format!("{}[{}..{}]", self.label, offset, offset + len),
        })
    }

    fn set_window(&mut self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.capacity) {
            return Err(SparseError::InvalidArgument(format!(
                "Window {}..{} exceeds buffer '{}' of {} elements",
                offset,
                offset.saturating_add(len),
                self.label,
                self.capacity
            )));
        }
        self.offset = offset;
        self.len = len;
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// First element of the window, counted from the start of the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Element offset as a shader parameter.
    pub(crate) fn offset_u32(&self) -> Result<u32> {
        u32::try_from(self.offset).map_err(|_| {
            SparseError::InvalidArgument(format!(
                "Offset {} of '{}' exceeds 32 bits",
                self.offset, self.label
            ))
        })
    }

    pub(crate) fn byte_offset(&self) -> u64 {
        self.offset as u64 * F32_BYTES
    }

    /// Size of the window in bytes (the buffer may be larger).
    pub(crate) fn byte_len(&self) -> u64 {
        self.len as u64 * F32_BYTES
    }

    #[cfg(all(test, feature = "native"))]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Vector for GpuVector {
    type Value = f32;

    fn len(&self) -> usize {
        self.len
    }
}

/// One `f32` slot of a device-resident scalar buffer. Reductions can write
/// here without a host round trip; several scalars may share a buffer.
#[derive(Debug, Clone)]
pub struct GpuScalar {
    pub(crate) buffer: Arc<wgpu::Buffer>,
    pub(crate) index: u32,
    context: GpuContext,
}

impl GpuScalar {
    /// Allocates `count` zeroed slots in one buffer.
    pub(crate) fn block(context: &GpuContext, label: &str, count: usize) -> Vec<GpuScalar> {
        let buffer = Arc::new(context.create_empty_buffer(
            label,
            count as u64 * F32_BYTES,
            VECTOR_USAGE,
        ));
        (0..count as u32)
            .map(|index| GpuScalar {
                buffer: buffer.clone(),
                index,
                context: context.clone(),
            })
            .collect()
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Waits for the pending work that writes this slot and returns it.
    pub async fn read(&self) -> Result<f32> {
        let values = self
            .context
            .read_buffer_to_cpu::<f32>(&self.buffer, self.index as u64 * F32_BYTES, 1)
            .await?;
        Ok(values[0])
    }
}
