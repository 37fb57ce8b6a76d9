use crate::error::{Result, SparseError};
use bytemuck::Pod;
use cfg_if::cfg_if;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use wgpu::{util::DeviceExt, PollType};

/// Wrapper for the WGPU device and queue, including transfer counters.
#[derive(Debug, Clone)]
pub(crate) struct GpuContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    /// Bytes uploaded through the instrumented helpers.
    pub(crate) bytes_to_gpu: Arc<AtomicU64>,
    /// Bytes read back through the instrumented helpers.
    pub(crate) bytes_from_gpu: Arc<AtomicU64>,
}

impl GpuContext {
    pub(crate) async fn new() -> Result<Self> {
        cfg_if! {
            if #[cfg(target_arch = "wasm32")] {
                log::info!("Initializing WASM WGPU context");
                let backends = wgpu::Backends::BROWSER_WEBGPU;
                let base_limits = wgpu::Limits::downlevel_defaults();
            } else {
                log::info!("Initializing native WGPU context");
                let backends = wgpu::Backends::PRIMARY;
                let base_limits = wgpu::Limits::default();
            }
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        log::debug!("Requesting adapter");
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SparseError::DeviceFailure(format!("No suitable adapter found: {}", e)))?;

        log::info!("Selected adapter: {:?}", adapter.get_info());

        let mut limits = base_limits.using_resolution(adapter.limits());
        // The adaptive SpMV binds seven storage buffers.
        limits.max_storage_buffers_per_shader_stage =
            limits.max_storage_buffers_per_shader_stage.max(8);
        log::debug!("Requested limits: {:?}", limits);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sparse_core device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: wgpu::Features::empty(),
                required_limits: limits,
            })
            .await
            .map_err(|e| SparseError::DeviceFailure(format!("Failed to request device: {}", e)))?;

        log::info!("Device and queue obtained successfully");

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            bytes_to_gpu: Arc::new(AtomicU64::new(0)),
            bytes_from_gpu: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Creates a buffer holding `contents` and counts the upload. Empty
    /// contents get a 4-byte buffer, since zero-sized bindings are invalid.
    pub(crate) fn create_gpu_buffer_with_data(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let byte_len = contents.len() as u64;
        log::debug!("Creating GPU buffer '{}' with {} bytes", label, byte_len);
        let padding = [0u8; 4];
        let contents = if contents.is_empty() { &padding[..] } else { contents };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);
        log::trace!(
            "bytes_to_gpu incremented by {}, now: {}",
            byte_len,
            self.bytes_to_gpu.load(Ordering::Relaxed)
        );
        buffer
    }

    /// Writes `data` at `offset` bytes into `buffer` through the queue.
    pub(crate) fn write_buffer<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        data: &[T],
    ) -> Result<()> {
        let byte_len = std::mem::size_of_val(data) as u64;
        if byte_len == 0 {
            log::debug!("Skipping write for 0 bytes");
            return Ok(());
        }
        if buffer.size() < offset + byte_len {
            return Err(SparseError::Internal(format!(
                "Target buffer size ({}) is smaller than offset {} + data size {}",
                buffer.size(),
                offset,
                byte_len
            )));
        }
        if !buffer.usage().contains(wgpu::BufferUsages::COPY_DST) {
            return Err(SparseError::Internal(
                "Target buffer must have COPY_DST usage".to_string(),
            ));
        }
        self.queue
            .write_buffer(buffer, offset, bytemuck::cast_slice(data));
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);
        log::trace!(
            "bytes_to_gpu incremented by {} (write_buffer), now: {}",
            byte_len,
            self.bytes_to_gpu.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Creates an uninitialised (zero-filled) buffer of at least 4 bytes.
    pub(crate) fn create_empty_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::debug!("Creating empty GPU buffer '{}' of size {}", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.max(4),
            usage,
            mapped_at_creation: false,
        })
    }

    /// Reads `element_count` elements starting `offset` bytes into `buffer`.
    pub(crate) async fn read_buffer_to_cpu<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        element_count: usize,
    ) -> Result<Vec<T>> {
        let size_bytes = (element_count * std::mem::size_of::<T>()) as u64;
        if size_bytes == 0 {
            log::debug!("Skipping readback for 0 bytes");
            return Ok(Vec::new());
        }
        if buffer.size() < offset + size_bytes {
            return Err(SparseError::Internal(format!(
                "GPU buffer size ({}) is smaller than the requested range {}..{}",
                buffer.size(),
                offset,
                offset + size_bytes
            )));
        }

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer_for_readback"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read_buffer_encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, offset, &staging_buffer, 0, size_bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if let Err(e) = sender.send(result) {
                log::error!("Failed to send map result back: {:?}", e);
            }
        });

        self.bytes_from_gpu.fetch_add(size_bytes, Ordering::Relaxed);
        log::trace!(
            "bytes_from_gpu incremented by {}, now: {}",
            size_bytes,
            self.bytes_from_gpu.load(Ordering::Relaxed)
        );

        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                log::debug!("Polling device to wait for buffer mapping");
                self.device
                    .poll(PollType::Wait)
                    .map_err(|e| SparseError::DeviceFailure(format!("Device poll failed: {}", e)))?;
            }
        }

        match receiver.await {
            Ok(Ok(())) => {
                let result = {
                    let data = buffer_slice.get_mapped_range();
                    bytemuck::cast_slice::<u8, T>(&data).to_vec()
                };
                staging_buffer.unmap();
                log::debug!("Buffer readback complete ({} bytes)", size_bytes);
                Ok(result)
            }
            Ok(Err(e)) => Err(SparseError::DeviceFailure(format!(
                "Buffer mapping failed: {}",
                e
            ))),
            Err(_) => Err(SparseError::Internal(
                "Channel receive error during buffer mapping".to_string(),
            )),
        }
    }

    pub(crate) fn get_transfer_stats(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn reset_transfer_stats(&self) {
        self.bytes_to_gpu.store(0, Ordering::Relaxed);
        self.bytes_from_gpu.store(0, Ordering::Relaxed);
        log::info!("GPU transfer counters reset.");
    }
}
