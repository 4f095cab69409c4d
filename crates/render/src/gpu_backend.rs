use std::collections::HashMap;
use std::fmt;

use egui_wgpu::wgpu;
use egui_wgpu::wgpu::util::DeviceExt as _;
use geoflow_core::{BufferId, BufferUsage, GpuBackend, GpuError, ReadbackId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WgpuInitError {
    NoAdapter(String),
    Device(String),
}

impl fmt::Display for WgpuInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WgpuInitError::NoAdapter(err) => write!(f, "no suitable GPU adapter: {err}"),
            WgpuInitError::Device(err) => write!(f, "GPU device request failed: {err}"),
        }
    }
}

impl std::error::Error for WgpuInitError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WgpuBackendStats {
    pub created: u64,
    pub released: u64,
    pub writes: u64,
    pub readbacks: u64,
    pub bytes_uploaded: u64,
    pub live_bytes: u64,
}

struct DeviceBuffer {
    buffer: wgpu::Buffer,
    usage: BufferUsage,
    /// Host copy of the logical contents; the device buffer may be padded.
    shadow: Vec<u8>,
}

struct PendingReadback {
    data: Vec<u8>,
    polls_remaining: u32,
}

/// Host-side readback queue: each ticket hands back the bytes captured at
/// request time on the second poll.
#[derive(Default)]
struct ShadowReadbacks {
    pending: HashMap<ReadbackId, PendingReadback>,
    next: u64,
}

impl ShadowReadbacks {
    fn queue(&mut self, data: Vec<u8>) -> ReadbackId {
        self.next += 1;
        let ticket = ReadbackId::from_raw(self.next);
        self.pending.insert(
            ticket,
            PendingReadback {
                data,
                polls_remaining: 1,
            },
        );
        ticket
    }

    fn poll(&mut self, ticket: ReadbackId) -> Option<Vec<u8>> {
        let pending = self.pending.get_mut(&ticket)?;
        if pending.polls_remaining > 0 {
            pending.polls_remaining -= 1;
            return None;
        }
        self.pending.remove(&ticket).map(|pending| pending.data)
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Device-backed buffers for the engine. Every buffer keeps a host shadow
/// copy of what was written to it.
///
/// Readbacks do not map a staging buffer or wait on the device. They return
/// the host shadow, held back for one poll so callers see the same deferred
/// readiness as with a real device round trip. Anything a shader writes on
/// the device is not visible through a readback.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    buffers: HashMap<BufferId, DeviceBuffer>,
    readbacks: ShadowReadbacks,
    next_buffer: u64,
    stats: WgpuBackendStats,
}

impl fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter_name)
            .field("buffers", &self.buffers.len())
            .field("pending_readbacks", &self.readbacks.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl WgpuBackend {
    /// Opens the default adapter without a surface and blocks until the
    /// device is ready.
    pub fn request() -> Result<Self, WgpuInitError> {
        pollster::block_on(Self::request_async())
    }

    pub async fn request_async() -> Result<Self, WgpuInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| WgpuInitError::NoAdapter(err.to_string()))?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("geoflow_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
                experimental_features: Default::default(),
            })
            .await
            .map_err(|err| WgpuInitError::Device(err.to_string()))?;
        let adapter_name = adapter.get_info().name;
        Ok(Self::from_device(device, queue, adapter_name))
    }

    /// Wraps an existing device, e.g. the one a viewport already owns.
    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_name: impl Into<String>,
    ) -> Self {
        Self {
            device,
            queue,
            adapter_name: adapter_name.into(),
            buffers: HashMap::new(),
            readbacks: ShadowReadbacks::default(),
            next_buffer: 0,
            stats: WgpuBackendStats::default(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&id).map(|entry| &entry.buffer)
    }

    pub fn usage(&self, id: BufferId) -> Option<BufferUsage> {
        self.buffers.get(&id).map(|entry| entry.usage)
    }

    pub fn stats(&self) -> WgpuBackendStats {
        self.stats
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, contents: &[u8]) -> BufferId {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: buffer_usages(usage),
            });
        self.next_buffer += 1;
        let id = BufferId::from_raw(self.next_buffer);
        self.buffers.insert(
            id,
            DeviceBuffer {
                buffer,
                usage,
                shadow: contents.to_vec(),
            },
        );
        self.stats.created += 1;
        self.stats.bytes_uploaded += contents.len() as u64;
        self.stats.live_bytes += contents.len() as u64;
        id
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let entry = self
            .buffers
            .get_mut(&id)
            .ok_or(GpuError::MissingBuffer(id))?;
        let size = entry.shadow.len() as u64;
        let end = offset + data.len() as u64;
        if end > size {
            return Err(GpuError::OutOfBounds {
                buffer: id,
                offset,
                len: data.len() as u64,
                size,
            });
        }
        if !data.is_empty() {
            self.queue.write_buffer(&entry.buffer, offset, data);
        }
        entry.shadow[offset as usize..end as usize].copy_from_slice(data);
        self.stats.writes += 1;
        self.stats.bytes_uploaded += data.len() as u64;
        Ok(())
    }

    fn release_buffer(&mut self, id: BufferId) -> bool {
        let Some(entry) = self.buffers.remove(&id) else {
            return false;
        };
        entry.buffer.destroy();
        self.stats.released += 1;
        self.stats.live_bytes = self
            .stats
            .live_bytes
            .saturating_sub(entry.shadow.len() as u64);
        true
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.get(&id).map(|entry| entry.shadow.len() as u64)
    }

    fn request_readback(&mut self, id: BufferId) -> Result<ReadbackId, GpuError> {
        let data = self
            .buffers
            .get(&id)
            .ok_or(GpuError::MissingBuffer(id))?
            .shadow
            .clone();
        // Served from the shadow; the submit only flushes queued writes.
        self.queue.submit(std::iter::empty());
        let ticket = self.readbacks.queue(data);
        self.stats.readbacks += 1;
        Ok(ticket)
    }

    fn poll_readback(&mut self, ticket: ReadbackId) -> Option<Vec<u8>> {
        self.readbacks.poll(ticket)
    }

    fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    match usage {
        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        BufferUsage::Index => wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        BufferUsage::Storage => {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        }
        BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_usage_accepts_queue_writes() {
        for usage in [
            BufferUsage::Vertex,
            BufferUsage::Index,
            BufferUsage::Storage,
            BufferUsage::Uniform,
        ] {
            assert!(buffer_usages(usage).contains(wgpu::BufferUsages::COPY_DST));
        }
        assert!(buffer_usages(BufferUsage::Storage).contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!buffer_usages(BufferUsage::Vertex).contains(wgpu::BufferUsages::INDEX));
    }

    #[test]
    fn readbacks_return_the_captured_shadow_on_second_poll() {
        let mut readbacks = ShadowReadbacks::default();
        let first = readbacks.queue(vec![1, 2, 3]);
        let second = readbacks.queue(vec![9]);
        assert_ne!(first, second);

        assert_eq!(readbacks.poll(first), None);
        assert_eq!(readbacks.poll(first), Some(vec![1, 2, 3]));
        assert_eq!(readbacks.poll(first), None);
        assert_eq!(readbacks.len(), 1);
        assert_eq!(readbacks.poll(second), None);
        assert_eq!(readbacks.poll(second), Some(vec![9]));
        assert_eq!(readbacks.len(), 0);
    }
}
