use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};

use crate::geometry::Geometry;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ReadbackId(u64);

impl ReadbackId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Storage,
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    MissingBuffer(BufferId),
    OutOfBounds {
        buffer: BufferId,
        offset: u64,
        len: u64,
        size: u64,
    },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::MissingBuffer(id) => write!(f, "buffer {} does not exist", id.0),
            GpuError::OutOfBounds {
                buffer,
                offset,
                len,
                size,
            } => write!(
                f,
                "write of {len} bytes at {offset} overruns buffer {} ({size} bytes)",
                buffer.0
            ),
        }
    }
}

/// Device-side buffer management as seen by the engine. Every buffer has
/// exactly one owner, which must release it explicitly.
pub trait GpuBackend {
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, contents: &[u8]) -> BufferId;
    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError>;
    /// Returns false when the buffer was already gone.
    fn release_buffer(&mut self, id: BufferId) -> bool;
    fn buffer_size(&self, id: BufferId) -> Option<u64>;
    /// Schedules a copy back to the host. The bytes are captured now and
    /// handed out by a later `poll_readback`.
    fn request_readback(&mut self, id: BufferId) -> Result<ReadbackId, GpuError>;
    fn poll_readback(&mut self, ticket: ReadbackId) -> Option<Vec<u8>>;
    fn live_buffer_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct HeadlessBuffer {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct PendingReadback {
    data: Vec<u8>,
    polls_remaining: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub created: u64,
    pub released: u64,
    pub writes: u64,
    pub readbacks: u64,
}

/// In-memory backend. Readbacks resolve on the second poll after the
/// request, so callers exercise the same not-ready path as on a device.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    buffers: HashMap<BufferId, HeadlessBuffer>,
    readbacks: HashMap<ReadbackId, PendingReadback>,
    next_buffer: u64,
    next_readback: u64,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(|buffer| buffer.data.as_slice())
    }

    pub fn label(&self, id: BufferId) -> Option<&str> {
        self.buffers.get(&id).map(|buffer| buffer.label.as_str())
    }

    pub fn usage(&self, id: BufferId) -> Option<BufferUsage> {
        self.buffers.get(&id).map(|buffer| buffer.usage)
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, contents: &[u8]) -> BufferId {
        self.next_buffer += 1;
        let id = BufferId(self.next_buffer);
        self.buffers.insert(
            id,
            HeadlessBuffer {
                label: label.to_string(),
                usage,
                data: contents.to_vec(),
            },
        );
        self.stats.created += 1;
        id
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(GpuError::MissingBuffer(id))?;
        let size = buffer.data.len() as u64;
        let end = offset + data.len() as u64;
        if end > size {
            return Err(GpuError::OutOfBounds {
                buffer: id,
                offset,
                len: data.len() as u64,
                size,
            });
        }
        buffer.data[offset as usize..end as usize].copy_from_slice(data);
        self.stats.writes += 1;
        Ok(())
    }

    fn release_buffer(&mut self, id: BufferId) -> bool {
        let released = self.buffers.remove(&id).is_some();
        if released {
            self.stats.released += 1;
        }
        released
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.get(&id).map(|buffer| buffer.data.len() as u64)
    }

    fn request_readback(&mut self, id: BufferId) -> Result<ReadbackId, GpuError> {
        let data = self
            .buffers
            .get(&id)
            .ok_or(GpuError::MissingBuffer(id))?
            .data
            .clone();
        self.next_readback += 1;
        let ticket = ReadbackId(self.next_readback);
        self.readbacks.insert(
            ticket,
            PendingReadback {
                data,
                polls_remaining: 1,
            },
        );
        self.stats.readbacks += 1;
        Ok(ticket)
    }

    fn poll_readback(&mut self, ticket: ReadbackId) -> Option<Vec<u8>> {
        let pending = self.readbacks.get_mut(&ticket)?;
        if pending.polls_remaining > 0 {
            pending.polls_remaining -= 1;
            return None;
        }
        self.readbacks.remove(&ticket).map(|pending| pending.data)
    }

    fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuInstance {
    pub position: [f32; 4],
    pub scale: [f32; 4],
    pub orientation: [f32; 4],
}

/// Handles to the buffers backing one published geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuGeometry {
    pub vertex: BufferId,
    pub index: BufferId,
    pub wireframe: Option<BufferId>,
    pub material: Option<BufferId>,
    pub points: Option<BufferId>,
    pub vertex_count: u32,
    pub index_count: u32,
    pub hash: u64,
}

impl GpuGeometry {
    pub fn buffer_ids(&self) -> Vec<BufferId> {
        let mut ids = vec![self.vertex, self.index];
        ids.extend(self.wireframe);
        ids.extend(self.material);
        ids.extend(self.points);
        ids
    }
}

pub fn vertex_bytes(geometry: &Geometry) -> Vec<u8> {
    let vertices: Vec<GpuVertex> = geometry
        .positions
        .iter()
        .enumerate()
        .map(|(index, position)| GpuVertex {
            position: *position,
            normal: geometry
                .normals
                .as_ref()
                .and_then(|normals| normals.get(index).copied())
                .unwrap_or([0.0, 0.0, 0.0]),
        })
        .collect();
    bytemuck::cast_slice(&vertices).to_vec()
}

pub fn instance_bytes(geometry: &Geometry) -> Option<Vec<u8>> {
    let points = geometry.points.as_ref()?;
    let instances: Vec<GpuInstance> = (0..points.len())
        .map(|index| {
            let [x, y, z] = points.positions[index];
            let [sx, sy, sz] = points.scales.get(index).copied().unwrap_or([1.0; 3]);
            GpuInstance {
                position: [x, y, z, 1.0],
                scale: [sx, sy, sz, 0.0],
                orientation: points.orientation(index).to_array(),
            }
        })
        .collect();
    Some(bytemuck::cast_slice(&instances).to_vec())
}

pub fn hash_geometry(geometry: &Geometry) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytemuck::cast_slice::<[f32; 3], u8>(&geometry.positions).hash(&mut hasher);
    if let Some(normals) = &geometry.normals {
        bytemuck::cast_slice::<[f32; 3], u8>(normals).hash(&mut hasher);
    }
    geometry.indices.hash(&mut hasher);
    geometry.wireframe_indices.hash(&mut hasher);
    if let Some(material) = &geometry.material {
        material.name.hash(&mut hasher);
        bytemuck::cast_slice::<f32, u8>(&material.uniform_data()).hash(&mut hasher);
    }
    instance_bytes(geometry).hash(&mut hasher);
    hasher.finish()
}

/// The buffers a node owns for its current output.
#[derive(Debug, Default)]
pub struct NodeBuffers {
    current: Option<GpuGeometry>,
}

impl NodeBuffers {
    pub fn current(&self) -> Option<&GpuGeometry> {
        self.current.as_ref()
    }

    /// Brings the buffers in line with `geometry`. Unchanged content keeps the
    /// existing handles; same-sized content is written in place; anything
    /// else replaces the old buffer after releasing it.
    pub fn sync(
        &mut self,
        backend: &mut dyn GpuBackend,
        label: &str,
        geometry: &Geometry,
    ) -> Result<GpuGeometry, GpuError> {
        let hash = hash_geometry(geometry);
        if let Some(current) = &self.current {
            if current.hash == hash {
                return Ok(current.clone());
            }
        }

        let previous = self.current.take();
        let vertex = upload(
            backend,
            previous.as_ref().map(|gpu| gpu.vertex),
            &format!("{label}_vertices"),
            BufferUsage::Vertex,
            &vertex_bytes(geometry),
        )?;
        let index = upload(
            backend,
            previous.as_ref().map(|gpu| gpu.index),
            &format!("{label}_indices"),
            BufferUsage::Index,
            bytemuck::cast_slice(&geometry.indices),
        )?;
        let wireframe = upload_optional(
            backend,
            previous.as_ref().and_then(|gpu| gpu.wireframe),
            &format!("{label}_wireframe"),
            BufferUsage::Index,
            geometry
                .wireframe_indices
                .as_ref()
                .map(|lines| bytemuck::cast_slice(lines).to_vec()),
        )?;
        let material = upload_optional(
            backend,
            previous.as_ref().and_then(|gpu| gpu.material),
            &format!("{label}_material"),
            BufferUsage::Uniform,
            geometry
                .material
                .as_ref()
                .map(|material| bytemuck::cast_slice(&material.uniform_data()).to_vec()),
        )?;
        let points = upload_optional(
            backend,
            previous.as_ref().and_then(|gpu| gpu.points),
            &format!("{label}_points"),
            BufferUsage::Storage,
            instance_bytes(geometry),
        )?;

        let gpu = GpuGeometry {
            vertex,
            index,
            wireframe,
            material,
            points,
            vertex_count: geometry.positions.len() as u32,
            index_count: geometry.indices.len() as u32,
            hash,
        };
        self.current = Some(gpu.clone());
        Ok(gpu)
    }

    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(gpu) = self.current.take() {
            for id in gpu.buffer_ids() {
                backend.release_buffer(id);
            }
        }
    }
}

fn upload(
    backend: &mut dyn GpuBackend,
    existing: Option<BufferId>,
    label: &str,
    usage: BufferUsage,
    bytes: &[u8],
) -> Result<BufferId, GpuError> {
    if let Some(id) = existing {
        if backend.buffer_size(id) == Some(bytes.len() as u64) {
            backend.write_buffer(id, 0, bytes)?;
            return Ok(id);
        }
        backend.release_buffer(id);
    }
    Ok(backend.create_buffer(label, usage, bytes))
}

fn upload_optional(
    backend: &mut dyn GpuBackend,
    existing: Option<BufferId>,
    label: &str,
    usage: BufferUsage,
    bytes: Option<Vec<u8>>,
) -> Result<Option<BufferId>, GpuError> {
    match bytes {
        Some(bytes) => upload(backend, existing, label, usage, &bytes).map(Some),
        None => {
            if let Some(id) = existing {
                backend.release_buffer(id);
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_primitives::make_box;

    #[test]
    fn readback_resolves_on_second_poll() {
        let mut backend = HeadlessBackend::new();
        let buffer = backend.create_buffer("state", BufferUsage::Storage, &[1, 2, 3, 4]);
        let ticket = backend.request_readback(buffer).expect("readback");
        assert_eq!(backend.poll_readback(ticket), None);
        assert_eq!(backend.poll_readback(ticket), Some(vec![1, 2, 3, 4]));
        assert_eq!(backend.poll_readback(ticket), None);
    }

    #[test]
    fn write_past_end_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let buffer = backend.create_buffer("small", BufferUsage::Uniform, &[0; 4]);
        let err = backend.write_buffer(buffer, 2, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, GpuError::OutOfBounds { size: 4, .. }));
    }

    #[test]
    fn sync_reuses_unchanged_content() {
        let mut backend = HeadlessBackend::new();
        let mut buffers = NodeBuffers::default();
        let geometry = make_box([1.0; 3]);

        let first = buffers.sync(&mut backend, "box", &geometry).expect("sync");
        let second = buffers.sync(&mut backend, "box", &geometry).expect("sync");
        assert_eq!(first, second);
        assert_eq!(backend.stats().created, 2);
        assert_eq!(backend.stats().writes, 0);
    }

    #[test]
    fn sync_writes_in_place_when_sizes_match() {
        let mut backend = HeadlessBackend::new();
        let mut buffers = NodeBuffers::default();
        let mut geometry = make_box([1.0; 3]);
        let first = buffers.sync(&mut backend, "box", &geometry).expect("sync");

        geometry.positions[0][1] += 0.5;
        let second = buffers.sync(&mut backend, "box", &geometry).expect("sync");
        assert_eq!(first.vertex, second.vertex);
        assert_ne!(first.hash, second.hash);
        assert_eq!(backend.live_buffer_count(), 2);
    }

    #[test]
    fn sync_replaces_resized_buffers_and_release_frees_all() {
        let mut backend = HeadlessBackend::new();
        let mut buffers = NodeBuffers::default();
        buffers
            .sync(&mut backend, "mesh", &make_box([1.0; 3]))
            .expect("sync");
        let mut bigger = crate::mesh_primitives::make_grid([1.0, 1.0], [4, 4]);
        bigger.wireframe_indices = Some(bigger.build_wireframe_indices());
        let gpu = buffers.sync(&mut backend, "mesh", &bigger).expect("sync");

        assert!(gpu.wireframe.is_some());
        assert_eq!(backend.live_buffer_count(), 3);
        buffers.release(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
    }
}
