use std::collections::HashMap;

use geoflow_scene::{SceneBounds, SceneBuffers, SceneDraw, SceneMaterial};
use tracing::debug;

use crate::gpu::{BufferId, BufferUsage, GpuBackend, GpuVertex};
use crate::project::EngineSettings;
use crate::record::GeometryRecord;

/// Concatenates the records into one scene, rebasing each record's indices
/// by the vertices that precede it.
pub fn assemble_scene(
    records: &[&GeometryRecord],
    build_wireframe: bool,
    base_color: [f32; 3],
) -> SceneBuffers {
    let mut scene = SceneBuffers {
        base_color,
        ..Default::default()
    };
    let mut material_lookup: HashMap<String, u32> = HashMap::new();

    for record in records {
        let geometry = &record.geometry;
        if geometry.is_empty() {
            continue;
        }
        let base_vertex = scene.positions.len() as u32;
        let first_index = scene.indices.len() as u32;
        let first_wire_index = scene.wireframe_indices.len() as u32;

        scene.positions.extend_from_slice(&geometry.positions);
        match &geometry.normals {
            Some(normals) if normals.len() == geometry.positions.len() => {
                scene.normals.extend_from_slice(normals);
            }
            _ => {
                let mut with_normals = geometry.clone();
                if with_normals.compute_normals() {
                    scene.normals.extend(with_normals.normals.unwrap_or_default());
                } else {
                    scene
                        .normals
                        .extend(std::iter::repeat([0.0, 1.0, 0.0]).take(geometry.positions.len()));
                }
            }
        }
        scene
            .indices
            .extend(geometry.indices.iter().map(|index| index + base_vertex));
        if build_wireframe {
            scene
                .wireframe_indices
                .extend(geometry.wireframe().into_iter().map(|index| index + base_vertex));
        }

        let material = geometry.material.as_ref().map(|material| {
            if let Some(index) = material_lookup.get(&material.name) {
                return *index;
            }
            let index = scene.materials.len() as u32;
            scene.materials.push(SceneMaterial {
                name: material.name.clone(),
                base_color: material.base_color,
                metallic: material.metallic,
                roughness: material.roughness,
            });
            material_lookup.insert(material.name.clone(), index);
            index
        });

        if let Some(bounds) = SceneBounds::from_points(&geometry.positions) {
            scene.bounds = Some(match scene.bounds {
                Some(existing) => existing.union(bounds),
                None => bounds,
            });
        }

        scene.draws.push(SceneDraw {
            node: record.id.raw(),
            base_vertex,
            vertex_count: geometry.positions.len() as u32,
            first_index,
            index_count: geometry.indices.len() as u32,
            first_wire_index,
            wire_index_count: scene.wireframe_indices.len() as u32 - first_wire_index,
            material,
        });
    }

    scene
}

/// Handles to the merged buffers of the last rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneGpuBuffers {
    pub vertex: BufferId,
    pub index: BufferId,
    pub wireframe: Option<BufferId>,
}

impl SceneGpuBuffers {
    fn release(self, backend: &mut dyn GpuBackend) {
        backend.release_buffer(self.vertex);
        backend.release_buffer(self.index);
        if let Some(wireframe) = self.wireframe {
            backend.release_buffer(wireframe);
        }
    }
}

/// Owns the merged scene and its device copy. Every rebuild is a full
/// recompute; the previous buffers are released before new ones exist.
#[derive(Debug, Default)]
pub struct SceneAssembler {
    scene: SceneBuffers,
    gpu: Option<SceneGpuBuffers>,
    rebuilds: u64,
}

impl SceneAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene(&self) -> &SceneBuffers {
        &self.scene
    }

    pub fn gpu(&self) -> Option<SceneGpuBuffers> {
        self.gpu
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn rebuild(
        &mut self,
        backend: &mut dyn GpuBackend,
        records: &[&GeometryRecord],
        settings: &EngineSettings,
    ) -> &SceneBuffers {
        self.release(backend);
        self.scene = assemble_scene(records, settings.build_wireframe, settings.base_color);
        self.rebuilds += 1;

        if !self.scene.is_empty() {
            let vertices: Vec<GpuVertex> = self
                .scene
                .positions
                .iter()
                .zip(&self.scene.normals)
                .map(|(position, normal)| GpuVertex {
                    position: *position,
                    normal: *normal,
                })
                .collect();
            let vertex = backend.create_buffer(
                "scene_vertices",
                BufferUsage::Vertex,
                bytemuck::cast_slice(&vertices),
            );
            let index = backend.create_buffer(
                "scene_indices",
                BufferUsage::Index,
                bytemuck::cast_slice(&self.scene.indices),
            );
            let wireframe = (!self.scene.wireframe_indices.is_empty()).then(|| {
                backend.create_buffer(
                    "scene_wireframe",
                    BufferUsage::Index,
                    bytemuck::cast_slice(&self.scene.wireframe_indices),
                )
            });
            self.gpu = Some(SceneGpuBuffers {
                vertex,
                index,
                wireframe,
            });
        }

        debug!(
            draws = self.scene.draws.len(),
            vertices = self.scene.vertex_count(),
            triangles = self.scene.triangle_count(),
            "scene rebuilt"
        );
        &self.scene
    }

    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(gpu) = self.gpu.take() {
            gpu.release(backend);
        }
    }
}
