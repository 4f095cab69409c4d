use glam::Vec3;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneMaterial {
    pub name: String,
    pub base_color: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
}

/// Range of the merged buffers that belongs to one visible node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneDraw {
    pub node: u64,
    pub base_vertex: u32,
    pub vertex_count: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub first_wire_index: u32,
    pub wire_index_count: u32,
    pub material: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl SceneBounds {
    pub fn from_points(points: &[[f32; 3]]) -> Option<Self> {
        let mut iter = points.iter();
        let first = Vec3::from(*iter.next()?);
        let mut bounds = Self {
            min: first,
            max: first,
        };
        for p in iter {
            let p = Vec3::from(*p);
            bounds.min = bounds.min.min(p);
            bounds.max = bounds.max.max(p);
        }
        Some(bounds)
    }

    pub fn union(self, other: SceneBounds) -> SceneBounds {
        SceneBounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn radius(&self) -> f32 {
        (self.max - self.min).length() * 0.5
    }
}

/// Everything the renderer needs for one frame: one contiguous vertex stream,
/// triangle indices and line indices already rebased onto it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneBuffers {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub wireframe_indices: Vec<u32>,
    pub draws: Vec<SceneDraw>,
    pub materials: Vec<SceneMaterial>,
    pub base_color: [f32; 3],
    pub bounds: Option<SceneBounds>,
}

impl SceneBuffers {
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn draw_for(&self, node: u64) -> Option<&SceneDraw> {
        self.draws.iter().find(|draw| draw.node == node)
    }

    pub fn material_for(&self, draw: &SceneDraw) -> Option<&SceneMaterial> {
        draw.material
            .and_then(|index| self.materials.get(index as usize))
    }
}
