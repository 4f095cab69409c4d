use std::collections::HashSet;

use glam::{Mat4, Quat, Vec3};

use crate::material::Material;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: [f32; 3],
    pub radius: f32,
}

/// Per-point instancing data: one entry per copied instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointAttributes {
    pub positions: Vec<[f32; 3]>,
    pub scales: Vec<[f32; 3]>,
    pub orientations: Vec<[f32; 4]>,
    /// Vertices contributed by each instance, laid out back to back.
    pub instance_vertex_count: u32,
}

impl PointAttributes {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn orientation(&self, index: usize) -> Quat {
        self.orientations
            .get(index)
            .map(|q| Quat::from_array(*q))
            .unwrap_or(Quat::IDENTITY)
    }
}

/// A node's computed output: triangle mesh plus the optional payloads that
/// end up in their own GPU buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub indices: Vec<u32>,
    pub wireframe_indices: Option<Vec<u32>>,
    pub material: Option<Material>,
    pub points: Option<PointAttributes>,
    pub bounding_box: Option<Aabb>,
    pub bounding_sphere: Option<BoundingSphere>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions_indices(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn bounds(&self) -> Option<Aabb> {
        let mut iter = self.positions.iter();
        let first = iter.next()?;
        let mut min = *first;
        let mut max = *first;

        for p in iter {
            min[0] = min[0].min(p[0]);
            min[1] = min[1].min(p[1]);
            min[2] = min[2].min(p[2]);
            max[0] = max[0].max(p[0]);
            max[1] = max[1].max(p[1]);
            max[2] = max[2].max(p[2]);
        }

        Some(Aabb { min, max })
    }

    /// Refreshes the cached box and sphere from the current positions.
    pub fn update_bounds(&mut self) {
        self.bounding_box = self.bounds();
        self.bounding_sphere = self.bounding_box.map(|aabb| {
            let min = Vec3::from(aabb.min);
            let max = Vec3::from(aabb.max);
            let center = (min + max) * 0.5;
            let radius = self
                .positions
                .iter()
                .map(|p| Vec3::from(*p).distance(center))
                .fold(0.0f32, f32::max);
            BoundingSphere {
                center: center.to_array(),
                radius,
            }
        });
    }

    pub fn compute_normals(&mut self) -> bool {
        if self.indices.len() % 3 != 0 || self.positions.is_empty() {
            return false;
        }

        let mut accum = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if i0 >= accum.len() || i1 >= accum.len() || i2 >= accum.len() {
                continue;
            }
            let p0 = Vec3::from(self.positions[i0]);
            let p1 = Vec3::from(self.positions[i1]);
            let p2 = Vec3::from(self.positions[i2]);
            let normal = (p1 - p0).cross(p2 - p0);
            accum[i0] += normal;
            accum[i1] += normal;
            accum[i2] += normal;
        }

        self.normals = Some(accum.into_iter().map(normalize_or_up).collect());
        true
    }

    pub fn transform(&mut self, matrix: Mat4) {
        for p in &mut self.positions {
            *p = matrix.transform_point3(Vec3::from(*p)).to_array();
        }

        if let Some(normals) = &mut self.normals {
            let normal_matrix = matrix.inverse().transpose();
            for n in normals {
                *n = normalize_or_up(normal_matrix.transform_vector3(Vec3::from(*n)));
            }
        }

        if let Some(points) = &mut self.points {
            let (_, rotation, _) = matrix.to_scale_rotation_translation();
            for p in &mut points.positions {
                *p = matrix.transform_point3(Vec3::from(*p)).to_array();
            }
            for q in &mut points.orientations {
                *q = (rotation * Quat::from_array(*q)).normalize().to_array();
            }
        }

        if self.bounding_box.is_some() {
            self.update_bounds();
        }
    }

    /// Unique edges of the triangle list as line-list indices. An edge is
    /// keyed by its unordered vertex pair and emitted on first sight.
    pub fn build_wireframe_indices(&self) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(self.indices.len() * 2);
        for tri in self.indices.chunks_exact(3) {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let key = if a < b { (a, b) } else { (b, a) };
                if seen.insert(key) {
                    lines.push(a);
                    lines.push(b);
                }
            }
        }
        lines
    }

    /// Wireframe supplied by the producer, or one built from the triangles.
    pub fn wireframe(&self) -> Vec<u32> {
        match &self.wireframe_indices {
            Some(lines) => lines.clone(),
            None => self.build_wireframe_indices(),
        }
    }

    /// Concatenates geometries, rebasing indices by the running vertex offset.
    /// Normals survive only when every input carries them; the first material wins.
    pub fn merge(parts: &[&Geometry]) -> Geometry {
        let mut merged = Geometry::default();
        let mut vertex_offset = 0u32;
        let include_normals = parts.iter().all(|part| part.normals.is_some());
        let mut normals = Vec::new();

        for part in parts {
            merged.positions.extend_from_slice(&part.positions);
            merged
                .indices
                .extend(part.indices.iter().map(|i| i + vertex_offset));
            if include_normals {
                if let Some(part_normals) = &part.normals {
                    normals.extend_from_slice(part_normals);
                }
            }
            vertex_offset += part.positions.len() as u32;
        }

        if include_normals {
            merged.normals = Some(normals);
        }
        merged.material = parts.iter().find_map(|part| part.material.clone());
        merged.update_bounds();
        merged
    }
}

fn normalize_or_up(v: Vec3) -> [f32; 3] {
    let len = v.length();
    if len > 0.0 {
        (v / len).to_array()
    } else {
        [0.0, 1.0, 0.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Geometry {
        Geometry::with_positions_indices(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn bounds_for_simple_points() {
        let geo =
            Geometry::with_positions_indices(vec![[1.0, -2.0, 0.5], [-3.0, 4.0, 2.0]], vec![]);
        let bounds = geo.bounds().expect("bounds");
        assert_eq!(bounds.min, [-3.0, -2.0, 0.5]);
        assert_eq!(bounds.max, [1.0, 4.0, 2.0]);
    }

    #[test]
    fn sphere_encloses_every_point() {
        let mut geo = triangle();
        geo.update_bounds();
        let sphere = geo.bounding_sphere.expect("sphere");
        let center = Vec3::from(sphere.center);
        for p in &geo.positions {
            assert!(Vec3::from(*p).distance(center) <= sphere.radius + 1.0e-5);
        }
    }

    #[test]
    fn normals_for_triangle() {
        let mut geo = triangle();
        assert!(geo.compute_normals());
        for n in geo.normals.expect("normals") {
            assert!((n[2] - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn wireframe_dedups_shared_edges() {
        // Two triangles sharing the 1-2 edge: 5 unique edges.
        let geo = Geometry::with_positions_indices(
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]],
            vec![0, 1, 2, 2, 1, 3],
        );
        let lines = geo.build_wireframe_indices();
        assert_eq!(lines.len(), 10);
        assert_eq!(&lines[..6], &[0, 1, 1, 2, 2, 0]);
    }

    #[test]
    fn precomputed_wireframe_is_kept() {
        let mut geo = triangle();
        geo.wireframe_indices = Some(vec![0, 1]);
        assert_eq!(geo.wireframe(), vec![0, 1]);
    }

    #[test]
    fn merge_offsets_indices() {
        let a = Geometry::with_positions_indices(vec![[0.0, 0.0, 0.0]], vec![0]);
        let b = Geometry::with_positions_indices(vec![[1.0, 0.0, 0.0]], vec![0]);
        let merged = Geometry::merge(&[&a, &b]);
        assert_eq!(merged.indices, vec![0, 1]);
        assert!(merged.normals.is_none());
    }
}
