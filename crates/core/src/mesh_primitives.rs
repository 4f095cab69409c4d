use glam::Vec3;

use crate::geometry::Geometry;

/// Eight shared corners, two triangles per face.
pub fn make_box(size: [f32; 3]) -> Geometry {
    let hx = size[0] * 0.5;
    let hy = size[1] * 0.5;
    let hz = size[2] * 0.5;

    let positions = vec![
        [-hx, -hy, -hz],
        [hx, -hy, -hz],
        [hx, hy, -hz],
        [-hx, hy, -hz],
        [-hx, -hy, hz],
        [hx, -hy, hz],
        [hx, hy, hz],
        [-hx, hy, hz],
    ];

    let quads: [[u32; 4]; 6] = [
        [0, 3, 2, 1], // -Z
        [4, 5, 6, 7], // +Z
        [0, 1, 5, 4], // -Y
        [3, 7, 6, 2], // +Y
        [1, 2, 6, 5], // +X
        [0, 4, 7, 3], // -X
    ];
    let mut indices = Vec::with_capacity(36);
    for quad in quads {
        push_quad(&mut indices, quad);
    }

    finish(Geometry::with_positions_indices(positions, indices))
}

pub fn make_grid(size: [f32; 2], divisions: [u32; 2]) -> Geometry {
    let width = size[0].max(0.0);
    let depth = size[1].max(0.0);
    let div_x = divisions[0].max(1);
    let div_z = divisions[1].max(1);

    let step_x = width / div_x as f32;
    let step_z = depth / div_z as f32;

    let mut positions = Vec::new();
    for z in 0..=div_z {
        for x in 0..=div_x {
            positions.push([
                -width * 0.5 + x as f32 * step_x,
                0.0,
                -depth * 0.5 + z as f32 * step_z,
            ]);
        }
    }

    let mut indices = Vec::new();
    let stride = div_x + 1;
    for z in 0..div_z {
        for x in 0..div_x {
            let i0 = z * stride + x;
            push_quad(&mut indices, [i0, i0 + stride, i0 + stride + 1, i0 + 1]);
        }
    }

    finish(Geometry::with_positions_indices(positions, indices))
}

/// Ring in the XZ plane, tube swept around it. Seams are duplicated so the
/// vertex count is `(rings + 1) * (sides + 1)`.
pub fn make_torus(major_radius: f32, minor_radius: f32, rings: u32, sides: u32) -> Geometry {
    let rings = rings.max(3);
    let sides = sides.max(3);
    let major = major_radius.max(0.0);
    let minor = minor_radius.max(0.0);

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    for r in 0..=rings {
        let u = r as f32 / rings as f32 * std::f32::consts::TAU;
        let ring_dir = Vec3::new(u.cos(), 0.0, u.sin());
        for s in 0..=sides {
            let v = s as f32 / sides as f32 * std::f32::consts::TAU;
            let normal = ring_dir * v.cos() + Vec3::Y * v.sin();
            positions.push((ring_dir * major + normal * minor).to_array());
            normals.push(normal.to_array());
        }
    }

    let mut indices = Vec::new();
    let stride = sides + 1;
    for r in 0..rings {
        for s in 0..sides {
            let i0 = r * stride + s;
            push_quad(&mut indices, [i0, i0 + 1, i0 + stride + 1, i0 + stride]);
        }
    }

    let mut geometry = Geometry::with_positions_indices(positions, indices);
    geometry.normals = Some(normals);
    geometry.update_bounds();
    geometry
}

/// Subdivided icosahedron projected onto the sphere.
pub fn make_icosphere(radius: f32, subdivisions: u32) -> Geometry {
    let t = (1.0 + 5.0f32.sqrt()) * 0.5;
    let mut positions: Vec<Vec3> = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .into_iter()
    .map(|p| Vec3::from(p).normalize())
    .collect();

    let mut triangles: Vec<[u32; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivisions.min(6) {
        let mut midpoints = std::collections::HashMap::new();
        let mut midpoint = |a: u32, b: u32, positions: &mut Vec<Vec3>| -> u32 {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let mid = (positions[a as usize] + positions[b as usize]).normalize();
                positions.push(mid);
                (positions.len() - 1) as u32
            })
        };

        let mut next = Vec::with_capacity(triangles.len() * 4);
        for [a, b, c] in triangles {
            let ab = midpoint(a, b, &mut positions);
            let bc = midpoint(b, c, &mut positions);
            let ca = midpoint(c, a, &mut positions);
            next.extend_from_slice(&[[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
        }
        triangles = next;
    }

    let normals = positions.iter().map(|p| p.to_array()).collect();
    let positions = positions.iter().map(|p| (*p * radius).to_array()).collect();
    let indices = triangles.into_iter().flatten().collect();

    let mut geometry = Geometry::with_positions_indices(positions, indices);
    geometry.normals = Some(normals);
    geometry.update_bounds();
    geometry
}

fn push_quad(indices: &mut Vec<u32>, [a, b, c, d]: [u32; 4]) {
    indices.extend_from_slice(&[a, b, c, a, c, d]);
}

fn finish(mut geometry: Geometry) -> Geometry {
    geometry.compute_normals();
    geometry.update_bounds();
    geometry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_has_expected_counts() {
        let geo = make_box([2.0, 2.0, 2.0]);
        assert_eq!(geo.positions.len(), 8);
        assert_eq!(geo.indices.len(), 36);
        let bounds = geo.bounding_box.expect("bounds");
        assert_eq!(bounds.min, [-1.0, -1.0, -1.0]);
    }

    #[test]
    fn grid_has_expected_counts() {
        let geo = make_grid([2.0, 2.0], [2, 3]);
        assert_eq!(geo.positions.len(), (2 + 1) * (3 + 1));
        assert_eq!(geo.indices.len(), 2 * 3 * 6);
    }

    #[test]
    fn torus_has_expected_counts() {
        let geo = make_torus(1.0, 0.25, 8, 6);
        assert_eq!(geo.positions.len(), 9 * 7);
        assert_eq!(geo.indices.len(), 8 * 6 * 6);
    }

    #[test]
    fn icosphere_subdivision_counts() {
        let base = make_icosphere(1.0, 0);
        assert_eq!(base.positions.len(), 12);
        assert_eq!(base.indices.len(), 60);

        let once = make_icosphere(1.0, 1);
        assert_eq!(once.positions.len(), 42);
        assert_eq!(once.indices.len(), 240);
        for p in &once.positions {
            assert!((Vec3::from(*p).length() - 1.0).abs() < 1.0e-5);
        }
    }
}
