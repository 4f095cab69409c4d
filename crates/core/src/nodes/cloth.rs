use std::collections::BTreeMap;

use glam::Vec3;

use crate::geometry::Geometry;
use crate::gpu::{BufferId, BufferUsage, GpuBackend};
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::node::{Modifier, NodeError, Simulation};
use crate::nodes::modifier_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Cloth";

pub fn definition() -> NodeDefinition {
    modifier_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("gravity".to_string(), ParamValue::Vec3([0.0, -9.81, 0.0])),
            ("damping".to_string(), ParamValue::Float(0.01)),
            ("stiffness".to_string(), ParamValue::Float(0.9)),
            ("iterations".to_string(), ParamValue::Int(4)),
            ("pin_top".to_string(), ParamValue::Bool(true)),
            ("ground_height".to_string(), ParamValue::Float(-10.0)),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::vec3("gravity", "Gravity"),
        ParamSpec::float_slider("damping", "Damping", 0.0, 1.0),
        ParamSpec::float_slider("stiffness", "Stiffness", 0.0, 1.0)
            .with_help("How strongly edges return to their rest length."),
        ParamSpec::int_slider("iterations", "Iterations", 1, 32),
        ParamSpec::bool("pin_top", "Pin Top Row")
            .with_help("Hold the highest points of the input in place."),
        ParamSpec::float("ground_height", "Ground Height"),
    ]
}

#[derive(Debug, Clone, Copy)]
struct Particle {
    position: Vec3,
    prev_position: Vec3,
    inv_mass: f32,
}

#[derive(Debug, Clone, Copy)]
struct EdgeConstraint {
    p0: usize,
    p1: usize,
    rest_length: f32,
}

/// Position-based cloth over the edges of its input mesh.
#[derive(Debug, Default)]
pub struct ClothNode {
    particles: Vec<Particle>,
    constraints: Vec<EdgeConstraint>,
    rest: Option<Geometry>,
    state_buffer: Option<BufferId>,
    ready: bool,
}

impl ClothNode {
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    fn state_bytes(&self) -> Vec<u8> {
        let state: Vec<[f32; 4]> = self
            .particles
            .iter()
            .map(|p| [p.position.x, p.position.y, p.position.z, p.inv_mass])
            .collect();
        bytemuck::cast_slice(&state).to_vec()
    }

    fn solve_constraints(&mut self, stiffness: f32) {
        for constraint in &self.constraints {
            let p0 = self.particles[constraint.p0];
            let p1 = self.particles[constraint.p1];
            let total_weight = p0.inv_mass + p1.inv_mass;
            if total_weight < 0.0001 {
                continue;
            }
            let delta = p1.position - p0.position;
            let length = delta.length();
            if length < 0.0001 {
                continue;
            }
            let correction =
                delta / length * (length - constraint.rest_length) * stiffness / total_weight;
            self.particles[constraint.p0].position += correction * p0.inv_mass;
            self.particles[constraint.p1].position -= correction * p1.inv_mass;
        }
    }
}

impl Modifier for ClothNode {
    fn apply_modification(
        &mut self,
        _params: &NodeParams,
        _input: &Geometry,
    ) -> Result<Geometry, NodeError> {
        let (true, Some(rest)) = (self.ready, &self.rest) else {
            return Err(NodeError::NotReady);
        };
        let mut geometry = rest.clone();
        geometry.positions = self.particles.iter().map(|p| p.position.to_array()).collect();
        geometry.compute_normals();
        geometry.update_bounds();
        Ok(geometry)
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }

    fn simulation_mut(&mut self) -> Option<&mut dyn Simulation> {
        Some(self)
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

impl Simulation for ClothNode {
    fn begin_setup(
        &mut self,
        params: &NodeParams,
        input: &Geometry,
        backend: &mut dyn GpuBackend,
    ) -> Result<(), NodeError> {
        let pin_top = params.get_bool("pin_top", true);
        let top = input
            .positions
            .iter()
            .map(|p| p[1])
            .fold(f32::NEG_INFINITY, f32::max);

        self.particles = input
            .positions
            .iter()
            .map(|p| {
                let position = Vec3::from(*p);
                let pinned = pin_top && (top - p[1]).abs() < 1.0e-4;
                Particle {
                    position,
                    prev_position: position,
                    inv_mass: if pinned { 0.0 } else { 1.0 },
                }
            })
            .collect();

        let edges = input.build_wireframe_indices();
        self.constraints = edges
            .chunks_exact(2)
            .filter(|edge| {
                (edge[0] as usize) < self.particles.len() && (edge[1] as usize) < self.particles.len()
            })
            .map(|edge| {
                let (p0, p1) = (edge[0] as usize, edge[1] as usize);
                EdgeConstraint {
                    p0,
                    p1,
                    rest_length: self.particles[p0]
                        .position
                        .distance(self.particles[p1].position),
                }
            })
            .collect();

        let mut rest = input.clone();
        rest.points = None;
        self.rest = Some(rest);
        self.state_buffer =
            Some(backend.create_buffer("cloth_state", BufferUsage::Storage, &self.state_bytes()));
        self.ready = true;
        Ok(())
    }

    fn poll_setup(&mut self, _backend: &mut dyn GpuBackend) -> bool {
        false
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn update_sim(&mut self, params: &NodeParams, dt: f32) {
        let gravity = Vec3::from(params.get_vec3("gravity", [0.0, -9.81, 0.0]));
        let damping = params.get_float("damping", 0.01).clamp(0.0, 1.0);
        let stiffness = params.get_float("stiffness", 0.9).clamp(0.0, 1.0);
        let iterations = params.get_int("iterations", 4).max(1);
        let ground = params.get_float("ground_height", -10.0);

        for particle in &mut self.particles {
            if particle.inv_mass == 0.0 {
                continue;
            }
            let velocity = (particle.position - particle.prev_position) * (1.0 - damping);
            particle.prev_position = particle.position;
            particle.position += velocity + gravity * dt * dt;
        }

        for _ in 0..iterations {
            self.solve_constraints(stiffness);
        }

        for particle in &mut self.particles {
            if particle.position.y < ground {
                particle.position.y = ground;
                particle.prev_position.y = ground;
            }
        }
    }

    fn dispatch_sim(&mut self, backend: &mut dyn GpuBackend) -> Result<(), NodeError> {
        let buffer = self
            .state_buffer
            .ok_or_else(|| NodeError::MissingResource("cloth state buffer".to_string()))?;
        backend
            .write_buffer(buffer, 0, &self.state_bytes())
            .map_err(|err| NodeError::MissingResource(err.to_string()))
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(buffer) = self.state_buffer.take() {
            backend.release_buffer(buffer);
        }
        self.particles.clear();
        self.constraints.clear();
        self.rest = None;
        self.ready = false;
    }

    fn restarts_on(&self, key: &str) -> bool {
        key == "pin_top"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;
    use crate::mesh_primitives::make_grid;

    fn hanging_sheet() -> Geometry {
        let mut sheet = make_grid([1.0, 1.0], [4, 4]);
        sheet.transform(glam::Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2));
        sheet
    }

    #[test]
    fn setup_is_immediate_and_pins_top_row() {
        let mut backend = HeadlessBackend::new();
        let mut cloth = ClothNode::default();
        let params = default_params();
        let sheet = hanging_sheet();
        cloth.begin_setup(&params, &sheet, &mut backend).expect("setup");

        assert!(cloth.is_ready());
        assert_eq!(cloth.particle_count(), 25);
        let pinned = cloth.particles.iter().filter(|p| p.inv_mass == 0.0).count();
        assert_eq!(pinned, 5);
        assert_eq!(backend.live_buffer_count(), 1);
    }

    #[test]
    fn stepping_drops_free_particles_but_not_pinned_ones() {
        let mut backend = HeadlessBackend::new();
        let mut cloth = ClothNode::default();
        let params = default_params();
        let sheet = hanging_sheet();
        cloth.begin_setup(&params, &sheet, &mut backend).expect("setup");

        let before = cloth.apply_modification(&params, &sheet).expect("output");
        for _ in 0..10 {
            cloth.update_sim(&params, 1.0 / 60.0);
        }
        cloth.dispatch_sim(&mut backend).expect("dispatch");
        let after = cloth.apply_modification(&params, &sheet).expect("output");

        let top = before.bounding_box.expect("bounds").max[1];
        for (a, b) in before.positions.iter().zip(after.positions.iter()) {
            if (a[1] - top).abs() < 1.0e-4 {
                assert_eq!(a, b);
            }
        }
        let low_before = before.bounding_box.expect("bounds").min[1];
        let low_after = after.bounding_box.expect("bounds").min[1];
        assert!(low_after < low_before);
    }

    #[test]
    fn release_frees_state_and_resets_readiness() {
        let mut backend = HeadlessBackend::new();
        let mut cloth = ClothNode::default();
        cloth
            .begin_setup(&default_params(), &hanging_sheet(), &mut backend)
            .expect("setup");
        cloth.release(&mut backend);
        assert!(!cloth.is_ready());
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(
            cloth.apply_modification(&default_params(), &hanging_sheet()),
            Err(NodeError::NotReady)
        );
    }
}
