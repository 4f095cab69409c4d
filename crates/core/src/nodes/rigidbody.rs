use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use tracing::{debug, warn};

use crate::geometry::{Geometry, PointAttributes};
use crate::gpu::{BufferId, BufferUsage, GpuBackend, GpuInstance, ReadbackId};
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::node::{Modifier, NodeError, Simulation};
use crate::nodes::modifier_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Rigidbody";

pub fn definition() -> NodeDefinition {
    modifier_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("gravity".to_string(), ParamValue::Vec3([0.0, -9.81, 0.0])),
            ("initial_velocity".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
            ("spin".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
            ("restitution".to_string(), ParamValue::Float(0.3)),
            ("friction".to_string(), ParamValue::Float(0.5)),
            ("ground_height".to_string(), ParamValue::Float(0.0)),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::vec3("gravity", "Gravity"),
        ParamSpec::vec3("initial_velocity", "Initial Velocity"),
        ParamSpec::vec3("spin", "Spin").with_help("Initial angular velocity in radians per second."),
        ParamSpec::float_slider("restitution", "Restitution", 0.0, 1.0),
        ParamSpec::float_slider("friction", "Friction", 0.0, 1.0),
        ParamSpec::float("ground_height", "Ground Height"),
    ]
}

#[derive(Debug, Clone, Copy)]
struct Body {
    position: Vec3,
    orientation: Quat,
    scale: Vec3,
    velocity: Vec3,
    angular_velocity: Vec3,
    radius: f32,
}

/// Drops every instance of its input as a rigid body onto a ground plane.
/// Instance state is staged on the GPU and read back before the first
/// frame, so the node has no output until that readback lands.
#[derive(Debug, Default)]
pub struct RigidbodyNode {
    bodies: Vec<Body>,
    /// Per-instance vertices in body space, laid out like the input.
    local_vertices: Vec<Vec3>,
    instance_vertex_count: usize,
    template: Option<Geometry>,
    initial_velocity: Vec3,
    initial_spin: Vec3,
    state_buffer: Option<BufferId>,
    pending: Option<ReadbackId>,
    ready: bool,
}

impl RigidbodyNode {
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn instances(&self) -> Vec<GpuInstance> {
        self.bodies
            .iter()
            .map(|body| GpuInstance {
                position: body.position.extend(1.0).to_array(),
                scale: body.scale.extend(0.0).to_array(),
                orientation: body.orientation.to_array(),
            })
            .collect()
    }
}

fn instances_from_input(input: &Geometry) -> (Vec<GpuInstance>, usize) {
    match &input.points {
        Some(points) if !points.is_empty() && points.instance_vertex_count > 0 => {
            let instances = (0..points.len())
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
            (instances, points.instance_vertex_count as usize)
        }
        _ => {
            let center = input
                .bounds()
                .map(|aabb| (Vec3::from(aabb.min) + Vec3::from(aabb.max)) * 0.5)
                .unwrap_or(Vec3::ZERO);
            let instance = GpuInstance {
                position: center.extend(1.0).to_array(),
                scale: [1.0, 1.0, 1.0, 0.0],
                orientation: Quat::IDENTITY.to_array(),
            };
            (vec![instance], input.positions.len())
        }
    }
}

impl Modifier for RigidbodyNode {
    fn apply_modification(
        &mut self,
        _params: &NodeParams,
        _input: &Geometry,
    ) -> Result<Geometry, NodeError> {
        let (true, Some(template)) = (self.ready, &self.template) else {
            return Err(NodeError::NotReady);
        };
        let mut geometry = template.clone();
        let per_instance = self.instance_vertex_count.max(1);
        for (index, local) in self.local_vertices.iter().enumerate() {
            let Some(body) = self.bodies.get(index / per_instance) else {
                break;
            };
            geometry.positions[index] = (body.position + body.orientation * *local).to_array();
        }
        geometry.points = Some(PointAttributes {
            positions: self.bodies.iter().map(|b| b.position.to_array()).collect(),
            scales: self.bodies.iter().map(|b| b.scale.to_array()).collect(),
            orientations: self.bodies.iter().map(|b| b.orientation.to_array()).collect(),
            instance_vertex_count: self.instance_vertex_count as u32,
        });
        if geometry.normals.is_some() {
            geometry.compute_normals();
        }
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

impl Simulation for RigidbodyNode {
    fn begin_setup(
        &mut self,
        params: &NodeParams,
        input: &Geometry,
        backend: &mut dyn GpuBackend,
    ) -> Result<(), NodeError> {
        let (instances, per_instance) = instances_from_input(input);
        let per_instance = per_instance.max(1);

        self.local_vertices = input
            .positions
            .iter()
            .enumerate()
            .map(|(index, p)| {
                let instance = instances
                    .get(index / per_instance)
                    .copied()
                    .unwrap_or(instances[0]);
                let origin = Vec3::from_slice(&instance.position[..3]);
                let rotation = Quat::from_array(instance.orientation);
                rotation.inverse() * (Vec3::from(*p) - origin)
            })
            .collect();
        self.instance_vertex_count = per_instance;
        self.template = Some(input.clone());
        self.initial_velocity = Vec3::from(params.get_vec3("initial_velocity", [0.0; 3]));
        self.initial_spin = Vec3::from(params.get_vec3("spin", [0.0; 3]));

        let buffer = backend.create_buffer(
            "rigidbody_instances",
            BufferUsage::Storage,
            bytemuck::cast_slice(&instances),
        );
        let ticket = backend
            .request_readback(buffer)
            .map_err(|err| NodeError::MissingResource(err.to_string()))?;
        self.state_buffer = Some(buffer);
        self.pending = Some(ticket);
        self.ready = false;
        debug!(instances = instances.len(), "rigidbody setup requested");
        Ok(())
    }

    fn poll_setup(&mut self, backend: &mut dyn GpuBackend) -> bool {
        let Some(ticket) = self.pending else {
            return false;
        };
        let Some(bytes) = backend.poll_readback(ticket) else {
            return false;
        };
        self.pending = None;

        let stride = std::mem::size_of::<GpuInstance>();
        if bytes.len() % stride != 0 {
            warn!(len = bytes.len(), "rigidbody readback has a partial instance");
        }
        let instances: Vec<GpuInstance> = bytes
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned::<GpuInstance>)
            .collect();

        self.bodies = instances
            .iter()
            .enumerate()
            .map(|(index, instance)| {
                let start = index * self.instance_vertex_count;
                let end = (start + self.instance_vertex_count).min(self.local_vertices.len());
                let radius = self.local_vertices[start.min(end)..end]
                    .iter()
                    .map(|v| v.length())
                    .fold(0.0f32, f32::max);
                Body {
                    position: Vec3::from_slice(&instance.position[..3]),
                    orientation: Quat::from_array(instance.orientation),
                    scale: Vec3::from_slice(&instance.scale[..3]),
                    velocity: self.initial_velocity,
                    angular_velocity: self.initial_spin,
                    radius,
                }
            })
            .collect();
        self.ready = true;
        debug!(bodies = self.bodies.len(), "rigidbody setup complete");
        true
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn update_sim(&mut self, params: &NodeParams, dt: f32) {
        let gravity = Vec3::from(params.get_vec3("gravity", [0.0, -9.81, 0.0]));
        let restitution = params.get_float("restitution", 0.3).clamp(0.0, 1.0);
        let friction = params.get_float("friction", 0.5).clamp(0.0, 1.0);
        let ground = params.get_float("ground_height", 0.0);

        for body in &mut self.bodies {
            body.velocity += gravity * dt;
            body.position += body.velocity * dt;

            let w = body.angular_velocity;
            if w.length_squared() > 0.0 {
                let spin = Quat::from_scaled_axis(w * dt);
                body.orientation = (spin * body.orientation).normalize();
            }

            let floor = ground + body.radius;
            if body.position.y < floor {
                body.position.y = floor;
                if body.velocity.y < 0.0 {
                    body.velocity.y = -body.velocity.y * restitution;
                    body.velocity.x *= 1.0 - friction;
                    body.velocity.z *= 1.0 - friction;
                    body.angular_velocity *= 1.0 - friction;
                }
            }
        }
    }

    fn dispatch_sim(&mut self, backend: &mut dyn GpuBackend) -> Result<(), NodeError> {
        let buffer = self
            .state_buffer
            .ok_or_else(|| NodeError::MissingResource("rigidbody instance buffer".to_string()))?;
        backend
            .write_buffer(buffer, 0, bytemuck::cast_slice(&self.instances()))
            .map_err(|err| NodeError::MissingResource(err.to_string()))
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(buffer) = self.state_buffer.take() {
            backend.release_buffer(buffer);
        }
        self.bodies.clear();
        self.local_vertices.clear();
        self.template = None;
        self.pending = None;
        self.ready = false;
    }

    fn restarts_on(&self, key: &str) -> bool {
        matches!(key, "initial_velocity" | "spin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;
    use crate::mesh_primitives::make_box;
    use crate::node::Combiner;
    use crate::nodes::copy_to_points::{self, CopyToPointsNode};

    fn instanced_boxes() -> Geometry {
        let template = Geometry::with_positions_indices(
            vec![[0.0, 2.0, 0.0], [3.0, 2.0, 0.0], [0.0, 2.0, 3.0]],
            vec![0, 1, 2],
        );
        let mut params = copy_to_points::default_params();
        params.set("align_to_normals", ParamValue::Bool(false));
        CopyToPointsNode
            .apply_modification_multiple(&params, &[&make_box([0.5; 3]), &template])
            .expect("copies")
    }

    #[test]
    fn output_waits_for_readback() {
        let mut backend = HeadlessBackend::new();
        let mut node = RigidbodyNode::default();
        let params = default_params();
        let input = instanced_boxes();

        node.begin_setup(&params, &input, &mut backend).expect("setup");
        assert!(node.is_pending());
        assert_eq!(
            node.apply_modification(&params, &input),
            Err(NodeError::NotReady)
        );

        assert!(!node.poll_setup(&mut backend));
        assert!(node.poll_setup(&mut backend));
        assert_eq!(node.body_count(), 3);

        let output = node.apply_modification(&params, &input).expect("output");
        for (a, b) in output.positions.iter().zip(input.positions.iter()) {
            for axis in 0..3 {
                assert!((a[axis] - b[axis]).abs() < 1.0e-5);
            }
        }
    }

    #[test]
    fn bodies_fall_and_rest_on_ground() {
        let mut backend = HeadlessBackend::new();
        let mut node = RigidbodyNode::default();
        let params = default_params();
        let input = instanced_boxes();
        node.begin_setup(&params, &input, &mut backend).expect("setup");
        while !node.poll_setup(&mut backend) {}

        for _ in 0..600 {
            node.update_sim(&params, 1.0 / 60.0);
        }
        node.dispatch_sim(&mut backend).expect("dispatch");

        let output = node.apply_modification(&params, &input).expect("output");
        let bounds = output.bounding_box.expect("bounds");
        assert!(bounds.min[1] > -0.5);
        assert!(bounds.max[1] < 1.0);
    }
}
