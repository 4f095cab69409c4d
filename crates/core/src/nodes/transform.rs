use std::collections::BTreeMap;

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::node::{Modifier, NodeError};
use crate::nodes::modifier_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Transform";

pub fn definition() -> NodeDefinition {
    modifier_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("translate".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
            ("rotate_deg".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
            ("scale".to_string(), ParamValue::Vec3([1.0, 1.0, 1.0])),
            ("pivot".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::vec3("translate", "Translate"),
        ParamSpec::vec3("rotate_deg", "Rotate").with_help("Euler XYZ rotation in degrees."),
        ParamSpec::vec3("scale", "Scale"),
        ParamSpec::vec3("pivot", "Pivot").with_help("Point that rotation and scale act around."),
    ]
}

pub fn transform_matrix(params: &NodeParams) -> Mat4 {
    let translate = Vec3::from(params.get_vec3("translate", [0.0, 0.0, 0.0]));
    let rotate_deg = Vec3::from(params.get_vec3("rotate_deg", [0.0, 0.0, 0.0]));
    let scale = Vec3::from(params.get_vec3("scale", [1.0, 1.0, 1.0]));
    let pivot = Vec3::from(params.get_vec3("pivot", [0.0, 0.0, 0.0]));

    let rot = rotate_deg * std::f32::consts::PI / 180.0;
    let quat = Quat::from_euler(EulerRot::XYZ, rot.x, rot.y, rot.z);
    Mat4::from_translation(translate + pivot)
        * Mat4::from_quat(quat)
        * Mat4::from_scale(scale)
        * Mat4::from_translation(-pivot)
}

#[derive(Debug, Default)]
pub struct TransformNode;

impl Modifier for TransformNode {
    fn apply_modification(
        &mut self,
        params: &NodeParams,
        input: &Geometry,
    ) -> Result<Geometry, NodeError> {
        let mut geometry = input.clone();
        geometry.transform(transform_matrix(params));
        geometry.update_bounds();
        Ok(geometry)
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_primitives::make_box;

    #[test]
    fn translate_moves_bounds() {
        let mut params = default_params();
        params.set("translate", ParamValue::Vec3([1.0, 0.0, 0.0]));
        let out = TransformNode
            .apply_modification(&params, &make_box([1.0; 3]))
            .expect("transform");
        let bounds = out.bounding_box.expect("bounds");
        assert!((bounds.min[0] - 0.5).abs() < 1.0e-6);
        assert!((bounds.max[0] - 1.5).abs() < 1.0e-6);
    }

    #[test]
    fn scale_about_pivot_keeps_pivot_fixed() {
        let mut params = default_params();
        params.set("scale", ParamValue::Vec3([2.0, 2.0, 2.0]));
        params.set("pivot", ParamValue::Vec3([0.5, 0.5, 0.5]));
        let out = TransformNode
            .apply_modification(&params, &make_box([1.0; 3]))
            .expect("transform");
        assert!(out.positions.contains(&[0.5, 0.5, 0.5]));
    }
}
