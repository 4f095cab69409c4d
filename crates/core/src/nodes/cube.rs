use std::collections::BTreeMap;

use glam::{Mat4, Vec3};

use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::mesh_primitives::make_box;
use crate::node::{Generator, NodeError};
use crate::nodes::generator_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Cube";

pub fn definition() -> NodeDefinition {
    generator_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("size".to_string(), ParamValue::Vec3([1.0, 1.0, 1.0])),
            ("center".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::vec3("size", "Size").with_help("Cube dimensions in X/Y/Z."),
        ParamSpec::vec3("center", "Center").with_help("Cube center in world space."),
    ]
}

#[derive(Debug, Default)]
pub struct CubeNode;

impl Generator for CubeNode {
    fn generate(&mut self, params: &NodeParams) -> Result<Geometry, NodeError> {
        let size = params.get_vec3("size", [1.0, 1.0, 1.0]);
        let center = params.get_vec3("center", [0.0, 0.0, 0.0]);
        let mut geometry = make_box(size);
        if center != [0.0, 0.0, 0.0] {
            geometry.transform(Mat4::from_translation(Vec3::from(center)));
        }
        Ok(geometry)
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_is_centered() {
        let mut params = default_params();
        params.set("center", ParamValue::Vec3([0.0, 2.0, 0.0]));
        let geometry = CubeNode.generate(&params).expect("cube");
        let bounds = geometry.bounding_box.expect("bounds");
        assert_eq!(bounds.min, [-0.5, 1.5, -0.5]);
        assert_eq!(bounds.max, [0.5, 2.5, 0.5]);
    }
}
