use std::collections::BTreeMap;

use glam::{Mat4, Vec3};

use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::mesh_primitives::make_grid;
use crate::node::{Generator, NodeError};
use crate::nodes::generator_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Plane";

pub fn definition() -> NodeDefinition {
    generator_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("size".to_string(), ParamValue::Vec3([2.0, 0.0, 2.0])),
            ("divisions".to_string(), ParamValue::Int(10)),
            ("center".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::vec3("size", "Size").with_help("Width in X and depth in Z."),
        ParamSpec::int_slider("divisions", "Divisions", 1, 256),
        ParamSpec::vec3("center", "Center"),
    ]
}

#[derive(Debug, Default)]
pub struct PlaneNode;

impl Generator for PlaneNode {
    fn generate(&mut self, params: &NodeParams) -> Result<Geometry, NodeError> {
        let size = params.get_vec3("size", [2.0, 0.0, 2.0]);
        let divisions = params.get_int("divisions", 10).max(1) as u32;
        let center = params.get_vec3("center", [0.0, 0.0, 0.0]);
        let mut geometry = make_grid([size[0], size[2]], [divisions, divisions]);
        if center != [0.0, 0.0, 0.0] {
            geometry.transform(Mat4::from_translation(Vec3::from(center)));
        }
        Ok(geometry)
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }
}
