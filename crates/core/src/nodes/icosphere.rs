use std::collections::BTreeMap;

use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::mesh_primitives::make_icosphere;
use crate::node::{Generator, NodeError};
use crate::nodes::generator_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Icosphere";

pub fn definition() -> NodeDefinition {
    generator_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("radius".to_string(), ParamValue::Float(1.0)),
            ("subdivisions".to_string(), ParamValue::Int(2)),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::float_slider("radius", "Radius", 0.0, 10.0),
        ParamSpec::int_slider("subdivisions", "Subdivisions", 0, 6)
            .with_help("Each level splits every triangle into four."),
    ]
}

#[derive(Debug, Default)]
pub struct IcosphereNode;

impl Generator for IcosphereNode {
    fn generate(&mut self, params: &NodeParams) -> Result<Geometry, NodeError> {
        let radius = params.get_float("radius", 1.0).max(0.0);
        let subdivisions = params.get_int("subdivisions", 2).clamp(0, 6) as u32;
        Ok(make_icosphere(radius, subdivisions))
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }
}
