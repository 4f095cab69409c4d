use std::collections::BTreeMap;

use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::mesh_primitives::make_torus;
use crate::node::{Generator, NodeError};
use crate::nodes::generator_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Torus";

pub fn definition() -> NodeDefinition {
    generator_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("major_radius".to_string(), ParamValue::Float(1.0)),
            ("minor_radius".to_string(), ParamValue::Float(0.25)),
            ("rings".to_string(), ParamValue::Int(24)),
            ("sides".to_string(), ParamValue::Int(12)),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::float_slider("major_radius", "Major Radius", 0.0, 10.0)
            .with_help("Distance from the center to the tube center."),
        ParamSpec::float_slider("minor_radius", "Minor Radius", 0.0, 5.0)
            .with_help("Radius of the tube."),
        ParamSpec::int_slider("rings", "Rings", 3, 256),
        ParamSpec::int_slider("sides", "Sides", 3, 128),
    ]
}

#[derive(Debug, Default)]
pub struct TorusNode;

impl Generator for TorusNode {
    fn generate(&mut self, params: &NodeParams) -> Result<Geometry, NodeError> {
        let major = params.get_float("major_radius", 1.0);
        let minor = params.get_float("minor_radius", 0.25);
        if minor > major {
            return Err(NodeError::Compute(
                "minor radius must not exceed the major radius".to_string(),
            ));
        }
        let rings = params.get_int("rings", 24).max(3) as u32;
        let sides = params.get_int("sides", 12).max(3) as u32;
        Ok(make_torus(major, minor, rings, sides))
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }
}
