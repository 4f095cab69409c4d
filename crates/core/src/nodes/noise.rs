use std::collections::BTreeMap;

use glam::Vec3;

use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::node::{Modifier, NodeError};
use crate::noise::{fbm, NoiseKind};
use crate::nodes::modifier_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Noise";

pub fn definition() -> NodeDefinition {
    modifier_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("amplitude".to_string(), ParamValue::Float(0.2)),
            ("frequency".to_string(), ParamValue::Float(1.0)),
            ("octaves".to_string(), ParamValue::Int(3)),
            ("seed".to_string(), ParamValue::Int(1)),
            ("kind".to_string(), ParamValue::Int(1)),
            ("offset".to_string(), ParamValue::Vec3([0.0, 0.0, 0.0])),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::float_slider("amplitude", "Amplitude", -10.0, 10.0)
            .with_help("Displacement distance along the normal."),
        ParamSpec::float_slider("frequency", "Frequency", 0.0, 20.0),
        ParamSpec::int_slider("octaves", "Octaves", 1, 8),
        ParamSpec::int("seed", "Seed"),
        ParamSpec::int_enum("kind", "Noise", vec![(0, "Value"), (1, "Perlin")]),
        ParamSpec::vec3("offset", "Offset"),
    ]
}

/// Displaces points along their normals by fractal noise.
#[derive(Debug, Default)]
pub struct NoiseNode;

impl Modifier for NoiseNode {
    fn apply_modification(
        &mut self,
        params: &NodeParams,
        input: &Geometry,
    ) -> Result<Geometry, NodeError> {
        let amplitude = params.get_float("amplitude", 0.2);
        let frequency = params.get_float("frequency", 1.0).max(0.0);
        let octaves = params.get_int("octaves", 3).max(1) as u32;
        let seed = params.get_int("seed", 1) as u32;
        let kind = NoiseKind::from_int(params.get_int("kind", 1));
        let offset = Vec3::from(params.get_vec3("offset", [0.0, 0.0, 0.0]));

        let mut geometry = input.clone();
        if geometry.normals.is_none() && !geometry.compute_normals() {
            return Err(NodeError::Compute(
                "noise needs a triangle mesh to derive normals".to_string(),
            ));
        }
        let normals = geometry.normals.clone().unwrap_or_default();

        for (pos, normal) in geometry.positions.iter_mut().zip(normals.iter()) {
            let p = Vec3::from(*pos);
            let n = fbm(p * frequency + offset, seed, kind, octaves, 2.0, 0.5);
            *pos = (p + Vec3::from(*normal) * (n * amplitude)).to_array();
        }

        geometry.compute_normals();
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
    use crate::mesh_primitives::make_icosphere;

    #[test]
    fn zero_amplitude_keeps_positions() {
        let mut params = default_params();
        params.set("amplitude", ParamValue::Float(0.0));
        let input = make_icosphere(1.0, 1);
        let out = NoiseNode.apply_modification(&params, &input).expect("noise");
        assert_eq!(out.positions, input.positions);
    }

    #[test]
    fn displacement_is_deterministic() {
        let params = default_params();
        let input = make_icosphere(1.0, 1);
        let a = NoiseNode.apply_modification(&params, &input).expect("noise");
        let b = NoiseNode.apply_modification(&params, &input).expect("noise");
        assert_eq!(a, b);
        assert_ne!(a.positions, input.positions);
    }
}
