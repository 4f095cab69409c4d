use std::collections::BTreeMap;

use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams, ParamValue};
use crate::material::Material;
use crate::node::{Modifier, NodeError};
use crate::nodes::modifier_definition;
use crate::param_spec::ParamSpec;

pub const NAME: &str = "Material";

const DEFAULT_NAME: &str = "material1";

pub fn definition() -> NodeDefinition {
    modifier_definition(NAME)
}

pub fn default_params() -> NodeParams {
    NodeParams {
        values: BTreeMap::from([
            ("name".to_string(), ParamValue::String(DEFAULT_NAME.to_string())),
            ("base_color".to_string(), ParamValue::Vec3([1.0, 1.0, 1.0])),
            ("metallic".to_string(), ParamValue::Float(0.0)),
            ("roughness".to_string(), ParamValue::Float(0.5)),
        ]),
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::string("name", "Name"),
        ParamSpec::vec3("base_color", "Base Color"),
        ParamSpec::float_slider("metallic", "Metallic", 0.0, 1.0),
        ParamSpec::float_slider("roughness", "Roughness", 0.0, 1.0),
    ]
}

pub fn build_material(params: &NodeParams) -> Material {
    let mut material = Material::new(params.get_string("name", DEFAULT_NAME).to_string());
    material.base_color = params.get_vec3("base_color", [1.0, 1.0, 1.0]);
    material.metallic = params.get_float("metallic", 0.0).clamp(0.0, 1.0);
    material.roughness = params.get_float("roughness", 0.5).clamp(0.0, 1.0);
    material
}

#[derive(Debug, Default)]
pub struct MaterialNode;

impl Modifier for MaterialNode {
    fn apply_modification(
        &mut self,
        params: &NodeParams,
        input: &Geometry,
    ) -> Result<Geometry, NodeError> {
        let mut geometry = input.clone();
        geometry.material = Some(build_material(params));
        Ok(geometry)
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        param_specs()
    }
}
