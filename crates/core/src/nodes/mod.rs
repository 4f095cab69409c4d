pub mod cloth;
pub mod copy_to_points;
pub mod cube;
pub mod icosphere;
pub mod material;
pub mod merge;
pub mod noise;
pub mod plane;
pub mod rigidbody;
pub mod torus;
pub mod transform;

use crate::graph::{NodeDefinition, NodeRole};

pub const GEOMETRY_OUT: &str = "geometry";

pub fn geometry_in(index: usize) -> String {
    format!("geometry{index}")
}

pub fn generator_definition(name: &str) -> NodeDefinition {
    NodeDefinition {
        name: name.to_string(),
        category: "Generators".to_string(),
        role: NodeRole::Generator,
        inputs: Vec::new(),
        outputs: vec![GEOMETRY_OUT.to_string()],
    }
}

pub fn modifier_definition(name: &str) -> NodeDefinition {
    NodeDefinition {
        name: name.to_string(),
        category: "Modifiers".to_string(),
        role: NodeRole::Modifier,
        inputs: vec![geometry_in(0)],
        outputs: vec![GEOMETRY_OUT.to_string()],
    }
}

pub fn combiner_definition(name: &str, inputs: usize) -> NodeDefinition {
    NodeDefinition {
        name: name.to_string(),
        category: "Combiners".to_string(),
        role: NodeRole::Combiner,
        inputs: (0..inputs).map(geometry_in).collect(),
        outputs: vec![GEOMETRY_OUT.to_string()],
    }
}
