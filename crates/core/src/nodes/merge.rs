use crate::geometry::Geometry;
use crate::graph::{NodeDefinition, NodeParams};
use crate::node::{Combiner, NodeError};
use crate::nodes::combiner_definition;

pub const NAME: &str = "Merge";

pub const INPUTS: usize = 2;

pub fn definition() -> NodeDefinition {
    combiner_definition(NAME, INPUTS)
}

pub fn default_params() -> NodeParams {
    NodeParams::default()
}

#[derive(Debug, Default)]
pub struct MergeNode;

impl Combiner for MergeNode {
    fn input_count(&self) -> usize {
        INPUTS
    }

    fn apply_modification_multiple(
        &mut self,
        _params: &NodeParams,
        inputs: &[&Geometry],
    ) -> Result<Geometry, NodeError> {
        if inputs.len() < INPUTS {
            return Err(NodeError::MissingInput { slot: inputs.len() });
        }
        Ok(Geometry::merge(inputs))
    }
}
