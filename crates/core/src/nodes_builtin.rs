use crate::graph::{NodeDefinition, NodeParams};
use crate::node::NodeOp;
use crate::nodes;
use crate::param_spec::ParamSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinNodeKind {
    Cube,
    Torus,
    Icosphere,
    Plane,
    Transform,
    Noise,
    Material,
    Cloth,
    Rigidbody,
    Merge,
    CopyToPoints,
}

pub const ALL_KINDS: [BuiltinNodeKind; 11] = [
    BuiltinNodeKind::Cube,
    BuiltinNodeKind::Torus,
    BuiltinNodeKind::Icosphere,
    BuiltinNodeKind::Plane,
    BuiltinNodeKind::Transform,
    BuiltinNodeKind::Noise,
    BuiltinNodeKind::Material,
    BuiltinNodeKind::Cloth,
    BuiltinNodeKind::Rigidbody,
    BuiltinNodeKind::Merge,
    BuiltinNodeKind::CopyToPoints,
];

impl BuiltinNodeKind {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinNodeKind::Cube => nodes::cube::NAME,
            BuiltinNodeKind::Torus => nodes::torus::NAME,
            BuiltinNodeKind::Icosphere => nodes::icosphere::NAME,
            BuiltinNodeKind::Plane => nodes::plane::NAME,
            BuiltinNodeKind::Transform => nodes::transform::NAME,
            BuiltinNodeKind::Noise => nodes::noise::NAME,
            BuiltinNodeKind::Material => nodes::material::NAME,
            BuiltinNodeKind::Cloth => nodes::cloth::NAME,
            BuiltinNodeKind::Rigidbody => nodes::rigidbody::NAME,
            BuiltinNodeKind::Merge => nodes::merge::NAME,
            BuiltinNodeKind::CopyToPoints => nodes::copy_to_points::NAME,
        }
    }
}

pub fn builtin_kind_from_name(name: &str) -> Option<BuiltinNodeKind> {
    ALL_KINDS.into_iter().find(|kind| kind.name() == name)
}

pub fn builtin_definitions() -> Vec<NodeDefinition> {
    ALL_KINDS.into_iter().map(node_definition).collect()
}

pub fn node_definition(kind: BuiltinNodeKind) -> NodeDefinition {
    match kind {
        BuiltinNodeKind::Cube => nodes::cube::definition(),
        BuiltinNodeKind::Torus => nodes::torus::definition(),
        BuiltinNodeKind::Icosphere => nodes::icosphere::definition(),
        BuiltinNodeKind::Plane => nodes::plane::definition(),
        BuiltinNodeKind::Transform => nodes::transform::definition(),
        BuiltinNodeKind::Noise => nodes::noise::definition(),
        BuiltinNodeKind::Material => nodes::material::definition(),
        BuiltinNodeKind::Cloth => nodes::cloth::definition(),
        BuiltinNodeKind::Rigidbody => nodes::rigidbody::definition(),
        BuiltinNodeKind::Merge => nodes::merge::definition(),
        BuiltinNodeKind::CopyToPoints => nodes::copy_to_points::definition(),
    }
}

pub fn default_params(kind: BuiltinNodeKind) -> NodeParams {
    match kind {
        BuiltinNodeKind::Cube => nodes::cube::default_params(),
        BuiltinNodeKind::Torus => nodes::torus::default_params(),
        BuiltinNodeKind::Icosphere => nodes::icosphere::default_params(),
        BuiltinNodeKind::Plane => nodes::plane::default_params(),
        BuiltinNodeKind::Transform => nodes::transform::default_params(),
        BuiltinNodeKind::Noise => nodes::noise::default_params(),
        BuiltinNodeKind::Material => nodes::material::default_params(),
        BuiltinNodeKind::Cloth => nodes::cloth::default_params(),
        BuiltinNodeKind::Rigidbody => nodes::rigidbody::default_params(),
        BuiltinNodeKind::Merge => nodes::merge::default_params(),
        BuiltinNodeKind::CopyToPoints => nodes::copy_to_points::default_params(),
    }
}

pub fn param_specs(kind: BuiltinNodeKind) -> Vec<ParamSpec> {
    match kind {
        BuiltinNodeKind::Cube => nodes::cube::param_specs(),
        BuiltinNodeKind::Torus => nodes::torus::param_specs(),
        BuiltinNodeKind::Icosphere => nodes::icosphere::param_specs(),
        BuiltinNodeKind::Plane => nodes::plane::param_specs(),
        BuiltinNodeKind::Transform => nodes::transform::param_specs(),
        BuiltinNodeKind::Noise => nodes::noise::param_specs(),
        BuiltinNodeKind::Material => nodes::material::param_specs(),
        BuiltinNodeKind::Cloth => nodes::cloth::param_specs(),
        BuiltinNodeKind::Rigidbody => nodes::rigidbody::param_specs(),
        BuiltinNodeKind::Merge => Vec::new(),
        BuiltinNodeKind::CopyToPoints => nodes::copy_to_points::param_specs(),
    }
}

pub fn create_op(kind: BuiltinNodeKind) -> NodeOp {
    match kind {
        BuiltinNodeKind::Cube => NodeOp::Generator(Box::new(nodes::cube::CubeNode)),
        BuiltinNodeKind::Torus => NodeOp::Generator(Box::new(nodes::torus::TorusNode)),
        BuiltinNodeKind::Icosphere => {
            NodeOp::Generator(Box::new(nodes::icosphere::IcosphereNode))
        }
        BuiltinNodeKind::Plane => NodeOp::Generator(Box::new(nodes::plane::PlaneNode)),
        BuiltinNodeKind::Transform => {
            NodeOp::Modifier(Box::new(nodes::transform::TransformNode))
        }
        BuiltinNodeKind::Noise => NodeOp::Modifier(Box::new(nodes::noise::NoiseNode)),
        BuiltinNodeKind::Material => NodeOp::Modifier(Box::new(nodes::material::MaterialNode)),
        BuiltinNodeKind::Cloth => NodeOp::Modifier(Box::<nodes::cloth::ClothNode>::default()),
        BuiltinNodeKind::Rigidbody => {
            NodeOp::Modifier(Box::<nodes::rigidbody::RigidbodyNode>::default())
        }
        BuiltinNodeKind::Merge => NodeOp::Combiner(Box::new(nodes::merge::MergeNode)),
        BuiltinNodeKind::CopyToPoints => {
            NodeOp::Combiner(Box::new(nodes::copy_to_points::CopyToPointsNode))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;
    use crate::node::GeometryNode;

    #[test]
    fn names_round_trip() {
        for kind in ALL_KINDS {
            assert_eq!(builtin_kind_from_name(kind.name()), Some(kind));
        }
        assert_eq!(builtin_kind_from_name("Teapot"), None);
    }

    #[test]
    fn definitions_match_ops() {
        for kind in ALL_KINDS {
            let definition = node_definition(kind);
            let op = create_op(kind);
            assert_eq!(definition.role, op.role(), "{}", kind.name());
            if let NodeOp::Combiner(combiner) = &op {
                assert_eq!(definition.inputs.len(), combiner.input_count());
            }
        }
    }

    #[test]
    fn default_params_cover_specs() {
        for kind in ALL_KINDS {
            let params = default_params(kind);
            for spec in param_specs(kind) {
                let value = params.values.get(spec.key);
                assert!(value.is_some(), "{} lacks {}", kind.name(), spec.key);
                assert!(spec.kind.accepts(value.expect("value")));
            }
        }
    }

    #[test]
    fn only_physics_nodes_report_simulation() {
        for (index, kind) in ALL_KINDS.into_iter().enumerate() {
            let node = GeometryNode::new(
                NodeId::from_raw(index as u64 + 1),
                kind.name(),
                kind.name(),
                create_op(kind),
                default_params(kind),
            );
            let expected = matches!(kind, BuiltinNodeKind::Cloth | BuiltinNodeKind::Rigidbody);
            assert_eq!(node.capabilities().simulated, expected, "{}", kind.name());
            assert_eq!(node.is_simulated(), expected);
        }
    }
}
