mod assembler;
mod engine;
mod geometry;
mod gpu;
mod graph;
mod material;
mod mesh_primitives;
mod node;
mod noise;
mod nodes;
mod nodes_builtin;
mod param_spec;
mod project;
mod record;
mod visible;

pub use assembler::{assemble_scene, SceneAssembler, SceneGpuBuffers};
pub use engine::{EngineError, GraphEngine, PropagationReport, SceneChange, SceneState};
pub use geometry::{Aabb, BoundingSphere, Geometry, PointAttributes};
pub use gpu::{
    hash_geometry, instance_bytes, vertex_bytes, BufferId, BufferUsage, GpuBackend, GpuError,
    GpuGeometry, GpuInstance, GpuVertex, HeadlessBackend, HeadlessStats, NodeBuffers, ReadbackId,
};
pub use graph::{
    input_slot, Connection, ConnectionId, Graph, GraphError, Node, NodeDefinition, NodeId,
    NodeParams, NodeRole, ParamValue,
};
pub use material::Material;
pub use mesh_primitives::{make_box, make_grid, make_icosphere, make_torus};
pub use node::{
    Capabilities, Combiner, GeometryNode, Generator, Modifier, NodeError, NodeInput, NodeOp,
    OutputState, Simulation, UpdateHook,
};
pub use noise::{fbm, perlin_noise, value_noise, NoiseKind};
pub use nodes::{
    combiner_definition, generator_definition, geometry_in, modifier_definition, GEOMETRY_OUT,
};
pub use nodes_builtin::{
    builtin_definitions, builtin_kind_from_name, create_op, default_params, node_definition,
    param_specs, BuiltinNodeKind, ALL_KINDS,
};
pub use param_spec::{ParamKind, ParamRange, ParamSpec};
pub use project::{
    EngineSettings, Project, ProjectConnection, ProjectError, ProjectNode, PROJECT_VERSION,
};
pub use record::{GeometryRecord, GeometryRemoval, GeometryStore, SubscriptionId, VertexData};
pub use visible::resolve_visible_set;
