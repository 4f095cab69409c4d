use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{EngineError, GraphEngine};
use crate::gpu::GpuBackend;
use crate::graph::{NodeId, NodeParams};

pub const PROJECT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub build_wireframe: bool,
    pub base_color: [f32; 3],
    pub sim_substeps: u32,
    /// Longest frame a simulation step will integrate, in seconds.
    pub max_frame_dt: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            build_wireframe: true,
            base_color: [0.7, 0.72, 0.75],
            sim_substeps: 4,
            max_frame_dt: 1.0 / 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: u64,
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub params: NodeParams,
    #[serde(default = "default_true")]
    pub output_enabled: bool,
    #[serde(default)]
    pub position: Option<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConnection {
    pub source: u64,
    pub source_output: String,
    pub target: u64,
    pub target_input: String,
}

/// Saved graph: enough node and edge state to rebuild every derived
/// geometry by replaying it into an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub version: u32,
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub nodes: Vec<ProjectNode>,
    #[serde(default)]
    pub connections: Vec<ProjectConnection>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            version: PROJECT_VERSION,
            settings: EngineSettings::default(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ProjectError {
    Json(serde_json::Error),
    UnsupportedVersion(u32),
    Engine(EngineError),
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectError::Json(err) => write!(f, "invalid project json: {err}"),
            ProjectError::UnsupportedVersion(version) => {
                write!(f, "project version {version} is newer than {PROJECT_VERSION}")
            }
            ProjectError::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ProjectError {}

impl From<serde_json::Error> for ProjectError {
    fn from(err: serde_json::Error) -> Self {
        ProjectError::Json(err)
    }
}

impl From<EngineError> for ProjectError {
    fn from(err: EngineError) -> Self {
        ProjectError::Engine(err)
    }
}

impl Project {
    pub fn capture<B: GpuBackend>(engine: &GraphEngine<B>) -> Self {
        let graph = engine.graph();
        let nodes = graph
            .nodes()
            .filter_map(|graph_node| {
                let node = engine.node(graph_node.id)?;
                Some(ProjectNode {
                    id: graph_node.id.raw(),
                    kind: node.kind().to_string(),
                    label: node.label().to_string(),
                    params: node.params().clone(),
                    output_enabled: node.output_enabled(),
                    position: graph_node.position,
                })
            })
            .collect();
        let connections = graph
            .connections()
            .map(|conn| ProjectConnection {
                source: conn.source.raw(),
                source_output: conn.source_output.clone(),
                target: conn.target.raw(),
                target_input: conn.target_input.clone(),
            })
            .collect();
        Self {
            version: PROJECT_VERSION,
            settings: engine.settings().clone(),
            nodes,
            connections,
        }
    }

    /// Replays every node, then every connection, in saved order. A cycle
    /// in the saved edges is logged and the edge kept, as when editing.
    pub fn load_into<B: GpuBackend>(&self, engine: &mut GraphEngine<B>) -> Result<(), ProjectError> {
        if self.version > PROJECT_VERSION {
            return Err(ProjectError::UnsupportedVersion(self.version));
        }
        engine.set_settings(self.settings.clone());

        for node in &self.nodes {
            let id = NodeId::from_raw(node.id);
            engine.insert_node(id, &node.kind, &node.label, node.params.clone())?;
            if let Some(position) = node.position {
                engine.set_node_position(id, position)?;
            }
            if !node.output_enabled {
                engine.toggle_output(id)?;
            }
        }
        for conn in &self.connections {
            let result = engine.connect(
                NodeId::from_raw(conn.source),
                &conn.source_output,
                NodeId::from_raw(conn.target),
                &conn.target_input,
            );
            match result {
                Ok(_) => {}
                Err(EngineError::CycleDetected(path)) => {
                    warn!(?path, "loaded connection closes a cycle");
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!(
            nodes = self.nodes.len(),
            connections = self.connections.len(),
            "project loaded"
        );
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ProjectError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ProjectError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn default_true() -> bool {
    true
}
