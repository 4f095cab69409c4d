use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Generator,
    Modifier,
    Combiner,
}

#[derive(Debug, Clone)]
pub struct NodeDefinition {
    pub name: String,
    pub category: String,
    pub role: NodeRole,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub category: String,
    pub role: NodeRole,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub position: Option<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: NodeId,
    pub source_output: String,
    pub target: NodeId,
    pub target_input: String,
}

impl Connection {
    pub fn target_slot(&self) -> usize {
        input_slot(&self.target_input)
    }
}

/// Ordinal of a combiner input, taken from the key's trailing digits
/// (`geometry1` is slot 1). Keys without digits address slot 0.
pub fn input_slot(key: &str) -> usize {
    let digits = key
        .bytes()
        .rev()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    key[key.len() - digits..].parse().unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    MissingNode(NodeId),
    DuplicateNode(NodeId),
    MissingPort { node: NodeId, port: String },
    InputAlreadyConnected { node: NodeId, port: String },
    SelfConnection(NodeId),
    CycleDetected(Vec<NodeId>),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::MissingNode(id) => write!(f, "missing node {id}"),
            GraphError::DuplicateNode(id) => write!(f, "node {id} already exists"),
            GraphError::MissingPort { node, port } => write!(f, "node {node} has no port '{port}'"),
            GraphError::InputAlreadyConnected { node, port } => {
                write!(f, "input '{port}' of node {node} is already connected")
            }
            GraphError::SelfConnection(id) => write!(f, "node {id} cannot connect to itself"),
            GraphError::CycleDetected(path) => write!(f, "cycle detected through {path:?}"),
        }
    }
}

/// Structural view of the node graph. Node behaviour and geometry live in the
/// engine; this only tracks nodes, ports and connections in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_node_id: u64,
    next_connection_id: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_node_id: 1,
            next_connection_id: 1,
        }
    }
}

impl Graph {
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn generators(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .values()
            .filter(|node| node.role == NodeRole::Generator)
    }

    pub fn add_node(&mut self, def: NodeDefinition) -> NodeId {
        let node_id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.insert(node_id, node_from_definition(node_id, def));
        node_id
    }

    /// Inserts a node under a caller-chosen id, used when replaying a saved graph.
    pub fn insert_node(&mut self, id: NodeId, def: NodeDefinition) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.insert(id, node_from_definition(id, def));
        self.next_node_id = self.next_node_id.max(id.0 + 1);
        Ok(())
    }

    /// Removes the node and every connection touching it. The removed
    /// connections are returned in insertion order.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<(Node, Vec<Connection>)> {
        let node = self.nodes.remove(&node_id)?;
        let touching: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|conn| conn.source == node_id || conn.target == node_id)
            .map(|conn| conn.id)
            .collect();
        let removed = touching
            .into_iter()
            .filter_map(|id| self.connections.remove(&id))
            .collect();
        Some((node, removed))
    }

    pub fn set_node_position(
        &mut self,
        node_id: NodeId,
        position: [f32; 2],
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphError::MissingNode(node_id))?;
        node.position = Some(position);
        Ok(())
    }

    pub fn add_connection(
        &mut self,
        source: NodeId,
        source_output: impl Into<String>,
        target: NodeId,
        target_input: impl Into<String>,
    ) -> Result<ConnectionId, GraphError> {
        let source_output = source_output.into();
        let target_input = target_input.into();
        let source_node = self.nodes.get(&source).ok_or(GraphError::MissingNode(source))?;
        let target_node = self.nodes.get(&target).ok_or(GraphError::MissingNode(target))?;

        if source == target {
            return Err(GraphError::SelfConnection(source));
        }
        if !source_node.outputs.contains(&source_output) {
            return Err(GraphError::MissingPort {
                node: source,
                port: source_output,
            });
        }
        if !target_node.inputs.contains(&target_input) {
            return Err(GraphError::MissingPort {
                node: target,
                port: target_input,
            });
        }
        if self
            .connections
            .values()
            .any(|conn| conn.target == target && conn.target_input == target_input)
        {
            return Err(GraphError::InputAlreadyConnected {
                node: target,
                port: target_input,
            });
        }

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        self.connections.insert(
            id,
            Connection {
                id,
                source,
                source_output,
                target,
                target_input,
            },
        );
        Ok(id)
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn find_connection(&self, target: NodeId, target_input: &str) -> Option<&Connection> {
        self.connections
            .values()
            .find(|conn| conn.target == target && conn.target_input == target_input)
    }

    pub fn outgoing(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections
            .values()
            .filter(move |conn| conn.source == node_id)
    }

    pub fn incoming(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections
            .values()
            .filter(move |conn| conn.target == node_id)
    }

    pub fn has_outgoing(&self, node_id: NodeId) -> bool {
        self.outgoing(node_id).next().is_some()
    }

    pub fn successors(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.outgoing(node_id)
            .map(|conn| conn.target)
            .filter(|target| seen.insert(*target))
            .collect()
    }

    /// True when a connection from `source` into `target` would close a loop.
    pub fn would_create_cycle(&self, source: NodeId, target: NodeId) -> bool {
        if source == target {
            return true;
        }
        let mut stack = vec![target];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == source {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.successors(node));
            }
        }
        false
    }

    /// Nodes reachable from `source` following connections forward, ordered so
    /// every node comes after all of its reachable predecessors.
    pub fn downstream_order(&self, source: NodeId) -> Result<Vec<NodeId>, GraphError> {
        if !self.nodes.contains_key(&source) {
            return Err(GraphError::MissingNode(source));
        }

        let mut finished = Vec::new();
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        self.visit_downstream(
            source,
            &mut visiting,
            &mut visited,
            &mut finished,
            &mut stack,
        )?;

        finished.reverse();
        Ok(finished)
    }

    fn visit_downstream(
        &self,
        node_id: NodeId,
        visiting: &mut HashSet<NodeId>,
        visited: &mut HashSet<NodeId>,
        finished: &mut Vec<NodeId>,
        stack: &mut Vec<NodeId>,
    ) -> Result<(), GraphError> {
        if visited.contains(&node_id) {
            return Ok(());
        }
        if visiting.contains(&node_id) {
            stack.push(node_id);
            return Err(GraphError::CycleDetected(stack.clone()));
        }

        visiting.insert(node_id);
        stack.push(node_id);

        // Reverse postorder flips sibling order, so walk successors backwards
        // to keep first-connected branches first in the result.
        for next in self.successors(node_id).into_iter().rev() {
            self.visit_downstream(next, visiting, visited, finished, stack)?;
        }

        visiting.remove(&node_id);
        visited.insert(node_id);
        finished.push(node_id);
        stack.pop();
        Ok(())
    }
}

fn node_from_definition(id: NodeId, def: NodeDefinition) -> Node {
    Node {
        id,
        name: def.name,
        category: def.category,
        role: def.role,
        inputs: def.inputs,
        outputs: def.outputs,
        position: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NodeParams {
    pub values: BTreeMap<String, ParamValue>,
}

impl NodeParams {
    pub fn get_vec3(&self, key: &str, default: [f32; 3]) -> [f32; 3] {
        self.values
            .get(key)
            .and_then(|value| match value {
                ParamValue::Vec3(v) => Some(*v),
                _ => None,
            })
            .unwrap_or(default)
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.values
            .get(key)
            .and_then(|value| match value {
                ParamValue::Float(v) => Some(*v),
                ParamValue::Int(v) => Some(*v as f32),
                _ => None,
            })
            .unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.values
            .get(key)
            .and_then(|value| match value {
                ParamValue::Int(v) => Some(*v),
                _ => None,
            })
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(|value| match value {
                ParamValue::Bool(v) => Some(*v),
                _ => None,
            })
            .unwrap_or(default)
    }

    pub fn get_string<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values
            .get(key)
            .and_then(|value| match value {
                ParamValue::String(v) => Some(v.as_str()),
                _ => None,
            })
            .unwrap_or(default)
    }

    /// Stores `value` under `key`; returns whether anything changed.
    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) -> bool {
        let key = key.into();
        let changed = self
            .values
            .get(&key)
            .map(|existing| existing != &value)
            .unwrap_or(true);
        if changed {
            self.values.insert(key, value);
        }
        changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec3([f32; 3]),
    String(String),
}
