use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use geoflow_scene::SceneBuffers;
use tracing::{debug, info, warn};

use crate::assembler::{SceneAssembler, SceneGpuBuffers};
use crate::gpu::{GpuBackend, GpuError, HeadlessBackend, NodeBuffers};
use crate::graph::{
    Connection, ConnectionId, Graph, GraphError, NodeDefinition, NodeId, NodeParams, NodeRole,
    ParamValue,
};
use crate::node::{GeometryNode, NodeError, NodeInput, NodeOp};
use crate::nodes_builtin::{self, BuiltinNodeKind};
use crate::project::EngineSettings;
use crate::record::{GeometryRecord, GeometryStore, VertexData};
use crate::visible::resolve_visible_set;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Graph(GraphError),
    MissingNode(NodeId),
    MissingConnection(ConnectionId),
    UnknownNodeKind(String),
    RoleMismatch { expected: NodeRole, found: NodeRole },
    CycleDetected(Vec<NodeId>),
    Node { node: NodeId, error: NodeError },
    Gpu(GpuError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Graph(err) => write!(f, "{err}"),
            EngineError::MissingNode(id) => write!(f, "missing node {id}"),
            EngineError::MissingConnection(id) => write!(f, "missing connection {id:?}"),
            EngineError::UnknownNodeKind(kind) => write!(f, "unknown node kind '{kind}'"),
            EngineError::RoleMismatch { expected, found } => {
                write!(f, "definition declares {expected:?} but the op is {found:?}")
            }
            EngineError::CycleDetected(path) => write!(f, "cycle detected through {path:?}"),
            EngineError::Node { node, error } => write!(f, "node {node}: {error}"),
            EngineError::Gpu(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CycleDetected(path) => EngineError::CycleDetected(path),
            GraphError::MissingNode(id) => EngineError::MissingNode(id),
            other => EngineError::Graph(other),
        }
    }
}

impl From<GpuError> for EngineError {
    fn from(err: GpuError) -> Self {
        EngineError::Gpu(err)
    }
}

/// What prompted a scene rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneChange {
    NodeAdded(NodeId),
    NodeRemoved(NodeId),
    ConnectionAdded(ConnectionId),
    ConnectionRemoved(ConnectionId),
    Updated,
    Simulation,
    Settings,
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropagationReport {
    pub source: NodeId,
    /// Nodes reached this pass, source first, in recompute order.
    pub visited: Vec<NodeId>,
    /// Nodes that produced a fresh output.
    pub computed: Vec<NodeId>,
    /// Nodes left without output this pass; their records are gone.
    pub cleared: Vec<NodeId>,
    pub errors: Vec<(NodeId, NodeError)>,
}

impl PropagationReport {
    fn new(source: NodeId) -> Self {
        Self {
            source,
            visited: Vec::new(),
            computed: Vec::new(),
            cleared: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug)]
struct NodeSlot {
    node: GeometryNode,
    buffers: NodeBuffers,
}

/// The record store and the assembled scene, owned together so their
/// lifetime is the engine's.
#[derive(Debug, Default)]
pub struct SceneState {
    pub store: GeometryStore,
    pub assembler: SceneAssembler,
}

/// Push-based dataflow engine: owns the graph, node behaviour, published
/// geometry and the GPU backend. Single-threaded; node update hooks push
/// ids onto a shared queue that `process_updates` drains.
pub struct GraphEngine<B: GpuBackend = HeadlessBackend> {
    graph: Graph,
    nodes: BTreeMap<NodeId, NodeSlot>,
    scene: SceneState,
    backend: B,
    settings: EngineSettings,
    updates: Rc<RefCell<VecDeque<NodeId>>>,
    removed: BTreeSet<NodeId>,
}

impl<B: GpuBackend> fmt::Debug for GraphEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEngine")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.graph.connections().count())
            .field("records", &self.scene.store.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl GraphEngine<HeadlessBackend> {
    pub fn headless() -> Self {
        Self::new(HeadlessBackend::new(), EngineSettings::default())
    }
}

impl<B: GpuBackend> GraphEngine<B> {
    pub fn new(backend: B, settings: EngineSettings) -> Self {
        Self {
            graph: Graph::default(),
            nodes: BTreeMap::new(),
            scene: SceneState::default(),
            backend,
            settings,
            updates: Rc::default(),
            removed: BTreeSet::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, id: NodeId) -> Option<&GeometryNode> {
        self.nodes.get(&id).map(|slot| &slot.node)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GeometryNode> {
        self.nodes.get_mut(&id).map(|slot| &mut slot.node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GeometryNode> {
        self.nodes.values().map(|slot| &slot.node)
    }

    pub fn store(&self) -> &GeometryStore {
        &self.scene.store
    }

    pub fn store_mut(&mut self) -> &mut GeometryStore {
        &mut self.scene.store
    }

    pub fn record(&self, id: NodeId) -> Option<&GeometryRecord> {
        self.scene.store.get(id)
    }

    pub fn scene(&self) -> &SceneBuffers {
        self.scene.assembler.scene()
    }

    pub fn scene_gpu(&self) -> Option<SceneGpuBuffers> {
        self.scene.assembler.gpu()
    }

    pub fn rebuild_count(&self) -> u64 {
        self.scene.assembler.rebuild_count()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.settings = settings;
        self.update_all_geometries(SceneChange::Settings);
    }

    pub fn is_removed(&self, id: NodeId) -> bool {
        self.removed.contains(&id)
    }

    pub fn add_node(&mut self, kind: BuiltinNodeKind) -> Result<NodeId, EngineError> {
        let id = self.graph.add_node(nodes_builtin::node_definition(kind));
        self.attach(
            id,
            kind.name(),
            kind.name(),
            nodes_builtin::create_op(kind),
            nodes_builtin::default_params(kind),
        );
        self.on_node_created(id)?;
        Ok(id)
    }

    pub fn add_node_by_name(&mut self, name: &str) -> Result<NodeId, EngineError> {
        let kind = nodes_builtin::builtin_kind_from_name(name)
            .ok_or_else(|| EngineError::UnknownNodeKind(name.to_string()))?;
        self.add_node(kind)
    }

    /// Registers a node whose behaviour is supplied by the caller.
    pub fn add_custom_node(
        &mut self,
        definition: NodeDefinition,
        op: NodeOp,
        params: NodeParams,
    ) -> Result<NodeId, EngineError> {
        if definition.role != op.role() {
            return Err(EngineError::RoleMismatch {
                expected: definition.role,
                found: op.role(),
            });
        }
        let kind = definition.name.clone();
        let id = self.graph.add_node(definition);
        self.attach(id, &kind, &kind, op, params);
        self.on_node_created(id)?;
        Ok(id)
    }

    /// Recreates a builtin node under a known id. Saved parameters are laid
    /// over the kind's defaults so newer parameters keep a value.
    pub fn insert_node(
        &mut self,
        id: NodeId,
        kind_name: &str,
        label: &str,
        params: NodeParams,
    ) -> Result<(), EngineError> {
        let kind = nodes_builtin::builtin_kind_from_name(kind_name)
            .ok_or_else(|| EngineError::UnknownNodeKind(kind_name.to_string()))?;
        if self.removed.contains(&id) {
            return Err(GraphError::DuplicateNode(id).into());
        }
        self.graph
            .insert_node(id, nodes_builtin::node_definition(kind))?;
        let mut merged = nodes_builtin::default_params(kind);
        merged.values.extend(params.values);
        self.attach(id, label, kind.name(), nodes_builtin::create_op(kind), merged);
        self.on_node_created(id)
    }

    fn attach(&mut self, id: NodeId, label: &str, kind: &str, op: NodeOp, params: NodeParams) {
        self.nodes.insert(
            id,
            NodeSlot {
                node: GeometryNode::new(id, label, kind, op, params),
                buffers: NodeBuffers::default(),
            },
        );
    }

    /// Wires a freshly created node into the push model: its update hook
    /// feeds `process_updates`, generators compute right away, and the
    /// scene is rebuilt.
    pub fn on_node_created(&mut self, id: NodeId) -> Result<(), EngineError> {
        let updates = Rc::clone(&self.updates);
        let slot = self.nodes.get_mut(&id).ok_or(EngineError::MissingNode(id))?;
        slot.node.set_update_hook(Box::new(move |node_id| {
            updates.borrow_mut().push_back(node_id);
        }));
        if slot.node.role() == NodeRole::Generator {
            if let Err(err) = slot.node.execute() {
                warn!(node = %id, kind = slot.node.kind(), "generator failed: {err}");
            }
        }
        let enabled = slot.node.output_enabled();
        info!(node = %id, kind = slot.node.kind(), "node created");

        self.scene.store.set_output_enabled(id, enabled);
        if let Err(err) = self.publish(id) {
            warn!(node = %id, "could not publish geometry: {err}");
        }
        self.update_all_geometries(SceneChange::NodeAdded(id));
        Ok(())
    }

    /// Marks the node removed and drops its record and GPU state. Returns
    /// `Ok(false)` when the node had already been removed.
    pub fn on_node_removed(&mut self, id: NodeId) -> Result<bool, EngineError> {
        if self.removed.contains(&id) {
            return Ok(false);
        }
        let slot = self.nodes.get_mut(&id).ok_or(EngineError::MissingNode(id))?;
        if !slot.node.mark_removed() {
            return Ok(false);
        }
        slot.node.release_simulation(&mut self.backend);
        slot.buffers.release(&mut self.backend);
        self.scene.store.remove(id);
        self.scene.store.forget(id);
        self.removed.insert(id);
        info!(node = %id, "node removed");
        Ok(true)
    }

    /// Removes the node with its connections. Removing a node twice is a no-op.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), EngineError> {
        if !self.nodes.contains_key(&id) {
            return if self.removed.contains(&id) {
                Ok(())
            } else {
                Err(EngineError::MissingNode(id))
            };
        }
        let connections = self
            .graph
            .remove_node(id)
            .map(|(_, connections)| connections)
            .unwrap_or_default();
        self.on_node_removed(id)?;
        for connection in &connections {
            self.detach_connection(connection);
        }
        self.nodes.remove(&id);
        self.update_all_geometries(SceneChange::NodeRemoved(id));
        Ok(())
    }

    pub fn set_node_label(
        &mut self,
        id: NodeId,
        label: impl Into<String>,
    ) -> Result<(), EngineError> {
        let slot = self.nodes.get_mut(&id).ok_or(EngineError::MissingNode(id))?;
        slot.node.set_label(label);
        Ok(())
    }

    pub fn set_node_position(
        &mut self,
        id: NodeId,
        position: [f32; 2],
    ) -> Result<(), EngineError> {
        Ok(self.graph.set_node_position(id, position)?)
    }

    /// Adds the edge and pushes the source's current geometry across it.
    /// A cycle is reported as an error but the edge stays in the graph.
    pub fn connect(
        &mut self,
        source: NodeId,
        source_output: &str,
        target: NodeId,
        target_input: &str,
    ) -> Result<ConnectionId, EngineError> {
        let id = self
            .graph
            .add_connection(source, source_output, target, target_input)?;
        let connection = self
            .graph
            .connection(id)
            .cloned()
            .ok_or(EngineError::MissingConnection(id))?;
        self.on_connection_created(&connection)?;
        Ok(id)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<(), EngineError> {
        let connection = self
            .graph
            .remove_connection(id)
            .ok_or(EngineError::MissingConnection(id))?;
        self.on_connection_removed(&connection);
        Ok(())
    }

    pub fn on_connection_created(
        &mut self,
        connection: &Connection,
    ) -> Result<PropagationReport, EngineError> {
        info!(
            source = %connection.source,
            target = %connection.target,
            input = connection.target_input.as_str(),
            "connection created"
        );
        let report = self.propagate(connection.source);
        self.update_all_geometries(SceneChange::ConnectionAdded(connection.id));
        report
    }

    /// Clears the former target (and everything fed by it) and re-registers
    /// the source's own last output.
    pub fn on_connection_removed(&mut self, connection: &Connection) {
        self.detach_connection(connection);
        self.update_all_geometries(SceneChange::ConnectionRemoved(connection.id));
    }

    fn detach_connection(&mut self, connection: &Connection) {
        info!(
            source = %connection.source,
            target = %connection.target,
            "connection removed"
        );
        self.clear_target(connection.target, connection.target_slot());

        let mut queue = VecDeque::from([connection.target]);
        let mut seen = HashSet::from([connection.target]);
        while let Some(node_id) = queue.pop_front() {
            let downstream: Vec<(NodeId, usize)> = self
                .graph
                .outgoing(node_id)
                .map(|conn| (conn.target, conn.target_slot()))
                .collect();
            for (target, slot) in downstream {
                self.clear_target(target, slot);
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        let source_live = self
            .nodes
            .get(&connection.source)
            .map(|slot| !slot.node.is_removed())
            .unwrap_or(false);
        if source_live {
            if let Err(err) = self.publish(connection.source) {
                warn!(node = %connection.source, "could not restore geometry: {err}");
            }
        }
    }

    fn clear_target(&mut self, target: NodeId, slot_index: usize) {
        if let Some(slot) = self.nodes.get_mut(&target) {
            if !slot.node.is_removed() {
                match slot.node.role() {
                    NodeRole::Modifier => slot.node.clear_input(),
                    NodeRole::Combiner => slot.node.clear_input_at(slot_index),
                    NodeRole::Generator => {}
                }
                slot.node.invalidate();
                slot.node.release_simulation(&mut self.backend);
                slot.buffers.release(&mut self.backend);
            }
        }
        self.scene.store.remove(target);
    }

    /// Pushes `source`'s current output through every node reachable from
    /// it. Each reachable node recomputes at most once, after all of its
    /// reachable predecessors; node failures are collected and do not stop
    /// sibling branches. A node that ends up without output clears the
    /// inputs it fed, so nothing downstream keeps stale geometry.
    pub fn propagate(&mut self, source: NodeId) -> Result<PropagationReport, EngineError> {
        if !self.nodes.contains_key(&source) {
            return Err(EngineError::MissingNode(source));
        }
        let mut report = PropagationReport::new(source);

        let order = match self.graph.downstream_order(source) {
            Ok(order) => order,
            Err(GraphError::CycleDetected(path)) => {
                warn!(node = %source, ?path, "propagation stopped: cycle detected");
                return Err(EngineError::CycleDetected(path));
            }
            Err(err) => return Err(err.into()),
        };

        let mut changed = HashSet::from([source]);
        report.visited.push(source);
        for target in order.into_iter().filter(|id| *id != source) {
            let incoming: Vec<Connection> = self
                .graph
                .incoming(target)
                .filter(|conn| changed.contains(&conn.source))
                .cloned()
                .collect();
            if incoming.is_empty() {
                continue;
            }
            report.visited.push(target);

            let (live, emptied): (Vec<Connection>, Vec<Connection>) = incoming
                .into_iter()
                .partition(|conn| self.has_output(conn.source));
            for conn in &emptied {
                self.clear_target(target, conn.target_slot());
            }
            let result = if live.is_empty() {
                Ok(false)
            } else {
                self.recompute_from(target, &live)
            };
            let published = self.publish(target);
            match (result, published) {
                (Ok(true), Ok(true)) => {
                    changed.insert(target);
                    report.computed.push(target);
                }
                (Ok(_), Ok(_)) => {}
                (Err(error), _) | (Ok(_), Err(error)) => {
                    warn!(node = %target, "recompute failed: {error}");
                    report.errors.push((target, error));
                }
            }
            if !self.has_output(target) {
                changed.insert(target);
                report.cleared.push(target);
            }
        }

        debug!(
            node = %source,
            visited = report.visited.len(),
            computed = report.computed.len(),
            cleared = report.cleared.len(),
            "propagated"
        );
        Ok(report)
    }

    fn has_output(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .map(|slot| !slot.node.is_removed() && slot.node.output().is_some())
            .unwrap_or(false)
    }

    fn recompute_from(
        &mut self,
        target: NodeId,
        incoming: &[Connection],
    ) -> Result<bool, NodeError> {
        let inputs: Vec<(usize, NodeInput)> = incoming
            .iter()
            .filter_map(|conn| {
                let source = &self.nodes.get(&conn.source)?.node;
                let geometry = source.output()?.clone();
                Some((
                    conn.target_slot(),
                    NodeInput {
                        geometry,
                        source_id: source.source_id(),
                    },
                ))
            })
            .collect();

        let Some(slot) = self.nodes.get_mut(&target) else {
            return Ok(false);
        };
        if slot.node.is_removed() {
            return Ok(false);
        }
        match slot.node.role() {
            NodeRole::Generator => Ok(false),
            NodeRole::Modifier => match inputs.into_iter().last() {
                Some((_, input)) => slot.node.set_input_geometry(input, &mut self.backend),
                None => Ok(false),
            },
            NodeRole::Combiner => {
                for (index, input) in inputs {
                    slot.node.set_input_geometry_at(index, input);
                }
                if slot.node.capabilities().executable && slot.node.slots_filled() {
                    slot.node.execute()
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Mirrors a node's output into the store: a record backed by the node's
    /// own buffers, or no record at all.
    fn publish(&mut self, id: NodeId) -> Result<bool, NodeError> {
        let Some(slot) = self.nodes.get_mut(&id) else {
            return Ok(false);
        };
        let Some(geometry) = slot.node.output() else {
            slot.buffers.release(&mut self.backend);
            self.scene.store.remove(id);
            return Ok(false);
        };
        let buffers = slot
            .buffers
            .sync(&mut self.backend, &id.to_string(), geometry)
            .map_err(|err| NodeError::MissingResource(err.to_string()))?;
        let record = GeometryRecord {
            id,
            source_id: slot.node.source_id(),
            geometry: geometry.clone(),
            buffers: Some(buffers),
        };
        self.scene.store.put(record);
        Ok(true)
    }

    /// Re-resolves the visible set and reassembles the merged scene.
    pub fn update_all_geometries(&mut self, change: SceneChange) {
        let visible = resolve_visible_set(&self.graph);
        self.scene.store.set_visible(visible);
        let records = self.scene.store.snapshot();
        let scene = self
            .scene
            .assembler
            .rebuild(&mut self.backend, &records, &self.settings);
        debug!(?change, draws = scene.draws.len(), "scene updated");
    }

    /// Control setter. Recomputes the node, then pushes the change downstream
    /// and rebuilds the scene.
    pub fn set_param(
        &mut self,
        id: NodeId,
        key: &str,
        value: ParamValue,
    ) -> Result<bool, EngineError> {
        let slot = self.nodes.get_mut(&id).ok_or(EngineError::MissingNode(id))?;
        let mut result = slot.node.set_param(key, value);
        if matches!(result, Ok(true)) && slot.node.restarts_simulation_on(key) {
            debug!(node = %id, key, "control restarts simulation setup");
            result = slot
                .node
                .restart_simulation(&mut self.backend)
                .map(|_| true);
        }
        self.process_updates();
        result.map_err(|error| EngineError::Node { node: id, error })
    }

    /// Flips the node's output flag. The record stays in the store either way.
    pub fn toggle_output(&mut self, id: NodeId) -> Result<bool, EngineError> {
        let slot = self.nodes.get_mut(&id).ok_or(EngineError::MissingNode(id))?;
        let enabled = slot.node.toggle_output();
        self.scene.store.set_output_enabled(id, enabled);
        self.process_updates();
        Ok(enabled)
    }

    /// Drains ids queued by node update hooks: each is re-published and
    /// propagated once, then the scene is rebuilt a single time.
    pub fn process_updates(&mut self) -> Vec<PropagationReport> {
        let queued: Vec<NodeId> = self.updates.borrow_mut().drain(..).collect();
        let mut pending: Vec<NodeId> = Vec::with_capacity(queued.len());
        for id in queued {
            if !pending.contains(&id) {
                pending.push(id);
            }
        }
        if pending.is_empty() {
            return Vec::new();
        }

        let mut reports = Vec::new();
        for id in pending {
            if self.removed.contains(&id) || !self.nodes.contains_key(&id) {
                continue;
            }
            if let Err(err) = self.publish(id) {
                warn!(node = %id, "could not publish geometry: {err}");
            }
            match self.propagate(id) {
                Ok(report) => reports.push(report),
                Err(err) => warn!(node = %id, "update not propagated: {err}"),
            }
        }
        self.update_all_geometries(SceneChange::Updated);
        reports
    }

    /// Advances every simulated node by one frame. Pending setups are polled
    /// first; nodes that became ready publish their first output. Returns the
    /// nodes whose geometry changed.
    pub fn tick(&mut self, dt: f32) -> Vec<NodeId> {
        let dt = dt.clamp(0.0, self.settings.max_frame_dt.max(0.0));
        let substeps = self.settings.sim_substeps.max(1);

        let simulated: Vec<NodeId> = self
            .nodes
            .iter()
            .filter_map(|(id, slot)| {
                (!slot.node.is_removed() && slot.node.is_simulated()).then_some(*id)
            })
            .collect();

        let mut became_ready = Vec::new();
        let mut stepped = Vec::new();
        for id in simulated {
            let Some(slot) = self.nodes.get_mut(&id) else {
                continue;
            };
            let backend = &mut self.backend;
            if !slot.node.simulation_ready() {
                let ready = slot
                    .node
                    .simulation_mut()
                    .map(|sim| sim.poll_setup(backend))
                    .unwrap_or(false);
                if ready {
                    debug!(node = %id, "simulation ready");
                    if let Err(err) = slot.node.execute() {
                        warn!(node = %id, "simulation output failed: {err}");
                    }
                    became_ready.push(id);
                }
                continue;
            }
            if dt <= 0.0 {
                continue;
            }
            if let Err(err) = slot.node.step_simulation(dt, substeps, backend) {
                warn!(node = %id, "simulation step failed: {err}");
                continue;
            }
            match slot.node.execute() {
                Ok(true) => stepped.push(id),
                Ok(false) => {}
                Err(err) => warn!(node = %id, "simulation output failed: {err}"),
            }
        }

        let mut changed = Vec::new();
        for id in became_ready {
            match self.publish(id) {
                Ok(true) => changed.push(id),
                Ok(false) => {}
                Err(err) => warn!(node = %id, "could not publish geometry: {err}"),
            }
        }
        for id in stepped {
            match self.publish_vertices(id) {
                Ok(true) => changed.push(id),
                Ok(false) => {}
                Err(err) => warn!(node = %id, "could not publish geometry: {err}"),
            }
        }
        if changed.is_empty() {
            return changed;
        }

        for id in &changed {
            if let Err(err) = self.propagate(*id) {
                warn!(node = %id, "simulation change not propagated: {err}");
            }
        }
        self.update_all_geometries(SceneChange::Simulation);
        changed
    }

    /// Positions-only publish for stepped simulations; falls back to a full
    /// publish when the node has no record yet.
    fn publish_vertices(&mut self, id: NodeId) -> Result<bool, NodeError> {
        let data = {
            let Some(slot) = self.nodes.get_mut(&id) else {
                return Ok(false);
            };
            match slot.node.output() {
                Some(geometry) => {
                    let buffers = slot
                        .buffers
                        .sync(&mut self.backend, &id.to_string(), geometry)
                        .map_err(|err| NodeError::MissingResource(err.to_string()))?;
                    Some(VertexData {
                        positions: geometry.positions.clone(),
                        normals: geometry.normals.clone(),
                        buffers: Some(buffers),
                    })
                }
                None => None,
            }
        };
        if let Some(data) = data {
            if self.scene.store.update(id, data) {
                return Ok(true);
            }
        }
        self.publish(id)
    }

    /// Releases every GPU resource the engine holds and empties the store.
    /// The graph itself is left intact.
    pub fn release_all(&mut self) {
        for slot in self.nodes.values_mut() {
            slot.node.release_simulation(&mut self.backend);
            slot.buffers.release(&mut self.backend);
        }
        self.scene.assembler.release(&mut self.backend);
        self.scene.store.clear();
        info!(nodes = self.nodes.len(), "engine resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::node::Modifier;
    use crate::nodes::{geometry_in, GEOMETRY_OUT};

    fn connect(
        engine: &mut GraphEngine,
        source: NodeId,
        target: NodeId,
        input: usize,
    ) -> ConnectionId {
        engine
            .connect(source, GEOMETRY_OUT, target, &geometry_in(input))
            .expect("connect")
    }

    fn node(engine: &mut GraphEngine, kind: BuiltinNodeKind) -> NodeId {
        engine.add_node(kind).expect("add node")
    }

    #[test]
    fn diamond_recomputes_join_once() {
        let mut engine = GraphEngine::headless();
        let a = node(&mut engine, BuiltinNodeKind::Cube);
        let b = node(&mut engine, BuiltinNodeKind::Transform);
        let c = node(&mut engine, BuiltinNodeKind::Transform);
        let d = node(&mut engine, BuiltinNodeKind::Merge);
        connect(&mut engine, a, b, 0);
        connect(&mut engine, a, c, 0);
        connect(&mut engine, b, d, 0);
        connect(&mut engine, c, d, 1);

        let before = engine.node(d).map(GeometryNode::compute_count).expect("d");
        let report = engine.propagate(a).expect("propagate");
        let after = engine.node(d).map(GeometryNode::compute_count).expect("d");

        assert_eq!(after - before, 1);
        assert_eq!(report.visited, vec![a, b, c, d]);
        assert_eq!(report.computed, vec![b, c, d]);
        assert!(report.is_clean());
        assert_eq!(engine.record(d).map(|r| r.geometry.vertex_count()), Some(16));
    }

    #[test]
    fn propagate_twice_yields_identical_records() {
        let mut engine = GraphEngine::headless();
        let a = node(&mut engine, BuiltinNodeKind::Cube);
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, a, t, 0);
        engine
            .set_param(t, "translate", ParamValue::Vec3([1.0, 2.0, 3.0]))
            .expect("param");

        engine.propagate(a).expect("propagate");
        let first = engine.record(t).cloned().expect("record");
        engine.propagate(a).expect("propagate");
        let second = engine.record(t).cloned().expect("record");
        assert_eq!(first, second);
    }

    #[test]
    fn only_terminal_nodes_are_visible() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Cube);
        assert_eq!(engine.store().visible(), &[g]);

        let m1 = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, g, m1, 0);
        assert_eq!(engine.store().visible(), &[m1]);

        let m2 = node(&mut engine, BuiltinNodeKind::Noise);
        connect(&mut engine, g, m2, 0);
        assert_eq!(engine.store().visible(), &[m1, m2]);
        assert_eq!(engine.scene().draws.len(), 2);
    }

    #[test]
    fn combiner_waits_for_every_input() {
        let mut engine = GraphEngine::headless();
        let a = node(&mut engine, BuiltinNodeKind::Cube);
        let b = node(&mut engine, BuiltinNodeKind::Icosphere);
        let merge = node(&mut engine, BuiltinNodeKind::Merge);

        connect(&mut engine, a, merge, 0);
        assert!(engine.record(merge).is_none());
        assert!(engine.node(merge).and_then(GeometryNode::output).is_none());

        connect(&mut engine, b, merge, 1);
        let record = engine.record(merge).expect("merged");
        let expected = engine.record(a).map(|r| r.geometry.vertex_count()).unwrap_or(0)
            + engine.record(b).map(|r| r.geometry.vertex_count()).unwrap_or(0);
        assert_eq!(record.geometry.vertex_count(), expected);
        assert_eq!(record.source_id, Some(a));
    }

    #[test]
    fn combiner_recomputes_when_a_filled_slot_changes() {
        let mut engine = GraphEngine::headless();
        let a = node(&mut engine, BuiltinNodeKind::Cube);
        let b = node(&mut engine, BuiltinNodeKind::Cube);
        let merge = node(&mut engine, BuiltinNodeKind::Merge);
        connect(&mut engine, a, merge, 0);
        connect(&mut engine, b, merge, 1);
        let count = engine.node(merge).map(GeometryNode::compute_count).expect("merge");

        engine
            .set_param(b, "center", ParamValue::Vec3([0.0, 5.0, 0.0]))
            .expect("param");
        assert_eq!(
            engine.node(merge).map(GeometryNode::compute_count),
            Some(count + 1)
        );
        let bounds = engine
            .record(merge)
            .and_then(|r| r.geometry.bounding_box)
            .expect("bounds");
        assert_eq!(bounds.max[1], 5.5);
    }

    #[test]
    fn disconnect_restores_source_record() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Cube);
        let before = engine.record(g).cloned().expect("generator record");

        let m = node(&mut engine, BuiltinNodeKind::Transform);
        let edge = connect(&mut engine, g, m, 0);
        assert!(engine.record(m).is_some());

        engine.disconnect(edge).expect("disconnect");
        assert_eq!(engine.record(g), Some(&before));
        assert!(engine.record(m).is_none());
        assert!(engine.node(m).and_then(GeometryNode::input).is_none());
        assert_eq!(engine.store().visible(), &[g]);
    }

    #[test]
    fn disconnect_clears_nodes_further_downstream() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Cube);
        let m1 = node(&mut engine, BuiltinNodeKind::Transform);
        let m2 = node(&mut engine, BuiltinNodeKind::Noise);
        let edge = connect(&mut engine, g, m1, 0);
        connect(&mut engine, m1, m2, 0);
        assert!(engine.record(m2).is_some());

        engine.disconnect(edge).expect("disconnect");
        assert!(engine.record(m1).is_none());
        assert!(engine.record(m2).is_none());
    }

    #[test]
    fn toggling_output_hides_without_recompute() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Cube);
        let m = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, g, m, 0);
        let count = engine.node(m).map(GeometryNode::compute_count).expect("m");

        assert_eq!(engine.toggle_output(m), Ok(false));
        assert!(engine.store().snapshot().is_empty());
        assert!(engine.store().contains(m));
        assert!(engine.scene().is_empty());

        assert_eq!(engine.toggle_output(m), Ok(true));
        assert_eq!(engine.store().snapshot().len(), 1);
        assert_eq!(engine.node(m).map(GeometryNode::compute_count), Some(count));
    }

    #[test]
    fn two_terminals_assemble_with_rebased_indices() {
        let mut engine = GraphEngine::headless();
        let cube = node(&mut engine, BuiltinNodeKind::Cube);
        let plane = node(&mut engine, BuiltinNodeKind::Plane);
        engine
            .set_param(plane, "divisions", ParamValue::Int(1))
            .expect("param");

        let scene = engine.scene();
        assert_eq!(scene.vertex_count(), 12);
        let plane_draw = scene.draw_for(plane.raw()).expect("plane draw");
        assert_eq!(plane_draw.base_vertex, 8);
        let plane_indices =
            &scene.indices[plane_draw.first_index as usize..][..plane_draw.index_count as usize];
        let local = &engine.record(plane).expect("plane").geometry.indices;
        let rebased: Vec<u32> = local.iter().map(|i| i + 8).collect();
        assert_eq!(plane_indices, rebased.as_slice());
        assert!(scene.draw_for(cube.raw()).is_some());
    }

    #[test]
    fn removing_a_branch_makes_the_other_terminal() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Cube);
        let m1 = node(&mut engine, BuiltinNodeKind::Transform);
        let m2 = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, g, m1, 0);
        connect(&mut engine, g, m2, 0);
        let records = engine.store().len();

        engine.remove_node(m2).expect("remove");
        assert_eq!(engine.store().len(), records - 1);
        assert!(engine.record(m2).is_none());
        assert_eq!(engine.store().visible(), &[m1]);

        engine.remove_node(m1).expect("remove");
        assert_eq!(engine.store().visible(), &[g]);
        assert!(engine.record(g).is_some());
    }

    #[test]
    fn node_removal_is_idempotent() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Cube);
        assert_eq!(engine.on_node_removed(g), Ok(true));
        assert_eq!(engine.on_node_removed(g), Ok(false));
        assert!(engine.remove_node(g).is_ok());
        assert!(engine.remove_node(g).is_ok());
        assert_eq!(
            engine.on_node_removed(NodeId::from_raw(99)),
            Err(EngineError::MissingNode(NodeId::from_raw(99)))
        );
    }

    #[test]
    fn cycles_fail_the_pass_and_leave_the_graph_editable() {
        let mut engine = GraphEngine::headless();
        let a = node(&mut engine, BuiltinNodeKind::Cube);
        let merge = node(&mut engine, BuiltinNodeKind::Merge);
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, a, merge, 0);
        connect(&mut engine, merge, t, 0);
        let back = connect(&mut engine, t, merge, 1);

        let err = engine.propagate(a).unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected(ref path) if !path.is_empty()));

        engine.disconnect(back).expect("disconnect");
        assert!(engine.propagate(a).is_ok());
    }

    struct Reject;

    impl Modifier for Reject {
        fn apply_modification(
            &mut self,
            _params: &NodeParams,
            _input: &Geometry,
        ) -> Result<Geometry, NodeError> {
            Err(NodeError::Compute("rejected".to_string()))
        }
    }

    #[test]
    fn failures_do_not_stop_sibling_branches() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Cube);
        let reject = engine
            .add_custom_node(
                crate::nodes::modifier_definition("Reject"),
                NodeOp::Modifier(Box::new(Reject)),
                NodeParams::default(),
            )
            .expect("custom node");
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, g, reject, 0);
        connect(&mut engine, g, t, 0);

        let report = engine.propagate(g).expect("propagate");
        assert_eq!(
            report.errors,
            vec![(reject, NodeError::Compute("rejected".to_string()))]
        );
        assert_eq!(report.computed, vec![t]);
        assert!(engine.record(reject).is_none());
        assert!(engine.record(t).is_some());
        assert_eq!(engine.store().visible(), &[reject, t]);
    }

    #[test]
    fn set_param_propagates_downstream() {
        let mut engine = GraphEngine::headless();
        let cube = node(&mut engine, BuiltinNodeKind::Cube);
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, cube, t, 0);
        let rebuilds = engine.rebuild_count();

        assert_eq!(
            engine.set_param(cube, "size", ParamValue::Vec3([4.0, 4.0, 4.0])),
            Ok(true)
        );
        let bounds = engine
            .record(t)
            .and_then(|r| r.geometry.bounding_box)
            .expect("bounds");
        assert_eq!(bounds.max, [2.0, 2.0, 2.0]);
        assert_eq!(engine.rebuild_count(), rebuilds + 1);
        assert_eq!(
            engine.set_param(cube, "size", ParamValue::Vec3([4.0, 4.0, 4.0])),
            Ok(false)
        );
    }

    #[test]
    fn rigidbody_output_appears_after_readback() {
        let mut engine = GraphEngine::headless();
        let cube = node(&mut engine, BuiltinNodeKind::Cube);
        engine
            .set_param(cube, "center", ParamValue::Vec3([0.0, 5.0, 0.0]))
            .expect("param");
        let body = node(&mut engine, BuiltinNodeKind::Rigidbody);
        connect(&mut engine, cube, body, 0);
        assert!(engine.record(body).is_none());

        assert!(engine.tick(1.0 / 60.0).is_empty());
        assert!(engine.record(body).is_none());

        assert_eq!(engine.tick(1.0 / 60.0), vec![body]);
        let start = engine.record(body).map(|r| r.geometry.positions[0]).expect("ready");

        assert_eq!(engine.tick(1.0 / 60.0), vec![body]);
        let moved = engine.record(body).map(|r| r.geometry.positions[0]).expect("record");
        assert!(moved[1] < start[1]);
        assert!(!engine.scene().is_empty());
    }

    #[test]
    fn failing_generator_clears_downstream_records() {
        let mut engine = GraphEngine::headless();
        let torus = node(&mut engine, BuiltinNodeKind::Torus);
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, torus, t, 0);
        assert_eq!(engine.scene().draws.len(), 1);

        let result = engine.set_param(torus, "minor_radius", ParamValue::Float(3.0));
        assert!(matches!(result, Err(EngineError::Node { node, .. }) if node == torus));
        assert!(engine.record(torus).is_none());
        assert!(engine.record(t).is_none());
        assert!(engine.node(t).and_then(GeometryNode::output).is_none());
        assert!(engine.scene().is_empty());

        assert_eq!(
            engine.set_param(torus, "minor_radius", ParamValue::Float(0.25)),
            Ok(true)
        );
        assert!(engine.record(t).is_some());
        assert_eq!(engine.scene().draws.len(), 1);
    }

    #[test]
    fn pending_simulation_clears_downstream_until_ready() {
        let mut engine = GraphEngine::headless();
        let cube = node(&mut engine, BuiltinNodeKind::Cube);
        engine
            .set_param(cube, "center", ParamValue::Vec3([0.0, 5.0, 0.0]))
            .expect("param");
        let body = node(&mut engine, BuiltinNodeKind::Rigidbody);
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, cube, body, 0);
        connect(&mut engine, body, t, 0);
        engine.tick(1.0 / 60.0);
        engine.tick(1.0 / 60.0);
        assert!(engine.record(t).is_some());

        engine
            .set_param(cube, "size", ParamValue::Vec3([3.0, 3.0, 3.0]))
            .expect("param");
        assert!(engine.record(body).is_none());
        assert!(engine.record(t).is_none());
        assert!(engine.node(t).and_then(GeometryNode::output).is_none());

        assert!(engine.tick(1.0 / 60.0).is_empty());
        assert!(engine.record(t).is_none());

        assert_eq!(engine.tick(1.0 / 60.0), vec![body]);
        let bounds = engine
            .record(t)
            .and_then(|r| r.geometry.bounding_box)
            .expect("fresh transform output");
        assert!(bounds.max[0] > 1.4);
    }

    #[test]
    fn propagation_reports_nodes_left_without_output() {
        let mut engine = GraphEngine::headless();
        let g = node(&mut engine, BuiltinNodeKind::Torus);
        let m1 = node(&mut engine, BuiltinNodeKind::Transform);
        let m2 = node(&mut engine, BuiltinNodeKind::Noise);
        connect(&mut engine, g, m1, 0);
        connect(&mut engine, m1, m2, 0);

        if let Some(torus) = engine.node_mut(g) {
            let _ = torus.set_param("minor_radius", ParamValue::Float(3.0));
        }
        engine.publish(g).expect("publish");
        let report = engine.propagate(g).expect("propagate");
        assert_eq!(report.visited, vec![g, m1, m2]);
        assert_eq!(report.cleared, vec![m1, m2]);
        assert!(report.computed.is_empty());
        assert!(engine.record(m2).is_none());
    }

    #[test]
    fn simulation_controls_restart_setup() {
        let mut engine = GraphEngine::headless();
        let cube = node(&mut engine, BuiltinNodeKind::Cube);
        engine
            .set_param(cube, "center", ParamValue::Vec3([0.0, 5.0, 0.0]))
            .expect("param");
        let body = node(&mut engine, BuiltinNodeKind::Rigidbody);
        connect(&mut engine, cube, body, 0);
        engine.tick(1.0 / 60.0);
        engine.tick(1.0 / 60.0);

        engine
            .set_param(body, "gravity", ParamValue::Vec3([0.0, -1.0, 0.0]))
            .expect("param");
        assert!(engine.record(body).is_some());

        engine
            .set_param(body, "initial_velocity", ParamValue::Vec3([6.0, 0.0, 0.0]))
            .expect("param");
        assert!(engine.record(body).is_none());
        assert!(engine.tick(1.0 / 60.0).is_empty());
        assert_eq!(engine.tick(1.0 / 60.0), vec![body]);
        let start = engine.record(body).map(|r| r.geometry.positions[0]).expect("ready");

        engine.tick(1.0 / 60.0);
        let moved = engine.record(body).map(|r| r.geometry.positions[0]).expect("record");
        assert!(moved[0] > start[0]);
    }

    #[test]
    fn removing_everything_releases_all_buffers() {
        let mut engine = GraphEngine::headless();
        let cube = node(&mut engine, BuiltinNodeKind::Cube);
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        let body = node(&mut engine, BuiltinNodeKind::Rigidbody);
        connect(&mut engine, cube, t, 0);
        connect(&mut engine, t, body, 0);
        engine.tick(0.016);
        engine.tick(0.016);
        assert!(engine.backend().live_buffer_count() > 0);

        for id in [t, body, cube] {
            engine.remove_node(id).expect("remove");
        }
        assert_eq!(engine.backend().live_buffer_count(), 0);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn release_all_frees_gpu_state() {
        let mut engine = GraphEngine::headless();
        let cube = node(&mut engine, BuiltinNodeKind::Cube);
        let t = node(&mut engine, BuiltinNodeKind::Transform);
        connect(&mut engine, cube, t, 0);

        engine.release_all();
        assert_eq!(engine.backend().live_buffer_count(), 0);
        assert!(engine.store().is_empty());
        assert_eq!(engine.graph().nodes().count(), 2);
    }

    #[test]
    fn unknown_kinds_and_mismatched_roles_are_rejected() {
        let mut engine = GraphEngine::headless();
        assert_eq!(
            engine.add_node_by_name("Teapot"),
            Err(EngineError::UnknownNodeKind("Teapot".to_string()))
        );
        let err = engine
            .add_custom_node(
                crate::nodes::generator_definition("Custom"),
                nodes_builtin::create_op(BuiltinNodeKind::Transform),
                NodeParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::RoleMismatch { .. }));
    }
}
