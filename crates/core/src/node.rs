use std::fmt;

use tracing::debug;

use crate::geometry::Geometry;
use crate::gpu::GpuBackend;
use crate::graph::{NodeId, NodeParams, NodeRole, ParamValue};
use crate::param_spec::ParamSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    MissingInput { slot: usize },
    MissingResource(String),
    NotReady,
    Compute(String),
}

impl NodeError {
    /// Missing inputs and pending setups are expected while a graph is being
    /// edited; they mean "no output", not failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::MissingInput { .. } | NodeError::NotReady)
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::MissingInput { slot } => write!(f, "input {slot} is not connected"),
            NodeError::MissingResource(what) => write!(f, "missing GPU resource: {what}"),
            NodeError::NotReady => write!(f, "setup still pending"),
            NodeError::Compute(message) => write!(f, "{message}"),
        }
    }
}

pub trait Generator {
    fn generate(&mut self, params: &NodeParams) -> Result<Geometry, NodeError>;

    fn param_specs(&self) -> Vec<ParamSpec> {
        Vec::new()
    }
}

pub trait Modifier {
    fn apply_modification(
        &mut self,
        params: &NodeParams,
        input: &Geometry,
    ) -> Result<Geometry, NodeError>;

    fn param_specs(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn simulation_mut(&mut self) -> Option<&mut dyn Simulation> {
        None
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

pub trait Combiner {
    fn input_count(&self) -> usize;

    fn apply_modification_multiple(
        &mut self,
        params: &NodeParams,
        inputs: &[&Geometry],
    ) -> Result<Geometry, NodeError>;

    fn is_executable(&self) -> bool {
        true
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        Vec::new()
    }
}

/// Time-stepped GPU state owned by a modifier.
pub trait Simulation {
    fn begin_setup(
        &mut self,
        params: &NodeParams,
        input: &Geometry,
        backend: &mut dyn GpuBackend,
    ) -> Result<(), NodeError>;
    /// Returns true on the call that completes a pending setup.
    fn poll_setup(&mut self, backend: &mut dyn GpuBackend) -> bool;
    fn is_ready(&self) -> bool;
    fn update_sim(&mut self, params: &NodeParams, dt: f32);
    fn dispatch_sim(&mut self, backend: &mut dyn GpuBackend) -> Result<(), NodeError>;
    fn release(&mut self, backend: &mut dyn GpuBackend);

    /// Controls read only by `begin_setup`; changing one restarts the setup.
    fn restarts_on(&self, _key: &str) -> bool {
        false
    }
}

pub enum NodeOp {
    Generator(Box<dyn Generator>),
    Modifier(Box<dyn Modifier>),
    Combiner(Box<dyn Combiner>),
}

impl NodeOp {
    pub fn role(&self) -> NodeRole {
        match self {
            NodeOp::Generator(_) => NodeRole::Generator,
            NodeOp::Modifier(_) => NodeRole::Modifier,
            NodeOp::Combiner(_) => NodeRole::Combiner,
        }
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        match self {
            NodeOp::Generator(op) => op.param_specs(),
            NodeOp::Modifier(op) => op.param_specs(),
            NodeOp::Combiner(op) => op.param_specs(),
        }
    }
}

impl fmt::Debug for NodeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeOp::{:?}", self.role())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub executable: bool,
    pub updatable: bool,
    pub controllable: bool,
    pub simulated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Uninitialized,
    Valid,
    Invalidated,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub geometry: Geometry,
    pub source_id: Option<NodeId>,
}

pub type UpdateHook = Box<dyn Fn(NodeId)>;

/// A graph node's behaviour and state: its op, controls, stored inputs and
/// current output.
pub struct GeometryNode {
    id: NodeId,
    label: String,
    kind: String,
    op: NodeOp,
    params: NodeParams,
    param_version: u64,
    input: Option<NodeInput>,
    slots: Vec<Option<NodeInput>>,
    output: Option<Geometry>,
    source_id: Option<NodeId>,
    output_enabled: bool,
    removed: bool,
    invalidated: bool,
    update_hook: Option<UpdateHook>,
    local_refreshes: u64,
    compute_count: u64,
}

impl fmt::Debug for GeometryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryNode")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("op", &self.op)
            .field("output_state", &self.output_state())
            .field("output_enabled", &self.output_enabled)
            .field("compute_count", &self.compute_count)
            .finish()
    }
}

impl GeometryNode {
    pub fn new(
        id: NodeId,
        label: impl Into<String>,
        kind: impl Into<String>,
        op: NodeOp,
        params: NodeParams,
    ) -> Self {
        let slot_count = match &op {
            NodeOp::Combiner(op) => op.input_count(),
            _ => 0,
        };
        Self {
            id,
            label: label.into(),
            kind: kind.into(),
            op,
            params,
            param_version: 0,
            input: None,
            slots: vec![None; slot_count],
            output: None,
            source_id: None,
            output_enabled: true,
            removed: false,
            invalidated: false,
            update_hook: None,
            local_refreshes: 0,
            compute_count: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn role(&self) -> NodeRole {
        self.op.role()
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    pub fn param_version(&self) -> u64 {
        self.param_version
    }

    pub fn param_specs(&self) -> Vec<ParamSpec> {
        self.op.param_specs()
    }

    pub fn capabilities(&self) -> Capabilities {
        let executable = match &self.op {
            NodeOp::Combiner(op) => op.is_executable(),
            _ => true,
        };
        Capabilities {
            executable,
            updatable: true,
            controllable: !self.op.param_specs().is_empty(),
            simulated: self.is_simulated(),
        }
    }

    pub fn output(&self) -> Option<&Geometry> {
        self.output.as_ref()
    }

    pub fn source_id(&self) -> Option<NodeId> {
        self.source_id
    }

    pub fn input(&self) -> Option<&NodeInput> {
        self.input.as_ref()
    }

    pub fn slot(&self, index: usize) -> Option<&NodeInput> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots_filled(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    pub fn set_output_enabled(&mut self, enabled: bool) {
        self.output_enabled = enabled;
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn compute_count(&self) -> u64 {
        self.compute_count
    }

    pub fn local_refreshes(&self) -> u64 {
        self.local_refreshes
    }

    pub fn output_state(&self) -> OutputState {
        if self.removed {
            OutputState::Removed
        } else if self.output.is_some() {
            OutputState::Valid
        } else if self.invalidated {
            OutputState::Invalidated
        } else {
            OutputState::Uninitialized
        }
    }

    pub fn set_update_hook(&mut self, hook: UpdateHook) {
        self.update_hook = Some(hook);
    }

    pub fn has_update_hook(&self) -> bool {
        self.update_hook.is_some()
    }

    /// Fires the update hook, or refreshes locally when nothing is wired up.
    pub fn trigger_update(&mut self) {
        match &self.update_hook {
            Some(hook) => hook(self.id),
            None => self.local_refreshes += 1,
        }
    }

    pub fn toggle_output(&mut self) -> bool {
        self.output_enabled = !self.output_enabled;
        self.trigger_update();
        self.output_enabled
    }

    /// Stores the modifier input and recomputes straight away. Simulated
    /// modifiers restart their setup from the new input first.
    pub fn set_input_geometry(
        &mut self,
        input: NodeInput,
        backend: &mut dyn GpuBackend,
    ) -> Result<bool, NodeError> {
        if let NodeOp::Modifier(op) = &mut self.op {
            if let Some(sim) = op.simulation_mut() {
                sim.release(backend);
                sim.begin_setup(&self.params, &input.geometry, backend)?;
            }
        }
        self.input = Some(input);
        self.execute()
    }

    /// Fills one combiner slot without recomputing.
    pub fn set_input_geometry_at(&mut self, index: usize, input: NodeInput) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(input);
                true
            }
            None => false,
        }
    }

    pub fn clear_input(&mut self) {
        self.input = None;
    }

    pub fn clear_input_at(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    /// Runs the op over the stored inputs. `Ok(false)` means the node has no
    /// output for a transient reason (missing input, setup pending).
    pub fn execute(&mut self) -> Result<bool, NodeError> {
        if self.removed {
            return Ok(false);
        }
        self.compute_count += 1;

        let (result, source_id) = match &mut self.op {
            NodeOp::Generator(op) => (op.generate(&self.params), Some(self.id)),
            NodeOp::Modifier(op) => match &self.input {
                Some(input) => (
                    op.apply_modification(&self.params, &input.geometry),
                    input.source_id,
                ),
                None => (Err(NodeError::MissingInput { slot: 0 }), None),
            },
            NodeOp::Combiner(op) => {
                let mut inputs = Vec::with_capacity(self.slots.len());
                let mut missing = None;
                for (index, slot) in self.slots.iter().enumerate() {
                    match slot {
                        Some(input) => inputs.push(&input.geometry),
                        None => {
                            missing = Some(index);
                            break;
                        }
                    }
                }
                let source_id = self.slots.first().and_then(|slot| {
                    slot.as_ref().and_then(|input| input.source_id)
                });
                match missing {
                    Some(slot) => (Err(NodeError::MissingInput { slot }), None),
                    None => (op.apply_modification_multiple(&self.params, &inputs), source_id),
                }
            }
        };

        match result {
            Ok(geometry) => {
                self.output = Some(geometry);
                self.source_id = source_id;
                self.invalidated = false;
                Ok(true)
            }
            Err(err) => {
                self.output = None;
                self.source_id = None;
                if err.is_transient() {
                    debug!(node = %self.id, kind = %self.kind, "no output: {err}");
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Control setter: stores the value, recomputes, then fires the update hook.
    pub fn set_param(
        &mut self,
        key: impl Into<String>,
        value: ParamValue,
    ) -> Result<bool, NodeError> {
        let key = key.into();
        let value = match self.param_specs().iter().find(|spec| spec.key == key) {
            Some(spec) => {
                if !spec.kind.accepts(&value) {
                    return Err(NodeError::Compute(format!(
                        "parameter '{key}' expects {:?}",
                        spec.kind
                    )));
                }
                spec.clamp(value)
            }
            None => value,
        };
        if !self.params.set(key, value) {
            return Ok(false);
        }
        self.param_version += 1;
        let recomputed = self.execute();
        self.trigger_update();
        recomputed.map(|_| true)
    }

    /// Drops the output after an upstream edge went away.
    pub fn invalidate(&mut self) {
        self.output = None;
        self.source_id = None;
        self.invalidated = true;
    }

    /// Returns false when the node was already marked removed.
    pub fn mark_removed(&mut self) -> bool {
        if self.removed {
            return false;
        }
        self.removed = true;
        self.output = None;
        self.input = None;
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.update_hook = None;
        true
    }

    pub fn simulation_mut(&mut self) -> Option<&mut dyn Simulation> {
        match &mut self.op {
            NodeOp::Modifier(op) => op.simulation_mut(),
            _ => None,
        }
    }

    pub fn is_simulated(&self) -> bool {
        match &self.op {
            NodeOp::Modifier(op) => op.is_simulated(),
            _ => false,
        }
    }

    /// Whether changing `key` only takes effect through a fresh setup.
    pub fn restarts_simulation_on(&mut self, key: &str) -> bool {
        self.simulation_mut()
            .map(|sim| sim.restarts_on(key))
            .unwrap_or(false)
    }

    /// Re-runs the simulation setup from the stored input, then recomputes.
    /// Without an input there is nothing to set up.
    pub fn restart_simulation(
        &mut self,
        backend: &mut dyn GpuBackend,
    ) -> Result<bool, NodeError> {
        let (NodeOp::Modifier(op), Some(input)) = (&mut self.op, &self.input) else {
            return Ok(false);
        };
        let Some(sim) = op.simulation_mut() else {
            return Ok(false);
        };
        sim.release(backend);
        sim.begin_setup(&self.params, &input.geometry, backend)?;
        self.execute()
    }

    pub fn simulation_ready(&mut self) -> bool {
        self.simulation_mut().map(|sim| sim.is_ready()).unwrap_or(false)
    }

    /// Advances the simulation `substeps` times, then submits the step.
    pub fn step_simulation(
        &mut self,
        dt: f32,
        substeps: u32,
        backend: &mut dyn GpuBackend,
    ) -> Result<(), NodeError> {
        let params = &self.params;
        let NodeOp::Modifier(op) = &mut self.op else {
            return Ok(());
        };
        let Some(sim) = op.simulation_mut() else {
            return Ok(());
        };
        if !sim.is_ready() {
            return Err(NodeError::NotReady);
        }
        let substeps = substeps.max(1);
        let step = dt / substeps as f32;
        for _ in 0..substeps {
            sim.update_sim(params, step);
        }
        sim.dispatch_sim(backend)
    }

    pub fn release_simulation(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(sim) = self.simulation_mut() {
            sim.release(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::gpu::HeadlessBackend;
    use crate::mesh_primitives::make_box;

    struct Unit;

    impl Generator for Unit {
        fn generate(&mut self, params: &NodeParams) -> Result<Geometry, NodeError> {
            Ok(make_box([params.get_float("size", 1.0); 3]))
        }
    }

    struct Lift;

    impl Modifier for Lift {
        fn apply_modification(
            &mut self,
            _params: &NodeParams,
            input: &Geometry,
        ) -> Result<Geometry, NodeError> {
            let mut out = input.clone();
            out.positions.iter_mut().for_each(|p| p[1] += 1.0);
            Ok(out)
        }
    }

    struct Pair;

    impl Combiner for Pair {
        fn input_count(&self) -> usize {
            2
        }

        fn apply_modification_multiple(
            &mut self,
            _params: &NodeParams,
            inputs: &[&Geometry],
        ) -> Result<Geometry, NodeError> {
            Ok(Geometry::merge(inputs))
        }
    }

    fn node(raw: u64, op: NodeOp) -> GeometryNode {
        GeometryNode::new(NodeId::from_raw(raw), "test", "Test", op, NodeParams::default())
    }

    #[test]
    fn modifier_without_input_stays_uninitialized() {
        let mut modifier = node(2, NodeOp::Modifier(Box::new(Lift)));
        assert_eq!(modifier.execute(), Ok(false));
        assert_eq!(modifier.output_state(), OutputState::Uninitialized);
    }

    #[test]
    fn modifier_recomputes_when_input_is_set() {
        let mut backend = HeadlessBackend::new();
        let mut modifier = node(2, NodeOp::Modifier(Box::new(Lift)));
        let input = NodeInput {
            geometry: make_box([1.0; 3]),
            source_id: Some(NodeId::from_raw(1)),
        };
        assert_eq!(modifier.set_input_geometry(input, &mut backend), Ok(true));
        assert_eq!(modifier.source_id(), Some(NodeId::from_raw(1)));
        let output = modifier.output().expect("output");
        assert_eq!(output.positions[0][1], 0.5);
    }

    #[test]
    fn combiner_needs_every_slot() {
        let mut combiner = node(3, NodeOp::Combiner(Box::new(Pair)));
        let input = NodeInput {
            geometry: make_box([1.0; 3]),
            source_id: None,
        };
        combiner.set_input_geometry_at(1, input.clone());
        assert_eq!(combiner.execute(), Ok(false));
        assert!(combiner.output().is_none());

        combiner.set_input_geometry_at(0, input);
        assert_eq!(combiner.execute(), Ok(true));
        assert_eq!(combiner.output().map(|geo| geo.positions.len()), Some(16));
        assert!(!combiner.set_input_geometry_at(2, NodeInput {
            geometry: Geometry::default(),
            source_id: None,
        }));
    }

    #[test]
    fn toggle_without_hook_refreshes_locally() {
        let mut generator = node(1, NodeOp::Generator(Box::new(Unit)));
        assert!(!generator.toggle_output());
        assert_eq!(generator.local_refreshes(), 1);

        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        generator.set_update_hook(Box::new(move |_| counter.set(counter.get() + 1)));
        assert!(generator.toggle_output());
        assert_eq!(fired.get(), 1);
        assert_eq!(generator.local_refreshes(), 1);
    }

    #[test]
    fn set_param_recomputes_and_notifies() {
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let mut generator = node(1, NodeOp::Generator(Box::new(Unit)));
        generator.set_update_hook(Box::new(move |_| counter.set(counter.get() + 1)));

        assert_eq!(generator.set_param("size", ParamValue::Float(4.0)), Ok(true));
        assert_eq!(generator.set_param("size", ParamValue::Float(4.0)), Ok(false));
        assert_eq!(fired.get(), 1);
        assert_eq!(generator.compute_count(), 1);
        let bounds = generator.output().and_then(|geo| geo.bounding_box).expect("bounds");
        assert_eq!(bounds.max, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn mark_removed_is_idempotent() {
        let mut generator = node(1, NodeOp::Generator(Box::new(Unit)));
        generator.execute().expect("generate");
        assert!(generator.mark_removed());
        assert!(!generator.mark_removed());
        assert_eq!(generator.output_state(), OutputState::Removed);
    }
}
