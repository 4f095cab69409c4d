use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::geometry::Geometry;
use crate::gpu::GpuGeometry;
use crate::graph::NodeId;

/// One node's current published output.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    pub id: NodeId,
    /// Generator this geometry traces back to through modifier chains.
    pub source_id: Option<NodeId>,
    pub geometry: Geometry,
    pub buffers: Option<GpuGeometry>,
}

impl GeometryRecord {
    pub fn new(id: NodeId, source_id: Option<NodeId>, geometry: Geometry) -> Self {
        Self {
            id,
            source_id,
            geometry,
            buffers: None,
        }
    }

    pub fn with_buffers(mut self, buffers: GpuGeometry) -> Self {
        self.buffers = Some(buffers);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryRemoval {
    Node(NodeId),
    All,
}

/// New vertex payload for an existing record; topology is left untouched.
#[derive(Debug, Clone)]
pub struct VertexData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub buffers: Option<GpuGeometry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type ChangedSubscriber = Box<dyn FnMut(&GeometryRecord)>;
type RemovedSubscriber = Box<dyn FnMut(GeometryRemoval)>;

/// Registry of computed geometry keyed by owning node. Holds at most one
/// record per node; notifications fan out synchronously.
#[derive(Default)]
pub struct GeometryStore {
    records: BTreeMap<NodeId, GeometryRecord>,
    visible: Vec<NodeId>,
    disabled: BTreeSet<NodeId>,
    changed_subscribers: Vec<(SubscriptionId, ChangedSubscriber)>,
    removed_subscribers: Vec<(SubscriptionId, RemovedSubscriber)>,
    next_subscription: u64,
}

impl fmt::Debug for GeometryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryStore")
            .field("records", &self.records.keys().collect::<Vec<_>>())
            .field("visible", &self.visible)
            .field("disabled", &self.disabled)
            .field("changed_subscribers", &self.changed_subscribers.len())
            .field("removed_subscribers", &self.removed_subscribers.len())
            .finish()
    }
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&GeometryRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &GeometryRecord> {
        self.records.values()
    }

    /// Inserts or overwrites the record for `record.id`.
    pub fn put(&mut self, record: GeometryRecord) {
        let id = record.id;
        self.records.insert(id, record);
        if let Some(record) = self.records.get(&id) {
            for (_, subscriber) in &mut self.changed_subscribers {
                subscriber(record);
            }
        }
    }

    /// Returns whether a record was deleted; only then are subscribers told.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if self.records.remove(&id).is_none() {
            return false;
        }
        debug!(node = %id, "geometry record removed");
        for (_, subscriber) in &mut self.removed_subscribers {
            subscriber(GeometryRemoval::Node(id));
        }
        true
    }

    pub fn clear(&mut self) {
        self.records.clear();
        for (_, subscriber) in &mut self.removed_subscribers {
            subscriber(GeometryRemoval::All);
        }
    }

    /// Swaps in a new vertex payload. Absent ids are ignored.
    pub fn update(&mut self, id: NodeId, data: VertexData) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        record.geometry.positions = data.positions;
        if data.normals.is_some() {
            record.geometry.normals = data.normals;
        }
        if data.buffers.is_some() {
            record.buffers = data.buffers;
        }
        record.geometry.update_bounds();

        for (_, subscriber) in &mut self.changed_subscribers {
            subscriber(&*record);
        }
        true
    }

    pub fn visible(&self) -> &[NodeId] {
        &self.visible
    }

    pub fn set_visible(&mut self, visible: Vec<NodeId>) {
        self.visible = visible;
    }

    pub fn set_output_enabled(&mut self, id: NodeId, enabled: bool) {
        if enabled {
            self.disabled.remove(&id);
        } else {
            self.disabled.insert(id);
        }
    }

    pub fn is_output_enabled(&self, id: NodeId) -> bool {
        !self.disabled.contains(&id)
    }

    pub fn forget(&mut self, id: NodeId) {
        self.disabled.remove(&id);
        self.visible.retain(|visible| *visible != id);
    }

    /// Records of visible, enabled nodes in visible-set order.
    pub fn snapshot(&self) -> Vec<&GeometryRecord> {
        self.visible
            .iter()
            .filter(|id| !self.disabled.contains(*id))
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    pub fn subscribe_changed(
        &mut self,
        subscriber: impl FnMut(&GeometryRecord) + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.changed_subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn subscribe_removed(
        &mut self,
        subscriber: impl FnMut(GeometryRemoval) + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.removed_subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.changed_subscribers.len() + self.removed_subscribers.len();
        self.changed_subscribers.retain(|(sub, _)| *sub != id);
        self.removed_subscribers.retain(|(sub, _)| *sub != id);
        before != self.changed_subscribers.len() + self.removed_subscribers.len()
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        self.next_subscription += 1;
        SubscriptionId(self.next_subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::mesh_primitives::make_box;

    fn record(raw: u64) -> GeometryRecord {
        let id = NodeId::from_raw(raw);
        GeometryRecord::new(id, Some(id), make_box([1.0; 3]))
    }

    #[test]
    fn put_twice_updates_instead_of_appending() {
        let mut store = GeometryStore::new();
        store.put(record(1));
        let mut second = record(1);
        second.geometry.positions[0] = [9.0, 9.0, 9.0];
        store.put(second);

        assert_eq!(store.len(), 1);
        let stored = store.get(NodeId::from_raw(1)).expect("record");
        assert_eq!(stored.geometry.positions[0], [9.0, 9.0, 9.0]);
    }

    #[test]
    fn removal_notifies_only_when_something_was_removed() {
        let removed = Rc::new(RefCell::new(Vec::new()));
        let mut store = GeometryStore::new();
        let sink = removed.clone();
        store.subscribe_removed(move |removal| sink.borrow_mut().push(removal));

        store.put(record(1));
        assert!(!store.remove(NodeId::from_raw(2)));
        assert!(store.remove(NodeId::from_raw(1)));
        store.clear();

        assert_eq!(
            *removed.borrow(),
            vec![
                GeometryRemoval::Node(NodeId::from_raw(1)),
                GeometryRemoval::All
            ]
        );
    }

    #[test]
    fn update_ignores_missing_records_and_notifies_changes() {
        let changed = Rc::new(RefCell::new(0));
        let mut store = GeometryStore::new();
        let counter = changed.clone();
        store.subscribe_changed(move |_| *counter.borrow_mut() += 1);

        let data = VertexData {
            positions: vec![[0.0; 3]; 8],
            normals: None,
            buffers: None,
        };
        assert!(!store.update(NodeId::from_raw(1), data.clone()));
        assert_eq!(*changed.borrow(), 0);

        store.put(record(1));
        assert!(store.update(NodeId::from_raw(1), data));
        assert_eq!(*changed.borrow(), 2);
        let bounds = store
            .get(NodeId::from_raw(1))
            .and_then(|record| record.geometry.bounding_box)
            .expect("bounds");
        assert_eq!(bounds.max, [0.0; 3]);
    }

    #[test]
    fn snapshot_filters_visible_and_enabled() {
        let mut store = GeometryStore::new();
        store.put(record(1));
        store.put(record(2));
        store.put(record(3));
        store.set_visible(vec![NodeId::from_raw(3), NodeId::from_raw(1)]);
        store.set_output_enabled(NodeId::from_raw(1), false);

        let ids: Vec<_> = store.snapshot().iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![NodeId::from_raw(3)]);
        assert!(store.contains(NodeId::from_raw(1)));

        store.set_output_enabled(NodeId::from_raw(1), true);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let changed = Rc::new(RefCell::new(0));
        let mut store = GeometryStore::new();
        let counter = changed.clone();
        let id = store.subscribe_changed(move |_| *counter.borrow_mut() += 1);

        store.put(record(1));
        assert!(store.unsubscribe(id));
        store.put(record(1));
        assert_eq!(*changed.borrow(), 1);
    }
}
