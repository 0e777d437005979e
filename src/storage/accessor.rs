//! Per-transaction view of the graph store.
//!
//! One accessor is owned by one query execution at a time. Record visibility
//! combines the commit snapshot taken at transaction start with the
//! intra-transaction command counter: a write stamped at command `n` becomes
//! readable once the counter has advanced past `n`. Committing or aborting
//! deactivates the accessor; any later read fails, which is also how a stuck
//! query gets stopped from the outside.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use tracing::debug;

use crate::query::value::{EdgeRef, TypedValue};
use crate::storage::{index_insert, index_remove, EdgeRecord, GraphStore, PropKey, Stamp, VertexRecord};
use crate::types::{EdgeId, EdgeTypeId, LabelId, PropId, Result, TxId, VertexId, VesperError};

/// Edge traversal direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dir {
    Out,
    In,
    Both,
}

const STATE_ACTIVE: u8 = 0;
const STATE_COMMITTED: u8 = 1;
const STATE_ABORTED: u8 = 2;

pub struct GraphAccessor {
    store: GraphStore,
    tx: TxId,
    snapshot: u64,
    command: AtomicU32,
    state: AtomicU8,
    index_created: AtomicBool,
}

impl GraphAccessor {
    pub(crate) fn new(store: GraphStore, tx: TxId, snapshot: u64) -> Self {
        Self {
            store,
            tx,
            snapshot,
            command: AtomicU32::new(1),
            state: AtomicU8::new(STATE_ACTIVE),
            index_created: AtomicBool::new(false),
        }
    }

    pub fn transaction_id(&self) -> TxId {
        self.tx
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) == STATE_ACTIVE {
            Ok(())
        } else {
            Err(VesperError::TransactionInactive)
        }
    }

    fn stamp(&self) -> Stamp {
        Stamp {
            tx: self.tx,
            command: self.command.load(Ordering::Acquire),
            commit: None,
        }
    }

    fn visible(&self, created: &Stamp, deleted: &Option<Stamp>) -> bool {
        let command = self.command.load(Ordering::Acquire);
        let created_visible = if created.tx == self.tx {
            created.command < command
        } else {
            matches!(created.commit, Some(c) if c <= self.snapshot)
        };
        if !created_visible {
            return false;
        }
        match deleted {
            None => true,
            Some(d) if d.tx == self.tx => d.command >= command,
            Some(d) => !matches!(d.commit, Some(c) if c <= self.snapshot),
        }
    }

    // ---- name interning ----------------------------------------------------

    pub fn label_id(&self, name: &str) -> LabelId {
        LabelId(self.store.shared.names.write().labels.intern(name))
    }

    pub fn property_id(&self, name: &str) -> PropId {
        PropId(self.store.shared.names.write().properties.intern(name))
    }

    pub fn edge_type_id(&self, name: &str) -> EdgeTypeId {
        EdgeTypeId(self.store.shared.names.write().edge_types.intern(name))
    }

    pub fn label_name(&self, id: LabelId) -> String {
        self.store.shared.names.read().labels.name(id.0).to_owned()
    }

    pub fn property_name(&self, id: PropId) -> String {
        self.store.shared.names.read().properties.name(id.0).to_owned()
    }

    pub fn edge_type_name(&self, id: EdgeTypeId) -> String {
        self.store.shared.names.read().edge_types.name(id.0).to_owned()
    }

    // ---- writes ------------------------------------------------------------

    pub fn create_vertex(&self) -> Result<VertexId> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        inner.next_vertex_id += 1;
        let id = VertexId(inner.next_vertex_id);
        inner.vertices.insert(
            id,
            VertexRecord {
                created: self.stamp(),
                deleted: None,
                labels: Default::default(),
                props: BTreeMap::new(),
                out_edges: Default::default(),
                in_edges: Default::default(),
            },
        );
        Ok(id)
    }

    pub fn create_edge(
        &self,
        from: VertexId,
        to: VertexId,
        edge_type: EdgeTypeId,
    ) -> Result<EdgeRef> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        if !inner.vertices.contains_key(&from) || !inner.vertices.contains_key(&to) {
            return Err(VesperError::NotFound("vertex"));
        }
        inner.next_edge_id += 1;
        let id = EdgeId(inner.next_edge_id);
        inner.edges.insert(
            id,
            EdgeRecord {
                created: self.stamp(),
                deleted: None,
                from,
                to,
                edge_type,
                props: BTreeMap::new(),
            },
        );
        inner
            .vertices
            .get_mut(&from)
            .expect("endpoint checked above")
            .out_edges
            .push(id);
        inner
            .vertices
            .get_mut(&to)
            .expect("endpoint checked above")
            .in_edges
            .push(id);
        Ok(EdgeRef {
            id,
            from,
            to,
            edge_type,
        })
    }

    pub fn add_label(&self, vertex: VertexId, label: LabelId) -> Result<()> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        let record = inner
            .vertices
            .get_mut(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        if !record.labels.contains(&label) {
            record.labels.push(label);
        }
        let record = record.clone();
        index_remove(&mut inner, vertex);
        index_insert(&mut inner, vertex, &record);
        Ok(())
    }

    pub fn remove_label(&self, vertex: VertexId, label: LabelId) -> Result<()> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        let record = inner
            .vertices
            .get_mut(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        record.labels.retain(|l| *l != label);
        let record = record.clone();
        index_remove(&mut inner, vertex);
        index_insert(&mut inner, vertex, &record);
        Ok(())
    }

    /// Sets a vertex property. A null value erases the entry.
    pub fn set_vertex_property(
        &self,
        vertex: VertexId,
        prop: PropId,
        value: TypedValue,
    ) -> Result<()> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        let record = inner
            .vertices
            .get_mut(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        if value.is_null() {
            record.props.remove(&prop);
        } else {
            record.props.insert(prop, value);
        }
        let record = record.clone();
        index_remove(&mut inner, vertex);
        index_insert(&mut inner, vertex, &record);
        Ok(())
    }

    pub fn set_edge_property(&self, edge: EdgeId, prop: PropId, value: TypedValue) -> Result<()> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        let record = inner
            .edges
            .get_mut(&edge)
            .ok_or(VesperError::NotFound("edge"))?;
        if value.is_null() {
            record.props.remove(&prop);
        } else {
            record.props.insert(prop, value);
        }
        Ok(())
    }

    /// Deletes a vertex. Without `detach`, a vertex with visible incident
    /// edges is refused; with it, those edges are deleted first.
    pub fn delete_vertex(&self, vertex: VertexId, detach: bool) -> Result<()> {
        self.ensure_active()?;
        let incident: Vec<EdgeRef> = self.edges_of(vertex, Dir::Both)?;
        if !incident.is_empty() {
            if !detach {
                return Err(VesperError::VertexHasEdges);
            }
            for edge in &incident {
                self.delete_edge(edge.id)?;
            }
        }
        let mut inner = self.store.shared.inner.write();
        let stamp = self.stamp();
        let record = inner
            .vertices
            .get_mut(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        if record.deleted.is_none() {
            record.deleted = Some(stamp);
        }
        // Index postings keep the entry; probes re-check visibility, and an
        // abort would otherwise have to rebuild it.
        Ok(())
    }

    pub fn delete_edge(&self, edge: EdgeId) -> Result<()> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        let stamp = self.stamp();
        let record = inner
            .edges
            .get_mut(&edge)
            .ok_or(VesperError::NotFound("edge"))?;
        if record.deleted.is_none() {
            record.deleted = Some(stamp);
        }
        Ok(())
    }

    // ---- reads -------------------------------------------------------------

    pub fn labels_of(&self, vertex: VertexId) -> Result<Vec<LabelId>> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let record = inner
            .vertices
            .get(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        Ok(record.labels.to_vec())
    }

    pub fn has_label(&self, vertex: VertexId, label: LabelId) -> Result<bool> {
        Ok(self.labels_of(vertex)?.contains(&label))
    }

    /// All current properties of a vertex.
    pub fn vertex_properties(&self, vertex: VertexId) -> Result<Vec<(PropId, TypedValue)>> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let record = inner
            .vertices
            .get(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        Ok(record.props.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    /// Property of a frame-held vertex; absent reads as null.
    pub fn vertex_property(&self, vertex: VertexId, prop: PropId) -> Result<TypedValue> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let record = inner
            .vertices
            .get(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        Ok(record.props.get(&prop).cloned().unwrap_or(TypedValue::Null))
    }

    pub fn edge_property(&self, edge: EdgeId, prop: PropId) -> Result<TypedValue> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let record = inner
            .edges
            .get(&edge)
            .ok_or(VesperError::NotFound("edge"))?;
        Ok(record.props.get(&prop).cloned().unwrap_or(TypedValue::Null))
    }

    /// All visible vertices, in id order for reproducible scans.
    pub fn vertices(&self) -> Result<Vec<VertexId>> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let mut ids: Vec<VertexId> = inner
            .vertices
            .iter()
            .filter(|(_, r)| self.visible(&r.created, &r.deleted))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn vertices_by_label(&self, label: LabelId) -> Result<Vec<VertexId>> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let mut ids: Vec<VertexId> = inner
            .vertices
            .iter()
            .filter(|(_, r)| r.labels.contains(&label) && self.visible(&r.created, &r.deleted))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Equality probe. Uses the label+property index when one is registered,
    /// otherwise scans.
    pub fn vertices_by_label_property_value(
        &self,
        label: LabelId,
        prop: PropId,
        value: &TypedValue,
    ) -> Result<Vec<VertexId>> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let mut ids: Vec<VertexId> =
            if let (Some(postings), Some(key)) = (
                inner.indexes.get(&(label, prop)),
                PropKey::from_value(value),
            ) {
                postings
                    .get(&key)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default()
            } else {
                inner
                    .vertices
                    .iter()
                    .filter(|(_, r)| {
                        r.labels.contains(&label)
                            && r.props.get(&prop).is_some_and(|v| v.equals(value))
                    })
                    .map(|(id, _)| *id)
                    .collect()
            };
        ids.retain(|id| {
            inner
                .vertices
                .get(id)
                .is_some_and(|r| self.visible(&r.created, &r.deleted))
        });
        ids.sort_unstable();
        Ok(ids)
    }

    /// Range probe with independently inclusive/exclusive/unbounded ends.
    pub fn vertices_by_label_property_range(
        &self,
        label: LabelId,
        prop: PropId,
        lower: &Bound<TypedValue>,
        upper: &Bound<TypedValue>,
    ) -> Result<Vec<VertexId>> {
        self.ensure_active()?;
        let key_bound = |bound: &Bound<TypedValue>| -> Option<Bound<PropKey>> {
            match bound {
                Bound::Unbounded => Some(Bound::Unbounded),
                Bound::Included(v) => PropKey::from_value(v).map(Bound::Included),
                Bound::Excluded(v) => PropKey::from_value(v).map(Bound::Excluded),
            }
        };
        let inner = self.store.shared.inner.read();
        let mut ids: Vec<VertexId> = match (
            inner.indexes.get(&(label, prop)),
            key_bound(lower),
            key_bound(upper),
        ) {
            (Some(postings), Some(lo), Some(hi)) => postings
                .range((lo, hi))
                .flat_map(|(_, set)| set.iter().copied())
                .collect(),
            _ => inner
                .vertices
                .iter()
                .filter(|(_, r)| {
                    r.labels.contains(&label)
                        && r.props
                            .get(&prop)
                            .is_some_and(|v| value_in_range(v, lower, upper))
                })
                .map(|(id, _)| *id)
                .collect(),
        };
        ids.retain(|id| {
            inner
                .vertices
                .get(id)
                .is_some_and(|r| self.visible(&r.created, &r.deleted))
        });
        ids.sort_unstable();
        Ok(ids)
    }

    /// Visible edges incident to `vertex` in the given direction.
    pub fn edges_of(&self, vertex: VertexId, dir: Dir) -> Result<Vec<EdgeRef>> {
        self.ensure_active()?;
        let inner = self.store.shared.inner.read();
        let record = inner
            .vertices
            .get(&vertex)
            .ok_or(VesperError::NotFound("vertex"))?;
        let candidates: Vec<EdgeId> = match dir {
            Dir::Out => record.out_edges.to_vec(),
            Dir::In => record.in_edges.to_vec(),
            Dir::Both => {
                let mut all = record.out_edges.to_vec();
                // A self-loop appears in both adjacency lists once.
                for id in record.in_edges.iter() {
                    if !all.contains(id) {
                        all.push(*id);
                    }
                }
                all
            }
        };
        let mut refs = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(edge) = inner.edges.get(&id) else {
                continue;
            };
            if self.visible(&edge.created, &edge.deleted) {
                refs.push(EdgeRef {
                    id,
                    from: edge.from,
                    to: edge.to,
                    edge_type: edge.edge_type,
                });
            }
        }
        refs.sort_unstable_by_key(|e| e.id);
        Ok(refs)
    }

    // ---- statistics & indexes ---------------------------------------------

    /// Approximate cardinalities for the cost model. Deleted-but-unvacuumed
    /// records are counted; precision is not a goal here.
    pub fn vertices_count(&self) -> usize {
        self.store.shared.inner.read().vertices.len()
    }

    pub fn edges_count(&self) -> usize {
        self.store.shared.inner.read().edges.len()
    }

    pub fn vertices_count_by_label(&self, label: LabelId) -> usize {
        self.store
            .shared
            .inner
            .read()
            .vertices
            .values()
            .filter(|r| r.labels.contains(&label))
            .count()
    }

    pub fn label_property_index_exists(&self, label: LabelId, prop: PropId) -> bool {
        self.store.shared.inner.read().indexes.contains_key(&(label, prop))
    }

    /// Registers a label+property index and backfills it from current
    /// records. Sets the index-created flag picked up by the plan cache.
    pub fn create_index(&self, label: LabelId, prop: PropId) -> Result<()> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        inner.indexes.entry((label, prop)).or_default();
        let vertices: Vec<(VertexId, VertexRecord)> = inner
            .vertices
            .iter()
            .map(|(id, r)| (*id, r.clone()))
            .collect();
        for (id, record) in vertices {
            index_insert(&mut inner, id, &record);
        }
        self.index_created.store(true, Ordering::Release);
        debug!(label = label.0, property = prop.0, "created label+property index");
        Ok(())
    }

    pub fn is_index_created(&self) -> bool {
        self.index_created.load(Ordering::Acquire)
    }

    // ---- transaction control ----------------------------------------------

    /// Makes writes of earlier commands visible to subsequent reads.
    pub fn advance_command(&self) {
        self.command.fetch_add(1, Ordering::AcqRel);
    }

    pub fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        let mut inner = self.store.shared.inner.write();
        inner.commit_seq += 1;
        let seq = inner.commit_seq;
        for record in inner.vertices.values_mut() {
            if record.created.tx == self.tx {
                record.created.commit = Some(seq);
            }
            if let Some(d) = &mut record.deleted {
                if d.tx == self.tx {
                    d.commit = Some(seq);
                }
            }
        }
        for record in inner.edges.values_mut() {
            if record.created.tx == self.tx {
                record.created.commit = Some(seq);
            }
            if let Some(d) = &mut record.deleted {
                if d.tx == self.tx {
                    d.commit = Some(seq);
                }
            }
        }
        self.state.store(STATE_COMMITTED, Ordering::Release);
        debug!(tx = self.tx, seq, "transaction committed");
        Ok(())
    }

    /// Rolls back record creations and deletions of this transaction and
    /// deactivates the accessor.
    pub fn abort(&self) {
        if self.ensure_active().is_err() {
            return;
        }
        let mut inner = self.store.shared.inner.write();
        let own: Vec<VertexId> = inner
            .vertices
            .iter()
            .filter(|(_, r)| r.created.tx == self.tx)
            .map(|(id, _)| *id)
            .collect();
        for id in &own {
            inner.vertices.remove(id);
            index_remove(&mut inner, *id);
        }
        inner.edges.retain(|_, r| r.created.tx != self.tx);
        for record in inner.vertices.values_mut() {
            if record.deleted.is_some_and(|d| d.tx == self.tx) {
                record.deleted = None;
            }
        }
        for record in inner.edges.values_mut() {
            if record.deleted.is_some_and(|d| d.tx == self.tx) {
                record.deleted = None;
            }
        }
        self.state.store(STATE_ABORTED, Ordering::Release);
        debug!(tx = self.tx, "transaction aborted");
    }
}

fn value_in_range(
    value: &TypedValue,
    lower: &Bound<TypedValue>,
    upper: &Bound<TypedValue>,
) -> bool {
    use std::cmp::Ordering as O;
    let above_lower = match lower {
        Bound::Unbounded => true,
        Bound::Included(b) => matches!(value.try_cmp(b), Ok(O::Greater | O::Equal)),
        Bound::Excluded(b) => matches!(value.try_cmp(b), Ok(O::Greater)),
    };
    let below_upper = match upper {
        Bound::Unbounded => true,
        Bound::Included(b) => matches!(value.try_cmp(b), Ok(O::Less | O::Equal)),
        Bound::Excluded(b) => matches!(value.try_cmp(b), Ok(O::Less)),
    };
    above_lower && below_upper
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use super::Dir;
    use crate::query::value::TypedValue;
    use crate::storage::GraphStore;
    use crate::types::VesperError;

    #[test]
    fn own_writes_visible_after_command_advance() {
        let store = GraphStore::new();
        let accessor = store.access();
        let v = accessor.create_vertex().unwrap();
        assert!(accessor.vertices().unwrap().is_empty());
        accessor.advance_command();
        assert_eq!(accessor.vertices().unwrap(), vec![v]);
    }

    #[test]
    fn committed_writes_visible_to_later_transactions_only() {
        let store = GraphStore::new();
        let writer = store.access();
        writer.create_vertex().unwrap();
        let concurrent = store.access();
        writer.commit().unwrap();
        // Snapshot taken before the commit stays empty.
        assert!(concurrent.vertices().unwrap().is_empty());
        assert_eq!(store.access().vertices().unwrap().len(), 1);
    }

    #[test]
    fn abort_rolls_back_creations_and_deletions() {
        let store = GraphStore::new();
        let setup = store.access();
        let kept = setup.create_vertex().unwrap();
        setup.commit().unwrap();

        let accessor = store.access();
        accessor.create_vertex().unwrap();
        accessor.delete_vertex(kept, false).unwrap();
        accessor.abort();

        let reader = store.access();
        assert_eq!(reader.vertices().unwrap(), vec![kept]);
        assert!(matches!(
            accessor.vertices(),
            Err(VesperError::TransactionInactive)
        ));
    }

    #[test]
    fn delete_vertex_with_edges_requires_detach() {
        let store = GraphStore::new();
        let setup = store.access();
        let a = setup.create_vertex().unwrap();
        let b = setup.create_vertex().unwrap();
        let t = setup.edge_type_id("Knows");
        setup.create_edge(a, b, t).unwrap();
        setup.commit().unwrap();

        let accessor = store.access();
        assert!(matches!(
            accessor.delete_vertex(a, false),
            Err(VesperError::VertexHasEdges)
        ));
        accessor.delete_vertex(a, true).unwrap();
        accessor.advance_command();
        assert_eq!(accessor.vertices().unwrap(), vec![b]);
        assert!(accessor.edges_of(b, Dir::Both).unwrap().is_empty());
    }

    #[test]
    fn index_probe_matches_scan() {
        let store = GraphStore::new();
        let setup = store.access();
        let label = setup.label_id("Person");
        let prop = setup.property_id("age");
        for age in [10i64, 20, 30, 40] {
            let v = setup.create_vertex().unwrap();
            setup.add_label(v, label).unwrap();
            setup.set_vertex_property(v, prop, TypedValue::Int(age)).unwrap();
        }
        setup.commit().unwrap();

        let probe = store.access();
        let unindexed = probe
            .vertices_by_label_property_range(
                label,
                prop,
                &Bound::Included(TypedValue::Int(20)),
                &Bound::Excluded(TypedValue::Int(40)),
            )
            .unwrap();
        probe.create_index(label, prop).unwrap();
        assert!(probe.is_index_created());
        let indexed = probe
            .vertices_by_label_property_range(
                label,
                prop,
                &Bound::Included(TypedValue::Int(20)),
                &Bound::Excluded(TypedValue::Int(40)),
            )
            .unwrap();
        assert_eq!(unindexed, indexed);
        assert_eq!(indexed.len(), 2);

        let eq = probe
            .vertices_by_label_property_value(label, prop, &TypedValue::Int(30))
            .unwrap();
        assert_eq!(eq.len(), 1);
    }

    #[test]
    fn direction_both_sees_each_incident_edge_once() {
        let store = GraphStore::new();
        let setup = store.access();
        let a = setup.create_vertex().unwrap();
        let t = setup.edge_type_id("Loop");
        setup.create_edge(a, a, t).unwrap();
        setup.commit().unwrap();

        let reader = store.access();
        assert_eq!(reader.edges_of(a, Dir::Both).unwrap().len(), 1);
    }
}
