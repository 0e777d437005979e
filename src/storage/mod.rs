//! In-memory transactional property graph.
//!
//! The store keeps multi-version vertex and edge records guarded by a single
//! lock; record-level versioning is limited to create/delete stamps, which is
//! what the query layer's visibility rules need. Property payloads are
//! updated in place under the single-writer-per-transaction discipline; full
//! record versioning belongs to the MVCC collaborator and stays outside this
//! crate.

mod accessor;

pub use accessor::{Dir, GraphAccessor};

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::query::value::TypedValue;
use crate::types::{CommandId, EdgeId, EdgeTypeId, LabelId, PropId, TxId, VertexId};

/// Transaction/command pair plus the global commit sequence once committed.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Stamp {
    pub tx: TxId,
    pub command: CommandId,
    pub commit: Option<u64>,
}

#[derive(Clone, Debug)]
pub(crate) struct VertexRecord {
    pub created: Stamp,
    pub deleted: Option<Stamp>,
    pub labels: SmallVec<[LabelId; 4]>,
    pub props: BTreeMap<PropId, TypedValue>,
    pub out_edges: SmallVec<[EdgeId; 4]>,
    pub in_edges: SmallVec<[EdgeId; 4]>,
}

#[derive(Clone, Debug)]
pub(crate) struct EdgeRecord {
    pub created: Stamp,
    pub deleted: Option<Stamp>,
    pub from: VertexId,
    pub to: VertexId,
    pub edge_type: EdgeTypeId,
    pub props: BTreeMap<PropId, TypedValue>,
}

/// Index key over the property kinds a label+property index accepts.
/// Numerics collapse onto one axis so a range over integers also captures
/// floats inside the bounds.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PropKey {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Eq for PropKey {}

impl PartialOrd for PropKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use PropKey::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Num(a), Num(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bool(_), _) => std::cmp::Ordering::Less,
            (_, Bool(_)) => std::cmp::Ordering::Greater,
            (Num(_), _) => std::cmp::Ordering::Less,
            (_, Num(_)) => std::cmp::Ordering::Greater,
        }
    }
}

impl PropKey {
    pub fn from_value(value: &TypedValue) -> Option<PropKey> {
        match value {
            TypedValue::Bool(b) => Some(PropKey::Bool(*b)),
            TypedValue::Int(i) => Some(PropKey::Num(*i as f64)),
            TypedValue::Float(f) => Some(PropKey::Num(*f)),
            TypedValue::String(s) => Some(PropKey::Str(s.clone())),
            _ => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct NameTable {
    by_name: HashMap<String, u32>,
    by_id: Vec<String>,
}

impl NameTable {
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = self.by_id.len() as u32;
        self.by_name.insert(name.to_owned(), id);
        self.by_id.push(name.to_owned());
        id
    }

    pub fn name(&self, id: u32) -> &str {
        &self.by_id[id as usize]
    }
}

#[derive(Default)]
pub(crate) struct StoreInner {
    pub vertices: HashMap<VertexId, VertexRecord>,
    pub edges: HashMap<EdgeId, EdgeRecord>,
    pub next_vertex_id: u64,
    pub next_edge_id: u64,
    pub next_tx: TxId,
    pub commit_seq: u64,
    /// Registered label+property indexes with their posting trees.
    pub indexes: HashMap<(LabelId, PropId), BTreeMap<PropKey, FxHashSet<VertexId>>>,
}

#[derive(Default)]
pub(crate) struct NameTables {
    pub labels: NameTable,
    pub properties: NameTable,
    pub edge_types: NameTable,
}

#[derive(Default)]
pub(crate) struct StoreShared {
    pub inner: RwLock<StoreInner>,
    pub names: RwLock<NameTables>,
}

/// Shared graph store handle; clones are cheap and refer to the same store.
/// Hand out per-transaction views with [`GraphStore::access`].
#[derive(Clone, Default)]
pub struct GraphStore {
    pub(crate) shared: Arc<StoreShared>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh transaction over the current committed state.
    pub fn access(&self) -> GraphAccessor {
        let (tx, snapshot) = {
            let mut inner = self.shared.inner.write();
            inner.next_tx += 1;
            (inner.next_tx, inner.commit_seq)
        };
        GraphAccessor::new(self.clone(), tx, snapshot)
    }
}

pub(crate) fn index_insert(inner: &mut StoreInner, vertex: VertexId, record: &VertexRecord) {
    for (&(label, prop), postings) in inner.indexes.iter_mut() {
        if !record.labels.contains(&label) {
            continue;
        }
        let Some(key) = record.props.get(&prop).and_then(PropKey::from_value) else {
            continue;
        };
        postings.entry(key).or_default().insert(vertex);
    }
}

pub(crate) fn index_remove(inner: &mut StoreInner, vertex: VertexId) {
    for postings in inner.indexes.values_mut() {
        for set in postings.values_mut() {
            set.remove(&vertex);
        }
    }
}
