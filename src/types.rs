//! Core identifier types and the crate-wide error/result pair.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VesperError>;

/// Identifier of a vertex record. Cluster-wide logical address.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct VertexId(pub u64);

/// Identifier of an edge record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

/// Interned vertex label.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct LabelId(pub u32);

/// Interned property key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PropId(pub u32);

/// Interned edge type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct EdgeTypeId(pub u32);

/// Transaction identifier handed out by the graph store.
pub type TxId = u64;

/// Intra-transaction command counter. Writes made in command `n` become
/// visible to reads at commands greater than `n`.
pub type CommandId = u32;

/// Errors raised below the query layer: storage, transactions, configuration.
#[derive(Debug, Error)]
pub enum VesperError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transaction no longer active")]
    TransactionInactive,
    #[error("cannot delete a vertex with remaining edges")]
    VertexHasEdges,
    #[error("configuration rejected: {0}")]
    Config(String),
}
