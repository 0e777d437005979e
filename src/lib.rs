//! vesper: a property-graph query interpreter with a pull-based operator
//! tree and length-prefixed intra-cluster RPC.

pub mod config;
pub mod primitives;
pub mod query;
pub mod rpc;
pub mod storage;
pub mod types;

pub use crate::config::QueryFlags;
pub use crate::query::{Interpreter, QueryError, QueryStream, StreamCollector, TypedValue};
pub use crate::storage::{GraphAccessor, GraphStore};
pub use crate::types::{Result, VesperError};
