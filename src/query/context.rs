//! Per-execution context threaded through cursors and the evaluator.

use crate::query::ast::AuthAction;
use crate::query::errors::QueryError;
use crate::query::privileges::Privilege;
use crate::query::symbols::SymbolTable;
use crate::query::value::TypedValue;
use crate::storage::GraphAccessor;

/// Insertion-ordered mapping from placeholder position to value. Populated
/// from the stripped query's literals plus the caller's `$name` bindings.
#[derive(Clone, Debug, Default)]
pub struct Parameters {
    entries: Vec<(usize, TypedValue)>,
}

impl Parameters {
    pub fn add(&mut self, position: usize, value: TypedValue) {
        self.entries.push((position, value));
    }

    pub fn get(&self, position: usize) -> Option<&TypedValue> {
        self.entries
            .iter()
            .find(|(pos, _)| *pos == position)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Authorization collaborator. The backend itself is out of scope; the
/// interpreter only needs these two capabilities.
pub trait AuthHandler: Send + Sync {
    fn apply(&self, action: &AuthAction) -> Result<(), QueryError>;

    /// Called before execution with the privileges the query requires.
    fn check(&self, required: &[Privilege]) -> Result<(), QueryError> {
        let _ = required;
        Ok(())
    }
}

/// Stream-source collaborator backing the stream administration operators.
/// The connector is out of scope; this is its named interface.
pub trait StreamRegistry: Send + Sync {
    fn create_stream(
        &self,
        name: &str,
        uri: &str,
        batch_interval_ms: Option<i64>,
        batch_size: Option<i64>,
    ) -> Result<(), QueryError>;
    fn drop_stream(&self, name: &str) -> Result<(), QueryError>;
    fn show_streams(&self) -> Result<Vec<String>, QueryError>;
    fn start_stream(&self, name: &str, limit: Option<i64>) -> Result<(), QueryError>;
    fn stop_stream(&self, name: &str) -> Result<(), QueryError>;
    fn start_all_streams(&self) -> Result<(), QueryError>;
    fn stop_all_streams(&self) -> Result<(), QueryError>;
    fn test_stream(&self, name: &str, limit: Option<i64>) -> Result<(), QueryError>;
}

/// State shared by all cursors of one execution.
pub struct ExecutionContext<'a> {
    pub accessor: &'a GraphAccessor,
    pub symbol_table: SymbolTable,
    pub parameters: Parameters,
    pub in_explicit_transaction: bool,
    pub auth: Option<&'a dyn AuthHandler>,
    pub streams: Option<&'a dyn StreamRegistry>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(accessor: &'a GraphAccessor) -> Self {
        Self {
            accessor,
            symbol_table: SymbolTable::default(),
            parameters: Parameters::default(),
            in_explicit_transaction: false,
            auth: None,
            streams: None,
        }
    }

    pub(crate) fn auth_handler(&self) -> Result<&dyn AuthHandler, QueryError> {
        self.auth
            .ok_or_else(|| QueryError::runtime("no auth handler configured"))
    }

    pub(crate) fn stream_registry(&self) -> Result<&dyn StreamRegistry, QueryError> {
        self.streams
            .ok_or_else(|| QueryError::runtime("no stream registry configured"))
    }
}
