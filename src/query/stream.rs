//! Result stream capability and a collecting implementation.

use std::collections::BTreeMap;

use crate::query::errors::QueryError;
use crate::query::value::TypedValue;

/// Where result rows go. Calls arrive strictly as header, zero or more
/// results, then exactly one summary; a failed execution emits no summary.
pub trait QueryStream {
    fn header(&mut self, names: Vec<String>) -> Result<(), QueryError>;
    fn result(&mut self, values: Vec<TypedValue>) -> Result<(), QueryError>;
    fn summary(&mut self, summary: BTreeMap<String, TypedValue>) -> Result<(), QueryError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CollectorState {
    Start,
    WritingResults,
    Done,
}

/// Collecting stream that asserts call order; used by tests and embedders
/// that want materialized results.
#[derive(Debug)]
pub struct StreamCollector {
    state: CollectorState,
    header: Vec<String>,
    results: Vec<Vec<TypedValue>>,
    summary: Option<BTreeMap<String, TypedValue>>,
}

impl Default for StreamCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCollector {
    pub fn new() -> Self {
        Self {
            state: CollectorState::Start,
            header: Vec::new(),
            results: Vec::new(),
            summary: None,
        }
    }

    pub fn header(&self) -> &[String] {
        assert!(
            self.state != CollectorState::Start,
            "header was never written"
        );
        &self.header
    }

    pub fn results(&self) -> &[Vec<TypedValue>] {
        &self.results
    }

    pub fn summary(&self) -> &BTreeMap<String, TypedValue> {
        assert!(
            self.state == CollectorState::Done,
            "summary was never written"
        );
        self.summary.as_ref().expect("state checked above")
    }

    pub fn has_summary(&self) -> bool {
        self.state == CollectorState::Done
    }
}

impl QueryStream for StreamCollector {
    fn header(&mut self, names: Vec<String>) -> Result<(), QueryError> {
        assert!(
            self.state == CollectorState::Start,
            "header can only be written at the beginning"
        );
        self.header = names;
        self.state = CollectorState::WritingResults;
        Ok(())
    }

    fn result(&mut self, values: Vec<TypedValue>) -> Result<(), QueryError> {
        assert!(
            self.state == CollectorState::WritingResults,
            "results are only accepted between header and summary"
        );
        self.results.push(values);
        Ok(())
    }

    fn summary(&mut self, summary: BTreeMap<String, TypedValue>) -> Result<(), QueryError> {
        assert!(self.state != CollectorState::Done, "summary already written");
        self.summary = Some(summary);
        self.state = CollectorState::Done;
        Ok(())
    }
}
