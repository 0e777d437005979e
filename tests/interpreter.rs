//! Interpreter pipeline behavior: parameters, caching, headers, summaries,
//! administrative statements.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vesper::query::ast::AuthAction;
use vesper::query::context::{AuthHandler, StreamRegistry};
use vesper::query::errors::QueryError;
use vesper::query::privileges::Privilege;
use vesper::{GraphStore, Interpreter, QueryFlags, StreamCollector, TypedValue};

fn interpreter() -> Interpreter {
    Interpreter::new(QueryFlags::default()).unwrap()
}

fn run(
    interpreter: &Interpreter,
    store: &GraphStore,
    query: &str,
) -> Result<StreamCollector, QueryError> {
    let accessor = store.access();
    let mut collector = StreamCollector::new();
    interpreter.interpret(query, &accessor, &mut collector, &HashMap::new(), false)?;
    accessor.commit().unwrap();
    Ok(collector)
}

#[test]
fn unprovided_parameter_fails_without_rows_or_summary() {
    let store = GraphStore::new();
    let accessor = store.access();
    let mut collector = StreamCollector::new();
    let err = interpreter()
        .interpret(
            "MATCH (n {name: $x}) RETURN n",
            &accessor,
            &mut collector,
            &HashMap::new(),
            false,
        )
        .unwrap_err();
    assert_eq!(err, QueryError::UnprovidedParameter("x".to_owned()));
    assert!(collector.results().is_empty());
    assert!(!collector.has_summary());
}

#[test]
fn provided_parameters_reach_execution() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    run(&interpreter, &store, "CREATE (:P {name: 'ann'}), (:P {name: 'bob'})").unwrap();

    let accessor = store.access();
    let mut collector = StreamCollector::new();
    let mut params = HashMap::new();
    params.insert("x".to_owned(), TypedValue::from("ann"));
    interpreter
        .interpret(
            "MATCH (n:P {name: $x}) RETURN n",
            &accessor,
            &mut collector,
            &params,
            false,
        )
        .unwrap();
    assert_eq!(collector.results().len(), 1);
}

#[test]
fn summary_carries_timings_cost_and_type() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    let collector = run(&interpreter, &store, "UNWIND [1, 2] AS x RETURN x").unwrap();
    let summary = collector.summary();
    for key in [
        "parsing_time",
        "planning_time",
        "plan_execution_time",
        "cost_estimate",
    ] {
        assert!(
            matches!(summary.get(key), Some(TypedValue::Float(v)) if *v >= 0.0),
            "missing {key}"
        );
    }
    assert!(matches!(summary.get("type"), Some(TypedValue::String(s)) if s == "rw"));
}

#[test]
fn header_prefers_user_written_text_and_aliases() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    run(&interpreter, &store, "CREATE (:P {id: 7})").unwrap();
    let collector = run(
        &interpreter,
        &store,
        "MATCH (p:P) RETURN p.id, p.id AS renamed",
    )
    .unwrap();
    assert_eq!(collector.header(), ["p.id", "renamed"]);
}

#[test]
fn write_query_emits_empty_header_and_summary_only() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    let collector = run(&interpreter, &store, "CREATE (:OnlyWrite)").unwrap();
    assert!(collector.header().is_empty());
    assert!(collector.results().is_empty());
    assert!(collector.has_summary());
}

#[test]
fn plans_are_cached_by_stripped_shape() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    run(&interpreter, &store, "MATCH (n {v: 1}) RETURN n").unwrap();
    assert_eq!(interpreter.plan_cache_len(), 1);
    // A different literal value strips to the same shape: no second entry.
    run(&interpreter, &store, "MATCH (n {v: 2}) RETURN n").unwrap();
    assert_eq!(interpreter.plan_cache_len(), 1);
    run(&interpreter, &store, "MATCH (n {v: 2, w: 3}) RETURN n").unwrap();
    assert_eq!(interpreter.plan_cache_len(), 2);
}

#[test]
fn disabled_plan_cache_stays_empty() {
    let flags = QueryFlags {
        query_plan_cache: false,
        ..QueryFlags::default()
    };
    let interpreter = Interpreter::new(flags).unwrap();
    let store = GraphStore::new();
    run(&interpreter, &store, "MATCH (n) RETURN n").unwrap();
    assert_eq!(interpreter.plan_cache_len(), 0);
}

#[test]
fn index_creation_invalidates_the_plan_cache() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    run(&interpreter, &store, "MATCH (n:L) RETURN n").unwrap();
    run(&interpreter, &store, "MATCH (m:L {p: 1}) RETURN m").unwrap();
    assert_eq!(interpreter.plan_cache_len(), 2);
    run(&interpreter, &store, "CREATE INDEX ON :L(p)").unwrap();
    assert_eq!(interpreter.plan_cache_len(), 0);
}

#[test]
fn index_is_selected_after_creation() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    run(&interpreter, &store, "CREATE (:L {p: 1}), (:L {p: 2})").unwrap();
    run(&interpreter, &store, "CREATE INDEX ON :L(p)").unwrap();

    let collector = run(
        &interpreter,
        &store,
        "EXPLAIN MATCH (n:L {p: 1}) RETURN n",
    )
    .unwrap();
    assert_eq!(collector.header(), ["QUERY PLAN"]);
    let plan_text: Vec<String> = collector
        .results()
        .iter()
        .map(|row| row[0].to_string())
        .collect();
    assert!(
        plan_text
            .iter()
            .any(|line| line.contains("ScanAllByLabelPropertyValue")),
        "expected an index scan in: {plan_text:?}"
    );

    let collector = run(
        &interpreter,
        &store,
        "EXPLAIN MATCH (n:L) WHERE n.p > 0 RETURN n",
    )
    .unwrap();
    let plan_text: Vec<String> = collector
        .results()
        .iter()
        .map(|row| row[0].to_string())
        .collect();
    assert!(
        plan_text
            .iter()
            .any(|line| line.contains("ScanAllByLabelPropertyRange")),
        "expected a range scan in: {plan_text:?}"
    );
}

#[test]
fn explain_does_not_execute_the_plan() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    run(&interpreter, &store, "EXPLAIN CREATE (:Side)").unwrap();
    let collector = run(&interpreter, &store, "MATCH (n:Side) RETURN n").unwrap();
    assert!(collector.results().is_empty());
}

#[test]
fn syntax_and_semantic_errors_are_classified() {
    let store = GraphStore::new();
    let interpreter = interpreter();
    assert!(matches!(
        run(&interpreter, &store, "MATCH (n RETURN n").unwrap_err(),
        QueryError::Syntax { .. }
    ));
    assert!(matches!(
        run(&interpreter, &store, "MATCH (n) RETURN missing").unwrap_err(),
        QueryError::Semantic(_)
    ));
}

#[test]
fn startup_rejects_out_of_range_flags() {
    let flags = QueryFlags {
        query_plan_cache_ttl: -5,
        ..QueryFlags::default()
    };
    assert!(Interpreter::new(flags).is_err());
}

#[derive(Default)]
struct RecordingAuth {
    applied: AtomicUsize,
    checked: AtomicUsize,
}

impl AuthHandler for RecordingAuth {
    fn apply(&self, action: &AuthAction) -> Result<(), QueryError> {
        assert!(matches!(
            action,
            AuthAction::CreateUser { name } if name == "alice"
        ));
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check(&self, required: &[Privilege]) -> Result<(), QueryError> {
        self.checked.fetch_add(1, Ordering::SeqCst);
        if required.contains(&Privilege::Delete) {
            return Err(QueryError::semantic("permission denied"));
        }
        Ok(())
    }
}

#[test]
fn auth_handler_receives_actions_and_privilege_checks() {
    let auth = Arc::new(RecordingAuth::default());
    let interpreter =
        Interpreter::new(QueryFlags::default()).unwrap().with_auth_handler(auth.clone());
    let store = GraphStore::new();

    run(&interpreter, &store, "CREATE USER alice").unwrap();
    assert_eq!(auth.applied.load(Ordering::SeqCst), 1);

    let err = run(&interpreter, &store, "MATCH (n) DELETE n").unwrap_err();
    assert!(matches!(err, QueryError::Semantic(_)));
    assert!(auth.checked.load(Ordering::SeqCst) >= 2);
}

#[derive(Default)]
struct RecordingStreams {
    log: parking_lot::Mutex<Vec<String>>,
}

impl StreamRegistry for RecordingStreams {
    fn create_stream(
        &self,
        name: &str,
        uri: &str,
        _batch_interval_ms: Option<i64>,
        batch_size: Option<i64>,
    ) -> Result<(), QueryError> {
        self.log
            .lock()
            .push(format!("create {name} {uri} {batch_size:?}"));
        Ok(())
    }
    fn drop_stream(&self, name: &str) -> Result<(), QueryError> {
        self.log.lock().push(format!("drop {name}"));
        Ok(())
    }
    fn show_streams(&self) -> Result<Vec<String>, QueryError> {
        self.log.lock().push("show".to_owned());
        Ok(Vec::new())
    }
    fn start_stream(&self, name: &str, limit: Option<i64>) -> Result<(), QueryError> {
        self.log.lock().push(format!("start {name} {limit:?}"));
        Ok(())
    }
    fn stop_stream(&self, name: &str) -> Result<(), QueryError> {
        self.log.lock().push(format!("stop {name}"));
        Ok(())
    }
    fn start_all_streams(&self) -> Result<(), QueryError> {
        self.log.lock().push("start-all".to_owned());
        Ok(())
    }
    fn stop_all_streams(&self) -> Result<(), QueryError> {
        self.log.lock().push("stop-all".to_owned());
        Ok(())
    }
    fn test_stream(&self, name: &str, limit: Option<i64>) -> Result<(), QueryError> {
        self.log.lock().push(format!("test {name} {limit:?}"));
        Ok(())
    }
}

#[test]
fn stream_statements_reach_the_registry() {
    let streams = Arc::new(RecordingStreams::default());
    let interpreter = Interpreter::new(QueryFlags::default())
        .unwrap()
        .with_stream_registry(streams.clone());
    let store = GraphStore::new();

    run(
        &interpreter,
        &store,
        "CREATE STREAM feed AS LOAD DATA KAFKA 'broker/topic' BATCH SIZE 10",
    )
    .unwrap();
    run(&interpreter, &store, "START STREAM feed LIMIT 5").unwrap();
    run(&interpreter, &store, "SHOW STREAMS").unwrap();
    run(&interpreter, &store, "STOP ALL STREAMS").unwrap();
    run(&interpreter, &store, "TEST STREAM feed").unwrap();
    run(&interpreter, &store, "DROP STREAM feed").unwrap();

    let log = streams.log.lock().clone();
    assert_eq!(
        log,
        vec![
            "create feed broker/topic Some(10)",
            "start feed Some(5)",
            "show",
            "stop-all",
            "test feed None",
            "drop feed",
        ]
    );
}

#[test]
fn stream_statement_without_registry_fails() {
    let store = GraphStore::new();
    let err = run(&interpreter(), &store, "SHOW STREAMS").unwrap_err();
    assert!(matches!(err, QueryError::Runtime(_)));
}
