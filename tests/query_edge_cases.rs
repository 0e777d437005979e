//! Edge cases in operator behavior that need whole-pipeline coverage, tested
//! end to end through the interpreter.

use std::collections::HashMap;

use vesper::query::errors::QueryError;
use vesper::{GraphAccessor, GraphStore, Interpreter, QueryFlags, StreamCollector, TypedValue};

struct QueryExecution {
    store: GraphStore,
    interpreter: Interpreter,
    accessor: GraphAccessor,
}

impl QueryExecution {
    fn new() -> Self {
        // Left-to-right planning; several tests depend on the written order.
        let flags = QueryFlags {
            query_cost_planner: false,
            ..QueryFlags::default()
        };
        let store = GraphStore::new();
        let accessor = store.access();
        Self {
            store,
            interpreter: Interpreter::new(flags).unwrap(),
            accessor,
        }
    }

    /// Commits the current transaction and opens a fresh accessor.
    fn commit(&mut self) {
        self.accessor.commit().unwrap();
        self.accessor = self.store.access();
    }

    /// Executes the query and returns the rows. Does not commit.
    fn execute(&self, query: &str) -> Vec<Vec<TypedValue>> {
        self.try_execute(query).unwrap()
    }

    fn try_execute(&self, query: &str) -> Result<Vec<Vec<TypedValue>>, QueryError> {
        let mut results = StreamCollector::new();
        self.interpreter.interpret(
            query,
            &self.accessor,
            &mut results,
            &HashMap::new(),
            false,
        )?;
        Ok(results.results().to_vec())
    }
}

#[test]
fn missing_optional_into_expand() {
    // Expanding from null (an unmatched preceding optional match) must not
    // exhaust the expansion cursor while its input still has rows.
    let mut execution = QueryExecution::new();
    execution.execute(
        "CREATE (a:Person {id: 1}), (b:Person {id: 2})-[:Has]->(:Dog)-[:Likes]->(:Food)",
    );
    execution.commit();
    assert_eq!(execution.execute("MATCH (n) RETURN n").len(), 4);

    let run = |desc: bool, edge_pattern: &str| {
        let query = format!(
            "MATCH (p:Person) WITH p ORDER BY p.id {}OPTIONAL MATCH (p)-->(d:Dog) WITH p, d \
             MATCH (d){}(f:Food) RETURN p, d, f",
            if desc { "DESC " } else { "" },
            edge_pattern,
        );
        execution.execute(&query).len()
    };

    let expand = "-->";
    let variable = "-[*1]->";
    let bfs = "-[*bfs..1]->";

    assert_eq!(run(false, expand), 1);
    assert_eq!(run(true, expand), 1);
    assert_eq!(run(false, variable), 1);
    assert_eq!(run(true, bfs), 1);
    assert_eq!(run(true, bfs), 1);
}

#[test]
fn edge_uniqueness_in_optional() {
    // An edge-uniqueness check must not fail when the edge is null due to an
    // optional match; a single OPTIONAL MATCH with two expansions covers it.
    let mut execution = QueryExecution::new();
    execution.execute("CREATE (), ()-[:Type]->()");
    execution.commit();
    assert_eq!(execution.execute("MATCH (n) RETURN n").len(), 3);
    assert_eq!(
        execution
            .execute("MATCH (n) OPTIONAL MATCH (n)-[r1]->(), (n)-[r2]->() RETURN n, r1, r2")
            .len(),
        3
    );
}

#[test]
fn disconnected_patterns_produce_the_cross_product() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE (:L {v: 1}), (:L {v: 2})");
    execution.commit();
    assert_eq!(execution.execute("MATCH (a), (b) RETURN a, b").len(), 4);
    assert_eq!(
        execution.execute("MATCH (a:L), (b:L), (c:L) RETURN a, b, c").len(),
        8
    );
}

#[test]
fn edge_uniqueness_applies_across_disconnected_patterns() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE ()-[:T]->()");
    execution.commit();
    // Both sides of the cross join can only bind the single edge, so the
    // uniqueness check drops every combination.
    assert_eq!(
        execution
            .execute("MATCH (a)-[r1]->(b), (c)-[r2]->(d) RETURN r1, r2")
            .len(),
        0
    );
}

#[test]
fn edge_uniqueness_drops_duplicate_edges() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE ()-[:T]->()");
    execution.commit();
    // Without uniqueness both r1 and r2 would bind the same edge.
    assert_eq!(
        execution
            .execute("MATCH (a)-[r1]->(b), (a)-[r2]->(c) RETURN r1, r2")
            .len(),
        0
    );
}

#[test]
fn ungrouped_aggregation_over_empty_input() {
    let execution = QueryExecution::new();
    let rows = execution.execute(
        "MATCH (n:Missing) RETURN count(n) AS c, sum(n.x) AS s, avg(n.x) AS a, \
         min(n.x) AS lo, max(n.x) AS hi",
    );
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(matches!(row[0], TypedValue::Int(0)));
    assert!(matches!(row[1], TypedValue::Int(0)));
    assert!(row[2].is_null());
    assert!(row[3].is_null());
    assert!(row[4].is_null());
}

#[test]
fn grouped_aggregation_over_empty_input_yields_no_rows() {
    let execution = QueryExecution::new();
    let rows = execution.execute("MATCH (n:Missing) RETURN n.x, count(n)");
    assert!(rows.is_empty());
}

#[test]
fn aggregation_groups_and_counts() {
    let mut execution = QueryExecution::new();
    execution.execute(
        "CREATE (:P {city: 'ams', age: 10}), (:P {city: 'ams', age: 20}), (:P {city: 'ld', age: 30})",
    );
    execution.commit();
    let mut rows =
        execution.execute("MATCH (n:P) RETURN n.city AS city, count(n) AS c, sum(n.age) AS total");
    rows.sort_by_key(|row| match &row[0] {
        TypedValue::String(s) => s.clone(),
        _ => String::new(),
    });
    assert_eq!(rows.len(), 2);
    assert!(matches!(&rows[0][0], TypedValue::String(s) if s == "ams"));
    assert!(matches!(rows[0][1], TypedValue::Int(2)));
    assert!(matches!(rows[0][2], TypedValue::Int(30)));
    assert!(matches!(rows[1][1], TypedValue::Int(1)));
}

#[test]
fn order_by_sorts_nulls_last_ascending_first_descending() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE (:N {v: 2}), (:N), (:N {v: 1})");
    execution.commit();
    let ascending = execution.execute("MATCH (n:N) RETURN n.v ORDER BY n.v");
    assert!(matches!(ascending[0][0], TypedValue::Int(1)));
    assert!(matches!(ascending[1][0], TypedValue::Int(2)));
    assert!(ascending[2][0].is_null());

    let descending = execution.execute("MATCH (n:N) RETURN n.v ORDER BY n.v DESC");
    assert!(descending[0][0].is_null());
    assert!(matches!(descending[1][0], TypedValue::Int(2)));
    assert!(matches!(descending[2][0], TypedValue::Int(1)));
}

#[test]
fn unwind_distinct_skip_limit() {
    let execution = QueryExecution::new();
    let rows = execution.execute("UNWIND [1, 2, 2, 3, 3, 3] AS x RETURN DISTINCT x");
    assert_eq!(rows.len(), 3);
    let rows = execution.execute("UNWIND [1, 2, 3, 4] AS x RETURN x SKIP 1 LIMIT 2");
    assert_eq!(rows.len(), 2);
    assert!(matches!(rows[0][0], TypedValue::Int(2)));
    assert!(matches!(rows[1][0], TypedValue::Int(3)));
}

#[test]
fn merge_matches_before_creating() {
    let mut execution = QueryExecution::new();
    execution.execute("MERGE (n:Person {id: 1})");
    execution.commit();
    assert_eq!(execution.execute("MATCH (n:Person) RETURN n").len(), 1);
    execution.execute("MERGE (n:Person {id: 1})");
    execution.commit();
    assert_eq!(execution.execute("MATCH (n:Person) RETURN n").len(), 1);
    execution.execute("MERGE (n:Person {id: 2})");
    execution.commit();
    assert_eq!(execution.execute("MATCH (n:Person) RETURN n").len(), 2);
}

#[test]
fn create_then_return_sees_own_writes() {
    let execution = QueryExecution::new();
    let rows = execution.execute("CREATE (n:X {a: 41}) RETURN n.a + 1");
    assert_eq!(rows.len(), 1);
    assert!(matches!(rows[0][0], TypedValue::Int(42)));
}

#[test]
fn delete_with_remaining_edges_needs_detach() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE (:A)-[:T]->(:B)");
    execution.commit();
    assert!(execution.try_execute("MATCH (n:A) DELETE n").is_err());
    execution.execute("MATCH (n:A) DETACH DELETE n");
    execution.commit();
    assert_eq!(execution.execute("MATCH (n) RETURN n").len(), 1);
}

#[test]
fn set_and_remove_roundtrip() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE (:S {keep: 1, drop: 2})");
    execution.commit();
    execution.execute("MATCH (n:S) SET n.fresh = 3 REMOVE n.drop");
    let rows = execution.execute("MATCH (n:S) RETURN n.keep, n.drop, n.fresh");
    assert!(matches!(rows[0][0], TypedValue::Int(1)));
    assert!(rows[0][1].is_null());
    assert!(matches!(rows[0][2], TypedValue::Int(3)));

    execution.execute("MATCH (n:S) SET n:Extra");
    assert_eq!(execution.execute("MATCH (n:Extra) RETURN n").len(), 1);
    execution.execute("MATCH (n:S) REMOVE n:Extra");
    assert_eq!(execution.execute("MATCH (n:Extra) RETURN n").len(), 0);
}

#[test]
fn named_path_binds_a_path_value() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE (:A)-[:T]->(:B)");
    execution.commit();
    let rows = execution.execute("MATCH p = (a:A)-[r]->(b) RETURN p");
    assert_eq!(rows.len(), 1);
    match &rows[0][0] {
        TypedValue::Path(path) => {
            assert_eq!(path.vertices.len(), 2);
            assert_eq!(path.edges.len(), 1);
        }
        other => panic!("expected a path, got {other:?}"),
    }
}

#[test]
fn variable_expansion_respects_bounds_and_uniqueness() {
    let mut execution = QueryExecution::new();
    // A chain of three: (1)->(2)->(3).
    execution.execute("CREATE (:C {i: 1})-[:T]->(:C {i: 2})-[:T]->(:C {i: 3})");
    execution.commit();
    let rows = execution.execute("MATCH (a:C {i: 1})-[r *1..2]->(b) RETURN b");
    assert_eq!(rows.len(), 2);
    // Unbounded expansion terminates because each edge is used once per path.
    let rows = execution.execute("MATCH (a:C {i: 1})-[r *]->(b) RETURN b");
    assert_eq!(rows.len(), 2);
}

#[test]
fn bfs_returns_each_reachable_node_once_at_shortest_depth() {
    let mut execution = QueryExecution::new();
    // Diamond: s -> a, s -> b, a -> t, b -> t.
    execution.execute(
        "CREATE (s:S)-[:T]->(a), (a)-[:T]->(t:T2), (s)-[:T]->(b), (b)-[:T]->(t2)",
    );
    execution.commit();
    let single_hop = execution.execute("MATCH (s:S)-[*bfs..1]->(n) RETURN n");
    assert_eq!(single_hop.len(), 2);
    let two_hops = execution.execute("MATCH (s:S)-[*bfs..2]->(n) RETURN n");
    assert_eq!(two_hops.len(), 4);
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let execution = QueryExecution::new();
    let err = execution
        .try_execute("UNWIND [1] AS x RETURN x / 0")
        .unwrap_err();
    assert!(matches!(err, QueryError::Runtime(_)));
}

#[test]
fn match_without_return_is_unknown_top_level_operator() {
    let execution = QueryExecution::new();
    let err = execution.try_execute("MATCH (n)").unwrap_err();
    assert!(matches!(err, QueryError::Runtime(message) if message.contains("top level")));
}

#[test]
fn optional_match_where_filters_inside_the_branch() {
    let mut execution = QueryExecution::new();
    execution.execute("CREATE (:P {v: 1}), (:P {v: 2})");
    execution.commit();
    // The filter belongs to the optional branch: non-matching rows come back
    // null instead of disappearing.
    let rows = execution
        .execute("MATCH (p:P) OPTIONAL MATCH (q:P) WHERE q.v > p.v RETURN p, q ORDER BY p.v");
    assert_eq!(rows.len(), 2);
    assert!(!rows[0][1].is_null());
    assert!(rows[1][1].is_null());
}
