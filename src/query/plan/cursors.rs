//! Per-operator cursor state machines.
//!
//! Cursors are driven strictly top-down; each holds its own mutable state
//! plus a reference into the shared, immutable operator tree. The same tree
//! node may back any number of concurrent cursors.

use std::cmp::Ordering;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::query::ast::{AggregationOp, AstStorage, AuthAction, ExprId, SortDir};
use crate::query::context::ExecutionContext;
use crate::query::errors::QueryError;
use crate::query::eval::ExpressionEvaluator;
use crate::query::frame::Frame;
use crate::query::plan::physical::{
    AggregateElement, BoxedCursor, Cursor, EdgeCreationInfo, LogicalOperator, NodeCreationInfo,
    RangeEnd,
};
use crate::query::plan::pretty;
use crate::query::symbols::Symbol;
use crate::query::value::{EdgeRef, GroupKey, Path, TypedValue};
use crate::storage::Dir;
use crate::types::{EdgeTypeId, VertexId};

pub(crate) fn new_cursor<'a>(
    op: &'a LogicalOperator,
    storage: &'a AstStorage,
) -> BoxedCursor<'a> {
    match op {
        LogicalOperator::Once => Box::new(OnceCursor { done: false }),
        LogicalOperator::ScanAll { .. }
        | LogicalOperator::ScanAllByLabel { .. }
        | LogicalOperator::ScanAllByLabelPropertyValue { .. }
        | LogicalOperator::ScanAllByLabelPropertyRange { .. } => Box::new(ScanCursor {
            op,
            storage,
            input: op.input().expect("scan has input").make_cursor(storage),
            buffer: Vec::new(),
            index: 0,
            have_row: false,
        }),
        LogicalOperator::Expand {
            input,
            input_symbol,
            edge_symbol,
            output,
            direction,
            edge_types,
            existing_node,
        } => Box::new(ExpandCursor {
            input: input.make_cursor(storage),
            input_symbol,
            edge_symbol,
            output,
            direction: *direction,
            edge_types,
            existing_node: *existing_node,
            source: VertexId(0),
            edges: Vec::new(),
            index: 0,
        }),
        LogicalOperator::ExpandVariable {
            input,
            input_symbol,
            edge_symbol,
            output,
            direction,
            edge_types,
            lower,
            upper,
            existing_node,
        } => Box::new(ExpandVariableCursor {
            storage,
            input: input.make_cursor(storage),
            input_symbol,
            edge_symbol,
            output,
            direction: *direction,
            edge_types,
            lower: *lower,
            upper: *upper,
            existing_node: *existing_node,
            results: Vec::new(),
            index: 0,
        }),
        LogicalOperator::ExpandBfs {
            input,
            input_symbol,
            output,
            direction,
            edge_types,
            depth,
            existing_node,
        } => Box::new(ExpandBfsCursor {
            storage,
            input: input.make_cursor(storage),
            input_symbol,
            output,
            direction: *direction,
            edge_types,
            depth: *depth,
            existing_node: *existing_node,
            reached: Vec::new(),
            index: 0,
        }),
        LogicalOperator::ConstructNamedPath {
            input,
            path_symbol,
            segments,
        } => Box::new(ConstructNamedPathCursor {
            input: input.make_cursor(storage),
            path_symbol,
            segments,
        }),
        LogicalOperator::Filter { input, expr } => Box::new(FilterCursor {
            storage,
            input: input.make_cursor(storage),
            expr: *expr,
        }),
        LogicalOperator::EdgeUniquenessFilter {
            input,
            expand_symbol,
            previous,
        } => Box::new(EdgeUniquenessFilterCursor {
            input: input.make_cursor(storage),
            expand_symbol,
            previous,
        }),
        LogicalOperator::Produce { input, named_exprs } => Box::new(ProduceCursor {
            storage,
            input: input.make_cursor(storage),
            named_exprs,
        }),
        LogicalOperator::Delete {
            input,
            exprs,
            detach,
        } => Box::new(DeleteCursor {
            storage,
            input: input.make_cursor(storage),
            exprs,
            detach: *detach,
        }),
        LogicalOperator::SetProperty {
            input,
            base,
            property,
            value,
        } => Box::new(SetPropertyCursor {
            storage,
            input: input.make_cursor(storage),
            base: *base,
            property: *property,
            value: *value,
        }),
        LogicalOperator::SetProperties {
            input,
            symbol,
            value,
            update,
        } => Box::new(SetPropertiesCursor {
            storage,
            input: input.make_cursor(storage),
            symbol,
            value: *value,
            update: *update,
        }),
        LogicalOperator::SetLabels {
            input,
            symbol,
            labels,
        } => Box::new(SetLabelsCursor {
            input: input.make_cursor(storage),
            symbol,
            labels,
            remove: false,
        }),
        LogicalOperator::RemoveProperty {
            input,
            base,
            property,
        } => Box::new(RemovePropertyCursor {
            storage,
            input: input.make_cursor(storage),
            base: *base,
            property: *property,
        }),
        LogicalOperator::RemoveLabels {
            input,
            symbol,
            labels,
        } => Box::new(SetLabelsCursor {
            input: input.make_cursor(storage),
            symbol,
            labels,
            remove: true,
        }),
        LogicalOperator::CreateNode { input, node } => Box::new(CreateNodeCursor {
            storage,
            input: input.make_cursor(storage),
            node,
        }),
        LogicalOperator::CreateExpand {
            input,
            input_symbol,
            edge,
            node,
            existing_node,
        } => Box::new(CreateExpandCursor {
            storage,
            input: input.make_cursor(storage),
            input_symbol,
            edge,
            node,
            existing_node: *existing_node,
        }),
        LogicalOperator::Accumulate {
            input,
            advance_command,
            ..
        } => Box::new(AccumulateCursor {
            input: input.make_cursor(storage),
            advance_command: *advance_command,
            rows: Vec::new(),
            index: 0,
            accumulated: false,
        }),
        LogicalOperator::Aggregate {
            input,
            aggregations,
            group_by,
            remember,
        } => Box::new(AggregateCursor {
            storage,
            input: input.make_cursor(storage),
            aggregations,
            group_by,
            remember,
            groups: Vec::new(),
            index: 0,
            aggregated: false,
        }),
        LogicalOperator::Skip { input, expr } => Box::new(SkipCursor {
            storage,
            input: input.make_cursor(storage),
            expr: *expr,
            to_skip: None,
        }),
        LogicalOperator::Limit { input, expr } => Box::new(LimitCursor {
            storage,
            input: input.make_cursor(storage),
            expr: *expr,
            remaining: None,
        }),
        LogicalOperator::OrderBy { input, keys } => Box::new(OrderByCursor {
            storage,
            input: input.make_cursor(storage),
            keys,
            rows: Vec::new(),
            index: 0,
            sorted: false,
        }),
        LogicalOperator::Merge {
            input,
            merge_match,
            merge_create,
        } => Box::new(MergeCursor {
            storage,
            input: input.make_cursor(storage),
            merge_match,
            merge_create,
            branch: None,
            branch_is_create: false,
            matched_any: false,
        }),
        LogicalOperator::Optional {
            input,
            optional,
            optional_symbols,
        } => Box::new(OptionalCursor {
            storage,
            input: input.make_cursor(storage),
            optional,
            optional_symbols,
            branch: None,
            had_row: false,
        }),
        LogicalOperator::Cartesian {
            left,
            right,
            left_symbols,
            ..
        } => Box::new(CartesianCursor {
            left: left.make_cursor(storage),
            right: right.make_cursor(storage),
            left_symbols,
            left_rows: Vec::new(),
            left_index: 0,
            left_done: false,
            have_right_row: false,
        }),
        LogicalOperator::Unwind {
            input,
            expr,
            output,
        } => Box::new(UnwindCursor {
            storage,
            input: input.make_cursor(storage),
            expr: *expr,
            output,
            items: Vec::new(),
            index: 0,
        }),
        LogicalOperator::Distinct { input, symbols } => Box::new(DistinctCursor {
            input: input.make_cursor(storage),
            symbols,
            seen: FxHashSet::default(),
        }),
        LogicalOperator::CreateIndex { label, property } => Box::new(CreateIndexCursor {
            label: *label,
            property: *property,
            done: false,
        }),
        LogicalOperator::AuthHandler { action } => Box::new(AuthHandlerCursor {
            action,
            done: false,
        }),
        LogicalOperator::CreateStream {
            name,
            uri,
            batch_interval_ms,
            batch_size,
        } => Box::new(StreamOpCursor {
            storage,
            action: StreamOp::Create {
                name,
                uri: *uri,
                batch_interval_ms: *batch_interval_ms,
                batch_size: *batch_size,
            },
            done: false,
        }),
        LogicalOperator::DropStream { name } => Box::new(StreamOpCursor {
            storage,
            action: StreamOp::Drop { name },
            done: false,
        }),
        LogicalOperator::ShowStreams => Box::new(StreamOpCursor {
            storage,
            action: StreamOp::Show,
            done: false,
        }),
        LogicalOperator::StartStopStream { name, start, limit } => Box::new(StreamOpCursor {
            storage,
            action: StreamOp::StartStop {
                name,
                start: *start,
                limit: *limit,
            },
            done: false,
        }),
        LogicalOperator::StartStopAllStreams { start } => Box::new(StreamOpCursor {
            storage,
            action: StreamOp::StartStopAll { start: *start },
            done: false,
        }),
        LogicalOperator::TestStream { name, limit } => Box::new(StreamOpCursor {
            storage,
            action: StreamOp::Test {
                name,
                limit: *limit,
            },
            done: false,
        }),
        LogicalOperator::Explain { input, output } => Box::new(ExplainCursor {
            plan: input,
            output,
            lines: Vec::new(),
            index: 0,
            rendered: false,
        }),
    }
}

fn evaluator<'e>(
    storage: &'e AstStorage,
    ctx: &'e ExecutionContext<'_>,
) -> ExpressionEvaluator<'e> {
    ExpressionEvaluator::new(storage, &ctx.symbol_table, &ctx.parameters, ctx.accessor)
}

fn eval_int(
    evaluator: &ExpressionEvaluator<'_>,
    frame: &Frame,
    expr: ExprId,
    what: &str,
) -> Result<i64, QueryError> {
    match evaluator.eval(frame, expr)? {
        TypedValue::Int(i) => Ok(i),
        other => Err(QueryError::runtime(format!(
            "{what} must be an integer, got {}",
            other.kind().name()
        ))),
    }
}

fn expected_vertex(value: &TypedValue, what: &str) -> Result<VertexId, QueryError> {
    match value {
        TypedValue::Vertex(v) => Ok(*v),
        other => Err(QueryError::runtime(format!(
            "{what} must be a vertex, got {}",
            other.kind().name()
        ))),
    }
}

// ---- Once ------------------------------------------------------------------

struct OnceCursor {
    done: bool,
}

impl Cursor for OnceCursor {
    fn pull(&mut self, _frame: &mut Frame, _ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if self.done {
            return Ok(false);
        }
        self.done = true;
        Ok(true)
    }
}

// ---- scans -----------------------------------------------------------------

struct ScanCursor<'a> {
    op: &'a LogicalOperator,
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    buffer: Vec<VertexId>,
    index: usize,
    have_row: bool,
}

impl ScanCursor<'_> {
    fn fetch(
        &self,
        frame: &Frame,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Vec<VertexId>, QueryError> {
        let eval = evaluator(self.storage, ctx);
        let ids = match self.op {
            LogicalOperator::ScanAll { .. } => ctx.accessor.vertices()?,
            LogicalOperator::ScanAllByLabel { label, .. } => {
                ctx.accessor.vertices_by_label(*label)?
            }
            LogicalOperator::ScanAllByLabelPropertyValue {
                label,
                property,
                value,
                ..
            } => {
                let value = eval.eval(frame, *value)?;
                // A null probe value matches nothing.
                if value.is_null() {
                    Vec::new()
                } else {
                    ctx.accessor
                        .vertices_by_label_property_value(*label, *property, &value)?
                }
            }
            LogicalOperator::ScanAllByLabelPropertyRange {
                label,
                property,
                lower,
                upper,
                ..
            } => {
                let to_bound = |end: &Option<RangeEnd>| -> Result<
                    Option<std::ops::Bound<TypedValue>>,
                    QueryError,
                > {
                    match end {
                        None => Ok(Some(std::ops::Bound::Unbounded)),
                        Some(range_end) => {
                            let value = eval.eval(frame, range_end.expr)?;
                            if value.is_null() {
                                return Ok(None);
                            }
                            Ok(Some(if range_end.inclusive {
                                std::ops::Bound::Included(value)
                            } else {
                                std::ops::Bound::Excluded(value)
                            }))
                        }
                    }
                };
                match (to_bound(lower)?, to_bound(upper)?) {
                    (Some(lo), Some(hi)) => ctx
                        .accessor
                        .vertices_by_label_property_range(*label, *property, &lo, &hi)?,
                    // A null range end matches nothing.
                    _ => Vec::new(),
                }
            }
            other => unreachable!("not a scan operator: {}", other.name()),
        };
        Ok(ids)
    }

    fn output(&self) -> &Symbol {
        match self.op {
            LogicalOperator::ScanAll { output, .. }
            | LogicalOperator::ScanAllByLabel { output, .. }
            | LogicalOperator::ScanAllByLabelPropertyValue { output, .. }
            | LogicalOperator::ScanAllByLabelPropertyRange { output, .. } => output,
            other => unreachable!("not a scan operator: {}", other.name()),
        }
    }
}

impl Cursor for ScanCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            if self.have_row && self.index < self.buffer.len() {
                let vertex = self.buffer[self.index];
                self.index += 1;
                frame.set(self.output().position, TypedValue::Vertex(vertex));
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            self.buffer = self.fetch(frame, ctx)?;
            self.index = 0;
            self.have_row = true;
        }
    }
}

// ---- expansions ------------------------------------------------------------

fn incident_edges(
    ctx: &ExecutionContext<'_>,
    vertex: VertexId,
    direction: Dir,
    edge_types: &[EdgeTypeId],
) -> Result<Vec<EdgeRef>, QueryError> {
    let mut edges = ctx.accessor.edges_of(vertex, direction)?;
    if !edge_types.is_empty() {
        edges.retain(|e| edge_types.contains(&e.edge_type));
    }
    Ok(edges)
}

struct ExpandCursor<'a> {
    input: BoxedCursor<'a>,
    input_symbol: &'a Symbol,
    edge_symbol: &'a Symbol,
    output: &'a Symbol,
    direction: Dir,
    edge_types: &'a [EdgeTypeId],
    existing_node: bool,
    source: VertexId,
    edges: Vec<EdgeRef>,
    index: usize,
}

impl Cursor for ExpandCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            while self.index < self.edges.len() {
                let edge = self.edges[self.index];
                self.index += 1;
                let other = edge.other_end(self.source);
                if self.existing_node {
                    let bound = frame[self.output].clone();
                    if !bound.equals(&TypedValue::Vertex(other)) {
                        continue;
                    }
                } else {
                    frame.set(self.output.position, TypedValue::Vertex(other));
                }
                frame.set(self.edge_symbol.position, TypedValue::Edge(edge));
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            match &frame[self.input_symbol] {
                // A null source (unmatched optional upstream) contributes no
                // rows but must not exhaust the input.
                TypedValue::Null => {
                    self.edges = Vec::new();
                    self.index = 0;
                }
                TypedValue::Vertex(v) => {
                    self.source = *v;
                    self.edges = incident_edges(ctx, *v, self.direction, self.edge_types)?;
                    self.index = 0;
                }
                other => {
                    return Err(QueryError::runtime(format!(
                        "cannot expand from {}",
                        other.kind().name()
                    )));
                }
            }
        }
    }
}

struct ExpandVariableCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    input_symbol: &'a Symbol,
    edge_symbol: &'a Symbol,
    output: &'a Symbol,
    direction: Dir,
    edge_types: &'a [EdgeTypeId],
    lower: Option<ExprId>,
    upper: Option<ExprId>,
    existing_node: bool,
    /// Paths produced for the current input row.
    results: Vec<(Vec<EdgeRef>, VertexId)>,
    index: usize,
}

impl ExpandVariableCursor<'_> {
    #[allow(clippy::too_many_arguments)]
    fn walk(
        ctx: &ExecutionContext<'_>,
        vertex: VertexId,
        direction: Dir,
        edge_types: &[EdgeTypeId],
        lower: i64,
        upper: i64,
        path: &mut Vec<EdgeRef>,
        out: &mut Vec<(Vec<EdgeRef>, VertexId)>,
    ) -> Result<(), QueryError> {
        let depth = path.len() as i64;
        if depth >= lower {
            out.push((path.clone(), vertex));
        }
        if depth >= upper {
            return Ok(());
        }
        for edge in incident_edges(ctx, vertex, direction, edge_types)? {
            // Edge-uniqueness is per produced path.
            if path.iter().any(|e| e.id == edge.id) {
                continue;
            }
            let next = edge.other_end(vertex);
            path.push(edge);
            Self::walk(ctx, next, direction, edge_types, lower, upper, path, out)?;
            path.pop();
        }
        Ok(())
    }
}

impl Cursor for ExpandVariableCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            while self.index < self.results.len() {
                let (edges, end) = self.results[self.index].clone();
                self.index += 1;
                if self.existing_node {
                    let bound = frame[self.output].clone();
                    if !bound.equals(&TypedValue::Vertex(end)) {
                        continue;
                    }
                } else {
                    frame.set(self.output.position, TypedValue::Vertex(end));
                }
                frame.set(
                    self.edge_symbol.position,
                    TypedValue::List(edges.into_iter().map(TypedValue::Edge).collect()),
                );
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            self.results.clear();
            self.index = 0;
            match &frame[self.input_symbol] {
                TypedValue::Null => {}
                TypedValue::Vertex(v) => {
                    let eval = evaluator(self.storage, ctx);
                    let lower = match self.lower {
                        Some(expr) => eval_int(&eval, frame, expr, "expansion lower bound")?,
                        None => 1,
                    };
                    let upper = match self.upper {
                        Some(expr) => eval_int(&eval, frame, expr, "expansion upper bound")?,
                        None => i64::MAX,
                    };
                    if lower <= upper {
                        let mut path = Vec::new();
                        let mut results = Vec::new();
                        Self::walk(
                            ctx,
                            *v,
                            self.direction,
                            self.edge_types,
                            lower.max(0),
                            upper,
                            &mut path,
                            &mut results,
                        )?;
                        // Zero-length matches bind the source itself; they are
                        // produced by walk when lower is 0.
                        self.results = results;
                    }
                }
                other => {
                    return Err(QueryError::runtime(format!(
                        "cannot expand from {}",
                        other.kind().name()
                    )));
                }
            }
        }
    }
}

struct ExpandBfsCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    input_symbol: &'a Symbol,
    output: &'a Symbol,
    direction: Dir,
    edge_types: &'a [EdgeTypeId],
    depth: Option<ExprId>,
    existing_node: bool,
    reached: Vec<VertexId>,
    index: usize,
}

impl Cursor for ExpandBfsCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            while self.index < self.reached.len() {
                let vertex = self.reached[self.index];
                self.index += 1;
                if self.existing_node {
                    let bound = frame[self.output].clone();
                    if !bound.equals(&TypedValue::Vertex(vertex)) {
                        continue;
                    }
                } else {
                    frame.set(self.output.position, TypedValue::Vertex(vertex));
                }
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            self.reached.clear();
            self.index = 0;
            match &frame[self.input_symbol] {
                TypedValue::Null => {}
                TypedValue::Vertex(v) => {
                    let max_depth = match self.depth {
                        Some(expr) => {
                            let eval = evaluator(self.storage, ctx);
                            eval_int(&eval, frame, expr, "breadth-first depth")?
                        }
                        None => i64::MAX,
                    };
                    // Shortest-path-only: a vertex is reported at its first
                    // (minimal) depth and never revisited.
                    let mut visited = FxHashSet::default();
                    visited.insert(*v);
                    let mut frontier = vec![*v];
                    let mut depth = 0;
                    while !frontier.is_empty() && depth < max_depth {
                        depth += 1;
                        let mut next_frontier = Vec::new();
                        for vertex in frontier {
                            for edge in
                                incident_edges(ctx, vertex, self.direction, self.edge_types)?
                            {
                                let other = edge.other_end(vertex);
                                if visited.insert(other) {
                                    self.reached.push(other);
                                    next_frontier.push(other);
                                }
                            }
                        }
                        frontier = next_frontier;
                    }
                }
                other => {
                    return Err(QueryError::runtime(format!(
                        "cannot expand from {}",
                        other.kind().name()
                    )));
                }
            }
        }
    }
}

// ---- paths and filters -----------------------------------------------------

struct ConstructNamedPathCursor<'a> {
    input: BoxedCursor<'a>,
    path_symbol: &'a Symbol,
    segments: &'a [Symbol],
}

impl Cursor for ConstructNamedPathCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let mut path: Option<Path> = None;
        for symbol in self.segments {
            let value = frame[symbol].clone();
            match (&mut path, value) {
                (_, TypedValue::Null) => {
                    frame.set(self.path_symbol.position, TypedValue::Null);
                    return Ok(true);
                }
                (None, TypedValue::Vertex(v)) => path = Some(Path::starting_at(v)),
                (Some(_), TypedValue::Vertex(_)) => {
                    // Expansion segments already appended this endpoint.
                }
                (Some(p), TypedValue::Edge(e)) => {
                    let last = *p.vertices.last().expect("path has a start");
                    p.extend(e, e.other_end(last));
                }
                (Some(p), TypedValue::List(edges)) => {
                    for item in edges {
                        let TypedValue::Edge(e) = item else {
                            return Err(QueryError::runtime(
                                "path segment list may only contain edges",
                            ));
                        };
                        let last = *p.vertices.last().expect("path has a start");
                        p.extend(e, e.other_end(last));
                    }
                }
                (_, other) => {
                    return Err(QueryError::runtime(format!(
                        "cannot build a path out of {}",
                        other.kind().name()
                    )));
                }
            }
        }
        let path = path.ok_or_else(|| QueryError::runtime("empty path pattern"))?;
        frame.set(self.path_symbol.position, TypedValue::Path(path));
        Ok(true)
    }
}

struct FilterCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    expr: ExprId,
}

impl Cursor for FilterCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        while self.input.pull(frame, ctx)? {
            let eval = evaluator(self.storage, ctx);
            // Null predicates drop the row, same as false.
            if eval.eval(frame, self.expr)?.is_true() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

struct EdgeUniquenessFilterCursor<'a> {
    input: BoxedCursor<'a>,
    expand_symbol: &'a Symbol,
    previous: &'a [Symbol],
}

fn edge_ids_of(value: &TypedValue, out: &mut Vec<crate::types::EdgeId>) {
    match value {
        TypedValue::Edge(e) => out.push(e.id),
        TypedValue::List(items) => {
            for item in items {
                if let TypedValue::Edge(e) = item {
                    out.push(e.id);
                }
            }
        }
        _ => {}
    }
}

impl Cursor for EdgeUniquenessFilterCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        'rows: while self.input.pull(frame, ctx)? {
            let expanded = &frame[self.expand_symbol];
            // Uniqueness is vacuous when the expanded edge is null, which
            // happens under an unmatched OPTIONAL MATCH.
            if expanded.is_null() {
                return Ok(true);
            }
            let mut own = Vec::new();
            edge_ids_of(expanded, &mut own);
            for symbol in self.previous {
                let value = &frame[symbol];
                if value.is_null() {
                    continue;
                }
                let mut other = Vec::new();
                edge_ids_of(value, &mut other);
                if own.iter().any(|id| other.contains(id)) {
                    continue 'rows;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }
}

// ---- projection ------------------------------------------------------------

struct ProduceCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    named_exprs: &'a [(Symbol, ExprId)],
}

impl Cursor for ProduceCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let eval = evaluator(self.storage, ctx);
        for (symbol, expr) in self.named_exprs {
            let value = eval.eval(frame, *expr)?;
            frame.set(symbol.position, value);
        }
        Ok(true)
    }
}

// ---- writes ----------------------------------------------------------------

struct DeleteCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    exprs: &'a [ExprId],
    detach: bool,
}

impl Cursor for DeleteCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let eval = evaluator(self.storage, ctx);
        for expr in self.exprs {
            match eval.eval(frame, *expr)? {
                TypedValue::Null => {}
                TypedValue::Vertex(v) => ctx.accessor.delete_vertex(v, self.detach)?,
                TypedValue::Edge(e) => ctx.accessor.delete_edge(e.id)?,
                other => {
                    return Err(QueryError::runtime(format!(
                        "cannot delete {}",
                        other.kind().name()
                    )));
                }
            }
        }
        Ok(true)
    }
}

struct SetPropertyCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    base: ExprId,
    property: crate::types::PropId,
    value: ExprId,
}

impl Cursor for SetPropertyCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let eval = evaluator(self.storage, ctx);
        let target = eval.eval(frame, self.base)?;
        let value = eval.eval(frame, self.value)?;
        match target {
            // Setting through an unmatched optional binding is a no-op.
            TypedValue::Null => {}
            TypedValue::Vertex(v) => ctx.accessor.set_vertex_property(v, self.property, value)?,
            TypedValue::Edge(e) => ctx.accessor.set_edge_property(e.id, self.property, value)?,
            other => {
                return Err(QueryError::runtime(format!(
                    "cannot set a property on {}",
                    other.kind().name()
                )));
            }
        }
        Ok(true)
    }
}

struct SetPropertiesCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    symbol: &'a Symbol,
    value: ExprId,
    update: bool,
}

impl Cursor for SetPropertiesCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let target = frame[self.symbol].clone();
        let vertex = match target {
            TypedValue::Null => return Ok(true),
            TypedValue::Vertex(v) => v,
            other => {
                return Err(QueryError::runtime(format!(
                    "cannot replace properties on {}",
                    other.kind().name()
                )));
            }
        };
        let eval = evaluator(self.storage, ctx);
        let entries: Vec<(crate::types::PropId, TypedValue)> =
            match eval.eval(frame, self.value)? {
                TypedValue::Map(map) => map
                    .into_iter()
                    .map(|(k, v)| (ctx.accessor.property_id(&k), v))
                    .collect(),
                TypedValue::Vertex(source) => ctx.accessor.vertex_properties(source)?,
                other => {
                    return Err(QueryError::runtime(format!(
                        "property source must be a map or a vertex, got {}",
                        other.kind().name()
                    )));
                }
            };
        if !self.update {
            for (prop, _) in ctx.accessor.vertex_properties(vertex)? {
                ctx.accessor
                    .set_vertex_property(vertex, prop, TypedValue::Null)?;
            }
        }
        for (prop, value) in entries {
            ctx.accessor.set_vertex_property(vertex, prop, value)?;
        }
        Ok(true)
    }
}

struct SetLabelsCursor<'a> {
    input: BoxedCursor<'a>,
    symbol: &'a Symbol,
    labels: &'a [crate::types::LabelId],
    remove: bool,
}

impl Cursor for SetLabelsCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        match &frame[self.symbol] {
            TypedValue::Null => {}
            TypedValue::Vertex(v) => {
                for label in self.labels {
                    if self.remove {
                        ctx.accessor.remove_label(*v, *label)?;
                    } else {
                        ctx.accessor.add_label(*v, *label)?;
                    }
                }
            }
            other => {
                return Err(QueryError::runtime(format!(
                    "cannot change labels on {}",
                    other.kind().name()
                )));
            }
        }
        Ok(true)
    }
}

struct RemovePropertyCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    base: ExprId,
    property: crate::types::PropId,
}

impl Cursor for RemovePropertyCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let eval = evaluator(self.storage, ctx);
        match eval.eval(frame, self.base)? {
            TypedValue::Null => {}
            TypedValue::Vertex(v) => {
                ctx.accessor
                    .set_vertex_property(v, self.property, TypedValue::Null)?;
            }
            TypedValue::Edge(e) => {
                ctx.accessor
                    .set_edge_property(e.id, self.property, TypedValue::Null)?;
            }
            other => {
                return Err(QueryError::runtime(format!(
                    "cannot remove a property from {}",
                    other.kind().name()
                )));
            }
        }
        Ok(true)
    }
}

fn create_node(
    storage: &AstStorage,
    frame: &mut Frame,
    ctx: &ExecutionContext<'_>,
    node: &NodeCreationInfo,
) -> Result<VertexId, QueryError> {
    let vertex = ctx.accessor.create_vertex()?;
    for label in &node.labels {
        ctx.accessor.add_label(vertex, *label)?;
    }
    let eval = evaluator(storage, ctx);
    for (prop, expr) in &node.properties {
        let value = eval.eval(frame, *expr)?;
        ctx.accessor.set_vertex_property(vertex, *prop, value)?;
    }
    frame.set(node.symbol.position, TypedValue::Vertex(vertex));
    Ok(vertex)
}

struct CreateNodeCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    node: &'a NodeCreationInfo,
}

impl Cursor for CreateNodeCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        create_node(self.storage, frame, ctx, self.node)?;
        Ok(true)
    }
}

struct CreateExpandCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    input_symbol: &'a Symbol,
    edge: &'a EdgeCreationInfo,
    node: &'a NodeCreationInfo,
    existing_node: bool,
}

impl Cursor for CreateExpandCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let from = expected_vertex(&frame[self.input_symbol], "edge origin")?;
        let to = if self.existing_node {
            expected_vertex(&frame[&self.node.symbol], "edge target")?
        } else {
            create_node(self.storage, frame, ctx, self.node)?
        };
        let (a, b) = match self.edge.direction {
            Dir::In => (to, from),
            _ => (from, to),
        };
        let edge = ctx.accessor.create_edge(a, b, self.edge.edge_type)?;
        let eval = evaluator(self.storage, ctx);
        for (prop, expr) in &self.edge.properties {
            let value = eval.eval(frame, *expr)?;
            ctx.accessor.set_edge_property(edge.id, *prop, value)?;
        }
        frame.set(self.edge.symbol.position, TypedValue::Edge(edge));
        Ok(true)
    }
}

// ---- materializing operators ----------------------------------------------

struct AccumulateCursor<'a> {
    input: BoxedCursor<'a>,
    advance_command: bool,
    rows: Vec<Vec<TypedValue>>,
    index: usize,
    accumulated: bool,
}

impl Cursor for AccumulateCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.accumulated {
            while self.input.pull(frame, ctx)? {
                self.rows.push(frame.snapshot());
            }
            if self.advance_command {
                ctx.accessor.advance_command();
            }
            self.accumulated = true;
        }
        if self.index < self.rows.len() {
            frame.restore(&self.rows[self.index]);
            self.index += 1;
            return Ok(true);
        }
        Ok(false)
    }
}

struct AggregateGroup {
    remembered: Vec<TypedValue>,
    count: Vec<i64>,
    value: Vec<TypedValue>,
    collected: Vec<Vec<TypedValue>>,
}

struct AggregateCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    aggregations: &'a [AggregateElement],
    group_by: &'a [ExprId],
    remember: &'a [Symbol],
    groups: Vec<AggregateGroup>,
    index: usize,
    aggregated: bool,
}

impl AggregateCursor<'_> {
    fn drain(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<(), QueryError> {
        let mut lookup: FxHashMap<Vec<GroupKey>, usize> = FxHashMap::default();
        while self.input.pull(frame, ctx)? {
            let eval = evaluator(self.storage, ctx);
            let mut key = Vec::with_capacity(self.group_by.len());
            for expr in self.group_by {
                key.push(eval.eval(frame, *expr)?.group_key());
            }
            let group_index = match lookup.get(&key) {
                Some(index) => *index,
                None => {
                    self.groups.push(AggregateGroup {
                        remembered: self
                            .remember
                            .iter()
                            .map(|symbol| frame[symbol].clone())
                            .collect(),
                        count: vec![0; self.aggregations.len()],
                        value: vec![TypedValue::Null; self.aggregations.len()],
                        collected: vec![Vec::new(); self.aggregations.len()],
                    });
                    lookup.insert(key, self.groups.len() - 1);
                    self.groups.len() - 1
                }
            };
            let group = &mut self.groups[group_index];
            for (i, element) in self.aggregations.iter().enumerate() {
                let input = match element.expr {
                    Some(expr) => Some(eval.eval(frame, expr)?),
                    None => None,
                };
                match element.op {
                    AggregationOp::Count => {
                        // count(*) counts rows, count(e) counts non-nulls.
                        if element.expr.is_none() || input.as_ref().is_some_and(|v| !v.is_null())
                        {
                            group.count[i] += 1;
                        }
                    }
                    AggregationOp::Sum | AggregationOp::Avg => {
                        if let Some(v) = input.filter(|v| !v.is_null()) {
                            group.count[i] += 1;
                            group.value[i] = if group.value[i].is_null() {
                                v
                            } else {
                                group.value[i].add(&v)?
                            };
                        }
                    }
                    AggregationOp::Min | AggregationOp::Max => {
                        if let Some(v) = input.filter(|v| !v.is_null()) {
                            group.value[i] = if group.value[i].is_null() {
                                v
                            } else {
                                let keep_new = match group.value[i].try_cmp(&v)? {
                                    Ordering::Greater => element.op == AggregationOp::Min,
                                    Ordering::Less => element.op == AggregationOp::Max,
                                    Ordering::Equal => false,
                                };
                                if keep_new {
                                    v
                                } else {
                                    group.value[i].clone()
                                }
                            };
                        }
                    }
                    AggregationOp::Collect => {
                        if let Some(v) = input.filter(|v| !v.is_null()) {
                            group.collected[i].push(v);
                        }
                    }
                }
            }
        }
        // Ungrouped aggregation over empty input still emits one row.
        if self.groups.is_empty() && self.group_by.is_empty() {
            self.groups.push(AggregateGroup {
                remembered: vec![TypedValue::Null; self.remember.len()],
                count: vec![0; self.aggregations.len()],
                value: vec![TypedValue::Null; self.aggregations.len()],
                collected: vec![Vec::new(); self.aggregations.len()],
            });
        }
        Ok(())
    }

    fn emit(&self, group: &AggregateGroup, frame: &mut Frame) -> Result<(), QueryError> {
        for (symbol, value) in self.remember.iter().zip(&group.remembered) {
            frame.set(symbol.position, value.clone());
        }
        for (i, element) in self.aggregations.iter().enumerate() {
            let value = match element.op {
                AggregationOp::Count => TypedValue::Int(group.count[i]),
                AggregationOp::Sum => {
                    if group.value[i].is_null() {
                        TypedValue::Int(0)
                    } else {
                        group.value[i].clone()
                    }
                }
                AggregationOp::Avg => {
                    if group.count[i] == 0 {
                        TypedValue::Null
                    } else {
                        group.value[i].div(&TypedValue::Float(group.count[i] as f64))?
                    }
                }
                AggregationOp::Min | AggregationOp::Max => group.value[i].clone(),
                AggregationOp::Collect => TypedValue::List(group.collected[i].clone()),
            };
            frame.set(element.output_symbol.position, value);
        }
        Ok(())
    }
}

impl Cursor for AggregateCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.aggregated {
            self.drain(frame, ctx)?;
            self.aggregated = true;
        }
        if self.index < self.groups.len() {
            self.emit(&self.groups[self.index], frame)?;
            self.index += 1;
            return Ok(true);
        }
        Ok(false)
    }
}

struct SkipCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    expr: ExprId,
    to_skip: Option<i64>,
}

impl Cursor for SkipCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let to_skip = match self.to_skip {
                Some(n) => n,
                None => {
                    let eval = evaluator(self.storage, ctx);
                    let n = eval_int(&eval, frame, self.expr, "SKIP count")?;
                    if n < 0 {
                        return Err(QueryError::runtime("SKIP count must not be negative"));
                    }
                    self.to_skip = Some(n);
                    n
                }
            };
            if to_skip == 0 {
                return Ok(true);
            }
            self.to_skip = Some(to_skip - 1);
        }
    }
}

struct LimitCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    expr: ExprId,
    remaining: Option<i64>,
}

impl Cursor for LimitCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if self.remaining.is_none() {
            // The limit expression must evaluate before the first input pull,
            // and without a produced row in the frame it may only use
            // parameters and literals.
            let eval = evaluator(self.storage, ctx);
            let n = eval_int(&eval, frame, self.expr, "LIMIT count")?;
            if n < 0 {
                return Err(QueryError::runtime("LIMIT count must not be negative"));
            }
            self.remaining = Some(n);
        }
        let remaining = self.remaining.expect("set above");
        if remaining == 0 {
            return Ok(false);
        }
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        self.remaining = Some(remaining - 1);
        Ok(true)
    }
}

struct OrderByCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    keys: &'a [(ExprId, SortDir)],
    rows: Vec<(Vec<TypedValue>, Vec<TypedValue>)>,
    index: usize,
    sorted: bool,
}

fn sort_compare(a: &TypedValue, b: &TypedValue, dir: SortDir) -> Ordering {
    let ascending = dir == SortDir::Asc;
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        // Nulls sort last ascending, first descending.
        (true, false) => {
            if ascending {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            if ascending {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => {
            let ord = a
                .try_cmp(b)
                .unwrap_or_else(|_| (a.kind()).cmp(&b.kind()));
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        }
    }
}

impl Cursor for OrderByCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.sorted {
            while self.input.pull(frame, ctx)? {
                let eval = evaluator(self.storage, ctx);
                let mut key = Vec::with_capacity(self.keys.len());
                for (expr, _) in self.keys {
                    key.push(eval.eval(frame, *expr)?);
                }
                self.rows.push((key, frame.snapshot()));
            }
            let keys = self.keys;
            self.rows.sort_by(|(ka, _), (kb, _)| {
                for (i, (_, dir)) in keys.iter().enumerate() {
                    let ord = sort_compare(&ka[i], &kb[i], *dir);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            self.sorted = true;
        }
        if self.index < self.rows.len() {
            frame.restore(&self.rows[self.index].1);
            self.index += 1;
            return Ok(true);
        }
        Ok(false)
    }
}

// ---- branching operators ---------------------------------------------------

struct MergeCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    merge_match: &'a LogicalOperator,
    merge_create: &'a LogicalOperator,
    branch: Option<BoxedCursor<'a>>,
    branch_is_create: bool,
    matched_any: bool,
}

impl Cursor for MergeCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            if let Some(cursor) = &mut self.branch {
                if cursor.pull(frame, ctx)? {
                    self.matched_any = true;
                    return Ok(true);
                }
                if !self.branch_is_create && !self.matched_any {
                    // Match produced nothing: run the create branch exactly
                    // once for this input row.
                    self.branch = Some(self.merge_create.make_cursor(self.storage));
                    self.branch_is_create = true;
                    continue;
                }
                self.branch = None;
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            self.branch = Some(self.merge_match.make_cursor(self.storage));
            self.branch_is_create = false;
            self.matched_any = false;
        }
    }
}

struct OptionalCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    optional: &'a LogicalOperator,
    optional_symbols: &'a [Symbol],
    branch: Option<BoxedCursor<'a>>,
    had_row: bool,
}

impl Cursor for OptionalCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            if let Some(cursor) = &mut self.branch {
                if cursor.pull(frame, ctx)? {
                    self.had_row = true;
                    return Ok(true);
                }
                let had_row = self.had_row;
                self.branch = None;
                if !had_row {
                    for symbol in self.optional_symbols {
                        frame.set(symbol.position, TypedValue::Null);
                    }
                    return Ok(true);
                }
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            self.branch = Some(self.optional.make_cursor(self.storage));
            self.had_row = false;
        }
    }
}

struct CartesianCursor<'a> {
    left: BoxedCursor<'a>,
    right: BoxedCursor<'a>,
    left_symbols: &'a [Symbol],
    left_rows: Vec<Vec<TypedValue>>,
    left_index: usize,
    left_done: bool,
    have_right_row: bool,
}

impl Cursor for CartesianCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.left_done {
            while self.left.pull(frame, ctx)? {
                self.left_rows.push(frame.snapshot());
            }
            self.left_done = true;
            if self.left_rows.is_empty() {
                return Ok(false);
            }
        }
        loop {
            if self.have_right_row && self.left_index < self.left_rows.len() {
                let row = &self.left_rows[self.left_index];
                self.left_index += 1;
                for symbol in self.left_symbols {
                    frame.set(symbol.position, row[symbol.position].clone());
                }
                return Ok(true);
            }
            if !self.right.pull(frame, ctx)? {
                return Ok(false);
            }
            self.have_right_row = true;
            self.left_index = 0;
        }
    }
}

struct UnwindCursor<'a> {
    storage: &'a AstStorage,
    input: BoxedCursor<'a>,
    expr: ExprId,
    output: &'a Symbol,
    items: Vec<TypedValue>,
    index: usize,
}

impl Cursor for UnwindCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        loop {
            if self.index < self.items.len() {
                let value = self.items[self.index].clone();
                self.index += 1;
                frame.set(self.output.position, value);
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let eval = evaluator(self.storage, ctx);
            match eval.eval(frame, self.expr)? {
                TypedValue::List(items) => {
                    self.items = items;
                    self.index = 0;
                }
                // Unwinding null produces no rows for this input row.
                TypedValue::Null => {
                    self.items = Vec::new();
                    self.index = 0;
                }
                other => {
                    return Err(QueryError::runtime(format!(
                        "UNWIND expects a list, got {}",
                        other.kind().name()
                    )));
                }
            }
        }
    }
}

struct DistinctCursor<'a> {
    input: BoxedCursor<'a>,
    symbols: &'a [Symbol],
    seen: FxHashSet<Vec<GroupKey>>,
}

impl Cursor for DistinctCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        while self.input.pull(frame, ctx)? {
            let key: Vec<GroupKey> = self
                .symbols
                .iter()
                .map(|symbol| frame[symbol].group_key())
                .collect();
            if self.seen.insert(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ---- administrative one-shots ----------------------------------------------

struct CreateIndexCursor {
    label: crate::types::LabelId,
    property: crate::types::PropId,
    done: bool,
}

impl Cursor for CreateIndexCursor {
    fn pull(&mut self, _frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if self.done {
            return Ok(false);
        }
        self.done = true;
        ctx.accessor.create_index(self.label, self.property)?;
        Ok(false)
    }
}

struct AuthHandlerCursor<'a> {
    action: &'a AuthAction,
    done: bool,
}

impl Cursor for AuthHandlerCursor<'_> {
    fn pull(&mut self, _frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if self.done {
            return Ok(false);
        }
        self.done = true;
        ctx.auth_handler()?.apply(self.action)?;
        Ok(false)
    }
}

enum StreamOp<'a> {
    Create {
        name: &'a str,
        uri: ExprId,
        batch_interval_ms: Option<ExprId>,
        batch_size: Option<ExprId>,
    },
    Drop { name: &'a str },
    Show,
    StartStop {
        name: &'a str,
        start: bool,
        limit: Option<ExprId>,
    },
    StartStopAll { start: bool },
    Test { name: &'a str, limit: Option<ExprId> },
}

struct StreamOpCursor<'a> {
    storage: &'a AstStorage,
    action: StreamOp<'a>,
    done: bool,
}

impl StreamOpCursor<'_> {
    fn eval_opt_int(
        &self,
        frame: &Frame,
        ctx: &ExecutionContext<'_>,
        expr: Option<ExprId>,
        what: &str,
    ) -> Result<Option<i64>, QueryError> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        let eval = evaluator(self.storage, ctx);
        Ok(Some(eval_int(&eval, frame, expr, what)?))
    }
}

impl Cursor for StreamOpCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if self.done {
            return Ok(false);
        }
        self.done = true;
        let registry = ctx.stream_registry()?;
        match &self.action {
            StreamOp::Create {
                name,
                uri,
                batch_interval_ms,
                batch_size,
            } => {
                let eval = evaluator(self.storage, ctx);
                let uri = match eval.eval(frame, *uri)? {
                    TypedValue::String(s) => s,
                    other => {
                        return Err(QueryError::runtime(format!(
                            "stream URI must be a string, got {}",
                            other.kind().name()
                        )));
                    }
                };
                let interval =
                    self.eval_opt_int(frame, ctx, *batch_interval_ms, "batch interval")?;
                let size = self.eval_opt_int(frame, ctx, *batch_size, "batch size")?;
                registry.create_stream(name, &uri, interval, size)?;
            }
            StreamOp::Drop { name } => registry.drop_stream(name)?,
            StreamOp::Show => {
                registry.show_streams()?;
            }
            StreamOp::StartStop { name, start, limit } => {
                let limit = self.eval_opt_int(frame, ctx, *limit, "stream limit")?;
                if *start {
                    registry.start_stream(name, limit)?;
                } else {
                    registry.stop_stream(name)?;
                }
            }
            StreamOp::StartStopAll { start } => {
                if *start {
                    registry.start_all_streams()?;
                } else {
                    registry.stop_all_streams()?;
                }
            }
            StreamOp::Test { name, limit } => {
                let limit = self.eval_opt_int(frame, ctx, *limit, "stream limit")?;
                registry.test_stream(name, limit)?;
            }
        }
        Ok(false)
    }
}

struct ExplainCursor<'a> {
    plan: &'a LogicalOperator,
    output: &'a Symbol,
    lines: Vec<String>,
    index: usize,
    rendered: bool,
}

impl Cursor for ExplainCursor<'_> {
    fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool, QueryError> {
        if !self.rendered {
            self.lines = pretty::render_plan(self.plan, ctx.accessor);
            self.rendered = true;
        }
        if self.index < self.lines.len() {
            frame.set(
                self.output.position,
                TypedValue::String(self.lines[self.index].clone()),
            );
            self.index += 1;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Expr;
    use crate::query::frame::Frame;
    use crate::query::symbols::{SymbolKind, SymbolTable};
    use crate::storage::GraphStore;

    fn int_list(values: &[i64]) -> TypedValue {
        TypedValue::List(values.iter().map(|v| TypedValue::Int(*v)).collect())
    }

    #[test]
    fn cartesian_materializes_left_and_crosses_every_right_row() {
        let mut storage = AstStorage::default();
        let left_list = storage.add(Expr::Literal(int_list(&[1, 2])));
        let right_list = storage.add(Expr::Literal(int_list(&[10, 20, 30])));

        let mut table = SymbolTable::default();
        let x = table.create_named("x", SymbolKind::Value);
        let y = table.create_named("y", SymbolKind::Value);

        let op = LogicalOperator::Cartesian {
            left: Box::new(LogicalOperator::Unwind {
                input: Box::new(LogicalOperator::Once),
                expr: left_list,
                output: x.clone(),
            }),
            right: Box::new(LogicalOperator::Unwind {
                input: Box::new(LogicalOperator::Once),
                expr: right_list,
                output: y.clone(),
            }),
            left_symbols: vec![x.clone()],
            right_symbols: vec![y.clone()],
        };

        let store = GraphStore::new();
        let accessor = store.access();
        let mut ctx = crate::query::context::ExecutionContext::new(&accessor);
        ctx.symbol_table = table;
        let mut frame = Frame::new(ctx.symbol_table.max_position());

        let mut rows = Vec::new();
        let mut cursor = op.make_cursor(&storage);
        while cursor.pull(&mut frame, &ctx).unwrap() {
            let (TypedValue::Int(a), TypedValue::Int(b)) =
                (frame[&x].clone(), frame[&y].clone())
            else {
                panic!("expected integers");
            };
            rows.push((a, b));
        }
        assert_eq!(rows.len(), 6);
        assert!(rows.contains(&(1, 10)) && rows.contains(&(2, 30)));
    }

    #[test]
    fn cartesian_with_empty_left_produces_nothing() {
        let mut storage = AstStorage::default();
        let empty = storage.add(Expr::Literal(int_list(&[])));
        let right_list = storage.add(Expr::Literal(int_list(&[1])));

        let mut table = SymbolTable::default();
        let x = table.create_named("x", SymbolKind::Value);
        let y = table.create_named("y", SymbolKind::Value);

        let op = LogicalOperator::Cartesian {
            left: Box::new(LogicalOperator::Unwind {
                input: Box::new(LogicalOperator::Once),
                expr: empty,
                output: x,
            }),
            right: Box::new(LogicalOperator::Unwind {
                input: Box::new(LogicalOperator::Once),
                expr: right_list,
                output: y,
            }),
            left_symbols: Vec::new(),
            right_symbols: Vec::new(),
        };

        let store = GraphStore::new();
        let accessor = store.access();
        let mut ctx = crate::query::context::ExecutionContext::new(&accessor);
        ctx.symbol_table = table;
        let mut frame = Frame::new(ctx.symbol_table.max_position());
        let mut cursor = op.make_cursor(&storage);
        assert!(!cursor.pull(&mut frame, &ctx).unwrap());
    }

    #[test]
    fn once_emits_a_single_empty_row() {
        let storage = AstStorage::default();
        let store = GraphStore::new();
        let accessor = store.access();
        let ctx = crate::query::context::ExecutionContext::new(&accessor);
        let mut frame = Frame::new(0);
        let op = LogicalOperator::Once;
        let mut cursor = op.make_cursor(&storage);
        assert!(cursor.pull(&mut frame, &ctx).unwrap());
        assert!(!cursor.pull(&mut frame, &ctx).unwrap());
    }
}
