//! The physical operator tree.
//!
//! Operator nodes are immutable once planned and carry no execution state;
//! one tree backs any number of concurrent cursors. Expressions are `ExprId`
//! indices into the plan's sibling AST storage, and graph names are interned
//! to ids at plan time (the interning tables are append-only, so cached plans
//! stay valid across transactions).

use crate::query::ast::{AstStorage, AuthAction, ExprId, SortDir};
use crate::query::plan::cursors;
use crate::query::symbols::Symbol;
use crate::storage::Dir;
use crate::types::{EdgeTypeId, LabelId, PropId};

/// Cursor capability: one `pull` per produced row.
pub trait Cursor {
    /// Writes zero or more symbol slots and returns true when a row was
    /// produced, false when exhausted.
    fn pull(
        &mut self,
        frame: &mut crate::query::frame::Frame,
        ctx: &crate::query::context::ExecutionContext<'_>,
    ) -> Result<bool, crate::query::errors::QueryError>;
}

pub type BoxedCursor<'a> = Box<dyn Cursor + 'a>;

/// Vertex creation recipe shared by `CreateNode` and `CreateExpand`.
#[derive(Clone, Debug)]
pub struct NodeCreationInfo {
    pub symbol: Symbol,
    pub labels: Vec<LabelId>,
    pub properties: Vec<(PropId, ExprId)>,
}

#[derive(Clone, Debug)]
pub struct EdgeCreationInfo {
    pub symbol: Symbol,
    pub edge_type: EdgeTypeId,
    /// Out: from input to the other node; In: the reverse.
    pub direction: Dir,
    pub properties: Vec<(PropId, ExprId)>,
}

/// Inclusive/exclusive range end, evaluated at pull time.
#[derive(Clone, Copy, Debug)]
pub struct RangeEnd {
    pub expr: ExprId,
    pub inclusive: bool,
}

#[derive(Clone, Debug)]
pub enum LogicalOperator {
    /// Implicit input terminator: one empty row, then exhausted.
    Once,
    ScanAll {
        input: Box<LogicalOperator>,
        output: Symbol,
    },
    ScanAllByLabel {
        input: Box<LogicalOperator>,
        output: Symbol,
        label: LabelId,
    },
    ScanAllByLabelPropertyValue {
        input: Box<LogicalOperator>,
        output: Symbol,
        label: LabelId,
        property: PropId,
        value: ExprId,
    },
    ScanAllByLabelPropertyRange {
        input: Box<LogicalOperator>,
        output: Symbol,
        label: LabelId,
        property: PropId,
        lower: Option<RangeEnd>,
        upper: Option<RangeEnd>,
    },
    Expand {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        edge_symbol: Symbol,
        output: Symbol,
        direction: Dir,
        edge_types: Vec<EdgeTypeId>,
        /// The target is already bound: compare instead of binding.
        existing_node: bool,
    },
    ExpandVariable {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        edge_symbol: Symbol,
        output: Symbol,
        direction: Dir,
        edge_types: Vec<EdgeTypeId>,
        lower: Option<ExprId>,
        upper: Option<ExprId>,
        existing_node: bool,
    },
    ExpandBfs {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        output: Symbol,
        direction: Dir,
        edge_types: Vec<EdgeTypeId>,
        depth: Option<ExprId>,
        existing_node: bool,
    },
    ConstructNamedPath {
        input: Box<LogicalOperator>,
        path_symbol: Symbol,
        /// Alternating vertex and edge (or edge-list) symbols.
        segments: Vec<Symbol>,
    },
    Filter {
        input: Box<LogicalOperator>,
        expr: ExprId,
    },
    /// Cross-symbol edge uniqueness within one MATCH; vacuous on null.
    EdgeUniquenessFilter {
        input: Box<LogicalOperator>,
        expand_symbol: Symbol,
        previous: Vec<Symbol>,
    },
    Produce {
        input: Box<LogicalOperator>,
        named_exprs: Vec<(Symbol, ExprId)>,
    },
    Delete {
        input: Box<LogicalOperator>,
        exprs: Vec<ExprId>,
        detach: bool,
    },
    SetProperty {
        input: Box<LogicalOperator>,
        base: ExprId,
        property: PropId,
        value: ExprId,
    },
    SetProperties {
        input: Box<LogicalOperator>,
        symbol: Symbol,
        value: ExprId,
        /// `+=` keeps absent keys, `=` replaces the whole property set.
        update: bool,
    },
    SetLabels {
        input: Box<LogicalOperator>,
        symbol: Symbol,
        labels: Vec<LabelId>,
    },
    RemoveProperty {
        input: Box<LogicalOperator>,
        base: ExprId,
        property: PropId,
    },
    RemoveLabels {
        input: Box<LogicalOperator>,
        symbol: Symbol,
        labels: Vec<LabelId>,
    },
    CreateNode {
        input: Box<LogicalOperator>,
        node: NodeCreationInfo,
    },
    CreateExpand {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        edge: EdgeCreationInfo,
        node: NodeCreationInfo,
        /// The far node is already bound instead of being created.
        existing_node: bool,
    },
    /// Drains and buffers the input, optionally advancing the accessor's
    /// command counter so earlier writes become readable.
    Accumulate {
        input: Box<LogicalOperator>,
        symbols: Vec<Symbol>,
        advance_command: bool,
    },
    Aggregate {
        input: Box<LogicalOperator>,
        aggregations: Vec<AggregateElement>,
        group_by: Vec<ExprId>,
        /// Symbols whose first-in-group values are restored on output rows.
        remember: Vec<Symbol>,
    },
    Skip {
        input: Box<LogicalOperator>,
        expr: ExprId,
    },
    Limit {
        input: Box<LogicalOperator>,
        expr: ExprId,
    },
    OrderBy {
        input: Box<LogicalOperator>,
        keys: Vec<(ExprId, SortDir)>,
    },
    Merge {
        input: Box<LogicalOperator>,
        merge_match: Box<LogicalOperator>,
        merge_create: Box<LogicalOperator>,
    },
    Optional {
        input: Box<LogicalOperator>,
        optional: Box<LogicalOperator>,
        optional_symbols: Vec<Symbol>,
    },
    Cartesian {
        left: Box<LogicalOperator>,
        right: Box<LogicalOperator>,
        left_symbols: Vec<Symbol>,
        right_symbols: Vec<Symbol>,
    },
    Unwind {
        input: Box<LogicalOperator>,
        expr: ExprId,
        output: Symbol,
    },
    Distinct {
        input: Box<LogicalOperator>,
        symbols: Vec<Symbol>,
    },
    CreateIndex {
        label: LabelId,
        property: PropId,
    },
    AuthHandler {
        action: AuthAction,
    },
    CreateStream {
        name: String,
        uri: ExprId,
        batch_interval_ms: Option<ExprId>,
        batch_size: Option<ExprId>,
    },
    DropStream {
        name: String,
    },
    ShowStreams,
    StartStopStream {
        name: String,
        start: bool,
        limit: Option<ExprId>,
    },
    StartStopAllStreams {
        start: bool,
    },
    TestStream {
        name: String,
        limit: Option<ExprId>,
    },
    /// Streams the textual plan of `input` without executing it.
    Explain {
        input: Box<LogicalOperator>,
        output: Symbol,
    },
}

#[derive(Clone, Debug)]
pub struct AggregateElement {
    pub op: crate::query::ast::AggregationOp,
    /// `None` for `count(*)`.
    pub expr: Option<ExprId>,
    pub output_symbol: Symbol,
}

impl LogicalOperator {
    /// Builds a fresh per-execution cursor over this operator tree.
    pub fn make_cursor<'a>(&'a self, storage: &'a AstStorage) -> BoxedCursor<'a> {
        cursors::new_cursor(self, storage)
    }

    /// Output symbols a query tail declares; empty for write/admin roots.
    /// Row-shape-preserving operators delegate to their input.
    pub fn output_symbols(&self) -> Vec<Symbol> {
        match self {
            LogicalOperator::Produce { named_exprs, .. } => {
                named_exprs.iter().map(|(symbol, _)| symbol.clone()).collect()
            }
            LogicalOperator::Explain { output, .. } => vec![output.clone()],
            LogicalOperator::Filter { input, .. }
            | LogicalOperator::EdgeUniquenessFilter { input, .. }
            | LogicalOperator::Skip { input, .. }
            | LogicalOperator::Limit { input, .. }
            | LogicalOperator::OrderBy { input, .. }
            | LogicalOperator::Distinct { input, .. }
            | LogicalOperator::Accumulate { input, .. } => input.output_symbols(),
            _ => Vec::new(),
        }
    }

    /// Whether this operator is a legal non-returning query root: the write
    /// and administrative set. Anything else without output symbols is an
    /// unknown top-level operator.
    pub fn is_write_or_admin(&self) -> bool {
        matches!(
            self,
            LogicalOperator::CreateNode { .. }
                | LogicalOperator::CreateExpand { .. }
                | LogicalOperator::SetProperty { .. }
                | LogicalOperator::SetProperties { .. }
                | LogicalOperator::SetLabels { .. }
                | LogicalOperator::RemoveProperty { .. }
                | LogicalOperator::RemoveLabels { .. }
                | LogicalOperator::Delete { .. }
                | LogicalOperator::Merge { .. }
                | LogicalOperator::CreateIndex { .. }
                | LogicalOperator::AuthHandler { .. }
                | LogicalOperator::CreateStream { .. }
                | LogicalOperator::DropStream { .. }
                | LogicalOperator::ShowStreams
                | LogicalOperator::StartStopStream { .. }
                | LogicalOperator::StartStopAllStreams { .. }
                | LogicalOperator::TestStream { .. }
        )
    }

    /// Name used by the plan printer.
    pub fn name(&self) -> &'static str {
        match self {
            LogicalOperator::Once => "Once",
            LogicalOperator::ScanAll { .. } => "ScanAll",
            LogicalOperator::ScanAllByLabel { .. } => "ScanAllByLabel",
            LogicalOperator::ScanAllByLabelPropertyValue { .. } => "ScanAllByLabelPropertyValue",
            LogicalOperator::ScanAllByLabelPropertyRange { .. } => "ScanAllByLabelPropertyRange",
            LogicalOperator::Expand { .. } => "Expand",
            LogicalOperator::ExpandVariable { .. } => "ExpandVariable",
            LogicalOperator::ExpandBfs { .. } => "ExpandBFS",
            LogicalOperator::ConstructNamedPath { .. } => "ConstructNamedPath",
            LogicalOperator::Filter { .. } => "Filter",
            LogicalOperator::EdgeUniquenessFilter { .. } => "EdgeUniquenessFilter",
            LogicalOperator::Produce { .. } => "Produce",
            LogicalOperator::Delete { .. } => "Delete",
            LogicalOperator::SetProperty { .. } => "SetProperty",
            LogicalOperator::SetProperties { .. } => "SetProperties",
            LogicalOperator::SetLabels { .. } => "SetLabels",
            LogicalOperator::RemoveProperty { .. } => "RemoveProperty",
            LogicalOperator::RemoveLabels { .. } => "RemoveLabels",
            LogicalOperator::CreateNode { .. } => "CreateNode",
            LogicalOperator::CreateExpand { .. } => "CreateExpand",
            LogicalOperator::Accumulate { .. } => "Accumulate",
            LogicalOperator::Aggregate { .. } => "Aggregate",
            LogicalOperator::Skip { .. } => "Skip",
            LogicalOperator::Limit { .. } => "Limit",
            LogicalOperator::OrderBy { .. } => "OrderBy",
            LogicalOperator::Merge { .. } => "Merge",
            LogicalOperator::Optional { .. } => "Optional",
            LogicalOperator::Cartesian { .. } => "Cartesian",
            LogicalOperator::Unwind { .. } => "Unwind",
            LogicalOperator::Distinct { .. } => "Distinct",
            LogicalOperator::CreateIndex { .. } => "CreateIndex",
            LogicalOperator::AuthHandler { .. } => "AuthHandler",
            LogicalOperator::CreateStream { .. } => "CreateStream",
            LogicalOperator::DropStream { .. } => "DropStream",
            LogicalOperator::ShowStreams => "ShowStreams",
            LogicalOperator::StartStopStream { .. } => "StartStopStream",
            LogicalOperator::StartStopAllStreams { .. } => "StartStopAllStreams",
            LogicalOperator::TestStream { .. } => "TestStream",
            LogicalOperator::Explain { .. } => "Explain",
        }
    }

    /// The single input of a chain operator, where one exists.
    pub fn input(&self) -> Option<&LogicalOperator> {
        match self {
            LogicalOperator::ScanAll { input, .. }
            | LogicalOperator::ScanAllByLabel { input, .. }
            | LogicalOperator::ScanAllByLabelPropertyValue { input, .. }
            | LogicalOperator::ScanAllByLabelPropertyRange { input, .. }
            | LogicalOperator::Expand { input, .. }
            | LogicalOperator::ExpandVariable { input, .. }
            | LogicalOperator::ExpandBfs { input, .. }
            | LogicalOperator::ConstructNamedPath { input, .. }
            | LogicalOperator::Filter { input, .. }
            | LogicalOperator::EdgeUniquenessFilter { input, .. }
            | LogicalOperator::Produce { input, .. }
            | LogicalOperator::Delete { input, .. }
            | LogicalOperator::SetProperty { input, .. }
            | LogicalOperator::SetProperties { input, .. }
            | LogicalOperator::SetLabels { input, .. }
            | LogicalOperator::RemoveProperty { input, .. }
            | LogicalOperator::RemoveLabels { input, .. }
            | LogicalOperator::CreateNode { input, .. }
            | LogicalOperator::CreateExpand { input, .. }
            | LogicalOperator::Accumulate { input, .. }
            | LogicalOperator::Aggregate { input, .. }
            | LogicalOperator::Skip { input, .. }
            | LogicalOperator::Limit { input, .. }
            | LogicalOperator::OrderBy { input, .. }
            | LogicalOperator::Merge { input, .. }
            | LogicalOperator::Optional { input, .. }
            | LogicalOperator::Unwind { input, .. }
            | LogicalOperator::Distinct { input, .. }
            | LogicalOperator::Explain { input, .. } => Some(input.as_ref()),
            _ => None,
        }
    }
}
