//! Arena-backed abstract syntax tree.
//!
//! `AstStorage` owns every expression node; clauses, patterns and the
//! operator tree refer to expressions through `ExprId` indices, never through
//! references. The storage clones cheaply enough to back the AST cache.

use crate::query::value::TypedValue;

/// Index of an expression node inside its `AstStorage`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Not,
    Minus,
    IsNull,
    IsNotNull,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggregationOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregationOp {
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name.to_ascii_lowercase().as_str() {
            "count" => AggregationOp::Count,
            "sum" => AggregationOp::Sum,
            "avg" => AggregationOp::Avg,
            "min" => AggregationOp::Min,
            "max" => AggregationOp::Max,
            "collect" => AggregationOp::Collect,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    /// Literal kept in the tree (only `NULL`; everything else is stripped).
    Literal(TypedValue),
    /// Positional parameter: a stripped literal or a caller `$name`.
    Parameter { token_position: usize },
    /// Variable reference; bound to a symbol during symbol generation.
    Identifier { name: String },
    PropertyLookup { base: ExprId, property: String },
    ListLiteral(Vec<ExprId>),
    MapLiteral(Vec<(String, ExprId)>),
    Unary { op: UnaryOp, expr: ExprId },
    Binary { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    FnCall { name: String, args: Vec<ExprId> },
    /// Aggregation inside a projection item; `expr` is `None` for `count(*)`.
    /// Evaluates by reading the symbol the aggregation cursor assigned.
    Aggregation { op: AggregationOp, expr: Option<ExprId> },
    /// Planner-generated test that a vertex carries all the listed labels.
    /// Null base propagates null, so an unmatched optional never fails it.
    LabelsTest { base: ExprId, labels: Vec<String> },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeDirection {
    Out,
    In,
    Both,
}

/// Shape of an edge step inside a pattern.
#[derive(Clone, Debug)]
pub enum ExpandKind {
    Single,
    /// `-[*lo..hi]->`; bounds are expressions evaluated at pull time.
    Variable {
        lower: Option<ExprId>,
        upper: Option<ExprId>,
    },
    /// `-[*bfs..depth]->`; binds no edge variable.
    Bfs { depth: Option<ExprId> },
}

#[derive(Clone, Debug)]
pub struct NodePattern {
    /// Identifier expression carrying the variable name (generated for
    /// anonymous atoms); the symbol table keys off this id.
    pub binding: ExprId,
    pub labels: Vec<String>,
    pub properties: Vec<(String, ExprId)>,
}

#[derive(Clone, Debug)]
pub struct EdgePattern {
    pub binding: ExprId,
    pub types: Vec<String>,
    pub direction: EdgeDirection,
    pub kind: ExpandKind,
    pub properties: Vec<(String, ExprId)>,
}

#[derive(Clone, Debug)]
pub struct Pattern {
    /// Named-path binding (`p = (...)-[...]-(...)`).
    pub path_binding: Option<ExprId>,
    pub start: NodePattern,
    pub steps: Vec<(EdgePattern, NodePattern)>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Clone, Debug)]
pub struct NamedExpr {
    /// Output name: the alias, or the user-written text of the item.
    pub name: String,
    pub expr: ExprId,
    /// First-token position for unaliased items; keys the stripped query's
    /// named-expression map when the header is emitted.
    pub token_position: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct ProjectionBody {
    pub distinct: bool,
    pub items: Vec<NamedExpr>,
    pub order_by: Vec<(ExprId, SortDir)>,
    pub skip: Option<ExprId>,
    pub limit: Option<ExprId>,
}

#[derive(Clone, Debug)]
pub enum SetItem {
    /// `SET n.p = expr`
    Property { base: ExprId, property: String, value: ExprId },
    /// `SET n = expr` / `SET n += expr`
    AllProperties { variable: ExprId, value: ExprId, update: bool },
    /// `SET n:Label1:Label2`
    Labels { variable: ExprId, labels: Vec<String> },
}

#[derive(Clone, Debug)]
pub enum RemoveItem {
    Property { base: ExprId, property: String },
    Labels { variable: ExprId, labels: Vec<String> },
}

/// User administration statements delegated to the auth collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthAction {
    CreateUser { name: String },
    DropUser { name: String },
}

/// Stream administration statements delegated to the stream registry.
#[derive(Clone, Debug)]
pub enum StreamAction {
    Create {
        name: String,
        uri: ExprId,
        batch_interval_ms: Option<ExprId>,
        batch_size: Option<ExprId>,
    },
    Drop { name: String },
    Show,
    Start { name: String, limit: Option<ExprId> },
    Stop { name: String },
    StartAll,
    StopAll,
    Test { name: String, limit: Option<ExprId> },
}

#[derive(Clone, Debug)]
pub enum Clause {
    Match {
        optional: bool,
        patterns: Vec<Pattern>,
        filter: Option<ExprId>,
    },
    Create { patterns: Vec<Pattern> },
    Merge { pattern: Pattern },
    Unwind { expr: ExprId, binding: ExprId },
    With { body: ProjectionBody, filter: Option<ExprId> },
    Return { body: ProjectionBody },
    Delete { detach: bool, exprs: Vec<ExprId> },
    Set { items: Vec<SetItem> },
    Remove { items: Vec<RemoveItem> },
    CreateIndex { label: String, property: String },
    Auth { action: AuthAction },
    Stream { action: StreamAction },
}

#[derive(Clone, Debug, Default)]
pub struct QueryAst {
    pub explain: bool,
    pub clauses: Vec<Clause>,
}

/// Owning arena for one parsed query.
#[derive(Clone, Debug, Default)]
pub struct AstStorage {
    exprs: Vec<Expr>,
    pub query: QueryAst,
}

impl AstStorage {
    pub fn add(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Depth-first walk over an expression subtree.
    pub fn walk(&self, root: ExprId, visit: &mut dyn FnMut(ExprId, &Expr)) {
        let expr = self.expr(root);
        visit(root, expr);
        match expr {
            Expr::PropertyLookup { base, .. } => self.walk(*base, visit),
            Expr::ListLiteral(items) => {
                for item in items {
                    self.walk(*item, visit);
                }
            }
            Expr::MapLiteral(entries) => {
                for (_, value) in entries {
                    self.walk(*value, visit);
                }
            }
            Expr::Unary { expr, .. } => self.walk(*expr, visit),
            Expr::Binary { lhs, rhs, .. } => {
                self.walk(*lhs, visit);
                self.walk(*rhs, visit);
            }
            Expr::FnCall { args, .. } => {
                for arg in args {
                    self.walk(*arg, visit);
                }
            }
            Expr::Aggregation { expr: Some(inner), .. } => self.walk(*inner, visit),
            Expr::LabelsTest { base, .. } => self.walk(*base, visit),
            Expr::Aggregation { expr: None, .. }
            | Expr::Literal(_)
            | Expr::Parameter { .. }
            | Expr::Identifier { .. } => {}
        }
    }

    /// Whether the subtree contains an aggregation node.
    pub fn contains_aggregation(&self, root: ExprId) -> bool {
        let mut found = false;
        self.walk(root, &mut |_, expr| {
            if matches!(expr, Expr::Aggregation { .. }) {
                found = true;
            }
        });
        found
    }
}
