//! Symbol table and the symbol generator pass.
//!
//! Every named and anonymous entity in the query receives a symbol; the
//! highest assigned position sizes the runtime frame. The generator also
//! binds each `Identifier`/`Aggregation` expression node to its symbol, which
//! is what the evaluator and the planner consult later.

use std::collections::HashMap;

use rustc_hash::FxHashMap;

use crate::query::ast::{
    AstStorage, Clause, Expr, ExprId, ExpandKind, Pattern, ProjectionBody, RemoveItem, SetItem,
};
use crate::query::errors::QueryError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolKind {
    Vertex,
    Edge,
    /// Variable-length expansions bind the traversed edges as a list.
    EdgeList,
    Path,
    Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub position: usize,
    pub token_position: Option<usize>,
    pub kind: SymbolKind,
}

/// Insertion-ordered symbol store plus the expression-to-symbol binding map.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    bindings: FxHashMap<ExprId, usize>,
    /// Output symbol of each projection item, keyed by the item expression.
    /// Kept apart from `bindings`: a bare-identifier item keeps its reference
    /// binding while also owning a fresh output slot.
    projection_symbols: FxHashMap<ExprId, usize>,
}

impl SymbolTable {
    fn create(
        &mut self,
        name: &str,
        kind: SymbolKind,
        token_position: Option<usize>,
    ) -> usize {
        let position = self.symbols.len();
        self.symbols.push(Symbol {
            name: name.to_owned(),
            position,
            token_position,
            kind,
        });
        position
    }

    /// Symbol creation hook for the planner (explain output and similar
    /// plan-introduced entities).
    pub fn create_named(&mut self, name: &str, kind: SymbolKind) -> Symbol {
        let position = self.create(name, kind, None);
        self.symbols[position].clone()
    }

    fn bind(&mut self, expr: ExprId, position: usize) {
        self.bindings.insert(expr, position);
    }

    /// Frame width: one slot past the maximum assigned position.
    pub fn max_position(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbol(&self, position: usize) -> &Symbol {
        &self.symbols[position]
    }

    /// Symbol bound to an `Identifier`/`Aggregation` node.
    pub fn at(&self, expr: ExprId) -> Option<&Symbol> {
        self.bindings.get(&expr).map(|pos| &self.symbols[*pos])
    }

    /// Output symbol of a projection item.
    pub fn projection_symbol(&self, expr: ExprId) -> Option<&Symbol> {
        self.projection_symbols
            .get(&expr)
            .map(|pos| &self.symbols[*pos])
    }
}

/// Walks the clause list, declaring and resolving symbols.
pub struct SymbolGenerator<'a> {
    storage: &'a AstStorage,
    table: SymbolTable,
    scope: HashMap<String, usize>,
}

impl<'a> SymbolGenerator<'a> {
    pub fn run(storage: &'a AstStorage) -> Result<SymbolTable, QueryError> {
        let mut generator = SymbolGenerator {
            storage,
            table: SymbolTable::default(),
            scope: HashMap::new(),
        };
        for clause in &storage.query.clauses {
            generator.visit_clause(clause)?;
        }
        Ok(generator.table)
    }

    fn visit_clause(&mut self, clause: &Clause) -> Result<(), QueryError> {
        match clause {
            Clause::Match {
                patterns, filter, ..
            } => {
                for pattern in patterns {
                    self.declare_pattern(pattern, false)?;
                }
                if let Some(filter) = filter {
                    self.bind_expr(*filter)?;
                }
            }
            Clause::Create { patterns } => {
                for pattern in patterns {
                    self.declare_pattern(pattern, true)?;
                }
            }
            Clause::Merge { pattern } => self.declare_pattern(pattern, true)?,
            Clause::Unwind { expr, binding } => {
                self.bind_expr(*expr)?;
                let name = self.identifier_name(*binding);
                if self.scope.contains_key(&name) {
                    return Err(QueryError::semantic(format!(
                        "variable '{name}' already declared"
                    )));
                }
                let position = self.table.create(&name, SymbolKind::Value, None);
                self.table.bind(*binding, position);
                self.scope.insert(name, position);
            }
            Clause::With { body, filter } => {
                self.visit_projection(body)?;
                if let Some(filter) = filter {
                    self.bind_expr(*filter)?;
                }
            }
            Clause::Return { body } => self.visit_projection(body)?,
            Clause::Delete { exprs, .. } => {
                for expr in exprs {
                    self.bind_expr(*expr)?;
                }
            }
            Clause::Set { items } => {
                for item in items {
                    match item {
                        SetItem::Property { base, value, .. } => {
                            self.bind_expr(*base)?;
                            self.bind_expr(*value)?;
                        }
                        SetItem::AllProperties {
                            variable, value, ..
                        } => {
                            self.bind_expr(*variable)?;
                            self.bind_expr(*value)?;
                        }
                        SetItem::Labels { variable, .. } => self.bind_expr(*variable)?,
                    }
                }
            }
            Clause::Remove { items } => {
                for item in items {
                    match item {
                        RemoveItem::Property { base, .. } => self.bind_expr(*base)?,
                        RemoveItem::Labels { variable, .. } => self.bind_expr(*variable)?,
                    }
                }
            }
            Clause::CreateIndex { .. } | Clause::Auth { .. } | Clause::Stream { .. } => {}
        }
        Ok(())
    }

    fn visit_projection(&mut self, body: &ProjectionBody) -> Result<(), QueryError> {
        for item in &body.items {
            self.bind_expr(item.expr)?;
        }
        // Projection narrows the scope to its items. Fresh symbols are
        // created even for pass-through variables; the produce operator
        // copies the value across.
        let mut narrowed = HashMap::new();
        for item in &body.items {
            let position = self
                .table
                .create(&item.name, SymbolKind::Value, item.token_position);
            self.table.projection_symbols.insert(item.expr, position);
            narrowed.insert(item.name.clone(), position);
        }
        // ORDER BY and the trailing WHERE see both the old names and the new
        // ones, with the new ones shadowing.
        let merged: HashMap<String, usize> = self
            .scope
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .chain(narrowed.iter().map(|(k, v)| (k.clone(), *v)))
            .collect();
        let old_scope = std::mem::replace(&mut self.scope, merged);
        for (expr, _) in &body.order_by {
            self.bind_expr(*expr)?;
        }
        if let Some(skip) = body.skip {
            self.bind_expr(skip)?;
        }
        if let Some(limit) = body.limit {
            self.bind_expr(limit)?;
        }
        drop(old_scope);
        self.scope = narrowed;
        Ok(())
    }

    fn declare_pattern(&mut self, pattern: &Pattern, creating: bool) -> Result<(), QueryError> {
        if let Some(path) = pattern.path_binding {
            let name = self.identifier_name(path);
            if self.scope.contains_key(&name) {
                return Err(QueryError::semantic(format!(
                    "path variable '{name}' already declared"
                )));
            }
            let position = self.table.create(&name, SymbolKind::Path, None);
            self.table.bind(path, position);
            self.scope.insert(name, position);
        }
        self.declare_node(&pattern.start)?;
        for (edge, node) in &pattern.steps {
            let name = self.identifier_name(edge.binding);
            let kind = match edge.kind {
                ExpandKind::Single => SymbolKind::Edge,
                ExpandKind::Variable { .. } => SymbolKind::EdgeList,
                ExpandKind::Bfs { .. } => SymbolKind::EdgeList,
            };
            if self.scope.contains_key(&name) {
                return Err(QueryError::semantic(format!(
                    "edge variable '{name}' redeclared"
                )));
            }
            let position = self.table.create(&name, kind, None);
            self.table.bind(edge.binding, position);
            self.scope.insert(name, position);
            for (_, value) in &edge.properties {
                self.bind_expr(*value)?;
            }
            self.declare_node(node)?;
            if creating && edge.types.len() != 1 {
                return Err(QueryError::semantic(
                    "created edges need exactly one type".to_owned(),
                ));
            }
        }
        Ok(())
    }

    fn declare_node(&mut self, node: &crate::query::ast::NodePattern) -> Result<(), QueryError> {
        let name = self.identifier_name(node.binding);
        match self.scope.get(&name) {
            Some(position) => {
                let existing = self.table.symbol(*position);
                if !matches!(existing.kind, SymbolKind::Vertex | SymbolKind::Value) {
                    return Err(QueryError::semantic(format!(
                        "variable '{name}' already used as {:?}",
                        existing.kind
                    )));
                }
                let position = *position;
                self.table.bind(node.binding, position);
            }
            None => {
                let position = self.table.create(&name, SymbolKind::Vertex, None);
                self.table.bind(node.binding, position);
                self.scope.insert(name, position);
            }
        }
        for (_, value) in &node.properties {
            self.bind_expr(*value)?;
        }
        Ok(())
    }

    fn identifier_name(&self, expr: ExprId) -> String {
        match self.storage.expr(expr) {
            Expr::Identifier { name } => name.clone(),
            other => unreachable!("pattern binding is always an identifier, got {other:?}"),
        }
    }

    /// Resolves identifiers in an expression subtree against the current
    /// scope and assigns output symbols to aggregation nodes.
    fn bind_expr(&mut self, root: ExprId) -> Result<(), QueryError> {
        // Collect first; the arena walk takes an immutable borrow.
        let mut identifiers = Vec::new();
        let mut aggregations = Vec::new();
        self.storage.walk(root, &mut |id, expr| match expr {
            Expr::Identifier { name } => identifiers.push((id, name.clone())),
            Expr::Aggregation { .. } => aggregations.push(id),
            _ => {}
        });
        for (id, name) in identifiers {
            match self.scope.get(&name) {
                Some(position) => self.table.bind(id, *position),
                None => {
                    return Err(QueryError::semantic(format!("unbound variable '{name}'")));
                }
            }
        }
        for id in aggregations {
            if self.table.at(id).is_none() {
                let position =
                    self.table
                        .create(&format!("agg#{}", id.0), SymbolKind::Value, None);
                self.table.bind(id, position);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::Parser;
    use crate::query::stripped::StrippedQuery;

    fn table_for(query: &str) -> Result<(AstStorage, SymbolTable), QueryError> {
        let stripped = StrippedQuery::new(query)?;
        let storage = Parser::parse(&stripped)?;
        let table = SymbolGenerator::run(&storage)?;
        Ok((storage, table))
    }

    #[test]
    fn pattern_variables_get_symbols() {
        let (_, table) = table_for("MATCH (a)-[r]->(b) RETURN a, r, b").unwrap();
        // a, r, b + anonymous none + three projection items.
        assert_eq!(table.max_position(), 6);
    }

    #[test]
    fn anonymous_atoms_are_distinct() {
        let (_, table) = table_for("MATCH (a)-->(), (a)-->() RETURN a").unwrap();
        // a, two anon edges, two anon nodes, one projection item.
        assert_eq!(table.max_position(), 6);
    }

    #[test]
    fn unbound_variable_is_semantic_error() {
        let err = table_for("MATCH (a) RETURN b").unwrap_err();
        assert!(matches!(err, QueryError::Semantic(_)));
    }

    #[test]
    fn with_narrows_scope() {
        let err = table_for("MATCH (a)-[r]->(b) WITH a RETURN r").unwrap_err();
        assert!(matches!(err, QueryError::Semantic(_)));
    }

    #[test]
    fn edge_variable_cannot_be_redeclared() {
        let err = table_for("MATCH (a)-[r]->(b), (b)-[r]->(c) RETURN r").unwrap_err();
        assert!(matches!(err, QueryError::Semantic(_)));
    }

    #[test]
    fn aggregations_get_output_symbols() {
        let (storage, table) = table_for("MATCH (n) RETURN count(n) AS c").unwrap();
        let mut found = 0;
        for id in 0..storage.len() {
            let id = crate::query::ast::ExprId(id as u32);
            if matches!(storage.expr(id), Expr::Aggregation { .. }) {
                assert!(table.at(id).is_some());
                found += 1;
            }
        }
        assert_eq!(found, 1);
    }
}
