//! Recursive-descent parser over the stripped token stream.
//!
//! The parser is reentrant: all state lives in the `Parser` value, so
//! concurrent interpretations parse freely. Literal tokens arrive already
//! replaced by placeholders and turn into positional `Parameter` nodes; the
//! values travel through the parameter map, never through the AST.

use crate::query::ast::{
    AstStorage, AuthAction, BinaryOp, Clause, EdgeDirection, EdgePattern, ExpandKind, Expr,
    ExprId, NamedExpr, NodePattern, Pattern, ProjectionBody, QueryAst, RemoveItem, SetItem,
    SortDir, StreamAction, UnaryOp,
};
use crate::query::errors::QueryError;
use crate::query::stripped::{StrippedQuery, Token, TokenKind};
use crate::query::value::TypedValue;

pub struct Parser<'a> {
    stripped: &'a StrippedQuery,
    tokens: &'a [Token],
    pos: usize,
    storage: AstStorage,
    anon_counter: usize,
}

impl<'a> Parser<'a> {
    pub fn parse(stripped: &'a StrippedQuery) -> Result<AstStorage, QueryError> {
        let mut parser = Parser {
            stripped,
            tokens: stripped.tokens(),
            pos: 0,
            storage: AstStorage::default(),
            anon_counter: 0,
        };
        let query = parser.parse_query()?;
        parser.storage.query = query;
        Ok(parser.storage)
    }

    // ---- token helpers -----------------------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].position
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].span.0
    }

    fn advance(&mut self) -> &Token {
        let token = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), TokenKind::End)
    }

    fn accept_kw(&mut self, kw: &str) -> bool {
        if self.peek().is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), QueryError> {
        if self.accept_kw(kw) {
            Ok(())
        } else {
            Err(QueryError::syntax(
                self.offset(),
                format!("expected '{kw}'"),
            ))
        }
    }

    fn accept_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), TokenKind::Punct(p) if *p == punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), QueryError> {
        if self.accept_punct(punct) {
            Ok(())
        } else {
            Err(QueryError::syntax(
                self.offset(),
                format!("expected '{punct}'"),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String, QueryError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(QueryError::syntax(self.offset(), "expected identifier")),
        }
    }

    fn fresh_anon(&mut self) -> String {
        self.anon_counter += 1;
        // '#' cannot appear in a lexed identifier, so these never collide
        // with user variables.
        format!("anon#{}", self.anon_counter)
    }

    // ---- query / clauses ---------------------------------------------------

    fn parse_query(&mut self) -> Result<QueryAst, QueryError> {
        let mut query = QueryAst::default();
        if self.accept_kw("EXPLAIN") {
            query.explain = true;
        }
        while !self.at_end() {
            if self.accept_punct(";") {
                break;
            }
            query.clauses.push(self.parse_clause()?);
        }
        if query.clauses.is_empty() {
            return Err(QueryError::syntax(0, "empty query"));
        }
        Ok(query)
    }

    fn parse_clause(&mut self) -> Result<Clause, QueryError> {
        if self.accept_kw("OPTIONAL") {
            self.expect_kw("MATCH")?;
            return self.parse_match(true);
        }
        if self.accept_kw("MATCH") {
            return self.parse_match(false);
        }
        if self.accept_kw("CREATE") {
            return self.parse_create();
        }
        if self.accept_kw("MERGE") {
            let pattern = self.parse_pattern()?;
            return Ok(Clause::Merge { pattern });
        }
        if self.accept_kw("UNWIND") {
            let expr = self.parse_expr()?;
            self.expect_kw("AS")?;
            let name = self.expect_ident()?;
            let binding = self.storage.add(Expr::Identifier { name });
            return Ok(Clause::Unwind { expr, binding });
        }
        if self.accept_kw("WITH") {
            let body = self.parse_projection_body()?;
            let filter = if self.accept_kw("WHERE") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(Clause::With { body, filter });
        }
        if self.accept_kw("RETURN") {
            let body = self.parse_projection_body()?;
            return Ok(Clause::Return { body });
        }
        if self.accept_kw("DETACH") {
            self.expect_kw("DELETE")?;
            return Ok(Clause::Delete {
                detach: true,
                exprs: self.parse_expr_list()?,
            });
        }
        if self.accept_kw("DELETE") {
            return Ok(Clause::Delete {
                detach: false,
                exprs: self.parse_expr_list()?,
            });
        }
        if self.accept_kw("SET") {
            return self.parse_set();
        }
        if self.accept_kw("REMOVE") {
            return self.parse_remove();
        }
        if self.accept_kw("DROP") {
            if self.accept_kw("USER") {
                let name = self.expect_ident()?;
                return Ok(Clause::Auth {
                    action: AuthAction::DropUser { name },
                });
            }
            self.expect_kw("STREAM")?;
            let name = self.expect_ident()?;
            return Ok(Clause::Stream {
                action: StreamAction::Drop { name },
            });
        }
        if self.accept_kw("SHOW") {
            self.expect_kw("STREAMS")?;
            return Ok(Clause::Stream {
                action: StreamAction::Show,
            });
        }
        if self.accept_kw("START") {
            if self.accept_kw("ALL") {
                self.expect_kw("STREAMS")?;
                return Ok(Clause::Stream {
                    action: StreamAction::StartAll,
                });
            }
            self.expect_kw("STREAM")?;
            let name = self.expect_ident()?;
            let limit = if self.accept_kw("LIMIT") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(Clause::Stream {
                action: StreamAction::Start { name, limit },
            });
        }
        if self.accept_kw("STOP") {
            if self.accept_kw("ALL") {
                self.expect_kw("STREAMS")?;
                return Ok(Clause::Stream {
                    action: StreamAction::StopAll,
                });
            }
            self.expect_kw("STREAM")?;
            let name = self.expect_ident()?;
            return Ok(Clause::Stream {
                action: StreamAction::Stop { name },
            });
        }
        if self.accept_kw("TEST") {
            self.expect_kw("STREAM")?;
            let name = self.expect_ident()?;
            let limit = if self.accept_kw("LIMIT") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(Clause::Stream {
                action: StreamAction::Test { name, limit },
            });
        }
        Err(QueryError::syntax(self.offset(), "expected a clause"))
    }

    fn parse_match(&mut self, optional: bool) -> Result<Clause, QueryError> {
        let patterns = self.parse_patterns()?;
        let filter = if self.accept_kw("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Clause::Match {
            optional,
            patterns,
            filter,
        })
    }

    fn parse_create(&mut self) -> Result<Clause, QueryError> {
        if self.accept_kw("INDEX") {
            self.expect_kw("ON")?;
            self.expect_punct(":")?;
            let label = self.expect_ident()?;
            self.expect_punct("(")?;
            let property = self.expect_ident()?;
            self.expect_punct(")")?;
            return Ok(Clause::CreateIndex { label, property });
        }
        if self.accept_kw("USER") {
            let name = self.expect_ident()?;
            return Ok(Clause::Auth {
                action: AuthAction::CreateUser { name },
            });
        }
        if self.accept_kw("STREAM") {
            let name = self.expect_ident()?;
            self.expect_kw("AS")?;
            self.expect_kw("LOAD")?;
            self.expect_kw("DATA")?;
            self.expect_kw("KAFKA")?;
            let uri = self.parse_atom()?;
            let mut batch_interval_ms = None;
            let mut batch_size = None;
            while self.accept_kw("BATCH") {
                if self.accept_kw("INTERVAL") {
                    batch_interval_ms = Some(self.parse_atom()?);
                } else {
                    self.expect_kw("SIZE")?;
                    batch_size = Some(self.parse_atom()?);
                }
            }
            return Ok(Clause::Stream {
                action: StreamAction::Create {
                    name,
                    uri,
                    batch_interval_ms,
                    batch_size,
                },
            });
        }
        let patterns = self.parse_patterns()?;
        Ok(Clause::Create { patterns })
    }

    fn parse_set(&mut self) -> Result<Clause, QueryError> {
        let mut items = Vec::new();
        loop {
            let name = self.expect_ident()?;
            if self.accept_punct(".") {
                // n.p[.q ...] = expr
                let base = self.storage.add(Expr::Identifier { name });
                let (base, property) = self.parse_property_chain(base)?;
                self.expect_punct("=")?;
                let value = self.parse_expr()?;
                items.push(SetItem::Property {
                    base,
                    property,
                    value,
                });
            } else if matches!(self.peek(), TokenKind::Punct(":")) {
                let variable = self.storage.add(Expr::Identifier { name });
                let mut labels = Vec::new();
                while self.accept_punct(":") {
                    labels.push(self.expect_ident()?);
                }
                items.push(SetItem::Labels { variable, labels });
            } else {
                let update = if self.accept_punct("+=") {
                    true
                } else {
                    self.expect_punct("=")?;
                    false
                };
                let variable = self.storage.add(Expr::Identifier { name });
                let value = self.parse_expr()?;
                items.push(SetItem::AllProperties {
                    variable,
                    value,
                    update,
                });
            }
            if !self.accept_punct(",") {
                break;
            }
        }
        Ok(Clause::Set { items })
    }

    fn parse_remove(&mut self) -> Result<Clause, QueryError> {
        let mut items = Vec::new();
        loop {
            let name = self.expect_ident()?;
            if self.accept_punct(".") {
                let base = self.storage.add(Expr::Identifier { name });
                let (base, property) = self.parse_property_chain(base)?;
                items.push(RemoveItem::Property { base, property });
            } else {
                let variable = self.storage.add(Expr::Identifier { name });
                let mut labels = Vec::new();
                while self.accept_punct(":") {
                    labels.push(self.expect_ident()?);
                }
                if labels.is_empty() {
                    return Err(QueryError::syntax(
                        self.offset(),
                        "REMOVE expects a property or labels",
                    ));
                }
                items.push(RemoveItem::Labels { variable, labels });
            }
            if !self.accept_punct(",") {
                break;
            }
        }
        Ok(Clause::Remove { items })
    }

    /// Continues `base.` with one or more property names; returns the base of
    /// the final lookup and the final property name.
    fn parse_property_chain(&mut self, base: ExprId) -> Result<(ExprId, String), QueryError> {
        let mut base = base;
        let mut property = self.expect_ident()?;
        while self.accept_punct(".") {
            base = self.storage.add(Expr::PropertyLookup {
                base,
                property: property.clone(),
            });
            property = self.expect_ident()?;
        }
        Ok((base, property))
    }

    fn parse_projection_body(&mut self) -> Result<ProjectionBody, QueryError> {
        let mut body = ProjectionBody {
            distinct: self.accept_kw("DISTINCT"),
            ..ProjectionBody::default()
        };
        loop {
            let token_position = self.position();
            let expr = self.parse_expr()?;
            if self.accept_kw("AS") {
                let name = self.expect_ident()?;
                body.items.push(NamedExpr {
                    name,
                    expr,
                    token_position: None,
                });
            } else {
                let name = self
                    .stripped
                    .named_expressions()
                    .get(&token_position)
                    .cloned()
                    .unwrap_or_else(|| format!("expr{token_position}"));
                body.items.push(NamedExpr {
                    name,
                    expr,
                    token_position: Some(token_position),
                });
            }
            if !self.accept_punct(",") {
                break;
            }
        }
        if self.accept_kw("ORDER") {
            self.expect_kw("BY")?;
            loop {
                let key = self.parse_expr()?;
                let dir = if self.accept_kw("DESC") || self.accept_kw("DESCENDING") {
                    SortDir::Desc
                } else {
                    let _ = self.accept_kw("ASC") || self.accept_kw("ASCENDING");
                    SortDir::Asc
                };
                body.order_by.push((key, dir));
                if !self.accept_punct(",") {
                    break;
                }
            }
        }
        if self.accept_kw("SKIP") {
            body.skip = Some(self.parse_expr()?);
        }
        if self.accept_kw("LIMIT") {
            body.limit = Some(self.parse_expr()?);
        }
        Ok(body)
    }

    fn parse_expr_list(&mut self) -> Result<Vec<ExprId>, QueryError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept_punct(",") {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    // ---- patterns ----------------------------------------------------------

    fn parse_patterns(&mut self) -> Result<Vec<Pattern>, QueryError> {
        let mut patterns = vec![self.parse_pattern()?];
        while self.accept_punct(",") {
            patterns.push(self.parse_pattern()?);
        }
        Ok(patterns)
    }

    fn parse_pattern(&mut self) -> Result<Pattern, QueryError> {
        // Named path: `p = (...)`.
        let path_binding = if matches!(self.peek(), TokenKind::Ident(_))
            && matches!(self.peek_at(1), TokenKind::Punct("="))
        {
            let name = self.expect_ident()?;
            self.expect_punct("=")?;
            Some(self.storage.add(Expr::Identifier { name }))
        } else {
            None
        };
        let start = self.parse_node_pattern()?;
        let mut steps = Vec::new();
        loop {
            let Some(edge) = self.try_parse_edge_pattern()? else {
                break;
            };
            let node = self.parse_node_pattern()?;
            steps.push((edge, node));
        }
        Ok(Pattern {
            path_binding,
            start,
            steps,
        })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern, QueryError> {
        self.expect_punct("(")?;
        let name = match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            _ => self.fresh_anon(),
        };
        let binding = self.storage.add(Expr::Identifier { name });
        let mut labels = Vec::new();
        while self.accept_punct(":") {
            labels.push(self.expect_ident()?);
        }
        let properties = if matches!(self.peek(), TokenKind::Punct("{")) {
            self.parse_property_map()?
        } else {
            Vec::new()
        };
        self.expect_punct(")")?;
        Ok(NodePattern {
            binding,
            labels,
            properties,
        })
    }

    /// Parses an edge step if one follows; `(a)` followed by `,` or a clause
    /// keyword ends the pattern.
    fn try_parse_edge_pattern(&mut self) -> Result<Option<EdgePattern>, QueryError> {
        let (from_left, has_details) = if self.accept_punct("<-") {
            (true, self.accept_punct("["))
        } else if matches!(self.peek(), TokenKind::Punct("-"))
            && matches!(self.peek_at(1), TokenKind::Punct("[" | "-" | "->"))
        {
            self.advance();
            (false, self.accept_punct("["))
        } else {
            return Ok(None);
        };

        let mut name = None;
        let mut types = Vec::new();
        let mut kind = ExpandKind::Single;
        let mut properties = Vec::new();
        if has_details {
            if let TokenKind::Ident(n) = self.peek().clone() {
                self.advance();
                name = Some(n);
            }
            if self.accept_punct(":") {
                types.push(self.expect_ident()?);
                while self.accept_punct("|") {
                    let _ = self.accept_punct(":");
                    types.push(self.expect_ident()?);
                }
            }
            if self.accept_punct("*") {
                kind = self.parse_expansion_bounds(name.is_some())?;
            }
            if matches!(self.peek(), TokenKind::Punct("{")) {
                properties = self.parse_property_map()?;
            }
            self.expect_punct("]")?;
        }

        let to_right = if self.accept_punct("->") {
            true
        } else {
            self.expect_punct("-")?;
            false
        };
        let direction = match (from_left, to_right) {
            (true, false) => EdgeDirection::In,
            (false, true) => EdgeDirection::Out,
            _ => EdgeDirection::Both,
        };

        let name = name.unwrap_or_else(|| self.fresh_anon());
        let binding = self.storage.add(Expr::Identifier { name });
        Ok(Some(EdgePattern {
            binding,
            types,
            direction,
            kind,
            properties,
        }))
    }

    /// Everything after `*` inside edge details: `*`, `*2`, `*1..3`, `*..3`,
    /// `*bfs..3`.
    fn parse_expansion_bounds(&mut self, named: bool) -> Result<ExpandKind, QueryError> {
        if self.accept_kw("BFS") {
            if named {
                return Err(QueryError::syntax(
                    self.offset(),
                    "breadth-first expansion does not bind an edge variable",
                ));
            }
            let depth = if self.accept_punct("..") {
                Some(self.parse_atom()?)
            } else {
                None
            };
            return Ok(ExpandKind::Bfs { depth });
        }
        let lower = if matches!(self.peek(), TokenKind::Placeholder | TokenKind::Param(_)) {
            Some(self.parse_atom()?)
        } else {
            None
        };
        if self.accept_punct("..") {
            let upper = if matches!(self.peek(), TokenKind::Placeholder | TokenKind::Param(_)) {
                Some(self.parse_atom()?)
            } else {
                None
            };
            Ok(ExpandKind::Variable { lower, upper })
        } else {
            // `*n` pins both bounds; bare `*` leaves both open.
            Ok(ExpandKind::Variable {
                lower,
                upper: lower,
            })
        }
    }

    fn parse_property_map(&mut self) -> Result<Vec<(String, ExprId)>, QueryError> {
        self.expect_punct("{")?;
        let mut entries = Vec::new();
        if !self.accept_punct("}") {
            loop {
                let key = self.expect_ident()?;
                self.expect_punct(":")?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if !self.accept_punct(",") {
                    break;
                }
            }
            self.expect_punct("}")?;
        }
        Ok(entries)
    }

    // ---- expressions -------------------------------------------------------

    fn parse_expr(&mut self) -> Result<ExprId, QueryError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ExprId, QueryError> {
        let mut lhs = self.parse_xor()?;
        while self.accept_kw("OR") {
            let rhs = self.parse_xor()?;
            lhs = self.storage.add(Expr::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            });
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<ExprId, QueryError> {
        let mut lhs = self.parse_and()?;
        while self.accept_kw("XOR") {
            let rhs = self.parse_and()?;
            lhs = self.storage.add(Expr::Binary {
                op: BinaryOp::Xor,
                lhs,
                rhs,
            });
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<ExprId, QueryError> {
        let mut lhs = self.parse_not()?;
        while self.accept_kw("AND") {
            let rhs = self.parse_not()?;
            lhs = self.storage.add(Expr::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            });
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<ExprId, QueryError> {
        if self.accept_kw("NOT") {
            let expr = self.parse_not()?;
            return Ok(self.storage.add(Expr::Unary {
                op: UnaryOp::Not,
                expr,
            }));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<ExprId, QueryError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            TokenKind::Punct("=") => BinaryOp::Eq,
            TokenKind::Punct("<>") | TokenKind::Punct("!=") => BinaryOp::Ne,
            TokenKind::Punct("<") => BinaryOp::Lt,
            TokenKind::Punct("<=") => BinaryOp::Le,
            TokenKind::Punct(">") => BinaryOp::Gt,
            TokenKind::Punct(">=") => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(self.storage.add(Expr::Binary { op, lhs, rhs }))
    }

    fn parse_additive(&mut self) -> Result<ExprId, QueryError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Punct("+") => BinaryOp::Add,
                TokenKind::Punct("-") => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.storage.add(Expr::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<ExprId, QueryError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Punct("*") => BinaryOp::Mul,
                TokenKind::Punct("/") => BinaryOp::Div,
                TokenKind::Punct("%") => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.storage.add(Expr::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ExprId, QueryError> {
        if self.accept_punct("-") {
            let expr = self.parse_unary()?;
            return Ok(self.storage.add(Expr::Unary {
                op: UnaryOp::Minus,
                expr,
            }));
        }
        if self.accept_punct("+") {
            return self.parse_unary();
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<ExprId, QueryError> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.accept_punct(".") {
                let property = self.expect_ident()?;
                expr = self.storage.add(Expr::PropertyLookup {
                    base: expr,
                    property,
                });
                continue;
            }
            if self.peek().is_kw("IS") {
                self.advance();
                let negated = self.accept_kw("NOT");
                self.expect_kw("NULL")?;
                expr = self.storage.add(Expr::Unary {
                    op: if negated {
                        UnaryOp::IsNotNull
                    } else {
                        UnaryOp::IsNull
                    },
                    expr,
                });
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<ExprId, QueryError> {
        match self.peek().clone() {
            TokenKind::Placeholder => {
                let token_position = self.position();
                self.advance();
                Ok(self.storage.add(Expr::Parameter { token_position }))
            }
            TokenKind::Param(_) => {
                let token_position = self.position();
                self.advance();
                Ok(self.storage.add(Expr::Parameter { token_position }))
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                if !self.accept_punct("]") {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.accept_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct("]")?;
                }
                Ok(self.storage.add(Expr::ListLiteral(items)))
            }
            TokenKind::Punct("{") => {
                let entries = self.parse_property_map()?;
                Ok(self.storage.add(Expr::MapLiteral(entries)))
            }
            TokenKind::Ident(name) => {
                if self.peek().is_kw("NULL") {
                    self.advance();
                    return Ok(self.storage.add(Expr::Literal(TypedValue::Null)));
                }
                self.advance();
                if self.accept_punct("(") {
                    return self.parse_call(name);
                }
                Ok(self.storage.add(Expr::Identifier { name }))
            }
            _ => Err(QueryError::syntax(self.offset(), "expected an expression")),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<ExprId, QueryError> {
        use crate::query::ast::AggregationOp;
        if let Some(op) = AggregationOp::from_name(&name) {
            // count(*) carries no inner expression.
            if matches!(op, AggregationOp::Count) && self.accept_punct("*") {
                self.expect_punct(")")?;
                return Ok(self.storage.add(Expr::Aggregation { op, expr: None }));
            }
            let inner = self.parse_expr()?;
            self.expect_punct(")")?;
            return Ok(self.storage.add(Expr::Aggregation {
                op,
                expr: Some(inner),
            }));
        }
        let mut args = Vec::new();
        if !self.accept_punct(")") {
            loop {
                args.push(self.parse_expr()?);
                if !self.accept_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        Ok(self.storage.add(Expr::FnCall { name, args }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Result<AstStorage, QueryError> {
        let stripped = StrippedQuery::new(query)?;
        Parser::parse(&stripped)
    }

    #[test]
    fn match_return() {
        let storage = parse("MATCH (n:Person {age: 30}) RETURN n").unwrap();
        assert_eq!(storage.query.clauses.len(), 2);
        let Clause::Match { patterns, .. } = &storage.query.clauses[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(patterns[0].start.labels, vec!["Person"]);
        assert_eq!(patterns[0].start.properties.len(), 1);
    }

    #[test]
    fn edge_directions() {
        for (query, expected) in [
            ("MATCH (a)-->(b) RETURN a", EdgeDirection::Out),
            ("MATCH (a)<--(b) RETURN a", EdgeDirection::In),
            ("MATCH (a)--(b) RETURN a", EdgeDirection::Both),
            ("MATCH (a)-[r:T]->(b) RETURN a", EdgeDirection::Out),
            ("MATCH (a)<-[r:T]-(b) RETURN a", EdgeDirection::In),
        ] {
            let storage = parse(query).unwrap();
            let Clause::Match { patterns, .. } = &storage.query.clauses[0] else {
                panic!("expected MATCH");
            };
            assert_eq!(patterns[0].steps[0].0.direction, expected, "{query}");
        }
    }

    #[test]
    fn variable_length_and_bfs_edges() {
        let storage = parse("MATCH (a)-[*1..3]->(b) RETURN a").unwrap();
        let Clause::Match { patterns, .. } = &storage.query.clauses[0] else {
            panic!();
        };
        let ExpandKind::Variable { lower, upper } = &patterns[0].steps[0].0.kind else {
            panic!("expected variable expansion");
        };
        assert!(lower.is_some() && upper.is_some());

        let storage = parse("MATCH (a)-[*bfs..2]->(b) RETURN a").unwrap();
        let Clause::Match { patterns, .. } = &storage.query.clauses[0] else {
            panic!();
        };
        assert!(matches!(
            patterns[0].steps[0].0.kind,
            ExpandKind::Bfs { depth: Some(_) }
        ));

        assert!(parse("MATCH (a)-[r *bfs..2]->(b) RETURN a").is_err());
    }

    #[test]
    fn exact_count_pins_both_bounds() {
        let storage = parse("MATCH (a)-[*2]->(b) RETURN a").unwrap();
        let Clause::Match { patterns, .. } = &storage.query.clauses[0] else {
            panic!();
        };
        let ExpandKind::Variable { lower, upper } = &patterns[0].steps[0].0.kind else {
            panic!();
        };
        assert_eq!(lower, upper);
        assert!(lower.is_some());
    }

    #[test]
    fn projection_aliases_and_modifiers() {
        let storage =
            parse("MATCH (n) RETURN DISTINCT n.a AS x, n.b ORDER BY x DESC SKIP 1 LIMIT 2")
                .unwrap();
        let Clause::Return { body } = &storage.query.clauses[1] else {
            panic!("expected RETURN");
        };
        assert!(body.distinct);
        assert_eq!(body.items.len(), 2);
        assert_eq!(body.items[0].name, "x");
        assert!(body.items[0].token_position.is_none());
        assert_eq!(body.items[1].name, "n.b");
        assert!(body.items[1].token_position.is_some());
        assert_eq!(body.order_by.len(), 1);
        assert_eq!(body.order_by[0].1, SortDir::Desc);
        assert!(body.skip.is_some() && body.limit.is_some());
    }

    #[test]
    fn named_path() {
        let storage = parse("MATCH p = (a)-[r]->(b) RETURN p").unwrap();
        let Clause::Match { patterns, .. } = &storage.query.clauses[0] else {
            panic!();
        };
        assert!(patterns[0].path_binding.is_some());
    }

    #[test]
    fn create_index_statement() {
        let storage = parse("CREATE INDEX ON :Person(age)").unwrap();
        assert!(matches!(
            &storage.query.clauses[0],
            Clause::CreateIndex { label, property } if label == "Person" && property == "age"
        ));
    }

    #[test]
    fn auth_and_stream_statements() {
        assert!(matches!(
            &parse("CREATE USER alice").unwrap().query.clauses[0],
            Clause::Auth {
                action: AuthAction::CreateUser { name }
            } if name == "alice"
        ));
        assert!(matches!(
            &parse("SHOW STREAMS").unwrap().query.clauses[0],
            Clause::Stream {
                action: StreamAction::Show
            }
        ));
        assert!(matches!(
            &parse("CREATE STREAM s AS LOAD DATA KAFKA 'k/topic' BATCH SIZE 10")
                .unwrap()
                .query
                .clauses[0],
            Clause::Stream {
                action: StreamAction::Create { name, batch_size: Some(_), .. }
            } if name == "s"
        ));
        assert!(matches!(
            &parse("START ALL STREAMS").unwrap().query.clauses[0],
            Clause::Stream {
                action: StreamAction::StartAll
            }
        ));
    }

    #[test]
    fn explain_prefix() {
        let storage = parse("EXPLAIN MATCH (n) RETURN n").unwrap();
        assert!(storage.query.explain);
    }

    #[test]
    fn write_clauses() {
        let storage = parse(
            "MATCH (n) SET n.age = 1, n:Label, n += {a: 2} REMOVE n.old DETACH DELETE n",
        )
        .unwrap();
        assert_eq!(storage.query.clauses.len(), 4);
        let Clause::Set { items } = &storage.query.clauses[1] else {
            panic!("expected SET");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(
            &storage.query.clauses[3],
            Clause::Delete { detach: true, .. }
        ));
    }

    #[test]
    fn unprovided_dollar_parameters_parse() {
        let storage = parse("MATCH (n {name: $who}) RETURN n").unwrap();
        assert_eq!(storage.query.clauses.len(), 2);
    }

    #[test]
    fn syntax_error_reports_offset() {
        let err = parse("MATCH (n RETURN n").unwrap_err();
        assert!(matches!(err, QueryError::Syntax { .. }));
    }
}
