//! Expression evaluation over the AST arena.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::query::ast::{AstStorage, BinaryOp, Expr, ExprId, UnaryOp};
use crate::query::context::Parameters;
use crate::query::errors::QueryError;
use crate::query::frame::Frame;
use crate::query::symbols::SymbolTable;
use crate::query::value::TypedValue;
use crate::storage::GraphAccessor;

pub struct ExpressionEvaluator<'a> {
    storage: &'a AstStorage,
    symbol_table: &'a SymbolTable,
    parameters: &'a Parameters,
    accessor: &'a GraphAccessor,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(
        storage: &'a AstStorage,
        symbol_table: &'a SymbolTable,
        parameters: &'a Parameters,
        accessor: &'a GraphAccessor,
    ) -> Self {
        Self {
            storage,
            symbol_table,
            parameters,
            accessor,
        }
    }

    pub fn eval(&self, frame: &Frame, id: ExprId) -> Result<TypedValue, QueryError> {
        match self.storage.expr(id) {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Parameter { token_position } => self
                .parameters
                .get(*token_position)
                .cloned()
                .ok_or_else(|| {
                    QueryError::runtime(format!(
                        "no value for parameter at position {token_position}"
                    ))
                }),
            Expr::Identifier { name } => {
                let symbol = self.symbol_table.at(id).ok_or_else(|| {
                    QueryError::semantic(format!("variable '{name}' has no symbol"))
                })?;
                Ok(frame[symbol].clone())
            }
            Expr::PropertyLookup { base, property } => {
                self.property_of(&self.eval(frame, *base)?, property)
            }
            Expr::ListLiteral(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(frame, *item)?);
                }
                Ok(TypedValue::List(values))
            }
            Expr::MapLiteral(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(frame, *value)?);
                }
                Ok(TypedValue::Map(map))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(frame, *expr)?;
                match op {
                    UnaryOp::Not => Ok(value.not()?),
                    UnaryOp::Minus => Ok(value.neg()?),
                    UnaryOp::IsNull => Ok(TypedValue::Bool(value.is_null())),
                    UnaryOp::IsNotNull => Ok(TypedValue::Bool(!value.is_null())),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.eval(frame, *lhs)?;
                let b = self.eval(frame, *rhs)?;
                self.binary(*op, &a, &b)
            }
            Expr::FnCall { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(frame, *arg)?);
                }
                self.call(name, &values)
            }
            Expr::LabelsTest { base, labels } => match self.eval(frame, *base)? {
                TypedValue::Null => Ok(TypedValue::Null),
                TypedValue::Vertex(v) => {
                    let present = self.accessor.labels_of(v).map_err(QueryError::from)?;
                    let all = labels
                        .iter()
                        .all(|name| present.contains(&self.accessor.label_id(name)));
                    Ok(TypedValue::Bool(all))
                }
                other => Err(QueryError::runtime(format!(
                    "labels exist only on vertices, not {}",
                    other.kind().name()
                ))),
            },
            Expr::Aggregation { .. } => {
                // The aggregation cursor wrote the result into the symbol
                // assigned to this node.
                let symbol = self
                    .symbol_table
                    .at(id)
                    .ok_or_else(|| QueryError::semantic("aggregation without a symbol"))?;
                Ok(frame[symbol].clone())
            }
        }
    }

    /// The value of `base.property`, for every base kind that has properties.
    pub fn property_of(
        &self,
        base: &TypedValue,
        property: &str,
    ) -> Result<TypedValue, QueryError> {
        match base {
            TypedValue::Null => Ok(TypedValue::Null),
            TypedValue::Vertex(v) => {
                let prop = self.accessor.property_id(property);
                Ok(self.accessor.vertex_property(*v, prop)?)
            }
            TypedValue::Edge(e) => {
                let prop = self.accessor.property_id(property);
                Ok(self.accessor.edge_property(e.id, prop)?)
            }
            TypedValue::Map(map) => Ok(map.get(property).cloned().unwrap_or(TypedValue::Null)),
            other => Err(QueryError::runtime(format!(
                "cannot look up property '{}' on {}",
                property,
                other.kind().name()
            ))),
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        a: &TypedValue,
        b: &TypedValue,
    ) -> Result<TypedValue, QueryError> {
        let value = match op {
            BinaryOp::Add => a.add(b)?,
            BinaryOp::Sub => a.sub(b)?,
            BinaryOp::Mul => a.mul(b)?,
            BinaryOp::Div => a.div(b)?,
            BinaryOp::Mod => a.rem(b)?,
            BinaryOp::And => a.and(b)?,
            BinaryOp::Or => a.or(b)?,
            BinaryOp::Xor => a.xor(b)?,
            BinaryOp::Eq => a.eq_ternary(b),
            BinaryOp::Ne => a.eq_ternary(b).not()?,
            BinaryOp::Lt => self.compare(a, b, |o| o == Ordering::Less)?,
            BinaryOp::Le => self.compare(a, b, |o| o != Ordering::Greater)?,
            BinaryOp::Gt => self.compare(a, b, |o| o == Ordering::Greater)?,
            BinaryOp::Ge => self.compare(a, b, |o| o != Ordering::Less)?,
        };
        Ok(value)
    }

    fn compare(
        &self,
        a: &TypedValue,
        b: &TypedValue,
        accept: fn(Ordering) -> bool,
    ) -> Result<TypedValue, QueryError> {
        if a.is_null() || b.is_null() {
            return Ok(TypedValue::Null);
        }
        Ok(TypedValue::Bool(accept(a.try_cmp(b)?)))
    }

    fn call(&self, name: &str, args: &[TypedValue]) -> Result<TypedValue, QueryError> {
        match name.to_ascii_lowercase().as_str() {
            "id" => match args {
                [TypedValue::Vertex(v)] => Ok(TypedValue::Int(v.0 as i64)),
                [TypedValue::Edge(e)] => Ok(TypedValue::Int(e.id.0 as i64)),
                [TypedValue::Null] => Ok(TypedValue::Null),
                _ => Err(QueryError::runtime("id() expects a vertex or an edge")),
            },
            "labels" => match args {
                [TypedValue::Vertex(v)] => {
                    let labels = self.accessor.labels_of(*v).map_err(QueryError::from)?;
                    Ok(TypedValue::List(
                        labels
                            .into_iter()
                            .map(|l| TypedValue::String(self.accessor.label_name(l)))
                            .collect(),
                    ))
                }
                [TypedValue::Null] => Ok(TypedValue::Null),
                _ => Err(QueryError::runtime("labels() expects a vertex")),
            },
            "type" => match args {
                [TypedValue::Edge(e)] => Ok(TypedValue::String(
                    self.accessor.edge_type_name(e.edge_type),
                )),
                [TypedValue::Null] => Ok(TypedValue::Null),
                _ => Err(QueryError::runtime("type() expects an edge")),
            },
            "size" => match args {
                [TypedValue::List(items)] => Ok(TypedValue::Int(items.len() as i64)),
                [TypedValue::String(s)] => Ok(TypedValue::Int(s.chars().count() as i64)),
                [TypedValue::Null] => Ok(TypedValue::Null),
                _ => Err(QueryError::runtime("size() expects a list or a string")),
            },
            "coalesce" => Ok(args
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(TypedValue::Null)),
            other => Err(QueryError::runtime(format!("unknown function '{other}'"))),
        }
    }
}
