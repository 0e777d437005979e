//! Runtime value union flowing through frames, expressions and result rows.
//!
//! Comparisons and arithmetic follow ternary null semantics: an operation
//! with a null operand yields null, except where noted. Integers and floats
//! promote pairwise (any float operand makes the result a float); every other
//! cross-kind operation is a type error surfaced to the caller.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EdgeId, EdgeTypeId, VertexId};

/// Edge handle carried inside values. Endpoints and type ride along so path
/// assembly and uniqueness checks need no storage round trip.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EdgeRef {
    pub id: EdgeId,
    pub from: VertexId,
    pub to: VertexId,
    pub edge_type: EdgeTypeId,
}

impl EdgeRef {
    /// The endpoint opposite to `vertex`.
    pub fn other_end(&self, vertex: VertexId) -> VertexId {
        if self.from == vertex {
            self.to
        } else {
            self.from
        }
    }
}

/// A walk through the graph: `vertices.len() == edges.len() + 1`, edge `i`
/// connecting vertex `i` and vertex `i + 1` in either direction.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub vertices: Vec<VertexId>,
    pub edges: Vec<EdgeRef>,
}

impl Path {
    pub fn starting_at(vertex: VertexId) -> Self {
        Self {
            vertices: vec![vertex],
            edges: Vec::new(),
        }
    }

    /// Appends an edge and the vertex it leads to.
    pub fn extend(&mut self, edge: EdgeRef, vertex: VertexId) {
        self.edges.push(edge);
        self.vertices.push(vertex);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<TypedValue>),
    Map(BTreeMap<String, TypedValue>),
    Vertex(VertexId),
    Edge(EdgeRef),
    Path(Path),
}

/// Observable variant tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
    Vertex,
    Edge,
    Path,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Vertex => "vertex",
            ValueKind::Edge => "edge",
            ValueKind::Path => "path",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    IncompatibleTypes {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("cannot apply '{op}' to {operand}")]
    IncompatibleType {
        op: &'static str,
        operand: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),
    #[error("values of kind {0} have no defined ordering against {1}")]
    Unorderable(&'static str, &'static str),
}

type ValueResult = Result<TypedValue, ValueError>;

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::Null => ValueKind::Null,
            TypedValue::Bool(_) => ValueKind::Bool,
            TypedValue::Int(_) => ValueKind::Int,
            TypedValue::Float(_) => ValueKind::Float,
            TypedValue::String(_) => ValueKind::String,
            TypedValue::List(_) => ValueKind::List,
            TypedValue::Map(_) => ValueKind::Map,
            TypedValue::Vertex(_) => ValueKind::Vertex,
            TypedValue::Edge(_) => ValueKind::Edge,
            TypedValue::Path(_) => ValueKind::Path,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Predicate truth: boolean true only. Null and false both fail the
    /// filter, which is what `Filter` wants.
    pub fn is_true(&self) -> bool {
        matches!(self, TypedValue::Bool(true))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Int(i) => Some(*i as f64),
            TypedValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Ternary equality: null against anything is null; numerics compare
    /// across int/float; remaining cross-kind comparisons are false.
    pub fn eq_ternary(&self, other: &TypedValue) -> TypedValue {
        if self.is_null() || other.is_null() {
            return TypedValue::Null;
        }
        TypedValue::Bool(self.equals(other))
    }

    /// Non-ternary structural equality used by grouping and deduplication;
    /// null equals null here.
    pub fn equals(&self, other: &TypedValue) -> bool {
        match (self, other) {
            (TypedValue::Null, TypedValue::Null) => true,
            (TypedValue::Bool(a), TypedValue::Bool(b)) => a == b,
            (TypedValue::String(a), TypedValue::String(b)) => a == b,
            (TypedValue::Vertex(a), TypedValue::Vertex(b)) => a == b,
            (TypedValue::Edge(a), TypedValue::Edge(b)) => a == b,
            (TypedValue::Path(a), TypedValue::Path(b)) => a == b,
            (TypedValue::List(a), TypedValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (TypedValue::Map(a), TypedValue::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equals(vb))
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Ordering for ORDER BY and extrema. Null placement is the caller's job
    /// (sort direction decides where nulls land); here null sorts below
    /// everything. Kinds without a defined mutual order are rejected.
    pub fn try_cmp(&self, other: &TypedValue) -> Result<Ordering, ValueError> {
        match (self, other) {
            (TypedValue::Null, TypedValue::Null) => Ok(Ordering::Equal),
            (TypedValue::Null, _) => Ok(Ordering::Less),
            (_, TypedValue::Null) => Ok(Ordering::Greater),
            (TypedValue::Bool(a), TypedValue::Bool(b)) => Ok(a.cmp(b)),
            (TypedValue::String(a), TypedValue::String(b)) => Ok(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
                _ => Err(ValueError::Unorderable(a.kind().name(), b.kind().name())),
            },
        }
    }

    /// Grouping key with int/float unification, usable in hash sets.
    pub fn group_key(&self) -> GroupKey {
        match self {
            TypedValue::Null => GroupKey::Null,
            TypedValue::Bool(b) => GroupKey::Bool(*b),
            TypedValue::Int(i) => GroupKey::Int(*i),
            TypedValue::Float(f) => {
                // Integral floats collapse onto the integer key so 1 and 1.0
                // land in the same group.
                if f.fract() == 0.0
                    && f.is_finite()
                    && *f >= i64::MIN as f64
                    && *f <= i64::MAX as f64
                {
                    GroupKey::Int(*f as i64)
                } else {
                    GroupKey::FloatBits(f.to_bits())
                }
            }
            TypedValue::String(s) => GroupKey::String(s.clone()),
            TypedValue::List(items) => {
                GroupKey::List(items.iter().map(|v| v.group_key()).collect())
            }
            TypedValue::Map(entries) => GroupKey::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.group_key()))
                    .collect(),
            ),
            TypedValue::Vertex(v) => GroupKey::Vertex(*v),
            TypedValue::Edge(e) => GroupKey::Edge(e.id),
            TypedValue::Path(p) => GroupKey::List(
                p.vertices
                    .iter()
                    .map(|v| GroupKey::Vertex(*v))
                    .chain(p.edges.iter().map(|e| GroupKey::Edge(e.id)))
                    .collect(),
            ),
        }
    }

    pub fn add(&self, other: &TypedValue) -> ValueResult {
        match (self, other) {
            (TypedValue::Null, _) | (_, TypedValue::Null) => Ok(TypedValue::Null),
            (TypedValue::Int(a), TypedValue::Int(b)) => a
                .checked_add(*b)
                .map(TypedValue::Int)
                .ok_or(ValueError::Overflow("+")),
            (TypedValue::String(a), TypedValue::String(b)) => {
                Ok(TypedValue::String(format!("{a}{b}")))
            }
            (TypedValue::List(a), TypedValue::List(b)) => {
                let mut joined = a.clone();
                joined.extend(b.iter().cloned());
                Ok(TypedValue::List(joined))
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(TypedValue::Float(x + y)),
                _ => Err(Self::incompatible("+", a, b)),
            },
        }
    }

    pub fn sub(&self, other: &TypedValue) -> ValueResult {
        self.numeric_op(other, "-", i64::checked_sub, |x, y| x - y)
    }

    pub fn mul(&self, other: &TypedValue) -> ValueResult {
        self.numeric_op(other, "*", i64::checked_mul, |x, y| x * y)
    }

    pub fn div(&self, other: &TypedValue) -> ValueResult {
        match (self, other) {
            (TypedValue::Null, _) | (_, TypedValue::Null) => Ok(TypedValue::Null),
            (TypedValue::Int(_), TypedValue::Int(0)) => Err(ValueError::DivisionByZero),
            (TypedValue::Int(a), TypedValue::Int(b)) => a
                .checked_div(*b)
                .map(TypedValue::Int)
                .ok_or(ValueError::Overflow("/")),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(TypedValue::Float(x / y)),
                _ => Err(Self::incompatible("/", a, b)),
            },
        }
    }

    pub fn rem(&self, other: &TypedValue) -> ValueResult {
        match (self, other) {
            (TypedValue::Null, _) | (_, TypedValue::Null) => Ok(TypedValue::Null),
            (TypedValue::Int(_), TypedValue::Int(0)) => Err(ValueError::DivisionByZero),
            (TypedValue::Int(a), TypedValue::Int(b)) => a
                .checked_rem(*b)
                .map(TypedValue::Int)
                .ok_or(ValueError::Overflow("%")),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(TypedValue::Float(x % y)),
                _ => Err(Self::incompatible("%", a, b)),
            },
        }
    }

    pub fn neg(&self) -> ValueResult {
        match self {
            TypedValue::Null => Ok(TypedValue::Null),
            TypedValue::Int(i) => i
                .checked_neg()
                .map(TypedValue::Int)
                .ok_or(ValueError::Overflow("-")),
            TypedValue::Float(f) => Ok(TypedValue::Float(-f)),
            other => Err(ValueError::IncompatibleType {
                op: "-",
                operand: other.kind().name(),
            }),
        }
    }

    pub fn and(&self, other: &TypedValue) -> ValueResult {
        // Kleene logic: false dominates null.
        match (self.as_bool("AND")?, other.as_bool("AND")?) {
            (Some(false), _) | (_, Some(false)) => Ok(TypedValue::Bool(false)),
            (Some(true), Some(true)) => Ok(TypedValue::Bool(true)),
            _ => Ok(TypedValue::Null),
        }
    }

    pub fn or(&self, other: &TypedValue) -> ValueResult {
        match (self.as_bool("OR")?, other.as_bool("OR")?) {
            (Some(true), _) | (_, Some(true)) => Ok(TypedValue::Bool(true)),
            (Some(false), Some(false)) => Ok(TypedValue::Bool(false)),
            _ => Ok(TypedValue::Null),
        }
    }

    pub fn xor(&self, other: &TypedValue) -> ValueResult {
        match (self.as_bool("XOR")?, other.as_bool("XOR")?) {
            (Some(a), Some(b)) => Ok(TypedValue::Bool(a != b)),
            _ => Ok(TypedValue::Null),
        }
    }

    pub fn not(&self) -> ValueResult {
        match self.as_bool("NOT")? {
            Some(b) => Ok(TypedValue::Bool(!b)),
            None => Ok(TypedValue::Null),
        }
    }

    fn as_bool(&self, op: &'static str) -> Result<Option<bool>, ValueError> {
        match self {
            TypedValue::Null => Ok(None),
            TypedValue::Bool(b) => Ok(Some(*b)),
            other => Err(ValueError::IncompatibleType {
                op,
                operand: other.kind().name(),
            }),
        }
    }

    fn numeric_op(
        &self,
        other: &TypedValue,
        op: &'static str,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> ValueResult {
        match (self, other) {
            (TypedValue::Null, _) | (_, TypedValue::Null) => Ok(TypedValue::Null),
            (TypedValue::Int(a), TypedValue::Int(b)) => int_op(*a, *b)
                .map(TypedValue::Int)
                .ok_or(ValueError::Overflow(op)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(TypedValue::Float(float_op(x, y))),
                _ => Err(Self::incompatible(op, a, b)),
            },
        }
    }

    fn incompatible(op: &'static str, lhs: &TypedValue, rhs: &TypedValue) -> ValueError {
        ValueError::IncompatibleTypes {
            op,
            lhs: lhs.kind().name(),
            rhs: rhs.kind().name(),
        }
    }
}

/// Hashable, totally ordered projection of a value, with int/float collapsed.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum GroupKey {
    Null,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    String(String),
    List(Vec<GroupKey>),
    Map(Vec<(String, GroupKey)>),
    Vertex(VertexId),
    Edge(EdgeId),
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn quoted(value: &TypedValue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match value {
                TypedValue::String(s) => write!(f, "'{s}'"),
                other => write!(f, "{other}"),
            }
        }
        match self {
            TypedValue::Null => write!(f, "null"),
            TypedValue::Bool(b) => write!(f, "{b}"),
            TypedValue::Int(i) => write!(f, "{i}"),
            TypedValue::Float(v) => write!(f, "{v}"),
            TypedValue::String(s) => write!(f, "{s}"),
            TypedValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    quoted(item, f)?;
                }
                write!(f, "]")
            }
            TypedValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: ")?;
                    quoted(item, f)?;
                }
                write!(f, "}}")
            }
            TypedValue::Vertex(v) => write!(f, "(#{})", v.0),
            TypedValue::Edge(e) => write!(f, "[#{}]", e.id.0),
            TypedValue::Path(path) => {
                write!(f, "(#{})", path.vertices[0].0)?;
                for (edge, vertex) in path.edges.iter().zip(path.vertices.iter().skip(1)) {
                    write!(f, "-[#{}]->(#{})", edge.id.0, vertex.0)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        TypedValue::Bool(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        TypedValue::Int(value)
    }
}

impl From<f64> for TypedValue {
    fn from(value: f64) -> Self {
        TypedValue::Float(value)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::String(value.to_owned())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        TypedValue::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_promotion() {
        let sum = TypedValue::Int(1).add(&TypedValue::Float(2.5)).unwrap();
        assert!(matches!(sum, TypedValue::Float(v) if v == 3.5));
        let sum = TypedValue::Int(1).add(&TypedValue::Int(2)).unwrap();
        assert!(matches!(sum, TypedValue::Int(3)));
    }

    #[test]
    fn null_propagates_through_arithmetic() {
        assert!(TypedValue::Null.add(&TypedValue::Int(1)).unwrap().is_null());
        assert!(TypedValue::Int(1).div(&TypedValue::Null).unwrap().is_null());
    }

    #[test]
    fn integer_division_by_zero_fails() {
        assert_eq!(
            TypedValue::Int(1).div(&TypedValue::Int(0)),
            Err(ValueError::DivisionByZero)
        );
    }

    #[test]
    fn string_concat_and_type_errors() {
        let joined = TypedValue::from("ab").add(&TypedValue::from("cd")).unwrap();
        assert!(matches!(joined, TypedValue::String(s) if s == "abcd"));
        assert!(TypedValue::from("ab").add(&TypedValue::Int(1)).is_err());
    }

    #[test]
    fn ternary_equality() {
        assert!(TypedValue::Null.eq_ternary(&TypedValue::Null).is_null());
        assert!(TypedValue::Int(1)
            .eq_ternary(&TypedValue::Float(1.0))
            .is_true());
        assert!(!TypedValue::Int(1)
            .eq_ternary(&TypedValue::from("1"))
            .is_true());
    }

    #[test]
    fn kleene_logic() {
        let t = TypedValue::Bool(true);
        let nil = TypedValue::Null;
        assert!(matches!(
            nil.and(&TypedValue::Bool(false)),
            Ok(TypedValue::Bool(false))
        ));
        assert!(nil.and(&t).unwrap().is_null());
        assert!(matches!(nil.or(&t), Ok(TypedValue::Bool(true))));
        assert!(nil.or(&TypedValue::Bool(false)).unwrap().is_null());
        assert!(TypedValue::Int(1).and(&t).is_err());
    }

    #[test]
    fn group_key_unifies_int_and_float() {
        assert_eq!(
            TypedValue::Int(1).group_key(),
            TypedValue::Float(1.0).group_key()
        );
        assert_ne!(
            TypedValue::Int(1).group_key(),
            TypedValue::Float(1.5).group_key()
        );
    }

    #[test]
    fn ordering_across_numerics() {
        assert_eq!(
            TypedValue::Int(2).try_cmp(&TypedValue::Float(2.5)).unwrap(),
            Ordering::Less
        );
        assert!(TypedValue::Int(2).try_cmp(&TypedValue::from("a")).is_err());
    }

    #[test]
    fn stringifier_shapes() {
        let list = TypedValue::List(vec![TypedValue::Int(1), TypedValue::from("x")]);
        assert_eq!(list.to_string(), "[1, 'x']");
        let mut entries = BTreeMap::new();
        entries.insert("b".to_owned(), TypedValue::Int(2));
        entries.insert("a".to_owned(), TypedValue::Int(1));
        assert_eq!(TypedValue::Map(entries).to_string(), "{a: 1, b: 2}");
        let mut path = Path::starting_at(VertexId(1));
        path.extend(
            EdgeRef {
                id: EdgeId(9),
                from: VertexId(1),
                to: VertexId(2),
                edge_type: EdgeTypeId(0),
            },
            VertexId(2),
        );
        assert_eq!(TypedValue::Path(path).to_string(), "(#1)-[#9]->(#2)");
    }
}
