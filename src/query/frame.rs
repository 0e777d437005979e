//! Fixed-width row of typed values, indexed by symbol position.

use std::ops::{Index, IndexMut};

use crate::query::symbols::Symbol;
use crate::query::value::TypedValue;

/// One row of intermediate execution state. Created per query execution and
/// sized from the symbol table's maximum position; operators write the slots
/// of the symbols they bind.
#[derive(Clone, Debug)]
pub struct Frame {
    values: Vec<TypedValue>,
}

impl Frame {
    pub fn new(width: usize) -> Self {
        Self {
            values: vec![TypedValue::Null; width],
        }
    }

    pub fn get(&self, position: usize) -> &TypedValue {
        &self.values[position]
    }

    pub fn set(&mut self, position: usize, value: TypedValue) {
        self.values[position] = value;
    }

    /// Snapshot of all slots, for operators that materialize rows.
    pub fn snapshot(&self) -> Vec<TypedValue> {
        self.values.clone()
    }

    /// Restores a snapshot taken with [`Frame::snapshot`].
    pub fn restore(&mut self, snapshot: &[TypedValue]) {
        debug_assert_eq!(snapshot.len(), self.values.len());
        self.values.clone_from_slice(snapshot);
    }
}

impl Index<&Symbol> for Frame {
    type Output = TypedValue;

    fn index(&self, symbol: &Symbol) -> &TypedValue {
        &self.values[symbol.position]
    }
}

impl IndexMut<&Symbol> for Frame {
    fn index_mut(&mut self, symbol: &Symbol) -> &mut TypedValue {
        &mut self.values[symbol.position]
    }
}
