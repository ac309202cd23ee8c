//! Sort keys: ordered register/direction lists and row lex-comparison.

use std::cmp::Ordering;

use osprey_common::json;
use osprey_common::types::RegisterId;

use crate::batch::TupleBatch;

/// One element of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortElement {
    pub register: RegisterId,
    pub ascending: bool,
}

impl SortElement {
    pub fn asc(register: RegisterId) -> Self {
        SortElement {
            register,
            ascending: true,
        }
    }

    pub fn desc(register: RegisterId) -> Self {
        SortElement {
            register,
            ascending: false,
        }
    }
}

/// An ordered list of `(register, ascending)` pairs. Empty means unsorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortKey(pub Vec<SortElement>);

impl SortKey {
    pub fn empty() -> Self {
        SortKey(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lex-compare row `row_a` of `batch_a` against row `row_b` of
    /// `batch_b` under this key. An empty cell sorts before any document.
    pub fn compare_rows(
        &self,
        batch_a: &TupleBatch,
        row_a: usize,
        batch_b: &TupleBatch,
        row_b: usize,
    ) -> Ordering {
        for element in &self.0 {
            let va = batch_a.value(row_a, element.register);
            let vb = batch_b.value(row_b, element.register);
            let ord = match (va.document(), vb.document()) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(da), Some(db)) => json::compare(da, db),
            };
            let ord = if element.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
