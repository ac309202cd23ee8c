//! Tuple batches: the rectangular rows×registers value arrays shipped
//! between operators.

use std::sync::Arc;

use serde_json::{json, Value};

use osprey_common::error::{OspreyError, OspreyResult};
use osprey_common::types::RegisterId;

/// A single tagged cell. The payload is a reference-counted JSON document,
/// so cloning a cell bumps a refcount instead of deep-copying. An unset
/// cell is *empty*, which is distinct from a cell holding JSON `null`.
#[derive(Debug, Clone, Default)]
pub struct TupleValue(Option<Arc<Value>>);

impl TupleValue {
    /// The empty (unset) cell.
    pub fn empty() -> Self {
        TupleValue(None)
    }

    pub fn new(value: Value) -> Self {
        TupleValue(Some(Arc::new(value)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The document held by this cell, or `None` when the cell is empty.
    pub fn document(&self) -> Option<&Value> {
        self.0.as_deref()
    }
}

impl PartialEq for TupleValue {
    fn eq(&self, other: &Self) -> bool {
        self.document() == other.document()
    }
}

impl From<Value> for TupleValue {
    fn from(value: Value) -> Self {
        TupleValue::new(value)
    }
}

/// A rectangular rows × registers array of tagged values, row-major.
///
/// Blocks own the batches they buffer; ownership transfers to the caller
/// when a batch is returned from `get_some`.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleBatch {
    rows: usize,
    regs: usize,
    data: Vec<TupleValue>,
}

impl TupleBatch {
    /// A batch of `rows` × `regs` empty cells.
    pub fn new(rows: usize, regs: usize) -> Self {
        TupleBatch {
            rows,
            regs,
            data: vec![TupleValue::empty(); rows * regs],
        }
    }

    /// Number of rows.
    pub fn size(&self) -> usize {
        self.rows
    }

    /// Number of registers (columns).
    pub fn nr_regs(&self) -> usize {
        self.regs
    }

    #[inline]
    fn cell(&self, row: usize, reg: RegisterId) -> usize {
        debug_assert!(row < self.rows && reg < self.regs);
        row * self.regs + reg
    }

    /// Reference to the value at `(row, reg)`.
    pub fn value(&self, row: usize, reg: RegisterId) -> &TupleValue {
        &self.data[self.cell(row, reg)]
    }

    /// Store `value` at `(row, reg)`, taking over its reference. Any
    /// previous cell content is dropped.
    pub fn set_value(&mut self, row: usize, reg: RegisterId, value: TupleValue) {
        let idx = self.cell(row, reg);
        self.data[idx] = value;
    }

    /// Reset the cell at `(row, reg)` to empty, releasing its reference.
    pub fn destroy_value(&mut self, row: usize, reg: RegisterId) {
        let idx = self.cell(row, reg);
        self.data[idx] = TupleValue::empty();
    }

    /// Copy of the row range `[from, to)`.
    pub fn slice(&self, from: usize, to: usize) -> TupleBatch {
        debug_assert!(from <= to && to <= self.rows);
        TupleBatch {
            rows: to - from,
            regs: self.regs,
            data: self.data[from * self.regs..to * self.regs].to_vec(),
        }
    }

    /// Copy of the listed rows, in list order.
    pub fn project(&self, rows: &[usize]) -> TupleBatch {
        let mut out = TupleBatch::new(rows.len(), self.regs);
        for (i, &row) in rows.iter().enumerate() {
            for reg in 0..self.regs {
                let v = self.value(row, reg);
                if !v.is_empty() {
                    out.set_value(i, reg, v.clone());
                }
            }
        }
        out
    }

    /// Vertically stack `batches`. All inputs must agree on the register
    /// count; an empty input list is an error.
    pub fn concatenate(batches: Vec<TupleBatch>) -> OspreyResult<TupleBatch> {
        let regs = match batches.first() {
            Some(b) => b.regs,
            None => {
                return Err(OspreyError::internal(
                    "cannot concatenate an empty batch list",
                ))
            }
        };
        let rows: usize = batches.iter().map(|b| b.rows).sum();
        let mut data = Vec::with_capacity(rows * regs);
        for batch in batches {
            if batch.regs != regs {
                return Err(OspreyError::internal(format!(
                    "register count mismatch in concatenate: {} vs {}",
                    batch.regs, regs
                )));
            }
            data.extend(batch.data);
        }
        Ok(TupleBatch { rows, regs, data })
    }

    /// Serialize to the wire format: row-major `data` where a set cell is
    /// `[<value>]` and an empty cell is `null`.
    pub fn to_wire(&self) -> Value {
        let data: Vec<Value> = self
            .data
            .iter()
            .map(|cell| match cell.document() {
                Some(doc) => json!([doc.clone()]),
                None => Value::Null,
            })
            .collect();
        json!({
            "nrItems": self.rows,
            "nrRegs": self.regs,
            "data": data,
        })
    }

    /// Deserialize from the wire format.
    pub fn from_wire(value: &Value) -> OspreyResult<TupleBatch> {
        let rows = osprey_common::json::get_u64(value, "nrItems", u64::MAX) as usize;
        let regs = osprey_common::json::get_u64(value, "nrRegs", u64::MAX) as usize;
        let cells = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| OspreyError::Serialization("batch body has no data array".into()))?;
        if rows == u64::MAX as usize || regs == u64::MAX as usize || cells.len() != rows * regs {
            return Err(OspreyError::Serialization(format!(
                "malformed batch body: {} cells for {}x{}",
                cells.len(),
                rows,
                regs
            )));
        }
        let mut data = Vec::with_capacity(cells.len());
        for cell in cells {
            match cell {
                Value::Null => data.push(TupleValue::empty()),
                Value::Array(wrapped) if wrapped.len() == 1 => {
                    data.push(TupleValue::new(wrapped[0].clone()));
                }
                other => {
                    return Err(OspreyError::Serialization(format!(
                        "malformed batch cell: {}",
                        other
                    )))
                }
            }
        }
        Ok(TupleBatch { rows, regs, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_from_rows(rows: &[Vec<Value>]) -> TupleBatch {
        let regs = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut batch = TupleBatch::new(rows.len(), regs);
        for (i, row) in rows.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                batch.set_value(i, j, TupleValue::new(v.clone()));
            }
        }
        batch
    }

    #[test]
    fn test_empty_cell_is_not_null() {
        let mut batch = TupleBatch::new(1, 2);
        batch.set_value(0, 0, TupleValue::new(Value::Null));
        assert!(!batch.value(0, 0).is_empty());
        assert_eq!(batch.value(0, 0).document(), Some(&Value::Null));
        assert!(batch.value(0, 1).is_empty());
        assert_eq!(batch.value(0, 1).document(), None);
    }

    #[test]
    fn test_set_and_destroy() {
        let mut batch = TupleBatch::new(2, 1);
        batch.set_value(1, 0, TupleValue::new(json!({"a": 1})));
        assert_eq!(batch.value(1, 0).document(), Some(&json!({"a": 1})));
        batch.destroy_value(1, 0);
        assert!(batch.value(1, 0).is_empty());
    }

    #[test]
    fn test_slice_copies_row_range() {
        let batch = batch_from_rows(&[
            vec![json!(1)],
            vec![json!(2)],
            vec![json!(3)],
            vec![json!(4)],
        ]);
        let sliced = batch.slice(1, 3);
        assert_eq!(sliced.size(), 2);
        assert_eq!(sliced.value(0, 0).document(), Some(&json!(2)));
        assert_eq!(sliced.value(1, 0).document(), Some(&json!(3)));
    }

    #[test]
    fn test_project_picks_rows_in_list_order() {
        let batch = batch_from_rows(&[vec![json!("a")], vec![json!("b")], vec![json!("c")]]);
        let projected = batch.project(&[2, 0]);
        assert_eq!(projected.size(), 2);
        assert_eq!(projected.value(0, 0).document(), Some(&json!("c")));
        assert_eq!(projected.value(1, 0).document(), Some(&json!("a")));
    }

    #[test]
    fn test_concatenate() {
        let a = batch_from_rows(&[vec![json!(1)], vec![json!(2)]]);
        let b = batch_from_rows(&[vec![json!(3)]]);
        let merged = TupleBatch::concatenate(vec![a, b]).expect("concat");
        assert_eq!(merged.size(), 3);
        assert_eq!(merged.value(2, 0).document(), Some(&json!(3)));
    }

    #[test]
    fn test_concatenate_rejects_reg_mismatch() {
        let a = TupleBatch::new(1, 1);
        let b = TupleBatch::new(1, 2);
        assert!(TupleBatch::concatenate(vec![a, b]).is_err());
    }

    #[test]
    fn test_wire_roundtrip_preserves_empty_vs_null() {
        let mut batch = TupleBatch::new(2, 2);
        batch.set_value(0, 0, TupleValue::new(json!({"a": 1})));
        batch.set_value(0, 1, TupleValue::new(Value::Null));
        batch.set_value(1, 1, TupleValue::new(json!([1, 2])));
        // (1, 0) stays empty
        let decoded = TupleBatch::from_wire(&batch.to_wire()).expect("decode");
        assert_eq!(decoded, batch);
        assert!(decoded.value(1, 0).is_empty());
        assert_eq!(decoded.value(0, 1).document(), Some(&Value::Null));
    }

    #[test]
    fn test_from_wire_rejects_malformed() {
        assert!(TupleBatch::from_wire(&json!({"nrItems": 1})).is_err());
        assert!(
            TupleBatch::from_wire(&json!({"nrItems": 2, "nrRegs": 1, "data": [null]})).is_err()
        );
        assert!(TupleBatch::from_wire(&json!({"nrItems": 1, "nrRegs": 1, "data": [7]})).is_err());
    }
}
