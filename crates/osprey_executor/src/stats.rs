//! Per-query execution statistics, aggregated across operators and
//! reported as deltas by remote pulls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A small record of per-query work counters. Remote operators report the
/// delta since their previous pull; the query context accumulates the
/// deltas into one aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    #[serde(default, rename = "scannedFull")]
    pub scanned_full: i64,
    #[serde(default, rename = "scannedIndex")]
    pub scanned_index: i64,
    #[serde(default)]
    pub filtered: i64,
    #[serde(default, rename = "writesExecuted")]
    pub writes_executed: i64,
    #[serde(default, rename = "writesIgnored")]
    pub writes_ignored: i64,
}

impl ExecutionStats {
    /// Accumulate `new - old` into this aggregate.
    pub fn add_delta(&mut self, old: &ExecutionStats, new: &ExecutionStats) {
        self.scanned_full += new.scanned_full - old.scanned_full;
        self.scanned_index += new.scanned_index - old.scanned_index;
        self.filtered += new.filtered - old.filtered;
        self.writes_executed += new.writes_executed - old.writes_executed;
        self.writes_ignored += new.writes_ignored - old.writes_ignored;
    }

    /// Decode a wire `stats` object; missing or malformed fields default
    /// to zero.
    pub fn from_wire(value: &Value) -> ExecutionStats {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
