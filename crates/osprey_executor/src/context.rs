//! Per-query coordinator-side context: the database name used for request
//! paths, the execution-stats aggregate, and the warning sink.

use parking_lot::Mutex;

use crate::stats::ExecutionStats;

/// A warning registered against the query (e.g. drained from a remote
/// shutdown response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub code: i32,
    pub message: String,
}

/// State shared by all operators of one query cursor.
pub struct QueryContext {
    database: String,
    stats: Mutex<ExecutionStats>,
    warnings: Mutex<Vec<Warning>>,
}

impl QueryContext {
    pub fn new(database: impl Into<String>) -> Self {
        QueryContext {
            database: database.into(),
            stats: Mutex::new(ExecutionStats::default()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Fold a remote stats delta into the query aggregate.
    pub fn add_stats_delta(&self, old: &ExecutionStats, new: &ExecutionStats) {
        self.stats.lock().add_delta(old, new);
    }

    pub fn stats_snapshot(&self) -> ExecutionStats {
        *self.stats.lock()
    }

    pub fn register_warning(&self, code: i32, message: impl Into<String>) {
        self.warnings.lock().push(Warning {
            code,
            message: message.into(),
        });
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_aggregation() {
        let ctx = QueryContext::new("mydb");
        let new = ExecutionStats {
            scanned_index: 5,
            ..Default::default()
        };
        ctx.add_stats_delta(&ExecutionStats::default(), &new);
        assert_eq!(ctx.stats_snapshot().scanned_index, 5);
    }

    #[test]
    fn test_warnings_are_recorded_in_order() {
        let ctx = QueryContext::new("mydb");
        ctx.register_warning(10, "first");
        ctx.register_warning(20, "second");
        let warnings = ctx.warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].code, 10);
        assert_eq!(warnings[1].message, "second");
    }
}
