//! Status - ワークフローの進捗ビュー

use serde::{Deserialize, Serialize};

use crate::domain::{Operation, OperationStatus};

/// Number of operations in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCounts {
    pub pending: usize,
    pub executing: usize,
    pub executed: usize,
    pub failed: usize,
}

impl WorkflowCounts {
    pub fn of(operations: &[Operation]) -> Self {
        let mut counts = Self::default();
        for op in operations {
            match op.status() {
                OperationStatus::Pending => counts.pending += 1,
                OperationStatus::Executing => counts.executing += 1,
                OperationStatus::Executed => counts.executed += 1,
                OperationStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.executing + self.executed + self.failed
    }
}

/// Result of one `kick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub counts: WorkflowCounts,

    /// Operations handed to the dispatch client during this run.
    pub dispatched: usize,

    /// The run stopped before reaching the end of the queue.
    pub halted: bool,
}

impl RunSummary {
    /// Every operation in the queue ended executed.
    pub fn is_success(&self) -> bool {
        self.counts.failed == 0 && self.counts.pending == 0 && self.counts.executing == 0
    }
}
