//! Events - ワークフロー実行中に発生するイベント
//!
//! EventSink（ports::event_sink）に渡され、ログ等に記録されます。

use serde::Serialize;

use super::operation::{ErrorDetail, HttpMethod};

/// DomainEvent はワークフロー実行中に発生したイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    RunStarted {
        pending: usize,
    },
    OperationStarted {
        index: usize,
        method: HttpMethod,
        url: String,
        queue_name: String,
    },
    OperationExecuted {
        index: usize,
        task_name: String,
    },
    OperationFailed {
        index: usize,
        detail: ErrorDetail,
    },
    RunFinished {
        executed: usize,
        failed: usize,
        pending: usize,
        halted: bool,
    },
}

impl DomainEvent {
    /// Stable key used by log-based sinks.
    pub fn key(&self) -> &'static str {
        match self {
            DomainEvent::RunStarted { .. } => "workflow.run_started",
            DomainEvent::OperationStarted { .. } => "workflow.operation_started",
            DomainEvent::OperationExecuted { .. } => "workflow.operation_executed",
            DomainEvent::OperationFailed { .. } => "workflow.operation_failed",
            DomainEvent::RunFinished { .. } => "workflow.run_finished",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DomainEvent::OperationFailed { .. })
    }
}
