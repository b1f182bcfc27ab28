//! Operation - ワークフローの 1 単位（1 回の配送）
//!
//! Operation は「どこへ（url）」「何を（method + body）」「どのキューで
//! （queue_name + location）」「いつ（schedule_offset_seconds）」を表します。
//!
//! # 状態遷移
//! - Pending -> Executing -> Executed
//! - Pending -> Executing -> Failed
//!
//! 一度 Executing に入った Operation が Pending に戻ることはありません。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{DispatchError, ValidationError};

/// HTTP method of the task the backend will deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only POST and PUT carry a body on the wire.
    pub fn carries_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Pending,
    Executing,
    Executed,
    Failed,
}

impl OperationStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Executed | OperationStatus::Failed)
    }

    /// 前進方向の遷移のみ許可する
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (OperationStatus::Pending, OperationStatus::Executing)
                | (OperationStatus::Executing, OperationStatus::Executed)
                | (OperationStatus::Executing, OperationStatus::Failed)
        )
    }
}

/// Upper bound for `scheduleOffsetSeconds` (100 years). Keeps `now + offset`
/// a representable timestamp for every backend.
pub const MAX_SCHEDULE_OFFSET_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Serializable view of a dispatch failure, stored on the failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    /// `backend`, `timeout` or `cancelled`.
    pub kind: String,
    pub message: String,
    pub operation_index: usize,
}

impl From<&DispatchError> for ErrorDetail {
    fn from(err: &DispatchError) -> Self {
        Self {
            kind: err.kind.label().to_string(),
            message: err.to_string(),
            operation_index: err.operation_index,
        }
    }
}

/// One unit of work to dispatch.
///
/// The JSON shape uses camelCase keys:
/// ```json
/// { "method": "POST", "url": "https://svc/run", "body": {"id": 1},
///   "queueName": "jobs", "location": "us-central1",
///   "scheduleOffsetSeconds": 30, "spanName": "run-job" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub method: HttpMethod,
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    pub queue_name: String,
    pub location: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_offset_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_name: Option<String>,

    #[serde(default)]
    status: OperationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_detail: Option<ErrorDetail>,

    /// Name the backend assigned to the created task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_name: Option<String>,
}

impl Operation {
    pub fn new(
        method: HttpMethod,
        url: impl Into<String>,
        queue_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            queue_name: queue_name.into(),
            location: location.into(),
            schedule_offset_seconds: None,
            span_name: None,
            status: OperationStatus::Pending,
            error_detail: None,
            task_name: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_schedule_offset(mut self, seconds: u64) -> Self {
        self.schedule_offset_seconds = Some(seconds);
        self
    }

    pub fn with_span_name(mut self, name: impl Into<String>) -> Self {
        self.span_name = Some(name.into());
        self
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn error_detail(&self) -> Option<&ErrorDetail> {
        self.error_detail.as_ref()
    }

    pub fn task_name(&self) -> Option<&str> {
        self.task_name.as_deref()
    }

    /// Check the fields the backend cannot do without.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| ValidationError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if self.queue_name.trim().is_empty() {
            return Err(ValidationError::MissingQueueName);
        }
        if self.location.trim().is_empty() {
            return Err(ValidationError::MissingLocation);
        }
        if let Some(offset) = self.schedule_offset_seconds {
            if offset > MAX_SCHEDULE_OFFSET_SECONDS {
                return Err(ValidationError::ScheduleOffsetOutOfRange {
                    offset_seconds: offset,
                    max: MAX_SCHEDULE_OFFSET_SECONDS,
                });
            }
        }
        Ok(())
    }

    /// Reset engine-owned fields; used when the operation is handed to an engine.
    pub(crate) fn reset(&mut self) {
        self.status = OperationStatus::Pending;
        self.error_detail = None;
        self.task_name = None;
    }

    pub(crate) fn mark_executing(&mut self) {
        self.advance(OperationStatus::Executing);
    }

    pub(crate) fn mark_executed(&mut self, task_name: String) {
        self.advance(OperationStatus::Executed);
        self.task_name = Some(task_name);
    }

    pub(crate) fn mark_failed(&mut self, detail: ErrorDetail) {
        self.advance(OperationStatus::Failed);
        self.error_detail = Some(detail);
    }

    fn advance(&mut self, next: OperationStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }
}
