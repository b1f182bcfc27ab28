//! Errors - エラー型と分類
//!
//! # 分類
//! - ValidationError: Operation の入力不備（kick 全体を配送前に中断）
//! - DispatchError: QueueService への配送失敗（Operation ごとに記録）
//! - TracingError: span の生成・終了の失敗（ログのみ、配送は止めない）
//! - WorkflowError: WorkflowEngine の呼び出しエラー

use std::time::Duration;

use thiserror::Error;

use super::operation::HttpMethod;

/// Malformed operation; surfaced before any dispatch begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("operation has no url")]
    MissingUrl,

    #[error("operation url '{url}' is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("operation has no queue name")]
    MissingQueueName,

    #[error("operation has no queue location")]
    MissingLocation,

    #[error("schedule offset of {offset_seconds}s is out of range (max {max}s)")]
    ScheduleOffsetOutOfRange { offset_seconds: u64, max: u64 },
}

/// QueueService のエラー（transport / backend）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueServiceError {
    #[error("queue service unreachable: {0}")]
    Transport(String),

    #[error("queue service rejected task (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("queue service response could not be decoded: {0}")]
    Decode(String),
}

/// Why a dispatch failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchErrorKind {
    #[error(transparent)]
    Backend(#[from] QueueServiceError),

    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),
}

impl DispatchErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchErrorKind::Backend(_) => "backend",
            DispatchErrorKind::Timeout(_) => "timeout",
        }
    }
}

/// A dispatch that did not reach the queue backend.
///
/// Carries the position and target of the offending operation so the
/// failure stays inspectable after the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dispatch of operation #{operation_index} ({method} {url}) failed: {kind}")]
pub struct DispatchError {
    pub operation_index: usize,
    pub method: HttpMethod,
    pub url: String,
    #[source]
    pub kind: DispatchErrorKind,
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, DispatchErrorKind::Timeout(_))
    }
}

/// Span creation or teardown failure. Never escalated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TracingError {
    #[error("failed to start span '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    #[error("failed to end span: {0}")]
    EndFailed(String),
}

/// WorkflowEngine の呼び出しエラー
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("operation #{index} is invalid: {source}")]
    Validation {
        index: usize,
        #[source]
        source: ValidationError,
    },

    #[error("a workflow run is already in progress")]
    RunInProgress,
}
