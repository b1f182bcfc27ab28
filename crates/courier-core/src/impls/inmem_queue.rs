//! InMemoryQueueService - 開発用・テスト用のキューバックエンド
//!
//! # 学習ポイント
//! - tokio::sync::Mutex による状態の排他制御（await を跨いでロックしない）
//! - 呼び出し順に descriptor を記録し、後から検証できるようにする
//! - 指定した呼び出しだけを失敗させる fault injection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::domain::{QueueServiceError, TaskDescriptor, TaskRecord};
use crate::ports::QueueService;

#[derive(Default)]
struct InMemoryQueueState {
    /// Every descriptor received, in call order (including rejected ones).
    received: Vec<TaskDescriptor>,

    /// Tasks that were accepted.
    created: Vec<TaskRecord>,

    /// call index (0-based) -> error to return for that call
    failures: HashMap<usize, QueueServiceError>,
}

/// InMemoryQueueService は受け取った descriptor をメモリに保持する
///
/// # 使用例
/// ```ignore
/// let queue = InMemoryQueueService::new()
///     .fail_call(2, QueueServiceError::Transport("connection reset".into()));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryQueueService {
    state: Arc<Mutex<InMemoryQueueState>>,
    latency: Option<Duration>,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `call_index`-th call (0-based) fail with `error`.
    pub fn fail_call(self, call_index: usize, error: QueueServiceError) -> Self {
        // builder 段階なので競合は起きない
        if let Ok(mut state) = self.state.try_lock() {
            state.failures.insert(call_index, error);
        }
        self
    }

    /// Delay every call by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Descriptors received so far, in call order.
    pub async fn received(&self) -> Vec<TaskDescriptor> {
        self.state.lock().await.received.clone()
    }

    pub async fn created(&self) -> Vec<TaskRecord> {
        self.state.lock().await.created.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.received.len()
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn create_task(&self, descriptor: TaskDescriptor) -> Result<TaskRecord, QueueServiceError> {
        let call_index = {
            let mut state = self.state.lock().await;
            state.received.push(descriptor.clone());
            state.received.len() - 1
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(err) = state.failures.remove(&call_index) {
            return Err(err);
        }

        let record = TaskRecord {
            name: format!("{}/tasks/{}", descriptor.parent, Ulid::new()),
            schedule_time: descriptor.task.schedule_time.to_datetime(),
            create_time: Some(Utc::now()),
        };
        state.created.push(record.clone());
        Ok(record)
    }
}
