//! QueueService port - タスクを受け付けて後で HTTP 配送するバックエンド
//!
//! # 実装
//! - **InMemoryQueueService**: 開発・テスト用（impls::inmem_queue）
//! - **CloudTasksHttpQueue**: REST API 経由（impls::http_queue）

use async_trait::async_trait;

use crate::domain::{QueueServiceError, TaskDescriptor, TaskRecord};

/// QueueService は descriptor を受け取り、配送キューに永続化する
///
/// # 設計原則
/// - 1 回の呼び出しで 1 タスクを作成する
/// - リトライはしない（配送リトライはバックエンドの責務）
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn create_task(&self, descriptor: TaskDescriptor) -> Result<TaskRecord, QueueServiceError>;
}
