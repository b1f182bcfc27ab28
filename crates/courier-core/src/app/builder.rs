//! WorkflowBuilder - エンジンの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 任意の collaborator（tracer, event sink）を明示的に注入する
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;
use std::time::Duration;

use super::dispatch_client::TaskDispatchClient;
use super::engine::{FailurePolicy, RunOptions, WorkflowEngine};
use crate::domain::{Operation, ValidationError, WorkflowError};
use crate::ports::{Clock, EventSink, QueueService, TraceContext};

/// WorkflowBuilder は WorkflowEngine を構築
///
/// # 使用例
/// ```ignore
/// let engine = WorkflowBuilder::new("acme", Arc::new(queue))
///     .tracer(Arc::new(LocalTraceContext::new()))
///     .policy(FailurePolicy::Continue)
///     .operations(ops)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - operations() で渡した初期キューを build() 時に検証する
/// - 不正な Operation があれば BuildError を返す
pub struct WorkflowBuilder {
    project_id: String,
    queue: Arc<dyn QueueService>,
    tracer: Option<Arc<dyn TraceContext>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventSink>>,
    options: RunOptions,
    operations: Vec<Operation>,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("project id is empty")]
    MissingProjectId,

    #[error("initial operation #{index} is invalid: {source}")]
    InvalidOperation {
        index: usize,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl WorkflowBuilder {
    pub fn new(project_id: impl Into<String>, queue: Arc<dyn QueueService>) -> Self {
        Self {
            project_id: project_id.into(),
            queue,
            tracer: None,
            clock: None,
            events: None,
            options: RunOptions::default(),
            operations: Vec::new(),
        }
    }

    pub fn tracer(mut self, tracer: Arc<dyn TraceContext>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.options.policy = policy;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.options.operation_timeout = Some(timeout);
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.options.run_timeout = Some(timeout);
        self
    }

    /// Initial queue, validated at `build()`.
    pub fn operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = operations;
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, BuildError> {
        if self.project_id.trim().is_empty() {
            return Err(BuildError::MissingProjectId);
        }
        for (index, op) in self.operations.iter().enumerate() {
            op.validate()
                .map_err(|source| BuildError::InvalidOperation { index, source })?;
        }

        let mut client = TaskDispatchClient::new(self.project_id, self.queue);
        if let Some(tracer) = self.tracer {
            client = client.with_tracer(tracer);
        }
        if let Some(clock) = self.clock {
            client = client.with_clock(clock);
        }

        let mut engine = WorkflowEngine::new(client).with_options(self.options);
        if let Some(sink) = self.events {
            engine = engine.with_event_sink(sink);
        }
        for op in self.operations {
            engine.add_operation(op)?;
        }
        Ok(engine)
    }
}
