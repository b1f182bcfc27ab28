//! WorkflowEngine - Operation 列を順番に配送するオーケストレーター
//!
//! # フロー（kick）
//! 1. pending の Operation を全件検証（不正があれば配送前に中断）
//! 2. 挿入順に 1 件ずつ: Executing → TaskDispatchClient::dispatch → Executed / Failed
//! 3. FailurePolicy::FailFast なら最初の失敗で停止（残りは Pending のまま）
//! 4. run_timeout を過ぎたら、その時点の Operation を timeout で失敗させる
//!
//! # 所有権
//! - Operation 列はこのエンジンだけが所有し、状態を書き換える
//! - 列のロックは短時間だけ取り、await を跨いで保持しない
//! - run_lock により kick の重複や実行中の add_operation を防ぐ

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use super::dispatch_client::TaskDispatchClient;
use super::status::{RunSummary, WorkflowCounts};
use crate::domain::{
    DispatchError, DispatchErrorKind, DomainEvent, ErrorDetail, Operation, OperationStatus, TaskRecord,
    WorkflowError,
};
use crate::ports::EventSink;

/// What to do with the rest of the queue after a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failure; the remainder stays pending.
    #[default]
    FailFast,
    /// Attempt every operation regardless of earlier failures.
    Continue,
}

/// Per-run settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub policy: FailurePolicy,

    /// Deadline for a single dispatch.
    pub operation_timeout: Option<Duration>,

    /// Deadline for the whole run.
    pub run_timeout: Option<Duration>,
}

impl RunOptions {
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

pub struct WorkflowEngine {
    client: TaskDispatchClient,
    queue: RwLock<Vec<Operation>>,
    run_lock: Mutex<()>,
    options: RunOptions,
    events: Option<Arc<dyn EventSink>>,
}

impl WorkflowEngine {
    pub fn new(client: TaskDispatchClient) -> Self {
        Self {
            client,
            queue: RwLock::new(Vec::new()),
            run_lock: Mutex::new(()),
            options: RunOptions::default(),
            events: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    pub fn client(&self) -> &TaskDispatchClient {
        &self.client
    }

    /// Append `operation` to the queue as pending.
    pub fn add_operation(&self, mut operation: Operation) -> Result<(), WorkflowError> {
        let _idle = self.run_lock.try_lock().map_err(|_| WorkflowError::RunInProgress)?;
        operation.reset();
        self.write_queue().push(operation);
        Ok(())
    }

    /// Snapshot of the queue with live statuses.
    pub fn get_workflow_queue(&self) -> Vec<Operation> {
        self.read_queue().clone()
    }

    pub fn counts(&self) -> WorkflowCounts {
        WorkflowCounts::of(&self.read_queue())
    }

    /// Run every pending operation with the engine's options.
    pub async fn kick(&self) -> Result<RunSummary, WorkflowError> {
        self.kick_with(self.options).await
    }

    /// Replace the queue wholesale, then run it.
    pub async fn kick_sequence(&self, operations: Vec<Operation>) -> Result<RunSummary, WorkflowError> {
        let run = self.run_lock.try_lock().map_err(|_| WorkflowError::RunInProgress)?;
        {
            let mut queue = self.write_queue();
            *queue = operations;
            queue.iter_mut().for_each(Operation::reset);
        }
        self.run_locked(self.options, run).await
    }

    /// Run every pending operation with per-call options.
    pub async fn kick_with(&self, options: RunOptions) -> Result<RunSummary, WorkflowError> {
        let run = self.run_lock.try_lock().map_err(|_| WorkflowError::RunInProgress)?;
        self.run_locked(options, run).await
    }

    async fn run_locked(
        &self,
        options: RunOptions,
        _run: tokio::sync::MutexGuard<'_, ()>,
    ) -> Result<RunSummary, WorkflowError> {
        let pending: Vec<(usize, Operation)> = self
            .read_queue()
            .iter()
            .enumerate()
            .filter(|(_, op)| op.status() == OperationStatus::Pending)
            .map(|(index, op)| (index, op.clone()))
            .collect();

        for (index, op) in &pending {
            op.validate()
                .map_err(|source| WorkflowError::Validation { index: *index, source })?;
        }

        info!(pending = pending.len(), policy = ?options.policy, "workflow run started");
        self.emit(DomainEvent::RunStarted {
            pending: pending.len(),
        });

        let deadline = options.run_timeout.map(|t| Instant::now() + t);
        let mut dispatched = 0;
        let mut halted = false;
        let total = pending.len();

        for (position, (index, op)) in pending.into_iter().enumerate() {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let mut in_flight = InFlight::start(self, index, &op);

            let result = if remaining == Some(Duration::ZERO) {
                // 期限切れ: 配送せずに timeout として失敗させる
                warn!(index, url = %op.url, "run deadline expired before dispatch");
                Err(timeout_error(index, &op, options.run_timeout.unwrap_or_default()))
            } else {
                dispatched += 1;
                let budget = match (options.operation_timeout, remaining) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                self.dispatch(index, &op, budget).await
            };
            let failed = result.is_err();
            in_flight.settle(result);

            if failed && options.policy == FailurePolicy::FailFast {
                halted = position + 1 < total;
                break;
            }
        }

        let summary = RunSummary {
            counts: self.counts(),
            dispatched,
            halted,
        };
        info!(
            executed = summary.counts.executed,
            failed = summary.counts.failed,
            pending = summary.counts.pending,
            halted,
            "workflow run finished"
        );
        self.emit(DomainEvent::RunFinished {
            executed: summary.counts.executed,
            failed: summary.counts.failed,
            pending: summary.counts.pending,
            halted,
        });
        Ok(summary)
    }

    async fn dispatch(
        &self,
        index: usize,
        op: &Operation,
        budget: Option<Duration>,
    ) -> Result<TaskRecord, DispatchError> {
        let Some(budget) = budget else {
            return self.client.dispatch(index, op).await;
        };
        // timeout で future を drop すると in-flight の create_task もキャンセルされる
        match tokio::time::timeout(budget, self.client.dispatch(index, op)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(index, url = %op.url, ?budget, "dispatch timed out");
                Err(timeout_error(index, op, budget))
            }
        }
    }

    fn update(&self, index: usize, f: impl FnOnce(&mut Operation)) {
        if let Some(op) = self.write_queue().get_mut(index) {
            f(op);
        }
    }

    fn emit(&self, event: DomainEvent) {
        if let Some(sink) = &self.events {
            sink.emit(&event);
        }
    }

    fn read_queue(&self) -> std::sync::RwLockReadGuard<'_, Vec<Operation>> {
        self.queue.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_queue(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Operation>> {
        self.queue.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn timeout_error(index: usize, op: &Operation, after: Duration) -> DispatchError {
    DispatchError {
        operation_index: index,
        method: op.method,
        url: op.url.clone(),
        kind: DispatchErrorKind::Timeout(after),
    }
}

/// An operation marked executing. If the run future is dropped before
/// `settle`, the operation is failed instead of being left executing.
struct InFlight<'a> {
    engine: &'a WorkflowEngine,
    index: usize,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn start(engine: &'a WorkflowEngine, index: usize, op: &Operation) -> Self {
        engine.update(index, Operation::mark_executing);
        engine.emit(DomainEvent::OperationStarted {
            index,
            method: op.method,
            url: op.url.clone(),
            queue_name: op.queue_name.clone(),
        });
        Self {
            engine,
            index,
            settled: false,
        }
    }

    fn settle(&mut self, result: Result<TaskRecord, DispatchError>) {
        self.settled = true;
        match result {
            Ok(record) => {
                let task_name = record.name;
                self.engine.update(self.index, |op| op.mark_executed(task_name.clone()));
                self.engine.emit(DomainEvent::OperationExecuted {
                    index: self.index,
                    task_name,
                });
            }
            Err(err) => {
                let detail = ErrorDetail::from(&err);
                self.engine.update(self.index, |op| op.mark_failed(detail.clone()));
                self.engine.emit(DomainEvent::OperationFailed {
                    index: self.index,
                    detail,
                });
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(index = self.index, "run cancelled while dispatching");
        let detail = ErrorDetail {
            kind: "cancelled".into(),
            message: "workflow run was cancelled while this operation was dispatching".into(),
            operation_index: self.index,
        };
        self.engine.update(self.index, |op| op.mark_failed(detail.clone()));
        self.engine.emit(DomainEvent::OperationFailed {
            index: self.index,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HttpMethod, QueueServiceError, SpanContext, TracingError, ValidationError};
    use crate::ports::{Span, TraceContext};
    use crate::impls::{InMemoryQueueService, LocalTraceContext};
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn op(n: usize) -> Operation {
        Operation::new(HttpMethod::Post, format!("https://svc.example.com/step/{n}"), "steps", "us-central1")
            .with_body(json!({ "step": n }))
    }

    fn engine(queue: &InMemoryQueueService) -> WorkflowEngine {
        WorkflowEngine::new(TaskDispatchClient::new("acme", Arc::new(queue.clone())))
    }

    fn statuses(engine: &WorkflowEngine) -> Vec<OperationStatus> {
        engine.get_workflow_queue().iter().map(Operation::status).collect()
    }

    #[test]
    fn added_operations_keep_push_order_and_are_pending() {
        let engine = engine(&InMemoryQueueService::new());
        for n in 0..3 {
            engine.add_operation(op(n)).unwrap();
        }

        let queue = engine.get_workflow_queue();
        assert_eq!(queue.len(), 3);
        for (n, op) in queue.iter().enumerate() {
            assert_eq!(op.url, format!("https://svc.example.com/step/{n}"));
            assert_eq!(op.status(), OperationStatus::Pending);
        }
    }

    #[tokio::test]
    async fn dispatches_every_operation_in_insertion_order() {
        let queue = InMemoryQueueService::new();
        let engine = engine(&queue);
        for n in 0..5 {
            engine.add_operation(op(n)).unwrap();
        }

        let summary = engine.kick().await.unwrap();

        let received = queue.received().await;
        assert_eq!(received.len(), 5);
        for (n, descriptor) in received.iter().enumerate() {
            assert_eq!(descriptor.task.http_request.url, format!("https://svc.example.com/step/{n}"));
        }
        assert_eq!(statuses(&engine), vec![OperationStatus::Executed; 5]);
        assert!(summary.is_success());
        assert_eq!(summary.dispatched, 5);
        assert!(engine.get_workflow_queue().iter().all(|op| op.task_name().is_some()));
    }

    #[rstest]
    #[case::first(0)]
    #[case::middle(2)]
    #[case::last(4)]
    #[tokio::test]
    async fn fail_fast_stops_at_first_failure(#[case] k: usize) {
        let queue = InMemoryQueueService::new().fail_call(k, QueueServiceError::Transport("reset".into()));
        let engine = engine(&queue);
        for n in 0..5 {
            engine.add_operation(op(n)).unwrap();
        }

        let summary = engine.kick().await.unwrap();

        let mut expected = vec![OperationStatus::Executed; k];
        expected.push(OperationStatus::Failed);
        expected.extend(vec![OperationStatus::Pending; 4 - k]);
        assert_eq!(statuses(&engine), expected);
        assert_eq!(queue.call_count().await, k + 1);
        assert_eq!(summary.halted, k < 4);

        let failed = &engine.get_workflow_queue()[k];
        let detail = failed.error_detail().unwrap();
        assert_eq!(detail.kind, "backend");
        assert_eq!(detail.operation_index, k);
    }

    #[rstest]
    #[case::first(0)]
    #[case::middle(2)]
    #[case::last(4)]
    #[tokio::test]
    async fn continue_policy_attempts_every_operation(#[case] k: usize) {
        let queue = InMemoryQueueService::new().fail_call(k, QueueServiceError::Transport("reset".into()));
        let engine = engine(&queue).with_options(RunOptions::default().with_policy(FailurePolicy::Continue));
        for n in 0..5 {
            engine.add_operation(op(n)).unwrap();
        }

        let summary = engine.kick().await.unwrap();

        let statuses = statuses(&engine);
        assert!(!statuses.contains(&OperationStatus::Pending));
        assert_eq!(statuses[k], OperationStatus::Failed);
        assert_eq!(statuses.iter().filter(|s| **s == OperationStatus::Executed).count(), 4);
        assert_eq!(queue.call_count().await, 5);
        assert!(!summary.halted);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn invalid_operation_aborts_before_any_dispatch() {
        let queue = InMemoryQueueService::new();
        let engine = engine(&queue);
        engine.add_operation(op(0)).unwrap();
        engine
            .add_operation(Operation::new(HttpMethod::Get, "https://svc.example.com", "", "us-central1"))
            .unwrap();

        let err = engine.kick().await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation {
                index: 1,
                source: ValidationError::MissingQueueName
            }
        ));
        assert_eq!(queue.call_count().await, 0);
        assert_eq!(statuses(&engine), vec![OperationStatus::Pending; 2]);
    }

    #[tokio::test]
    async fn out_of_range_schedule_offset_aborts_before_any_dispatch() {
        let queue = InMemoryQueueService::new();
        let engine = engine(&queue);
        engine.add_operation(op(0)).unwrap();
        engine.add_operation(op(1).with_schedule_offset(u64::MAX)).unwrap();

        let err = engine.kick().await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation {
                index: 1,
                source: ValidationError::ScheduleOffsetOutOfRange { .. }
            }
        ));
        assert_eq!(queue.call_count().await, 0);
    }

    #[tokio::test]
    async fn kick_sequence_replaces_queue_and_resets_status() {
        let queue = InMemoryQueueService::new();
        let engine = engine(&queue);
        engine.add_operation(op(99)).unwrap();

        let mut stale = op(0);
        stale.mark_executing();
        stale.mark_executed("old".into());
        engine.kick_sequence(vec![stale, op(1)]).await.unwrap();

        let ops = engine.get_workflow_queue();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].url, "https://svc.example.com/step/0");
        assert_ne!(ops[0].task_name(), Some("old"));
        assert_eq!(queue.call_count().await, 2);
    }

    #[tokio::test]
    async fn second_kick_only_runs_remaining_pending() {
        let queue = InMemoryQueueService::new().fail_call(1, QueueServiceError::Transport("reset".into()));
        let engine = engine(&queue);
        for n in 0..3 {
            engine.add_operation(op(n)).unwrap();
        }
        engine.kick().await.unwrap();
        assert_eq!(queue.call_count().await, 2);

        engine.kick().await.unwrap();
        assert_eq!(queue.call_count().await, 3);
        assert_eq!(
            statuses(&engine),
            vec![OperationStatus::Executed, OperationStatus::Failed, OperationStatus::Executed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn operation_timeout_fails_and_halts_under_fail_fast() {
        let queue = InMemoryQueueService::new().with_latency(Duration::from_secs(10));
        let engine = engine(&queue).with_options(RunOptions {
            operation_timeout: Some(Duration::from_secs(2)),
            ..RunOptions::default()
        });
        engine.add_operation(op(0)).unwrap();
        engine.add_operation(op(1)).unwrap();

        let summary = engine.kick().await.unwrap();

        assert_eq!(statuses(&engine), vec![OperationStatus::Failed, OperationStatus::Pending]);
        assert_eq!(engine.get_workflow_queue()[0].error_detail().unwrap().kind, "timeout");
        assert!(summary.halted);
        assert_eq!(queue.created().await.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_run_deadline_fails_remaining_under_continue() {
        let queue = InMemoryQueueService::new().with_latency(Duration::from_secs(3));
        let engine = engine(&queue).with_options(RunOptions {
            policy: FailurePolicy::Continue,
            operation_timeout: None,
            run_timeout: Some(Duration::from_secs(5)),
        });
        for n in 0..3 {
            engine.add_operation(op(n)).unwrap();
        }

        engine.kick().await.unwrap();

        assert_eq!(
            statuses(&engine),
            vec![OperationStatus::Executed, OperationStatus::Failed, OperationStatus::Failed]
        );
        // the third operation never reached the backend
        assert_eq!(queue.call_count().await, 2);
        assert!(
            engine
                .get_workflow_queue()
                .iter()
                .skip(1)
                .all(|op| op.error_detail().unwrap().kind == "timeout")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn add_operation_is_rejected_while_running() {
        let queue = InMemoryQueueService::new().with_latency(Duration::from_secs(1));
        let engine = Arc::new(engine(&queue));
        engine.add_operation(op(0)).unwrap();

        let runner = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.kick().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(engine.add_operation(op(1)), Err(WorkflowError::RunInProgress)));
        assert!(matches!(engine.kick().await, Err(WorkflowError::RunInProgress)));
        assert_eq!(statuses(&engine), vec![OperationStatus::Executing]);

        runner.await.unwrap().unwrap();
        assert_eq!(statuses(&engine), vec![OperationStatus::Executed]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_leaves_nothing_executing() {
        let queue = InMemoryQueueService::new().with_latency(Duration::from_secs(10));
        let engine = engine(&queue);
        engine.add_operation(op(0)).unwrap();

        let _ = tokio::time::timeout(Duration::from_secs(1), engine.kick()).await;

        let ops = engine.get_workflow_queue();
        assert_eq!(ops[0].status(), OperationStatus::Failed);
        assert_eq!(ops[0].error_detail().unwrap().kind, "cancelled");
    }

    #[tokio::test]
    async fn traced_operations_share_the_active_trace() {
        let queue = InMemoryQueueService::new();
        let tracer = LocalTraceContext::new();
        let mut root = tracer.start_root("workflow");
        let client = TaskDispatchClient::new("acme", Arc::new(queue.clone())).with_tracer(Arc::new(tracer.clone()));
        let engine = WorkflowEngine::new(client);
        engine.add_operation(op(0).with_span_name("step-0")).unwrap();
        engine.add_operation(op(1)).unwrap();
        engine.add_operation(op(2).with_span_name("step-2")).unwrap();

        engine.kick().await.unwrap();
        let root_trace = root.context().trace_id;
        root.end().unwrap();

        let received = queue.received().await;
        let headers: Vec<Option<&str>> =
            received.iter().map(|d| d.task.http_request.header("traceparent")).collect();
        assert!(headers[0].unwrap().contains(&root_trace.to_string()));
        assert!(headers[1].is_none());
        assert!(headers[2].unwrap().contains(&root_trace.to_string()));
        assert_ne!(headers[0], headers[2]);
    }

    #[derive(Default)]
    struct RecordingSink {
        keys: StdMutex<Vec<&'static str>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &DomainEvent) {
            self.keys.lock().unwrap().push(event.key());
        }
    }

    #[tokio::test]
    async fn emits_lifecycle_events() {
        let queue = InMemoryQueueService::new().fail_call(1, QueueServiceError::Transport("reset".into()));
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(&queue).with_event_sink(sink.clone());
        engine.add_operation(op(0)).unwrap();
        engine.add_operation(op(1)).unwrap();

        engine.kick().await.unwrap();

        assert_eq!(
            *sink.keys.lock().unwrap(),
            vec![
                "workflow.run_started",
                "workflow.operation_started",
                "workflow.operation_executed",
                "workflow.operation_started",
                "workflow.operation_failed",
                "workflow.run_finished",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_deadline_reached_under_fail_fast_fails_the_next_operation() {
        let queue = InMemoryQueueService::new().with_latency(Duration::from_secs(5));
        let engine = engine(&queue).with_options(RunOptions {
            policy: FailurePolicy::FailFast,
            operation_timeout: None,
            run_timeout: Some(Duration::from_secs(5)),
        });
        for n in 0..3 {
            engine.add_operation(op(n)).unwrap();
        }

        let summary = engine.kick().await.unwrap();

        assert_eq!(
            statuses(&engine),
            vec![OperationStatus::Executed, OperationStatus::Failed, OperationStatus::Pending]
        );
        let detail = engine.get_workflow_queue()[1].error_detail().cloned().unwrap();
        assert_eq!(detail.kind, "timeout");
        assert_eq!(detail.operation_index, 1);
        assert_eq!(summary.counts.failed, 1);
        assert_eq!(summary.dispatched, 1);
        assert!(summary.halted);
        assert_eq!(queue.call_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_operations_still_emit_paired_events() {
        let queue = InMemoryQueueService::new().with_latency(Duration::from_secs(5));
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(&queue)
            .with_options(RunOptions {
                policy: FailurePolicy::Continue,
                operation_timeout: None,
                run_timeout: Some(Duration::from_secs(5)),
            })
            .with_event_sink(sink.clone());
        engine.add_operation(op(0)).unwrap();
        engine.add_operation(op(1)).unwrap();

        engine.kick().await.unwrap();

        assert_eq!(
            *sink.keys.lock().unwrap(),
            vec![
                "workflow.run_started",
                "workflow.operation_started",
                "workflow.operation_executed",
                "workflow.operation_started",
                "workflow.operation_failed",
                "workflow.run_finished",
            ]
        );
    }

    struct BrokenTracer;

    impl TraceContext for BrokenTracer {
        fn start_span(&self, name: &str, _parent: Option<SpanContext>) -> Result<Box<dyn Span>, TracingError> {
            Err(TracingError::StartFailed {
                name: name.to_string(),
                reason: "collector offline".into(),
            })
        }

        fn active_span(&self) -> Option<SpanContext> {
            None
        }
    }

    #[tokio::test]
    async fn tracer_failure_does_not_fail_the_operation() {
        let queue = InMemoryQueueService::new();
        let client = TaskDispatchClient::new("acme", Arc::new(queue.clone())).with_tracer(Arc::new(BrokenTracer));
        let engine = WorkflowEngine::new(client);
        engine.add_operation(op(0).with_span_name("step-0")).unwrap();

        let summary = engine.kick().await.unwrap();

        assert!(summary.is_success());
        assert_eq!(statuses(&engine), vec![OperationStatus::Executed]);
        let received = queue.received().await;
        assert!(received[0].task.http_request.header("traceparent").is_none());
    }
}
