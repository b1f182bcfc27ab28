//! TaskDispatchClient - Operation を QueueService への create-task 呼び出しに変換
//!
//! # フロー
//! 1. descriptor を組み立てる（POST/PUT のみ base64(JSON(body)) を付ける）
//! 2. scheduleTime = now + schedule_offset_seconds（なければ now）
//! 3. span_name があれば span を開き、traceparent ヘッダを注入する
//! 4. QueueService::create_task を呼ぶ（リトライはしない）
//!
//! トレーシングは best-effort: span の生成に失敗しても配送は続行し、
//! traceparent を付けずに送る。

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, warn};

use crate::domain::descriptor::{CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE};
use crate::domain::{
    DispatchError, HttpRequest, Operation, ScheduleTime, TRACEPARENT_HEADER, TaskDescriptor, TaskRecord,
    TaskSpec, queue_path,
};
use crate::ports::{Clock, QueueService, SpanGuard, SystemClock, TraceContext};

pub struct TaskDispatchClient {
    project_id: String,
    queue: Arc<dyn QueueService>,
    tracer: Option<Arc<dyn TraceContext>>,
    clock: Arc<dyn Clock>,
}

impl TaskDispatchClient {
    pub fn new(project_id: impl Into<String>, queue: Arc<dyn QueueService>) -> Self {
        Self {
            project_id: project_id.into(),
            queue,
            tracer: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Enable per-operation spans for operations that carry a `span_name`.
    pub fn with_tracer(mut self, tracer: Arc<dyn TraceContext>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Dispatch a single operation outside of a workflow.
    ///
    /// Errors report operation index 0.
    pub async fn send(&self, operation: &Operation) -> Result<TaskRecord, DispatchError> {
        self.dispatch(0, operation).await
    }

    /// Dispatch the operation at position `index` of a workflow.
    pub async fn dispatch(&self, index: usize, operation: &Operation) -> Result<TaskRecord, DispatchError> {
        let schedule_time = self.schedule_time(operation);
        let span = self.open_span(operation, schedule_time);
        let traceparent = span.as_ref().map(|guard| guard.context().traceparent());

        info!(
            index,
            method = %operation.method,
            url = %operation.url,
            queue = %operation.queue_name,
            traced = traceparent.is_some(),
            "dispatching operation"
        );

        let descriptor = self.build_descriptor(operation, schedule_time, traceparent.as_deref());
        let result = self.queue.create_task(descriptor).await;
        // span は result を確定させた後に閉じる
        drop(span);

        match result {
            Ok(record) => {
                info!(index, task = %record.name, "task created");
                Ok(record)
            }
            Err(err) => {
                warn!(index, url = %operation.url, error = %err, "task creation failed");
                Err(DispatchError {
                    operation_index: index,
                    method: operation.method,
                    url: operation.url.clone(),
                    kind: err.into(),
                })
            }
        }
    }

    /// Build the create-task request the backend receives.
    pub fn build_descriptor(
        &self,
        operation: &Operation,
        schedule_time: ScheduleTime,
        traceparent: Option<&str>,
    ) -> TaskDescriptor {
        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_TYPE_HEADER.to_string(), JSON_CONTENT_TYPE.to_string());
        if let Some(value) = traceparent {
            headers.insert(TRACEPARENT_HEADER.to_string(), value.to_string());
        }

        let body = operation
            .method
            .carries_body()
            .then(|| encode_body(operation.body.as_ref()));

        TaskDescriptor {
            parent: queue_path(&self.project_id, &operation.location, &operation.queue_name),
            task: TaskSpec {
                http_request: HttpRequest {
                    http_method: operation.method,
                    url: operation.url.clone(),
                    headers,
                    body,
                },
                schedule_time,
            },
        }
    }

    fn schedule_time(&self, operation: &Operation) -> ScheduleTime {
        let now = self.clock.now().timestamp();
        let offset = operation
            .schedule_offset_seconds
            .map(|s| i64::try_from(s).unwrap_or(i64::MAX))
            .unwrap_or(0);
        ScheduleTime {
            seconds: now.saturating_add(offset),
        }
    }

    fn open_span(&self, operation: &Operation, schedule_time: ScheduleTime) -> Option<SpanGuard> {
        let name = operation.span_name.as_deref()?;
        let tracer = self.tracer.as_ref()?;

        let span = match tracer.start_span(name, tracer.active_span()) {
            Ok(span) => span,
            Err(err) => {
                warn!(span = name, error = %err, "tracing unavailable, dispatching without traceparent");
                return None;
            }
        };

        let mut guard = SpanGuard::new(span);
        guard.set_attribute("serviceRequest", operation.url.as_str());
        guard.set_attribute("http.method", operation.method.as_str());
        guard.set_attribute("http.url", operation.url.as_str());
        guard.set_attribute("queue.name", operation.queue_name.as_str());
        guard.set_attribute("queue.location", operation.location.as_str());
        guard.set_attribute("schedule.seconds", schedule_time.seconds.to_string());
        Some(guard)
    }
}

/// base64(JSON(body)); an absent body encodes JSON `null`.
fn encode_body(body: Option<&serde_json::Value>) -> String {
    let json = body.map_or_else(|| "null".to_string(), |b| b.to_string());
    STANDARD.encode(json)
}
