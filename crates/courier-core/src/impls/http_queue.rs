//! CloudTasksHttpQueue - REST API 経由の QueueService 実装
//!
//! `POST {endpoint}/{parent}/tasks` に `{ "task": ... }` を送ります。
//! REST API は scheduleTime を RFC 3339 文字列で受け取るので、
//! descriptor の `{ seconds }` をここで変換します。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{HttpRequest, QueueServiceError, TaskDescriptor, TaskRecord};
use crate::ports::QueueService;

pub const DEFAULT_ENDPOINT: &str = "https://cloudtasks.googleapis.com/v2";

pub struct CloudTasksHttpQueue {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl CloudTasksHttpQueue {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            access_token: None,
        }
    }

    /// Bearer token sent with every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn tasks_url(&self, parent: &str) -> String {
        format!("{}/{}/tasks", self.endpoint.trim_end_matches('/'), parent)
    }
}

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    task: RestTask<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestTask<'a> {
    http_request: &'a HttpRequest,
    schedule_time: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn rest_body(descriptor: &TaskDescriptor) -> Result<CreateTaskBody<'_>, QueueServiceError> {
    let schedule_time = descriptor
        .task
        .schedule_time
        .to_datetime()
        .ok_or_else(|| {
            QueueServiceError::Rejected {
                status: 400,
                message: format!("schedule time {} is out of range", descriptor.task.schedule_time.seconds),
            }
        })?
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    Ok(CreateTaskBody {
        task: RestTask {
            http_request: &descriptor.task.http_request,
            schedule_time,
        },
    })
}

#[async_trait]
impl QueueService for CloudTasksHttpQueue {
    async fn create_task(&self, descriptor: TaskDescriptor) -> Result<TaskRecord, QueueServiceError> {
        let url = self.tasks_url(&descriptor.parent);
        let body = rest_body(&descriptor)?;
        debug!(url = %url, "creating task");

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueueServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(QueueServiceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<TaskRecord>()
            .await
            .map_err(|e| QueueServiceError::Decode(e.to_string()))
    }
}
