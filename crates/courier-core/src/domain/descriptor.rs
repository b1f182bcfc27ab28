//! Backend dispatch descriptor (what the QueueService receives) and the task
//! record it returns.
//!
//! The descriptor is a pure data shape; building it from an `Operation` is the
//! dispatch client's job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::HttpMethod;

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Fully-qualified queue path understood by the managed queue backend.
pub fn queue_path(project_id: &str, location: &str, queue_name: &str) -> String {
    format!("projects/{project_id}/locations/{location}/queues/{queue_name}")
}

/// `{ parent, task }` の create-task リクエスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub parent: String,
    pub task: TaskSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub http_request: HttpRequest,
    pub schedule_time: ScheduleTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub http_method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,

    /// base64(JSON(body)); only present for POST/PUT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Delivery time in whole seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTime {
    pub seconds: i64,
}

impl ScheduleTime {
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, 0)
    }
}

/// The backend's acknowledgement of a created task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Backend-assigned task name (`{parent}/tasks/{id}`).
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
}
