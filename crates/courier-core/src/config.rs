//! Config - 実行設定
//!
//! JSON ファイルから読み込み、CLI フラグで上書きされる前提の設定値。
//!
//! ```json
//! {
//!   "projectId": "acme",
//!   "endpoint": "https://cloudtasks.googleapis.com/v2",
//!   "policy": "continue",
//!   "operationTimeoutSecs": 10,
//!   "runTimeoutSecs": 120
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{FailurePolicy, RunOptions};
use crate::impls::DEFAULT_ENDPOINT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CourierConfig {
    pub project_id: Option<String>,
    pub endpoint: String,
    pub access_token: Option<String>,
    pub policy: FailurePolicy,
    pub operation_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            policy: FailurePolicy::default(),
            operation_timeout_secs: None,
            run_timeout_secs: None,
        }
    }
}

impl CourierConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Zero means "no timeout".
    pub fn run_options(&self) -> RunOptions {
        let secs = |v: Option<u64>| v.filter(|s| *s > 0).map(Duration::from_secs);
        RunOptions {
            policy: self.policy,
            operation_timeout: secs(self.operation_timeout_secs),
            run_timeout: secs(self.run_timeout_secs),
        }
    }
}
