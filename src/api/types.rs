//! Wire types for the platform HTTP API and the task update channel

use crate::task::metrics::Metrics;
use serde::{Deserialize, Serialize};

/// `POST /token` success body
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// FastAPI-style error body
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub detail: serde_json::Value,
}

impl ErrorDetail {
    /// Human readable message, if the backend supplied a plain string
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

/// Agent as listed by `GET /agents`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `POST /run-task` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRequest {
    pub agent: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

impl TaskRequest {
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// `POST /run-task` success body
#[derive(Debug, Clone, Deserialize)]
pub struct TaskAccepted {
    pub task_id: String,
}

/// Body shared by `GET /result/{id}` and `task_update_{id}` events.
///
/// Every field is optional: pushed events carry any combination of an output
/// update, a metrics object and the terminal status.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Terminal meaning of a payload's `status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStatus {
    Pending,
    Done,
    Failed,
    Unspecified,
}

impl TaskPayload {
    pub fn status(&self) -> PayloadStatus {
        match self.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => PayloadStatus::Unspecified,
            Some("pending") | Some("running") | Some("started") => PayloadStatus::Pending,
            Some("done") | Some("completed") | Some("success") => PayloadStatus::Done,
            Some("failed") | Some("failure") | Some("error") => PayloadStatus::Failed,
            Some(_) => PayloadStatus::Unspecified,
        }
    }

    /// Backend-reported task error, when the payload describes a failed run
    pub fn failure(&self) -> Option<String> {
        match self.status() {
            PayloadStatus::Failed => Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "Task reported failure".to_string()),
            ),
            PayloadStatus::Done if self.output.is_none() => self.error.clone(),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), PayloadStatus::Done | PayloadStatus::Failed)
    }
}
