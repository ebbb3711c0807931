//! Task and engine state types

use super::metrics::Metrics;
use crate::api::types::{PayloadStatus, TaskPayload};
use serde::Serialize;
use std::fmt;

/// Lifecycle of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created locally, not yet acknowledged
    Submitted,
    /// Acknowledged by the backend, result outstanding
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Engine state machine: `Idle -> Submitting -> AwaitingResult -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Submitting,
    AwaitingResult,
    Completed,
    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// A new submission may start from here
    pub fn accepts_submission(&self) -> bool {
        !matches!(self, Self::Submitting | Self::AwaitingResult)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingResult => "awaiting result",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One submitted prompt and what is known about its result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    /// Backend-assigned id, known once acknowledged
    pub id: Option<String>,
    pub agent_id: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub output: String,
    pub metrics: Option<Metrics>,
    pub error: Option<String>,
}

impl Task {
    pub fn submitted(agent_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: None,
            agent_id: agent_id.into(),
            prompt: prompt.into(),
            status: TaskStatus::Submitted,
            output: String::new(),
            metrics: None,
            error: None,
        }
    }
}

/// Which reconciliation path settled a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleSource {
    Push,
    Pull,
    /// The creation request itself failed
    Submission,
}

impl fmt::Display for SettleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Pull => f.write_str("poll"),
            Self::Submission => f.write_str("submission"),
        }
    }
}

/// Terminal result of a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        output: String,
        metrics: Option<Metrics>,
    },
    Failed {
        message: String,
    },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// How a payload ends the task, if it does
#[derive(Debug, Clone, PartialEq)]
pub enum Finish {
    Done,
    Failed(String),
}

/// Normalized reading of one pushed event or poll response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub output: Option<String>,
    pub metrics: Option<Metrics>,
    pub finish: Option<Finish>,
}

impl From<TaskPayload> for TaskUpdate {
    fn from(payload: TaskPayload) -> Self {
        let finish = match payload.failure() {
            Some(message) => Some(Finish::Failed(message)),
            None if payload.status() == PayloadStatus::Done => Some(Finish::Done),
            None => None,
        };
        Self {
            output: payload.output,
            metrics: payload.metrics,
            finish,
        }
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub task: Option<Task>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            task: None,
        }
    }
}

impl EngineSnapshot {
    pub fn task_id(&self) -> Option<&str> {
        self.task.as_ref().and_then(|t| t.id.as_deref())
    }
}

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged {
        from: EngineState,
        to: EngineState,
        task_id: Option<String>,
    },
    /// Pushed output replaced the visible output
    OutputUpdated { task_id: String, output: String },
    MetricsUpdated { task_id: String, metrics: Metrics },
    Settled {
        task_id: Option<String>,
        source: SettleSource,
        outcome: TaskOutcome,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_accepts_submission() {
        assert!(EngineState::Idle.accepts_submission());
        assert!(EngineState::Completed.accepts_submission());
        assert!(EngineState::Failed.accepts_submission());
        assert!(!EngineState::Submitting.accepts_submission());
        assert!(!EngineState::AwaitingResult.accepts_submission());
    }

    #[test]
    fn test_update_from_payload() {
        let done: TaskPayload =
            serde_json::from_str(r#"{"status": "done", "output": "hi"}"#).unwrap();
        let update = TaskUpdate::from(done);
        assert_eq!(update.finish, Some(Finish::Done));
        assert_eq!(update.output.as_deref(), Some("hi"));

        let partial: TaskPayload = serde_json::from_str(r#"{"output": "Par"}"#).unwrap();
        assert!(TaskUpdate::from(partial).finish.is_none());

        let failed: TaskPayload =
            serde_json::from_str(r#"{"status": "failed", "error": "boom"}"#).unwrap();
        assert_eq!(
            TaskUpdate::from(failed).finish,
            Some(Finish::Failed("boom".into()))
        );
    }

    #[test]
    fn test_submitted_task_is_empty() {
        let task = Task::submitted("agent-1", "hello");
        assert_eq!(task.status, TaskStatus::Submitted);
        assert!(task.id.is_none());
        assert!(task.output.is_empty());
        assert!(task.metrics.is_none());
        assert!(!task.status.is_terminal());
    }
}
