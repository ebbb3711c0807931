//! Task submission and result reconciliation
//!
//! A submitted task is watched by two independent paths:
//! - Push: the shared task update channel, event `task_update_<id>`
//! - Pull: `GET /result/<id>` on a fixed interval
//!
//! Either path may report the terminal state first. Both go through the same
//! settle step guarded by a one-shot latch, so a task settles exactly once and
//! whatever arrives afterwards for the same id is dropped. Settling cancels
//! the other path.

use super::latch::SettleLatch;
use super::model::{
    EngineEvent, EngineSnapshot, EngineState, Finish, SettleSource, Task, TaskOutcome, TaskStatus,
    TaskUpdate,
};
use crate::api::types::{TaskPayload, TaskRequest};
use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::{AionError, AuthError, Result, ValidationError, SUBMIT_FAILED_MESSAGE};
use crate::push::{PushChannel, Subscription};
use crate::session::RequestContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Event channel capacity
const EVENT_CAPACITY: usize = 128;

/// Push event name for a task id
pub fn update_event(task_id: &str) -> String {
    format!("task_update_{}", task_id)
}

type Settled = Option<std::result::Result<TaskOutcome, AionError>>;

/// One submission and its reconciliation paths
struct Run {
    generation: u64,
    latch: SettleLatch,
    cancel: CancellationToken,
    outcome: watch::Sender<Settled>,
}

impl Run {
    fn new(generation: u64) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            generation,
            latch: SettleLatch::new(),
            cancel: CancellationToken::new(),
            outcome,
        }
    }
}

struct Shared {
    snapshot: EngineSnapshot,
    generation: u64,
}

struct EngineInner {
    api: ApiClient,
    ctx: RequestContext,
    push: Option<Arc<PushChannel>>,
    poll_interval: Duration,
    max_poll_failures: u32,
    shared: Mutex<Shared>,
    events: broadcast::Sender<EngineEvent>,
}

/// Drives one task at a time from submission to its terminal state
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

impl TaskEngine {
    /// `push` is optional: without it the engine relies on polling alone
    pub fn new(
        config: &ClientConfig,
        api: ApiClient,
        ctx: RequestContext,
        push: Option<Arc<PushChannel>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                api,
                ctx,
                push,
                poll_interval: config.poll_interval(),
                max_poll_failures: config.max_poll_failures.max(1),
                shared: Mutex::new(Shared {
                    snapshot: EngineSnapshot::default(),
                    generation: 0,
                }),
                events,
            }),
        }
    }

    /// Observe state transitions, output and metrics updates
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.shared.lock().snapshot.clone()
    }

    pub fn state(&self) -> EngineState {
        self.inner.shared.lock().snapshot.state
    }

    /// Submit `prompt` to `agent_id` at the backend's default priority
    pub async fn submit(&self, agent_id: &str, prompt: &str) -> Result<TaskHandle> {
        self.submit_with(TaskRequest::new(agent_id, prompt)).await
    }

    /// Submit a task and start reconciling its result.
    ///
    /// Empty input is rejected without touching the engine state. A failed
    /// creation request leaves the engine `Failed` and is not retried.
    pub async fn submit_with(&self, request: TaskRequest) -> Result<TaskHandle> {
        if request.agent.trim().is_empty() {
            return Err(ValidationError::EmptyAgent.into());
        }
        if request.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt.into());
        }

        let run = self.inner.begin(&request)?;
        let mut guard = SubmitGuard {
            inner: &self.inner,
            run: &run,
            armed: true,
        };

        let task_id = match self.inner.api.run_task(&self.inner.ctx, &request).await {
            Ok(task_id) => task_id,
            Err(e) => {
                guard.armed = false;
                warn!("Task submission failed: {}", e);
                self.inner.fail_submission(&run, e.clone());
                return Err(e);
            }
        };

        if !self.inner.acknowledge(&run, &task_id) {
            guard.armed = false;
            return Err(AionError::Cancelled);
        }
        info!("Task {} accepted, awaiting result", task_id);
        guard.armed = false;
        drop(guard);

        // Polling never waits on the push handshake
        tokio::spawn(pull_path(self.inner.clone(), run.clone(), task_id.clone()));
        if self.inner.push.is_some() {
            tokio::spawn(push_path(self.inner.clone(), run.clone(), task_id.clone()));
        }

        Ok(TaskHandle {
            inner: self.inner.clone(),
            outcome: run.outcome.subscribe(),
            run,
            task_id,
        })
    }

    /// Return a terminal engine to `Idle` once its result has been read
    pub fn reset(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.snapshot.state.is_terminal() {
            let from = shared.snapshot.state;
            let task_id = shared.snapshot.task_id().map(String::from);
            shared.snapshot = EngineSnapshot::default();
            self.inner.emit(EngineEvent::StateChanged {
                from,
                to: EngineState::Idle,
                task_id,
            });
        }
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("TaskEngine")
            .field("state", &shared.snapshot.state)
            .field("task_id", &shared.snapshot.task_id())
            .field("push", &self.inner.push.is_some())
            .finish()
    }
}

impl EngineInner {
    fn emit(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, shared: &mut Shared, to: EngineState) {
        let from = shared.snapshot.state;
        shared.snapshot.state = to;
        debug!("Engine {} -> {}", from, to);
        self.emit(EngineEvent::StateChanged {
            from,
            to,
            task_id: shared.snapshot.task_id().map(String::from),
        });
    }

    fn is_current(&self, shared: &Shared, run: &Run) -> bool {
        shared.generation == run.generation
    }

    /// Enter `Submitting` with a fresh task
    fn begin(&self, request: &TaskRequest) -> Result<Arc<Run>> {
        let mut shared = self.shared.lock();
        if !shared.snapshot.state.accepts_submission() {
            return Err(ValidationError::TaskInFlight.into());
        }

        shared.generation += 1;
        let run = Arc::new(Run::new(shared.generation));
        shared.snapshot.task = Some(Task::submitted(&request.agent, &request.prompt));
        self.transition(&mut shared, EngineState::Submitting);
        Ok(run)
    }

    /// Record the backend id; false if the run was abandoned meanwhile
    fn acknowledge(&self, run: &Run, task_id: &str) -> bool {
        let mut shared = self.shared.lock();
        if run.latch.is_settled() || !self.is_current(&shared, run) {
            return false;
        }
        if let Some(task) = shared.snapshot.task.as_mut() {
            task.id = Some(task_id.to_string());
            task.status = TaskStatus::Pending;
        }
        self.transition(&mut shared, EngineState::AwaitingResult);
        true
    }

    fn fail_submission(&self, run: &Run, error: AionError) {
        let mut shared = self.shared.lock();
        if !self.is_current(&shared, run) || !run.latch.try_settle() {
            return;
        }
        if let Some(task) = shared.snapshot.task.as_mut() {
            task.status = TaskStatus::Failed;
            task.error = Some(SUBMIT_FAILED_MESSAGE.to_string());
        }
        self.transition(&mut shared, EngineState::Failed);
        self.emit(EngineEvent::Settled {
            task_id: None,
            source: SettleSource::Submission,
            outcome: TaskOutcome::Failed {
                message: SUBMIT_FAILED_MESSAGE.to_string(),
            },
        });
        run.cancel.cancel();
        run.outcome.send_replace(Some(Err(error)));
    }

    /// Subscribe to the task's push event; polling covers any failure here
    async fn arm_push(&self, task_id: &str) -> Option<Subscription> {
        let push = self.push.as_ref()?;
        match push.subscribe(&update_event(task_id)).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!("Push updates unavailable, relying on polling: {}", e);
                None
            }
        }
    }

    /// Apply an update from either path. Returns true once the path is done.
    fn apply(&self, run: &Run, task_id: &str, update: TaskUpdate, source: SettleSource) -> bool {
        let mut shared = self.shared.lock();
        if run.latch.is_settled() || run.cancel.is_cancelled() {
            return true;
        }
        if !self.is_current(&shared, run) || shared.snapshot.task_id() != Some(task_id) {
            debug!("Dropping {} update for stale task {}", source, task_id);
            return true;
        }

        let Some(task) = shared.snapshot.task.as_mut() else {
            return true;
        };
        if let Some(output) = update.output {
            task.output = output.clone();
            self.emit(EngineEvent::OutputUpdated {
                task_id: task_id.to_string(),
                output,
            });
        }
        if let Some(metrics) = update.metrics {
            task.metrics = Some(metrics.clone());
            self.emit(EngineEvent::MetricsUpdated {
                task_id: task_id.to_string(),
                metrics,
            });
        }

        match update.finish {
            None => false,
            Some(Finish::Done) => {
                let outcome = TaskOutcome::Completed {
                    output: task.output.clone(),
                    metrics: task.metrics.clone(),
                };
                self.settle(&mut shared, run, task_id, source, Ok(outcome));
                true
            }
            Some(Finish::Failed(message)) => {
                self.settle(
                    &mut shared,
                    run,
                    task_id,
                    source,
                    Err(AionError::BackendTerminal(message)),
                );
                true
            }
        }
    }

    /// Settle from a path that gave up rather than observed a result
    fn abort(&self, run: &Run, task_id: &str, source: SettleSource, error: AionError) {
        let mut shared = self.shared.lock();
        if run.latch.is_settled() || !self.is_current(&shared, run) {
            return;
        }
        self.settle(&mut shared, run, task_id, source, Err(error));
    }

    /// The single terminal transition. Caller holds the state lock.
    fn settle(
        &self,
        shared: &mut Shared,
        run: &Run,
        task_id: &str,
        source: SettleSource,
        result: std::result::Result<TaskOutcome, AionError>,
    ) {
        if !run.latch.try_settle() {
            return;
        }
        run.cancel.cancel();

        let (to, outcome) = match &result {
            Ok(outcome) => (EngineState::Completed, outcome.clone()),
            Err(e) => (
                EngineState::Failed,
                TaskOutcome::Failed {
                    message: failure_message(e),
                },
            ),
        };
        if let Some(task) = shared.snapshot.task.as_mut() {
            match &outcome {
                TaskOutcome::Completed { .. } => task.status = TaskStatus::Completed,
                TaskOutcome::Failed { message } => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(message.clone());
                }
            }
        }

        info!("Task {} settled by {} as {}", task_id, source, to);
        self.transition(shared, to);
        self.emit(EngineEvent::Settled {
            task_id: Some(task_id.to_string()),
            source,
            outcome,
        });
        run.outcome.send_replace(Some(result));
    }

    /// Stop both paths and return to `Idle` without a result
    fn release(&self, run: &Run) {
        let mut shared = self.shared.lock();
        if !run.latch.try_settle() {
            return;
        }
        run.cancel.cancel();
        run.outcome.send_replace(Some(Err(AionError::Cancelled)));

        if self.is_current(&shared, run) {
            let task_id = shared.snapshot.task_id().map(String::from);
            info!("Task {:?} cancelled", task_id);
            self.transition(&mut shared, EngineState::Idle);
            shared.snapshot.task = None;
        }
    }
}

fn failure_message(error: &AionError) -> String {
    match error {
        AionError::BackendTerminal(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Returns the engine to `Idle` if `submit_with` is dropped mid-request
struct SubmitGuard<'a> {
    inner: &'a Arc<EngineInner>,
    run: &'a Arc<Run>,
    armed: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release(self.run);
        }
    }
}

async fn push_path(inner: Arc<EngineInner>, run: Arc<Run>, task_id: String) {
    let armed = tokio::select! {
        _ = run.cancel.cancelled() => return,
        armed = inner.arm_push(&task_id) => armed,
    };
    let Some(mut subscription) = armed else {
        return;
    };

    loop {
        let message = tokio::select! {
            _ = run.cancel.cancelled() => break,
            message = subscription.next() => message,
        };

        let Some(value) = message else {
            debug!("Push channel closed for task {}, polling continues", task_id);
            break;
        };
        let payload: TaskPayload = match serde_json::from_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Ignoring malformed update for task {}: {}", task_id, e);
                continue;
            }
        };
        if inner.apply(&run, &task_id, payload.into(), SettleSource::Push) {
            break;
        }
    }
    // Dropping the subscription removes its route
}

async fn pull_path(inner: Arc<EngineInner>, run: Arc<Run>, task_id: String) {
    let mut ticker = tokio::time::interval_at(
        Instant::now() + inner.poll_interval,
        inner.poll_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = run.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = run.cancel.cancelled() => break,
            result = inner.api.fetch_result(&inner.ctx, &task_id) => result,
        };

        match result {
            Ok(payload) => {
                failures = 0;
                if inner.apply(&run, &task_id, payload.into(), SettleSource::Pull) {
                    break;
                }
            }
            Err(AionError::Auth(e)) => {
                warn!("Polling task {} stopped: {}", task_id, e);
                let error = match e {
                    AuthError::SessionChanged => AuthError::SessionChanged,
                    _ => AuthError::Expired,
                };
                inner.abort(&run, &task_id, SettleSource::Pull, error.into());
                break;
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Poll {} of {} for task {} failed: {}",
                    failures, inner.max_poll_failures, task_id, e
                );
                if failures >= inner.max_poll_failures {
                    inner.abort(&run, &task_id, SettleSource::Pull, e);
                    break;
                }
            }
        }
    }
}

/// A submitted task. Dropping the handle before the task settles cancels it.
pub struct TaskHandle {
    inner: Arc<EngineInner>,
    run: Arc<Run>,
    outcome: watch::Receiver<Settled>,
    task_id: String,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_settled(&self) -> bool {
        self.run.latch.is_settled()
    }

    /// Wait for the terminal result
    pub async fn wait(mut self) -> Result<TaskOutcome> {
        let settled = match self.outcome.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(AionError::Cancelled))
    }

    /// Stop both reconciliation paths; the engine returns to `Idle`
    pub fn cancel(&self) {
        self.inner.release(&self.run);
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.inner.release(&self.run);
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryCredentialStore, SessionStore};
    use crate::task::metrics::Metrics;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(server: &MockServer) -> ClientConfig {
        ClientConfig {
            api_url: server.base_url(),
            push_enabled: false,
            poll_interval_ms: 100,
            max_poll_failures: 2,
            ..Default::default()
        }
    }

    async fn logged_in(server: &MockServer) -> (ApiClient, RequestContext) {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200).json_body(json!({"access_token": "jwt"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/me");
                then.status(200)
                    .json_body(json!({"username": "admin", "role": "admin"}));
            })
            .await;

        let api = ApiClient::new(&config(server)).unwrap();
        let store = SessionStore::new(api.clone(), Arc::new(MemoryCredentialStore::new()));
        store.login("admin", "admin").await.unwrap();
        (api, store.context().clone())
    }

    async fn engine(server: &MockServer) -> TaskEngine {
        let (api, ctx) = logged_in(server).await;
        TaskEngine::new(&config(server), api, ctx, None)
    }

    #[tokio::test]
    async fn test_empty_input_stays_idle() {
        let server = MockServer::start_async().await;
        let run = server
            .mock_async(|when, then| {
                when.method(POST).path("/run-task");
                then.status(200).json_body(json!({"task_id": "t1"}));
            })
            .await;
        let engine = engine(&server).await;

        let err = engine.submit("agent-1", "   ").await.unwrap_err();
        assert!(matches!(
            err,
            AionError::Validation(ValidationError::EmptyPrompt)
        ));
        let err = engine.submit("", "hello").await.unwrap_err();
        assert!(matches!(err, AionError::Validation(ValidationError::EmptyAgent)));

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(run.hits_async().await, 0);
    }

    #[tokio::test]
    async fn test_poll_completes_task() {
        let server = MockServer::start_async().await;
        let engine = engine(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/run-task")
                    .json_body(json!({"agent": "agent-1", "prompt": "hello"}));
                then.status(200).json_body(json!({"task_id": "t1"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/result/t1");
                then.status(200).json_body(json!({
                    "status": "done",
                    "output": "hi",
                    "metrics": {"quality": 9.0, "error": "minor"}
                }));
            })
            .await;

        let handle = engine.submit("agent-1", "hello").await.unwrap();
        assert_eq!(handle.task_id(), "t1");

        let outcome = handle.wait().await.unwrap();
        match outcome {
            TaskOutcome::Completed { output, metrics } => {
                assert_eq!(output, "hi");
                let metrics = metrics.unwrap_or_else(Metrics::new);
                assert_eq!(metrics.score("quality"), Some(9.0));
                assert_eq!(metrics.render().len(), 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.state, EngineState::Completed);
        assert_eq!(snapshot.task_id(), Some("t1"));
        assert_eq!(snapshot.task.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_submission_failure_is_terminal() {
        let server = MockServer::start_async().await;
        let engine = engine(&server).await;
        let run = server
            .mock_async(|when, then| {
                when.method(POST).path("/run-task");
                then.status(500);
            })
            .await;

        let err = engine.submit("agent-1", "hello").await.unwrap_err();
        assert!(matches!(err, AionError::Network(_)));

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.state, EngineState::Failed);
        assert_eq!(
            snapshot.task.unwrap().error.as_deref(),
            Some(SUBMIT_FAILED_MESSAGE)
        );
        // No automatic retry
        assert_eq!(run.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_settles_failed() {
        let server = MockServer::start_async().await;
        let engine = engine(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/run-task");
                then.status(200).json_body(json!({"task_id": "t2"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/result/t2");
                then.status(200)
                    .json_body(json!({"status": "done", "error": "model overloaded"}));
            })
            .await;

        let handle = engine.submit("agent-1", "hello").await.unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, AionError::BackendTerminal(ref m) if m == "model overloaded"));
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn test_repeated_poll_errors_fail_task() {
        let server = MockServer::start_async().await;
        let engine = engine(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/run-task");
                then.status(200).json_body(json!({"task_id": "t3"}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/result/t3");
                then.status(502);
            })
            .await;

        let handle = engine.submit("agent-1", "hello").await.unwrap();
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(err, AionError::Network(_)));
        assert_eq!(poll.hits_async().await, 2);
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn test_second_submit_while_awaiting_is_rejected() {
        let server = MockServer::start_async().await;
        let engine = engine(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/run-task");
                then.status(200).json_body(json!({"task_id": "t4"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/result/t4");
                then.status(200).json_body(json!({"status": "pending"}));
            })
            .await;

        let _handle = engine.submit("agent-1", "first").await.unwrap();
        let err = engine.submit("agent-1", "second").await.unwrap_err();
        assert!(matches!(
            err,
            AionError::Validation(ValidationError::TaskInFlight)
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_polling_and_returns_idle() {
        let server = MockServer::start_async().await;
        let engine = engine(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/run-task");
                then.status(200).json_body(json!({"task_id": "t5"}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/result/t5");
                then.status(200).json_body(json!({"status": "pending"}));
            })
            .await;

        let handle = engine.submit("agent-1", "hello").await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(handle);

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.snapshot().task.is_none());

        let hits = poll.hits_async().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(poll.hits_async().await, hits);
    }

    #[tokio::test]
    async fn test_reset_after_terminal() {
        let server = MockServer::start_async().await;
        let engine = engine(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/run-task");
                then.status(200).json_body(json!({"task_id": "t6"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/result/t6");
                then.status(200).json_body(json!({"status": "done", "output": "ok"}));
            })
            .await;

        engine.submit("agent-1", "hello").await.unwrap().wait().await.unwrap();
        assert_eq!(engine.state(), EngineState::Completed);

        engine.reset();
        assert_eq!(engine.snapshot(), EngineSnapshot::default());
    }
}
