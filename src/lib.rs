//! AION console client
//!
//! Client library for the AION agent task platform: log in, pick an agent,
//! submit a prompt and follow its result as it streams in.
//!
//! ## Module Structure
//!
//! - `config`: backend location, polling cadence, credential path
//! - `error`: error taxonomy
//! - `api`: HTTP client and wire types
//! - `session`: request context, credential storage, login lifecycle, section gating
//! - `agents`: agent directory
//! - `push`: Socket.IO task update channel
//! - `task`: submission and push/poll reconciliation

/// Client configuration
pub mod config;

/// Error types
pub mod error;

/// Platform HTTP API
pub mod api;

/// Session lifecycle and credentials
pub mod session;

/// Agent directory
pub mod agents;

/// Real-time task updates
pub mod push;

/// Task engine
pub mod task;

pub use agents::{AgentDirectory, AgentListing};
pub use api::{Agent, ApiClient, TaskPayload, TaskRequest};
pub use config::ClientConfig;
pub use error::{AionError, AuthError, Result, ValidationError};
pub use push::PushChannel;
pub use session::{
    Access, Credential, CredentialStore, FileCredentialStore, Identity, MemoryCredentialStore,
    RequestContext, Section, Session, SessionStatus, SessionStore,
};
pub use task::{
    EngineEvent, EngineSnapshot, EngineState, Metrics, TaskEngine, TaskHandle, TaskOutcome,
};

use std::sync::Arc;

/// Everything a front end needs, wired from one config
#[derive(Debug, Clone)]
pub struct Client {
    pub config: ClientConfig,
    pub sessions: SessionStore,
    pub agents: AgentDirectory,
    pub engine: TaskEngine,
    push: Option<Arc<PushChannel>>,
}

impl Client {
    /// Build a client persisting its credential at the configured path
    pub fn new(config: ClientConfig) -> Result<Self> {
        let vault = Arc::new(FileCredentialStore::new(config.credentials_file()));
        Self::with_store(config, vault)
    }

    pub fn with_store(config: ClientConfig, vault: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate()?;
        let api = ApiClient::new(&config)?;
        let sessions = SessionStore::new(api.clone(), vault);
        let ctx = sessions.context().clone();

        let push = if config.push_enabled {
            Some(Arc::new(PushChannel::new(
                config.push_endpoint()?,
                ctx.clone(),
                config.request_timeout(),
            )))
        } else {
            None
        };

        Ok(Self {
            agents: AgentDirectory::new(api.clone(), ctx.clone()),
            engine: TaskEngine::new(&config, api, ctx, push.clone()),
            sessions,
            push,
            config,
        })
    }

    /// The shared task update channel; `None` when push is disabled
    pub fn push(&self) -> Option<&Arc<PushChannel>> {
        self.push.as_ref()
    }

    /// Close the task update channel, if open
    pub fn shutdown(&self) {
        if let Some(push) = &self.push {
            push.close();
        }
    }
}
