//! Request context
//!
//! The one place the bearer credential lives. Every outbound call takes a
//! `RequestContext` and reads a [`Grant`] from it at issuance time, so a
//! logout is seen by the very next request without any ambient header state.
//!
//! Each credential change bumps an epoch. A response to a request issued
//! under an older epoch is discarded by the caller, which closes the window
//! where an in-flight request could act on a credential that was already
//! logged out.

use super::credentials::CredentialStore;
use super::{Credential, Identity, Session, SessionStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Credential captured for one outbound request
#[derive(Debug, Clone)]
pub struct Grant {
    pub credential: Option<Credential>,
    pub epoch: u64,
}

struct ContextState {
    session: Session,
    epoch: u64,
}

struct ContextInner {
    state: RwLock<ContextState>,
    changes: watch::Sender<Session>,
    vault: Arc<dyn CredentialStore>,
}

/// Shared handle to the current session and its credential
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    /// Create an anonymous context backed by a credential store
    pub fn new(vault: Arc<dyn CredentialStore>) -> Self {
        let (changes, _) = watch::channel(Session::anonymous());
        Self {
            inner: Arc::new(ContextInner {
                state: RwLock::new(ContextState {
                    session: Session::anonymous(),
                    epoch: 0,
                }),
                changes,
                vault,
            }),
        }
    }

    /// Credential to attach to a request issued now
    pub fn grant(&self) -> Grant {
        let state = self.inner.state.read();
        Grant {
            credential: state.session.credential.clone(),
            epoch: state.epoch,
        }
    }

    /// Whether a grant taken earlier still matches the live credential
    pub fn is_current(&self, epoch: u64) -> bool {
        self.inner.state.read().epoch == epoch
    }

    pub fn session(&self) -> Session {
        self.inner.state.read().session.clone()
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.changes.subscribe()
    }

    pub(crate) fn vault(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.vault
    }

    /// The backend answered 401 to a request issued under `epoch`
    pub fn reject(&self, epoch: u64) {
        let session = {
            let mut state = self.inner.state.write();
            if state.epoch != epoch || state.session.credential.is_none() {
                return;
            }
            state.epoch += 1;
            state.session = Session {
                status: SessionStatus::Invalid,
                identity: None,
                credential: None,
            };
            state.session.clone()
        };

        info!("Backend rejected the session credential");
        if let Err(e) = self.inner.vault.clear() {
            error!("Failed to clear rejected credential: {}", e);
        }
        self.publish(session);
    }

    /// Install a new credential; identity is unknown until confirmed
    pub(crate) fn install(&self, credential: Credential) -> u64 {
        let (session, epoch) = {
            let mut state = self.inner.state.write();
            state.epoch += 1;
            state.session = Session {
                status: SessionStatus::Authenticating,
                identity: None,
                credential: Some(credential),
            };
            (state.session.clone(), state.epoch)
        };
        self.publish(session);
        epoch
    }

    /// Confirm the identity behind the credential installed at `epoch`
    pub(crate) fn authenticate(&self, epoch: u64, identity: Identity) -> Option<Session> {
        let session = {
            let mut state = self.inner.state.write();
            if state.epoch != epoch || state.session.credential.is_none() {
                return None;
            }
            state.session.status = SessionStatus::Authenticated;
            state.session.identity = Some(identity);
            state.session.clone()
        };
        self.publish(session.clone());
        Some(session)
    }

    /// Change only the visible status, keeping credential and epoch
    pub(crate) fn set_status(&self, status: SessionStatus) {
        let session = {
            let mut state = self.inner.state.write();
            state.session.status = status;
            state.session.clone()
        };
        self.publish(session);
    }

    /// Put back a previously observed session without touching the epoch
    pub(crate) fn restore(&self, previous: Session) {
        {
            let mut state = self.inner.state.write();
            state.session = previous.clone();
        }
        self.publish(previous);
    }

    /// Drop the credential and return to anonymous
    pub(crate) fn clear(&self) {
        {
            let mut state = self.inner.state.write();
            if state.session.credential.is_some() {
                state.epoch += 1;
            }
            state.session = Session::anonymous();
        }
        self.publish(Session::anonymous());
    }

    fn publish(&self, session: Session) {
        self.inner.changes.send_replace(session);
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("RequestContext")
            .field("status", &state.session.status)
            .field("epoch", &state.epoch)
            .finish()
    }
}
