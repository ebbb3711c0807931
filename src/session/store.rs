//! Session store: login, logout and restoring a saved session

use super::context::RequestContext;
use super::credentials::CredentialStore;
use super::{Session, SessionStatus};
use crate::api::ApiClient;
use crate::error::{AuthError, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Owns the session lifecycle on top of a [`RequestContext`]
#[derive(Debug, Clone)]
pub struct SessionStore {
    api: ApiClient,
    ctx: RequestContext,
}

impl SessionStore {
    pub fn new(api: ApiClient, vault: Arc<dyn CredentialStore>) -> Self {
        Self {
            api,
            ctx: RequestContext::new(vault),
        }
    }

    /// Context to thread into every other outbound call
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Exchange credentials for a token, persist it and fetch the identity.
    ///
    /// A rejected login leaves the prior session exactly as it was.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let previous = self.ctx.session();
        self.ctx.set_status(SessionStatus::Authenticating);

        let credential = match self.api.request_token(username, password).await {
            Ok(credential) => credential,
            Err(e) => {
                self.ctx.restore(previous);
                return Err(e);
            }
        };

        if let Err(e) = self.ctx.vault().save(&credential) {
            warn!("Credential will not survive a restart: {}", e);
        }
        let epoch = self.ctx.install(credential);

        match self.api.whoami(&self.ctx).await {
            Ok(identity) => match self.ctx.authenticate(epoch, identity) {
                Some(session) => {
                    info!("Logged in as {}", username);
                    Ok(session)
                }
                None => Err(AuthError::SessionChanged.into()),
            },
            Err(e) => {
                if self.ctx.is_current(epoch) || self.ctx.session().credential.is_none() {
                    self.logout();
                }
                Err(e)
            }
        }
    }

    /// Forget the credential everywhere. Safe to call repeatedly.
    pub fn logout(&self) {
        let had_credential = self.ctx.session().credential.is_some();
        self.ctx.clear();
        if let Err(e) = self.ctx.vault().clear() {
            warn!("Failed to clear stored credential: {}", e);
        }
        if had_credential {
            info!("Logged out");
        }
    }

    pub fn current_session(&self) -> Session {
        self.ctx.session()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.ctx.subscribe()
    }

    /// Resume the session saved by an earlier run.
    ///
    /// Never fails: a missing, unreadable or rejected credential ends in a
    /// logout and an anonymous session.
    pub async fn restore_session(&self) -> Session {
        let credential = match self.ctx.vault().load() {
            Ok(Some(credential)) => credential,
            Ok(None) => return self.ctx.session(),
            Err(e) => {
                warn!("Ignoring stored credential: {}", e);
                self.logout();
                return self.ctx.session();
            }
        };

        let epoch = self.ctx.install(credential);
        match self.api.whoami(&self.ctx).await {
            Ok(identity) => match self.ctx.authenticate(epoch, identity) {
                Some(session) => {
                    info!("Restored session for {}", session.username().unwrap_or("?"));
                    session
                }
                None => self.ctx.session(),
            },
            Err(e) => {
                info!("Stored session is no longer usable: {}", e);
                if self.ctx.is_current(epoch) || self.ctx.session().credential.is_none() {
                    self.logout();
                }
                self.ctx.session()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::AionError;
    use crate::session::{Credential, FileCredentialStore, MemoryCredentialStore};
    use httpmock::prelude::*;
    use serde_json::json;

    fn api(server: &MockServer) -> ApiClient {
        ApiClient::new(&ClientConfig {
            api_url: server.base_url(),
            ..Default::default()
        })
        .unwrap()
    }

    async fn mock_login(server: &MockServer, token: &str) {
        let token = token.to_string();
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200)
                    .json_body(json!({"access_token": token, "token_type": "bearer"}));
            })
            .await;
    }

    async fn mock_me(server: &MockServer, token: &str, username: &str) {
        let bearer = format!("Bearer {}", token);
        let username = username.to_string();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/me").header("authorization", bearer);
                then.status(200)
                    .json_body(json!({"username": username, "role": "admin"}));
            })
            .await;
    }

    #[tokio::test]
    async fn test_login_then_restore_after_restart() {
        let server = MockServer::start_async().await;
        mock_login(&server, "jwt-1").await;
        mock_me(&server, "jwt-1", "admin").await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let first = SessionStore::new(api(&server), Arc::new(FileCredentialStore::new(&path)));
        let session = first.login("admin", "admin").await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.username(), Some("admin"));

        // New process, same disk
        let second = SessionStore::new(api(&server), Arc::new(FileCredentialStore::new(&path)));
        assert_eq!(second.current_session().status, SessionStatus::Anonymous);

        let restored = second.restore_session().await;
        assert!(restored.is_authenticated());
        assert_eq!(restored.identity, session.identity);
    }

    #[tokio::test]
    async fn test_restore_with_rejected_credential_ends_anonymous() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/me");
                then.status(401).json_body(json!({"detail": "Token expired"}));
            })
            .await;

        let vault = Arc::new(MemoryCredentialStore::new());
        vault.save(&Credential::new("stale")).unwrap();
        let store = SessionStore::new(api(&server), vault.clone());

        let session = store.restore_session().await;

        assert_eq!(session.status, SessionStatus::Anonymous);
        assert!(session.credential.is_none());
        assert!(vault.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_without_saved_credential_issues_no_request() {
        let server = MockServer::start_async().await;
        let me = server
            .mock_async(|when, then| {
                when.method(GET).path("/users/me");
                then.status(200).json_body(json!({"username": "x"}));
            })
            .await;

        let store = SessionStore::new(api(&server), Arc::new(MemoryCredentialStore::new()));
        let session = store.restore_session().await;

        assert_eq!(session.status, SessionStatus::Anonymous);
        assert_eq!(me.hits_async().await, 0);
    }

    #[tokio::test]
    async fn test_logout_twice() {
        let server = MockServer::start_async().await;
        mock_login(&server, "jwt-1").await;
        mock_me(&server, "jwt-1", "admin").await;

        let vault = Arc::new(MemoryCredentialStore::new());
        let store = SessionStore::new(api(&server), vault.clone());
        store.login("admin", "admin").await.unwrap();
        assert!(vault.load().unwrap().is_some());

        store.logout();
        assert_eq!(store.current_session(), Session::anonymous());
        store.logout();
        assert_eq!(store.current_session(), Session::anonymous());
        assert!(vault.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_login_keeps_prior_session() {
        let server = MockServer::start_async().await;
        let good = server
            .mock_async(|when, then| {
                when.method(POST).path("/token").body_includes("password=right");
                then.status(200).json_body(json!({"access_token": "jwt-1"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token").body_includes("password=wrong");
                then.status(401)
                    .json_body(json!({"detail": "Incorrect username or password"}));
            })
            .await;
        mock_me(&server, "jwt-1", "admin").await;

        let store = SessionStore::new(api(&server), Arc::new(MemoryCredentialStore::new()));
        let before = store.login("admin", "right").await.unwrap();
        good.assert_async().await;

        let err = store.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(
            err,
            AionError::Auth(AuthError::Rejected(ref m)) if m == "Incorrect username or password"
        ));
        assert_eq!(store.current_session(), before);
        assert_eq!(
            store.context().grant().credential,
            Some(Credential::new("jwt-1"))
        );
    }

    #[tokio::test]
    async fn test_subscribers_observe_login_and_logout() {
        let server = MockServer::start_async().await;
        mock_login(&server, "jwt-1").await;
        mock_me(&server, "jwt-1", "maria").await;

        let store = SessionStore::new(api(&server), Arc::new(MemoryCredentialStore::new()));
        let rx = store.subscribe();

        store.login("maria", "pw").await.unwrap();
        assert_eq!(rx.borrow().username(), Some("maria"));

        store.logout();
        assert_eq!(rx.borrow().status, SessionStatus::Anonymous);
    }
}
