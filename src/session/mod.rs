//! Session management
//!
//! Who is logged in, which bearer credential goes out with every request,
//! and which sections of the console that identity may reach.

pub mod access;
pub mod context;
pub mod credentials;
pub mod store;

pub use access::{Access, Section};
pub use context::{Grant, RequestContext};
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use store::SessionStore;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role string the backend uses for administrators
pub const ADMIN_ROLE: &str = "admin";

/// Opaque bearer token issued by the platform
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for the `Authorization` header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Logged-in user as reported by `GET /users/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

fn default_role() -> String {
    "user".to_string()
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Anonymous,
    Authenticating,
    Authenticated,
    /// The backend rejected the credential; a new login is required
    Invalid,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Invalid => "invalid",
        }
    }
}

/// Current authentication state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub status: SessionStatus,
    pub identity: Option<Identity>,
    pub credential: Option<Credential>,
}

impl Default for Session {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            identity: None,
            credential: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated && self.identity.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.identity.as_ref().is_some_and(Identity::is_admin)
    }

    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.username.as_str())
    }
}
