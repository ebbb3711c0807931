//! Error types for the AION client
//!
//! Every failure surfaced by the library maps onto one of four families:
//! authentication, network, validation and backend-reported task failure.
//! Configuration, storage and wire-format problems get their own variants so
//! callers can tell a misconfigured client apart from an unreachable backend.

use thiserror::Error;

/// Generic message shown when the backend rejects a login without a `detail`.
pub const LOGIN_FALLBACK_MESSAGE: &str = "An error occurred during login";

/// Generic message recorded when a task could not be submitted.
pub const SUBMIT_FAILED_MESSAGE: &str = "Task submission failed";

/// Authentication failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    Rejected(String),
    #[error("Session expired, please log in again")]
    Expired,
    #[error("Not logged in")]
    NotAuthenticated,
    #[error("Session changed while the request was in flight")]
    SessionChanged,
}

/// Input rejected before any request is issued
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No agent selected")]
    EmptyAgent,
    #[error("Prompt is empty")]
    EmptyPrompt,
    #[error("A task is already awaiting its result")]
    TaskInFlight,
}

/// Client error type
#[derive(Debug, Clone, Error)]
pub enum AionError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Task failed: {0}")]
    BackendTerminal(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Cancelled")]
    Cancelled,
}

impl AionError {
    /// True for 401-style failures that invalidate the current session
    pub fn is_auth(&self) -> bool {
        matches!(self, AionError::Auth(_))
    }
}

impl From<reqwest::Error> for AionError {
    fn from(err: reqwest::Error) -> Self {
        AionError::Network(err.to_string())
    }
}

impl From<std::io::Error> for AionError {
    fn from(err: std::io::Error) -> Self {
        AionError::Storage(err.to_string())
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, AionError>;
