//! Platform HTTP API

pub mod client;
pub mod types;

pub use client::ApiClient;
pub use types::{Agent, TaskPayload, TaskRequest};
