//! Socket.IO text frame codec
//!
//! The task update channel speaks Socket.IO v5 on top of Engine.IO v4 over a
//! plain WebSocket. Only the text packets a listening client needs are
//! handled; binary attachments are not used by the platform.
//!
//! ```text
//! 0{"sid":..,"pingInterval":..}  engine open      -> reply "40"
//! 2                              engine ping      -> reply "3"
//! 40{"sid":..}                   namespace connected
//! 42["task_update_<id>",{..}]    event
//! 41 / 1                         disconnect / close
//! 44{"message":..}               namespace connect error
//! ```

use crate::error::{AionError, Result};
use serde::Deserialize;

/// Reply to the engine open packet: connect to the default namespace
pub const CONNECT: &str = "40";
/// Reply to an engine ping
pub const PONG: &str = "3";

/// Engine.IO handshake parameters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// Decoded text packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Connected,
    Disconnected,
    ConnectError(String),
    Event {
        name: String,
        payload: serde_json::Value,
    },
    /// Valid but irrelevant to a listening client
    Ignored,
}

/// Decode one WebSocket text frame
pub fn decode(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let engine = chars
        .next()
        .ok_or_else(|| AionError::Protocol("empty frame".to_string()))?;
    let rest = chars.as_str();

    match engine {
        '0' => {
            let info: OpenInfo = serde_json::from_str(rest)
                .map_err(|e| AionError::Protocol(format!("bad open packet: {}", e)))?;
            Ok(Packet::Open(info))
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(rest),
        '5' | '6' => Ok(Packet::Ignored),
        other => Err(AionError::Protocol(format!(
            "unknown engine packet type '{}'",
            other
        ))),
    }
}

fn decode_socket(body: &str) -> Result<Packet> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| AionError::Protocol("empty socket packet".to_string()))?;
    let rest = strip_namespace(chars.as_str());

    match kind {
        '0' => Ok(Packet::Connected),
        '1' => Ok(Packet::Disconnected),
        '2' => decode_event(rest),
        '3' => Ok(Packet::Ignored),
        '4' => {
            let message = serde_json::from_str::<serde_json::Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| rest.to_string());
            Ok(Packet::ConnectError(message))
        }
        '5' | '6' => Ok(Packet::Ignored),
        other => Err(AionError::Protocol(format!(
            "unknown socket packet type '{}'",
            other
        ))),
    }
}

/// Skip an optional `/namespace,` prefix
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn decode_event(body: &str) -> Result<Packet> {
    // Optional numeric ack id precedes the JSON array
    let json = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut items: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| AionError::Protocol(format!("bad event packet: {}", e)))?;

    if items.is_empty() {
        return Err(AionError::Protocol("event without a name".to_string()));
    }
    let name = match items.remove(0) {
        serde_json::Value::String(name) => name,
        other => {
            return Err(AionError::Protocol(format!(
                "event name is not a string: {}",
                other
            )))
        }
    };
    let payload = if items.is_empty() {
        serde_json::Value::Null
    } else {
        items.remove(0)
    };

    Ok(Packet::Event { name, payload })
}

/// Encode an event frame (used by tests and local tooling)
pub fn encode_event(name: &str, payload: &serde_json::Value) -> String {
    format!("42{}", serde_json::json!([name, payload]))
}
