//! Shared helpers for integration tests
//!
//! An in-process Socket.IO endpoint good enough for a listening client:
//! Engine.IO open, namespace connect, then whatever events the test emits.

#![allow(dead_code)]

use aion::{Client, ClientConfig, MemoryCredentialStore};
use futures::{SinkExt, StreamExt};
use httpmock::prelude::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// PUSH SERVER
// ============================================================================

pub struct PushServer {
    pub url: String,
    events: broadcast::Sender<(String, Value)>,
    connections: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    authorization: Arc<Mutex<Option<String>>>,
}

impl PushServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let authorization = Arc::new(Mutex::new(None));

        let server = Self {
            url: format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr),
            events: events.clone(),
            connections: connections.clone(),
            open: open.clone(),
            authorization: authorization.clone(),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let events = events.subscribe();
                let connections = connections.clone();
                let open = open.clone();
                let authorization = authorization.clone();

                tokio::spawn(async move {
                    let capture = authorization.clone();
                    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        *capture.lock() = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        Ok(resp)
                    };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    open.fetch_add(1, Ordering::SeqCst);
                    serve(ws, events).await;
                    open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        server
    }

    pub fn emit(&self, name: &str, payload: Value) {
        let _ = self.events.send((name.to_string(), payload));
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.authorization.lock().clone()
    }
}

async fn serve(
    mut ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut events: broadcast::Receiver<(String, Value)>,
) {
    let open = r#"0{"sid":"test-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
    if ws.send(Message::Text(open.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) if text == "40" => {
                    if ws.send(Message::Text(r#"40{"sid":"ns-sid"}"#.to_string())).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Ok((name, payload)) => {
                    let frame = format!("42{}", json!([name, payload]));
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

// ============================================================================
// BACKEND MOCKS
// ============================================================================

/// `/token` and `/users/me` for a user `admin` holding token `jwt-test`
pub async fn mock_auth(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(json!({"access_token": "jwt-test", "token_type": "bearer"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/users/me")
                .header("authorization", "Bearer jwt-test");
            then.status(200)
                .json_body(json!({"username": "admin", "role": "admin"}));
        })
        .await;
}

pub fn config(server: &MockServer, push: Option<&PushServer>) -> ClientConfig {
    ClientConfig {
        api_url: server.base_url(),
        push_url: push.map(|p| p.url.clone()),
        push_enabled: push.is_some(),
        poll_interval_ms: 1000,
        request_timeout_secs: 5,
        ..Default::default()
    }
}

/// Client logged in against `server`, credential kept in memory
pub async fn logged_in_client(config: ClientConfig) -> Client {
    let client = Client::with_store(config, Arc::new(MemoryCredentialStore::new())).unwrap();
    client.sessions.login("admin", "admin").await.unwrap();
    client
}
