//! Hot Module Replacement
//!
//! Server half of the update protocol. A file change invalidates the
//! matching graph node (and its importers), then one update descriptor is
//! broadcast to every connected client:
//!
//! ```text
//! {"type":"connected"}
//! {"type":"update","updates":[{"type":"js-update","path":"/src/App.tsx",
//!                              "acceptedPath":"/src/App.tsx","timestamp":1700000000000}]}
//! ```
//!
//! Invalidation always completes before the broadcast leaves, so a client
//! that re-imports right away never sees a stale transform.
//!
//! - [`watcher`]: `notify` feed of file changes
//! - [`client`]: the receiving side, usable headless

pub mod client;
pub mod watcher;

pub use client::{HmrClient, HotContext, HotModuleRegistry, ModuleLoader, StyleRegistry, UpdateQueue};
pub use watcher::{FileChange, FileChangeKind, FileWatcher};

use crate::config::HMR_PROTOCOL;
use crate::error::Result;
use crate::server::ServerContext;
use crate::utils::{is_css_request, normalize_path, url_for_id};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Buffered payloads per subscriber before a slow client starts lagging
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    #[serde(rename = "js-update")]
    Js,
    #[serde(rename = "css-update")]
    Css,
}

/// One module the client should re-import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub path: String,
    pub accepted_path: String,
    pub timestamp: u64,
}

/// Server to client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HmrPayload {
    Connected,
    Update { updates: Vec<Update> },
}

impl HmrPayload {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Fan-out of serialized payloads to every connected socket
#[derive(Debug, Clone)]
pub struct HmrBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for HmrBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl HmrBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Send to all subscribers; returns how many received it
    pub fn send(&self, payload: &HmrPayload) -> Result<usize> {
        let json = payload.to_json()?;
        // no subscribers is not a failure
        Ok(self.tx.send(json).unwrap_or(0))
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Invalidate the module for `file` and broadcast its update.
///
/// Files the graph has never seen produce no update.
pub fn handle_file_change(server: &ServerContext, file: &str) -> Result<Option<HmrPayload>> {
    let id = normalize_path(file);
    let Some(invalidation) = server.graph.invalidate_module(&id) else {
        debug!(file = %id, "change outside module graph");
        return Ok(None);
    };

    let path = url_for_id(&id, &server.root);
    let kind = if is_css_request(&id) {
        UpdateKind::Css
    } else {
        UpdateKind::Js
    };
    let payload = HmrPayload::Update {
        updates: vec![Update {
            kind,
            accepted_path: path.clone(),
            path: path.clone(),
            timestamp: invalidation.timestamp,
        }],
    };
    let receivers = server.hmr.send(&payload)?;
    info!(path = %path, invalidated = invalidation.modules.len(), receivers, "hmr update");
    Ok(Some(payload))
}

/// Router for the update channel
pub fn router(server: Arc<ServerContext>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(server)
}

async fn ws_handler(ws: WebSocketUpgrade, State(server): State<Arc<ServerContext>>) -> impl IntoResponse {
    ws.protocols([HMR_PROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, server))
}

async fn handle_socket(mut socket: WebSocket, server: Arc<ServerContext>) {
    let mut updates = server.hmr.subscribe();
    let connected = match HmrPayload::Connected.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "cannot encode handshake");
            return;
        }
    };
    if socket.send(Message::Text(connected)).await.is_err() {
        return;
    }
    debug!(clients = server.hmr.client_count(), "hmr client connected");

    let period = Duration::from_millis(server.config.heartbeat_interval_ms.max(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(json) => {
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "hmr client lagging, updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // keepalive from the client
                Some(Ok(Message::Text(text))) if text == "ping" => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "hmr socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("hmr client disconnected");
}
