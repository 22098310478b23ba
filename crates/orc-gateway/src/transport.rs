//! WebSocket transport for module connections (§6 "Transport port").
//!
//! Flow:
//! 1. Module connects to `GET /v1/modules/ws?hash=<module_hash>`.
//! 2. `SessionHub::accept` binds the session or rejects the connection.
//! 3. Bidirectional message loop: every inbound frame goes through
//!    `SessionHub::on_message`; outbound sends arrive via [`AxumWsChannel`],
//!    fire-and-forget per the `ModuleChannel` contract.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use orc_registry::{ModuleChannel, SessionHandle};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub hash: Option<String>,
}

enum WsCommand {
    Send(String),
    Close,
}

/// Sync `ModuleChannel` facade over an async websocket sink. Sends and
/// closes are queued onto an unbounded channel the writer task drains —
/// `send_text`/`close` never block the caller (the hub calls them while
/// holding its group-membership lock).
struct AxumWsChannel {
    tx: mpsc::UnboundedSender<WsCommand>,
}

impl ModuleChannel for AxumWsChannel {
    fn send_text(&self, payload: String) {
        let _ = self.tx.send(WsCommand::Send(payload));
    }

    fn close(&self) {
        let _ = self.tx.send(WsCommand::Close);
    }
}

/// GET /v1/modules/ws?hash=<module_hash>
pub async fn module_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let hash_hint = query.hash.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state, hash_hint))
}

async fn handle_socket(socket: WebSocket, state: AppState, hash_hint: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let query = format!("hash={hash_hint}");
    let (tx, mut rx) = mpsc::unbounded_channel::<WsCommand>();
    let reply_tx = tx.clone();
    let channel: Arc<dyn ModuleChannel> = Arc::new(AxumWsChannel { tx });

    let handle: SessionHandle = match state.hub.accept(&query, channel, state.clock.now_local()) {
        Ok(handle) => handle,
        Err(reason) => {
            tracing::warn!(?reason, hash = %hash_hint, "module connection rejected");
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
    };

    tracing::info!(module_id = handle.module_id, "module connected");

    let writer = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WsCommand::Send(payload) => {
                    if ws_sink.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                WsCommand::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let now = state.clock.now_local();
                if let Ok(reply) = state.hub.on_message(&handle, &text, now).await {
                    // The reply is delivered directly to the originating
                    // socket, not fanned out through the hub's group.
                    let _ = reply_tx.send(WsCommand::Send(reply));
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                state.hub.on_message(&handle, "ping", state.clock.now_local()).await.ok();
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.hub.on_disconnect(&handle);
    tracing::info!(module_id = handle.module_id, "module disconnected");
}
