//! WebSocket channel.
//!
//! Clients send `{"type":"message","text":"..."}` (or `{"type":"ping"}`) and
//! receive the reply as one `text` frame per non-empty line followed by a
//! `done` frame. When an auth token is configured the client presents it as
//! `?token=` or in a first `{"type":"auth","token":"..."}` frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allowlist::Allowlist;
use crate::channel::{Channel, OnMessage};
use crate::config::WebsocketConfig;
use crate::error::{ChannelError, Result};
use crate::message::{ChannelKind, IncomingMessage};

/// How long an unauthenticated client has to send its auth frame.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest text carried by one outbound frame, in bytes.
pub const MAX_FRAME_TEXT: usize = 64 * 1024;

pub struct WebsocketChannel {
    addr: String,
    auth_token: Option<String>,
    allowlist: Allowlist,
    shutdown: CancellationToken,
}

#[derive(Clone)]
struct WsState {
    on_message: OnMessage,
    auth_token: Option<Arc<str>>,
    allowlist: Arc<Allowlist>,
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

impl WebsocketChannel {
    pub fn new(config: &WebsocketConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            auth_token: config.auth_token.clone(),
            allowlist: Allowlist::from_config(config.allowed_senders.clone()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Routes served by this channel. Serve with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn app(&self, on_message: OnMessage) -> Router {
        let state = WsState {
            on_message,
            auth_token: self.auth_token.as_deref().map(Arc::from),
            allowlist: Arc::new(self.allowlist.clone()),
        };
        Router::new().route("/", get(upgrade)).with_state(state)
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
) -> Response {
    let authorized = match &state.auth_token {
        None => true,
        Some(token) => query.token.as_deref() == Some(token.as_ref()),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer, authorized))
}

async fn send_json(socket: &mut WebSocket, frame: &Value) -> bool {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: WsState, peer: SocketAddr, authorized: bool) {
    if !authorized {
        let token = state.auth_token.as_deref().unwrap_or_default();
        match tokio::time::timeout(AUTH_TIMEOUT, socket.recv()).await {
            Ok(Some(Ok(Message::Text(raw)))) if is_auth_frame(raw.as_str(), token) => {
                if !send_json(&mut socket, &json!({"type": "auth_ok"})).await {
                    return;
                }
            }
            Ok(Some(Ok(_))) => {
                warn!(peer = %peer, "websocket client failed authentication");
                send_json(&mut socket, &error_frame("unauthorized")).await;
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            _ => {
                warn!(peer = %peer, "websocket client did not authenticate");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    }

    info!(peer = %peer, "websocket client connected");
    let connection = peer.to_string();
    'frames: while let Some(frame) = socket.recv().await {
        let raw = match frame {
            Ok(Message::Text(raw)) => raw,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(peer = %peer, error = %err, "websocket read failed");
                break;
            }
        };
        for out in respond(&state, &connection, raw.as_str()).await {
            if !send_json(&mut socket, &out).await {
                break 'frames;
            }
        }
    }
    info!(peer = %peer, "websocket client disconnected");
}

fn is_auth_frame(raw: &str, token: &str) -> bool {
    serde_json::from_str::<Value>(raw).is_ok_and(|data| {
        data["type"] == "auth" && data["token"].as_str() == Some(token)
    })
}

fn error_frame(text: &str) -> Value {
    json!({"type": "error", "text": text})
}

/// Frames to send back for one inbound text frame.
async fn respond(state: &WsState, connection: &str, raw: &str) -> Vec<Value> {
    let Ok(data) = serde_json::from_str::<Value>(raw) else {
        return vec![error_frame("invalid JSON")];
    };
    if data["type"] == "ping" {
        return vec![json!({"type": "pong"})];
    }
    let text = data["text"].as_str().unwrap_or_default();
    if text.is_empty() {
        return vec![error_frame("missing text")];
    }
    let sender_id = data["sender_id"]
        .as_str()
        .map_or_else(|| connection.to_string(), str::to_string);
    if !state.allowlist.check(ChannelKind::Websocket, &sender_id) {
        return Vec::new();
    }

    let message = IncomingMessage::new(ChannelKind::Websocket, connection, sender_id, text);
    let reply = (state.on_message)(message).await;
    reply
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| json!({"type": "text", "text": cap_frame_text(line)}))
        .chain(std::iter::once(json!({"type": "done"})))
        .collect()
}

fn cap_frame_text(line: &str) -> String {
    if line.len() <= MAX_FRAME_TEXT {
        return line.to_string();
    }
    let mut end = MAX_FRAME_TEXT - 3;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

#[async_trait]
impl Channel for WebsocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Websocket
    }

    async fn start(&self, on_message: OnMessage) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ChannelError::Bind {
                addr: self.addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        self.allowlist.log_policy(ChannelKind::Websocket);
        if self.auth_token.is_none() {
            warn!(addr = %local, "websocket has no auth token; clients are not authenticated");
        }
        info!(addr = %local, "websocket channel listening");

        let shutdown = self.shutdown.clone();
        let app = self
            .app(on_message)
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|source| ChannelError::Serve {
                addr: local,
                source,
            })?;
        info!("websocket channel stopped");
        Ok(())
    }

    /// Replies are streamed inline on the client's connection.
    async fn send(&self, _channel_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
