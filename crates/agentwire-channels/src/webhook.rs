//! HTTP webhook channel.
//!
//! `POST /` with `{"text": "...", "sender_id": "..."}` answers inline with
//! `{"text": "<reply>"}`. `GET /` is a health check.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::allowlist::Allowlist;
use crate::channel::{Channel, OnMessage};
use crate::config::WebhookConfig;
use crate::error::{ChannelError, Result};
use crate::message::{ChannelKind, IncomingMessage};

const DEFAULT_SENDER: &str = "webhook";

pub struct WebhookChannel {
    addr: String,
    auth_token: Option<String>,
    allowlist: Allowlist,
    shutdown: CancellationToken,
}

#[derive(Clone)]
struct WebhookState {
    on_message: OnMessage,
    expected_auth: Option<Arc<str>>,
    allowlist: Arc<Allowlist>,
}

impl WebhookChannel {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            auth_token: config.auth_token.clone(),
            allowlist: Allowlist::from_config(config.allowed_senders.clone()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Routes served by this channel, without binding a listener.
    pub fn app(&self, on_message: OnMessage) -> Router {
        let state = WebhookState {
            on_message,
            expected_auth: self
                .auth_token
                .as_ref()
                .map(|token| Arc::from(format!("Bearer {token}"))),
            allowlist: Arc::new(self.allowlist.clone()),
        };
        Router::new()
            .route("/", get(health).post(receive))
            .with_state(state)
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "channel": "webhook"}))
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(expected) = &state.expected_auth {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_ref()) {
            warn!("rejected webhook request with bad credentials");
            return json_error(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }

    let Ok(data) = serde_json::from_slice::<Value>(&body) else {
        return json_error(StatusCode::BAD_REQUEST, "invalid JSON");
    };
    let text = data.get("text").and_then(Value::as_str).unwrap_or_default();
    if text.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "missing text field");
    }
    let sender_id = match data.get("sender_id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => DEFAULT_SENDER.to_string(),
    };

    if !state.allowlist.check(ChannelKind::Webhook, &sender_id) {
        return StatusCode::NO_CONTENT.into_response();
    }

    let message = IncomingMessage::new(ChannelKind::Webhook, DEFAULT_SENDER, sender_id, text);
    let reply = (state.on_message)(message).await;
    Json(json!({ "text": reply })).into_response()
}

#[async_trait]
impl Channel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn start(&self, on_message: OnMessage) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ChannelError::Bind {
                addr: self.addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        self.allowlist.log_policy(ChannelKind::Webhook);
        if self.auth_token.is_none() {
            warn!(addr = %local, "webhook has no auth token; requests are not authenticated");
        }
        info!(addr = %local, "webhook channel listening");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.app(on_message))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|source| ChannelError::Serve {
                addr: local,
                source,
            })?;
        info!("webhook channel stopped");
        Ok(())
    }

    /// Replies are written inline on the HTTP response.
    async fn send(&self, _channel_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
