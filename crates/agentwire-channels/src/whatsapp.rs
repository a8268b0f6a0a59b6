//! WhatsApp Business Cloud API channel.
//!
//! Meta delivers messages to a webhook: `GET /` answers the subscription
//! handshake, `POST /` carries message notifications and is acknowledged
//! immediately. Replies go out through the Graph API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allowlist::Allowlist;
use crate::channel::{drain_in_order, Channel, OnMessage};
use crate::config::WhatsappConfig;
use crate::error::{ChannelError, Result};
use crate::message::{truncate_reply, ChannelKind, IncomingMessage, MAX_REPLY_CHARS};

pub const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

pub struct WhatsappChannel {
    client: reqwest::Client,
    messages_url: String,
    access_token: String,
    verify_token: String,
    addr: String,
    allowlist: Allowlist,
    shutdown: CancellationToken,
}

#[derive(Clone)]
struct WebhookState {
    queue: mpsc::UnboundedSender<IncomingMessage>,
    verify_token: Arc<str>,
    allowlist: Arc<Allowlist>,
}

impl WhatsappChannel {
    pub fn new(config: &WhatsappConfig, phone_number_id: &str, access_token: &str) -> Self {
        Self::with_base_url(GRAPH_API_BASE, config, phone_number_id, access_token)
    }

    /// Send through a Graph API server other than graph.facebook.com.
    pub fn with_base_url(
        base_url: &str,
        config: &WhatsappConfig,
        phone_number_id: &str,
        access_token: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            messages_url: format!(
                "{}/{phone_number_id}/messages",
                base_url.trim_end_matches('/')
            ),
            access_token: access_token.to_string(),
            verify_token: config.verify_token.clone(),
            addr: format!("{}:{}", config.host, config.port),
            allowlist: Allowlist::from_config(config.allowed_senders.clone()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Webhook routes; admitted messages are pushed onto `queue`.
    pub fn app(&self, queue: mpsc::UnboundedSender<IncomingMessage>) -> Router {
        let state = WebhookState {
            queue,
            verify_token: Arc::from(self.verify_token.as_str()),
            allowlist: Arc::new(self.allowlist.clone()),
        };
        Router::new()
            .route("/", get(verify).post(receive))
            .with_state(state)
    }
}

async fn verify(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    if mode == Some("subscribe") && token == Some(state.verify_token.as_ref()) {
        info!("whatsapp webhook verified");
        let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
        return (StatusCode::OK, challenge).into_response();
    }
    warn!("rejected whatsapp webhook verification");
    StatusCode::FORBIDDEN.into_response()
}

async fn receive(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let Ok(data) = serde_json::from_slice::<Value>(&body) else {
        warn!("whatsapp webhook body is not JSON");
        return StatusCode::OK;
    };
    for message in parse_notification(&data) {
        if !state.allowlist.check(ChannelKind::Whatsapp, &message.sender_id) {
            continue;
        }
        if state.queue.send(message).is_err() {
            debug!("whatsapp channel is shutting down; message dropped");
        }
    }
    StatusCode::OK
}

/// Text messages in a webhook notification. Statuses and media are skipped.
fn parse_notification(data: &Value) -> Vec<IncomingMessage> {
    let values = data["entry"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|entry| entry["changes"].as_array().into_iter().flatten())
        .map(|change| &change["value"]);
    values
        .flat_map(|value| value["messages"].as_array().into_iter().flatten())
        .filter(|message| message["type"] == "text")
        .filter_map(|message| {
            let from = message["from"].as_str().filter(|from| !from.is_empty())?;
            let text = message["text"]["body"]
                .as_str()
                .filter(|text| !text.is_empty())?;
            Some(IncomingMessage::new(ChannelKind::Whatsapp, from, from, text))
        })
        .collect()
}

#[async_trait]
impl Channel for WhatsappChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    async fn start(&self, on_message: OnMessage) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ChannelError::Bind {
                addr: self.addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        self.allowlist.log_policy(ChannelKind::Whatsapp);
        info!(addr = %local, "whatsapp webhook listening");

        let (queue, pending) = mpsc::unbounded_channel();
        let shutdown = self.shutdown.clone();
        let serve = axum::serve(listener, self.app(queue))
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        let (served, ()) = tokio::join!(
            async { serve.await },
            drain_in_order(pending, on_message)
        );
        served.map_err(|source| ChannelError::Serve {
            addr: local,
            source,
        })?;
        info!("whatsapp channel stopped");
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": channel_id,
            "type": "text",
            "text": {"body": truncate_reply(text, MAX_REPLY_CHARS)},
        });
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            let message = body["error"]["message"]
                .as_str()
                .map_or_else(|| format!("HTTP {status}"), str::to_string);
            return Err(ChannelError::Api {
                service: ChannelKind::Whatsapp,
                message,
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(allowed: Option<&[&str]>) -> WhatsappConfig {
        WhatsappConfig {
            verify_token: "hush".into(),
            host: "127.0.0.1".into(),
            port: 0,
            allowed_senders: allowed.map(|ids| ids.iter().map(|id| id.to_string()).collect()),
            ..WhatsappConfig::default()
        }
    }

    async fn serve(
        channel: &WhatsappChannel,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<IncomingMessage>) {
        let (queue, pending) = mpsc::unbounded_channel();
        let app = channel.app(queue);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (addr, pending)
    }

    fn text_message(from: &str, body: &str) -> Value {
        json!({"from": from, "id": "wamid.1", "type": "text", "text": {"body": body}})
    }

    #[tokio::test]
    async fn verification_echoes_challenge_only_for_the_right_token() {
        let channel = WhatsappChannel::new(&config(None), "100", "token");
        let (addr, _pending) = serve(&channel).await;
        let client = reqwest::Client::new();

        let ok = client
            .get(format!(
                "http://{addr}/?hub.mode=subscribe&hub.verify_token=hush&hub.challenge=1158201444"
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.text().await.unwrap(), "1158201444");

        let wrong = client
            .get(format!(
                "http://{addr}/?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1"
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 403);
    }

    #[tokio::test]
    async fn allowed_text_messages_are_queued_and_others_acknowledged() {
        let channel = WhatsappChannel::new(&config(Some(&["15550001"])), "100", "token");
        let (addr, mut pending) = serve(&channel).await;

        let notification = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"field": "messages", "value": {
                "messages": [
                    text_message("15559999", "let me in"),
                    {"from": "15550001", "type": "image", "image": {"id": "x"}},
                    text_message("15550001", "status?")
                ]
            }}]}]
        });
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .json(&notification)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let queued = pending.recv().await.unwrap();
        assert_eq!(
            queued,
            IncomingMessage::new(ChannelKind::Whatsapp, "15550001", "15550001", "status?")
        );
        assert!(pending.try_recv().is_err());

        let garbage = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status(), 200);
    }

    #[test]
    fn status_updates_carry_no_messages() {
        let statuses = json!({"entry": [{"changes": [{"value": {"statuses": [{"id": "s"}]}}]}]});
        assert!(parse_notification(&statuses).is_empty());
        assert!(parse_notification(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn long_reply_is_truncated_before_sending() {
        let server = MockServer::start().await;
        let expected = format!("{}...", "x".repeat(4093));
        Mock::given(method("POST"))
            .and(path("/100/messages"))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({
                "messaging_product": "whatsapp",
                "to": "15550001",
                "type": "text",
                "text": {"body": expected}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": []})))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WhatsappChannel::with_base_url(&server.uri(), &config(None), "100", "token");
        channel.send("15550001", &"x".repeat(5000)).await.unwrap();
    }

    #[tokio::test]
    async fn graph_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                json!({"error": {"message": "Invalid OAuth access token", "code": 190}}),
            ))
            .mount(&server)
            .await;

        let channel = WhatsappChannel::with_base_url(&server.uri(), &config(None), "100", "bad");
        let err = channel.send("15550001", "hi").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "whatsapp API error: Invalid OAuth access token"
        );
    }
}
