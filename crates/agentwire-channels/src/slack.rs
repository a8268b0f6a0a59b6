//! Slack channel over Socket Mode.
//!
//! An app-level token opens a websocket (`apps.connections.open`); Slack
//! pushes event envelopes down it and each one is acknowledged right away.
//! The bot answers `app_mention` events and direct messages. Replies go out
//! through `chat.postMessage` with the bot token.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allowlist::Allowlist;
use crate::channel::{drain_in_order, Channel, OnMessage};
use crate::config::SlackConfig;
use crate::error::{ChannelError, Result};
use crate::message::{truncate_reply, ChannelKind, IncomingMessage, MAX_REPLY_CHARS};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// How one Socket Mode connection ended.
enum Disconnect {
    Shutdown,
    Reconnect,
}

pub struct SlackChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: String,
    allowed_channels: Allowlist,
    allowlist: Allowlist,
    retry_delay: Duration,
    shutdown: CancellationToken,
}

impl SlackChannel {
    pub fn new(config: &SlackConfig, bot_token: &str, app_token: &str) -> Self {
        Self::with_base_url(SLACK_API_BASE, config, bot_token, app_token)
    }

    /// Talk to a Web API server other than slack.com.
    pub fn with_base_url(
        base_url: &str,
        config: &SlackConfig,
        bot_token: &str,
        app_token: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            app_token: app_token.to_string(),
            allowed_channels: Allowlist::scope(config.allowed_channels.clone()),
            allowlist: Allowlist::from_config(config.allowed_senders.clone()),
            retry_delay: RETRY_DELAY,
            shutdown: CancellationToken::new(),
        }
    }

    /// Back-off before reopening a dropped socket (default 5s).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// POST a Web API method; Slack reports failures as `{"ok": false}`.
    async fn call(&self, method: &str, token: &str, payload: &Value) -> Result<Value> {
        let body: Value = self
            .client
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;
        if body["ok"].as_bool() != Some(true) {
            let error = body["error"].as_str().unwrap_or("unknown_error");
            return Err(ChannelError::Api {
                service: ChannelKind::Slack,
                message: format!("{method}: {error}"),
            });
        }
        Ok(body)
    }

    /// Keep one socket open at a time until shutdown, queueing admitted messages.
    async fn run_sockets(&self, queue: mpsc::UnboundedSender<IncomingMessage>) {
        loop {
            let opened = self
                .call("apps.connections.open", &self.app_token, &json!({}))
                .await;
            let outcome = match opened {
                Ok(body) => match body["url"].as_str() {
                    Some(url) => self.run_socket(url, &queue).await,
                    None => Err(gateway_error("apps.connections.open returned no url")),
                },
                Err(err) => Err(err),
            };
            match outcome {
                Ok(Disconnect::Shutdown) => return,
                Ok(Disconnect::Reconnect) => debug!("slack asked for a new socket"),
                Err(err) => {
                    warn!(error = %err, retry_in = ?self.retry_delay, "slack socket failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }

    async fn run_socket(
        &self,
        url: &str,
        queue: &mpsc::UnboundedSender<IncomingMessage>,
    ) -> Result<Disconnect> {
        let (mut socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| gateway_error(format!("connect failed: {err}")))?;
        debug!("slack socket connected");

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = socket.close(None).await;
                    return Ok(Disconnect::Shutdown);
                }
                frame = socket.next() => frame,
            };
            let raw = match frame {
                Some(Ok(Message::Text(raw))) => raw,
                Some(Ok(Message::Close(_))) | None => return Ok(Disconnect::Reconnect),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(gateway_error(err.to_string())),
            };
            let Ok(envelope) = serde_json::from_str::<Value>(raw.as_str()) else {
                warn!("slack sent a non-JSON frame");
                continue;
            };

            if let Some(envelope_id) = envelope["envelope_id"].as_str() {
                let ack = json!({ "envelope_id": envelope_id }).to_string();
                socket
                    .send(Message::text(ack))
                    .await
                    .map_err(|err| gateway_error(format!("ack failed: {err}")))?;
            }

            match envelope["type"].as_str() {
                Some("hello") => info!("slack socket mode connected"),
                Some("disconnect") => return Ok(Disconnect::Reconnect),
                Some("events_api") => {
                    let Some(message) = parse_event(&envelope["payload"]["event"]) else {
                        continue;
                    };
                    if !self.allowed_channels.admits(&message.channel_id) {
                        debug!(channel_id = %message.channel_id, "ignoring slack channel");
                        continue;
                    }
                    if !self.allowlist.check(ChannelKind::Slack, &message.sender_id) {
                        continue;
                    }
                    if queue.send(message).is_err() {
                        return Ok(Disconnect::Shutdown);
                    }
                }
                other => debug!(kind = ?other, "ignoring slack envelope"),
            }
        }
    }
}

fn gateway_error(message: impl Into<String>) -> ChannelError {
    ChannelError::Gateway {
        service: ChannelKind::Slack,
        message: message.into(),
    }
}

/// Normalize a Socket Mode event: mentions anywhere, and plain direct messages.
fn parse_event(event: &Value) -> Option<IncomingMessage> {
    let addressed = match event["type"].as_str()? {
        "app_mention" => true,
        "message" => {
            event["channel_type"] == "im"
                && event.get("subtype").is_none()
                && event.get("bot_id").is_none()
        }
        _ => false,
    };
    if !addressed {
        return None;
    }
    let text = strip_mentions(event["text"].as_str()?);
    if text.is_empty() {
        return None;
    }
    let channel = event["channel"].as_str()?;
    let user = event["user"].as_str().unwrap_or("unknown");
    Some(IncomingMessage::new(ChannelKind::Slack, channel, user, text))
}

/// Drop `<@U123>` user mentions and the whitespace after them.
fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('>') else { break };
        let id = &after[..end];
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            out.push_str(&rest[..start + 2]);
            rest = after;
            continue;
        }
        out.push_str(&rest[..start]);
        rest = after[end + 1..].trim_start();
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[async_trait]
impl Channel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn start(&self, on_message: OnMessage) -> Result<()> {
        let me = self
            .call("auth.test", &self.bot_token, &json!({}))
            .await
            .map_err(|err| ChannelError::Api {
                service: ChannelKind::Slack,
                message: format!("invalid bot token ({err})"),
            })?;
        info!(
            team = me["team"].as_str().unwrap_or("?"),
            bot_user = me["user_id"].as_str().unwrap_or("?"),
            "slack bot started"
        );
        self.allowlist.log_policy(ChannelKind::Slack);

        let (queue, pending) = mpsc::unbounded_channel();
        tokio::join!(self.run_sockets(queue), drain_in_order(pending, on_message));
        info!("slack channel stopped");
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let payload = json!({
            "channel": channel_id,
            "text": truncate_reply(text, MAX_REPLY_CHARS),
        });
        self.call("chat.postMessage", &self.bot_token, &payload)
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
