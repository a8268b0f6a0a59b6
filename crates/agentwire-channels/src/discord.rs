//! Discord bot channel over the Gateway websocket.
//!
//! The bot identifies with guild and direct-message intents, heartbeats on
//! the interval Discord asks for, and answers direct messages and messages
//! that mention it. Replies are posted through the REST API, split into
//! 2000-character messages.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allowlist::Allowlist;
use crate::channel::{drain_in_order, Channel, OnMessage};
use crate::config::DiscordConfig;
use crate::error::{ChannelError, Result};
use crate::message::{ChannelKind, IncomingMessage};

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Longest message Discord accepts.
pub const DISCORD_MESSAGE_CHARS: usize = 2000;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

const RETRY_DELAY: Duration = Duration::from_secs(5);
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

mod op {
    pub const DISPATCH: u64 = 0;
    pub const HEARTBEAT: u64 = 1;
    pub const IDENTIFY: u64 = 2;
    pub const RECONNECT: u64 = 7;
    pub const INVALID_SESSION: u64 = 9;
    pub const HELLO: u64 = 10;
}

enum Disconnect {
    Shutdown,
    Reconnect,
}

/// Which messages the bot answers.
struct Filter {
    guilds: Allowlist,
    channels: Allowlist,
    senders: Allowlist,
}

pub struct DiscordChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
    filter: Filter,
    retry_delay: Duration,
    shutdown: CancellationToken,
}

impl DiscordChannel {
    pub fn new(config: &DiscordConfig, token: &str) -> Self {
        Self::with_base_url(DISCORD_API_BASE, config, token)
    }

    /// Talk to a REST API server other than discord.com.
    pub fn with_base_url(base_url: &str, config: &DiscordConfig, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            filter: Filter {
                guilds: Allowlist::scope(config.allowed_guilds.clone()),
                channels: Allowlist::scope(config.allowed_channels.clone()),
                senders: Allowlist::from_config(config.allowed_senders.clone()),
            },
            retry_delay: RETRY_DELAY,
            shutdown: CancellationToken::new(),
        }
    }

    /// Back-off before reconnecting to the gateway (default 5s).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn rest(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            let message = body["message"]
                .as_str()
                .map_or_else(|| format!("HTTP {status}"), str::to_string);
            return Err(ChannelError::Api {
                service: ChannelKind::Discord,
                message: format!("{what}: {message}"),
            });
        }
        Ok(body)
    }

    async fn gateway_url(&self) -> Result<String> {
        let body = self
            .rest(
                self.client.get(format!("{}/gateway/bot", self.api_base)),
                "gateway/bot",
            )
            .await?;
        body["url"]
            .as_str()
            .map(|url| format!("{}/?v=10&encoding=json", url.trim_end_matches('/')))
            .ok_or_else(|| gateway_error("gateway/bot returned no url"))
    }

    async fn run_gateway(&self, url: &str, queue: mpsc::UnboundedSender<IncomingMessage>) {
        loop {
            match self.run_session(url, &queue).await {
                Ok(Disconnect::Shutdown) => return,
                Ok(Disconnect::Reconnect) => debug!("discord asked for a new session"),
                Err(err) => warn!(error = %err, retry_in = ?self.retry_delay, "discord gateway failed"),
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    async fn run_session(
        &self,
        url: &str,
        queue: &mpsc::UnboundedSender<IncomingMessage>,
    ) -> Result<Disconnect> {
        let (mut socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| gateway_error(format!("connect failed: {err}")))?;

        let hello = tokio::time::timeout(HELLO_TIMEOUT, next_payload(&mut socket))
            .await
            .map_err(|_| gateway_error("no hello from gateway"))??;
        if hello["op"].as_u64() != Some(op::HELLO) {
            return Err(gateway_error(format!("expected hello, got op {}", hello["op"])));
        }
        let period = hello["d"]["heartbeat_interval"]
            .as_u64()
            .map(Duration::from_millis)
            .ok_or_else(|| gateway_error("hello without heartbeat_interval"))?;

        let identify = json!({
            "op": op::IDENTIFY,
            "d": {
                "token": self.token,
                "intents": INTENTS,
                "properties": {"os": std::env::consts::OS, "browser": "agentwire", "device": "agentwire"}
            }
        });
        send_payload(&mut socket, &identify).await?;

        let mut heartbeat = interval_at(Instant::now() + period, period);
        let mut sequence = Value::Null;
        let mut bot_id: Option<String> = None;

        loop {
            let payload = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = socket.close(None).await;
                    return Ok(Disconnect::Shutdown);
                }
                _ = heartbeat.tick() => {
                    send_payload(&mut socket, &json!({"op": op::HEARTBEAT, "d": sequence})).await?;
                    continue;
                }
                payload = next_payload(&mut socket) => payload?,
            };

            if !payload["s"].is_null() {
                sequence = payload["s"].clone();
            }
            match payload["op"].as_u64() {
                Some(op::DISPATCH) => match payload["t"].as_str() {
                    Some("READY") => {
                        let user = &payload["d"]["user"];
                        info!(
                            username = user["username"].as_str().unwrap_or("?"),
                            bot_id = user["id"].as_str().unwrap_or("?"),
                            "discord bot connected"
                        );
                        bot_id = user["id"].as_str().map(str::to_string);
                    }
                    Some("MESSAGE_CREATE") => {
                        let Some(message) =
                            parse_message(&payload["d"], bot_id.as_deref(), &self.filter)
                        else {
                            continue;
                        };
                        if queue.send(message).is_err() {
                            return Ok(Disconnect::Shutdown);
                        }
                    }
                    _ => {}
                },
                Some(op::HEARTBEAT) => {
                    send_payload(&mut socket, &json!({"op": op::HEARTBEAT, "d": sequence})).await?;
                }
                Some(op::RECONNECT) | Some(op::INVALID_SESSION) => {
                    let _ = socket.close(None).await;
                    return Ok(Disconnect::Reconnect);
                }
                _ => {}
            }
        }
    }
}

type GatewaySocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Next JSON payload from the gateway, skipping control frames.
async fn next_payload(socket: &mut GatewaySocket) -> Result<Value> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(raw))) => {
                return serde_json::from_str(raw.as_str())
                    .map_err(|err| gateway_error(format!("bad payload: {err}")));
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map_or_else(String::new, |f| {
                    format!(" ({} {})", u16::from(f.code), f.reason.as_str())
                });
                return Err(gateway_error(format!("gateway closed the socket{reason}")));
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(gateway_error(err.to_string())),
            None => return Err(gateway_error("gateway socket ended")),
        }
    }
}

async fn send_payload(socket: &mut GatewaySocket, payload: &Value) -> Result<()> {
    socket
        .send(Message::text(payload.to_string()))
        .await
        .map_err(|err| gateway_error(format!("send failed: {err}")))
}

fn gateway_error(message: impl Into<String>) -> ChannelError {
    ChannelError::Gateway {
        service: ChannelKind::Discord,
        message: message.into(),
    }
}

/// Normalize a `MESSAGE_CREATE` the bot should answer.
///
/// Skips bots (itself included), places outside the guild and channel
/// scopes, and guild messages that do not mention the bot.
fn parse_message(data: &Value, bot_id: Option<&str>, filter: &Filter) -> Option<IncomingMessage> {
    let author = &data["author"];
    let author_id = author["id"].as_str()?;
    if author["bot"].as_bool() == Some(true) || Some(author_id) == bot_id {
        return None;
    }
    let channel_id = data["channel_id"].as_str()?;
    let guild_id = data["guild_id"].as_str();
    if let Some(guild) = guild_id {
        if !filter.guilds.admits(guild) {
            return None;
        }
    }
    if !filter.channels.admits(channel_id) {
        return None;
    }

    let mut text = data["content"].as_str().unwrap_or_default().to_string();
    if guild_id.is_some() {
        let bot_id = bot_id?;
        let mentioned = data["mentions"]
            .as_array()
            .is_some_and(|mentions| mentions.iter().any(|m| m["id"] == bot_id));
        if !mentioned {
            return None;
        }
        text = text
            .replace(&format!("<@{bot_id}>"), "")
            .replace(&format!("<@!{bot_id}>"), "");
    }
    let text = text.trim();
    if text.is_empty() || !filter.senders.check(ChannelKind::Discord, author_id) {
        return None;
    }
    Some(IncomingMessage::new(
        ChannelKind::Discord,
        channel_id,
        author_id,
        text,
    ))
}

/// Split `text` into pieces of at most `max` characters.
fn chunks(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest.char_indices().nth(max).map_or(rest.len(), |(idx, _)| idx);
        let (piece, tail) = rest.split_at(end);
        pieces.push(piece);
        rest = tail;
    }
    pieces
}

#[async_trait]
impl Channel for DiscordChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    async fn start(&self, on_message: OnMessage) -> Result<()> {
        let url = self
            .gateway_url()
            .await
            .map_err(|err| ChannelError::Api {
                service: ChannelKind::Discord,
                message: format!("invalid bot token ({err})"),
            })?;
        self.filter.senders.log_policy(ChannelKind::Discord);
        info!(gateway = %url, "discord channel starting");

        let (queue, pending) = mpsc::unbounded_channel();
        tokio::join!(
            self.run_gateway(&url, queue),
            drain_in_order(pending, on_message)
        );
        info!("discord channel stopped");
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        for piece in chunks(text, DISCORD_MESSAGE_CHARS) {
            self.rest(
                self.client.post(&url).json(&json!({ "content": piece })),
                "create message",
            )
            .await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
