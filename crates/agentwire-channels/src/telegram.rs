//! Telegram Bot API channel over HTTP long-polling.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allowlist::Allowlist;
use crate::channel::{Channel, OnMessage};
use crate::error::{ChannelError, Result};
use crate::message::{truncate_reply, ChannelKind, IncomingMessage, MAX_REPLY_CHARS};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

const RETRY_DELAY: Duration = Duration::from_secs(5);
const CALL_TIMEOUT: Duration = Duration::from_secs(35);
/// Slack on top of the long-poll wait before the HTTP call gives up.
const POLL_SLACK: Duration = Duration::from_secs(5);

pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    poll_timeout: Duration,
    retry_delay: Duration,
    allowlist: Allowlist,
    shutdown: CancellationToken,
}

impl TelegramChannel {
    pub fn new(token: &str, poll_timeout: Duration, allowlist: Allowlist) -> Self {
        Self::with_base_url(TELEGRAM_API_BASE, token, poll_timeout, allowlist)
    }

    /// Talk to a Bot API server other than api.telegram.org.
    pub fn with_base_url(
        base_url: &str,
        token: &str,
        poll_timeout: Duration,
        allowlist: Allowlist,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: format!("{}/bot{token}", base_url.trim_end_matches('/')),
            poll_timeout,
            retry_delay: RETRY_DELAY,
            allowlist,
            shutdown: CancellationToken::new(),
        }
    }

    /// Back-off after a failed poll (default 5s).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn call(&self, method: &str, payload: Option<&Value>, timeout: Duration) -> Result<Value> {
        let url = format!("{}/{method}", self.api_base);
        let request = match payload {
            Some(payload) => self.client.post(url).json(payload),
            None => self.client.get(url),
        };
        let response = request.timeout(timeout).send().await?;
        let status = response.status();
        let mut body: Value = response.json().await?;

        if body["ok"].as_bool() != Some(true) {
            let description = body["description"]
                .as_str()
                .map_or_else(|| format!("HTTP {status}"), str::to_string);
            return Err(ChannelError::Telegram(format!("{method}: {description}")));
        }
        Ok(body["result"].take())
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Value>> {
        let mut params = json!({ "timeout": self.poll_timeout.as_secs() });
        if let Some(offset) = offset {
            params["offset"] = json!(offset);
        }
        let result = self
            .call("getUpdates", Some(&params), self.poll_timeout + POLL_SLACK)
            .await?;
        match result {
            Value::Array(updates) => Ok(updates),
            _ => Ok(Vec::new()),
        }
    }
}

/// Normalize one update. Non-message and non-text updates yield `None`.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text")?.as_str().filter(|text| !text.is_empty())?;
    let chat_id = message.get("chat")?.get("id")?;
    let sender_id = message
        .get("from")
        .and_then(|from| from.get("id"))
        .map_or_else(|| "unknown".to_string(), id_string);
    Some(IncomingMessage::new(
        ChannelKind::Telegram,
        id_string(chat_id),
        sender_id,
        text,
    ))
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn start(&self, on_message: OnMessage) -> Result<()> {
        let me = self
            .call("getMe", None, CALL_TIMEOUT)
            .await
            .map_err(|err| ChannelError::Telegram(format!("invalid bot token ({err})")))?;
        info!(
            username = me["username"].as_str().unwrap_or("?"),
            bot_id = %me["id"],
            "telegram bot started"
        );
        self.allowlist.log_policy(ChannelKind::Telegram);

        let mut offset = None;
        loop {
            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                polled = self.get_updates(offset) => polled,
            };
            let updates = match polled {
                Ok(updates) => updates,
                Err(err) => {
                    warn!(error = %err, retry_in = ?self.retry_delay, "telegram poll failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => continue,
                    }
                }
            };

            for update in updates {
                if let Some(id) = update["update_id"].as_i64() {
                    offset = Some(id + 1);
                }
                let Some(message) = parse_update(&update) else {
                    debug!(update_id = %update["update_id"], "skipping non-text update");
                    continue;
                };
                if !self.allowlist.check(ChannelKind::Telegram, &message.sender_id) {
                    continue;
                }
                on_message(message).await;
            }
        }

        info!("telegram channel stopped");
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let chat_id = channel_id
            .parse::<i64>()
            .map_or_else(|_| json!(channel_id), |id| json!(id));
        let text = truncate_reply(text, MAX_REPLY_CHARS);
        let payload = json!({ "chat_id": chat_id, "text": text });
        self.call("sendMessage", Some(&payload), CALL_TIMEOUT).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
