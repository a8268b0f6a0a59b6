//! MQTT channel: requests arrive on one topic, replies are published to another.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allowlist::Allowlist;
use crate::channel::{Channel, OnMessage};
use crate::config::MqttConfig;
use crate::error::{ChannelError, Result};
use crate::message::{truncate_reply, ChannelKind, IncomingMessage, MAX_REPLY_CHARS};

const DEFAULT_SENDER: &str = "mqtt";
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 16;
const INBOX_CAPACITY: usize = 64;

pub struct MqttChannel {
    broker: String,
    port: u16,
    subscribe_topic: String,
    publish_topic: String,
    allowlist: Allowlist,
    client: Mutex<Option<AsyncClient>>,
    shutdown: CancellationToken,
}

impl MqttChannel {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            broker: config.broker.clone(),
            port: config.port,
            subscribe_topic: config.subscribe_topic.clone(),
            publish_topic: config.publish_topic.clone(),
            allowlist: Allowlist::from_config(config.allowed_senders.clone()),
            client: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    fn client(&self) -> Option<AsyncClient> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_client(&self, client: Option<AsyncClient>) -> Option<AsyncClient> {
        std::mem::replace(
            &mut *self.client.lock().unwrap_or_else(PoisonError::into_inner),
            client,
        )
    }
}

/// Normalize one publish. JSON objects may carry `text` and `sender_id`;
/// anything else is taken as raw text from sender `mqtt`.
fn parse_publish(topic: &str, payload: &[u8]) -> Option<IncomingMessage> {
    let raw = String::from_utf8_lossy(payload);
    let (text, sender_id) = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(fields)) => (
            fields
                .get("text")
                .and_then(Value::as_str)
                .map_or_else(|| raw.to_string(), str::to_string),
            fields
                .get("sender_id")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SENDER)
                .to_string(),
        ),
        _ => (raw.into_owned(), DEFAULT_SENDER.to_string()),
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(IncomingMessage::new(ChannelKind::Mqtt, topic, sender_id, text))
}

/// Reply body published for a request received on `topic`.
fn reply_payload(topic: &str, text: &str) -> Vec<u8> {
    json!({ "text": truncate_reply(text, MAX_REPLY_CHARS), "topic": topic })
        .to_string()
        .into_bytes()
}

fn mqtt_error(err: impl std::fmt::Display) -> ChannelError {
    ChannelError::Mqtt(err.to_string())
}

#[async_trait]
impl Channel for MqttChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Mqtt
    }

    async fn start(&self, on_message: OnMessage) -> Result<()> {
        let client_id = format!("agentwire-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, self.broker.as_str(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        self.set_client(Some(client.clone()));
        self.allowlist.log_policy(ChannelKind::Mqtt);
        info!(
            broker = %self.broker,
            port = self.port,
            topic = %self.subscribe_topic,
            "mqtt channel started"
        );

        // Handlers run on a worker so the event loop keeps being polled,
        // which is what carries their replies out.
        let (inbox, mut queue) = mpsc::channel::<IncomingMessage>(INBOX_CAPACITY);
        let worker = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                on_message(message).await;
            }
        });

        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = %self.broker, "mqtt connected");
                    if let Err(err) =
                        client.try_subscribe(self.subscribe_topic.as_str(), QoS::AtLeastOnce)
                    {
                        warn!(error = %err, topic = %self.subscribe_topic, "mqtt subscribe failed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(message) = parse_publish(&publish.topic, &publish.payload) else {
                        debug!(topic = %publish.topic, "skipping empty mqtt message");
                        continue;
                    };
                    if !self.allowlist.check(ChannelKind::Mqtt, &message.sender_id) {
                        continue;
                    }
                    if inbox.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, retry_in = ?RECONNECT_DELAY, "mqtt connection error");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        worker.abort();
        if let Some(client) = self.set_client(None) {
            let _ = client.try_disconnect();
        }
        info!("mqtt channel stopped");
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let client = self
            .client()
            .ok_or_else(|| ChannelError::NotConnected(ChannelKind::Mqtt.to_string()))?;
        client
            .publish(
                self.publish_topic.as_str(),
                QoS::AtLeastOnce,
                false,
                reply_payload(channel_id, text),
            )
            .await
            .map_err(mqtt_error)
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
