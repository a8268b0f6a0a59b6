//! Channel configuration file (`channels.json`).
//!
//! Every section and field is optional; anything left out takes the default
//! listed on the field.

use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::{ChannelError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telegram: TelegramConfig,
    pub mqtt: MqttConfig,
    pub webhook: WebhookConfig,
    pub websocket: WebsocketConfig,
    pub discord: DiscordConfig,
    pub slack: SlackConfig,
    pub whatsapp: WhatsappConfig,
}

impl ChannelsConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| ChannelError::Config(err.to_string()))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ChannelError::Config(format!("{}: {err}", path.display()))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token; `TELEGRAM_BOT_TOKEN` takes precedence.
    pub token: Option<String>,
    /// Long-poll wait in seconds (default 30).
    pub poll_timeout_secs: u64,
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_senders: Option<Vec<String>>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            poll_timeout_secs: 30,
            allowed_senders: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub subscribe_topic: String,
    pub publish_topic: String,
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_senders: Option<Vec<String>>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            subscribe_topic: "agentwire/in".to_string(),
            publish_topic: "agentwire/out".to_string(),
            allowed_senders: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
    /// Required as `Authorization: Bearer <token>` when set.
    pub auth_token: Option<String>,
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_senders: Option<Vec<String>>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_token: None,
            allowed_senders: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_senders: Option<Vec<String>>,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            auth_token: None,
            allowed_senders: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token; `DISCORD_BOT_TOKEN` takes precedence.
    pub token: Option<String>,
    /// Guilds the bot answers in. Empty or absent means any guild.
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_guilds: Option<Vec<String>>,
    /// Channels the bot answers in. Empty or absent means any channel.
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_channels: Option<Vec<String>>,
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_senders: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// `xoxb-` token for Web API calls; `SLACK_BOT_TOKEN` takes precedence.
    pub bot_token: Option<String>,
    /// `xapp-` token for Socket Mode; `SLACK_APP_TOKEN` takes precedence.
    pub app_token: Option<String>,
    /// Channels the bot answers in. Empty or absent means any channel.
    pub allowed_channels: Option<Vec<String>>,
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_senders: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WhatsappConfig {
    pub phone_number_id: Option<String>,
    /// Graph API token; `WHATSAPP_ACCESS_TOKEN` takes precedence.
    pub access_token: Option<String>,
    /// Echoed back during Meta's webhook verification handshake.
    pub verify_token: String,
    pub host: String,
    pub port: u16,
    /// Phone numbers (international format, no `+`).
    #[serde(deserialize_with = "sender_ids")]
    pub allowed_senders: Option<Vec<String>>,
}

impl Default for WhatsappConfig {
    fn default() -> Self {
        Self {
            phone_number_id: None,
            access_token: None,
            verify_token: "agentwire".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8081,
            allowed_senders: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SenderId {
    Number(i64),
    Text(String),
}

/// Ids may be written as numbers (Telegram user ids, Discord snowflakes) or strings.
fn sender_ids<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids: Option<Vec<SenderId>> = Option::deserialize(deserializer)?;
    Ok(ids.map(|ids| {
        ids.into_iter()
            .map(|id| match id {
                SenderId::Number(n) => n.to_string(),
                SenderId::Text(s) => s,
            })
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = ChannelsConfig::from_json("{}").unwrap();
        assert_eq!(config, ChannelsConfig::default());
        assert_eq!(config.telegram.poll_timeout_secs, 30);
        assert_eq!(config.mqtt.subscribe_topic, "agentwire/in");
        assert_eq!(config.mqtt.publish_topic, "agentwire/out");
        assert_eq!(config.webhook.port, 8080);
        assert_eq!(config.websocket.port, 8765);
        assert_eq!(config.whatsapp.port, 8081);
        assert_eq!(config.whatsapp.verify_token, "agentwire");
        assert_eq!(config.discord.token, None);
        assert_eq!(config.slack.allowed_channels, None);
    }

    #[test]
    fn chat_platform_sections_parse() {
        let config = ChannelsConfig::from_json(
            r#"{
                "discord": {"token": "d", "allowed_guilds": [1234567890123], "allowed_channels": ["55"]},
                "slack": {"bot_token": "xoxb-1", "app_token": "xapp-1", "allowed_channels": ["C1"]},
                "whatsapp": {"phone_number_id": "100", "access_token": "t", "allowed_senders": [15551234567]}
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.discord.allowed_guilds,
            Some(vec!["1234567890123".to_string()])
        );
        assert_eq!(config.slack.app_token.as_deref(), Some("xapp-1"));
        assert_eq!(
            config.whatsapp.allowed_senders,
            Some(vec!["15551234567".to_string()])
        );
        assert_eq!(config.whatsapp.port, 8081);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ChannelsConfig::from_json(
            r#"{"telegram":{"allowed_senders":[42,"7"]},"mqtt":{"broker":"broker.local"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.telegram.allowed_senders,
            Some(vec!["42".to_string(), "7".to_string()])
        );
        assert_eq!(config.mqtt.broker, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let err = ChannelsConfig::from_json(r#"{"webhook":{"port":"eighty"}}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("aw-missing-{}.json", std::process::id()));
        assert_eq!(ChannelsConfig::load(&path).unwrap(), ChannelsConfig::default());
    }
}
