//! Chat channels for agentwire.
//!
//! Each [`Channel`] adapts one external protocol (Telegram long-polling,
//! the Discord gateway, Slack Socket Mode, the WhatsApp Cloud API webhook,
//! an HTTP webhook, a WebSocket server, MQTT) into [`IncomingMessage`]s. The
//! [`MessageRouter`] runs every registered channel, passes each message to a
//! single [`MessageHandler`] and sends the reply back where it came from.

pub mod allowlist;
pub mod channel;
pub mod config;
pub mod discord;
pub mod error;
pub mod message;
pub mod mqtt;
pub mod router;
pub mod slack;
pub mod telegram;
pub mod webhook;
pub mod websocket;
pub mod whatsapp;

pub use allowlist::Allowlist;
pub use channel::{on_message, Channel, OnMessage};
pub use config::{
    ChannelsConfig, DiscordConfig, MqttConfig, SlackConfig, TelegramConfig, WebhookConfig,
    WebsocketConfig, WhatsappConfig,
};
pub use discord::DiscordChannel;
pub use error::{ChannelError, Result};
pub use message::{truncate_reply, ChannelKind, IncomingMessage, MAX_REPLY_CHARS};
pub use mqtt::MqttChannel;
pub use router::{
    ChannelFailure, ChannelState, MessageHandler, MessageRouter, DEFAULT_HANDLER_TIMEOUT,
};
pub use slack::SlackChannel;
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;
pub use websocket::WebsocketChannel;
pub use whatsapp::WhatsappChannel;
