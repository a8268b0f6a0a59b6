use std::sync::Arc;
use std::time::Duration;

use agentwire_channels::{
    Allowlist, Channel, ChannelKind, ChannelsConfig, DiscordChannel, MessageRouter, MqttChannel,
    SlackChannel, TelegramChannel, WebhookChannel, WebsocketChannel, WhatsappChannel,
};
use tracing::{error, info};

use crate::cmd::{ChannelTokens, ServeArgs};
use crate::config::load_channels_config;
use crate::exit::{channel_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::handler::CompletionHandler;

fn parse_channels(names: &[String]) -> CliResult<Vec<ChannelKind>> {
    let mut kinds = Vec::new();
    for name in names.iter().filter(|name| !name.trim().is_empty()) {
        let kind = ChannelKind::parse(name).ok_or_else(|| {
            let available: Vec<&str> = ChannelKind::ALL.iter().map(|k| k.as_str()).collect();
            CliError::usage(format!(
                "unknown channel `{}` (available: {})",
                name.trim(),
                available.join(", ")
            ))
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(CliError::usage("no channels selected"));
    }
    Ok(kinds)
}

/// The flag or env value if set, else the config file entry.
fn credential<'a>(
    flag: Option<&'a str>,
    configured: Option<&'a str>,
    missing: &str,
) -> CliResult<&'a str> {
    flag.or(configured)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| CliError::usage(missing.to_string()))
}

fn build_channel(
    kind: ChannelKind,
    config: &ChannelsConfig,
    tokens: &ChannelTokens,
) -> CliResult<Arc<dyn Channel>> {
    Ok(match kind {
        ChannelKind::Telegram => {
            let token = credential(
                tokens.telegram_token.as_deref(),
                config.telegram.token.as_deref(),
                "telegram channel requires TELEGRAM_BOT_TOKEN",
            )?;
            Arc::new(TelegramChannel::new(
                token,
                Duration::from_secs(config.telegram.poll_timeout_secs),
                Allowlist::from_config(config.telegram.allowed_senders.clone()),
            ))
        }
        ChannelKind::Discord => {
            let token = credential(
                tokens.discord_token.as_deref(),
                config.discord.token.as_deref(),
                "discord channel requires DISCORD_BOT_TOKEN",
            )?;
            Arc::new(DiscordChannel::new(&config.discord, token))
        }
        ChannelKind::Slack => {
            let bot_token = credential(
                tokens.slack_bot_token.as_deref(),
                config.slack.bot_token.as_deref(),
                "slack channel requires SLACK_BOT_TOKEN",
            )?;
            let app_token = credential(
                tokens.slack_app_token.as_deref(),
                config.slack.app_token.as_deref(),
                "slack channel requires SLACK_APP_TOKEN",
            )?;
            Arc::new(SlackChannel::new(&config.slack, bot_token, app_token))
        }
        ChannelKind::Whatsapp => {
            let access_token = credential(
                tokens.whatsapp_token.as_deref(),
                config.whatsapp.access_token.as_deref(),
                "whatsapp channel requires WHATSAPP_ACCESS_TOKEN",
            )?;
            let phone_number_id = credential(
                None,
                config.whatsapp.phone_number_id.as_deref(),
                "whatsapp channel requires whatsapp.phone_number_id in the config file",
            )?;
            Arc::new(WhatsappChannel::new(
                &config.whatsapp,
                phone_number_id,
                access_token,
            ))
        }
        ChannelKind::Webhook => Arc::new(WebhookChannel::new(&config.webhook)),
        ChannelKind::Websocket => Arc::new(WebsocketChannel::new(&config.websocket)),
        ChannelKind::Mqtt => Arc::new(MqttChannel::new(&config.mqtt)),
    })
}

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let kinds = parse_channels(&args.channels)?;
    let client = args.api.client()?;
    let config = load_channels_config(args.config.as_deref());
    let channels = kinds
        .into_iter()
        .map(|kind| build_channel(kind, &config, &args.tokens))
        .collect::<CliResult<Vec<_>>>()?;

    let (tools, bridge) = args.mcp.registry().await;
    let dispatcher = args.api.dispatcher(client, tools);
    let mut router = MessageRouter::new(Arc::new(CompletionHandler::new(dispatcher)));
    for channel in channels {
        if let Err(err) = router.register(channel) {
            bridge.shutdown().await;
            return Err(channel_error("channel registration failed", err));
        }
    }

    let failures = tokio::select! {
        failures = router.start_all() => failures,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; stopping channels");
            Vec::new()
        }
    };
    router.stop_all().await;
    bridge.shutdown().await;

    for failure in &failures {
        error!(channel = %failure.channel, error = %failure.error, "channel did not run");
    }
    if !failures.is_empty() && failures.len() == router.len() {
        return Err(CliError::new(FAILURE, "every channel failed to run"));
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn channel_list_is_parsed_and_deduplicated() {
        let kinds = parse_channels(&names(&["webhook", " MQTT", "webhook", ""])).unwrap();
        assert_eq!(kinds, vec![ChannelKind::Webhook, ChannelKind::Mqtt]);
    }

    #[test]
    fn unknown_or_empty_channel_list_is_exit_one() {
        let err = parse_channels(&names(&["webhook", "irc"])).unwrap_err();
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("irc"));
        assert!(err.message.contains("whatsapp"));
        assert_eq!(parse_channels(&names(&[""])).unwrap_err().code, FAILURE);
    }

    #[test]
    fn telegram_needs_a_token() {
        let config = ChannelsConfig::default();
        let none = ChannelTokens::default();
        let err = build_channel(ChannelKind::Telegram, &config, &none).err().unwrap();
        assert_eq!(err.code, FAILURE);

        let tokens = ChannelTokens {
            telegram_token: Some("1:abc".into()),
            ..ChannelTokens::default()
        };
        let channel = build_channel(ChannelKind::Telegram, &config, &tokens).unwrap();
        assert_eq!(channel.kind(), ChannelKind::Telegram);
    }

    #[test]
    fn chat_platforms_need_their_credentials() {
        let mut config = ChannelsConfig::default();
        let none = ChannelTokens::default();
        for kind in [ChannelKind::Discord, ChannelKind::Slack, ChannelKind::Whatsapp] {
            let err = build_channel(kind, &config, &none).err().unwrap();
            assert_eq!(err.code, FAILURE);
            assert!(err.message.contains(kind.as_str()));
        }

        let half_slack = ChannelTokens {
            slack_bot_token: Some("xoxb-1".into()),
            ..ChannelTokens::default()
        };
        let err = build_channel(ChannelKind::Slack, &config, &half_slack)
            .err()
            .unwrap();
        assert!(err.message.contains("SLACK_APP_TOKEN"));

        let tokens = ChannelTokens {
            discord_token: Some("discord".into()),
            slack_bot_token: Some("xoxb-1".into()),
            slack_app_token: Some("xapp-1".into()),
            whatsapp_token: Some("EAAG".into()),
            ..ChannelTokens::default()
        };
        let err = build_channel(ChannelKind::Whatsapp, &config, &tokens)
            .err()
            .unwrap();
        assert!(err.message.contains("phone_number_id"));

        config.whatsapp.phone_number_id = Some("100".into());
        for kind in [ChannelKind::Discord, ChannelKind::Slack, ChannelKind::Whatsapp] {
            assert_eq!(build_channel(kind, &config, &tokens).unwrap().kind(), kind);
        }
    }

    #[test]
    fn config_file_tokens_are_used_when_no_flag_is_given() {
        let mut config = ChannelsConfig::default();
        config.discord.token = Some("from-file".into());
        let channel = build_channel(ChannelKind::Discord, &config, &ChannelTokens::default());
        assert_eq!(channel.unwrap().kind(), ChannelKind::Discord);
    }
}
