use std::borrow::Cow;
use std::fmt;

/// Longest reply the long-poll and pub/sub channels deliver in one message.
pub const MAX_REPLY_CHARS: usize = 4096;

const ELLIPSIS: &str = "...";

/// Transport a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelKind {
    Telegram,
    Webhook,
    Websocket,
    Mqtt,
    Discord,
    Slack,
    Whatsapp,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 7] = [
        ChannelKind::Telegram,
        ChannelKind::Webhook,
        ChannelKind::Websocket,
        ChannelKind::Mqtt,
        ChannelKind::Discord,
        ChannelKind::Slack,
        ChannelKind::Whatsapp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Websocket => "websocket",
            ChannelKind::Mqtt => "mqtt",
            ChannelKind::Discord => "discord",
            ChannelKind::Slack => "slack",
            ChannelKind::Whatsapp => "whatsapp",
        }
    }

    /// Parse a channel name as given on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound message, normalized across channels.
///
/// `channel_id` is whatever the originating channel needs to address the
/// reply (chat id, topic, connection); `sender_id` is what allowlists match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub channel: ChannelKind,
    pub channel_id: String,
    pub sender_id: String,
    pub text: String,
}

impl IncomingMessage {
    pub fn new(
        channel: ChannelKind,
        channel_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            channel_id: channel_id.into(),
            sender_id: sender_id.into(),
            text: text.into(),
        }
    }

    /// First `max` characters of the text, for log lines.
    pub fn preview(&self, max: usize) -> &str {
        match self.text.char_indices().nth(max) {
            Some((idx, _)) => &self.text[..idx],
            None => &self.text,
        }
    }
}

/// Cap `text` at `max_chars` characters.
///
/// Longer text keeps its first `max_chars - 3` characters followed by `...`,
/// so the result is exactly `max_chars` long.
pub fn truncate_reply(text: &str, max_chars: usize) -> Cow<'_, str> {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return Cow::Borrowed(text);
    };
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let end = text.char_indices().nth(keep).map_or(cut, |(idx, _)| idx);
    let mut out = String::with_capacity(end + ELLIPSIS.len());
    out.push_str(&text[..end]);
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_reply_is_cut_with_marker() {
        let text = "x".repeat(5000);
        let out = truncate_reply(&text, MAX_REPLY_CHARS);
        assert_eq!(out.chars().count(), 4096);
        assert!(out.ends_with("..."));
        assert_eq!(&out[..4093], &text[..4093]);
    }

    #[test]
    fn reply_at_limit_is_untouched() {
        let text = "y".repeat(MAX_REPLY_CHARS);
        assert!(matches!(truncate_reply(&text, MAX_REPLY_CHARS), Cow::Borrowed(_)));
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let out = truncate_reply(&text, 5);
        assert_eq!(out, "éé...");
    }

    #[test]
    fn channel_names_round_trip() {
        for kind in ChannelKind::ALL {
            assert_eq!(ChannelKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::parse(" MQTT "), Some(ChannelKind::Mqtt));
        assert_eq!(ChannelKind::parse("WhatsApp"), Some(ChannelKind::Whatsapp));
        assert_eq!(ChannelKind::parse("irc"), None);
    }

    #[test]
    fn preview_stops_at_char_boundary() {
        let msg = IncomingMessage::new(ChannelKind::Webhook, "w", "s", "héllo world");
        assert_eq!(msg.preview(2), "hé");
        assert_eq!(msg.preview(80), "héllo world");
    }
}
