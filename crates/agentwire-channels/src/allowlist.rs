use std::collections::HashSet;

use tracing::warn;

use crate::message::ChannelKind;

/// Optional set of sender ids a channel accepts.
///
/// An open allowlist admits everyone; that is valid but logged as a warning
/// when the channel starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    senders: Option<HashSet<String>>,
}

impl Allowlist {
    /// Admit every sender.
    pub fn open() -> Self {
        Self::default()
    }

    /// Admit only the listed senders.
    pub fn only<I, S>(senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            senders: Some(senders.into_iter().map(Into::into).collect()),
        }
    }

    /// `only` for a configured list, `open` when none is configured.
    pub fn from_config(senders: Option<Vec<String>>) -> Self {
        senders.map_or_else(Self::open, Self::only)
    }

    /// A place filter (guilds, rooms). Unlike sender lists, an empty list
    /// means no restriction.
    pub fn scope(ids: Option<Vec<String>>) -> Self {
        Self::from_config(ids.filter(|ids| !ids.is_empty()))
    }

    pub fn is_open(&self) -> bool {
        self.senders.is_none()
    }

    pub fn admits(&self, sender_id: &str) -> bool {
        self.senders
            .as_ref()
            .is_none_or(|senders| senders.contains(sender_id))
    }

    /// [`admits`](Self::admits), logging a warning when the sender is dropped.
    pub fn check(&self, channel: ChannelKind, sender_id: &str) -> bool {
        let admitted = self.admits(sender_id);
        if !admitted {
            warn!(channel = %channel, sender_id, "dropped message from sender not on allowlist");
        }
        admitted
    }

    /// Log the access policy once at channel start.
    pub fn log_policy(&self, channel: ChannelKind) {
        match &self.senders {
            Some(senders) => {
                tracing::info!(channel = %channel, allowed = senders.len(), "sender allowlist active")
            }
            None => warn!(
                channel = %channel,
                "no sender allowlist configured; every sender can reach the agent"
            ),
        }
    }
}
