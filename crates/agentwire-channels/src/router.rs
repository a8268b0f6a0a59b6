use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::{Channel, OnMessage};
use crate::error::{ChannelError, Result};
use crate::message::{ChannelKind, IncomingMessage};

/// Wall-clock cap on one handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(120);

const LOG_PREVIEW_CHARS: usize = 80;

/// Application logic behind every channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Produce the reply for one message.
    async fn handle(&self, message: &IncomingMessage) -> Result<String>;
}

/// Lifecycle of one registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Registered,
    Starting,
    Running,
    /// `start` returned an error or its task died.
    Failed,
    Stopping,
    Stopped,
}

/// A channel whose `start` ended with an error.
#[derive(Debug)]
pub struct ChannelFailure {
    pub channel: ChannelKind,
    pub error: ChannelError,
}

type States = Arc<Mutex<BTreeMap<ChannelKind, ChannelState>>>;

/// Routes messages from every registered channel through one handler and
/// sends each reply back on the channel it came from.
pub struct MessageRouter {
    handler: Arc<dyn MessageHandler>,
    channels: BTreeMap<ChannelKind, Arc<dyn Channel>>,
    states: States,
    shutdown: CancellationToken,
    handler_timeout: Duration,
}

/// Everything a dispatch needs, detached from the router so it can run on
/// its own task.
struct Route {
    handler: Arc<dyn MessageHandler>,
    channels: BTreeMap<ChannelKind, Arc<dyn Channel>>,
    timeout: Duration,
}

impl MessageRouter {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            channels: BTreeMap::new(),
            states: Arc::default(),
            shutdown: CancellationToken::new(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Register a channel. Names are unique.
    pub fn register(&mut self, channel: Arc<dyn Channel>) -> Result<()> {
        let kind = channel.kind();
        if self.channels.contains_key(&kind) {
            return Err(ChannelError::DuplicateChannel(kind.to_string()));
        }
        self.channels.insert(kind, channel);
        set_state(&self.states, kind, ChannelState::Registered);
        info!(channel = %kind, "registered channel");
        Ok(())
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelKind> + '_ {
        self.channels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn state(&self, channel: ChannelKind) -> Option<ChannelState> {
        lock(&self.states).get(&channel).copied()
    }

    /// Run every channel concurrently until each one ends or
    /// [`stop_all`](Self::stop_all) is called.
    ///
    /// One channel failing never stops the others; failures are collected
    /// and returned once every channel has ended.
    pub async fn start_all(&self) -> Vec<ChannelFailure> {
        if self.channels.is_empty() {
            warn!("no channels registered");
            return Vec::new();
        }

        let on_message = self.on_message();
        let mut tasks = Vec::with_capacity(self.channels.len());

        for (&kind, channel) in &self.channels {
            set_state(&self.states, kind, ChannelState::Starting);
            let channel = Arc::clone(channel);
            let on_message = Arc::clone(&on_message);
            let shutdown = self.shutdown.clone();
            let states = Arc::clone(&self.states);

            let task = tokio::spawn(async move {
                transition(&states, kind, ChannelState::Starting, ChannelState::Running);
                info!(channel = %kind, "started channel");
                let result = tokio::select! {
                    _ = shutdown.cancelled() => Ok(()),
                    result = channel.start(on_message) => result,
                };
                if let Err(err) = &result {
                    error!(channel = %kind, error = %err, "channel failed");
                    transition(&states, kind, ChannelState::Running, ChannelState::Failed);
                }
                result
            });
            tasks.push(async move {
                let result = task.await.unwrap_or_else(|err| {
                    error!(channel = %kind, error = %err, "channel task failed");
                    Err(ChannelError::TaskFailed(err.to_string()))
                });
                (kind, result)
            });
        }

        let mut failures = Vec::new();
        for (kind, result) in join_all(tasks).await {
            match result {
                Ok(()) => info!(channel = %kind, "channel ended"),
                Err(error) => {
                    transition(&self.states, kind, ChannelState::Running, ChannelState::Failed);
                    failures.push(ChannelFailure {
                        channel: kind,
                        error,
                    });
                }
            }
        }
        failures
    }

    /// Cancel every channel task and call `stop` on every channel.
    ///
    /// Calling it again is a no-op.
    pub async fn stop_all(&self) {
        self.shutdown.cancel();
        for (&kind, channel) in &self.channels {
            {
                let mut states = lock(&self.states);
                let state = states.entry(kind).or_insert(ChannelState::Registered);
                if matches!(*state, ChannelState::Stopping | ChannelState::Stopped) {
                    continue;
                }
                *state = ChannelState::Stopping;
            }
            if let Err(err) = channel.stop().await {
                warn!(channel = %kind, error = %err, "channel stop failed");
            }
            set_state(&self.states, kind, ChannelState::Stopped);
            info!(channel = %kind, "stopped channel");
        }
    }

    /// Run the handler for `message` and send the reply back on its channel.
    ///
    /// Always produces a reply: handler errors and timeouts become an
    /// `[error] ...` string. `send` is attempted exactly once.
    pub async fn dispatch(&self, message: IncomingMessage) -> String {
        self.route().dispatch(message).await
    }

    fn route(&self) -> Arc<Route> {
        Arc::new(Route {
            handler: Arc::clone(&self.handler),
            channels: self.channels.clone(),
            timeout: self.handler_timeout,
        })
    }

    /// Callback handed to channels. Each dispatch runs on its own task so a
    /// cancelled channel does not abort a handler already in flight.
    fn on_message(&self) -> OnMessage {
        let route = self.route();
        Arc::new(move |message| {
            let route = Arc::clone(&route);
            Box::pin(async move {
                match tokio::spawn(route.dispatch(message)).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        error!(error = %err, "dispatch task failed");
                        format!("[error] {err}")
                    }
                }
            })
        })
    }
}

impl Route {
    async fn dispatch(self: Arc<Self>, message: IncomingMessage) -> String {
        info!(
            channel = %message.channel,
            sender_id = %message.sender_id,
            text = %message.preview(LOG_PREVIEW_CHARS),
            "incoming message"
        );

        let reply = match tokio::time::timeout(self.timeout, self.handler.handle(&message)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                error!(channel = %message.channel, error = %err, "handler failed");
                format!("[error] {err}")
            }
            Err(_) => {
                warn!(channel = %message.channel, timeout = ?self.timeout, "handler timed out");
                format!("[error] handler timed out after {:?}", self.timeout)
            }
        };

        match self.channels.get(&message.channel) {
            Some(channel) => {
                if let Err(err) = channel.send(&message.channel_id, &reply).await {
                    error!(channel = %message.channel, error = %err, "failed to send reply");
                }
            }
            None => warn!(channel = %message.channel, "no channel registered for reply"),
        }
        reply
    }
}

fn lock(states: &States) -> std::sync::MutexGuard<'_, BTreeMap<ChannelKind, ChannelState>> {
    states.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_state(states: &States, kind: ChannelKind, state: ChannelState) {
    lock(states).insert(kind, state);
}

fn transition(states: &States, kind: ChannelKind, from: ChannelState, to: ChannelState) {
    let mut states = lock(states);
    if let Some(state) = states.get_mut(&kind) {
        if *state == from {
            *state = to;
        }
    }
}
