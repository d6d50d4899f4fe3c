//! Chat platform boundary.
//!
//! The core talks to the outside world only through [`ChatPlatform`]. The
//! Discord implementation lives in [`discord`] (REST) and [`gateway`]
//! (websocket session and caches).

pub mod discord;
pub mod events;
pub mod gateway;
pub mod rate_limit;

pub use discord::{DiscordPlatform, DiscordRest};
pub use events::{
    ChannelMessage, CommandOption, InboundEvent, InputStyle, Interaction, InteractionKind, Modal,
    OptionValue, Reply, Response, TextInput,
};
pub use gateway::{GatewayCache, GatewaySession};
pub use rate_limit::{ChannelRateLimiters, RateLimitError, RateLimiter};

use crate::board::Block;
use crate::model::{ChannelId, GuildId, MessageId, UserId};
use async_trait::async_trait;
use tokio::sync::watch;

/// Failure reported by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The channel, thread, message, or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The bot lacks permission.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Platform or local limiter asked us to back off.
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// Transport failure or server error.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The platform answered with something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// What the platform knows about a channel or thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    /// Owning guild; `None` for direct-message channels.
    pub guild_id: Option<GuildId>,
}

/// A guild member as far as mention resolution cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub bot: bool,
}

/// Operations the boards, threads, and scheduler need from the platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Guilds the bot is currently a member of.
    async fn guilds(&self) -> Vec<GuildId>;

    /// Create a text channel in which only the bot may post.
    async fn create_restricted_channel(&self, guild: GuildId, name: &str)
    -> PlatformResult<ChannelId>;

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()>;

    /// Look up a channel or thread. Missing ones fail with
    /// [`PlatformError::NotFound`].
    async fn resolve_channel(&self, channel: ChannelId) -> PlatformResult<ChannelInfo>;

    /// Delete every recent message in `channel`.
    async fn clear_channel(&self, channel: ChannelId) -> PlatformResult<()>;

    async fn post_block(&self, channel: ChannelId, block: &Block) -> PlatformResult<MessageId>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> PlatformResult<MessageId>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()>;

    /// Start a public thread under `parent`.
    async fn create_thread(&self, parent: ChannelId, name: &str) -> PlatformResult<ChannelId>;

    /// Send a direct message to a user.
    async fn send_direct(&self, user: UserId, content: &str) -> PlatformResult<()>;

    /// Issue an invite link to `channel` that expires after `max_age_secs`.
    async fn create_invite(&self, channel: ChannelId, max_age_secs: u64) -> PlatformResult<String>;

    /// Users currently connected to a voice channel.
    async fn voice_members(&self, channel: ChannelId) -> PlatformResult<Vec<UserId>>;

    /// Everyone in `guild`, bots included.
    async fn guild_members(&self, guild: GuildId) -> PlatformResult<Vec<Member>>;

    /// Answer an interaction with a form instead of a reply.
    async fn open_modal(&self, interaction: &Interaction, modal: &Modal) -> PlatformResult<()>;

    /// Acknowledge an interaction so the reply can follow later.
    async fn defer_reply(&self, interaction: &Interaction, ephemeral: bool) -> PlatformResult<()>;

    /// Fill in a previously deferred reply.
    async fn send_reply(&self, interaction: &Interaction, reply: &Reply) -> PlatformResult<()>;

    /// `Ok(false)` when the channel is gone.
    async fn channel_exists(&self, channel: ChannelId) -> PlatformResult<bool> {
        match self.resolve_channel(channel).await {
            Ok(_) => Ok(true),
            Err(PlatformError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn resolve_thread(&self, thread: ChannelId) -> PlatformResult<()> {
        self.resolve_channel(thread).await.map(|_| ())
    }

    async fn delete_thread(&self, thread: ChannelId) -> PlatformResult<()> {
        self.delete_channel(thread).await
    }
}

/// Opens once the gateway session is ready; closes again on disconnect.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn close(&self) {
        self.tx.send_replace(false);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn gate_releases_waiters_when_opened() {
        let gate = ReadyGate::new();
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn open_gate_does_not_block() {
        let gate = ReadyGate::new();
        gate.open();
        tokio::time::timeout(Duration::from_millis(100), gate.wait())
            .await
            .unwrap();
        gate.close();
        assert!(!gate.is_open());
    }
}
