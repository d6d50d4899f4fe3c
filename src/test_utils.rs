//! Shared test utilities: an in-memory chat platform and a pinned clock.
//!
//! Used by unit tests across modules and by the integration tests under
//! `tests/`.

use crate::board::Block;
use crate::clock::Clock;
use crate::model::{ChannelId, GuildId, MessageId, UserId};
use crate::platform::{
    ChannelInfo, ChatPlatform, Interaction, Member, Modal, PlatformError, PlatformResult, Reply,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Platform operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    CreateChannel,
    DeleteChannel,
    ResolveChannel,
    ClearChannel,
    PostBlock,
    SendMessage,
    CreateThread,
    SendDirect,
    CreateInvite,
    VoiceMembers,
    GuildMembers,
}

/// One recorded platform call, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    CreateChannel { guild: GuildId, name: String, id: ChannelId },
    DeleteChannel(ChannelId),
    Clear(ChannelId),
    Post { channel: ChannelId, title: String },
    Message { channel: ChannelId, content: String },
    DeleteMessage(ChannelId, MessageId),
    CreateThread { parent: ChannelId, name: String, id: ChannelId },
    Direct { user: UserId, content: String },
    Invite { channel: ChannelId, max_age_secs: u64 },
    Defer { ephemeral: bool },
    Modal(Modal),
    Reply(Reply),
}

#[derive(Debug, Clone)]
enum Posted {
    Block(Block),
    Text(String),
}

#[derive(Debug, Default)]
struct FakeChannel {
    guild: Option<GuildId>,
    messages: BTreeMap<MessageId, Posted>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    guilds: Vec<GuildId>,
    channels: HashMap<ChannelId, FakeChannel>,
    calls: Vec<FakeCall>,
    failures: HashMap<FakeOp, PlatformError>,
    voice: HashMap<ChannelId, Vec<UserId>>,
    members: HashMap<GuildId, Vec<Member>>,
    dm_blocked: HashSet<UserId>,
}

impl FakeState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn check(&self, op: FakeOp) -> PlatformResult<()> {
        match self.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn channel_mut(&mut self, channel: ChannelId) -> PlatformResult<&mut FakeChannel> {
        self.channels
            .get_mut(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))
    }
}

/// In-memory [`ChatPlatform`] that records every call.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_guild(&self, guild: GuildId) {
        let mut state = self.state();
        if !state.guilds.contains(&guild) {
            state.guilds.push(guild);
        }
    }

    /// Create a channel out-of-band, e.g. a voice channel.
    pub fn add_channel(&self, guild: GuildId) -> ChannelId {
        let mut state = self.state();
        let id = ChannelId(state.next());
        state.channels.insert(
            id,
            FakeChannel {
                guild: Some(guild),
                ..FakeChannel::default()
            },
        );
        id
    }

    /// Delete a channel or thread behind the bot's back.
    pub fn remove_channel(&self, channel: ChannelId) {
        self.state().channels.remove(&channel);
    }

    #[must_use]
    pub fn has_channel(&self, channel: ChannelId) -> bool {
        self.state().channels.contains_key(&channel)
    }

    /// Make every call of `op` fail with `err` until cleared.
    pub fn fail(&self, op: FakeOp, err: PlatformError) {
        self.state().failures.insert(op, err);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn set_voice_members(&self, channel: ChannelId, users: Vec<UserId>) {
        self.state().voice.insert(channel, users);
    }

    /// Register `user` as a member of `guild`.
    pub fn add_member(&self, guild: GuildId, user: UserId, bot: bool) {
        let mut state = self.state();
        let members = state.members.entry(guild).or_default();
        members.retain(|m| m.id != user);
        members.push(Member { id: user, bot });
    }

    /// Direct messages to `user` fail with `Forbidden`.
    pub fn block_dms(&self, user: UserId) {
        self.state().dm_blocked.insert(user);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Titles of the blocks currently in `channel`, oldest first.
    #[must_use]
    pub fn posted_titles(&self, channel: ChannelId) -> Vec<String> {
        self.posted_blocks(channel)
            .into_iter()
            .map(|b| b.title)
            .collect()
    }

    #[must_use]
    pub fn posted_blocks(&self, channel: ChannelId) -> Vec<Block> {
        self.state()
            .channels
            .get(&channel)
            .map(|c| {
                c.messages
                    .values()
                    .filter_map(|m| match m {
                        Posted::Block(b) => Some(b.clone()),
                        Posted::Text(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Plain-text messages currently in `channel`, oldest first.
    #[must_use]
    pub fn texts(&self, channel: ChannelId) -> Vec<String> {
        self.state()
            .channels
            .get(&channel)
            .map(|c| {
                c.messages
                    .values()
                    .filter_map(|m| match m {
                        Posted::Text(t) => Some(t.clone()),
                        Posted::Block(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Successful direct messages, in send order.
    #[must_use]
    pub fn directs(&self) -> Vec<(UserId, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                FakeCall::Direct { user, content } => Some((*user, content.clone())),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn replies(&self) -> Vec<Reply> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                FakeCall::Reply(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn created_channels(&self) -> Vec<(String, ChannelId)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                FakeCall::CreateChannel { name, id, .. } => Some((name.clone(), *id)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn guilds(&self) -> Vec<GuildId> {
        self.state().guilds.clone()
    }

    async fn create_restricted_channel(
        &self,
        guild: GuildId,
        name: &str,
    ) -> PlatformResult<ChannelId> {
        let mut state = self.state();
        state.check(FakeOp::CreateChannel)?;
        let id = ChannelId(state.next());
        state.channels.insert(
            id,
            FakeChannel {
                guild: Some(guild),
                ..FakeChannel::default()
            },
        );
        state.calls.push(FakeCall::CreateChannel {
            guild,
            name: name.to_owned(),
            id,
        });
        Ok(id)
    }

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        let mut state = self.state();
        state.check(FakeOp::DeleteChannel)?;
        state
            .channels
            .remove(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))?;
        state.calls.push(FakeCall::DeleteChannel(channel));
        Ok(())
    }

    async fn resolve_channel(&self, channel: ChannelId) -> PlatformResult<ChannelInfo> {
        let state = self.state();
        state.check(FakeOp::ResolveChannel)?;
        state
            .channels
            .get(&channel)
            .map(|c| ChannelInfo {
                id: channel,
                guild_id: c.guild,
            })
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))
    }

    async fn clear_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        {
            let mut state = self.state();
            state.check(FakeOp::ClearChannel)?;
            state.channel_mut(channel)?.messages.clear();
            state.calls.push(FakeCall::Clear(channel));
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn post_block(&self, channel: ChannelId, block: &Block) -> PlatformResult<MessageId> {
        let id = {
            let mut state = self.state();
            state.check(FakeOp::PostBlock)?;
            let id = MessageId(state.next());
            state
                .channel_mut(channel)?
                .messages
                .insert(id, Posted::Block(block.clone()));
            state.calls.push(FakeCall::Post {
                channel,
                title: block.title.clone(),
            });
            id
        };
        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;
        Ok(id)
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> PlatformResult<MessageId> {
        let mut state = self.state();
        state.check(FakeOp::SendMessage)?;
        let id = MessageId(state.next());
        state
            .channel_mut(channel)?
            .messages
            .insert(id, Posted::Text(content.to_owned()));
        state.calls.push(FakeCall::Message {
            channel,
            content: content.to_owned(),
        });
        Ok(id)
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()> {
        let mut state = self.state();
        state
            .channel_mut(channel)?
            .messages
            .remove(&message)
            .ok_or_else(|| PlatformError::NotFound(format!("message {message}")))?;
        state.calls.push(FakeCall::DeleteMessage(channel, message));
        Ok(())
    }

    async fn create_thread(&self, parent: ChannelId, name: &str) -> PlatformResult<ChannelId> {
        let mut state = self.state();
        state.check(FakeOp::CreateThread)?;
        let guild = state.channel_mut(parent)?.guild;
        let id = ChannelId(state.next());
        state.channels.insert(
            id,
            FakeChannel {
                guild,
                ..FakeChannel::default()
            },
        );
        state.calls.push(FakeCall::CreateThread {
            parent,
            name: name.to_owned(),
            id,
        });
        Ok(id)
    }

    async fn send_direct(&self, user: UserId, content: &str) -> PlatformResult<()> {
        let mut state = self.state();
        state.check(FakeOp::SendDirect)?;
        if state.dm_blocked.contains(&user) {
            return Err(PlatformError::Forbidden(format!("user {user} blocks DMs")));
        }
        state.calls.push(FakeCall::Direct {
            user,
            content: content.to_owned(),
        });
        Ok(())
    }

    async fn create_invite(&self, channel: ChannelId, max_age_secs: u64) -> PlatformResult<String> {
        let mut state = self.state();
        state.check(FakeOp::CreateInvite)?;
        state.channel_mut(channel)?;
        let code = state.next();
        state.calls.push(FakeCall::Invite {
            channel,
            max_age_secs,
        });
        Ok(format!("https://discord.gg/fake{code}"))
    }

    async fn voice_members(&self, channel: ChannelId) -> PlatformResult<Vec<UserId>> {
        let state = self.state();
        state.check(FakeOp::VoiceMembers)?;
        Ok(state.voice.get(&channel).cloned().unwrap_or_default())
    }

    async fn guild_members(&self, guild: GuildId) -> PlatformResult<Vec<Member>> {
        let state = self.state();
        state.check(FakeOp::GuildMembers)?;
        Ok(state.members.get(&guild).cloned().unwrap_or_default())
    }

    async fn open_modal(&self, _interaction: &Interaction, modal: &Modal) -> PlatformResult<()> {
        self.state().calls.push(FakeCall::Modal(modal.clone()));
        Ok(())
    }

    async fn defer_reply(&self, _interaction: &Interaction, ephemeral: bool) -> PlatformResult<()> {
        self.state().calls.push(FakeCall::Defer { ephemeral });
        Ok(())
    }

    async fn send_reply(&self, _interaction: &Interaction, reply: &Reply) -> PlatformResult<()> {
        self.state().calls.push(FakeCall::Reply(reply.clone()));
        Ok(())
    }
}
