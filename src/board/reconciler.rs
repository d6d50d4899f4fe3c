//! Board reconciliation: bring a board channel back in line with its store.
//!
//! A refresh is a full clear-and-repost. Refreshes of one board in one guild
//! are serialised through a keyed async mutex so two passes can never
//! interleave their clear and post calls.

use super::{BoardLayout, MeetingLayout, TaskLayout, VoiceCounts, split_oversized};
use crate::clock::Clock;
use crate::error::Result;
use crate::model::{ChannelId, GuildId};
use crate::platform::{ChatPlatform, PlatformError};
use crate::store::{Entity, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Whether a board has a channel pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardState {
    Unconfigured,
    Configured(ChannelId),
}

/// What happened to the previous board channel during `configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldChannel {
    None,
    Deleted(ChannelId),
    AlreadyGone(ChannelId),
    /// The bot could not delete it; it is left in place.
    DeleteForbidden(ChannelId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureOutcome {
    pub channel: ChannelId,
    pub old: OldChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unconfigured,
    /// The pointed-to channel no longer exists.
    ChannelMissing,
    /// The board channel belongs to a different guild.
    OtherGuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Skipped(SkipReason),
    /// `blocks` counts body blocks (header excluded); `healed` counts broken
    /// references cleared before rendering.
    Rendered { blocks: usize, healed: usize },
}

/// Work that must run before a board renders, such as clearing references to
/// vanished threads. Returns how many entities were healed.
#[async_trait]
pub trait RefreshHook: Send + Sync {
    async fn before_render(&self) -> usize;
}

/// Keeps one board channel in sync with one store.
pub struct BoardReconciler<L: BoardLayout> {
    store: Arc<Store<L::Entity>>,
    layout: L,
    platform: Arc<dyn ChatPlatform>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
    hook: Option<Arc<dyn RefreshHook>>,
}

impl<L: BoardLayout> BoardReconciler<L> {
    #[must_use]
    pub fn new(
        store: Arc<Store<L::Entity>>,
        layout: L,
        platform: Arc<dyn ChatPlatform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            layout,
            platform,
            clock,
            locks: Mutex::new(HashMap::new()),
            hook: None,
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn RefreshHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    #[must_use]
    pub fn layout(&self) -> &L {
        &self.layout
    }

    #[must_use]
    pub fn state(&self) -> BoardState {
        match self.store.board_channel() {
            Some(channel) => BoardState::Configured(channel),
            None => BoardState::Unconfigured,
        }
    }

    fn lock_for(&self, guild: GuildId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(guild).or_default())
    }

    /// Replace the board channel with a freshly created one.
    ///
    /// # Errors
    ///
    /// Fails if the new channel cannot be created or the pointer cannot be
    /// persisted. Failing to delete the old channel is reported in the
    /// outcome instead.
    pub async fn configure(&self, guild: GuildId) -> Result<ConfigureOutcome> {
        let lock = self.lock_for(guild);
        let _guard = lock.lock().await;

        let old = match self.store.board_channel() {
            None => OldChannel::None,
            Some(old) => match self.platform.delete_channel(old).await {
                Ok(()) => OldChannel::Deleted(old),
                Err(PlatformError::NotFound(_)) => OldChannel::AlreadyGone(old),
                Err(PlatformError::Forbidden(reason)) => {
                    warn!("cannot delete old {} board channel {old}: {reason}", L::Entity::KIND);
                    OldChannel::DeleteForbidden(old)
                }
                Err(e) => return Err(e.into()),
            },
        };

        let channel = self
            .platform
            .create_restricted_channel(guild, self.layout.channel_name())
            .await?;
        self.store.set_board_channel(channel)?;
        info!(
            "{} board configured in guild {guild}: channel {channel}",
            L::Entity::KIND
        );
        Ok(ConfigureOutcome { channel, old })
    }

    /// Clear the board channel and post the header plus the current render.
    ///
    /// # Errors
    ///
    /// Platform failures while clearing or posting are returned as-is and not
    /// retried; the next refresh starts over with a full clear.
    pub async fn refresh(&self, guild: GuildId) -> Result<RefreshOutcome> {
        let lock = self.lock_for(guild);
        let _guard = lock.lock().await;

        let Some(channel) = self.store.board_channel() else {
            debug!("{} board unconfigured; skipping refresh", L::Entity::KIND);
            return Ok(RefreshOutcome::Skipped(SkipReason::Unconfigured));
        };
        let info = match self.platform.resolve_channel(channel).await {
            Ok(info) => info,
            Err(PlatformError::NotFound(_)) => {
                warn!(
                    "{} board channel {channel} is gone; skipping refresh",
                    L::Entity::KIND
                );
                return Ok(RefreshOutcome::Skipped(SkipReason::ChannelMissing));
            }
            Err(e) => return Err(e.into()),
        };
        if info.guild_id.is_some_and(|owner| owner != guild) {
            return Ok(RefreshOutcome::Skipped(SkipReason::OtherGuild));
        }

        let healed = match &self.hook {
            Some(hook) => hook.before_render().await,
            None => 0,
        };

        let now = self.clock.now();
        let entities = self.store.all();
        let voice = self.voice_counts(&entities, now).await;
        let blocks = split_oversized(self.layout.render(&entities, now, &voice));

        self.platform.clear_channel(channel).await?;
        self.platform
            .post_block(channel, &self.layout.header())
            .await?;
        for block in &blocks {
            self.platform.post_block(channel, block).await?;
        }

        debug!(
            "{} board refreshed in channel {channel}: {} block(s), {healed} healed",
            L::Entity::KIND,
            blocks.len()
        );
        Ok(RefreshOutcome::Rendered {
            blocks: blocks.len(),
            healed,
        })
    }

    /// Occupancy of the channels the layout watches. Unreadable channels are
    /// left out and the render goes ahead without them.
    async fn voice_counts(&self, entities: &[L::Entity], now: DateTime<Utc>) -> VoiceCounts {
        let mut counts = VoiceCounts::new();
        for channel in self.layout.watched_channels(entities, now) {
            if counts.contains_key(&channel) {
                continue;
            }
            match self.platform.voice_members(channel).await {
                Ok(members) => {
                    counts.insert(channel, members.len());
                }
                Err(e) => debug!("voice occupancy of channel {channel} unavailable: {e}"),
            }
        }
        counts
    }

    /// Delete the board channel (best-effort) and forget it.
    ///
    /// # Errors
    ///
    /// Only a failure to persist the cleared pointer is returned.
    pub async fn teardown(&self, guild: GuildId) -> Result<Option<ChannelId>> {
        let lock = self.lock_for(guild);
        let _guard = lock.lock().await;

        let Some(channel) = self.store.board_channel() else {
            return Ok(None);
        };
        match self.platform.delete_channel(channel).await {
            Ok(()) | Err(PlatformError::NotFound(_)) => {}
            Err(e) => warn!(
                "could not delete {} board channel {channel}: {e}",
                L::Entity::KIND
            ),
        }
        self.store.clear_board_channel()?;
        Ok(Some(channel))
    }
}

/// Both boards of the bot.
#[derive(Clone)]
pub struct Boards {
    pub tasks: Arc<BoardReconciler<TaskLayout>>,
    pub meetings: Arc<BoardReconciler<MeetingLayout>>,
}

impl Boards {
    /// Refresh both boards concurrently, logging failures.
    pub async fn refresh_all(&self, guild: GuildId) {
        let (tasks, meetings) =
            tokio::join!(self.tasks.refresh(guild), self.meetings.refresh(guild));
        if let Err(e) = tasks {
            warn!("task board refresh failed in guild {guild}: {e}");
        }
        if let Err(e) = meetings {
            warn!("meeting board refresh failed in guild {guild}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::model::{Meeting, Task, UserId};
    use crate::store::{MeetingStore, TaskStore};
    use crate::test_utils::{FakeCall, FakeOp, FakePlatform, FixedClock};
    use chrono::{Duration, FixedOffset, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GUILD: GuildId = GuildId(1);

    struct Fixture {
        _dir: tempfile::TempDir,
        platform: Arc<FakePlatform>,
        store: Arc<TaskStore>,
        board: BoardReconciler<TaskLayout>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::new());
        platform.add_guild(GUILD);
        let store = Arc::new(TaskStore::open(dir.path().join("tasks.json")).unwrap());
        let board = BoardReconciler::new(
            Arc::clone(&store),
            TaskLayout::new(3, FixedOffset::east_opt(0).unwrap()),
            platform.clone(),
            Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap())),
        );
        Fixture {
            _dir: dir,
            platform,
            store,
            board,
        }
    }

    #[tokio::test]
    async fn unconfigured_refresh_is_a_noop() {
        let f = fixture();
        assert_eq!(f.board.state(), BoardState::Unconfigured);
        let outcome = f.board.refresh(GUILD).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::Unconfigured));
        assert!(f.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn configure_then_refresh_posts_header_and_sections() {
        let f = fixture();
        f.store.add(Task::new("Ship v1", "notes", None, Utc::now())).unwrap();

        let outcome = f.board.configure(GUILD).await.unwrap();
        assert_eq!(outcome.old, OldChannel::None);
        assert_eq!(f.board.state(), BoardState::Configured(outcome.channel));

        let refreshed = f.board.refresh(GUILD).await.unwrap();
        assert_eq!(
            refreshed,
            RefreshOutcome::Rendered {
                blocks: 5,
                healed: 0
            }
        );
        let titles = f.platform.posted_titles(outcome.channel);
        assert_eq!(titles.len(), 6);
        assert_eq!(titles[0], "🎯 Task Management Dashboard");
        assert!(titles[1].contains("(1)"));
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let f = fixture();
        let channel = f.board.configure(GUILD).await.unwrap().channel;
        f.board.refresh(GUILD).await.unwrap();
        let first = f.platform.posted_titles(channel);
        f.board.refresh(GUILD).await.unwrap();
        assert_eq!(f.platform.posted_titles(channel), first);
    }

    #[tokio::test]
    async fn reconfigure_deletes_previous_channel() {
        let f = fixture();
        let first = f.board.configure(GUILD).await.unwrap().channel;
        let second = f.board.configure(GUILD).await.unwrap();
        assert_eq!(second.old, OldChannel::Deleted(first));
        assert!(!f.platform.has_channel(first));
    }

    #[tokio::test]
    async fn forbidden_delete_is_reported_but_not_fatal() {
        let f = fixture();
        let first = f.board.configure(GUILD).await.unwrap().channel;
        f.platform
            .fail(FakeOp::DeleteChannel, PlatformError::Forbidden("no".to_owned()));
        let outcome = f.board.configure(GUILD).await.unwrap();
        assert_eq!(outcome.old, OldChannel::DeleteForbidden(first));
        assert_ne!(outcome.channel, first);
        assert_eq!(f.store.board_channel(), Some(outcome.channel));
    }

    #[tokio::test]
    async fn vanished_channel_is_skipped_without_error() {
        let f = fixture();
        let channel = f.board.configure(GUILD).await.unwrap().channel;
        f.platform.remove_channel(channel);
        let outcome = f.board.refresh(GUILD).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::ChannelMissing));
        assert!(
            !f.platform
                .calls()
                .iter()
                .any(|c| matches!(c, FakeCall::Clear(_)))
        );
    }

    #[tokio::test]
    async fn other_guilds_do_not_touch_the_board() {
        let f = fixture();
        f.platform.add_guild(GuildId(2));
        f.board.configure(GUILD).await.unwrap();
        let outcome = f.board.refresh(GuildId(2)).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::OtherGuild));
    }

    #[tokio::test]
    async fn forbidden_post_is_surfaced() {
        let f = fixture();
        f.board.configure(GUILD).await.unwrap();
        f.platform
            .fail(FakeOp::PostBlock, PlatformError::Forbidden("no".to_owned()));
        let err = f.board.refresh(GUILD).await.unwrap_err();
        assert!(matches!(
            err,
            crate::BoardError::Platform(PlatformError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_refreshes_never_interleave() {
        let f = fixture();
        for i in 0..4 {
            f.store
                .add(Task::new(format!("t{i}"), "d", None, Utc::now()))
                .unwrap();
        }
        let channel = f.board.configure(GUILD).await.unwrap().channel;
        let board = Arc::new(f.board);
        f.platform.clear_calls();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let board = Arc::clone(&board);
            handles.push(tokio::spawn(async move { board.refresh(GUILD).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Every pass is a clear followed by an uninterrupted run of posts.
        let calls: Vec<FakeCall> = f
            .platform
            .calls()
            .into_iter()
            .filter(|c| matches!(c, FakeCall::Clear(_) | FakeCall::Post { .. }))
            .collect();
        let per_pass = calls.len() / 3;
        for pass in calls.chunks(per_pass) {
            assert_eq!(pass[0], FakeCall::Clear(channel));
            assert!(pass[1..].iter().all(|c| matches!(c, FakeCall::Post { .. })));
        }
        let first = f.platform.posted_titles(channel);
        assert_eq!(first.len(), per_pass - 1);
    }

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl RefreshHook for CountingHook {
        async fn before_render(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            2
        }
    }

    #[tokio::test]
    async fn hook_runs_before_render() {
        let f = fixture();
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let board = f.board.with_hook(hook.clone());
        board.configure(GUILD).await.unwrap();
        let outcome = board.refresh(GUILD).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Rendered { healed: 2, .. }));
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_forgets_channel() {
        let f = fixture();
        let channel = f.board.configure(GUILD).await.unwrap().channel;
        assert_eq!(f.board.teardown(GUILD).await.unwrap(), Some(channel));
        assert_eq!(f.board.state(), BoardState::Unconfigured);
        assert!(!f.platform.has_channel(channel));
        assert_eq!(f.board.teardown(GUILD).await.unwrap(), None);
    }

    #[tokio::test]
    async fn meeting_board_hides_ended_meetings() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::new());
        platform.add_guild(GUILD);
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let store = Arc::new(MeetingStore::open(dir.path().join("meetings.json")).unwrap());
        let offset = FixedOffset::east_opt(0).unwrap();
        store
            .add(Meeting::new(
                "past",
                "d",
                (now - Duration::hours(3)).with_timezone(&offset),
                30,
                UserId(1),
            ))
            .unwrap();
        store
            .add(Meeting::new(
                "next",
                "d",
                (now + Duration::hours(3)).with_timezone(&offset),
                30,
                UserId(1),
            ))
            .unwrap();
        let board = BoardReconciler::new(
            store,
            MeetingLayout,
            platform.clone(),
            Arc::new(FixedClock::at(now)),
        );
        let channel = board.configure(GUILD).await.unwrap().channel;
        board.refresh(GUILD).await.unwrap();
        assert_eq!(
            platform.posted_titles(channel),
            vec!["📅 Meetings Dashboard".to_owned(), "📅 next".to_owned()]
        );
    }

    #[tokio::test]
    async fn meeting_board_counts_voice_members_when_readable() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::new());
        platform.add_guild(GUILD);
        let voice = platform.add_channel(GUILD);
        platform.set_voice_members(voice, vec![UserId(4), UserId(5)]);
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let store = Arc::new(MeetingStore::open(dir.path().join("meetings.json")).unwrap());
        let mut meeting = Meeting::new(
            "standup",
            "d",
            (now + Duration::minutes(10)).with_timezone(&FixedOffset::east_opt(0).unwrap()),
            15,
            UserId(1),
        );
        meeting.channel_id = Some(voice);
        store.add(meeting).unwrap();
        let board = BoardReconciler::new(
            store,
            MeetingLayout,
            platform.clone(),
            Arc::new(FixedClock::at(now)),
        );
        let channel = board.configure(GUILD).await.unwrap().channel;

        let occupancy = |platform: &FakePlatform| {
            platform.posted_blocks(channel)[1]
                .fields
                .iter()
                .find(|f| f.name == "👥 Current Participants")
                .map(|f| f.value.clone())
        };
        board.refresh(GUILD).await.unwrap();
        assert_eq!(
            occupancy(&platform).as_deref(),
            Some("2 member(s) in channel")
        );

        platform.fail(
            FakeOp::VoiceMembers,
            PlatformError::Unavailable("cache cold".to_owned()),
        );
        board.refresh(GUILD).await.unwrap();
        assert_eq!(occupancy(&platform), None);
    }
}
