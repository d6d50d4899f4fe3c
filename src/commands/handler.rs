//! Executes parsed commands and builds the reply.
//!
//! Each command is a thin adapter: call one manager operation, refresh the
//! boards it touched, and render the result. User-facing errors are shown
//! verbatim; everything else is logged and replaced with a generic notice.

use super::Command;
use crate::board::{
    Block, Boards, COLOR_BLUE, COLOR_GREEN, COLOR_RED, Control, OldChannel, RefreshOutcome,
    split_oversized,
};
use crate::clock::Clock;
use crate::error::{BoardError, Result};
use crate::manager::{MeetingDraft, MeetingManager, TaskManager};
use crate::model::{GuildId, RsvpResponse, TaskStatus, UserId, mention_list};
use crate::platform::{ChatPlatform, Interaction, Reply, Response};
use crate::store::{MeetingStore, TaskStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Discord shows at most this many embeds in one message.
const MAX_REPLY_BLOCKS: usize = 10;

const NO_VALID_MENTIONS: &str =
    "No valid users mentioned. Please mention users with @username or use @everyone.";

const HELP_ENTRIES: [(&str, &str); 13] = [
    ("/setup", "Create the task board and meeting dashboard channels (Admin only)"),
    ("/create", "Create a new task with title, description, and optional due date"),
    ("/assign", "Assign users to a task using their @mentions"),
    ("/update", "Update task status using buttons"),
    ("/thread", "Create a discussion thread for a task"),
    ("/delete_thread", "Delete a task's discussion thread (thread creator only)"),
    ("/delete", "Delete a task"),
    ("/info", "Get detailed information about a task"),
    ("/list", "List all tasks assigned to you"),
    ("/create_meeting", "Schedule a meeting; participants can RSVP on the dashboard"),
    ("/delete_meeting", "Cancel a meeting (organizer or admin)"),
    ("/reset_data", "Delete all tasks, meetings, and board channels (Admin only)"),
    ("/help", "Show this help message"),
];

pub struct CommandHandler {
    tasks: Arc<TaskManager>,
    meetings: Arc<MeetingManager>,
    task_store: Arc<TaskStore>,
    meeting_store: Arc<MeetingStore>,
    boards: Boards,
    platform: Arc<dyn ChatPlatform>,
    clock: Arc<dyn Clock>,
}

impl CommandHandler {
    #[must_use]
    pub fn new(
        tasks: Arc<TaskManager>,
        meetings: Arc<MeetingManager>,
        task_store: Arc<TaskStore>,
        meeting_store: Arc<MeetingStore>,
        boards: Boards,
        platform: Arc<dyn ChatPlatform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks,
            meetings,
            task_store,
            meeting_store,
            boards,
            platform,
            clock,
        }
    }

    /// Parse and run an interaction. Never fails: errors become replies.
    /// Header buttons are answered with their form.
    pub async fn handle(&self, interaction: &Interaction) -> Response {
        match Command::parse(interaction) {
            Ok(Command::OpenForm(form)) => Response::Modal(form.modal()),
            parsed => Response::Reply(self.answer(parsed, interaction).await),
        }
    }

    /// Reply to an interaction whose parse result is already known.
    pub async fn answer(&self, parsed: Result<Command>, interaction: &Interaction) -> Reply {
        match parsed {
            Ok(command) => self.execute(command, interaction).await,
            Err(e) => error_reply(&e),
        }
    }

    /// Run an already-parsed command on behalf of `ctx`.
    pub async fn execute(&self, command: Command, ctx: &Interaction) -> Reply {
        let name = command.name();
        if command.admin_only() && !ctx.is_admin() {
            return Reply::text("❌ You need administrator permissions to use this command.");
        }
        debug!("/{name} from user {}", ctx.user);
        match self.dispatch(command, ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_user_facing() {
                    debug!("/{name} rejected: {e}");
                } else {
                    error!("/{name} failed: {e}");
                }
                error_reply(&e)
            }
        }
    }

    async fn dispatch(&self, command: Command, ctx: &Interaction) -> Result<Reply> {
        match command {
            Command::Setup => self.setup(guild_of(ctx)?).await,
            Command::ResetData => self.reset_data(guild_of(ctx)?).await,
            Command::Help => Ok(help()),
            Command::List => Ok(self.list(ctx.user)),
            Command::CreateTask {
                title,
                description,
                due_date,
            } => {
                let task = self.tasks.create(&title, &description, due_date.as_deref())?;
                let mut block = Block::new("✅ Task Created", COLOR_GREEN)
                    .description(format!("Task #{} has been created successfully", task.id))
                    .field("Title", task.title.clone(), false)
                    .field("Description", task.description.clone(), false);
                if let Some(due) = task.due_date {
                    block = block.field("Due Date", due.format("%Y-%m-%d").to_string(), false);
                }
                self.refresh_tasks(ctx).await;
                Ok(Reply::block(block))
            }
            Command::Assign { task_id, users } => {
                let users = self.assignees(guild_of(ctx)?, &users).await?;
                let task = self.tasks.assign(task_id, &users)?;
                self.refresh_tasks(ctx).await;
                Ok(Reply::block(
                    Block::new("👥 Task Assigned", COLOR_BLUE)
                        .description(format!("Task #{task_id} has been assigned to users"))
                        .field("Assigned Users", mention_list(&task.assigned_users, "-"), false),
                ))
            }
            Command::Update { task_id } => {
                let task = self.tasks.get(task_id)?;
                Ok(Reply::block(
                    Block::new("🔄 Update Task Status", COLOR_BLUE)
                        .description(format!(
                            "Select the new status for Task #{task_id}:\n**{}**",
                            task.title
                        ))
                        .field(
                            "Current Status",
                            format!("{} {}", task.status.emoji(), task.status.label()),
                            false,
                        ),
                )
                .with_controls(Control::status_picker(task_id)))
            }
            Command::SetStatus { task_id, status } => {
                self.tasks.update_status(task_id, status).await?;
                self.refresh_tasks(ctx).await;
                Ok(Reply::block(Block::new("🔄 Task Updated", status.color()).description(
                    format!(
                        "Task #{task_id} status has been updated to {}",
                        status.label()
                    ),
                )))
            }
            Command::Delete { task_id } => {
                let task = self.tasks.delete(task_id).await?;
                self.refresh_tasks(ctx).await;
                Ok(Reply::block(
                    Block::new("🗑️ Task Deleted", COLOR_RED)
                        .description(format!("Task #{task_id} has been deleted"))
                        .field("Title", task.title, false),
                ))
            }
            Command::Thread { task_id } => {
                let thread = self.tasks.threads().create_thread(task_id, ctx.user).await?;
                self.refresh_tasks(ctx).await;
                Ok(Reply::text(format!(
                    "✅ Thread created successfully: {}",
                    thread.mention()
                )))
            }
            Command::DeleteThread { task_id } => {
                self.tasks.threads().delete_thread(task_id, ctx.user).await?;
                self.refresh_tasks(ctx).await;
                Ok(Reply::text("✅ Thread deleted successfully"))
            }
            Command::Info { task_id } => {
                // Verification may clear a stale thread binding, so read the
                // task after it.
                self.tasks.thread_state(task_id).await?;
                let task = self.tasks.get(task_id)?;
                let block = self.boards.tasks.layout().detail(&task, self.clock.now());
                Ok(Reply::block(block))
            }
            Command::CreateMeeting {
                title,
                description,
                start_time,
                duration,
                participants,
                voice_channel,
            } => {
                let participants = match participants.as_deref() {
                    Some(raw) if !raw.trim().is_empty() => {
                        self.participants(guild_of(ctx)?, raw).await?
                    }
                    _ => Vec::new(),
                };
                let meeting = self.meetings.create(MeetingDraft {
                    title,
                    description,
                    start_time,
                    duration_minutes: duration,
                    participants,
                    channel_id: voice_channel,
                    created_by: ctx.user,
                })?;

                let mut block = Block::new("✅ Meeting Scheduled", COLOR_GREEN)
                    .description("Meeting has been scheduled successfully")
                    .field("Title", meeting.title.clone(), false);
                if !meeting.description.is_empty() {
                    block = block.field("Description", meeting.description.clone(), false);
                }
                block = block
                    .field(
                        "📅 Date & Time",
                        meeting.start_time.format("%Y-%m-%d %H:%M").to_string(),
                        true,
                    )
                    .field(
                        "⏱️ Duration",
                        format!("{} minutes", meeting.duration_minutes),
                        true,
                    );
                if let Some(channel) = meeting.channel_id {
                    block = block.field("🔊 Voice Channel", channel.mention(), false);
                }
                block = block
                    .field(
                        "👥 Participants",
                        mention_list(&meeting.participants, "@everyone"),
                        false,
                    )
                    .footer(format!("Meeting #{}", meeting.id));

                let mut reply = Reply::block(block).public();
                if !self.refresh_meetings(ctx).await {
                    reply.content = Some(
                        "Meeting was created, but there was an error updating the board. \
                         An admin may need to check the permissions."
                            .to_owned(),
                    );
                }
                Ok(reply)
            }
            Command::DeleteMeeting { meeting_id } => {
                let meeting = self.meetings.get(meeting_id)?;
                if meeting.created_by != ctx.user && !ctx.is_admin() {
                    return Err(BoardError::PermissionDenied(
                        "Only the organizer or an admin can cancel this meeting".to_owned(),
                    ));
                }
                let meeting = self.meetings.delete(meeting_id)?;
                self.refresh_meetings(ctx).await;
                Ok(Reply::block(
                    Block::new("🗑️ Meeting Cancelled", COLOR_RED)
                        .description(format!("Meeting #{meeting_id} has been cancelled"))
                        .field("Title", meeting.title, false),
                ))
            }
            Command::Rsvp {
                meeting_id,
                response,
            } => {
                self.meetings.rsvp(meeting_id, ctx.user, response)?;
                self.refresh_meetings(ctx).await;
                Ok(Reply::text(rsvp_ack(response)))
            }
            Command::OpenForm(_) => Err(BoardError::Validation(
                "Forms can only be opened from the board buttons".to_owned(),
            )),
        }
    }

    /// Non-bot members of `guild`.
    async fn humans(&self, guild: GuildId) -> Result<BTreeSet<UserId>> {
        let members = self.platform.guild_members(guild).await?;
        Ok(members.into_iter().filter(|m| !m.bot).map(|m| m.id).collect())
    }

    /// Users to assign: `@everyone`/`@here` expands to every human member,
    /// explicit mentions keep only human members.
    async fn assignees(&self, guild: GuildId, raw: &str) -> Result<Vec<UserId>> {
        let mentions = parse_mentions(raw);
        let humans = self.humans(guild).await?;
        let users: Vec<UserId> = if mentions.everyone {
            humans.into_iter().collect()
        } else {
            mentions
                .users
                .into_iter()
                .filter(|u| humans.contains(u))
                .collect()
        };
        if users.is_empty() {
            return Err(BoardError::Validation(NO_VALID_MENTIONS.to_owned()));
        }
        Ok(users)
    }

    /// Meeting invitees. `@everyone`/`@here` leaves the list empty, which
    /// invites everyone.
    async fn participants(&self, guild: GuildId, raw: &str) -> Result<Vec<UserId>> {
        let mentions = parse_mentions(raw);
        if mentions.everyone {
            return Ok(Vec::new());
        }
        let humans = self.humans(guild).await?;
        let users: Vec<UserId> = mentions
            .users
            .into_iter()
            .filter(|u| humans.contains(u))
            .collect();
        if users.is_empty() {
            return Err(BoardError::Validation(NO_VALID_MENTIONS.to_owned()));
        }
        Ok(users)
    }

    async fn setup(&self, guild: GuildId) -> Result<Reply> {
        let tasks = self.boards.tasks.configure(guild).await?;
        let meetings = self.boards.meetings.configure(guild).await?;
        info!(
            "boards set up in guild {guild}: tasks {}, meetings {}",
            tasks.channel, meetings.channel
        );

        let mut block = Block::new("✅ Setup Complete", COLOR_GREEN)
            .description("Task and meeting management channels have been created.")
            .field("📋 Task Board", tasks.channel.mention(), true)
            .field("📅 Meeting Dashboard", meetings.channel.mention(), true);
        let leftovers: Vec<String> = [tasks.old, meetings.old]
            .into_iter()
            .filter_map(|old| match old {
                OldChannel::DeleteForbidden(channel) => Some(channel.mention()),
                _ => None,
            })
            .collect();
        if !leftovers.is_empty() {
            block = block.field(
                "⚠️ Old Channels Kept",
                format!(
                    "I could not delete {}; remove them manually.",
                    leftovers.join(", ")
                ),
                false,
            );
        }

        self.boards.refresh_all(guild).await;
        Ok(Reply::block(block))
    }

    async fn reset_data(&self, guild: GuildId) -> Result<Reply> {
        let mut deleted = Vec::new();
        if self.boards.tasks.teardown(guild).await?.is_some() {
            deleted.push("✅ Task Board");
        }
        if self.boards.meetings.teardown(guild).await?.is_some() {
            deleted.push("✅ Meeting Dashboard");
        }

        for task in self.task_store.all() {
            if let Some(binding) = task.thread {
                self.tasks.threads().retire(binding).await;
            }
        }
        self.task_store.reset()?;
        self.meeting_store.reset()?;
        warn!("all task and meeting data reset in guild {guild}");

        let mut block = Block::new("🗑️ Data Reset Complete", COLOR_RED)
            .description("All data has been cleared and reset.");
        if !deleted.is_empty() {
            block = block.field("Deleted Channels", deleted.join("\n"), false);
        }
        Ok(Reply::block(
            block
                .field(
                    "Deleted Data",
                    "✅ All tasks\n✅ All meetings\n✅ Task threads",
                    false,
                )
                .footer("Use /setup to create new channels"),
        ))
    }

    fn list(&self, user: UserId) -> Reply {
        let tasks = self.tasks.list_for(user);
        if tasks.is_empty() {
            return Reply::text("📝 You have no tasks assigned to you.");
        }
        let mut blocks = vec![
            Block::new("📋 Your Task List", COLOR_BLUE).description("Tasks assigned to you"),
        ];
        blocks.extend(split_oversized(self.boards.tasks.layout().personal(
            &tasks,
            user,
            self.clock.now(),
        )));
        if blocks.len() > MAX_REPLY_BLOCKS {
            blocks.truncate(MAX_REPLY_BLOCKS);
            if let Some(last) = blocks.last_mut() {
                last.footer = Some("More tasks are listed on the task board".to_owned());
            }
        }
        Reply {
            content: None,
            blocks,
            controls: Vec::new(),
            ephemeral: true,
        }
    }

    async fn refresh_tasks(&self, ctx: &Interaction) -> bool {
        let Some(guild) = ctx.guild_id else {
            return true;
        };
        log_refresh("task", guild, self.boards.tasks.refresh(guild).await)
    }

    async fn refresh_meetings(&self, ctx: &Interaction) -> bool {
        let Some(guild) = ctx.guild_id else {
            return true;
        };
        log_refresh("meeting", guild, self.boards.meetings.refresh(guild).await)
    }
}

fn log_refresh(kind: &str, guild: GuildId, result: Result<RefreshOutcome>) -> bool {
    match result {
        Ok(outcome) => {
            debug!("{kind} board refresh in guild {guild}: {outcome:?}");
            true
        }
        Err(e) => {
            warn!("{kind} board refresh failed in guild {guild}: {e}");
            false
        }
    }
}

fn guild_of(ctx: &Interaction) -> Result<GuildId> {
    ctx.guild_id.ok_or_else(|| {
        BoardError::Validation("This command can only be used in a server".to_owned())
    })
}

/// Mentions as typed, before membership is checked.
#[derive(Debug, Default, PartialEq, Eq)]
struct Mentions {
    /// `@everyone` or `@here` appeared.
    everyone: bool,
    /// Explicit users in first-mention order, without duplicates.
    users: Vec<UserId>,
}

fn parse_mentions(raw: &str) -> Mentions {
    let mut mentions = Mentions::default();
    for token in raw.split_whitespace() {
        if matches!(token, "@everyone" | "@here") {
            mentions.everyone = true;
        } else if let Some(user) = UserId::from_mention(token) {
            if !mentions.users.contains(&user) {
                mentions.users.push(user);
            }
        }
    }
    mentions
}

fn rsvp_ack(response: RsvpResponse) -> String {
    format!("Your response ({}) has been recorded!", response.key())
}

fn help() -> Reply {
    let mut block = Block::new("📚 Task Manager Bot Commands", COLOR_BLUE)
        .description("Here are all the available slash commands:");
    for (name, text) in HELP_ENTRIES {
        block = block.field(name, text, false);
    }
    let statuses = TaskStatus::ALL
        .iter()
        .map(|s| format!("{} {}", s.emoji(), s.label()))
        .collect::<Vec<_>>()
        .join("\n");
    Reply::block(block.field("Task Statuses", statuses, false))
}

fn error_reply(err: &BoardError) -> Reply {
    Reply::text(format!("❌ {}", err.user_message()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::board::{BoardReconciler, MeetingLayout, TaskLayout};
    use crate::model::{ChannelId, TaskStatus};
    use crate::commands::Form;
    use crate::platform::{CommandOption, InteractionKind, OptionValue, PlatformError};
    use crate::test_utils::{FakeCall, FakeOp, FakePlatform, FixedClock};
    use crate::threads::ThreadManager;
    use chrono::{FixedOffset, TimeZone, Utc};

    const GUILD: GuildId = GuildId(1);
    const ADMIN: u64 = 1 << 3;
    const BOT: UserId = UserId(50);

    struct Fixture {
        _dir: tempfile::TempDir,
        platform: Arc<FakePlatform>,
        task_store: Arc<TaskStore>,
        meeting_store: Arc<MeetingStore>,
        handler: CommandHandler,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::new());
        platform.add_guild(GUILD);
        for user in 5..=9 {
            platform.add_member(GUILD, UserId(user), false);
        }
        platform.add_member(GUILD, BOT, true);
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let offset = FixedOffset::east_opt(3600).unwrap();
        let task_store = Arc::new(TaskStore::open(dir.path().join("tasks.json")).unwrap());
        let meeting_store = Arc::new(MeetingStore::open(dir.path().join("meetings.json")).unwrap());
        let threads = Arc::new(ThreadManager::new(Arc::clone(&task_store), platform.clone()));
        let boards = Boards {
            tasks: Arc::new(
                BoardReconciler::new(
                    Arc::clone(&task_store),
                    TaskLayout::new(5, offset),
                    platform.clone(),
                    Arc::clone(&clock),
                )
                .with_hook(threads.clone()),
            ),
            meetings: Arc::new(BoardReconciler::new(
                Arc::clone(&meeting_store),
                MeetingLayout,
                platform.clone(),
                Arc::clone(&clock),
            )),
        };
        let handler = CommandHandler::new(
            Arc::new(TaskManager::new(Arc::clone(&task_store), threads, Arc::clone(&clock))),
            Arc::new(MeetingManager::new(Arc::clone(&meeting_store), Arc::clone(&clock), offset)),
            Arc::clone(&task_store),
            Arc::clone(&meeting_store),
            boards,
            platform.clone(),
            clock,
        );
        Fixture {
            _dir: dir,
            platform,
            task_store,
            meeting_store,
            handler,
        }
    }

    fn ctx(user: u64, permissions: u64) -> Interaction {
        Interaction {
            id: "1".to_owned(),
            token: "tok".to_owned(),
            application_id: "99".to_owned(),
            guild_id: Some(GUILD),
            channel_id: Some(ChannelId(500)),
            user: UserId(user),
            permissions,
            kind: InteractionKind::Command {
                name: String::new(),
                options: Vec::new(),
            },
        }
    }

    fn slash(user: u64, name: &str, options: Vec<(&str, OptionValue)>) -> Interaction {
        let mut i = ctx(user, 0);
        i.kind = InteractionKind::Command {
            name: name.to_owned(),
            options: options
                .into_iter()
                .map(|(n, value)| CommandOption {
                    name: n.to_owned(),
                    value,
                })
                .collect(),
        };
        i
    }

    fn text(s: &str) -> OptionValue {
        OptionValue::String(s.to_owned())
    }

    fn content(reply: &Reply) -> &str {
        reply.content.as_deref().unwrap_or_default()
    }

    impl Fixture {
        async fn reply(&self, interaction: &Interaction) -> Reply {
            match self.handler.handle(interaction).await {
                Response::Reply(reply) => reply,
                Response::Modal(modal) => panic!("expected a reply, got {modal:?}"),
            }
        }

        async fn create_task(&self) {
            self.handler
                .execute(
                    Command::CreateTask {
                        title: "t".to_owned(),
                        description: "d".to_owned(),
                        due_date: None,
                    },
                    &ctx(5, 0),
                )
                .await;
        }
    }

    #[tokio::test]
    async fn setup_requires_admin() {
        let f = fixture();
        let reply = f.handler.execute(Command::Setup, &ctx(5, 0)).await;
        assert_eq!(
            content(&reply),
            "❌ You need administrator permissions to use this command."
        );
        assert!(f.platform.created_channels().is_empty());
    }

    #[tokio::test]
    async fn setup_creates_and_renders_both_boards() {
        let f = fixture();
        let reply = f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;
        assert_eq!(reply.blocks[0].title, "✅ Setup Complete");

        let task_board = f.task_store.board_channel().unwrap();
        let meeting_board = f.meeting_store.board_channel().unwrap();
        assert_eq!(f.platform.posted_titles(task_board).len(), 6);
        assert_eq!(
            f.platform.posted_titles(meeting_board)[0],
            "📅 Meetings Dashboard"
        );
    }

    #[tokio::test]
    async fn create_then_list_then_info() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;

        let reply = f
            .reply(&slash(
                5,
                "create",
                vec![("title", text("Ship v1")), ("description", text("release"))],
            ))
            .await;
        assert_eq!(reply.blocks[0].title, "✅ Task Created");

        let reply = f.reply(&slash(5, "list", vec![])).await;
        assert_eq!(content(&reply), "📝 You have no tasks assigned to you.");

        f.reply(&slash(
            5,
            "assign",
            vec![
                ("task_id", OptionValue::Integer(1)),
                ("users", text("<@5> <@!6> <@5>")),
            ],
        ))
        .await;
        assert_eq!(
            f.task_store.get(1).unwrap().assigned_users,
            vec![UserId(5), UserId(6)]
        );

        let reply = f.reply(&slash(5, "list", vec![])).await;
        assert_eq!(reply.blocks[0].title, "📋 Your Task List");
        assert!(reply.blocks[1].title.contains("Your Not Started Tasks (1)"));

        let reply = f
            .reply(&slash(5, "info", vec![("task_id", OptionValue::Integer(1))]))
            .await;
        assert_eq!(reply.blocks[0].title, "Task Details: Ship v1");
    }

    #[tokio::test]
    async fn validation_errors_are_shown_without_mutation() {
        let f = fixture();
        let reply = f
            .reply(&slash(
                5,
                "create",
                vec![
                    ("title", text("t")),
                    ("description", text("d")),
                    ("due_date", text("31/12")),
                ],
            ))
            .await;
        assert_eq!(
            content(&reply),
            "❌ Invalid date format. Please use DD-MM-YYYY"
        );
        assert!(f.task_store.is_empty());

        let reply = f
            .reply(&slash(5, "delete", vec![("task_id", OptionValue::Integer(42))]))
            .await;
        assert_eq!(content(&reply), "❌ Task #42 not found");
    }

    #[tokio::test]
    async fn assigning_everyone_expands_to_human_members() {
        let f = fixture();
        f.create_task().await;
        let reply = f
            .handler
            .execute(
                Command::Assign {
                    task_id: 1,
                    users: "@everyone".to_owned(),
                },
                &ctx(5, 0),
            )
            .await;
        assert_eq!(reply.blocks[0].title, "👥 Task Assigned");
        assert_eq!(
            f.task_store.get(1).unwrap().assigned_users,
            (5..=9).map(UserId).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn bots_and_strangers_are_dropped_from_mentions() {
        let f = fixture();
        f.create_task().await;
        let assign = |users: &str| Command::Assign {
            task_id: 1,
            users: users.to_owned(),
        };

        let reply = f
            .handler
            .execute(assign(&format!("{} <@404>", BOT.mention())), &ctx(5, 0))
            .await;
        assert_eq!(content(&reply), format!("❌ {NO_VALID_MENTIONS}"));
        assert!(f.task_store.get(1).unwrap().assigned_users.is_empty());

        f.handler
            .execute(assign(&format!("<@7> {} <@404>", BOT.mention())), &ctx(5, 0))
            .await;
        assert_eq!(f.task_store.get(1).unwrap().assigned_users, vec![UserId(7)]);
    }

    #[tokio::test]
    async fn member_lookup_failure_leaves_task_untouched() {
        let f = fixture();
        f.create_task().await;
        f.platform.fail(
            FakeOp::GuildMembers,
            PlatformError::Unavailable("gateway down".to_owned()),
        );
        let reply = f
            .handler
            .execute(
                Command::Assign {
                    task_id: 1,
                    users: "<@5>".to_owned(),
                },
                &ctx(5, 0),
            )
            .await;
        assert!(content(&reply).starts_with("❌ "));
        assert!(f.task_store.get(1).unwrap().assigned_users.is_empty());
    }

    #[tokio::test]
    async fn create_button_opens_form_and_submission_creates_task() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;

        let mut press = ctx(5, 0);
        press.kind = InteractionKind::Component {
            custom_id: "create_task".to_owned(),
        };
        let Response::Modal(modal) = f.handler.handle(&press).await else {
            panic!("expected the task form");
        };
        assert_eq!(modal, Form::Task.modal());

        let mut submit = ctx(5, 0);
        submit.kind = InteractionKind::ModalSubmit {
            custom_id: modal.custom_id,
            fields: vec![
                ("title".to_owned(), "Ship v1".to_owned()),
                ("description".to_owned(), "release".to_owned()),
                ("due_date".to_owned(), "30-06-2025".to_owned()),
            ],
        };
        let reply = f.reply(&submit).await;
        assert_eq!(reply.blocks[0].title, "✅ Task Created");
        let task = f.task_store.get(1).unwrap();
        assert_eq!(task.title, "Ship v1");
        assert!(task.due_date.is_some());

        let board = f.task_store.board_channel().unwrap();
        assert!(
            f.platform
                .posted_titles(board)
                .contains(&"🆕 Not Started (1)".to_owned())
        );
    }

    #[tokio::test]
    async fn meeting_form_submission_schedules_meeting() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;

        let mut submit = ctx(5, 0);
        submit.kind = InteractionKind::ModalSubmit {
            custom_id: Form::Meeting.custom_id().to_owned(),
            fields: vec![
                ("title".to_owned(), "Sync".to_owned()),
                ("start_time".to_owned(), "02-06-2025 10:00".to_owned()),
                ("duration".to_owned(), "30".to_owned()),
                ("participants".to_owned(), "<@7> 8".to_owned()),
                ("voice_channel".to_owned(), String::new()),
            ],
        };
        let reply = f.reply(&submit).await;
        assert_eq!(reply.blocks[0].title, "✅ Meeting Scheduled");
        assert_eq!(
            f.meeting_store.get(1).unwrap().participants,
            vec![UserId(7), UserId(8)]
        );
        let board = f.meeting_store.board_channel().unwrap();
        assert!(f.platform.posted_titles(board).contains(&"📅 Sync".to_owned()));
    }

    #[tokio::test]
    async fn status_buttons_update_the_board() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;
        f.handler
            .execute(
                Command::CreateTask {
                    title: "t".to_owned(),
                    description: "d".to_owned(),
                    due_date: None,
                },
                &ctx(5, 0),
            )
            .await;

        let picker = f.handler.execute(Command::Update { task_id: 1 }, &ctx(5, 0)).await;
        assert_eq!(picker.controls.len(), 5);
        assert_eq!(picker.controls[1].custom_id(), "status:1:in_progress");

        let mut press = ctx(5, 0);
        press.kind = InteractionKind::Component {
            custom_id: "status:1:in_progress".to_owned(),
        };
        let reply = f.reply(&press).await;
        assert_eq!(reply.blocks[0].title, "🔄 Task Updated");
        assert_eq!(f.task_store.get(1).unwrap().status, TaskStatus::InProgress);

        let board = f.task_store.board_channel().unwrap();
        assert!(
            f.platform
                .posted_titles(board)
                .contains(&"⏳ In Progress (1)".to_owned())
        );
    }

    #[tokio::test]
    async fn thread_commands_round_trip() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;
        f.handler
            .execute(
                Command::CreateTask {
                    title: "t".to_owned(),
                    description: "d".to_owned(),
                    due_date: None,
                },
                &ctx(5, 0),
            )
            .await;

        let reply = f.handler.execute(Command::Thread { task_id: 1 }, &ctx(5, 0)).await;
        assert_eq!(
            content(&reply),
            "❌ Task must have at least one assigned user to create a thread"
        );

        f.handler
            .execute(
                Command::Assign {
                    task_id: 1,
                    users: "<@5>".to_owned(),
                },
                &ctx(5, 0),
            )
            .await;
        let reply = f.handler.execute(Command::Thread { task_id: 1 }, &ctx(5, 0)).await;
        assert!(content(&reply).starts_with("✅ Thread created successfully: <#"));

        let reply = f
            .handler
            .execute(Command::DeleteThread { task_id: 1 }, &ctx(6, 0))
            .await;
        assert_eq!(
            content(&reply),
            "❌ Only the thread creator can delete the thread"
        );

        let reply = f
            .handler
            .execute(Command::DeleteThread { task_id: 1 }, &ctx(5, 0))
            .await;
        assert_eq!(content(&reply), "✅ Thread deleted successfully");
        assert!(f.task_store.get(1).unwrap().thread.is_none());
    }

    #[tokio::test]
    async fn meeting_flow_with_rsvp() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;

        let reply = f
            .reply(&slash(
                5,
                "create_meeting",
                vec![
                    ("title", text("Sync")),
                    ("start_time", text("02-06-2025 10:00")),
                    ("duration", OptionValue::Integer(30)),
                    ("participants", text("<@7> <@8>")),
                ],
            ))
            .await;
        assert_eq!(reply.blocks[0].title, "✅ Meeting Scheduled");
        assert!(!reply.ephemeral);
        assert!(reply.content.is_none());

        let mut press = ctx(7, 0);
        press.kind = InteractionKind::Component {
            custom_id: "rsvp:1:yes".to_owned(),
        };
        let reply = f.reply(&press).await;
        assert_eq!(content(&reply), "Your response (yes) has been recorded!");

        let mut outsider = ctx(9, 0);
        outsider.kind = press.kind.clone();
        let reply = f.reply(&outsider).await;
        assert_eq!(content(&reply), "❌ You are not invited to this meeting");
        assert_eq!(f.meeting_store.get(1).unwrap().rsvp_status.len(), 1);

        let reply = f
            .handler
            .execute(Command::DeleteMeeting { meeting_id: 1 }, &ctx(7, 0))
            .await;
        assert!(content(&reply).starts_with("❌ Only the organizer"));
        let reply = f
            .handler
            .execute(Command::DeleteMeeting { meeting_id: 1 }, &ctx(5, 0))
            .await;
        assert_eq!(reply.blocks[0].title, "🗑️ Meeting Cancelled");
        assert!(f.meeting_store.is_empty());
    }

    #[tokio::test]
    async fn board_failure_is_reported_after_meeting_creation() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;
        f.platform
            .fail(FakeOp::PostBlock, PlatformError::Forbidden("no".to_owned()));

        let reply = f
            .handler
            .execute(
                Command::CreateMeeting {
                    title: "Sync".to_owned(),
                    description: String::new(),
                    start_time: "02-06-2025 10:00".to_owned(),
                    duration: 30,
                    participants: None,
                    voice_channel: None,
                },
                &ctx(5, 0),
            )
            .await;
        assert_eq!(reply.blocks[0].title, "✅ Meeting Scheduled");
        assert!(content(&reply).starts_with("Meeting was created"));
        assert_eq!(f.meeting_store.len(), 1);
    }

    #[tokio::test]
    async fn internal_errors_stay_generic() {
        let f = fixture();
        f.platform.fail(
            FakeOp::CreateChannel,
            PlatformError::Unavailable("socket reset by 10.0.0.7".to_owned()),
        );
        let reply = f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;
        assert_eq!(
            content(&reply),
            "❌ Something went wrong while processing your request."
        );
    }

    #[tokio::test]
    async fn reset_wipes_everything() {
        let f = fixture();
        f.handler.execute(Command::Setup, &ctx(5, ADMIN)).await;
        f.handler
            .execute(
                Command::CreateTask {
                    title: "t".to_owned(),
                    description: "d".to_owned(),
                    due_date: None,
                },
                &ctx(5, 0),
            )
            .await;
        f.handler
            .execute(
                Command::Assign {
                    task_id: 1,
                    users: "<@5>".to_owned(),
                },
                &ctx(5, 0),
            )
            .await;
        f.handler.execute(Command::Thread { task_id: 1 }, &ctx(5, 0)).await;
        let thread = f.task_store.get(1).unwrap().thread.unwrap().thread_id;
        let boards = (
            f.task_store.board_channel().unwrap(),
            f.meeting_store.board_channel().unwrap(),
        );

        let reply = f.handler.execute(Command::ResetData, &ctx(5, ADMIN)).await;
        assert_eq!(reply.blocks[0].title, "🗑️ Data Reset Complete");
        assert!(f.task_store.is_empty());
        assert!(f.task_store.board_channel().is_none());
        assert!(f.meeting_store.board_channel().is_none());
        assert!(!f.platform.has_channel(thread));
        assert!(!f.platform.has_channel(boards.0));
        assert!(!f.platform.has_channel(boards.1));
        assert!(f
            .platform
            .calls()
            .contains(&FakeCall::DeleteChannel(boards.0)));
    }

    #[test]
    fn mentions_parse_and_dedupe() {
        assert_eq!(
            parse_mentions("<@1> <@!2> junk <@1>"),
            Mentions {
                everyone: false,
                users: vec![UserId(1), UserId(2)],
            }
        );
        assert!(parse_mentions("@here <@3>").everyone);
        assert_eq!(parse_mentions("nobody"), Mentions::default());
    }

    #[tokio::test]
    async fn everyone_invites_the_whole_server_to_a_meeting() {
        let f = fixture();
        let reply = f
            .handler
            .execute(
                Command::CreateMeeting {
                    title: "All hands".to_owned(),
                    description: String::new(),
                    start_time: "02-06-2025 10:00".to_owned(),
                    duration: 30,
                    participants: Some("@everyone".to_owned()),
                    voice_channel: None,
                },
                &ctx(5, 0),
            )
            .await;
        assert_eq!(reply.blocks[0].title, "✅ Meeting Scheduled");
        assert!(f.meeting_store.get(1).unwrap().participants.is_empty());
    }

    #[test]
    fn help_lists_commands_and_statuses() {
        let reply = help();
        let block = &reply.blocks[0];
        assert_eq!(block.fields.len(), HELP_ENTRIES.len() + 1);
        assert!(block.fields.last().unwrap().value.contains("Completed"));
    }
}
