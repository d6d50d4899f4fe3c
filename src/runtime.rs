//! Bot runtime: builds every component, keeps the gateway session alive, and
//! routes inbound events.

use crate::board::{BoardReconciler, Boards, MeetingLayout, TaskLayout};
use crate::clock::{Clock, SystemClock};
use crate::commands::{Command, CommandHandler, command_definitions};
use crate::config::{BotConfig, ConnectionConfig};
use crate::error::{BoardError, Result};
use crate::manager::{MeetingManager, TaskManager};
use crate::model::{ChannelId, UserId};
use crate::platform::gateway::{GatewayConnection, SessionEnd};
use crate::platform::{
    ChannelMessage, ChatPlatform, DiscordPlatform, DiscordRest, GatewayCache, GatewaySession,
    InboundEvent, Interaction, ReadyGate,
};
use crate::scheduler::{MeetingScheduler, SchedulerSettings};
use crate::store::{MeetingStore, TaskStore};
use crate::threads::ThreadManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long the "use slash commands" notice stays in a board channel.
const NOTICE_TTL: Duration = Duration::from_secs(5);
const INBOUND_QUEUE: usize = 64;
const MAX_RECONNECT_BACKOFF_SECS: u64 = 60;

/// Everything the bot needs to answer events, independent of the transport.
pub struct Components {
    pub task_store: Arc<TaskStore>,
    pub meeting_store: Arc<MeetingStore>,
    pub boards: Boards,
    pub tasks: Arc<TaskManager>,
    pub meetings: Arc<MeetingManager>,
    pub handler: Arc<CommandHandler>,
    pub scheduler: Arc<MeetingScheduler>,
    platform: Arc<dyn ChatPlatform>,
}

impl Components {
    /// Open the stores and wire managers, boards, commands, and scheduler.
    ///
    /// # Errors
    ///
    /// Fails when a store file cannot be created.
    pub fn build(
        config: &BotConfig,
        platform: Arc<dyn ChatPlatform>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let offset = config.schedule.utc_offset();
        let task_store = Arc::new(TaskStore::open(config.tasks_path())?);
        let meeting_store = Arc::new(MeetingStore::open(config.meetings_path())?);
        info!(
            "loaded {} task(s) and {} meeting(s) from {}",
            task_store.len(),
            meeting_store.len(),
            config.data_dir().display()
        );

        let threads = Arc::new(ThreadManager::new(
            Arc::clone(&task_store),
            Arc::clone(&platform),
        ));
        let boards = Boards {
            tasks: Arc::new(
                BoardReconciler::new(
                    Arc::clone(&task_store),
                    TaskLayout::new(config.board.tasks_per_block, offset),
                    Arc::clone(&platform),
                    Arc::clone(&clock),
                )
                .with_hook(threads.clone()),
            ),
            meetings: Arc::new(BoardReconciler::new(
                Arc::clone(&meeting_store),
                MeetingLayout,
                Arc::clone(&platform),
                Arc::clone(&clock),
            )),
        };

        let tasks = Arc::new(TaskManager::new(
            Arc::clone(&task_store),
            threads,
            Arc::clone(&clock),
        ));
        let meetings = Arc::new(MeetingManager::new(
            Arc::clone(&meeting_store),
            Arc::clone(&clock),
            offset,
        ));
        let handler = Arc::new(CommandHandler::new(
            Arc::clone(&tasks),
            Arc::clone(&meetings),
            Arc::clone(&task_store),
            Arc::clone(&meeting_store),
            boards.clone(),
            Arc::clone(&platform),
            Arc::clone(&clock),
        ));
        let scheduler = Arc::new(
            MeetingScheduler::new(
                Arc::clone(&meeting_store),
                Arc::clone(&platform),
                clock,
                SchedulerSettings::from(&config.schedule),
            )
            .with_boards(boards.clone()),
        );

        Ok(Self {
            task_store,
            meeting_store,
            boards,
            tasks,
            meetings,
            handler,
            scheduler,
            platform,
        })
    }

    /// React to one inbound event. `Ready` is handled by the caller, which
    /// owns the REST client used for command registration.
    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Ready { bot_user } => debug!("session ready as {bot_user}"),
            InboundEvent::GuildAvailable(guild) => {
                info!("guild {guild} available; restoring boards");
                self.boards.refresh_all(guild).await;
            }
            InboundEvent::GuildRemoved(guild) => info!("removed from guild {guild}"),
            InboundEvent::Interaction(interaction) => self.handle_interaction(&interaction).await,
            InboundEvent::Message(message) => self.guard_board_channel(&message).await,
        }
    }

    /// Forms must be the first answer, so header buttons skip the deferral.
    async fn handle_interaction(&self, interaction: &Interaction) {
        let parsed = match Command::parse(interaction) {
            Ok(Command::OpenForm(form)) => {
                if let Err(e) = self.platform.open_modal(interaction, &form.modal()).await {
                    warn!("could not open form for interaction {}: {e}", interaction.id);
                }
                return;
            }
            parsed => parsed,
        };
        let ephemeral = parsed.as_ref().map_or(true, Command::ephemeral);
        if let Err(e) = self.platform.defer_reply(interaction, ephemeral).await {
            warn!("could not acknowledge interaction {}: {e}", interaction.id);
            return;
        }
        let reply = self.handler.answer(parsed, interaction).await;
        if let Err(e) = self.platform.send_reply(interaction, &reply).await {
            warn!("could not deliver reply for interaction {}: {e}", interaction.id);
        }
    }

    fn is_board_channel(&self, channel: ChannelId) -> bool {
        self.task_store.board_channel() == Some(channel)
            || self.meeting_store.board_channel() == Some(channel)
    }

    /// Board channels only hold bot output; anything a member posts there is
    /// removed and answered with a short-lived notice.
    async fn guard_board_channel(&self, message: &ChannelMessage) {
        if message.author_is_bot || !self.is_board_channel(message.channel_id) {
            return;
        }
        if let Err(e) = self
            .platform
            .delete_message(message.channel_id, message.id)
            .await
        {
            warn!(
                "could not remove message {} from board channel {}: {e}",
                message.id, message.channel_id
            );
            return;
        }

        let notice = board_notice(message.author);
        match self.platform.send_message(message.channel_id, &notice).await {
            Ok(notice_id) => {
                let platform = Arc::clone(&self.platform);
                let channel = message.channel_id;
                tokio::spawn(async move {
                    tokio::time::sleep(NOTICE_TTL).await;
                    if let Err(e) = platform.delete_message(channel, notice_id).await {
                        debug!("board notice {notice_id} not removed: {e}");
                    }
                });
            }
            Err(e) => debug!("could not post board notice: {e}"),
        }
    }
}

fn board_notice(user: UserId) -> String {
    format!(
        "{}, this channel is managed by the bot. Please use slash commands instead.",
        user.mention()
    )
}

/// Initial connection: `connect_attempts` tries with a fixed pause between.
async fn connect_with_retries(
    session: &GatewaySession,
    config: &ConnectionConfig,
) -> Result<GatewayConnection> {
    let attempts = config.connect_attempts.max(1);
    for attempt in 1..=attempts {
        match session.connect().await {
            Ok(connection) => return Ok(connection),
            Err(e) => {
                warn!("gateway connect attempt {attempt}/{attempts} failed: {e}");
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_secs(config.connect_backoff_secs)).await;
                }
            }
        }
    }
    Err(BoardError::ExternalUnavailable(format!(
        "could not reach the Discord gateway after {attempts} attempt(s)"
    )))
}

/// Keep the session alive after the first successful connection, backing
/// off from 2s to a 60s cap between failed reconnects.
async fn maintain_session(
    session: GatewaySession,
    mut connection: GatewayConnection,
    events: mpsc::Sender<InboundEvent>,
    cancel: CancellationToken,
) {
    loop {
        let mut backoff_secs = 2u64;
        match session.run(connection, &events).await {
            Ok(SessionEnd::ReceiverClosed) => return,
            Ok(SessionEnd::ReconnectRequested) => info!("gateway asked for a reconnect"),
            Err(e) => warn!("gateway session ended: {e}"),
        }

        connection = loop {
            if cancel.is_cancelled() {
                return;
            }
            match session.connect().await {
                Ok(connection) => break connection,
                Err(e) => {
                    warn!("gateway reconnect failed: {e}; retrying in {backoff_secs}s");
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                    backoff_secs = backoff_secs
                        .saturating_mul(2)
                        .min(MAX_RECONNECT_BACKOFF_SECS);
                }
            }
        };
    }
}

/// Run the bot until Ctrl-C.
///
/// # Errors
///
/// Fails when the token is missing, the stores cannot be opened, or Discord
/// stays unreachable for the whole initial retry budget.
pub async fn run(config: BotConfig) -> anyhow::Result<()> {
    let token = config.discord.token.trim().to_owned();
    if token.is_empty() {
        anyhow::bail!("no Discord token configured (set discord.token or DISCORD_TOKEN)");
    }

    let rest = DiscordRest::new(token);
    let cache = Arc::new(GatewayCache::new());
    let platform: Arc<dyn ChatPlatform> = Arc::new(DiscordPlatform::new(
        rest.clone(),
        Arc::clone(&cache),
        config.rate_limits.messages_per_minute,
        config.board.purge_limit,
    ));
    let components = Arc::new(Components::build(&config, platform, Arc::new(SystemClock))?);

    let gate = ReadyGate::new();
    let session = GatewaySession::new(rest.clone(), cache, gate.clone());
    let cancel = CancellationToken::new();
    let scheduler = Arc::clone(&components.scheduler).run(gate.clone(), cancel.clone());

    let first = connect_with_retries(&session, &config.connection).await?;
    info!("connected to the Discord gateway");
    let (tx, mut rx) = mpsc::channel(INBOUND_QUEUE);
    let gateway = tokio::spawn(maintain_session(session, first, tx, cancel.clone()));

    let mut commands_registered = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    error!("gateway task stopped unexpectedly");
                    break;
                };
                if let InboundEvent::Ready { bot_user } = &event {
                    if !commands_registered {
                        let app_id = config.discord.application_id.unwrap_or(bot_user.get());
                        match rest.register_commands(app_id, &command_definitions()).await {
                            Ok(()) => {
                                commands_registered = true;
                                info!("slash commands registered for application {app_id}");
                            }
                            Err(e) => error!("slash command registration failed: {e}"),
                        }
                    }
                }
                let components = Arc::clone(&components);
                tokio::spawn(async move { components.handle_event(event).await });
            }
        }
    }

    cancel.cancel();
    gateway.abort();
    if let Err(e) = scheduler.await {
        warn!("scheduler task ended abnormally: {e}");
    }
    info!("taskboard stopped");
    Ok(())
}
