//! Meeting scheduler background loop.
//!
//! Every tick scans the meeting store, runs due checks concurrently (each
//! under a timeout), latches every meeting it attempted, and refreshes the
//! meeting boards when anything changed.

use super::checks::{
    CheckWindows, DueCheck, due_check, invite_ttl_secs, late_notice, missing_attendees,
    reminder_text,
};
use crate::board::Boards;
use crate::clock::Clock;
use crate::config::ScheduleConfig;
use crate::error::BoardError;
use crate::model::{Meeting, MeetingPatch};
use crate::platform::{ChatPlatform, ReadyGate};
use crate::store::MeetingStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one meeting during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Reminded { meeting_id: u64 },
    AttendanceChecked {
        meeting_id: u64,
        missing: usize,
        notified: usize,
    },
    /// Ended before any check could run.
    Expired { meeting_id: u64 },
    /// Nothing could be done, e.g. no voice channel is bound.
    Skipped { meeting_id: u64, reason: String },
    Failed { meeting_id: u64, error: String },
    TimedOut { meeting_id: u64 },
}

impl CheckOutcome {
    #[must_use]
    pub fn meeting_id(&self) -> u64 {
        match self {
            Self::Reminded { meeting_id }
            | Self::AttendanceChecked { meeting_id, .. }
            | Self::Expired { meeting_id }
            | Self::Skipped { meeting_id, .. }
            | Self::Failed { meeting_id, .. }
            | Self::TimedOut { meeting_id } => *meeting_id,
        }
    }
}

/// Summary of one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    /// One entry per attempted meeting, ordered by meeting id.
    pub outcomes: Vec<CheckOutcome>,
    /// Meetings whose latch was set during this tick.
    pub latched: usize,
}

/// Timing knobs for [`MeetingScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub check_timeout: Duration,
    pub windows: CheckWindows,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&ScheduleConfig::default())
    }
}

impl From<&ScheduleConfig> for SchedulerSettings {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            check_timeout: Duration::from_secs(config.check_timeout_secs.max(1)),
            windows: CheckWindows::from(config),
        }
    }
}

/// Fires meeting reminders and attendance checks exactly once per meeting.
pub struct MeetingScheduler {
    meetings: Arc<MeetingStore>,
    platform: Arc<dyn ChatPlatform>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    boards: Option<Boards>,
    report_tx: Option<mpsc::UnboundedSender<TickReport>>,
}

impl MeetingScheduler {
    #[must_use]
    pub fn new(
        meetings: Arc<MeetingStore>,
        platform: Arc<dyn ChatPlatform>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            meetings,
            platform,
            clock,
            settings,
            boards: None,
            report_tx: None,
        }
    }

    /// Refresh these boards after a tick that latched anything.
    #[must_use]
    pub fn with_boards(mut self, boards: Boards) -> Self {
        self.boards = Some(boards);
        self
    }

    /// Publish a [`TickReport`] after every tick that attempted something.
    #[must_use]
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<TickReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    /// Start the loop. It waits for `gate` before the first tick and skips
    /// ticks while the gate is closed.
    pub fn run(
        self: Arc<Self>,
        gate: ReadyGate,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                () = gate.wait() => {}
                () = cancel.cancelled() => return,
            }
            info!(
                "meeting scheduler started (tick every {:?})",
                self.settings.tick_interval
            );

            let mut interval = tokio::time::interval(self.settings.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !gate.is_open() {
                    debug!("gateway not ready; skipping scheduler tick");
                    continue;
                }
                let report = self.tick().await;
                if !report.outcomes.is_empty() {
                    debug!(
                        "scheduler tick: {} check(s), {} latched",
                        report.outcomes.len(),
                        report.latched
                    );
                }
            }
            info!("meeting scheduler stopped");
        })
    }

    /// Run one pass over all meetings.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let now = self.clock.now();
        let due: Vec<(Meeting, DueCheck)> = self
            .meetings
            .all()
            .into_iter()
            .filter_map(|m| match due_check(&m, now, self.settings.windows) {
                DueCheck::None => None,
                check => Some((m, check)),
            })
            .collect();

        let mut set = JoinSet::new();
        for (meeting, check) in due {
            let this = Arc::clone(self);
            set.spawn(async move {
                let meeting_id = meeting.id;
                let outcome = match tokio::time::timeout(
                    this.settings.check_timeout,
                    this.perform(meeting, check, now),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("check for meeting #{meeting_id} timed out");
                        CheckOutcome::TimedOut { meeting_id }
                    }
                };
                let latched = this.latch(meeting_id);
                (outcome, latched)
            });
        }

        let mut outcomes = Vec::new();
        let mut latched = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((outcome, did_latch)) => {
                    latched += usize::from(did_latch);
                    outcomes.push(outcome);
                }
                Err(e) => error!("meeting check task failed: {e}"),
            }
        }
        outcomes.sort_by_key(CheckOutcome::meeting_id);

        if latched > 0 {
            if let Some(boards) = &self.boards {
                for guild in self.platform.guilds().await {
                    if let Err(e) = boards.meetings.refresh(guild).await {
                        warn!("meeting board refresh failed in guild {guild}: {e}");
                    }
                }
            }
        }

        let report = TickReport {
            at: now,
            outcomes,
            latched,
        };
        if !report.outcomes.is_empty() {
            if let Some(tx) = &self.report_tx {
                if tx.send(report.clone()).is_err() {
                    debug!("tick report receiver dropped");
                }
            }
        }
        report
    }

    async fn perform(&self, meeting: Meeting, check: DueCheck, now: DateTime<Utc>) -> CheckOutcome {
        let meeting_id = meeting.id;
        let result = match check {
            DueCheck::Reminder => self.remind(&meeting).await,
            DueCheck::Attendance => self.check_attendance(&meeting, now).await,
            DueCheck::Expire => {
                debug!("meeting #{meeting_id} ended unchecked; latching");
                Ok(CheckOutcome::Expired { meeting_id })
            }
            DueCheck::None => Ok(CheckOutcome::Skipped {
                meeting_id,
                reason: "not due".to_owned(),
            }),
        };
        result.unwrap_or_else(|e| {
            warn!("check for meeting #{meeting_id} failed: {e}");
            CheckOutcome::Failed {
                meeting_id,
                error: e.to_string(),
            }
        })
    }

    async fn remind(&self, meeting: &Meeting) -> Result<CheckOutcome, BoardError> {
        let meeting_id = meeting.id;
        let Some(channel) = meeting.channel_id else {
            debug!("meeting #{meeting_id} has no channel; reminder skipped");
            return Ok(CheckOutcome::Skipped {
                meeting_id,
                reason: "no channel bound".to_owned(),
            });
        };
        self.platform
            .send_message(channel, &reminder_text(meeting, self.settings.windows.reminder_lead))
            .await?;
        info!("reminder sent for meeting #{meeting_id}");
        Ok(CheckOutcome::Reminded { meeting_id })
    }

    async fn check_attendance(
        &self,
        meeting: &Meeting,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, BoardError> {
        let meeting_id = meeting.id;
        let Some(channel) = meeting.channel_id else {
            debug!("meeting #{meeting_id} has no voice channel; attendance not checked");
            return Ok(CheckOutcome::Skipped {
                meeting_id,
                reason: "no voice channel bound".to_owned(),
            });
        };

        let present = self.platform.voice_members(channel).await?;
        let missing = missing_attendees(meeting, &present);
        if missing.is_empty() {
            return Ok(CheckOutcome::AttendanceChecked {
                meeting_id,
                missing: 0,
                notified: 0,
            });
        }

        let invite = self
            .platform
            .create_invite(channel, invite_ttl_secs(meeting, now))
            .await?;
        let notice = late_notice(meeting, &invite);
        let mut notified = 0;
        for user in &missing {
            match self.platform.send_direct(*user, &notice).await {
                Ok(()) => notified += 1,
                Err(e) => debug!("could not notify user {user} about meeting #{meeting_id}: {e}"),
            }
        }
        info!(
            "attendance for meeting #{meeting_id}: {} missing, {notified} notified",
            missing.len()
        );
        Ok(CheckOutcome::AttendanceChecked {
            meeting_id,
            missing: missing.len(),
            notified,
        })
    }

    fn latch(&self, meeting_id: u64) -> bool {
        match self.meetings.update(meeting_id, MeetingPatch::latch_reminder()) {
            Ok(_) => true,
            Err(BoardError::NotFound { .. }) => false,
            Err(e) => {
                error!("could not latch meeting #{meeting_id}: {e}");
                false
            }
        }
    }
}
