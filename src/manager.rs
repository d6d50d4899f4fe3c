//! Validated task and meeting operations.
//!
//! Managers sit between commands and stores. Every input is validated before
//! the store is touched, so a rejected request never partially commits.

use crate::clock::Clock;
use crate::error::{BoardError, Result};
use crate::model::{
    ChannelId, Meeting, MeetingPatch, RsvpResponse, Task, TaskPatch, TaskStatus, UserId,
};
use crate::store::{MeetingStore, TaskStore};
use crate::threads::{ThreadManager, ThreadState};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
/// Longest meeting we accept, in minutes.
pub const MAX_MEETING_MINUTES: u32 = 24 * 60;

const DATE_FORMATS: [&str; 2] = ["%d-%m-%Y", "%Y-%m-%d"];
const DATETIME_FORMATS: [&str; 2] = ["%d-%m-%Y %H:%M", "%Y-%m-%d %H:%M"];

fn validate_text(what: &str, value: &str, max: usize, required: bool) -> Result<()> {
    if required && value.trim().is_empty() {
        return Err(BoardError::Validation(format!("{what} cannot be empty")));
    }
    if value.chars().count() > max {
        return Err(BoardError::Validation(format!(
            "{what} cannot exceed {max} characters"
        )));
    }
    Ok(())
}

/// Parse a due date given as `DD-MM-YYYY` (or `YYYY-MM-DD`).
///
/// # Errors
///
/// [`BoardError::Validation`] when neither format matches.
pub fn parse_due_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| {
            BoardError::Validation("Invalid date format. Please use DD-MM-YYYY".to_owned())
        })
}

/// Parse a meeting start given as `DD-MM-YYYY HH:MM` local time.
///
/// # Errors
///
/// [`BoardError::Validation`] when the text is not a valid local time.
pub fn parse_start_time(raw: &str, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let raw = raw.trim();
    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| {
            BoardError::Validation(
                "Invalid time format. Please use DD-MM-YYYY HH:MM".to_owned(),
            )
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| BoardError::Validation(format!("{raw} is not a valid local time")))
}

pub struct TaskManager {
    tasks: Arc<TaskStore>,
    threads: Arc<ThreadManager>,
    clock: Arc<dyn Clock>,
}

impl TaskManager {
    #[must_use]
    pub fn new(tasks: Arc<TaskStore>, threads: Arc<ThreadManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks,
            threads,
            clock,
        }
    }

    /// # Errors
    ///
    /// [`BoardError::Validation`] for empty or oversized text or a bad date.
    pub fn create(&self, title: &str, description: &str, due_date: Option<&str>) -> Result<Task> {
        validate_text("Task title", title, MAX_TITLE_LEN, true)?;
        validate_text("Task description", description, MAX_DESCRIPTION_LEN, true)?;
        let due = match due_date.map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => Some(parse_due_date(raw)?),
            None => None,
        };

        let task = self.tasks.add(Task::new(
            title.trim(),
            description.trim(),
            due,
            self.clock.now(),
        ))?;
        info!("task #{} created: {}", task.id, task.title);
        Ok(task)
    }

    /// Replace the assignees. Duplicates are dropped, first occurrence wins.
    ///
    /// # Errors
    ///
    /// [`BoardError::Validation`] when `users` is empty.
    pub fn assign(&self, task_id: u64, users: &[UserId]) -> Result<Task> {
        if users.is_empty() {
            return Err(BoardError::Validation(
                "Please mention at least one user to assign".to_owned(),
            ));
        }
        let mut unique = Vec::with_capacity(users.len());
        for user in users {
            if !unique.contains(user) {
                unique.push(*user);
            }
        }
        self.tasks
            .update(task_id, TaskPatch::default().assigned_users(unique))
    }

    /// Change a task's status. Completing a task removes its live thread and
    /// clears the binding in the same write as the status change.
    ///
    /// # Errors
    ///
    /// [`BoardError::NotFound`] or a storage failure.
    pub async fn update_status(&self, task_id: u64, status: TaskStatus) -> Result<Task> {
        let task = self.tasks.get(task_id)?;
        if status != TaskStatus::Completed {
            return self.tasks.update(task_id, TaskPatch::default().status(status));
        }

        let mut release = None;
        let state = self.threads.verify(&task).await;
        if let (Some(thread), Some(binding)) = (state.present(), task.thread) {
            if self.threads.retire(binding).await {
                info!("thread {thread} of completed task #{task_id} deleted");
                release = Some(binding);
            }
        }

        self.tasks.update_with(task_id, |t| {
            t.status = status;
            if release.is_some() && t.thread == release {
                t.thread = None;
            }
            Ok(())
        })
    }

    /// Delete a task and, best-effort, its thread.
    ///
    /// # Errors
    ///
    /// [`BoardError::NotFound`] or a storage failure.
    pub async fn delete(&self, task_id: u64) -> Result<Task> {
        let removed = self.tasks.delete(task_id)?;
        if let Some(binding) = removed.thread {
            if !self.threads.retire(binding).await {
                warn!("thread {} of deleted task #{task_id} left behind", binding.thread_id);
            }
        }
        info!("task #{task_id} deleted");
        Ok(removed)
    }

    /// # Errors
    ///
    /// [`BoardError::NotFound`].
    pub fn get(&self, task_id: u64) -> Result<Task> {
        self.tasks.get(task_id)
    }

    /// Current thread state of a task, healing a stale binding.
    ///
    /// # Errors
    ///
    /// [`BoardError::NotFound`].
    pub async fn thread_state(&self, task_id: u64) -> Result<ThreadState> {
        let task = self.tasks.get(task_id)?;
        Ok(self.threads.verify(&task).await)
    }

    #[must_use]
    pub fn list_for(&self, user: UserId) -> Vec<Task> {
        self.tasks
            .all()
            .into_iter()
            .filter(|t| t.is_assigned_to(user))
            .collect()
    }

    #[must_use]
    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }
}

/// Unvalidated meeting request as typed by a user.
#[derive(Debug, Clone)]
pub struct MeetingDraft {
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub duration_minutes: i64,
    /// Empty means everyone is invited.
    pub participants: Vec<UserId>,
    pub channel_id: Option<ChannelId>,
    pub created_by: UserId,
}

pub struct MeetingManager {
    meetings: Arc<MeetingStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl MeetingManager {
    /// `offset` is the local time zone meeting times are typed in.
    #[must_use]
    pub fn new(meetings: Arc<MeetingStore>, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self {
            meetings,
            clock,
            offset,
        }
    }

    /// # Errors
    ///
    /// [`BoardError::Validation`] for bad text, an unparsable or past start
    /// time, or a duration outside `1..=1440` minutes.
    pub fn create(&self, draft: MeetingDraft) -> Result<Meeting> {
        validate_text("Meeting title", &draft.title, MAX_TITLE_LEN, true)?;
        validate_text("Meeting description", &draft.description, MAX_DESCRIPTION_LEN, false)?;
        let start = parse_start_time(&draft.start_time, self.offset)?;
        if start.with_timezone(&Utc) <= self.clock.now() {
            return Err(BoardError::Validation(
                "Meeting time must be in the future".to_owned(),
            ));
        }
        let duration = u32::try_from(draft.duration_minutes)
            .ok()
            .filter(|d| (1..=MAX_MEETING_MINUTES).contains(d))
            .ok_or_else(|| {
                BoardError::Validation(format!(
                    "Duration must be between 1 and {MAX_MEETING_MINUTES} minutes"
                ))
            })?;

        let mut participants = Vec::with_capacity(draft.participants.len());
        for user in draft.participants {
            if !participants.contains(&user) {
                participants.push(user);
            }
        }

        let mut meeting = Meeting::new(
            draft.title.trim(),
            draft.description.trim(),
            start,
            duration,
            draft.created_by,
        );
        meeting.participants = participants;
        meeting.channel_id = draft.channel_id;
        let meeting = self.meetings.add(meeting)?;
        info!("meeting #{} scheduled for {}", meeting.id, meeting.start_time);
        Ok(meeting)
    }

    /// Record an RSVP. Only invited users may answer, and only before the
    /// meeting starts.
    ///
    /// # Errors
    ///
    /// [`BoardError::PermissionDenied`] for uninvited users,
    /// [`BoardError::Validation`] once the meeting has started.
    pub fn rsvp(&self, meeting_id: u64, user: UserId, response: RsvpResponse) -> Result<Meeting> {
        let now = self.clock.now();
        self.meetings.update_with(meeting_id, |m| {
            if !m.is_participant(user) {
                return Err(BoardError::PermissionDenied(
                    "You are not invited to this meeting".to_owned(),
                ));
            }
            if m.has_started(now) {
                return Err(BoardError::Validation(
                    "This meeting has already started".to_owned(),
                ));
            }
            m.apply(MeetingPatch::rsvp(user, response));
            Ok(())
        })
    }

    /// # Errors
    ///
    /// [`BoardError::NotFound`] or a storage failure.
    pub fn delete(&self, meeting_id: u64) -> Result<Meeting> {
        let removed = self.meetings.delete(meeting_id)?;
        info!("meeting #{meeting_id} deleted");
        Ok(removed)
    }

    /// # Errors
    ///
    /// [`BoardError::NotFound`].
    pub fn get(&self, meeting_id: u64) -> Result<Meeting> {
        self.meetings.get(meeting_id)
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::model::{EntityKind, GuildId, ThreadBinding};
    use crate::test_utils::{FakePlatform, FixedClock};
    use chrono::Duration;

    const U1: UserId = UserId(1);
    const U2: UserId = UserId(2);

    struct Fixture {
        _dir: tempfile::TempDir,
        platform: Arc<FakePlatform>,
        tasks: Arc<TaskStore>,
        manager: TaskManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::new());
        let tasks = Arc::new(TaskStore::open(dir.path().join("tasks.json")).unwrap());
        let threads = Arc::new(ThreadManager::new(Arc::clone(&tasks), platform.clone()));
        let clock = Arc::new(FixedClock::at(Utc::now()));
        Fixture {
            _dir: dir,
            platform,
            manager: TaskManager::new(Arc::clone(&tasks), threads, clock),
            tasks,
        }
    }

    #[test]
    fn due_dates_accept_both_orders() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(parse_due_date("14-03-2025").unwrap(), expected);
        assert_eq!(parse_due_date("2025-03-14").unwrap(), expected);
        assert!(matches!(
            parse_due_date("March 14"),
            Err(BoardError::Validation(_))
        ));
    }

    #[test]
    fn start_times_use_local_offset() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let start = parse_start_time("01-06-2025 14:30", offset).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-06-01T14:30:00+01:00");
        assert!(parse_start_time("2025/06/01", offset).is_err());
    }

    #[tokio::test]
    async fn ship_v1_scenario() {
        let f = fixture();
        let task = f
            .manager
            .create("Ship v1", "Write the release notes", None)
            .unwrap();
        assert_eq!(task.id, 1);
        assert_eq!(task.status, TaskStatus::NotStarted);

        let task = f.manager.assign(1, &[U1, U2]).unwrap();
        assert_eq!(task.assigned_users, vec![U1, U2]);

        let task = f
            .manager
            .update_status(1, TaskStatus::Completed)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let removed = f.manager.delete(1).await.unwrap();
        assert_eq!(removed.title, "Ship v1");
        assert!(matches!(
            f.manager.get(1),
            Err(BoardError::NotFound {
                kind: EntityKind::Task,
                id: 1
            })
        ));
    }

    #[test]
    fn invalid_input_never_touches_the_store() {
        let f = fixture();
        assert!(f.manager.create("", "d", None).is_err());
        assert!(f.manager.create("t", "   ", None).is_err());
        assert!(f.manager.create(&"x".repeat(101), "d", None).is_err());
        assert!(f.manager.create("t", &"x".repeat(501), None).is_err());
        assert!(f.manager.create("t", "d", Some("someday")).is_err());
        assert!(f.tasks.is_empty());

        let task = f.manager.create("t", "d", Some("  ")).unwrap();
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn assign_dedupes_and_requires_users() {
        let f = fixture();
        f.manager.create("t", "d", None).unwrap();
        let task = f.manager.assign(1, &[U2, U1, U2]).unwrap();
        assert_eq!(task.assigned_users, vec![U2, U1]);
        assert!(matches!(
            f.manager.assign(1, &[]),
            Err(BoardError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn completing_removes_thread_in_same_write() {
        let f = fixture();
        let board = f.platform.add_channel(GuildId(1));
        f.tasks.set_board_channel(board).unwrap();
        f.manager.create("t", "d", None).unwrap();
        f.manager.assign(1, &[U1]).unwrap();
        let thread = f.manager.threads().create_thread(1, U1).await.unwrap();

        let task = f
            .manager
            .update_status(1, TaskStatus::Completed)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.thread, None);
        assert!(!f.platform.has_channel(thread));

        let reloaded = TaskStore::open(f.tasks.path()).unwrap();
        assert_eq!(reloaded.get(1).unwrap().thread, None);
    }

    #[tokio::test]
    async fn other_statuses_keep_thread() {
        let f = fixture();
        let board = f.platform.add_channel(GuildId(1));
        f.tasks.set_board_channel(board).unwrap();
        f.manager.create("t", "d", None).unwrap();
        f.manager.assign(1, &[U1]).unwrap();
        let thread = f.manager.threads().create_thread(1, U1).await.unwrap();
        let task = f
            .manager
            .update_status(1, TaskStatus::Blocked)
            .await
            .unwrap();
        assert_eq!(
            task.thread,
            Some(ThreadBinding {
                thread_id: thread,
                creator_id: U1
            })
        );
    }

    #[tokio::test]
    async fn delete_cleans_up_thread() {
        let f = fixture();
        let board = f.platform.add_channel(GuildId(1));
        f.tasks.set_board_channel(board).unwrap();
        f.manager.create("t", "d", None).unwrap();
        f.manager.assign(1, &[U1]).unwrap();
        let thread = f.manager.threads().create_thread(1, U1).await.unwrap();
        f.manager.delete(1).await.unwrap();
        assert!(!f.platform.has_channel(thread));
    }

    fn meetings() -> (tempfile::TempDir, Arc<FixedClock>, MeetingManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MeetingStore::open(dir.path().join("meetings.json")).unwrap());
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let offset = FixedOffset::east_opt(3600).unwrap();
        let manager = MeetingManager::new(store, clock.clone(), offset);
        (dir, clock, manager)
    }

    fn draft(start: &str, participants: Vec<UserId>) -> MeetingDraft {
        MeetingDraft {
            title: "Standup".to_owned(),
            description: "Daily sync".to_owned(),
            start_time: start.to_owned(),
            duration_minutes: 30,
            participants,
            channel_id: Some(ChannelId(500)),
            created_by: U1,
        }
    }

    #[test]
    fn meeting_validation() {
        let (_dir, _clock, manager) = meetings();
        assert!(manager.create(draft("01-06-2025 08:00", vec![])).is_err());
        let mut long = draft("02-06-2025 10:00", vec![]);
        long.duration_minutes = 0;
        assert!(manager.create(long).is_err());

        let meeting = manager
            .create(draft("02-06-2025 10:00", vec![U1, U1, U2]))
            .unwrap();
        assert_eq!(meeting.id, 1);
        assert_eq!(meeting.participants, vec![U1, U2]);
        assert_eq!(meeting.start_time.to_rfc3339(), "2025-06-02T10:00:00+01:00");
    }

    #[test]
    fn rsvp_requires_invitation() {
        let (_dir, clock, manager) = meetings();
        manager
            .create(draft("02-06-2025 10:00", vec![U1]))
            .unwrap();

        let err = manager.rsvp(1, U2, RsvpResponse::Yes).unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied(_)));

        let meeting = manager.rsvp(1, U1, RsvpResponse::Maybe).unwrap();
        assert_eq!(meeting.rsvp_tally().maybe, 1);
        assert_eq!(meeting.rsvp_tally().pending, 0);

        clock.advance(Duration::days(2));
        assert!(matches!(
            manager.rsvp(1, U1, RsvpResponse::Yes),
            Err(BoardError::Validation(_))
        ));
    }

    #[test]
    fn open_meetings_accept_anyone() {
        let (_dir, _clock, manager) = meetings();
        manager.create(draft("02-06-2025 10:00", vec![])).unwrap();
        let meeting = manager.rsvp(1, UserId(99), RsvpResponse::No).unwrap();
        assert_eq!(meeting.rsvp_tally().no, 1);
    }
}
