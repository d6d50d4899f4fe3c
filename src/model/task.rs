//! Task entity, its status taxonomy, and the typed partial update.

use crate::model::{ChannelId, UserId, parse_date, parse_timestamp};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task. Declaration order is board order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Under Review")]
    UnderReview,
    #[serde(rename = "Blocked")]
    Blocked,
    #[serde(rename = "Completed")]
    Completed,
}

impl TaskStatus {
    /// All statuses in board order.
    pub const ALL: [TaskStatus; 5] = [
        Self::NotStarted,
        Self::InProgress,
        Self::UnderReview,
        Self::Blocked,
        Self::Completed,
    ];

    /// Human-readable label, also the persisted form.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::InProgress => "In Progress",
            Self::UnderReview => "Under Review",
            Self::Blocked => "Blocked",
            Self::Completed => "Completed",
        }
    }

    /// Stable machine key used in component custom ids and command options.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::UnderReview => "under_review",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            Self::NotStarted => "🆕",
            Self::InProgress => "⏳",
            Self::UnderReview => "📝",
            Self::Blocked => "🚫",
            Self::Completed => "✅",
        }
    }

    /// Accent colour (24-bit RGB) for this status' board section.
    #[must_use]
    pub fn color(self) -> u32 {
        match self {
            Self::NotStarted => 0x979C9F,
            Self::InProgress => 0x3498DB,
            Self::UnderReview => 0x9B59B6,
            Self::Blocked => 0xE74C3C,
            Self::Completed => 0x2ECC71,
        }
    }

    /// Parse either the machine key or the label, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|s| s.key() == normalized)
    }
}

/// A discussion thread bound to a task and the user who may delete it.
///
/// Thread id and creator only ever exist together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadBinding {
    pub thread_id: ChannelId,
    pub creator_id: UserId,
}

/// A tracked unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord", into = "TaskRecord")]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<NaiveDate>,
    pub assigned_users: Vec<UserId>,
    pub thread: Option<ThreadBinding>,
}

impl Task {
    /// A new, not-yet-stored task. The store assigns the id.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        due_date: Option<NaiveDate>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::NotStarted,
            created_at,
            due_date,
            assigned_users: Vec::new(),
            thread: None,
        }
    }

    #[must_use]
    pub fn is_assigned_to(&self, user: UserId) -> bool {
        self.assigned_users.contains(&user)
    }

    /// Apply a partial update. Only fields present in the patch change.
    pub fn apply(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(users) = patch.assigned_users {
            self.assigned_users = users;
        }
        if let Some(thread) = patch.thread {
            self.thread = thread;
        }
    }
}

/// Partial update for a [`Task`]; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<Option<NaiveDate>>,
    pub assigned_users: Option<Vec<UserId>>,
    pub thread: Option<Option<ThreadBinding>>,
}

impl TaskPatch {
    #[must_use]
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn assigned_users(mut self, users: Vec<UserId>) -> Self {
        self.assigned_users = Some(users);
        self
    }

    #[must_use]
    pub fn thread(mut self, thread: Option<ThreadBinding>) -> Self {
        self.thread = Some(thread);
        self
    }

    #[must_use]
    pub fn due_date(mut self, due_date: Option<NaiveDate>) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// On-disk shape of a task, field-compatible with existing data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskRecord {
    id: u64,
    title: String,
    description: String,
    status: TaskStatus,
    created_at: String,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    assigned_users: Option<Vec<UserId>>,
    #[serde(default)]
    thread_id: Option<ChannelId>,
    #[serde(default)]
    thread_creator_id: Option<UserId>,
}

impl TryFrom<TaskRecord> for Task {
    type Error = String;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let created_at = parse_timestamp(&record.created_at)
            .ok_or_else(|| format!("task {}: bad created_at `{}`", record.id, record.created_at))?;
        let due_date = match record.due_date.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                parse_date(raw).ok_or_else(|| format!("task {}: bad due_date `{raw}`", record.id))?,
            ),
        };
        // A half-set pair is treated as no thread at all.
        let thread = match (record.thread_id, record.thread_creator_id) {
            (Some(thread_id), Some(creator_id)) => Some(ThreadBinding {
                thread_id,
                creator_id,
            }),
            _ => None,
        };
        Ok(Self {
            id: record.id,
            title: record.title,
            description: record.description,
            status: record.status,
            created_at,
            due_date,
            assigned_users: record.assigned_users.unwrap_or_default(),
            thread,
        })
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            status: task.status,
            created_at: task.created_at.to_rfc3339(),
            due_date: task.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
            assigned_users: Some(task.assigned_users),
            thread_id: task.thread.map(|t| t.thread_id),
            thread_creator_id: task.thread.map(|t| t.creator_id),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn sample() -> Task {
        let mut task = Task::new(
            "Ship v1",
            "Write the release notes",
            NaiveDate::from_ymd_opt(2025, 6, 1),
            Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap(),
        );
        task.id = 1;
        task
    }

    #[test]
    fn status_parses_keys_and_labels() {
        assert_eq!(TaskStatus::parse("completed"), Some(TaskStatus::Completed));
        assert_eq!(TaskStatus::parse("In Progress"), Some(TaskStatus::InProgress));
        assert_eq!(TaskStatus::parse("under-review"), Some(TaskStatus::UnderReview));
        assert_eq!(TaskStatus::parse("done"), None);
    }

    #[test]
    fn status_serializes_as_label() {
        let json = serde_json::to_string(&TaskStatus::NotStarted).unwrap();
        assert_eq!(json, "\"Not Started\"");
    }

    #[test]
    fn thread_fields_are_written_as_a_pair() {
        let mut task = sample();
        task.thread = Some(ThreadBinding {
            thread_id: ChannelId(55),
            creator_id: UserId(7),
        });
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["thread_id"], 55);
        assert_eq!(value["thread_creator_id"], 7);

        task.thread = None;
        let value = serde_json::to_value(&task).unwrap();
        assert!(value["thread_id"].is_null());
        assert!(value["thread_creator_id"].is_null());
    }

    #[test]
    fn half_set_thread_pair_loads_as_none() {
        let json = r#"{
            "id": 3, "title": "t", "description": "d", "status": "Blocked",
            "created_at": "2025-01-01T00:00:00", "thread_id": 9, "thread_creator_id": null
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(task.thread.is_none());
        assert!(task.assigned_users.is_empty());
    }

    #[test]
    fn null_assigned_users_loads_as_empty() {
        let json = r#"{
            "id": 3, "title": "t", "description": "d", "status": "Completed",
            "created_at": "2025-01-01T00:00:00+00:00", "assigned_users": null
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(task.assigned_users.is_empty());
    }

    #[test]
    fn patch_touches_only_supplied_fields() {
        let mut task = sample();
        task.apply(TaskPatch::default().status(TaskStatus::Blocked));
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(task.title, "Ship v1");
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2025, 6, 1));

        task.apply(TaskPatch::default().due_date(None));
        assert!(task.due_date.is_none());
    }

    #[test]
    fn round_trip_preserves_dates() {
        let task = sample();
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
