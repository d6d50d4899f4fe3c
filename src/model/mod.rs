//! Domain types for tasks and meetings.

pub mod ids;
pub mod meeting;
pub mod task;

pub use ids::{ChannelId, GuildId, MessageId, UserId, mention_list};
pub use meeting::{Meeting, MeetingPatch, RsvpResponse, RsvpTally};
pub use task::{Task, TaskPatch, TaskStatus, ThreadBinding};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

/// The two kinds of entity the bot tracks, each with its own store and board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Task,
    Meeting,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => f.write_str("Task"),
            Self::Meeting => f.write_str("Meeting"),
        }
    }
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 (what we write) and offset-less ISO-8601, which older
/// data files contain; the latter is read as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a stored calendar date (`YYYY-MM-DD`, or a full ISO timestamp whose
/// date part is kept).
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    parse_timestamp(raw).map(|ts| ts.date_naive())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn naive_iso_timestamps_read_as_utc() {
        let ts = parse_timestamp("2025-02-01T10:30:00.123456").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-02-01T10:30:00.123456+00:00");
    }

    #[test]
    fn dates_accept_full_timestamps() {
        assert_eq!(
            parse_date("2025-03-04T00:00:00"),
            NaiveDate::from_ymd_opt(2025, 3, 4)
        );
        assert_eq!(parse_date("2025-03-04"), NaiveDate::from_ymd_opt(2025, 3, 4));
        assert!(parse_date("04/03/2025").is_none());
    }
}
