//! Meeting entity, RSVP responses, and the typed partial update.

use crate::model::{ChannelId, UserId};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A participant's answer to a meeting invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsvpResponse {
    Yes,
    No,
    Maybe,
}

impl RsvpResponse {
    pub const ALL: [RsvpResponse; 3] = [Self::Yes, Self::Maybe, Self::No];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Maybe => "maybe",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
            Self::Maybe => "Maybe",
        }
    }

    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            Self::Yes => "✅",
            Self::No => "❌",
            Self::Maybe => "❔",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "maybe" => Some(Self::Maybe),
            _ => None,
        }
    }
}

/// Aggregated RSVP counts for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvpTally {
    pub yes: usize,
    pub maybe: usize,
    pub no: usize,
    /// Invited participants who have not answered yet. Never negative.
    pub pending: usize,
}

/// A scheduled meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<FixedOffset>,
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    pub created_by: UserId,
    #[serde(default)]
    pub participants: Vec<UserId>,
    /// Voice channel the meeting is held in.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    /// Latched once a reminder or attendance check has fired.
    #[serde(default)]
    pub reminder_sent: bool,
    #[serde(default)]
    pub rsvp_status: BTreeMap<UserId, RsvpResponse>,
}

impl Meeting {
    /// A new, not-yet-stored meeting. The store assigns the id.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        start_time: DateTime<FixedOffset>,
        duration_minutes: u32,
        created_by: UserId,
    ) -> Self {
        Self {
            id: 0,
            title: title.into(),
            description: description.into(),
            start_time,
            duration_minutes,
            created_by,
            participants: Vec::new(),
            channel_id: None,
            reminder_sent: false,
            rsvp_status: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn end_time(&self) -> DateTime<FixedOffset> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Signed time until start; negative once the meeting has begun.
    #[must_use]
    pub fn time_until_start(&self, now: DateTime<Utc>) -> Duration {
        self.start_time.with_timezone(&Utc) - now
    }

    #[must_use]
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time.with_timezone(&Utc) <= now
    }

    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time().with_timezone(&Utc) <= now
    }

    /// Whether `user` is invited. An empty participant list invites everyone.
    #[must_use]
    pub fn is_participant(&self, user: UserId) -> bool {
        self.participants.is_empty() || self.participants.contains(&user)
    }

    /// Users who answered yes, in id order.
    #[must_use]
    pub fn yes_responders(&self) -> Vec<UserId> {
        self.rsvp_status
            .iter()
            .filter(|(_, r)| **r == RsvpResponse::Yes)
            .map(|(u, _)| *u)
            .collect()
    }

    #[must_use]
    pub fn rsvp_tally(&self) -> RsvpTally {
        let mut tally = RsvpTally::default();
        for response in self.rsvp_status.values() {
            match response {
                RsvpResponse::Yes => tally.yes += 1,
                RsvpResponse::Maybe => tally.maybe += 1,
                RsvpResponse::No => tally.no += 1,
            }
        }
        tally.pending = self
            .participants
            .iter()
            .filter(|p| !self.rsvp_status.contains_key(p))
            .count();
        tally
    }

    /// Apply a partial update. Only fields present in the patch change.
    pub fn apply(&mut self, patch: MeetingPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(start_time) = patch.start_time {
            self.start_time = start_time;
        }
        if let Some(duration) = patch.duration_minutes {
            self.duration_minutes = duration;
        }
        if let Some(participants) = patch.participants {
            self.participants = participants;
        }
        if let Some(channel_id) = patch.channel_id {
            self.channel_id = channel_id;
        }
        if patch.latch_reminder {
            self.reminder_sent = true;
        }
        if let Some((user, response)) = patch.rsvp {
            self.rsvp_status.insert(user, response);
        }
    }
}

/// Partial update for a [`Meeting`].
///
/// The reminder latch can only be set, never cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub duration_minutes: Option<u32>,
    pub participants: Option<Vec<UserId>>,
    pub channel_id: Option<Option<ChannelId>>,
    pub latch_reminder: bool,
    pub rsvp: Option<(UserId, RsvpResponse)>,
}

impl MeetingPatch {
    #[must_use]
    pub fn latch_reminder() -> Self {
        Self {
            latch_reminder: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn rsvp(user: UserId, response: RsvpResponse) -> Self {
        Self {
            rsvp: Some((user, response)),
            ..Self::default()
        }
    }
}
