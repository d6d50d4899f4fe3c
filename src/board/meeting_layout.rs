//! Meeting board: upcoming and running meetings in start order.

use super::{Block, BoardLayout, COLOR_BLUE, COLOR_GREY, COLOR_RED, Control, VoiceCounts};
use crate::model::{ChannelId, Meeting, mention_list};
use chrono::{DateTime, Duration, Utc};

const COLOR_DARK_RED: u32 = 0x992D22;
const COLOR_ORANGE: u32 = 0xE67E22;
/// Voice occupancy is shown from this long before the start until the end.
const OCCUPANCY_LEAD_MINUTES: i64 = 30;

/// How close a meeting is, derived from `now` on every render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Already started.
    Overdue,
    /// Starts within the hour.
    Imminent,
    /// Starts within a day.
    Soon,
    Later,
}

impl Urgency {
    #[must_use]
    pub fn classify(until_start: Duration) -> Self {
        if until_start <= Duration::zero() {
            Self::Overdue
        } else if until_start <= Duration::hours(1) {
            Self::Imminent
        } else if until_start <= Duration::hours(24) {
            Self::Soon
        } else {
            Self::Later
        }
    }

    #[must_use]
    pub fn color(self) -> u32 {
        match self {
            Self::Overdue => COLOR_DARK_RED,
            Self::Imminent => COLOR_RED,
            Self::Soon => COLOR_ORANGE,
            Self::Later => COLOR_BLUE,
        }
    }

    /// Human countdown for the status field.
    #[must_use]
    pub fn countdown(self, until_start: Duration) -> String {
        match self {
            Self::Overdue => {
                let mins = (-until_start).num_minutes();
                format!("🔴 In progress (started {mins} min ago)")
            }
            Self::Imminent => format!("⏰ Starting in {} minutes", until_start.num_minutes()),
            Self::Soon => format!("⏰ Starting in {} hours", until_start.num_hours()),
            Self::Later => {
                let days = until_start.num_days();
                format!("⏰ Starting in {days} day{}", if days == 1 { "" } else { "s" })
            }
        }
    }
}

/// Lists meetings that have not ended, soonest first, with RSVP buttons on
/// those that have not started.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeetingLayout;

impl MeetingLayout {
    /// The voice channel to count members in, while the meeting is about to
    /// start or running.
    fn occupancy_channel(meeting: &Meeting, now: DateTime<Utc>) -> Option<ChannelId> {
        let near = meeting.time_until_start(now) <= Duration::minutes(OCCUPANCY_LEAD_MINUTES);
        meeting.channel_id.filter(|_| near && !meeting.has_ended(now))
    }

    fn meeting_block(meeting: &Meeting, now: DateTime<Utc>, voice: &VoiceCounts) -> Block {
        let until = meeting.time_until_start(now);
        let urgency = Urgency::classify(until);
        let tally = meeting.rsvp_tally();

        let mut rsvp = format!(
            "✅ {} • ❔ {} • ❌ {}",
            tally.yes, tally.maybe, tally.no
        );
        if !meeting.participants.is_empty() {
            rsvp.push_str(&format!(" • ⏳ {} pending", tally.pending));
        }

        let mut block = Block::new(format!("📅 {}", meeting.title), urgency.color())
            .description(meeting.description.clone())
            .field(
                "🕒 Date & Time",
                format!(
                    "{} (<t:{}:R>)",
                    meeting.start_time.format("%Y-%m-%d %H:%M"),
                    meeting.start_time.timestamp()
                ),
                true,
            )
            .field(
                "⏱️ Duration",
                format!("{} minutes", meeting.duration_minutes),
                true,
            )
            .field(
                "🔊 Voice Channel",
                meeting
                    .channel_id
                    .map_or_else(|| "None".to_owned(), |c| c.mention()),
                true,
            );
        let occupancy = Self::occupancy_channel(meeting, now).and_then(|c| voice.get(&c));
        if let Some(count) = occupancy {
            block = block.field(
                "👥 Current Participants",
                format!("{count} member(s) in channel"),
                true,
            );
        }
        block = block
            .field(
                "📋 Invited Participants",
                mention_list(&meeting.participants, "@everyone"),
                false,
            )
            .field("📨 RSVP", rsvp, true)
            .field("Status", urgency.countdown(until), true)
            .field("👤 Organizer", meeting.created_by.mention(), true)
            .footer(format!("Meeting #{}", meeting.id));

        if !meeting.has_started(now) {
            block = block.controls(Control::rsvp_row(meeting.id));
        }
        block
    }
}

impl BoardLayout for MeetingLayout {
    type Entity = Meeting;

    fn channel_name(&self) -> &'static str {
        "meeting-dashboard"
    }

    fn header(&self) -> Block {
        Block::new("📅 Meetings Dashboard", COLOR_BLUE)
            .description(
                "Upcoming meetings and schedules\n\n*Use `/create_meeting` to schedule one*",
            )
            .controls(vec![Control::create_meeting()])
    }

    fn watched_channels(&self, meetings: &[Meeting], now: DateTime<Utc>) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = meetings
            .iter()
            .filter_map(|m| Self::occupancy_channel(m, now))
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }

    fn render(&self, meetings: &[Meeting], now: DateTime<Utc>, voice: &VoiceCounts) -> Vec<Block> {
        let mut upcoming: Vec<&Meeting> = meetings.iter().filter(|m| !m.has_ended(now)).collect();
        if upcoming.is_empty() {
            return vec![
                Block::new("No upcoming meetings", COLOR_GREY)
                    .description("*No upcoming meetings scheduled*"),
            ];
        }
        upcoming.sort_by_key(|m| (m.start_time, m.id));
        upcoming
            .into_iter()
            .map(|m| Self::meeting_block(m, now, voice))
            .collect()
    }
}
