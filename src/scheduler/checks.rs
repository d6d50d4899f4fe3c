//! Pure decision logic for the meeting scheduler.

use crate::config::ScheduleConfig;
use crate::model::{Meeting, UserId, mention_list};
use chrono::{DateTime, Duration, Utc};

/// Which one-shot action a meeting needs on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueCheck {
    /// Nothing to do yet, or the latch is already set.
    None,
    /// The reminder window has been entered.
    Reminder,
    /// The meeting started at least the grace period ago and is still running.
    Attendance,
    /// The meeting ended before either check could fire.
    Expire,
}

/// Thresholds that decide when checks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckWindows {
    pub reminder_lead: Duration,
    pub attendance_grace: Duration,
}

impl Default for CheckWindows {
    fn default() -> Self {
        Self {
            reminder_lead: Duration::minutes(30),
            attendance_grace: Duration::minutes(10),
        }
    }
}

impl From<&ScheduleConfig> for CheckWindows {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            reminder_lead: Duration::minutes(config.reminder_lead_mins),
            attendance_grace: Duration::minutes(config.attendance_grace_mins),
        }
    }
}

/// Decide what `meeting` needs at `now`.
///
/// The reminder fires when `lead - 1min < until_start <= lead`. Reminder and
/// attendance share the `reminder_sent` latch, so at most one of them ever
/// fires per meeting.
#[must_use]
pub fn due_check(meeting: &Meeting, now: DateTime<Utc>, windows: CheckWindows) -> DueCheck {
    if meeting.reminder_sent {
        return DueCheck::None;
    }
    let until = meeting.time_until_start(now);
    if until <= windows.reminder_lead && until > windows.reminder_lead - Duration::minutes(1) {
        return DueCheck::Reminder;
    }
    if meeting.has_ended(now) {
        return DueCheck::Expire;
    }
    if until <= -windows.attendance_grace {
        return DueCheck::Attendance;
    }
    DueCheck::None
}

/// Users whose presence is expected: yes-RSVPs, or every listed participant
/// when nobody has answered yes.
#[must_use]
pub fn expected_attendees(meeting: &Meeting) -> Vec<UserId> {
    let yes = meeting.yes_responders();
    if yes.is_empty() {
        meeting.participants.clone()
    } else {
        yes
    }
}

/// Expected attendees not present in voice, in expected order.
#[must_use]
pub fn missing_attendees(meeting: &Meeting, present: &[UserId]) -> Vec<UserId> {
    expected_attendees(meeting)
        .into_iter()
        .filter(|u| !present.contains(u))
        .collect()
}

/// Invite lifetime for late attendees: the rest of the meeting, at least a
/// minute.
#[must_use]
pub fn invite_ttl_secs(meeting: &Meeting, now: DateTime<Utc>) -> u64 {
    let remaining = meeting.end_time().with_timezone(&Utc) - now;
    u64::try_from(remaining.num_seconds()).unwrap_or(0).max(60)
}

#[must_use]
pub fn reminder_text(meeting: &Meeting, lead: Duration) -> String {
    let audience = if meeting.participants.is_empty() {
        "@everyone".to_owned()
    } else {
        meeting
            .participants
            .iter()
            .map(|u| u.mention())
            .collect::<Vec<_>>()
            .join(" ")
    };
    format!(
        "{audience}\n📅 **Upcoming Meeting Reminder**\n\
         Meeting '{}' starts in {} minutes!\nParticipants: {}",
        meeting.title,
        lead.num_minutes(),
        mention_list(&meeting.participants, "@everyone"),
    )
}

#[must_use]
pub fn late_notice(meeting: &Meeting, invite: &str) -> String {
    let excerpt: String = meeting.description.chars().take(20).collect();
    format!(
        "🚨 You're late to the meeting {} • {excerpt}! \nPlease join as soon as possible. 🚨\
         \nIf you're unable to attend, please let the organizer know.\
         \nOr join [HERE]({invite}) to confirm your attendance.\nThank you!",
        meeting.title
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::model::RsvpResponse;
    use chrono::{FixedOffset, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn meeting_at(offset_secs: i64, duration: u32) -> Meeting {
        let start = (now() + Duration::seconds(offset_secs))
            .with_timezone(&FixedOffset::east_opt(3600).unwrap());
        Meeting::new("Standup", "Daily sync with the whole team", start, duration, UserId(1))
    }

    #[test]
    fn reminder_window_is_one_minute_wide() {
        let w = CheckWindows::default();
        assert_eq!(due_check(&meeting_at(30 * 60, 30), now(), w), DueCheck::Reminder);
        assert_eq!(due_check(&meeting_at(29 * 60 + 1, 30), now(), w), DueCheck::Reminder);
        assert_eq!(due_check(&meeting_at(29 * 60, 30), now(), w), DueCheck::None);
        assert_eq!(due_check(&meeting_at(30 * 60 + 1, 30), now(), w), DueCheck::None);
    }

    #[test]
    fn attendance_after_grace_until_end() {
        let w = CheckWindows::default();
        assert_eq!(due_check(&meeting_at(-9 * 60, 60), now(), w), DueCheck::None);
        assert_eq!(due_check(&meeting_at(-10 * 60, 60), now(), w), DueCheck::Attendance);
        assert_eq!(due_check(&meeting_at(-60 * 60, 60), now(), w), DueCheck::Expire);
    }

    #[test]
    fn latched_meetings_never_fire() {
        let mut m = meeting_at(30 * 60, 30);
        m.reminder_sent = true;
        assert_eq!(due_check(&m, now(), CheckWindows::default()), DueCheck::None);
        let mut m = meeting_at(-15 * 60, 30);
        m.reminder_sent = true;
        assert_eq!(due_check(&m, now(), CheckWindows::default()), DueCheck::None);
    }

    #[test]
    fn attendance_prefers_yes_rsvps() {
        let mut m = meeting_at(-15 * 60, 60);
        m.participants = vec![UserId(1), UserId(2), UserId(3)];
        assert_eq!(missing_attendees(&m, &[UserId(2)]), vec![UserId(1), UserId(3)]);

        m.rsvp_status.insert(UserId(3), RsvpResponse::Yes);
        m.rsvp_status.insert(UserId(1), RsvpResponse::No);
        assert_eq!(missing_attendees(&m, &[UserId(2)]), vec![UserId(3)]);
        assert!(missing_attendees(&m, &[UserId(3)]).is_empty());
    }

    #[test]
    fn invite_ttl_covers_rest_of_meeting() {
        assert_eq!(invite_ttl_secs(&meeting_at(-15 * 60, 60), now()), 45 * 60);
        assert_eq!(invite_ttl_secs(&meeting_at(-60 * 60, 60), now()), 60);
    }

    #[test]
    fn texts_mention_audience() {
        let mut m = meeting_at(30 * 60, 30);
        assert!(reminder_text(&m, Duration::minutes(30)).starts_with("@everyone"));
        m.participants = vec![UserId(5), UserId(6)];
        let text = reminder_text(&m, Duration::minutes(30));
        assert!(text.starts_with("<@5> <@6>"));
        assert!(text.contains("starts in 30 minutes"));

        let notice = late_notice(&m, "https://discord.gg/x");
        assert!(notice.contains("Standup • Daily sync with the"));
        assert!(notice.contains("[HERE](https://discord.gg/x)"));
    }
}
