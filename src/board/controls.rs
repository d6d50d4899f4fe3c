//! Interactive buttons and their custom-id encoding.
//!
//! Custom ids are the only state a button carries, so every action the bot
//! understands round-trips through [`ControlAction::custom_id`] and
//! [`ControlAction::parse`].

use crate::model::{RsvpResponse, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

/// A button attached to a block or a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub action: ControlAction,
    pub label: String,
    pub emoji: Option<String>,
    pub style: ControlStyle,
}

impl Control {
    #[must_use]
    pub fn custom_id(&self) -> String {
        self.action.custom_id()
    }

    /// Header button for opening the task creation flow.
    #[must_use]
    pub fn create_task() -> Self {
        Self {
            action: ControlAction::CreateTask,
            label: "Create Task".to_owned(),
            emoji: Some("➕".to_owned()),
            style: ControlStyle::Primary,
        }
    }

    /// Header button for opening the meeting creation flow.
    #[must_use]
    pub fn create_meeting() -> Self {
        Self {
            action: ControlAction::CreateMeeting,
            label: "Schedule Meeting".to_owned(),
            emoji: Some("📅".to_owned()),
            style: ControlStyle::Primary,
        }
    }

    /// One button per status, for the status picker.
    #[must_use]
    pub fn status_picker(task_id: u64) -> Vec<Self> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| Self {
                action: ControlAction::SetStatus { task_id, status },
                label: status.label().to_owned(),
                emoji: Some(status.emoji().to_owned()),
                style: ControlStyle::Secondary,
            })
            .collect()
    }

    /// Yes / Maybe / No buttons for one meeting.
    #[must_use]
    pub fn rsvp_row(meeting_id: u64) -> Vec<Self> {
        RsvpResponse::ALL
            .into_iter()
            .map(|response| Self {
                action: ControlAction::Rsvp {
                    meeting_id,
                    response,
                },
                label: response.label().to_owned(),
                emoji: Some(response.emoji().to_owned()),
                style: match response {
                    RsvpResponse::Yes => ControlStyle::Success,
                    RsvpResponse::Maybe => ControlStyle::Secondary,
                    RsvpResponse::No => ControlStyle::Danger,
                },
            })
            .collect()
    }
}

/// What pressing a button asks the bot to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    CreateTask,
    CreateMeeting,
    SetStatus { task_id: u64, status: TaskStatus },
    Rsvp { meeting_id: u64, response: RsvpResponse },
}

impl ControlAction {
    #[must_use]
    pub fn custom_id(self) -> String {
        match self {
            Self::CreateTask => "create_task".to_owned(),
            Self::CreateMeeting => "create_meeting".to_owned(),
            Self::SetStatus { task_id, status } => format!("status:{task_id}:{}", status.key()),
            Self::Rsvp {
                meeting_id,
                response,
            } => format!("rsvp:{meeting_id}:{}", response.key()),
        }
    }

    #[must_use]
    pub fn parse(custom_id: &str) -> Option<Self> {
        match custom_id {
            "create_task" => return Some(Self::CreateTask),
            "create_meeting" => return Some(Self::CreateMeeting),
            _ => {}
        }
        let mut parts = custom_id.splitn(3, ':');
        let (Some(prefix), Some(id), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        let id = id.parse::<u64>().ok()?;
        match prefix {
            "status" => Some(Self::SetStatus {
                task_id: id,
                status: TaskStatus::parse(value)?,
            }),
            "rsvp" => Some(Self::Rsvp {
                meeting_id: id,
                response: RsvpResponse::parse(value)?,
            }),
            _ => None,
        }
    }
}
