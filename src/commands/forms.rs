//! Pop-up forms behind the board header buttons.
//!
//! Pressing "Create Task" or "Schedule Meeting" opens a [`Modal`]; submitting
//! it comes back as a modal-submit interaction that [`Form::submission`]
//! turns into the same [`Command`] the slash commands produce.

use super::Command;
use crate::error::{BoardError, Result};
use crate::model::ChannelId;
use crate::platform::{InputStyle, Modal, TextInput};

const TASK_FORM_ID: &str = "task_form";
const MEETING_FORM_ID: &str = "meeting_form";

/// Which form a header button opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    Task,
    Meeting,
}

impl Form {
    #[must_use]
    pub fn custom_id(self) -> &'static str {
        match self {
            Self::Task => TASK_FORM_ID,
            Self::Meeting => MEETING_FORM_ID,
        }
    }

    #[must_use]
    pub fn modal(self) -> Modal {
        match self {
            Self::Task => Modal {
                custom_id: TASK_FORM_ID.to_owned(),
                title: "Create a New Task".to_owned(),
                inputs: vec![
                    input("title", "Task Title", "Enter the task title...", true, 100),
                    TextInput {
                        style: InputStyle::Paragraph,
                        ..input(
                            "description",
                            "Task Description",
                            "Enter the task description...",
                            true,
                            500,
                        )
                    },
                    input("due_date", "Due Date (Optional)", "DD-MM-YYYY", false, 10),
                ],
            },
            // Five inputs is the most a modal can hold, so the description
            // is left to /create_meeting.
            Self::Meeting => Modal {
                custom_id: MEETING_FORM_ID.to_owned(),
                title: "Schedule a Meeting".to_owned(),
                inputs: vec![
                    input("title", "Meeting Title", "Enter the meeting title...", true, 100),
                    input("start_time", "Start Time", "DD-MM-YYYY HH:MM", true, 16),
                    input("duration", "Duration (minutes)", "60", true, 4),
                    input(
                        "participants",
                        "Participants (Optional)",
                        "@everyone or user ids separated by spaces",
                        false,
                        1000,
                    ),
                    input("voice_channel", "Voice Channel ID (Optional)", "123456789", false, 25),
                ],
            },
        }
    }

    /// Turn a submitted form into the command it stands for.
    ///
    /// # Errors
    ///
    /// [`BoardError::Validation`] for an unknown form, a missing required
    /// field, or a malformed duration or channel.
    pub fn submission(custom_id: &str, fields: &[(String, String)]) -> Result<Command> {
        let fields = Fields(fields);
        match custom_id {
            TASK_FORM_ID => Ok(Command::CreateTask {
                title: fields.required("title")?,
                description: fields.required("description")?,
                due_date: fields.optional("due_date"),
            }),
            MEETING_FORM_ID => {
                let duration = fields.required("duration")?;
                Ok(Command::CreateMeeting {
                    title: fields.required("title")?,
                    description: String::new(),
                    start_time: fields.required("start_time")?,
                    duration: duration.parse().map_err(|_| {
                        BoardError::Validation("Duration must be a whole number".to_owned())
                    })?,
                    participants: fields.optional("participants"),
                    voice_channel: fields
                        .optional("voice_channel")
                        .map(|raw| parse_channel(&raw))
                        .transpose()?,
                })
            }
            other => Err(BoardError::Validation(format!("Unknown form `{other}`"))),
        }
    }
}

fn input(id: &str, label: &str, placeholder: &str, required: bool, max_length: u16) -> TextInput {
    TextInput {
        custom_id: id.to_owned(),
        label: label.to_owned(),
        style: InputStyle::Short,
        placeholder: Some(placeholder.to_owned()),
        required,
        max_length,
    }
}

/// `<#id>` or a bare id.
fn parse_channel(raw: &str) -> Result<ChannelId> {
    let trimmed = raw.trim().trim_start_matches("<#").trim_end_matches('>');
    ChannelId::parse(trimmed)
        .ok_or_else(|| BoardError::Validation(format!("`{raw}` is not a channel id")))
}

struct Fields<'a>(&'a [(String, String)]);

impl Fields<'_> {
    /// Trimmed value; blank counts as absent.
    fn optional(&self, id: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }

    fn required(&self, id: &str) -> Result<String> {
        self.optional(id)
            .ok_or_else(|| BoardError::Validation(format!("Missing field `{id}`")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn task_form_matches_create_limits() {
        let modal = Form::Task.modal();
        assert_eq!(modal.custom_id, "task_form");
        let limits: Vec<(&str, u16, bool)> = modal
            .inputs
            .iter()
            .map(|i| (i.custom_id.as_str(), i.max_length, i.required))
            .collect();
        assert_eq!(
            limits,
            vec![
                ("title", 100, true),
                ("description", 500, true),
                ("due_date", 10, false),
            ]
        );
        assert_eq!(modal.inputs[1].style, InputStyle::Paragraph);
        assert!(Form::Meeting.modal().inputs.len() <= 5);
    }

    #[test]
    fn blank_due_date_means_none() {
        let cmd = Form::submission(
            "task_form",
            &fields(&[("title", " Ship "), ("description", "notes"), ("due_date", "  ")]),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::CreateTask {
                title: "Ship".to_owned(),
                description: "notes".to_owned(),
                due_date: None,
            }
        );
    }

    #[test]
    fn meeting_form_parses_duration_and_channel() {
        let cmd = Form::submission(
            "meeting_form",
            &fields(&[
                ("title", "Sync"),
                ("start_time", "01-07-2025 10:00"),
                ("duration", "45"),
                ("participants", ""),
                ("voice_channel", "<#77>"),
            ]),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::CreateMeeting {
                title: "Sync".to_owned(),
                description: String::new(),
                start_time: "01-07-2025 10:00".to_owned(),
                duration: 45,
                participants: None,
                voice_channel: Some(ChannelId(77)),
            }
        );
    }

    #[test]
    fn bad_submissions_are_validation_errors() {
        let err = Form::submission("task_form", &fields(&[("title", "t")])).unwrap_err();
        assert_eq!(err.to_string(), "Missing field `description`");

        let err = Form::submission(
            "meeting_form",
            &fields(&[
                ("title", "Sync"),
                ("start_time", "01-07-2025 10:00"),
                ("duration", "an hour"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
        assert!(Form::submission("other", &[]).is_err());
    }
}
