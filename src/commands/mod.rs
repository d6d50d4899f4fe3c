//! Slash commands, button presses and form submissions.
//!
//! [`Command`] is the typed form of an [`Interaction`]; [`CommandHandler`]
//! executes it against the managers and refreshes the affected boards.

pub mod definitions;
pub mod forms;
pub mod handler;

pub use definitions::command_definitions;
pub use forms::Form;
pub use handler::CommandHandler;

use crate::board::ControlAction;
use crate::error::{BoardError, Result};
use crate::model::{ChannelId, RsvpResponse, TaskStatus};
use crate::platform::{CommandOption, Interaction, InteractionKind, OptionValue};

/// One user request, parsed and typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Setup,
    ResetData,
    Help,
    List,
    CreateTask {
        title: String,
        description: String,
        due_date: Option<String>,
    },
    /// `users` is the raw mention list as typed.
    Assign { task_id: u64, users: String },
    /// Opens the status picker.
    Update { task_id: u64 },
    SetStatus { task_id: u64, status: TaskStatus },
    Delete { task_id: u64 },
    Thread { task_id: u64 },
    DeleteThread { task_id: u64 },
    Info { task_id: u64 },
    CreateMeeting {
        title: String,
        description: String,
        start_time: String,
        duration: i64,
        participants: Option<String>,
        voice_channel: Option<ChannelId>,
    },
    DeleteMeeting { meeting_id: u64 },
    Rsvp { meeting_id: u64, response: RsvpResponse },
    /// A board header button; answered with a form, not a reply.
    OpenForm(Form),
}

impl Command {
    /// Parse an interaction.
    ///
    /// # Errors
    ///
    /// [`BoardError::Validation`] for unknown commands or buttons and for
    /// missing or mistyped options.
    pub fn parse(interaction: &Interaction) -> Result<Self> {
        match &interaction.kind {
            InteractionKind::Component { custom_id } => Self::from_component(custom_id),
            InteractionKind::Command { name, options } => {
                Self::from_command(name, &Options(options))
            }
            InteractionKind::ModalSubmit { custom_id, fields } => {
                Form::submission(custom_id, fields)
            }
        }
    }

    fn from_component(custom_id: &str) -> Result<Self> {
        let action = ControlAction::parse(custom_id)
            .ok_or_else(|| BoardError::Validation(format!("Unknown button `{custom_id}`")))?;
        Ok(match action {
            ControlAction::CreateTask => Self::OpenForm(Form::Task),
            ControlAction::CreateMeeting => Self::OpenForm(Form::Meeting),
            ControlAction::SetStatus { task_id, status } => Self::SetStatus { task_id, status },
            ControlAction::Rsvp {
                meeting_id,
                response,
            } => Self::Rsvp {
                meeting_id,
                response,
            },
        })
    }

    fn from_command(name: &str, opts: &Options<'_>) -> Result<Self> {
        Ok(match name {
            "setup" => Self::Setup,
            "reset_data" => Self::ResetData,
            "help" => Self::Help,
            "list" => Self::List,
            "create" => Self::CreateTask {
                title: opts.string("title")?,
                description: opts.string("description")?,
                due_date: opts.optional_string("due_date"),
            },
            "assign" => Self::Assign {
                task_id: opts.id("task_id")?,
                users: opts.string("users")?,
            },
            "update" => Self::Update {
                task_id: opts.id("task_id")?,
            },
            "delete" => Self::Delete {
                task_id: opts.id("task_id")?,
            },
            "thread" => Self::Thread {
                task_id: opts.id("task_id")?,
            },
            "delete_thread" => Self::DeleteThread {
                task_id: opts.id("task_id")?,
            },
            "info" => Self::Info {
                task_id: opts.id("task_id")?,
            },
            "create_meeting" => Self::CreateMeeting {
                title: opts.string("title")?,
                description: opts.optional_string("description").unwrap_or_default(),
                start_time: opts.string("start_time")?,
                duration: opts.integer("duration")?,
                participants: opts.optional_string("participants"),
                voice_channel: opts.optional_channel("voice_channel"),
            },
            "delete_meeting" => Self::DeleteMeeting {
                meeting_id: opts.id("meeting_id")?,
            },
            other => {
                return Err(BoardError::Validation(format!("Unknown command `/{other}`")));
            }
        })
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::ResetData => "reset_data",
            Self::Help => "help",
            Self::List => "list",
            Self::CreateTask { .. } => "create",
            Self::Assign { .. } => "assign",
            Self::Update { .. } => "update",
            Self::SetStatus { .. } => "set_status",
            Self::Delete { .. } => "delete",
            Self::Thread { .. } => "thread",
            Self::DeleteThread { .. } => "delete_thread",
            Self::Info { .. } => "info",
            Self::CreateMeeting { .. } => "create_meeting",
            Self::DeleteMeeting { .. } => "delete_meeting",
            Self::Rsvp { .. } => "rsvp",
            Self::OpenForm(_) => "open_form",
        }
    }

    #[must_use]
    pub fn admin_only(&self) -> bool {
        matches!(self, Self::Setup | Self::ResetData)
    }

    /// Whether the reply is shown only to the invoking user. Meeting
    /// announcements are posted for the whole channel.
    #[must_use]
    pub fn ephemeral(&self) -> bool {
        !matches!(self, Self::CreateMeeting { .. })
    }
}

/// Lookup helpers over a command's options.
struct Options<'a>(&'a [CommandOption]);

impl Options<'_> {
    fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    fn missing(name: &str) -> BoardError {
        BoardError::Validation(format!("Missing option `{name}`"))
    }

    fn string(&self, name: &str) -> Result<String> {
        self.optional_string(name).ok_or_else(|| Self::missing(name))
    }

    fn optional_string(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            OptionValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn integer(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(OptionValue::Integer(n)) => Ok(*n),
            Some(OptionValue::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| BoardError::Validation(format!("`{name}` must be a whole number"))),
            _ => Err(Self::missing(name)),
        }
    }

    /// A positive entity id.
    fn id(&self, name: &str) -> Result<u64> {
        let raw = self.integer(name)?;
        u64::try_from(raw)
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| BoardError::Validation(format!("`{name}` must be a positive number")))
    }

    fn optional_channel(&self, name: &str) -> Option<ChannelId> {
        match self.get(name)? {
            OptionValue::Channel(c) => Some(*c),
            _ => None,
        }
    }
}
