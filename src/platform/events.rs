//! Inbound events from the gateway and the reply shape sent back.

use crate::board::{Block, Control};
use crate::model::{ChannelId, GuildId, MessageId, UserId};

/// Something the gateway session wants the runtime to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The session is (re)established.
    Ready { bot_user: UserId },
    /// A guild became available, at startup or after an outage.
    GuildAvailable(GuildId),
    GuildRemoved(GuildId),
    Interaction(Interaction),
    Message(ChannelMessage),
}

/// A message posted in a guild channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: UserId,
    pub author_is_bot: bool,
}

/// A slash command invocation, a button press, or a submitted form.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub id: String,
    /// Continuation token for the deferred reply.
    pub token: String,
    pub application_id: String,
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub user: UserId,
    /// Resolved permission bits of the invoking member.
    pub permissions: u64,
    pub kind: InteractionKind,
}

impl Interaction {
    const ADMINISTRATOR: u64 = 1 << 3;

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.permissions & Self::ADMINISTRATOR != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionKind {
    Command {
        name: String,
        options: Vec<CommandOption>,
    },
    Component {
        custom_id: String,
    },
    /// A filled-in [`Modal`]; `fields` pairs each input id with its value.
    ModalSubmit {
        custom_id: String,
        fields: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}

/// Typed slash-command option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Bool(bool),
    User(UserId),
    Channel(ChannelId),
}

/// Response to an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: Option<String>,
    pub blocks: Vec<Block>,
    pub controls: Vec<Control>,
    /// Visible only to the invoking user.
    pub ephemeral: bool,
}

impl Reply {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            blocks: Vec::new(),
            controls: Vec::new(),
            ephemeral: true,
        }
    }

    #[must_use]
    pub fn block(block: Block) -> Self {
        Self {
            content: None,
            blocks: vec![block],
            controls: Vec::new(),
            ephemeral: true,
        }
    }

    #[must_use]
    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.ephemeral = false;
        self
    }
}

/// Single-line or multi-line text box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStyle {
    Short,
    Paragraph,
}

/// One text input inside a [`Modal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput {
    pub custom_id: String,
    pub label: String,
    pub style: InputStyle,
    pub placeholder: Option<String>,
    pub required: bool,
    pub max_length: u16,
}

/// A pop-up form. It must be the first answer to an interaction; it cannot
/// follow a deferral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modal {
    pub custom_id: String,
    pub title: String,
    pub inputs: Vec<TextInput>,
}

/// What an interaction is answered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply(Reply),
    Modal(Modal),
}
