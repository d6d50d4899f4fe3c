//! Board rendering and reconciliation.
//!
//! A board is a dedicated channel that shows every entity of one kind. The
//! layouts in [`task_layout`] and [`meeting_layout`] turn store contents into
//! an ordered list of [`Block`]s; [`reconciler`] wipes the channel and posts
//! those blocks again after every mutation.

pub mod controls;
pub mod meeting_layout;
pub mod reconciler;
pub mod task_layout;

pub use controls::{Control, ControlAction, ControlStyle};
pub use meeting_layout::{MeetingLayout, Urgency};
pub use reconciler::{
    BoardReconciler, BoardState, Boards, ConfigureOutcome, OldChannel, RefreshHook,
    RefreshOutcome, SkipReason,
};
pub use task_layout::TaskLayout;

use crate::model::ChannelId;
use crate::store::Entity;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Most fields a single block may carry.
pub const MAX_FIELDS_PER_BLOCK: usize = 25;
/// Longest field value, in characters.
pub const MAX_FIELD_VALUE_LEN: usize = 1024;
/// Longest field name or block title, in characters.
pub const MAX_FIELD_NAME_LEN: usize = 256;
/// Longest block description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// Zero-width space, used for visual spacer fields.
pub(crate) const SPACER: &str = "\u{200b}";

pub(crate) const COLOR_BLUE: u32 = 0x3498DB;
pub(crate) const COLOR_GREEN: u32 = 0x2ECC71;
pub(crate) const COLOR_RED: u32 = 0xE74C3C;
pub(crate) const COLOR_GREY: u32 = 0x95A5A6;

/// Non-bot members currently in each watched voice channel.
pub type VoiceCounts = BTreeMap<ChannelId, usize>;

/// One name/value row inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Field {
    /// Build a field, truncating name and value to platform limits.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        let name = truncate(&name.into(), MAX_FIELD_NAME_LEN);
        let value = truncate(&value.into(), MAX_FIELD_VALUE_LEN);
        Self {
            name: if name.is_empty() { SPACER.to_owned() } else { name },
            value: if value.is_empty() { SPACER.to_owned() } else { value },
            inline,
        }
    }

    /// Blank full-width row separating entries.
    #[must_use]
    pub fn spacer() -> Self {
        Self::new(SPACER, SPACER, false)
    }
}

/// A structured display unit: one embed plus any buttons attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub title: String,
    pub description: Option<String>,
    /// 24-bit RGB accent colour.
    pub color: u32,
    pub fields: Vec<Field>,
    pub footer: Option<String>,
    pub controls: Vec<Control>,
}

impl Block {
    #[must_use]
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: truncate(&title.into(), MAX_FIELD_NAME_LEN),
            description: None,
            color,
            fields: Vec::new(),
            footer: None,
            controls: Vec::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(truncate(&text.into(), MAX_DESCRIPTION_LEN));
        self
    }

    #[must_use]
    pub fn field(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        inline: bool,
    ) -> Self {
        self.fields.push(Field::new(name, value, inline));
        self
    }

    #[must_use]
    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }

    #[must_use]
    pub fn controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }

    pub fn push_field(&mut self, field: Field) {
        self.fields.push(field);
    }
}

/// Split any block carrying more than [`MAX_FIELDS_PER_BLOCK`] fields into
/// consecutive blocks with the same title. Controls stay on the last piece.
#[must_use]
pub fn split_oversized(blocks: Vec<Block>) -> Vec<Block> {
    let mut out = Vec::with_capacity(blocks.len());
    for block in blocks {
        if block.fields.len() <= MAX_FIELDS_PER_BLOCK {
            out.push(block);
            continue;
        }
        let Block {
            title,
            description,
            color,
            fields,
            footer,
            controls,
        } = block;
        let pieces: Vec<Vec<Field>> = fields
            .chunks(MAX_FIELDS_PER_BLOCK)
            .map(<[Field]>::to_vec)
            .collect();
        let last = pieces.len().saturating_sub(1);
        for (index, fields) in pieces.into_iter().enumerate() {
            out.push(Block {
                title: title.clone(),
                description: if index == 0 { description.clone() } else { None },
                color,
                fields,
                footer: if index == last { footer.clone() } else { None },
                controls: if index == last { controls.clone() } else { Vec::new() },
            });
        }
    }
    out
}

/// Rendering strategy for one kind of board.
///
/// Implementations are pure: identical entities, `now` and voice counts give
/// identical blocks. Mentions are emitted as `<@id>` tokens and resolved by
/// the client.
pub trait BoardLayout: Send + Sync + 'static {
    type Entity: Entity;

    /// Channel name used when the board is created.
    fn channel_name(&self) -> &'static str;

    /// Static header carrying the persistent creation control.
    fn header(&self) -> Block;

    /// Voice channels whose occupancy the next render should show.
    fn watched_channels(&self, _entities: &[Self::Entity], _now: DateTime<Utc>) -> Vec<ChannelId> {
        Vec::new()
    }

    /// Body blocks for the current entities. `voice` holds counts for the
    /// channels from [`watched_channels`](Self::watched_channels) that could
    /// be read.
    fn render(
        &self,
        entities: &[Self::Entity],
        now: DateTime<Utc>,
        voice: &VoiceCounts,
    ) -> Vec<Block>;
}

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn long_values_are_truncated() {
        let field = Field::new("n", "x".repeat(2000), false);
        assert_eq!(field.value.chars().count(), MAX_FIELD_VALUE_LEN);
        assert!(field.value.ends_with('…'));
    }

    #[test]
    fn empty_values_become_spacers() {
        let field = Field::new("", "", true);
        assert_eq!(field.name, SPACER);
        assert_eq!(field.value, SPACER);
    }

    #[test]
    fn oversized_blocks_split_in_order() {
        let mut block = Block::new("big", COLOR_BLUE)
            .description("intro")
            .footer("end");
        for i in 0..60 {
            block.push_field(Field::new(format!("f{i}"), "v", true));
        }
        let pieces = split_oversized(vec![block]);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].fields.len(), 25);
        assert_eq!(pieces[2].fields.len(), 10);
        assert_eq!(pieces[0].description.as_deref(), Some("intro"));
        assert!(pieces[1].description.is_none());
        assert_eq!(pieces[2].footer.as_deref(), Some("end"));
        assert_eq!(pieces[1].fields[0].name, "f25");
    }
}
