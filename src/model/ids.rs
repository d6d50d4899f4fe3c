//! Discord snowflake identifiers.
//!
//! Each kind of id gets its own newtype so a user id can never be passed where
//! a channel id is expected. All of them serialise as plain JSON integers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw snowflake value.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }

            /// Parse the decimal string form Discord uses on the wire.
            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                raw.trim().parse::<u64>().ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

snowflake!(
    /// A Discord user.
    UserId
);
snowflake!(
    /// A Discord channel, thread, or voice channel.
    ChannelId
);
snowflake!(
    /// A Discord server.
    GuildId
);
snowflake!(
    /// A message within a channel.
    MessageId
);

impl UserId {
    /// `<@id>` mention token.
    #[must_use]
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }

    /// Parse a user mention (`<@123>`, `<@!123>`) or a bare id.
    #[must_use]
    pub fn from_mention(token: &str) -> Option<Self> {
        let trimmed = token
            .trim()
            .trim_start_matches("<@")
            .trim_start_matches('!')
            .trim_end_matches('>');
        Self::parse(trimmed)
    }
}

impl ChannelId {
    /// `<#id>` mention token; Discord renders it as a clickable channel link.
    #[must_use]
    pub fn mention(self) -> String {
        format!("<#{}>", self.0)
    }
}

impl MessageId {
    /// Milliseconds since the Unix epoch encoded in the snowflake.
    #[must_use]
    pub fn created_at_millis(self) -> u64 {
        const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;
        (self.0 >> 22) + DISCORD_EPOCH_MS
    }
}

/// Render a list of users as mentions, or `fallback` when empty.
#[must_use]
pub fn mention_list(users: &[UserId], fallback: &str) -> String {
    if users.is_empty() {
        return fallback.to_owned();
    }
    users
        .iter()
        .map(|u| u.mention())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn user_mention_forms_parse() {
        assert_eq!(UserId::from_mention("<@42>"), Some(UserId(42)));
        assert_eq!(UserId::from_mention("<@!42>"), Some(UserId(42)));
        assert_eq!(UserId::from_mention("42"), Some(UserId(42)));
        assert_eq!(UserId::from_mention("@everyone"), None);
    }

    #[test]
    fn ids_serialize_as_integers() {
        let json = serde_json::to_string(&ChannelId(7)).unwrap();
        assert_eq!(json, "7");
        let back: ChannelId = serde_json::from_str("7").unwrap();
        assert_eq!(back, ChannelId(7));
    }

    #[test]
    fn mention_list_falls_back_when_empty() {
        assert_eq!(mention_list(&[], "Unassigned"), "Unassigned");
        assert_eq!(mention_list(&[UserId(1), UserId(2)], "-"), "<@1>, <@2>");
    }

    #[test]
    fn message_snowflake_timestamp() {
        // 175928847299117063 is the example snowflake from Discord's docs.
        let id = MessageId(175_928_847_299_117_063);
        assert_eq!(id.created_at_millis(), 1_462_015_105_796);
    }
}
