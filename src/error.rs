//! Error types for the task and meeting boards.

use crate::model::EntityKind;
use crate::platform::PlatformError;

/// Top-level error type for board operations.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// Entity id is unknown.
    #[error("{kind} #{id} not found")]
    NotFound { kind: EntityKind, id: u64 },

    /// Malformed input; raised before any store mutation.
    #[error("{0}")]
    Validation(String),

    /// The caller may not perform this action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The requested resource already exists.
    #[error("{0}")]
    Conflict(String),

    /// The board channel for this kind is unset or gone.
    #[error("the {0} board channel is not set up")]
    BoardMissing(EntityKind),

    /// Durable read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Chat platform could not be reached within the retry budget.
    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    /// Chat platform call failed.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoardError {
    /// Whether the message is safe to show to the invoking user verbatim.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Validation(_)
                | Self::PermissionDenied(_)
                | Self::Conflict(_)
                | Self::BoardMissing(_)
        )
    }

    /// Text for the invoking user. Internal failures collapse to a generic
    /// notice so no storage or transport detail leaks.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(reason) => reason.clone(),
            Self::BoardMissing(EntityKind::Task) => {
                "The task board is not set up. Ask an admin to run `/setup`.".to_owned()
            }
            Self::BoardMissing(EntityKind::Meeting) => {
                "The meeting board is not set up. Ask an admin to run `/setup`.".to_owned()
            }
            Self::Platform(PlatformError::Forbidden(_)) => {
                "I don't have permission to do that in this server.".to_owned()
            }
            other if other.is_user_facing() => other.to_string(),
            _ => "Something went wrong while processing your request.".to_owned(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BoardError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn not_found_names_the_entity() {
        let err = BoardError::NotFound {
            kind: EntityKind::Task,
            id: 9,
        };
        assert_eq!(err.user_message(), "Task #9 not found");
    }

    #[test]
    fn storage_failures_stay_generic() {
        let err = BoardError::Storage("disk full at /var/lib/tasks.json".to_owned());
        assert!(!err.is_user_facing());
        assert!(!err.user_message().contains("/var/lib"));
    }

    #[test]
    fn io_errors_convert() {
        let err: BoardError = std::io::Error::other("boom").into();
        assert!(matches!(err, BoardError::Io(_)));
    }
}
