//! Cache index error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StateError {
    /// A cache row was found in a state that only a second writer could produce.
    #[error("invalid state transition for {entry} from {from} to {to}")]
    InvalidTransition {
        entry: String,
        from: String,
        to: String,
    },

    #[error("database error: {message}")]
    DatabaseError { message: String },

    #[error("transaction failed: {message}")]
    TransactionFailed { message: String },

    #[error("state corrupted: {message}")]
    StateCorrupted { message: String },

    #[error("migration failed: {message}")]
    MigrationFailed { message: String },
}

impl UserFacingError for StateError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidTransition { .. } | Self::StateCorrupted { .. } => {
                Some("Make sure only one process uses the cache directory.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidTransition { .. } => "state.invalid_transition",
            Self::DatabaseError { .. } => "state.database",
            Self::TransactionFailed { .. } => "state.transaction_failed",
            Self::StateCorrupted { .. } => "state.corrupted",
            Self::MigrationFailed { .. } => "state.migration_failed",
        };
        Some(code)
    }
}
