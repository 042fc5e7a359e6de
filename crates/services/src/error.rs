//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::model::{PacingError, TrackerError};
use storage::repository::StorageError;

/// Errors emitted by a `ReplenishmentPolicy`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReplenishError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Pacing(#[from] PacingError),
}

/// Errors emitted by `ProgressAdvancer`.
///
/// None of these are retried internally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdvanceError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] TrackerError),
    #[error("persistence failure: {0}")]
    Persistence(#[source] StorageError),
    #[error(transparent)]
    Replenishment(#[from] ReplenishError),
}

impl AdvanceError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdvanceError::NotFound { .. })
    }

    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, AdvanceError::InvariantViolation(_))
    }

    /// Maps a lookup failure: a missing row names the entity, anything else is persistence.
    pub(crate) fn lookup(entity: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |err| match err {
            StorageError::NotFound => AdvanceError::NotFound { entity },
            other => AdvanceError::Persistence(other),
        }
    }
}
