use thiserror::Error;

use crate::model::{ContentError, PacingError, TrackerError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Pacing(#[from] PacingError),
}
