mod block;
mod ids;
mod pacing;
mod tracker;

pub use ids::{ActualBlockId, ParseIdError, StudentId, StudentProblemId, SubfieldId, TrackerId};

pub use block::{ActualBlock, ContentError, StudentProblem};
pub use pacing::{PacingError, PacingSettings, ProgressCounter};
pub use tracker::{Tracker, TrackerError, TrackerPatch, TrackerUpdate};
