#![forbid(unsafe_code)]

pub mod advancer;
pub mod error;
pub mod locks;
pub mod replenishment;

pub use progress_core::Clock;

pub use advancer::{AdvanceOutcome, ProgressAdvancer};
pub use error::{AdvanceError, ReplenishError};
pub use locks::KeyedLocks;
pub use replenishment::{PacedReplenishment, Replenishment, ReplenishmentPolicy};
