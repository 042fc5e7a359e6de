use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use progress_core::{
    model::{ActualBlockId, PacingSettings, StudentId, SubfieldId, Tracker, TrackerPatch},
    time::Clock,
};
use storage::repository::PacingRepository;

use crate::error::ReplenishError;

/// Result of a replenishment: the tracker changes to apply and the new quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replenishment {
    pub patch: TrackerPatch,
    pub remaining: u32,
}

/// Pacing recalculation invoked when a tracker's quota runs out.
///
/// Implementations must return a patch that keeps the tracker consistent with
/// its block (lap within bounds, problem inside the block).
#[async_trait]
pub trait ReplenishmentPolicy: Send + Sync {
    /// # Errors
    ///
    /// Returns `ReplenishError` if pacing data cannot be loaded.
    async fn replenish(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        actual_block_id: ActualBlockId,
        tracker: &Tracker,
    ) -> Result<Replenishment, ReplenishError>;
}

/// Refills the quota from per-subfield pacing, honoring weekly rest days.
///
/// The tracker keeps its position; only the rest flag changes.
pub struct PacedReplenishment {
    clock: Clock,
    pacing: Arc<dyn PacingRepository>,
}

impl PacedReplenishment {
    #[must_use]
    pub fn new(pacing: Arc<dyn PacingRepository>) -> Self {
        Self {
            clock: Clock::default(),
            pacing,
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl ReplenishmentPolicy for PacedReplenishment {
    async fn replenish(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        actual_block_id: ActualBlockId,
        tracker: &Tracker,
    ) -> Result<Replenishment, ReplenishError> {
        let pacing = self
            .pacing
            .get_pacing(student_id, subfield_id)
            .await?
            .unwrap_or_else(PacingSettings::default_daily);

        let weekday = self.clock.weekday();
        let resting = pacing.is_rest_day(weekday);
        let remaining = if resting {
            0
        } else {
            pacing.problems_per_cycle()
        };

        info!(
            student = %student_id,
            subfield = %subfield_id,
            block = %actual_block_id,
            problem = %tracker.student_problem_id(),
            ?weekday,
            resting,
            remaining,
            "replenished progress quota"
        );

        Ok(Replenishment {
            patch: TrackerPatch {
                is_rest: Some(resting),
                ..TrackerPatch::default()
            },
            remaining,
        })
    }
}
