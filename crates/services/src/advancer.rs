use std::sync::Arc;

use tracing::{debug, warn};

use progress_core::{
    model::{
        ActualBlock, ProgressCounter, StudentId, StudentProblemId, SubfieldId, Tracker,
        TrackerUpdate,
    },
    progress::{AdvanceStep, plan_advance},
};
use storage::repository::{
    ContentIndex, CounterRepository, ProgressPersistence, Storage, TrackerRepository,
};

use crate::error::AdvanceError;
use crate::locks::KeyedLocks;
use crate::replenishment::ReplenishmentPolicy;

//
// ─── OUTCOME ───────────────────────────────────────────────────────────────────
//

/// Result of advancing a tracker past a completed problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The tracker moved; `update` names the branch that was taken.
    Advanced {
        next_problem_id: StudentProblemId,
        update: TrackerUpdate,
    },
    /// The tracker is disabled; nothing was read past it and nothing was written.
    Disabled,
}

impl AdvanceOutcome {
    #[must_use]
    pub fn next_problem_id(&self) -> Option<StudentProblemId> {
        match self {
            AdvanceOutcome::Advanced {
                next_problem_id, ..
            } => Some(*next_problem_id),
            AdvanceOutcome::Disabled => None,
        }
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Decides and persists the next problem for a student after one is completed.
///
/// Calls for the same (student, subfield) are serialized; the tracker and the
/// quota counter are committed together.
pub struct ProgressAdvancer {
    content: Arc<dyn ContentIndex>,
    trackers: Arc<dyn TrackerRepository>,
    counters: Arc<dyn CounterRepository>,
    progress: Arc<dyn ProgressPersistence>,
    replenishment: Arc<dyn ReplenishmentPolicy>,
    locks: KeyedLocks<(StudentId, SubfieldId)>,
}

impl ProgressAdvancer {
    #[must_use]
    pub fn new(
        content: Arc<dyn ContentIndex>,
        trackers: Arc<dyn TrackerRepository>,
        counters: Arc<dyn CounterRepository>,
        progress: Arc<dyn ProgressPersistence>,
        replenishment: Arc<dyn ReplenishmentPolicy>,
    ) -> Self {
        Self {
            content,
            trackers,
            counters,
            progress,
            replenishment,
            locks: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, replenishment: Arc<dyn ReplenishmentPolicy>) -> Self {
        Self::new(
            Arc::clone(&storage.content),
            Arc::clone(&storage.trackers),
            Arc::clone(&storage.counters),
            Arc::clone(&storage.progress),
            replenishment,
        )
    }

    /// Advance `student_id` past `completed`, returning the problem to attempt next.
    ///
    /// # Errors
    ///
    /// - `AdvanceError::NotFound` if the problem, tracker, block, or next block is missing
    /// - `AdvanceError::InvariantViolation` if lap or position exceed their bounds
    /// - `AdvanceError::Persistence` if the store fails or rejects the commit
    /// - `AdvanceError::Replenishment` if the replenishment policy fails
    ///
    /// No write happens when an error is returned.
    pub async fn advance(
        &self,
        student_id: StudentId,
        completed: StudentProblemId,
    ) -> Result<AdvanceOutcome, AdvanceError> {
        let located = self.tracker_for(student_id, completed).await?;
        let key = (located.student_id(), located.subfield_id());
        let _guard = self.locks.acquire(&key).await;

        // Re-read under the lock so a concurrent advance is never overwritten.
        let tracker = self.tracker_for(student_id, completed).await?;
        if !tracker.is_enabled() {
            warn!(
                student = %student_id,
                subfield = %tracker.subfield_id(),
                tracker = %tracker.id(),
                "tracker disabled; not advancing"
            );
            return Ok(AdvanceOutcome::Disabled);
        }

        let remaining = self
            .counters
            .get_remaining_counter(tracker.student_id(), tracker.subfield_id())
            .await
            .map_err(AdvanceError::Persistence)?;

        let (update, counter) = if remaining == 0 {
            self.replenish(&tracker).await?
        } else {
            let update = self.plan_position(&tracker, completed).await?;
            let counter =
                ProgressCounter::new(tracker.student_id(), tracker.subfield_id(), remaining)
                    .decremented();
            (update, counter)
        };

        self.progress
            .commit_progress(tracker.id(), &update.to_patch(), &counter)
            .await
            .map_err(AdvanceError::Persistence)?;

        let next = tracker.apply(&update);
        debug!(
            student = %student_id,
            subfield = %tracker.subfield_id(),
            transition = update.as_str(),
            block = %next.actual_block_id(),
            problem = %next.student_problem_id(),
            lap = next.current_lap(),
            remaining = counter.todo_remaining,
            "tracker advanced"
        );

        Ok(AdvanceOutcome::Advanced {
            next_problem_id: next.student_problem_id(),
            update,
        })
    }

    async fn tracker_for(
        &self,
        student_id: StudentId,
        completed: StudentProblemId,
    ) -> Result<Tracker, AdvanceError> {
        let tracker = self
            .trackers
            .find_tracker_by_student_problem(completed)
            .await
            .map_err(AdvanceError::lookup("tracker"))?;
        if tracker.student_id() != student_id {
            return Err(AdvanceError::NotFound { entity: "tracker" });
        }
        Ok(tracker)
    }

    /// Position branches: in-block advance, lap rollover, block rollover.
    async fn plan_position(
        &self,
        tracker: &Tracker,
        completed: StudentProblemId,
    ) -> Result<TrackerUpdate, AdvanceError> {
        let problem = self
            .content
            .find_problem(completed)
            .await
            .map_err(AdvanceError::lookup("student problem"))?;
        let block = self
            .content
            .find_block(tracker.actual_block_id())
            .await
            .map_err(AdvanceError::lookup("block"))?;

        let step = plan_advance(tracker, &block, problem.position_in_block()).inspect_err(|err| {
            warn!(tracker = %tracker.id(), block = %block.id(), %err, "tracker invariant violated");
        })?;

        let update = match step {
            AdvanceStep::WithinBlock { next_position } => {
                let next = self.problem_at(&block, next_position).await?;
                TrackerUpdate::InBlockAdvance { next_problem: next }
            }
            AdvanceStep::LapRollover { next_lap } => {
                let next = self.problem_at(&block, step.target_position()).await?;
                TrackerUpdate::LapRollover {
                    next_problem: next,
                    lap: next_lap,
                }
            }
            AdvanceStep::BlockRollover { next_block_order } => {
                let next_block = self
                    .content
                    .find_block_by_order(
                        tracker.student_id(),
                        tracker.subfield_id(),
                        next_block_order,
                    )
                    .await
                    .map_err(AdvanceError::lookup("next block"))?;
                let next = self.problem_at(&next_block, step.target_position()).await?;
                TrackerUpdate::BlockRollover {
                    next_block: next_block.id(),
                    next_problem: next,
                }
            }
            AdvanceStep::CurriculumEnd => {
                return Err(AdvanceError::NotFound {
                    entity: "next block",
                });
            }
        };
        Ok(update)
    }

    async fn problem_at(
        &self,
        block: &ActualBlock,
        position: u32,
    ) -> Result<StudentProblemId, AdvanceError> {
        self.content
            .find_problem_by_position(block.id(), position)
            .await
            .map(|p| p.id())
            .map_err(AdvanceError::lookup("student problem"))
    }

    /// Quota exhausted: the policy decides the snapshot, which must still be consistent.
    async fn replenish(
        &self,
        tracker: &Tracker,
    ) -> Result<(TrackerUpdate, ProgressCounter), AdvanceError> {
        let out = self
            .replenishment
            .replenish(
                tracker.student_id(),
                tracker.subfield_id(),
                tracker.actual_block_id(),
                tracker,
            )
            .await?;

        let next = tracker.patched(&out.patch);
        let block = self
            .content
            .find_block(next.actual_block_id())
            .await
            .map_err(AdvanceError::lookup("block"))?;
        let problem = self
            .content
            .find_problem(next.student_problem_id())
            .await
            .map_err(AdvanceError::lookup("student problem"))?;
        next.validate_against(&block, &problem).inspect_err(|err| {
            warn!(tracker = %tracker.id(), %err, "replenishment produced an invalid tracker");
        })?;

        Ok((
            TrackerUpdate::Replenish { patch: out.patch },
            ProgressCounter::new(tracker.student_id(), tracker.subfield_id(), out.remaining),
        ))
    }
}
