use thiserror::Error;

use crate::model::block::{ActualBlock, StudentProblem};
use crate::model::ids::{ActualBlockId, StudentId, StudentProblemId, SubfieldId, TrackerId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Structural invariant violations on a tracker and the content it points at.
///
/// These indicate corrupted upstream data; they are never corrected silently.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("currentLap exceeds block.lap ({lap} > {max_lap})")]
    LapExceedsBlock { lap: u32, max_lap: u32 },

    #[error("problem position exceeds block size ({position} > {size})")]
    PositionExceedsBlock { position: u32, size: u32 },

    #[error("problem position must be >= 1")]
    ZeroPosition,

    #[error("problem {problem} does not belong to block {block}")]
    ProblemOutsideBlock {
        problem: StudentProblemId,
        block: ActualBlockId,
    },

    #[error("tracker points at block {expected} but block {found} was supplied")]
    BlockMismatch {
        expected: ActualBlockId,
        found: ActualBlockId,
    },

    #[error("block {block} belongs to a different student or subfield")]
    ForeignBlock { block: ActualBlockId },
}

//
// ─── TRACKER ───────────────────────────────────────────────────────────────────
//

/// Durable pointer of one student through one subfield's curriculum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    id: TrackerId,
    student_id: StudentId,
    subfield_id: SubfieldId,
    actual_block_id: ActualBlockId,
    student_problem_id: StudentProblemId,
    current_lap: u32,
    is_enabled: bool,
    is_rest: bool,
}

impl Tracker {
    #[must_use]
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn new(
        id: TrackerId,
        student_id: StudentId,
        subfield_id: SubfieldId,
        actual_block_id: ActualBlockId,
        student_problem_id: StudentProblemId,
        current_lap: u32,
        is_enabled: bool,
        is_rest: bool,
    ) -> Self {
        Self {
            id,
            student_id,
            subfield_id,
            actual_block_id,
            student_problem_id,
            current_lap,
            is_enabled,
            is_rest,
        }
    }

    #[must_use]
    pub fn id(&self) -> TrackerId {
        self.id
    }

    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    #[must_use]
    pub fn subfield_id(&self) -> SubfieldId {
        self.subfield_id
    }

    #[must_use]
    pub fn actual_block_id(&self) -> ActualBlockId {
        self.actual_block_id
    }

    #[must_use]
    pub fn student_problem_id(&self) -> StudentProblemId {
        self.student_problem_id
    }

    #[must_use]
    pub fn current_lap(&self) -> u32 {
        self.current_lap
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// Advisory only; rest-day handling belongs to the replenishment policy.
    #[must_use]
    pub fn is_rest(&self) -> bool {
        self.is_rest
    }

    /// Returns the tracker produced by applying `patch`.
    #[must_use]
    pub fn patched(&self, patch: &TrackerPatch) -> Self {
        Self {
            actual_block_id: patch.actual_block_id.unwrap_or(self.actual_block_id),
            student_problem_id: patch.student_problem_id.unwrap_or(self.student_problem_id),
            current_lap: patch.current_lap.unwrap_or(self.current_lap),
            is_enabled: patch.is_enabled.unwrap_or(self.is_enabled),
            is_rest: patch.is_rest.unwrap_or(self.is_rest),
            ..self.clone()
        }
    }

    /// Returns the tracker produced by applying a scheduler update.
    #[must_use]
    pub fn apply(&self, update: &TrackerUpdate) -> Self {
        self.patched(&update.to_patch())
    }

    /// Checks that the tracker is consistent with its block and problem.
    ///
    /// # Errors
    ///
    /// Returns the first `TrackerError` found.
    pub fn validate_against(
        &self,
        block: &ActualBlock,
        problem: &StudentProblem,
    ) -> Result<(), TrackerError> {
        if block.id() != self.actual_block_id {
            return Err(TrackerError::BlockMismatch {
                expected: self.actual_block_id,
                found: block.id(),
            });
        }
        if block.student_id() != self.student_id || block.subfield_id() != self.subfield_id {
            return Err(TrackerError::ForeignBlock { block: block.id() });
        }
        if problem.id() != self.student_problem_id || problem.actual_block_id() != block.id() {
            return Err(TrackerError::ProblemOutsideBlock {
                problem: self.student_problem_id,
                block: block.id(),
            });
        }
        if problem.position_in_block() > block.size() {
            return Err(TrackerError::PositionExceedsBlock {
                position: problem.position_in_block(),
                size: block.size(),
            });
        }
        if self.current_lap > block.max_lap() {
            return Err(TrackerError::LapExceedsBlock {
                lap: self.current_lap,
                max_lap: block.max_lap(),
            });
        }
        Ok(())
    }
}

//
// ─── UPDATES ───────────────────────────────────────────────────────────────────
//

/// Partial replacement of tracker fields; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerPatch {
    pub actual_block_id: Option<ActualBlockId>,
    pub student_problem_id: Option<StudentProblemId>,
    pub current_lap: Option<u32>,
    pub is_enabled: Option<bool>,
    pub is_rest: Option<bool>,
}

impl TrackerPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One scheduler decision, tagged by the branch that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUpdate {
    /// Next problem in the same block and lap.
    InBlockAdvance { next_problem: StudentProblemId },
    /// Block finished with laps remaining: restart at position 1.
    LapRollover {
        next_problem: StudentProblemId,
        lap: u32,
    },
    /// Laps exhausted: first problem of the next block, lap reset to 0.
    BlockRollover {
        next_block: ActualBlockId,
        next_problem: StudentProblemId,
    },
    /// Quota was exhausted; the replenishment policy decided the snapshot.
    Replenish { patch: TrackerPatch },
}

impl TrackerUpdate {
    #[must_use]
    pub fn to_patch(&self) -> TrackerPatch {
        match self {
            TrackerUpdate::InBlockAdvance { next_problem } => TrackerPatch {
                student_problem_id: Some(*next_problem),
                ..TrackerPatch::default()
            },
            TrackerUpdate::LapRollover { next_problem, lap } => TrackerPatch {
                student_problem_id: Some(*next_problem),
                current_lap: Some(*lap),
                ..TrackerPatch::default()
            },
            TrackerUpdate::BlockRollover {
                next_block,
                next_problem,
            } => TrackerPatch {
                actual_block_id: Some(*next_block),
                student_problem_id: Some(*next_problem),
                current_lap: Some(0),
                ..TrackerPatch::default()
            },
            TrackerUpdate::Replenish { patch } => patch.clone(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerUpdate::InBlockAdvance { .. } => "in_block",
            TrackerUpdate::LapRollover { .. } => "lap_rollover",
            TrackerUpdate::BlockRollover { .. } => "block_rollover",
            TrackerUpdate::Replenish { .. } => "replenish",
        }
    }
}
