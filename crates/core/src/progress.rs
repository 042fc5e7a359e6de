//! Position logic of the progress tracker.
//!
//! Given where a student is and which position they just completed, decide
//! whether the pointer moves within the block, starts another lap, or rolls
//! over to the next block. Quota and enabled checks happen before this runs;
//! resolving positions into concrete problems is the caller's job.

use crate::model::{ActualBlock, Tracker, TrackerError};

/// The position transition chosen for one completed problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceStep {
    /// Same block and lap, next position.
    WithinBlock { next_position: u32 },
    /// Same block, position 1, lap incremented.
    LapRollover { next_lap: u32 },
    /// First position of the block at `next_block_order`, lap 0.
    BlockRollover { next_block_order: u32 },
    /// Laps exhausted on a block whose order has no successor.
    CurriculumEnd,
}

impl AdvanceStep {
    /// Position inside the target block that the tracker should point at.
    #[must_use]
    pub fn target_position(&self) -> u32 {
        match self {
            AdvanceStep::WithinBlock { next_position } => *next_position,
            AdvanceStep::LapRollover { .. }
            | AdvanceStep::BlockRollover { .. }
            | AdvanceStep::CurriculumEnd => 1,
        }
    }
}

/// Plan the next tracker position after `completed_position` was finished.
///
/// `block` must be the tracker's current block.
///
/// # Errors
///
/// - `TrackerError::BlockMismatch` if `block` is not the tracker's block
/// - `TrackerError::ZeroPosition` if `completed_position == 0`
/// - `TrackerError::PositionExceedsBlock` if the position is past the block end
/// - `TrackerError::LapExceedsBlock` if the tracker lap is past `block.max_lap()`
///
/// # Examples
///
/// ```
/// # use progress_core::model::*;
/// # use progress_core::progress::{plan_advance, AdvanceStep};
/// let block = ActualBlock::new(
///     ActualBlockId::new(1), StudentId::new(1), SubfieldId::new(1), 1, 10, 2,
/// )?;
/// let tracker = Tracker::new(
///     TrackerId::new(1), StudentId::new(1), SubfieldId::new(1),
///     ActualBlockId::new(1), StudentProblemId::new(5), 1, true, false,
/// );
/// let step = plan_advance(&tracker, &block, 5)?;
/// assert_eq!(step, AdvanceStep::WithinBlock { next_position: 6 });
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn plan_advance(
    tracker: &Tracker,
    block: &ActualBlock,
    completed_position: u32,
) -> Result<AdvanceStep, TrackerError> {
    if block.id() != tracker.actual_block_id() {
        return Err(TrackerError::BlockMismatch {
            expected: tracker.actual_block_id(),
            found: block.id(),
        });
    }
    if completed_position == 0 {
        return Err(TrackerError::ZeroPosition);
    }

    let lap = tracker.current_lap();
    let max_lap = block.max_lap();
    if lap > max_lap {
        return Err(TrackerError::LapExceedsBlock { lap, max_lap });
    }

    let size = block.size();
    if completed_position < size {
        return Ok(AdvanceStep::WithinBlock {
            next_position: completed_position + 1,
        });
    }
    if completed_position > size {
        return Err(TrackerError::PositionExceedsBlock {
            position: completed_position,
            size,
        });
    }

    if lap < max_lap {
        return Ok(AdvanceStep::LapRollover { next_lap: lap + 1 });
    }
    Ok(block
        .block_order()
        .checked_add(1)
        .map_or(AdvanceStep::CurriculumEnd, |next_block_order| {
            AdvanceStep::BlockRollover { next_block_order }
        }))
}
