use thiserror::Error;

use crate::model::ids::{ActualBlockId, StudentId, StudentProblemId, SubfieldId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContentError {
    #[error("block size must be > 0")]
    EmptyBlock,

    #[error("block order must be >= 1")]
    InvalidBlockOrder,

    #[error("problem position must be >= 1")]
    InvalidProblemPosition,
}

//
// ─── ACTUAL BLOCK ──────────────────────────────────────────────────────────────
//

/// An ordered, sized unit of content within one student's subfield curriculum.
///
/// Blocks are traversed strictly by `block_order` ascending; each one is
/// repeated `lap` times before the tracker moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualBlock {
    id: ActualBlockId,
    student_id: StudentId,
    subfield_id: SubfieldId,
    block_order: u32,
    size: u32,
    lap: u32,
}

impl ActualBlock {
    /// Creates a block.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::EmptyBlock` if `size == 0` and
    /// `ContentError::InvalidBlockOrder` if `block_order == 0`.
    pub fn new(
        id: ActualBlockId,
        student_id: StudentId,
        subfield_id: SubfieldId,
        block_order: u32,
        size: u32,
        lap: u32,
    ) -> Result<Self, ContentError> {
        if size == 0 {
            return Err(ContentError::EmptyBlock);
        }
        if block_order == 0 {
            return Err(ContentError::InvalidBlockOrder);
        }
        Ok(Self {
            id,
            student_id,
            subfield_id,
            block_order,
            size,
            lap,
        })
    }

    #[must_use]
    pub fn id(&self) -> ActualBlockId {
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
    pub fn block_order(&self) -> u32 {
        self.block_order
    }

    /// Count of distinct problems in the block.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Highest lap index the tracker may reach inside this block.
    #[must_use]
    pub fn max_lap(&self) -> u32 {
        self.lap
    }
}

//
// ─── STUDENT PROBLEM ───────────────────────────────────────────────────────────
//

/// A concrete, attempt-able problem instance with an immutable position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentProblem {
    id: StudentProblemId,
    student_id: StudentId,
    actual_block_id: ActualBlockId,
    subfield_id: SubfieldId,
    position_in_block: u32,
    overall_order: u32,
}

impl StudentProblem {
    /// Creates a problem instance.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::InvalidProblemPosition` if `position_in_block == 0`.
    pub fn new(
        id: StudentProblemId,
        student_id: StudentId,
        actual_block_id: ActualBlockId,
        subfield_id: SubfieldId,
        position_in_block: u32,
        overall_order: u32,
    ) -> Result<Self, ContentError> {
        if position_in_block == 0 {
            return Err(ContentError::InvalidProblemPosition);
        }
        Ok(Self {
            id,
            student_id,
            actual_block_id,
            subfield_id,
            position_in_block,
            overall_order,
        })
    }

    #[must_use]
    pub fn id(&self) -> StudentProblemId {
        self.id
    }

    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    #[must_use]
    pub fn actual_block_id(&self) -> ActualBlockId {
        self.actual_block_id
    }

    #[must_use]
    pub fn subfield_id(&self) -> SubfieldId {
        self.subfield_id
    }

    /// 1-based position within the owning block.
    #[must_use]
    pub fn position_in_block(&self) -> u32 {
        self.position_in_block
    }

    #[must_use]
    pub fn overall_order(&self) -> u32 {
        self.overall_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_rejects_zero_size() {
        let err = ActualBlock::new(
            ActualBlockId::new(1),
            StudentId::new(1),
            SubfieldId::new(1),
            1,
            0,
            2,
        )
        .unwrap_err();
        assert_eq!(err, ContentError::EmptyBlock);
    }

    #[test]
    fn block_rejects_zero_order() {
        let err = ActualBlock::new(
            ActualBlockId::new(1),
            StudentId::new(1),
            SubfieldId::new(1),
            0,
            10,
            2,
        )
        .unwrap_err();
        assert_eq!(err, ContentError::InvalidBlockOrder);
    }

    #[test]
    fn problem_positions_are_one_based() {
        let err = StudentProblem::new(
            StudentProblemId::new(1),
            StudentId::new(1),
            ActualBlockId::new(1),
            SubfieldId::new(1),
            0,
            0,
        )
        .unwrap_err();
        assert_eq!(err, ContentError::InvalidProblemPosition);
    }
}
