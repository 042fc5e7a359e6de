use chrono::Weekday;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{StudentId, SubfieldId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PacingError {
    #[error("problems per cycle must be > 0")]
    InvalidProblemsPerCycle,

    #[error("rest days cannot cover the whole week")]
    NoStudyDays,

    #[error("rest day mask has bits outside the week: {0:#010b}")]
    InvalidRestDaysMask(u8),
}

//
// ─── PROGRESS COUNTER ──────────────────────────────────────────────────────────
//

/// Remaining quota of problems issuable before replenishment is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressCounter {
    pub student_id: StudentId,
    pub subfield_id: SubfieldId,
    pub todo_remaining: u32,
}

impl ProgressCounter {
    #[must_use]
    pub fn new(student_id: StudentId, subfield_id: SubfieldId, todo_remaining: u32) -> Self {
        Self {
            student_id,
            subfield_id,
            todo_remaining,
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.todo_remaining == 0
    }

    /// Counter after one more problem has been issued.
    ///
    /// Saturates at zero; callers check `is_exhausted` first.
    #[must_use]
    pub fn decremented(&self) -> Self {
        Self {
            todo_remaining: self.todo_remaining.saturating_sub(1),
            ..*self
        }
    }
}

//
// ─── PACING ────────────────────────────────────────────────────────────────────
//

const FULL_WEEK: u8 = 0b0111_1111;

/// Delivery pacing for one student's subfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingSettings {
    problems_per_cycle: u32,
    rest_days_mask: u8,
}

impl PacingSettings {
    /// Ten problems per cycle, every day a study day.
    #[must_use]
    pub fn default_daily() -> Self {
        Self {
            problems_per_cycle: 10,
            rest_days_mask: 0,
        }
    }

    /// Creates pacing settings.
    ///
    /// # Errors
    ///
    /// Returns `PacingError` if the quota is zero or the mask leaves no study day.
    pub fn new(problems_per_cycle: u32, rest_days_mask: u8) -> Result<Self, PacingError> {
        if problems_per_cycle == 0 {
            return Err(PacingError::InvalidProblemsPerCycle);
        }
        if rest_days_mask & !FULL_WEEK != 0 {
            return Err(PacingError::InvalidRestDaysMask(rest_days_mask));
        }
        if rest_days_mask == FULL_WEEK {
            return Err(PacingError::NoStudyDays);
        }
        Ok(Self {
            problems_per_cycle,
            rest_days_mask,
        })
    }

    /// Convenience constructor from a list of rest weekdays.
    ///
    /// # Errors
    ///
    /// Same as [`PacingSettings::new`].
    pub fn with_rest_days(problems_per_cycle: u32, days: &[Weekday]) -> Result<Self, PacingError> {
        Self::new(problems_per_cycle, rest_days_mask(days))
    }

    #[must_use]
    pub fn problems_per_cycle(&self) -> u32 {
        self.problems_per_cycle
    }

    #[must_use]
    pub fn rest_days_mask(&self) -> u8 {
        self.rest_days_mask
    }

    #[must_use]
    pub fn is_rest_day(&self, weekday: Weekday) -> bool {
        self.rest_days_mask & weekday_bit(weekday) != 0
    }
}

fn weekday_bit(weekday: Weekday) -> u8 {
    match weekday {
        Weekday::Mon => 1 << 0,
        Weekday::Tue => 1 << 1,
        Weekday::Wed => 1 << 2,
        Weekday::Thu => 1 << 3,
        Weekday::Fri => 1 << 4,
        Weekday::Sat => 1 << 5,
        Weekday::Sun => 1 << 6,
    }
}

fn rest_days_mask(days: &[Weekday]) -> u8 {
    days.iter().fold(0, |mask, day| mask | weekday_bit(*day))
}
