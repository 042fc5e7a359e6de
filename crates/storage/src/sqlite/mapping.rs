use progress_core::model::{
    ActualBlock, ActualBlockId, PacingSettings, StudentId, StudentProblem, StudentProblemId,
    SubfieldId, Tracker, TrackerId,
};
use sqlx::Row;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

/// Maps constraint failures on writes onto domain storage errors.
pub(crate) fn write_err(e: sqlx::Error) -> StorageError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    conn(e)
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn get_u64(row: &sqlx::sqlite::SqliteRow, field: &'static str) -> Result<u64, StorageError> {
    i64_to_u64(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

pub(crate) fn get_u32(
    row: &sqlx::sqlite::SqliteRow,
    field: &'static str,
) -> Result<u32, StorageError> {
    i64_to_u32(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

pub(crate) fn map_block_row(row: &sqlx::sqlite::SqliteRow) -> Result<ActualBlock, StorageError> {
    ActualBlock::new(
        ActualBlockId::new(get_u64(row, "id")?),
        StudentId::new(get_u64(row, "student_id")?),
        SubfieldId::new(get_u64(row, "subfield_id")?),
        get_u32(row, "block_order")?,
        get_u32(row, "block_size")?,
        get_u32(row, "lap")?,
    )
    .map_err(ser)
}

pub(crate) fn map_problem_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<StudentProblem, StorageError> {
    StudentProblem::new(
        StudentProblemId::new(get_u64(row, "id")?),
        StudentId::new(get_u64(row, "student_id")?),
        ActualBlockId::new(get_u64(row, "actual_block_id")?),
        SubfieldId::new(get_u64(row, "subfield_id")?),
        get_u32(row, "problem_in_block_order")?,
        get_u32(row, "problem_overall_order")?,
    )
    .map_err(ser)
}

pub(crate) fn map_tracker_row(row: &sqlx::sqlite::SqliteRow) -> Result<Tracker, StorageError> {
    Ok(Tracker::new(
        TrackerId::new(get_u64(row, "id")?),
        StudentId::new(get_u64(row, "student_id")?),
        SubfieldId::new(get_u64(row, "subfield_id")?),
        ActualBlockId::new(get_u64(row, "actual_block_id")?),
        StudentProblemId::new(get_u64(row, "student_problem_id")?),
        get_u32(row, "current_lap")?,
        row.try_get::<bool, _>("is_enabled").map_err(ser)?,
        row.try_get::<bool, _>("is_rest").map_err(ser)?,
    ))
}

pub(crate) fn map_pacing_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<PacingSettings, StorageError> {
    let mask = row.try_get::<i64, _>("rest_days_mask").map_err(ser)?;
    let mask = u8::try_from(mask)
        .map_err(|_| StorageError::Serialization(format!("invalid rest_days_mask: {mask}")))?;
    PacingSettings::new(get_u32(row, "problems_per_cycle")?, mask).map_err(ser)
}
