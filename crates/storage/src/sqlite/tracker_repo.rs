use chrono::Utc;
use progress_core::model::{
    ProgressCounter, StudentId, StudentProblemId, SubfieldId, Tracker, TrackerId, TrackerPatch,
};
use sqlx::{Row, SqliteConnection};

use super::{
    SqliteRepository,
    mapping::{conn, get_u32, id_i64, map_tracker_row, write_err},
};
use crate::repository::{CounterRepository, ProgressPersistence, StorageError, TrackerRepository};

async fn apply_patch(
    db: &mut SqliteConnection,
    tracker_id: TrackerId,
    patch: &TrackerPatch,
) -> Result<(), StorageError> {
    let block = patch
        .actual_block_id
        .map(|id| id_i64("actual_block_id", id.value()))
        .transpose()?;
    let problem = patch
        .student_problem_id
        .map(|id| id_i64("student_problem_id", id.value()))
        .transpose()?;

    let res = sqlx::query(
        r"
        UPDATE trackers SET
            actual_block_id = COALESCE(?2, actual_block_id),
            student_problem_id = COALESCE(?3, student_problem_id),
            current_lap = COALESCE(?4, current_lap),
            is_enabled = COALESCE(?5, is_enabled),
            is_rest = COALESCE(?6, is_rest),
            updated_at = ?7
        WHERE id = ?1
        ",
    )
    .bind(id_i64("tracker_id", tracker_id.value())?)
    .bind(block)
    .bind(problem)
    .bind(patch.current_lap.map(i64::from))
    .bind(patch.is_enabled)
    .bind(patch.is_rest)
    .bind(Utc::now())
    .execute(&mut *db)
    .await
    .map_err(write_err)?;

    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

async fn upsert_counter(
    db: &mut SqliteConnection,
    counter: &ProgressCounter,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO progress_counters (student_id, subfield_id, todo_remaining, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(student_id, subfield_id) DO UPDATE SET
            todo_remaining = excluded.todo_remaining,
            updated_at = excluded.updated_at
        ",
    )
    .bind(id_i64("student_id", counter.student_id.value())?)
    .bind(id_i64("subfield_id", counter.subfield_id.value())?)
    .bind(i64::from(counter.todo_remaining))
    .bind(Utc::now())
    .execute(&mut *db)
    .await
    .map_err(write_err)?;
    Ok(())
}

#[async_trait::async_trait]
impl TrackerRepository for SqliteRepository {
    async fn find_tracker_by_student_problem(
        &self,
        problem_id: StudentProblemId,
    ) -> Result<Tracker, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                t.id, t.student_id, t.subfield_id, t.actual_block_id, t.student_problem_id,
                t.current_lap, t.is_enabled, t.is_rest
            FROM student_problems p
            JOIN trackers t
              ON t.student_id = p.student_id AND t.subfield_id = p.subfield_id
            WHERE p.id = ?1
            ",
        )
        .bind(id_i64("student_problem_id", problem_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;
        map_tracker_row(&row)
    }

    async fn find_tracker(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<Tracker, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                id, student_id, subfield_id, actual_block_id, student_problem_id,
                current_lap, is_enabled, is_rest
            FROM trackers
            WHERE student_id = ?1 AND subfield_id = ?2
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("subfield_id", subfield_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;
        map_tracker_row(&row)
    }

    async fn upsert_tracker(&self, tracker: &Tracker) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO trackers (
                id, student_id, subfield_id, actual_block_id, student_problem_id,
                current_lap, is_enabled, is_rest, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                -- the (student, subfield) key never moves; only the pointer and flags do
                actual_block_id = excluded.actual_block_id,
                student_problem_id = excluded.student_problem_id,
                current_lap = excluded.current_lap,
                is_enabled = excluded.is_enabled,
                is_rest = excluded.is_rest,
                updated_at = excluded.updated_at
            WHERE trackers.student_id = excluded.student_id
              AND trackers.subfield_id = excluded.subfield_id
            ",
        )
        .bind(id_i64("tracker_id", tracker.id().value())?)
        .bind(id_i64("student_id", tracker.student_id().value())?)
        .bind(id_i64("subfield_id", tracker.subfield_id().value())?)
        .bind(id_i64("actual_block_id", tracker.actual_block_id().value())?)
        .bind(id_i64("student_problem_id", tracker.student_problem_id().value())?)
        .bind(i64::from(tracker.current_lap()))
        .bind(tracker.is_enabled())
        .bind(tracker.is_rest())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(write_err)
        .and_then(|res| {
            if res.rows_affected() == 0 {
                Err(StorageError::Conflict)
            } else {
                Ok(())
            }
        })
    }

    async fn persist_tracker(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
    ) -> Result<(), StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        apply_patch(&mut *db, tracker_id, patch).await
    }
}

#[async_trait::async_trait]
impl CounterRepository for SqliteRepository {
    async fn get_remaining_counter(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<u32, StorageError> {
        let row = sqlx::query(
            r"
            SELECT todo_remaining
            FROM progress_counters
            WHERE student_id = ?1 AND subfield_id = ?2
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("subfield_id", subfield_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => get_u32(&row, "todo_remaining"),
            None => Ok(0),
        }
    }

    async fn persist_counter(&self, counter: &ProgressCounter) -> Result<(), StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        upsert_counter(&mut *db, counter).await
    }
}

#[async_trait::async_trait]
impl ProgressPersistence for SqliteRepository {
    async fn commit_progress(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
        counter: &ProgressCounter,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let owner = sqlx::query("SELECT student_id, subfield_id FROM trackers WHERE id = ?1")
            .bind(id_i64("tracker_id", tracker_id.value())?)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        let tracker = (
            owner
                .try_get::<i64, _>("student_id")
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            owner
                .try_get::<i64, _>("subfield_id")
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        );
        let expected = (
            id_i64("student_id", counter.student_id.value())?,
            id_i64("subfield_id", counter.subfield_id.value())?,
        );
        if tracker != expected {
            return Err(StorageError::Conflict);
        }

        apply_patch(&mut *tx, tracker_id, patch).await?;
        upsert_counter(&mut *tx, counter).await?;

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
