use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the tracker schema.
///
/// Version 1 creates curriculum content (blocks, problems), trackers,
/// progress counters, and per-subfield pacing.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS actual_blocks (
                    id INTEGER PRIMARY KEY,
                    student_id INTEGER NOT NULL,
                    subfield_id INTEGER NOT NULL,
                    block_order INTEGER NOT NULL CHECK (block_order >= 1),
                    block_size INTEGER NOT NULL CHECK (block_size >= 1),
                    lap INTEGER NOT NULL CHECK (lap >= 0),
                    UNIQUE (student_id, subfield_id, block_order)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS student_problems (
                    id INTEGER PRIMARY KEY,
                    student_id INTEGER NOT NULL,
                    actual_block_id INTEGER NOT NULL,
                    subfield_id INTEGER NOT NULL,
                    problem_in_block_order INTEGER NOT NULL CHECK (problem_in_block_order >= 1),
                    problem_overall_order INTEGER NOT NULL CHECK (problem_overall_order >= 0),
                    UNIQUE (actual_block_id, problem_in_block_order),
                    FOREIGN KEY (actual_block_id) REFERENCES actual_blocks(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS trackers (
                    id INTEGER PRIMARY KEY,
                    student_id INTEGER NOT NULL,
                    subfield_id INTEGER NOT NULL,
                    actual_block_id INTEGER NOT NULL,
                    student_problem_id INTEGER NOT NULL,
                    current_lap INTEGER NOT NULL CHECK (current_lap >= 0),
                    is_enabled INTEGER NOT NULL CHECK (is_enabled IN (0, 1)),
                    is_rest INTEGER NOT NULL CHECK (is_rest IN (0, 1)),
                    updated_at TEXT NOT NULL,
                    UNIQUE (student_id, subfield_id),
                    FOREIGN KEY (actual_block_id) REFERENCES actual_blocks(id),
                    FOREIGN KEY (student_problem_id) REFERENCES student_problems(id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS progress_counters (
                    student_id INTEGER NOT NULL,
                    subfield_id INTEGER NOT NULL,
                    todo_remaining INTEGER NOT NULL CHECK (todo_remaining >= 0),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (student_id, subfield_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS pacing_settings (
                    student_id INTEGER NOT NULL,
                    subfield_id INTEGER NOT NULL,
                    problems_per_cycle INTEGER NOT NULL CHECK (problems_per_cycle >= 1),
                    rest_days_mask INTEGER NOT NULL CHECK (rest_days_mask BETWEEN 0 AND 126),
                    PRIMARY KEY (student_id, subfield_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_student_problems_student_subfield
                    ON student_problems (student_id, subfield_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
