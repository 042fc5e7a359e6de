use async_trait::async_trait;
use progress_core::model::{PacingSettings, StudentId, SubfieldId};

use super::{
    SqliteRepository,
    mapping::{conn, id_i64, map_pacing_row, write_err},
};
use crate::repository::{PacingRepository, StorageError};

#[async_trait]
impl PacingRepository for SqliteRepository {
    async fn get_pacing(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<Option<PacingSettings>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT problems_per_cycle, rest_days_mask
            FROM pacing_settings
            WHERE student_id = ?1 AND subfield_id = ?2
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("subfield_id", subfield_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_pacing_row).transpose()
    }

    async fn upsert_pacing(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        pacing: &PacingSettings,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO pacing_settings (student_id, subfield_id, problems_per_cycle, rest_days_mask)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(student_id, subfield_id) DO UPDATE SET
                problems_per_cycle = excluded.problems_per_cycle,
                rest_days_mask = excluded.rest_days_mask
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("subfield_id", subfield_id.value())?)
        .bind(i64::from(pacing.problems_per_cycle()))
        .bind(i64::from(pacing.rest_days_mask()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }
}
