use progress_core::model::{ActualBlock, ActualBlockId, StudentId, StudentProblem, StudentProblemId, SubfieldId};

use super::{
    SqliteRepository,
    mapping::{conn, id_i64, map_block_row, map_problem_row, write_err},
};
use crate::repository::{ContentIndex, CurriculumWriter, StorageError};

const BLOCK_COLUMNS: &str = "id, student_id, subfield_id, block_order, block_size, lap";
const PROBLEM_COLUMNS: &str = "id, student_id, actual_block_id, subfield_id, \
                               problem_in_block_order, problem_overall_order";

#[async_trait::async_trait]
impl ContentIndex for SqliteRepository {
    async fn find_block(&self, id: ActualBlockId) -> Result<ActualBlock, StorageError> {
        let sql = format!("SELECT {BLOCK_COLUMNS} FROM actual_blocks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("actual_block_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        map_block_row(&row)
    }

    async fn find_block_by_order(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        block_order: u32,
    ) -> Result<ActualBlock, StorageError> {
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM actual_blocks \
             WHERE student_id = ?1 AND subfield_id = ?2 AND block_order = ?3"
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", student_id.value())?)
            .bind(id_i64("subfield_id", subfield_id.value())?)
            .bind(i64::from(block_order))
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        map_block_row(&row)
    }

    async fn find_problem(&self, id: StudentProblemId) -> Result<StudentProblem, StorageError> {
        let sql = format!("SELECT {PROBLEM_COLUMNS} FROM student_problems WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("student_problem_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        map_problem_row(&row)
    }

    async fn find_problem_by_position(
        &self,
        block_id: ActualBlockId,
        position: u32,
    ) -> Result<StudentProblem, StorageError> {
        let sql = format!(
            "SELECT {PROBLEM_COLUMNS} FROM student_problems \
             WHERE actual_block_id = ?1 AND problem_in_block_order = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("actual_block_id", block_id.value())?)
            .bind(i64::from(position))
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        map_problem_row(&row)
    }
}

#[async_trait::async_trait]
impl CurriculumWriter for SqliteRepository {
    async fn insert_block(&self, block: &ActualBlock) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO actual_blocks (id, student_id, subfield_id, block_order, block_size, lap)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_i64("actual_block_id", block.id().value())?)
        .bind(id_i64("student_id", block.student_id().value())?)
        .bind(id_i64("subfield_id", block.subfield_id().value())?)
        .bind(i64::from(block.block_order()))
        .bind(i64::from(block.size()))
        .bind(i64::from(block.max_lap()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn insert_problem(&self, problem: &StudentProblem) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO student_problems (
                id, student_id, actual_block_id, subfield_id,
                problem_in_block_order, problem_overall_order
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_i64("student_problem_id", problem.id().value())?)
        .bind(id_i64("student_id", problem.student_id().value())?)
        .bind(id_i64("actual_block_id", problem.actual_block_id().value())?)
        .bind(id_i64("subfield_id", problem.subfield_id().value())?)
        .bind(i64::from(problem.position_in_block()))
        .bind(i64::from(problem.overall_order()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }
}
