use async_trait::async_trait;
use progress_core::model::{
    ActualBlock, ActualBlockId, PacingSettings, ProgressCounter, StudentId, StudentProblem,
    StudentProblemId, SubfieldId, Tracker, TrackerId, TrackerPatch,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Read-only structural facts about a student's curriculum.
#[async_trait]
pub trait ContentIndex: Send + Sync {
    /// Fetch a block by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn find_block(&self, id: ActualBlockId) -> Result<ActualBlock, StorageError>;

    /// Fetch the block at `block_order` in a student's subfield.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` past the end of the curriculum.
    async fn find_block_by_order(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        block_order: u32,
    ) -> Result<ActualBlock, StorageError>;

    /// Fetch a problem by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn find_problem(&self, id: StudentProblemId) -> Result<StudentProblem, StorageError>;

    /// Fetch the problem at a 1-based position inside a block.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the position is out of range.
    async fn find_problem_by_position(
        &self,
        block_id: ActualBlockId,
        position: u32,
    ) -> Result<StudentProblem, StorageError>;
}

/// Materializes curriculum content for a student.
#[async_trait]
pub trait CurriculumWriter: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another block already holds the same order.
    async fn insert_block(&self, block: &ActualBlock) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the position is taken, or
    /// `StorageError::NotFound` if the block does not exist.
    async fn insert_problem(&self, problem: &StudentProblem) -> Result<(), StorageError>;
}

#[async_trait]
pub trait TrackerRepository: Send + Sync {
    /// Fetch the tracker of the (student, subfield) that owns a problem.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the problem or its tracker is missing.
    async fn find_tracker_by_student_problem(
        &self,
        problem_id: StudentProblemId,
    ) -> Result<Tracker, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the student is not enrolled in the subfield.
    async fn find_tracker(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<Tracker, StorageError>;

    /// Create or fully replace a tracker (enrollment and administrative resets).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the tracker cannot be stored.
    async fn upsert_tracker(&self, tracker: &Tracker) -> Result<(), StorageError>;

    /// Apply a partial update to an existing tracker.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the tracker does not exist.
    async fn persist_tracker(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait CounterRepository: Send + Sync {
    /// Remaining quota; a missing row reads as `0`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_remaining_counter(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<u32, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the counter cannot be stored.
    async fn persist_counter(&self, counter: &ProgressCounter) -> Result<(), StorageError>;
}

/// Writes a tracker update and its counter as one unit.
#[async_trait]
pub trait ProgressPersistence: Send + Sync {
    /// Persist `patch` on the tracker and `counter` together; either both land or neither.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the tracker is missing,
    /// `StorageError::Conflict` if the counter belongs to another (student, subfield),
    /// or other storage errors.
    async fn commit_progress(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
        counter: &ProgressCounter,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait PacingRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_pacing(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<Option<PacingSettings>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the settings cannot be stored.
    async fn upsert_pacing(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        pacing: &PacingSettings,
    ) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

type SubfieldKey = (StudentId, SubfieldId);

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<ActualBlockId, ActualBlock>,
    problems: HashMap<StudentProblemId, StudentProblem>,
    trackers: HashMap<SubfieldKey, Tracker>,
    counters: HashMap<SubfieldKey, u32>,
    pacing: HashMap<SubfieldKey, PacingSettings>,
}

impl MemoryState {
    fn tracker_key(&self, tracker_id: TrackerId) -> Option<SubfieldKey> {
        self.trackers
            .iter()
            .find(|(_, t)| t.id() == tracker_id)
            .map(|(key, _)| *key)
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All tables share one lock, so `commit_progress` is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl ContentIndex for InMemoryRepository {
    async fn find_block(&self, id: ActualBlockId) -> Result<ActualBlock, StorageError> {
        let guard = self.lock()?;
        guard.blocks.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn find_block_by_order(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        block_order: u32,
    ) -> Result<ActualBlock, StorageError> {
        let guard = self.lock()?;
        guard
            .blocks
            .values()
            .find(|b| {
                b.student_id() == student_id
                    && b.subfield_id() == subfield_id
                    && b.block_order() == block_order
            })
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_problem(&self, id: StudentProblemId) -> Result<StudentProblem, StorageError> {
        let guard = self.lock()?;
        guard.problems.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn find_problem_by_position(
        &self,
        block_id: ActualBlockId,
        position: u32,
    ) -> Result<StudentProblem, StorageError> {
        let guard = self.lock()?;
        guard
            .problems
            .values()
            .find(|p| p.actual_block_id() == block_id && p.position_in_block() == position)
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl CurriculumWriter for InMemoryRepository {
    async fn insert_block(&self, block: &ActualBlock) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let clash = guard.blocks.values().any(|b| {
            b.id() != block.id()
                && b.student_id() == block.student_id()
                && b.subfield_id() == block.subfield_id()
                && b.block_order() == block.block_order()
        });
        if clash {
            return Err(StorageError::Conflict);
        }
        guard.blocks.insert(block.id(), block.clone());
        Ok(())
    }

    async fn insert_problem(&self, problem: &StudentProblem) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.blocks.contains_key(&problem.actual_block_id()) {
            return Err(StorageError::NotFound);
        }
        let clash = guard.problems.values().any(|p| {
            p.id() != problem.id()
                && p.actual_block_id() == problem.actual_block_id()
                && p.position_in_block() == problem.position_in_block()
        });
        if clash {
            return Err(StorageError::Conflict);
        }
        guard.problems.insert(problem.id(), problem.clone());
        Ok(())
    }
}

#[async_trait]
impl TrackerRepository for InMemoryRepository {
    async fn find_tracker_by_student_problem(
        &self,
        problem_id: StudentProblemId,
    ) -> Result<Tracker, StorageError> {
        let guard = self.lock()?;
        let problem = guard.problems.get(&problem_id).ok_or(StorageError::NotFound)?;
        guard
            .trackers
            .get(&(problem.student_id(), problem.subfield_id()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_tracker(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<Tracker, StorageError> {
        let guard = self.lock()?;
        guard
            .trackers
            .get(&(student_id, subfield_id))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn upsert_tracker(&self, tracker: &Tracker) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let key = (tracker.student_id(), tracker.subfield_id());
        if let Some(existing) = guard.tracker_key(tracker.id()) {
            if existing != key {
                return Err(StorageError::Conflict);
            }
        }
        guard.trackers.insert(key, tracker.clone());
        Ok(())
    }

    async fn persist_tracker(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let key = guard.tracker_key(tracker_id).ok_or(StorageError::NotFound)?;
        if let Some(tracker) = guard.trackers.get_mut(&key) {
            *tracker = tracker.patched(patch);
        }
        Ok(())
    }
}

#[async_trait]
impl CounterRepository for InMemoryRepository {
    async fn get_remaining_counter(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<u32, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .counters
            .get(&(student_id, subfield_id))
            .copied()
            .unwrap_or(0))
    }

    async fn persist_counter(&self, counter: &ProgressCounter) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.counters.insert(
            (counter.student_id, counter.subfield_id),
            counter.todo_remaining,
        );
        Ok(())
    }
}

#[async_trait]
impl ProgressPersistence for InMemoryRepository {
    async fn commit_progress(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
        counter: &ProgressCounter,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let key = guard.tracker_key(tracker_id).ok_or(StorageError::NotFound)?;
        if key != (counter.student_id, counter.subfield_id) {
            return Err(StorageError::Conflict);
        }
        if let Some(tracker) = guard.trackers.get_mut(&key) {
            *tracker = tracker.patched(patch);
        }
        guard.counters.insert(key, counter.todo_remaining);
        Ok(())
    }
}

#[async_trait]
impl PacingRepository for InMemoryRepository {
    async fn get_pacing(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<Option<PacingSettings>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.pacing.get(&(student_id, subfield_id)).copied())
    }

    async fn upsert_pacing(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        pacing: &PacingSettings,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.pacing.insert((student_id, subfield_id), *pacing);
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub content: Arc<dyn ContentIndex>,
    pub curriculum: Arc<dyn CurriculumWriter>,
    pub trackers: Arc<dyn TrackerRepository>,
    pub counters: Arc<dyn CounterRepository>,
    pub progress: Arc<dyn ProgressPersistence>,
    pub pacing: Arc<dyn PacingRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    pub(crate) fn from_repository<R>(repo: R) -> Self
    where
        R: ContentIndex
            + CurriculumWriter
            + TrackerRepository
            + CounterRepository
            + ProgressPersistence
            + PacingRepository
            + Clone
            + 'static,
    {
        Self {
            content: Arc::new(repo.clone()),
            curriculum: Arc::new(repo.clone()),
            trackers: Arc::new(repo.clone()),
            counters: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            pacing: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUDENT: StudentId = StudentId::new(1);
    const SUBFIELD: SubfieldId = SubfieldId::new(2);

    fn block(id: u64, order: u32) -> ActualBlock {
        ActualBlock::new(ActualBlockId::new(id), STUDENT, SUBFIELD, order, 3, 1).unwrap()
    }

    fn problem(id: u64, block_id: u64, position: u32) -> StudentProblem {
        StudentProblem::new(
            StudentProblemId::new(id),
            STUDENT,
            ActualBlockId::new(block_id),
            SUBFIELD,
            position,
            position,
        )
        .unwrap()
    }

    fn tracker() -> Tracker {
        Tracker::new(
            TrackerId::new(9),
            STUDENT,
            SUBFIELD,
            ActualBlockId::new(1),
            StudentProblemId::new(11),
            0,
            true,
            false,
        )
    }

    async fn seeded() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.insert_block(&block(1, 1)).await.unwrap();
        for pos in 1..=3 {
            repo.insert_problem(&problem(10 + u64::from(pos), 1, pos))
                .await
                .unwrap();
        }
        repo.upsert_tracker(&tracker()).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn resolves_tracker_through_problem() {
        let repo = seeded().await;
        let found = repo
            .find_tracker_by_student_problem(StudentProblemId::new(13))
            .await
            .unwrap();
        assert_eq!(found.id(), TrackerId::new(9));

        let missing = repo
            .find_tracker_by_student_problem(StudentProblemId::new(99))
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn block_order_is_unique_per_subfield() {
        let repo = seeded().await;
        let err = repo.insert_block(&block(2, 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        repo.insert_block(&block(2, 2)).await.unwrap();
        let next = repo.find_block_by_order(STUDENT, SUBFIELD, 2).await.unwrap();
        assert_eq!(next.id(), ActualBlockId::new(2));
    }

    #[tokio::test]
    async fn missing_counter_reads_as_zero() {
        let repo = seeded().await;
        assert_eq!(repo.get_remaining_counter(STUDENT, SUBFIELD).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_progress_updates_both_rows() {
        let repo = seeded().await;
        let patch = TrackerPatch {
            student_problem_id: Some(StudentProblemId::new(12)),
            ..TrackerPatch::default()
        };
        repo.commit_progress(
            TrackerId::new(9),
            &patch,
            &ProgressCounter::new(STUDENT, SUBFIELD, 4),
        )
        .await
        .unwrap();

        let t = repo.find_tracker(STUDENT, SUBFIELD).await.unwrap();
        assert_eq!(t.student_problem_id(), StudentProblemId::new(12));
        assert_eq!(repo.get_remaining_counter(STUDENT, SUBFIELD).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn commit_progress_rejects_foreign_counter() {
        let repo = seeded().await;
        let err = repo
            .commit_progress(
                TrackerId::new(9),
                &TrackerPatch::default(),
                &ProgressCounter::new(STUDENT, SubfieldId::new(77), 4),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert_eq!(repo.get_remaining_counter(STUDENT, SUBFIELD).await.unwrap(), 0);
    }
}
