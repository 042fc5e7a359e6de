use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use progress_core::model::{
    ActualBlock, ActualBlockId, ProgressCounter, StudentId, StudentProblem, StudentProblemId,
    SubfieldId, Tracker, TrackerId, TrackerPatch, TrackerUpdate,
};
use services::{
    AdvanceError, AdvanceOutcome, ProgressAdvancer, ReplenishError, Replenishment,
    ReplenishmentPolicy,
};
use storage::repository::{
    ContentIndex, CounterRepository, CurriculumWriter, InMemoryRepository, ProgressPersistence,
    StorageError, TrackerRepository,
};

const STUDENT: StudentId = StudentId::new(1);
const SUBFIELD: SubfieldId = SubfieldId::new(1);
const TRACKER: TrackerId = TrackerId::new(1);

/// Problem ids are `block * 100 + position`.
fn problem_id(block: u64, position: u32) -> StudentProblemId {
    StudentProblemId::new(block * 100 + u64::from(position))
}

//
// ─── RECORDING REPOSITORY ──────────────────────────────────────────────────────
//

/// Wraps the in-memory repository and records every call by name.
#[derive(Clone, Default)]
struct Recording {
    inner: InMemoryRepository,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl Recording {
    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }
}

#[async_trait]
impl ContentIndex for Recording {
    async fn find_block(&self, id: ActualBlockId) -> Result<ActualBlock, StorageError> {
        self.record("find_block");
        self.inner.find_block(id).await
    }

    async fn find_block_by_order(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
        block_order: u32,
    ) -> Result<ActualBlock, StorageError> {
        self.record("find_block_by_order");
        self.inner
            .find_block_by_order(student_id, subfield_id, block_order)
            .await
    }

    async fn find_problem(&self, id: StudentProblemId) -> Result<StudentProblem, StorageError> {
        self.record("find_problem");
        self.inner.find_problem(id).await
    }

    async fn find_problem_by_position(
        &self,
        block_id: ActualBlockId,
        position: u32,
    ) -> Result<StudentProblem, StorageError> {
        self.record("find_problem_by_position");
        self.inner.find_problem_by_position(block_id, position).await
    }
}

#[async_trait]
impl TrackerRepository for Recording {
    async fn find_tracker_by_student_problem(
        &self,
        problem_id: StudentProblemId,
    ) -> Result<Tracker, StorageError> {
        self.record("find_tracker_by_student_problem");
        self.inner.find_tracker_by_student_problem(problem_id).await
    }

    async fn find_tracker(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<Tracker, StorageError> {
        self.record("find_tracker");
        self.inner.find_tracker(student_id, subfield_id).await
    }

    async fn upsert_tracker(&self, tracker: &Tracker) -> Result<(), StorageError> {
        self.record("upsert_tracker");
        self.inner.upsert_tracker(tracker).await
    }

    async fn persist_tracker(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
    ) -> Result<(), StorageError> {
        self.record("persist_tracker");
        self.inner.persist_tracker(tracker_id, patch).await
    }
}

#[async_trait]
impl CounterRepository for Recording {
    async fn get_remaining_counter(
        &self,
        student_id: StudentId,
        subfield_id: SubfieldId,
    ) -> Result<u32, StorageError> {
        self.record("get_remaining_counter");
        self.inner.get_remaining_counter(student_id, subfield_id).await
    }

    async fn persist_counter(&self, counter: &ProgressCounter) -> Result<(), StorageError> {
        self.record("persist_counter");
        self.inner.persist_counter(counter).await
    }
}

#[async_trait]
impl ProgressPersistence for Recording {
    async fn commit_progress(
        &self,
        tracker_id: TrackerId,
        patch: &TrackerPatch,
        counter: &ProgressCounter,
    ) -> Result<(), StorageError> {
        self.record("commit_progress");
        self.inner.commit_progress(tracker_id, patch, counter).await
    }
}

//
// ─── STUB POLICY ───────────────────────────────────────────────────────────────
//

struct StubPolicy {
    result: Replenishment,
    calls: Mutex<Vec<Tracker>>,
}

impl StubPolicy {
    fn new(patch: TrackerPatch, remaining: u32) -> Self {
        Self {
            result: Replenishment { patch, remaining },
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ReplenishmentPolicy for StubPolicy {
    async fn replenish(
        &self,
        _student_id: StudentId,
        _subfield_id: SubfieldId,
        _actual_block_id: ActualBlockId,
        tracker: &Tracker,
    ) -> Result<Replenishment, ReplenishError> {
        self.calls.lock().unwrap().push(tracker.clone());
        Ok(self.result.clone())
    }
}

//
// ─── FIXTURE ───────────────────────────────────────────────────────────────────
//

struct Fixture {
    repo: Recording,
    policy: Arc<StubPolicy>,
    advancer: ProgressAdvancer,
}

impl Fixture {
    /// Block 1: size 10, lap 2. Block 2 (optional): size 8, lap 1.
    async fn new(with_second_block: bool) -> Self {
        Self::with_policy(with_second_block, StubPolicy::new(TrackerPatch::default(), 5)).await
    }

    async fn with_policy(with_second_block: bool, policy: StubPolicy) -> Self {
        let mut blocks = vec![(1_u64, 1_u32, 10_u32, 2_u32)];
        if with_second_block {
            blocks.push((2, 2, 8, 1));
        }
        Self::with_blocks(&blocks, policy).await
    }

    /// Each block is `(id, order, size, lap)`.
    async fn with_blocks(blocks: &[(u64, u32, u32, u32)], policy: StubPolicy) -> Self {
        let repo = Recording::default();
        let mut overall = 0;
        for &(block_id, order, size, lap) in blocks {
            let block = ActualBlock::new(
                ActualBlockId::new(block_id),
                STUDENT,
                SUBFIELD,
                order,
                size,
                lap,
            )
            .unwrap();
            repo.inner.insert_block(&block).await.unwrap();
            for pos in 1..=size {
                overall += 1;
                let problem = StudentProblem::new(
                    problem_id(block_id, pos),
                    STUDENT,
                    ActualBlockId::new(block_id),
                    SUBFIELD,
                    pos,
                    overall,
                )
                .unwrap();
                repo.inner.insert_problem(&problem).await.unwrap();
            }
        }

        let policy = Arc::new(policy);
        let advancer = ProgressAdvancer::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            policy.clone(),
        );
        Self {
            repo,
            policy,
            advancer,
        }
    }

    async fn place(&self, position: u32, lap: u32, enabled: bool, remaining: u32) {
        let tracker = Tracker::new(
            TRACKER,
            STUDENT,
            SUBFIELD,
            ActualBlockId::new(1),
            problem_id(1, position),
            lap,
            enabled,
            false,
        );
        self.repo.inner.upsert_tracker(&tracker).await.unwrap();
        self.repo
            .inner
            .persist_counter(&ProgressCounter::new(STUDENT, SUBFIELD, remaining))
            .await
            .unwrap();
        self.repo.clear();
    }

    async fn tracker(&self) -> Tracker {
        self.repo.inner.find_tracker(STUDENT, SUBFIELD).await.unwrap()
    }

    async fn remaining(&self) -> u32 {
        self.repo
            .inner
            .get_remaining_counter(STUDENT, SUBFIELD)
            .await
            .unwrap()
    }

    fn writes(&self) -> usize {
        self.repo.count("commit_progress")
            + self.repo.count("persist_tracker")
            + self.repo.count("persist_counter")
            + self.repo.count("upsert_tracker")
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn advances_within_block() {
    let fx = Fixture::new(true).await;
    fx.place(5, 1, true, 3).await;

    let out = fx.advancer.advance(STUDENT, problem_id(1, 5)).await.unwrap();

    assert_eq!(out.next_problem_id(), Some(problem_id(1, 6)));
    assert!(matches!(
        out,
        AdvanceOutcome::Advanced {
            update: TrackerUpdate::InBlockAdvance { .. },
            ..
        }
    ));
    let t = fx.tracker().await;
    assert_eq!(t.actual_block_id(), ActualBlockId::new(1));
    assert_eq!(t.student_problem_id(), problem_id(1, 6));
    assert_eq!(t.current_lap(), 1);
    assert_eq!(fx.remaining().await, 2);
    assert_eq!(fx.repo.count("commit_progress"), 1);
    assert_eq!(fx.policy.call_count(), 0);
}

#[tokio::test]
async fn rolls_over_to_next_lap() {
    let fx = Fixture::new(true).await;
    fx.place(10, 1, true, 3).await;

    let out = fx.advancer.advance(STUDENT, problem_id(1, 10)).await.unwrap();

    assert_eq!(out.next_problem_id(), Some(problem_id(1, 1)));
    let t = fx.tracker().await;
    assert_eq!(t.actual_block_id(), ActualBlockId::new(1));
    assert_eq!(t.current_lap(), 2);
    assert_eq!(fx.remaining().await, 2);
}

#[tokio::test]
async fn rolls_over_to_next_block() {
    let fx = Fixture::new(true).await;
    fx.place(10, 2, true, 3).await;

    let out = fx.advancer.advance(STUDENT, problem_id(1, 10)).await.unwrap();

    assert_eq!(out.next_problem_id(), Some(problem_id(2, 1)));
    assert!(matches!(
        out,
        AdvanceOutcome::Advanced {
            update: TrackerUpdate::BlockRollover { .. },
            ..
        }
    ));
    let t = fx.tracker().await;
    assert_eq!(t.actual_block_id(), ActualBlockId::new(2));
    assert_eq!(t.student_problem_id(), problem_id(2, 1));
    assert_eq!(t.current_lap(), 0);
    assert_eq!(fx.remaining().await, 2);
}

#[tokio::test]
async fn curriculum_end_is_not_found() {
    let fx = Fixture::new(false).await;
    fx.place(10, 2, true, 3).await;

    let err = fx
        .advancer
        .advance(STUDENT, problem_id(1, 10))
        .await
        .unwrap_err();

    assert!(matches!(err, AdvanceError::NotFound { entity: "next block" }));
    assert_eq!(fx.writes(), 0);
    assert_eq!(fx.remaining().await, 3);
    assert_eq!(fx.tracker().await.student_problem_id(), problem_id(1, 10));
}

#[tokio::test]
async fn last_block_order_ends_curriculum() {
    let fx = Fixture::with_blocks(
        &[(1, u32::MAX, 10, 0)],
        StubPolicy::new(TrackerPatch::default(), 5),
    )
    .await;
    fx.place(10, 0, true, 3).await;

    let err = fx
        .advancer
        .advance(STUDENT, problem_id(1, 10))
        .await
        .unwrap_err();

    assert!(matches!(err, AdvanceError::NotFound { entity: "next block" }));
    assert_eq!(fx.repo.count("find_block_by_order"), 0);
    assert_eq!(fx.writes(), 0);
    assert_eq!(fx.remaining().await, 3);
}

#[tokio::test]
async fn exhausted_quota_defers_to_replenishment() {
    let patch = TrackerPatch {
        student_problem_id: Some(problem_id(1, 3)),
        is_rest: Some(true),
        ..TrackerPatch::default()
    };
    let fx = Fixture::with_policy(true, StubPolicy::new(patch.clone(), 7)).await;
    fx.place(5, 1, true, 0).await;

    let out = fx.advancer.advance(STUDENT, problem_id(1, 5)).await.unwrap();

    assert_eq!(fx.policy.call_count(), 1);
    assert_eq!(
        out,
        AdvanceOutcome::Advanced {
            next_problem_id: problem_id(1, 3),
            update: TrackerUpdate::Replenish { patch },
        }
    );
    // No position branch ran.
    assert_eq!(fx.repo.count("find_problem_by_position"), 0);
    assert_eq!(fx.repo.count("find_block_by_order"), 0);

    let t = fx.tracker().await;
    assert_eq!(t.student_problem_id(), problem_id(1, 3));
    assert!(t.is_rest());
    assert_eq!(t.current_lap(), 1);
    assert_eq!(fx.remaining().await, 7);
}

#[tokio::test]
async fn policy_sees_tracker_as_read() {
    let fx = Fixture::new(true).await;
    fx.place(4, 2, true, 0).await;

    fx.advancer.advance(STUDENT, problem_id(1, 4)).await.unwrap();

    let seen = fx.policy.calls.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].student_problem_id(), problem_id(1, 4));
    assert_eq!(seen[0].current_lap(), 2);
}

#[tokio::test]
async fn disabled_tracker_reads_only_tracker_and_writes_nothing() {
    let fx = Fixture::new(true).await;
    fx.place(5, 1, false, 3).await;

    let out = fx.advancer.advance(STUDENT, problem_id(1, 5)).await.unwrap();

    assert_eq!(out, AdvanceOutcome::Disabled);
    assert!(
        fx.repo
            .calls()
            .iter()
            .all(|c| *c == "find_tracker_by_student_problem")
    );
    assert_eq!(fx.writes(), 0);
    assert_eq!(fx.policy.call_count(), 0);
    assert_eq!(fx.remaining().await, 3);
}

#[tokio::test]
async fn lap_overflow_is_fatal_and_writes_nothing() {
    let fx = Fixture::new(true).await;
    fx.place(10, 3, true, 3).await;

    let err = fx
        .advancer
        .advance(STUDENT, problem_id(1, 10))
        .await
        .unwrap_err();

    assert!(err.is_invariant_violation());
    assert_eq!(fx.writes(), 0);
    let t = fx.tracker().await;
    assert_eq!(t.current_lap(), 3);
    assert_eq!(t.student_problem_id(), problem_id(1, 10));
    assert_eq!(fx.remaining().await, 3);
}

#[tokio::test]
async fn lap_overflow_mid_block_is_fatal() {
    let fx = Fixture::new(true).await;
    fx.place(4, 3, true, 3).await;

    let err = fx
        .advancer
        .advance(STUDENT, problem_id(1, 4))
        .await
        .unwrap_err();

    assert!(err.is_invariant_violation());
    assert_eq!(fx.writes(), 0);
}

#[tokio::test]
async fn completed_position_past_block_end_is_fatal() {
    let fx = Fixture::new(true).await;
    // Stray row at position 11 of the size-10 block.
    let stray = StudentProblem::new(
        problem_id(1, 11),
        STUDENT,
        ActualBlockId::new(1),
        SUBFIELD,
        11,
        99,
    )
    .unwrap();
    fx.repo.inner.insert_problem(&stray).await.unwrap();
    fx.place(10, 1, true, 3).await;

    let err = fx
        .advancer
        .advance(STUDENT, problem_id(1, 11))
        .await
        .unwrap_err();

    assert!(err.is_invariant_violation());
    assert_eq!(fx.writes(), 0);
    let t = fx.tracker().await;
    assert_eq!(t.student_problem_id(), problem_id(1, 10));
    assert_eq!(t.current_lap(), 1);
    assert_eq!(fx.remaining().await, 3);
}

#[tokio::test]
async fn invalid_replenishment_patch_is_rejected() {
    // Points the tracker at a problem from block 2 while keeping block 1.
    let patch = TrackerPatch {
        student_problem_id: Some(problem_id(2, 1)),
        ..TrackerPatch::default()
    };
    let fx = Fixture::with_policy(true, StubPolicy::new(patch, 4)).await;
    fx.place(5, 1, true, 0).await;

    let err = fx
        .advancer
        .advance(STUDENT, problem_id(1, 5))
        .await
        .unwrap_err();

    assert!(err.is_invariant_violation());
    assert_eq!(fx.writes(), 0);
    assert_eq!(fx.remaining().await, 0);
}

#[tokio::test]
async fn second_call_operates_on_fresh_tracker() {
    let fx = Fixture::new(true).await;
    fx.place(10, 1, true, 5).await;

    let first = fx.advancer.advance(STUDENT, problem_id(1, 10)).await.unwrap();
    assert_eq!(first.next_problem_id(), Some(problem_id(1, 1)));
    assert_eq!(fx.tracker().await.current_lap(), 2);

    // Same completed problem again: the tracker is now on its last lap.
    let second = fx.advancer.advance(STUDENT, problem_id(1, 10)).await.unwrap();
    assert_eq!(second.next_problem_id(), Some(problem_id(2, 1)));
    assert_eq!(fx.tracker().await.current_lap(), 0);
    assert_eq!(fx.remaining().await, 3);
}

#[tokio::test]
async fn unknown_problem_is_not_found() {
    let fx = Fixture::new(true).await;
    fx.place(5, 1, true, 3).await;

    let err = fx
        .advancer
        .advance(STUDENT, StudentProblemId::new(9_999))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(fx.writes(), 0);
}

#[tokio::test]
async fn other_students_problem_is_not_found() {
    let fx = Fixture::new(true).await;
    fx.place(5, 1, true, 3).await;

    let err = fx
        .advancer
        .advance(StudentId::new(2), problem_id(1, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, AdvanceError::NotFound { entity: "tracker" }));
    assert_eq!(fx.writes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_advances_do_not_lose_updates() {
    let fx = Fixture::new(true).await;
    fx.place(1, 0, true, 100).await;
    let advancer = Arc::new(fx.advancer);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let advancer = Arc::clone(&advancer);
        handles.push(tokio::spawn(async move {
            advancer.advance(STUDENT, problem_id(1, 1)).await
        }));
    }
    for handle in handles {
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out.next_problem_id(), Some(problem_id(1, 2)));
    }

    let remaining = fx
        .repo
        .inner
        .get_remaining_counter(STUDENT, SUBFIELD)
        .await
        .unwrap();
    assert_eq!(remaining, 84);
}
