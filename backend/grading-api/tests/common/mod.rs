#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use ielts_grading_api::{
    config::Config,
    create_router,
    models::{
        grade_answers, AiEvaluationResult, AnswerKey, AttemptStatus, EvaluationStatus, Exercise,
        ExerciseType, OfficialTestResult, PracticeActivity, SkillType, SpeakingAttempt,
        SpeakingEvaluation, Submission, SubmissionResult, SubmittedAnswer, SyncStatus,
        Transcription, WritingAttempt, WritingEvaluation,
    },
    services::{
        ai_client::AiEvaluator,
        evaluation_cache::{CacheEntry, CacheStore, EvaluationCache},
        submission_repository::SubmissionRepository,
        submission_service::SubmissionService,
        sync_reporter::SyncReporter,
        task_pool::TaskPool,
        user_service_client::UserServiceClient,
        AppState,
    },
    utils::retry::RetryConfig,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
        jitter_max: None,
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryRepository {
    submissions: Mutex<HashMap<String, Submission>>,
    exercises: Mutex<HashMap<String, Exercise>>,
    answer_keys: Mutex<Vec<AnswerKey>>,
    /// Snapshots returned by `get_submission` in place of the live record.
    snapshots: Mutex<HashMap<String, Submission>>,
    pub status_writes: Mutex<Vec<EvaluationStatus>>,
    pub fail_ai_result_writes: AtomicBool,
}

impl InMemoryRepository {
    pub fn insert_submission(&self, submission: Submission) {
        self.submissions
            .lock()
            .unwrap()
            .insert(submission.id.clone(), submission);
    }

    pub fn insert_exercise(&self, exercise: Exercise) {
        self.exercises
            .lock()
            .unwrap()
            .insert(exercise.id.clone(), exercise);
    }

    pub fn insert_answer_keys(&self, keys: Vec<AnswerKey>) {
        self.answer_keys.lock().unwrap().extend(keys);
    }

    /// Freezes what readers see for `id`, as a concurrent request that read
    /// the record before any write would.
    pub fn serve_snapshot(&self, id: &str) {
        let snapshot = self.submission(id);
        self.snapshots
            .lock()
            .unwrap()
            .insert(id.to_string(), snapshot);
    }

    pub fn submission(&self, id: &str) -> Submission {
        self.submissions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .expect("submission seeded")
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Submission),
    {
        let mut submissions = self.submissions.lock().unwrap();
        let submission = submissions
            .get_mut(id)
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        f(submission);
        submission.updated_at = Utc::now();
        Ok(())
    }

    fn queue_attempt<F>(&self, id: &str, status: EvaluationStatus, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Submission),
    {
        let mut submissions = self.submissions.lock().unwrap();
        let submission = submissions
            .get_mut(id)
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        if submission.evaluation_status.is_some() {
            return Ok(false);
        }
        f(submission);
        submission.status = AttemptStatus::Completed;
        submission.completed_at = Some(Utc::now());
        submission.evaluation_status = Some(status);
        submission.updated_at = Utc::now();
        self.status_writes.lock().unwrap().push(status);
        Ok(true)
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryRepository {
    async fn get_submission(&self, id: &str) -> Result<Option<Submission>> {
        if let Some(snapshot) = self.snapshots.lock().unwrap().get(id) {
            return Ok(Some(snapshot.clone()));
        }
        Ok(self.submissions.lock().unwrap().get(id).cloned())
    }

    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>> {
        Ok(self.exercises.lock().unwrap().get(id).cloned())
    }

    async fn save_answers(
        &self,
        id: &str,
        answers: &[SubmittedAnswer],
        time_spent_seconds: i64,
    ) -> Result<()> {
        self.modify(id, |s| {
            s.answers = answers.to_vec();
            s.time_spent_seconds = time_spent_seconds;
        })
    }

    async fn complete_submission(&self, id: &str) -> Result<()> {
        let submission = self
            .get_submission(id)
            .await?
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        let keys: Vec<AnswerKey> = self
            .answer_keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.exercise_id == submission.exercise_id)
            .cloned()
            .collect();

        let mut result = grade_answers(&keys, &submission.answers);
        if let Some(exercise) = self.get_exercise(&submission.exercise_id).await? {
            result.total_questions = result.total_questions.max(exercise.total_questions);
        }

        self.modify(id, |s| {
            s.status = AttemptStatus::Completed;
            s.completed_at = Some(Utc::now());
            s.correct_answers = result.correct_answers;
            s.total_questions = result.total_questions;
            s.questions_answered = result.questions_answered;
            s.score = Some(if result.total_questions > 0 {
                result.correct_answers as f64 / result.total_questions as f64 * 100.0
            } else {
                0.0
            });
        })
    }

    async fn get_submission_result(&self, id: &str) -> Result<SubmissionResult> {
        let s = self
            .get_submission(id)
            .await?
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        if s.status != AttemptStatus::Completed {
            bail!("Submission {} has not been graded", id);
        }
        Ok(SubmissionResult {
            correct_answers: s.correct_answers,
            total_questions: s.total_questions,
            questions_answered: s.questions_answered,
        })
    }

    async fn update_band_score(&self, id: &str, band_score: f64) -> Result<()> {
        self.modify(id, |s| s.band_score = Some(band_score))
    }

    async fn update_writing_data(
        &self,
        id: &str,
        writing: &WritingAttempt,
        time_spent_seconds: i64,
        status: EvaluationStatus,
    ) -> Result<bool> {
        self.queue_attempt(id, status, |s| {
            s.writing = Some(writing.clone());
            s.time_spent_seconds = time_spent_seconds;
        })
    }

    async fn update_speaking_data(
        &self,
        id: &str,
        speaking: &SpeakingAttempt,
        time_spent_seconds: i64,
        status: EvaluationStatus,
    ) -> Result<bool> {
        self.queue_attempt(id, status, |s| {
            s.speaking = Some(speaking.clone());
            s.time_spent_seconds = time_spent_seconds;
        })
    }

    async fn update_evaluation_status(&self, id: &str, status: EvaluationStatus) -> Result<bool> {
        let mut submissions = self.submissions.lock().unwrap();
        let submission = submissions
            .get_mut(id)
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        if !EvaluationStatus::can_transition(submission.evaluation_status, status) {
            return Ok(false);
        }
        submission.evaluation_status = Some(status);
        self.status_writes.lock().unwrap().push(status);
        Ok(true)
    }

    async fn update_transcript(&self, id: &str, transcript: &str) -> Result<()> {
        self.modify(id, |s| {
            if let Some(speaking) = s.speaking.as_mut() {
                speaking.transcript_text = Some(transcript.to_string());
            }
        })
    }

    async fn update_with_ai_result(&self, id: &str, result: &AiEvaluationResult) -> Result<bool> {
        if self.fail_ai_result_writes.load(Ordering::SeqCst) {
            bail!("write concern timeout storing evaluation for {}", id);
        }
        let mut submissions = self.submissions.lock().unwrap();
        let submission = submissions
            .get_mut(id)
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        if !EvaluationStatus::can_transition(
            submission.evaluation_status,
            EvaluationStatus::Completed,
        ) {
            return Ok(false);
        }
        submission.ai_evaluation = Some(result.clone());
        submission.band_score = Some(result.overall_band_score);
        submission.evaluation_status = Some(EvaluationStatus::Completed);
        self.status_writes
            .lock()
            .unwrap()
            .push(EvaluationStatus::Completed);
        Ok(true)
    }

    async fn mark_sync_success(&self, id: &str, attempts: i32) -> Result<()> {
        self.modify(id, |s| {
            s.user_service_sync.status = SyncStatus::Synced;
            s.user_service_sync.attempts += attempts;
            s.user_service_sync.last_attempt_at = Some(Utc::now());
            s.user_service_sync.last_error = None;
        })
    }

    async fn mark_sync_failed(&self, id: &str, error: &str, attempts: i32) -> Result<()> {
        self.modify(id, |s| {
            s.user_service_sync.status = SyncStatus::Failed;
            s.user_service_sync.attempts += attempts;
            s.user_service_sync.last_attempt_at = Some(Utc::now());
            s.user_service_sync.last_error = Some(error.to_string());
        })
    }

    async fn mark_sync_not_required(&self, id: &str) -> Result<()> {
        self.modify(id, |s| s.user_service_sync.status = SyncStatus::NotRequired)
    }

    async fn list_failed_syncs(&self, limit: i64) -> Result<Vec<Submission>> {
        let mut failed: Vec<Submission> = self
            .submissions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_service_sync.status == SyncStatus::Failed)
            .filter(|s| s.band_score.is_some())
            .filter(|s| {
                s.evaluation_status == Some(EvaluationStatus::Completed)
                    || s.skill_type.has_raw_score_table()
            })
            .cloned()
            .collect();
        failed.sort_by_key(|s| s.user_service_sync.last_attempt_at);
        failed.truncate(limit.max(0) as usize);
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Cache store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn insert(&self, entry: CacheEntry) {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.content_hash.clone(), entry);
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, hash: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().unwrap().get(hash).cloned())
    }

    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        self.insert(entry.clone());
        Ok(())
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(hash);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.entries.lock().unwrap().values().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// AI evaluator
// ---------------------------------------------------------------------------

pub struct FakeAi {
    pub writing: WritingEvaluation,
    pub speaking: SpeakingEvaluation,
    pub transcript: String,
    /// Number of upcoming calls (of any kind) that fail before succeeding.
    pub failures_left: AtomicUsize,
    pub panic_on_writing: bool,
    pub writing_calls: AtomicUsize,
    pub transcribe_calls: AtomicUsize,
    pub speaking_calls: AtomicUsize,
}

impl Default for FakeAi {
    fn default() -> Self {
        Self {
            writing: writing_evaluation(7.0, 6.5, 6.0, 6.0),
            speaking: speaking_evaluation(6.5, 6.5, 6.0, 7.0),
            transcript: "Well I usually spend my weekends hiking with friends".to_string(),
            failures_left: AtomicUsize::new(0),
            panic_on_writing: false,
            writing_calls: AtomicUsize::new(0),
            transcribe_calls: AtomicUsize::new(0),
            speaking_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeAi {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn maybe_fail(&self) -> Result<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            bail!("AI service returned status 503: unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl AiEvaluator for FakeAi {
    async fn evaluate_writing(
        &self,
        _essay_text: &str,
        _task_type: &str,
        _prompt_text: &str,
    ) -> Result<WritingEvaluation> {
        self.writing_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_writing {
            panic!("evaluator blew up");
        }
        self.maybe_fail()?;
        Ok(self.writing.clone())
    }

    async fn transcribe_audio(&self, _audio_url: &str) -> Result<Transcription> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(Transcription {
            text: self.transcript.clone(),
            duration_seconds: Some(42.0),
            language: Some("en".to_string()),
        })
    }

    async fn evaluate_speaking(
        &self,
        _transcript_text: &str,
        _part_number: i32,
    ) -> Result<SpeakingEvaluation> {
        self.speaking_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(self.speaking.clone())
    }
}

pub fn writing_evaluation(ta: f64, cc: f64, lr: f64, gra: f64) -> WritingEvaluation {
    serde_json::from_value(serde_json::json!({
        "task_achievement": ta,
        "coherence_cohesion": cc,
        "lexical_resource": lr,
        "grammar_accuracy": gra,
        "overall_band": 0.0,
        "feedback": "Clear position with relevant support.",
        "strengths": ["clear structure"],
        "weaknesses": ["limited range"],
        "suggestions": ["vary sentence openings"]
    }))
    .expect("valid writing evaluation")
}

pub fn speaking_evaluation(fc: f64, lr: f64, gra: f64, pron: f64) -> SpeakingEvaluation {
    serde_json::from_value(serde_json::json!({
        "fluency_coherence": fc,
        "lexical_resource": lr,
        "grammatical_range": gra,
        "pronunciation": pron,
        "overall_band": 0.0,
        "feedback": "Fluent with occasional hesitation."
    }))
    .expect("valid speaking evaluation")
}

// ---------------------------------------------------------------------------
// User service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeUserService {
    pub official: Mutex<Vec<(String, OfficialTestResult)>>,
    pub practice: Mutex<Vec<(String, PracticeActivity)>>,
    pub calls: AtomicUsize,
    /// Number of upcoming calls that fail; `usize::MAX` fails forever.
    pub failures_left: AtomicUsize,
}

impl FakeUserService {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn recover(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
            }
            bail!("user service returned status 502: bad gateway");
        }
        Ok(())
    }
}

#[async_trait]
impl UserServiceClient for FakeUserService {
    async fn record_official_test_result(
        &self,
        user_id: &str,
        result: &OfficialTestResult,
    ) -> Result<()> {
        self.maybe_fail()?;
        self.official
            .lock()
            .unwrap()
            .push((user_id.to_string(), result.clone()));
        Ok(())
    }

    async fn record_practice_activity(
        &self,
        user_id: &str,
        activity: &PracticeActivity,
    ) -> Result<()> {
        self.maybe_fail()?;
        self.practice
            .lock()
            .unwrap()
            .push((user_id.to_string(), activity.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub repository: Arc<InMemoryRepository>,
    pub ai: Option<Arc<FakeAi>>,
    pub user_service: Arc<FakeUserService>,
    pub cache_store: Arc<MemoryCacheStore>,
    pub cache: EvaluationCache,
    pub service: SubmissionService,
}

impl Harness {
    pub fn new(ai: Option<FakeAi>, user_service: FakeUserService) -> Self {
        init_tracing();

        let repository = Arc::new(InMemoryRepository::default());
        let ai = ai.map(Arc::new);
        let user_service = Arc::new(user_service);
        let cache_store = Arc::new(MemoryCacheStore::default());
        let cache = EvaluationCache::new(cache_store.clone());

        let reporter = SyncReporter::new(repository.clone(), user_service.clone())
            .with_retry(fast_retry());
        let evaluator = ai.clone().map(|ai| ai as Arc<dyn AiEvaluator>);
        let service = SubmissionService::new(
            repository.clone(),
            evaluator,
            cache.clone(),
            reporter,
            TaskPool::new(4),
        )
        .with_ai_retry(fast_retry());

        Self {
            repository,
            ai,
            user_service,
            cache_store,
            cache,
            service,
        }
    }

    pub fn with_ai() -> Self {
        Self::new(Some(FakeAi::default()), FakeUserService::default())
    }

    pub fn ai(&self) -> &FakeAi {
        self.ai.as_deref().expect("harness built with an evaluator")
    }

    pub fn reporter(&self) -> SyncReporter {
        self.service.reporter().clone()
    }

    pub fn router(&self) -> Router {
        let state = AppState::with_services(
            Config::default(),
            self.service.clone(),
            self.cache.clone(),
        );
        create_router(Arc::new(state))
    }

    /// Polls until the cache store holds at least `expected` entries.
    pub async fn wait_for_cache_entries(&self, expected: usize) {
        for _ in 0..100 {
            if self.cache_store.len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} cache entries, found {}",
            expected,
            self.cache_store.len()
        );
    }

    pub fn seed(&self, exercise: Exercise, submission_id: &str) -> Submission {
        let submission = Submission::new(
            submission_id,
            "user-1",
            exercise.id.clone(),
            exercise.skill_type,
        );
        self.repository.insert_exercise(exercise);
        self.repository.insert_submission(submission.clone());
        submission
    }
}

pub fn exercise(id: &str, skill_type: SkillType, exercise_type: ExerciseType) -> Exercise {
    Exercise {
        id: id.to_string(),
        title: format!("{} exercise", skill_type),
        exercise_type,
        skill_type,
        ielts_test_type: None,
        total_questions: 0,
        writing_task_type: None,
        writing_prompt_text: None,
        speaking_part_number: None,
        speaking_prompt_text: None,
    }
}

/// Answer keys for questions `q1..=qN`, each expecting `answer-i`.
pub fn answer_keys(exercise_id: &str, count: usize) -> Vec<AnswerKey> {
    (1..=count)
        .map(|i| AnswerKey {
            exercise_id: exercise_id.to_string(),
            question_id: format!("q{}", i),
            answer_text: Some(format!("answer-{}", i)),
            alternative_answers: Vec::new(),
            correct_option_id: None,
            is_case_sensitive: false,
        })
        .collect()
}

/// `correct` right answers followed by wrong ones up to `total`.
pub fn answers(correct: usize, total: usize) -> Vec<SubmittedAnswer> {
    (1..=total)
        .map(|i| SubmittedAnswer {
            question_id: format!("q{}", i),
            answer_text: Some(if i <= correct {
                format!("Answer-{}", i)
            } else {
                "wrong".to_string()
            }),
            selected_option_id: None,
        })
        .collect()
}
