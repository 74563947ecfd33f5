use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;
use validator::Validate;

use crate::ielts::{convert_raw_score, validation::validate_raw_score};
use crate::metrics::{EVALUATIONS_TOTAL, EVALUATION_DURATION_SECONDS, SUBMISSIONS_TOTAL};
use crate::models::{
    count_words, AiEvaluationResult, AttemptStatus, EvaluationStatus, Exercise, SkillType,
    SpeakingAttempt, SpeakingEvaluation, SubmitExerciseRequest, SubmitExerciseResponse,
    Submission, WritingAttempt, WritingEvaluation,
};
use crate::services::ai_client::AiEvaluator;
use crate::services::evaluation_cache::{speaking_cache_key, writing_cache_key, EvaluationCache};
use crate::services::submission_repository::SubmissionRepository;
use crate::services::sync_reporter::SyncReporter;
use crate::services::task_pool::TaskPool;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const DEFAULT_WRITING_TASK: &str = "task2";
const DEFAULT_SPEAKING_PART: i32 = 1;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    UnsupportedSkill(String),
    #[error("{0}")]
    AlreadySubmitted(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Routes submissions to their grading path. Listening and Reading are graded
/// inline; Writing and Speaking are evaluated in the background and report
/// progress only through the persisted `evaluation_status`.
#[derive(Clone)]
pub struct SubmissionService {
    repository: Arc<dyn SubmissionRepository>,
    ai: Option<Arc<dyn AiEvaluator>>,
    cache: EvaluationCache,
    reporter: SyncReporter,
    pool: TaskPool,
    ai_retry: RetryConfig,
}

impl SubmissionService {
    pub fn new(
        repository: Arc<dyn SubmissionRepository>,
        ai: Option<Arc<dyn AiEvaluator>>,
        cache: EvaluationCache,
        reporter: SyncReporter,
        pool: TaskPool,
    ) -> Self {
        Self {
            repository,
            ai,
            cache,
            reporter,
            pool,
            ai_retry: RetryConfig::ai_service(),
        }
    }

    pub fn with_ai_retry(mut self, retry: RetryConfig) -> Self {
        self.ai_retry = retry;
        self
    }

    pub fn reporter(&self) -> &SyncReporter {
        &self.reporter
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Waits for every background evaluation and sync spawned so far.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    pub async fn get_submission(&self, submission_id: &str) -> Result<Submission, SubmissionError> {
        self.repository
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| SubmissionError::NotFound(format!("submission {}", submission_id)))
    }

    pub async fn submit_exercise(
        &self,
        submission_id: &str,
        req: SubmitExerciseRequest,
    ) -> Result<SubmitExerciseResponse, SubmissionError> {
        req.validate()
            .map_err(|e| SubmissionError::Validation(e.to_string()))?;

        let submission = self.get_submission(submission_id).await?;
        let exercise = self
            .repository
            .get_exercise(&submission.exercise_id)
            .await?
            .ok_or_else(|| {
                SubmissionError::NotFound(format!("exercise {}", submission.exercise_id))
            })?;

        if exercise.skill_type != submission.skill_type {
            return Err(SubmissionError::UnsupportedSkill(format!(
                "submission is for {} but exercise {} is {}",
                submission.skill_type, exercise.id, exercise.skill_type
            )));
        }

        let response = match exercise.skill_type {
            SkillType::Listening | SkillType::Reading => {
                self.submit_objective(&submission, exercise, req).await?
            }
            SkillType::Writing => self.submit_writing(&submission, exercise, req).await?,
            SkillType::Speaking => self.submit_speaking(&submission, exercise, req).await?,
        };

        SUBMISSIONS_TOTAL
            .with_label_values(&[submission.skill_type.as_str()])
            .inc();
        tracing::info!(
            submission_id,
            skill = %submission.skill_type,
            "Submission accepted"
        );

        Ok(response)
    }

    async fn submit_objective(
        &self,
        submission: &Submission,
        exercise: Exercise,
        req: SubmitExerciseRequest,
    ) -> Result<SubmitExerciseResponse, SubmissionError> {
        if submission.status == AttemptStatus::Completed {
            return Err(SubmissionError::AlreadySubmitted(format!(
                "submission {} has already been graded",
                submission.id
            )));
        }
        if req.answers.is_empty() {
            return Err(SubmissionError::Validation(
                "at least one answer is required".to_string(),
            ));
        }

        let id = submission.id.as_str();
        self.repository
            .save_answers(id, &req.answers, req.time_spent_seconds)
            .await?;
        self.repository.complete_submission(id).await?;
        let result = self.repository.get_submission_result(id).await?;

        let band_score = match validate_raw_score(result.correct_answers, result.total_questions) {
            Ok(()) => {
                let band = convert_raw_score(
                    exercise.skill_type,
                    result.correct_answers,
                    result.total_questions,
                    exercise.reading_variant(),
                );
                self.repository.update_band_score(id, band).await?;
                tracing::info!(
                    submission_id = id,
                    correct = result.correct_answers,
                    total = result.total_questions,
                    band,
                    "Graded objective submission"
                );
                self.spawn_sync(id, exercise, band);
                Some(band)
            }
            Err(e) => {
                tracing::warn!(submission_id = id, error = %e, "Band score not computable");
                self.repository.mark_sync_not_required(id).await?;
                None
            }
        };

        Ok(SubmitExerciseResponse {
            submission_id: submission.id.clone(),
            skill_type: submission.skill_type,
            evaluation_status: None,
            band_score,
        })
    }

    async fn submit_writing(
        &self,
        submission: &Submission,
        exercise: Exercise,
        req: SubmitExerciseRequest,
    ) -> Result<SubmitExerciseResponse, SubmissionError> {
        ensure_not_queued(submission)?;

        let data = req
            .writing_data
            .ok_or_else(|| SubmissionError::Validation("writing_data is required".to_string()))?;
        if data.essay_text.trim().is_empty() {
            return Err(SubmissionError::Validation(
                "essay text is required".to_string(),
            ));
        }

        let word_count = if data.word_count > 0 {
            data.word_count
        } else {
            count_words(&data.essay_text)
        };
        let attempt = WritingAttempt {
            task_type: non_empty(data.task_type)
                .or_else(|| non_empty(exercise.writing_task_type.clone()))
                .unwrap_or_else(|| DEFAULT_WRITING_TASK.to_string()),
            prompt_text: non_empty(data.prompt_text)
                .or_else(|| exercise.writing_prompt_text.clone())
                .unwrap_or_default(),
            essay_text: data.essay_text,
            word_count,
        };

        let id = submission.id.as_str();
        let queued = self
            .repository
            .update_writing_data(id, &attempt, req.time_spent_seconds, EvaluationStatus::Pending)
            .await?;
        ensure_queued(id, queued)?;

        let service = self.clone();
        let submission_id = id.to_string();
        self.pool.spawn(
            "writing_evaluation",
            id,
            async move { service.evaluate_writing(submission_id, exercise, attempt).await },
            self.fault_handler(id, SkillType::Writing),
        );

        Ok(SubmitExerciseResponse {
            submission_id: submission.id.clone(),
            skill_type: submission.skill_type,
            evaluation_status: Some(EvaluationStatus::Pending),
            band_score: None,
        })
    }

    async fn submit_speaking(
        &self,
        submission: &Submission,
        exercise: Exercise,
        req: SubmitExerciseRequest,
    ) -> Result<SubmitExerciseResponse, SubmissionError> {
        ensure_not_queued(submission)?;

        let data = req
            .speaking_data
            .ok_or_else(|| SubmissionError::Validation("speaking_data is required".to_string()))?;
        if data.audio_url.trim().is_empty() {
            return Err(SubmissionError::Validation(
                "audio url is required".to_string(),
            ));
        }

        let attempt = SpeakingAttempt {
            audio_url: data.audio_url.trim().to_string(),
            audio_duration_seconds: data.audio_duration_seconds,
            part_number: data
                .speaking_part_number
                .or(exercise.speaking_part_number)
                .unwrap_or(DEFAULT_SPEAKING_PART),
            transcript_text: None,
        };

        let id = submission.id.as_str();
        let queued = self
            .repository
            .update_speaking_data(
                id,
                &attempt,
                req.time_spent_seconds,
                EvaluationStatus::Processing,
            )
            .await?;
        ensure_queued(id, queued)?;

        let service = self.clone();
        let submission_id = id.to_string();
        self.pool.spawn(
            "speaking_evaluation",
            id,
            async move { service.evaluate_speaking(submission_id, exercise, attempt).await },
            self.fault_handler(id, SkillType::Speaking),
        );

        Ok(SubmitExerciseResponse {
            submission_id: submission.id.clone(),
            skill_type: submission.skill_type,
            evaluation_status: Some(EvaluationStatus::Processing),
            band_score: None,
        })
    }

    async fn evaluate_writing(&self, id: String, exercise: Exercise, attempt: WritingAttempt) {
        let started = Instant::now();
        let outcome = self.run_writing(&id, &attempt).await;
        self.finish_evaluation(&id, exercise, SkillType::Writing, started, outcome)
            .await;
    }

    async fn evaluate_speaking(&self, id: String, exercise: Exercise, attempt: SpeakingAttempt) {
        let started = Instant::now();
        let outcome = self.run_speaking(&id, &attempt).await;
        self.finish_evaluation(&id, exercise, SkillType::Speaking, started, outcome)
            .await;
    }

    /// `Ok(None)` means the submission left the expected state while we were
    /// working on it; nothing is written in that case.
    async fn run_writing(
        &self,
        id: &str,
        attempt: &WritingAttempt,
    ) -> anyhow::Result<Option<f64>> {
        let ai = self.evaluator()?;

        if !self
            .repository
            .update_evaluation_status(id, EvaluationStatus::Processing)
            .await?
        {
            return Ok(None);
        }

        let key = writing_cache_key(&attempt.task_type, &attempt.prompt_text, &attempt.essay_text);
        let (evaluation, cached) = match self.cache.lookup::<WritingEvaluation>(&key).await {
            Some(hit) => (hit, true),
            None => {
                let fresh = retry_async_with_config(&self.ai_retry, "ai.evaluate_writing", || {
                    ai.evaluate_writing(&attempt.essay_text, &attempt.task_type, &attempt.prompt_text)
                })
                .await
                .map_err(|e| e.into_anyhow())?;
                (fresh, false)
            }
        };

        evaluation
            .validate()
            .map_err(|e| anyhow!("AI returned an invalid writing evaluation: {}", e))?;
        if !cached {
            self.spawn_cache_write(id, key, evaluation.clone());
        }

        let band = evaluation.band();
        self.persist(id, AiEvaluationResult::from_writing(&evaluation, band))
            .await
    }

    async fn run_speaking(
        &self,
        id: &str,
        attempt: &SpeakingAttempt,
    ) -> anyhow::Result<Option<f64>> {
        let ai = self.evaluator()?;

        let transcription = retry_async_with_config(&self.ai_retry, "ai.transcribe_audio", || {
            ai.transcribe_audio(&attempt.audio_url)
        })
        .await
        .map_err(|e| e.into_anyhow())?;

        let transcript = transcription.text.trim().to_string();
        if transcript.is_empty() {
            bail!("transcription returned no text");
        }

        if let Err(e) = self.repository.update_transcript(id, &transcript).await {
            tracing::warn!(submission_id = id, error = %e, "Failed to save transcript");
        }

        let key = speaking_cache_key(attempt.part_number, &transcript);
        let (evaluation, cached) = match self.cache.lookup::<SpeakingEvaluation>(&key).await {
            Some(hit) => (hit, true),
            None => {
                let fresh = retry_async_with_config(&self.ai_retry, "ai.evaluate_speaking", || {
                    ai.evaluate_speaking(&transcript, attempt.part_number)
                })
                .await
                .map_err(|e| e.into_anyhow())?;
                (fresh, false)
            }
        };

        evaluation
            .validate()
            .map_err(|e| anyhow!("AI returned an invalid speaking evaluation: {}", e))?;
        if !cached {
            self.spawn_cache_write(id, key, evaluation.clone());
        }

        let band = evaluation.band();
        self.persist(id, AiEvaluationResult::from_speaking(&evaluation, band))
            .await
    }

    fn evaluator(&self) -> anyhow::Result<Arc<dyn AiEvaluator>> {
        self.ai
            .clone()
            .ok_or_else(|| anyhow!("AI evaluator is not configured"))
    }

    async fn persist(&self, id: &str, result: AiEvaluationResult) -> anyhow::Result<Option<f64>> {
        let band = result.overall_band_score;
        if self.repository.update_with_ai_result(id, &result).await? {
            Ok(Some(band))
        } else {
            Ok(None)
        }
    }

    async fn finish_evaluation(
        &self,
        id: &str,
        exercise: Exercise,
        skill: SkillType,
        started: Instant,
        outcome: anyhow::Result<Option<f64>>,
    ) {
        EVALUATION_DURATION_SECONDS
            .with_label_values(&[skill.as_str()])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Some(band)) => {
                EVALUATIONS_TOTAL
                    .with_label_values(&[skill.as_str(), "completed"])
                    .inc();
                tracing::info!(submission_id = id, skill = %skill, band, "Evaluation completed");
                self.spawn_sync(id, exercise, band);
            }
            Ok(None) => {
                tracing::warn!(
                    submission_id = id,
                    skill = %skill,
                    "Submission changed state during evaluation; result discarded"
                );
            }
            Err(e) => {
                EVALUATIONS_TOTAL
                    .with_label_values(&[skill.as_str(), "failed"])
                    .inc();
                let error = format!("{:#}", e);
                tracing::error!(submission_id = id, skill = %skill, error = %error, "Evaluation failed");
                mark_failed(self.repository.as_ref(), id).await;
            }
        }
    }

    fn fault_handler(
        &self,
        id: &str,
        skill: SkillType,
    ) -> impl FnOnce(String) -> BoxFuture<'static, ()> + Send + 'static {
        let repository = self.repository.clone();
        let id = id.to_string();
        move |_panic: String| {
            async move {
                EVALUATIONS_TOTAL
                    .with_label_values(&[skill.as_str(), "failed"])
                    .inc();
                mark_failed(repository.as_ref(), &id).await;
            }
            .boxed()
        }
    }

    fn spawn_cache_write<T>(&self, id: &str, key: String, evaluation: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let cache = self.cache.clone();
        self.pool.spawn(
            "evaluation_cache_write",
            id,
            async move { cache.store(&key, &evaluation).await },
            |_| async {},
        );
    }

    fn spawn_sync(&self, id: &str, exercise: Exercise, band: f64) {
        let reporter = self.reporter.clone();
        let repository = self.repository.clone();
        let submission_id = id.to_string();
        let fault_id = id.to_string();

        self.pool.spawn(
            "user_service_sync",
            id,
            async move {
                if let Err(e) = reporter.report_result(&submission_id, &exercise, band).await {
                    let error = format!("{:#}", e);
                    tracing::error!(submission_id = %submission_id, error = %error, "Sync bookkeeping failed");
                }
            },
            move |panic: String| async move {
                if let Err(e) = repository
                    .mark_sync_failed(&fault_id, &format!("sync task panicked: {}", panic), 0)
                    .await
                {
                    tracing::error!(submission_id = %fault_id, error = %e, "Failed to record sync panic");
                }
            },
        );
    }
}

fn ensure_not_queued(submission: &Submission) -> Result<(), SubmissionError> {
    match submission.evaluation_status {
        None => Ok(()),
        Some(status) => Err(SubmissionError::AlreadySubmitted(format!(
            "submission {} is already {}",
            submission.id,
            status.as_str()
        ))),
    }
}

/// A concurrent submit won the guarded write; the stored attempt is theirs.
fn ensure_queued(id: &str, queued: bool) -> Result<(), SubmissionError> {
    if queued {
        Ok(())
    } else {
        Err(SubmissionError::AlreadySubmitted(format!(
            "submission {} is already being evaluated",
            id
        )))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn mark_failed(repository: &dyn SubmissionRepository, id: &str) {
    match repository
        .update_evaluation_status(id, EvaluationStatus::Failed)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(submission_id = id, "Evaluation already terminal; not marking failed")
        }
        Err(e) => tracing::error!(submission_id = id, error = %e, "Failed to mark evaluation failed"),
    }
}
