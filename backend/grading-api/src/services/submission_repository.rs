use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::{Collection, Database};

use crate::metrics::track_db_operation;
use crate::models::{
    grade_answers, AiEvaluationResult, AnswerKey, AttemptStatus, EvaluationStatus, Exercise,
    SpeakingAttempt, Submission, SubmissionResult, SubmittedAnswer, SyncStatus, WritingAttempt,
};
use crate::utils::time::chrono_to_bson;

const SUBMISSIONS: &str = "user_exercise_attempts";
const EXERCISES: &str = "exercises";
const ANSWER_KEYS: &str = "question_answers";

/// Durable storage for submissions and the read-only exercise catalogue.
///
/// Status-changing writes are conditional: `update_writing_data`,
/// `update_speaking_data`, `update_evaluation_status` and
/// `update_with_ai_result` return `false` when the stored state does not
/// allow the transition, and leave the record untouched.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn get_submission(&self, id: &str) -> Result<Option<Submission>>;
    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>>;

    async fn save_answers(
        &self,
        id: &str,
        answers: &[SubmittedAnswer],
        time_spent_seconds: i64,
    ) -> Result<()>;
    /// Marks the attempt completed and grades its answers against the key.
    async fn complete_submission(&self, id: &str) -> Result<()>;
    async fn get_submission_result(&self, id: &str) -> Result<SubmissionResult>;
    async fn update_band_score(&self, id: &str, band_score: f64) -> Result<()>;

    /// Stores the essay and enters `status` in the same write, only while no
    /// evaluation has been queued for the submission.
    async fn update_writing_data(
        &self,
        id: &str,
        writing: &WritingAttempt,
        time_spent_seconds: i64,
        status: EvaluationStatus,
    ) -> Result<bool>;
    async fn update_speaking_data(
        &self,
        id: &str,
        speaking: &SpeakingAttempt,
        time_spent_seconds: i64,
        status: EvaluationStatus,
    ) -> Result<bool>;
    async fn update_evaluation_status(&self, id: &str, status: EvaluationStatus) -> Result<bool>;
    async fn update_transcript(&self, id: &str, transcript: &str) -> Result<()>;
    /// Attaches the evaluation, sets the band score and moves
    /// `processing -> completed` in one write.
    async fn update_with_ai_result(&self, id: &str, result: &AiEvaluationResult) -> Result<bool>;

    async fn mark_sync_success(&self, id: &str, attempts: i32) -> Result<()>;
    async fn mark_sync_failed(&self, id: &str, error: &str, attempts: i32) -> Result<()>;
    async fn mark_sync_not_required(&self, id: &str) -> Result<()>;
    /// Submissions whose last sync failed after grading finished, oldest
    /// attempt first.
    async fn list_failed_syncs(&self, limit: i64) -> Result<Vec<Submission>>;
}

#[derive(Clone)]
pub struct MongoSubmissionRepository {
    mongo: Database,
}

impl MongoSubmissionRepository {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn submissions(&self) -> Collection<Submission> {
        self.mongo.collection(SUBMISSIONS)
    }

    async fn set_fields(&self, operation: &str, id: &str, fields: Document) -> Result<()> {
        let mut fields = fields;
        fields.insert("updated_at", chrono_to_bson(Utc::now()));

        let result = track_db_operation(operation, SUBMISSIONS, async {
            self.submissions()
                .update_one(doc! { "_id": id }, doc! { "$set": fields })
                .await
                .with_context(|| format!("Failed to {} for submission {}", operation, id))
        })
        .await?;

        if result.matched_count == 0 {
            return Err(anyhow!("Submission {} not found", id));
        }
        Ok(())
    }

    /// Completes the attempt and moves it into `status`, guarded on the
    /// evaluation not having started yet.
    async fn queue_attempt(
        &self,
        operation: &str,
        id: &str,
        status: EvaluationStatus,
        fields: Document,
    ) -> Result<bool> {
        let mut fields = fields;
        let now = chrono_to_bson(Utc::now());
        fields.insert("status", "completed");
        fields.insert("completed_at", now.clone());
        fields.insert("evaluation_status", status.as_str());
        fields.insert("updated_at", now);

        let result = track_db_operation(operation, SUBMISSIONS, async {
            self.submissions()
                .update_one(
                    doc! { "_id": id, "evaluation_status": Bson::Null },
                    doc! { "$set": fields },
                )
                .await
                .with_context(|| format!("Failed to {} for submission {}", operation, id))
        })
        .await?;

        Ok(result.modified_count == 1)
    }
}

fn status_filter(id: &str, status: EvaluationStatus) -> Document {
    let allowed: Vec<Bson> = status
        .predecessors()
        .iter()
        .map(|prev| match prev {
            Some(prev) => Bson::String(prev.as_str().to_string()),
            None => Bson::Null,
        })
        .collect();

    doc! { "_id": id, "evaluation_status": { "$in": allowed } }
}

#[async_trait]
impl SubmissionRepository for MongoSubmissionRepository {
    async fn get_submission(&self, id: &str) -> Result<Option<Submission>> {
        track_db_operation("find_one", SUBMISSIONS, async {
            self.submissions()
                .find_one(doc! { "_id": id })
                .await
                .context("Failed to query submission")
        })
        .await
    }

    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>> {
        track_db_operation("find_one", EXERCISES, async {
            self.mongo
                .collection::<Exercise>(EXERCISES)
                .find_one(doc! { "_id": id })
                .await
                .context("Failed to query exercise")
        })
        .await
    }

    async fn save_answers(
        &self,
        id: &str,
        answers: &[SubmittedAnswer],
        time_spent_seconds: i64,
    ) -> Result<()> {
        let answers = to_bson(answers).context("Failed to encode answers")?;
        self.set_fields(
            "save_answers",
            id,
            doc! {
                "answers": answers,
                "time_spent_seconds": time_spent_seconds,
            },
        )
        .await
    }

    async fn complete_submission(&self, id: &str) -> Result<()> {
        let submission = self
            .get_submission(id)
            .await?
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;

        let keys: Vec<AnswerKey> = track_db_operation("find", ANSWER_KEYS, async {
            self.mongo
                .collection::<AnswerKey>(ANSWER_KEYS)
                .find(doc! { "exercise_id": &submission.exercise_id })
                .await
                .context("Failed to query answer keys")?
                .try_collect()
                .await
                .context("Failed to read answer keys")
        })
        .await?;

        let mut result = grade_answers(&keys, &submission.answers);
        if let Some(exercise) = self.get_exercise(&submission.exercise_id).await? {
            result.total_questions = result.total_questions.max(exercise.total_questions);
        }

        let score = if result.total_questions > 0 {
            result.correct_answers as f64 / result.total_questions as f64 * 100.0
        } else {
            0.0
        };

        tracing::debug!(
            submission_id = %id,
            correct = result.correct_answers,
            total = result.total_questions,
            "Graded submission answers"
        );

        self.set_fields(
            "complete_submission",
            id,
            doc! {
                "status": "completed",
                "completed_at": chrono_to_bson(Utc::now()),
                "correct_answers": result.correct_answers,
                "total_questions": result.total_questions,
                "questions_answered": result.questions_answered,
                "score": score,
            },
        )
        .await
    }

    async fn get_submission_result(&self, id: &str) -> Result<SubmissionResult> {
        let submission = self
            .get_submission(id)
            .await?
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;

        if submission.status != AttemptStatus::Completed {
            return Err(anyhow!("Submission {} has not been graded", id));
        }

        Ok(SubmissionResult {
            correct_answers: submission.correct_answers,
            total_questions: submission.total_questions,
            questions_answered: submission.questions_answered,
        })
    }

    async fn update_band_score(&self, id: &str, band_score: f64) -> Result<()> {
        self.set_fields("update_band_score", id, doc! { "band_score": band_score })
            .await
    }

    async fn update_writing_data(
        &self,
        id: &str,
        writing: &WritingAttempt,
        time_spent_seconds: i64,
        status: EvaluationStatus,
    ) -> Result<bool> {
        let writing = to_bson(writing).context("Failed to encode writing data")?;
        self.queue_attempt(
            "update_writing_data",
            id,
            status,
            doc! { "writing": writing, "time_spent_seconds": time_spent_seconds },
        )
        .await
    }

    async fn update_speaking_data(
        &self,
        id: &str,
        speaking: &SpeakingAttempt,
        time_spent_seconds: i64,
        status: EvaluationStatus,
    ) -> Result<bool> {
        let speaking = to_bson(speaking).context("Failed to encode speaking data")?;
        self.queue_attempt(
            "update_speaking_data",
            id,
            status,
            doc! { "speaking": speaking, "time_spent_seconds": time_spent_seconds },
        )
        .await
    }

    async fn update_evaluation_status(&self, id: &str, status: EvaluationStatus) -> Result<bool> {
        let result = track_db_operation("update_evaluation_status", SUBMISSIONS, async {
            self.submissions()
                .update_one(
                    status_filter(id, status),
                    doc! { "$set": {
                        "evaluation_status": status.as_str(),
                        "updated_at": chrono_to_bson(Utc::now()),
                    } },
                )
                .await
                .context("Failed to update evaluation status")
        })
        .await?;

        Ok(result.modified_count == 1)
    }

    async fn update_transcript(&self, id: &str, transcript: &str) -> Result<()> {
        self.set_fields(
            "update_transcript",
            id,
            doc! { "speaking.transcript_text": transcript },
        )
        .await
    }

    async fn update_with_ai_result(&self, id: &str, result: &AiEvaluationResult) -> Result<bool> {
        let evaluation = to_bson(result).context("Failed to encode AI evaluation")?;
        let update = track_db_operation("update_with_ai_result", SUBMISSIONS, async {
            self.submissions()
                .update_one(
                    status_filter(id, EvaluationStatus::Completed),
                    doc! { "$set": {
                        "ai_evaluation": evaluation,
                        "band_score": result.overall_band_score,
                        "evaluation_status": EvaluationStatus::Completed.as_str(),
                        "updated_at": chrono_to_bson(Utc::now()),
                    } },
                )
                .await
                .context("Failed to store AI evaluation")
        })
        .await?;

        Ok(update.modified_count == 1)
    }

    async fn mark_sync_success(&self, id: &str, attempts: i32) -> Result<()> {
        let now = chrono_to_bson(Utc::now());
        track_db_operation("mark_sync_success", SUBMISSIONS, async {
            self.submissions()
                .update_one(
                    doc! { "_id": id },
                    doc! {
                        "$set": {
                            "user_service_sync_status": SyncStatus::Synced.as_str(),
                            "user_service_last_sync_attempt": now.clone(),
                            "updated_at": now,
                        },
                        "$inc": { "user_service_sync_attempts": attempts },
                        "$unset": { "user_service_sync_error": "" },
                    },
                )
                .await
                .context("Failed to record sync success")
        })
        .await?;
        Ok(())
    }

    async fn mark_sync_failed(&self, id: &str, error: &str, attempts: i32) -> Result<()> {
        let now = chrono_to_bson(Utc::now());
        track_db_operation("mark_sync_failed", SUBMISSIONS, async {
            self.submissions()
                .update_one(
                    doc! { "_id": id },
                    doc! {
                        "$set": {
                            "user_service_sync_status": SyncStatus::Failed.as_str(),
                            "user_service_sync_error": error,
                            "user_service_last_sync_attempt": now.clone(),
                            "updated_at": now,
                        },
                        "$inc": { "user_service_sync_attempts": attempts },
                    },
                )
                .await
                .context("Failed to record sync failure")
        })
        .await?;
        Ok(())
    }

    async fn mark_sync_not_required(&self, id: &str) -> Result<()> {
        self.set_fields(
            "mark_sync_not_required",
            id,
            doc! { "user_service_sync_status": SyncStatus::NotRequired.as_str() },
        )
        .await
    }

    async fn list_failed_syncs(&self, limit: i64) -> Result<Vec<Submission>> {
        let filter = doc! {
            "user_service_sync_status": SyncStatus::Failed.as_str(),
            "band_score": { "$ne": Bson::Null },
            "$or": [
                { "evaluation_status": EvaluationStatus::Completed.as_str() },
                { "skill_type": { "$in": ["listening", "reading"] } },
            ],
        };

        track_db_operation("find", SUBMISSIONS, async {
            self.submissions()
                .find(filter)
                .sort(doc! { "user_service_last_sync_attempt": 1 })
                .limit(limit)
                .await
                .context("Failed to query failed syncs")?
                .try_collect()
                .await
                .context("Failed to read failed syncs")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_filter_requires_processing() {
        let filter = status_filter("sub-1", EvaluationStatus::Completed);
        let allowed = filter
            .get_document("evaluation_status")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert_eq!(allowed, &vec![Bson::String("processing".into())]);
    }

    #[test]
    fn pending_filter_matches_unset_status() {
        let filter = status_filter("sub-1", EvaluationStatus::Pending);
        let allowed = filter
            .get_document("evaluation_status")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert_eq!(allowed, &vec![Bson::Null]);
    }
}
