use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::exercise::{Exercise, SkillType};
use super::submission::Submission;
use crate::ielts::IeltsVariant;

pub const SOURCE_SERVICE: &str = "exercise_service";
pub const SOURCE_TABLE: &str = "user_exercise_attempts";
pub const TEST_SOURCE: &str = "platform";
const FEEDBACK_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Error, PartialEq)]
pub enum SyncPayloadError {
    #[error("reading results must carry an IELTS variant")]
    MissingVariant,
    #[error("{0} results must not carry an IELTS variant")]
    UnexpectedVariant(SkillType),
    #[error("{0} results have no raw score table")]
    UnexpectedRawScore(SkillType),
    #[error("{0} results require raw score and total questions")]
    MissingRawScore(SkillType),
}

/// One official per-skill result, reported to the user service.
///
/// Listening and Reading carry raw counts with `band_score` left at 0.0: the
/// user service owns the raw-to-band conversion for those skills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficialTestResult {
    pub test_type: String,
    pub skill_type: SkillType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ielts_variant: Option<IeltsVariant>,
    pub band_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<i32>,
    pub source_service: String,
    pub source_table: String,
    pub source_id: String,
    pub test_date: DateTime<Utc>,
    pub test_source: String,
}

impl OfficialTestResult {
    pub fn from_submission(submission: &Submission, exercise: &Exercise, band_score: f64) -> Self {
        let skill_type = exercise.skill_type;
        let (band_score, raw_score, total_questions) = if skill_type.has_raw_score_table() {
            (
                0.0,
                Some(submission.correct_answers),
                Some(submission.total_questions),
            )
        } else {
            (band_score, None, None)
        };

        Self {
            test_type: exercise.exercise_type.as_str().to_string(),
            skill_type,
            ielts_variant: match skill_type {
                SkillType::Reading => Some(exercise.reading_variant().unwrap_or_default()),
                _ => None,
            },
            band_score,
            raw_score,
            total_questions,
            source_service: SOURCE_SERVICE.to_string(),
            source_table: SOURCE_TABLE.to_string(),
            source_id: submission.id.clone(),
            test_date: submission.completed_at.unwrap_or_else(Utc::now),
            test_source: TEST_SOURCE.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncPayloadError> {
        match (self.skill_type, self.ielts_variant) {
            (SkillType::Reading, None) => return Err(SyncPayloadError::MissingVariant),
            (SkillType::Reading, Some(_)) | (_, None) => {}
            (skill, Some(_)) => return Err(SyncPayloadError::UnexpectedVariant(skill)),
        }

        let has_raw = self.raw_score.is_some() || self.total_questions.is_some();
        if self.skill_type.has_raw_score_table() {
            if self.raw_score.is_none() || self.total_questions.is_none() {
                return Err(SyncPayloadError::MissingRawScore(self.skill_type));
            }
        } else if has_raw {
            return Err(SyncPayloadError::UnexpectedRawScore(self.skill_type));
        }
        Ok(())
    }
}

/// Training-history entry for non-official exercises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeActivity {
    pub skill: SkillType,
    pub activity_type: String,
    pub exercise_id: String,
    pub exercise_title: String,
    pub band_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub correct_answers: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<i32>,
    pub time_spent_seconds: i64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_status: String,
    pub ai_evaluated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_feedback_summary: Option<String>,
}

impl PracticeActivity {
    pub fn from_submission(submission: &Submission, exercise: &Exercise, band_score: f64) -> Self {
        let raw = exercise.skill_type.has_raw_score_table();
        let ai_feedback_summary = submission
            .ai_evaluation
            .as_ref()
            .map(|eval| eval.feedback.trim())
            .filter(|feedback| !feedback.is_empty())
            .map(|feedback| feedback.chars().take(FEEDBACK_SUMMARY_CHARS).collect());

        Self {
            skill: exercise.skill_type,
            activity_type: "drill".to_string(),
            exercise_id: exercise.id.clone(),
            exercise_title: exercise.title.clone(),
            band_score,
            score: submission.score,
            correct_answers: if raw { submission.correct_answers } else { 0 },
            total_questions: raw.then_some(submission.total_questions),
            time_spent_seconds: submission.elapsed_seconds(),
            started_at: submission.started_at,
            completed_at: submission.completed_at,
            completion_status: "completed".to_string(),
            ai_evaluated: exercise.requires_ai_evaluation(),
            ai_feedback_summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    Official(OfficialTestResult),
    Practice(PracticeActivity),
}

impl SyncPayload {
    pub fn build(submission: &Submission, exercise: &Exercise, band_score: f64) -> Self {
        if exercise.is_official_test() {
            SyncPayload::Official(OfficialTestResult::from_submission(
                submission, exercise, band_score,
            ))
        } else {
            SyncPayload::Practice(PracticeActivity::from_submission(
                submission, exercise, band_score,
            ))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncPayload::Official(_) => "official_test_result",
            SyncPayload::Practice(_) => "practice_activity",
        }
    }
}
