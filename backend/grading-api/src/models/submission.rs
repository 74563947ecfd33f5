use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use super::evaluation::AiEvaluationResult;
use super::exercise::SkillType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Pending => "pending",
            EvaluationStatus::Processing => "processing",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
        }
    }

    /// States a submission may be in right before moving to `self`.
    /// `None` is a submission that was never queued for evaluation.
    pub fn predecessors(&self) -> &'static [Option<EvaluationStatus>] {
        match self {
            EvaluationStatus::Pending => &[None],
            EvaluationStatus::Processing => &[None, Some(EvaluationStatus::Pending)],
            EvaluationStatus::Completed => &[Some(EvaluationStatus::Processing)],
            EvaluationStatus::Failed => &[
                Some(EvaluationStatus::Pending),
                Some(EvaluationStatus::Processing),
            ],
        }
    }

    pub fn can_transition(from: Option<EvaluationStatus>, to: EvaluationStatus) -> bool {
        to.predecessors().contains(&from)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Failed,
    NotRequired,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::NotRequired => "not_required",
        }
    }
}

/// Bookkeeping for propagation to the user service. `last_error` is only set
/// while `status` is `Failed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserServiceSync {
    #[serde(rename = "user_service_sync_status", default)]
    pub status: SyncStatus,
    #[serde(rename = "user_service_sync_attempts", default)]
    pub attempts: i32,
    #[serde(rename = "user_service_last_sync_attempt", default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(rename = "user_service_sync_error", default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingAttempt {
    pub essay_text: String,
    pub word_count: i32,
    pub task_type: String,
    pub prompt_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingAttempt {
    pub audio_url: String,
    pub audio_duration_seconds: i32,
    pub part_number: i32,
    #[serde(default)]
    pub transcript_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: String,
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub selected_option_id: Option<String>,
}

/// One student's attempt at one exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub exercise_id: String,
    pub skill_type: SkillType,
    pub status: AttemptStatus,
    #[serde(default)]
    pub total_questions: i32,
    #[serde(default)]
    pub questions_answered: i32,
    #[serde(default)]
    pub correct_answers: i32,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub band_score: Option<f64>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_spent_seconds: i64,
    #[serde(default)]
    pub answers: Vec<SubmittedAnswer>,
    #[serde(default)]
    pub writing: Option<WritingAttempt>,
    #[serde(default)]
    pub speaking: Option<SpeakingAttempt>,
    #[serde(default)]
    pub evaluation_status: Option<EvaluationStatus>,
    #[serde(default)]
    pub ai_evaluation: Option<AiEvaluationResult>,
    #[serde(flatten)]
    pub user_service_sync: UserServiceSync,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        exercise_id: impl Into<String>,
        skill_type: SkillType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            exercise_id: exercise_id.into(),
            skill_type,
            status: AttemptStatus::InProgress,
            total_questions: 0,
            questions_answered: 0,
            correct_answers: 0,
            score: None,
            band_score: None,
            started_at: now,
            completed_at: None,
            time_spent_seconds: 0,
            answers: Vec::new(),
            writing: None,
            speaking: None,
            evaluation_status: None,
            ai_evaluation: None,
            user_service_sync: UserServiceSync::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Seconds between start and completion, or the client-reported value if
    /// the attempt has not been completed.
    pub fn elapsed_seconds(&self) -> i64 {
        self.completed_at
            .map(|completed| (completed - self.started_at).num_seconds().max(0))
            .unwrap_or(self.time_spent_seconds)
    }
}

/// Outcome of answer-key grading for Listening/Reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub correct_answers: i32,
    pub total_questions: i32,
    pub questions_answered: i32,
}

/// Stored correct answer of one Listening/Reading question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerKey {
    pub exercise_id: String,
    pub question_id: String,
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub alternative_answers: Vec<String>,
    #[serde(default)]
    pub correct_option_id: Option<String>,
    #[serde(default)]
    pub is_case_sensitive: bool,
}

impl AnswerKey {
    pub fn accepts(&self, answer: &SubmittedAnswer) -> bool {
        if let (Some(expected), Some(selected)) = (&self.correct_option_id, &answer.selected_option_id)
        {
            return expected == selected;
        }

        let Some(given) = answer.answer_text.as_deref().map(normalize_whitespace) else {
            return false;
        };
        if given.is_empty() {
            return false;
        }

        self.answer_text
            .iter()
            .chain(self.alternative_answers.iter())
            .map(|candidate| normalize_whitespace(candidate))
            .any(|candidate| {
                if self.is_case_sensitive {
                    candidate == given
                } else {
                    candidate.to_lowercase() == given.to_lowercase()
                }
            })
    }
}

/// Grades submitted answers against the exercise's answer key. Unanswered
/// questions count toward the total but not toward the answered count.
pub fn grade_answers(keys: &[AnswerKey], answers: &[SubmittedAnswer]) -> SubmissionResult {
    let by_question: HashMap<&str, &SubmittedAnswer> = answers
        .iter()
        .map(|answer| (answer.question_id.as_str(), answer))
        .collect();

    let mut correct_answers = 0;
    let mut questions_answered = 0;
    for key in keys {
        if let Some(answer) = by_question.get(key.question_id.as_str()) {
            questions_answered += 1;
            if key.accepts(answer) {
                correct_answers += 1;
            }
        }
    }

    SubmissionResult {
        correct_answers,
        total_questions: keys.len() as i32,
        questions_answered,
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn count_words(text: &str) -> i32 {
    text.split_whitespace().count() as i32
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WritingSubmissionData {
    pub essay_text: String,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub word_count: i32,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub prompt_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SpeakingSubmissionData {
    pub audio_url: String,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub audio_duration_seconds: i32,
    #[serde(default)]
    #[validate(range(min = 1, max = 3))]
    pub speaking_part_number: Option<i32>,
}

/// Unified submit body: answers for Listening/Reading, `writing_data` or
/// `speaking_data` for the AI-graded skills.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SubmitExerciseRequest {
    #[serde(default)]
    pub answers: Vec<SubmittedAnswer>,
    #[serde(default)]
    #[validate(nested)]
    pub writing_data: Option<WritingSubmissionData>,
    #[serde(default)]
    #[validate(nested)]
    pub speaking_data: Option<SpeakingSubmissionData>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub time_spent_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExerciseResponse {
    pub submission_id: String,
    pub skill_type: SkillType,
    pub evaluation_status: Option<EvaluationStatus>,
    pub band_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(question_id: &str, answer: &str) -> AnswerKey {
        AnswerKey {
            exercise_id: "ex".into(),
            question_id: question_id.into(),
            answer_text: Some(answer.into()),
            alternative_answers: Vec::new(),
            correct_option_id: None,
            is_case_sensitive: false,
        }
    }

    fn text_answer(question_id: &str, text: &str) -> SubmittedAnswer {
        SubmittedAnswer {
            question_id: question_id.into(),
            answer_text: Some(text.into()),
            selected_option_id: None,
        }
    }

    #[test]
    fn evaluation_status_only_moves_forward() {
        use EvaluationStatus::{Completed, Failed, Pending, Processing};

        assert!(EvaluationStatus::can_transition(None, Pending));
        assert!(EvaluationStatus::can_transition(Some(Pending), Processing));
        assert!(EvaluationStatus::can_transition(Some(Processing), Completed));
        assert!(EvaluationStatus::can_transition(Some(Processing), Failed));
        assert!(EvaluationStatus::can_transition(Some(Pending), Failed));

        assert!(!EvaluationStatus::can_transition(Some(Processing), Pending));
        assert!(!EvaluationStatus::can_transition(Some(Completed), Pending));
        assert!(!EvaluationStatus::can_transition(Some(Failed), Processing));
        assert!(!EvaluationStatus::can_transition(Some(Completed), Failed));
        assert!(!EvaluationStatus::can_transition(Some(Pending), Completed));
    }

    #[test]
    fn answer_key_matching() {
        let mut k = key("q1", "  New   York ");
        k.alternative_answers.push("NYC".into());
        assert!(k.accepts(&text_answer("q1", "new york")));
        assert!(k.accepts(&text_answer("q1", "nyc")));
        assert!(!k.accepts(&text_answer("q1", "")));
        assert!(!k.accepts(&text_answer("q1", "Boston")));

        k.is_case_sensitive = true;
        assert!(!k.accepts(&text_answer("q1", "new york")));
        assert!(k.accepts(&text_answer("q1", "New York")));
    }

    #[test]
    fn option_answers_compare_ids() {
        let k = AnswerKey {
            correct_option_id: Some("opt-b".into()),
            ..key("q2", "")
        };
        let picked = |id: &str| SubmittedAnswer {
            question_id: "q2".into(),
            answer_text: None,
            selected_option_id: Some(id.into()),
        };
        assert!(k.accepts(&picked("opt-b")));
        assert!(!k.accepts(&picked("opt-a")));
    }

    #[test]
    fn grading_counts_correct_answered_and_total() {
        let keys = vec![key("q1", "true"), key("q2", "false"), key("q3", "not given")];
        let answers = vec![
            text_answer("q1", "TRUE"),
            text_answer("q2", "true"),
            text_answer("q9", "whatever"),
        ];

        let result = grade_answers(&keys, &answers);
        assert_eq!(
            result,
            SubmissionResult {
                correct_answers: 1,
                total_questions: 3,
                questions_answered: 2,
            }
        );
    }

    #[test]
    fn word_count_splits_on_whitespace() {
        assert_eq!(count_words("Cities are   growing\nfast."), 4);
        assert_eq!(count_words("   "), 0);
    }

    #[test]
    fn speaking_part_number_is_validated() {
        let req = SubmitExerciseRequest {
            speaking_data: Some(SpeakingSubmissionData {
                audio_url: "https://cdn.example.com/a.mp3".into(),
                audio_duration_seconds: 90,
                speaking_part_number: Some(4),
            }),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
