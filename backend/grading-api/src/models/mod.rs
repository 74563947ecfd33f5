pub mod evaluation;
pub mod exercise;
pub mod submission;
pub mod sync;

pub use evaluation::{AiEvaluationResult, SpeakingEvaluation, Transcription, WritingEvaluation};
pub use exercise::{Exercise, ExerciseType, SkillType};
pub use submission::{
    count_words, grade_answers, AnswerKey, AttemptStatus, EvaluationStatus, SpeakingAttempt,
    SpeakingSubmissionData, SubmitExerciseRequest, SubmitExerciseResponse, Submission,
    SubmissionResult, SubmittedAnswer, SyncStatus, UserServiceSync, WritingAttempt,
    WritingSubmissionData,
};
pub use sync::{OfficialTestResult, PracticeActivity, SyncPayload, SyncPayloadError};
