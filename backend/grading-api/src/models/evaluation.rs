use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ielts::validation::{
    validate_speaking_criteria, validate_writing_criteria, BandValidationError,
};
use crate::ielts::{calculate_speaking_band, calculate_writing_band};

/// Writing assessment as returned by the AI service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingEvaluation {
    pub task_achievement: f64,
    pub coherence_cohesion: f64,
    pub lexical_resource: f64,
    pub grammar_accuracy: f64,
    #[serde(default)]
    pub overall_band: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl WritingEvaluation {
    pub fn validate(&self) -> Result<(), BandValidationError> {
        validate_writing_criteria(
            self.task_achievement,
            self.coherence_cohesion,
            self.lexical_resource,
            self.grammar_accuracy,
        )
    }

    /// Band derived from the four criteria. The `overall_band` reported by the
    /// AI service is informational only.
    pub fn band(&self) -> f64 {
        calculate_writing_band(
            self.task_achievement,
            self.coherence_cohesion,
            self.lexical_resource,
            self.grammar_accuracy,
        )
    }
}

/// Speaking assessment as returned by the AI service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingEvaluation {
    #[serde(alias = "fluency")]
    pub fluency_coherence: f64,
    pub lexical_resource: f64,
    #[serde(alias = "grammar")]
    pub grammatical_range: f64,
    pub pronunciation: f64,
    #[serde(default)]
    pub overall_band: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl SpeakingEvaluation {
    pub fn validate(&self) -> Result<(), BandValidationError> {
        validate_speaking_criteria(
            self.fluency_coherence,
            self.lexical_resource,
            self.grammatical_range,
            self.pronunciation,
        )
    }

    pub fn band(&self) -> f64 {
        calculate_speaking_band(
            self.fluency_coherence,
            self.lexical_resource,
            self.grammatical_range,
            self.pronunciation,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(alias = "transcript_text")]
    pub text: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
}

/// What gets persisted on the submission once an AI evaluation completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiEvaluationResult {
    pub overall_band_score: f64,
    pub criteria_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl AiEvaluationResult {
    pub fn from_writing(eval: &WritingEvaluation, overall_band_score: f64) -> Self {
        let criteria_scores = BTreeMap::from([
            ("task_achievement".to_string(), eval.task_achievement),
            ("coherence_cohesion".to_string(), eval.coherence_cohesion),
            ("lexical_resource".to_string(), eval.lexical_resource),
            ("grammar_accuracy".to_string(), eval.grammar_accuracy),
        ]);
        Self {
            overall_band_score,
            criteria_scores,
            feedback: eval.feedback.clone(),
            strengths: eval.strengths.clone(),
            weaknesses: eval.weaknesses.clone(),
            suggestions: eval.suggestions.clone(),
        }
    }

    pub fn from_speaking(eval: &SpeakingEvaluation, overall_band_score: f64) -> Self {
        let criteria_scores = BTreeMap::from([
            ("fluency_coherence".to_string(), eval.fluency_coherence),
            ("lexical_resource".to_string(), eval.lexical_resource),
            ("grammatical_range".to_string(), eval.grammatical_range),
            ("pronunciation".to_string(), eval.pronunciation),
        ]);
        Self {
            overall_band_score,
            criteria_scores,
            feedback: eval.feedback.clone(),
            strengths: eval.strengths.clone(),
            weaknesses: eval.weaknesses.clone(),
            suggestions: eval.suggestions.clone(),
        }
    }
}
