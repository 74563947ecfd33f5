use serde::{Deserialize, Serialize};

use super::conversion_tables::{self, LISTENING, READING_ACADEMIC, READING_GENERAL_TRAINING};
use super::normalize::normalize_to_forty;
use super::rounding::round_to_ielts_band;
use super::{MAX_BAND, MIN_BAND};
use crate::models::SkillType;

/// Reading paper variant. Listening, Writing and Speaking have a single variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IeltsVariant {
    #[default]
    Academic,
    GeneralTraining,
}

impl IeltsVariant {
    /// Lenient parse used for exercise metadata: `general`, `general_training`
    /// and `gt` (any case, spaces or dashes) mean General Training, anything else
    /// falls back to Academic.
    pub fn normalize(raw: &str) -> Self {
        let key = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "general" | "general_training" | "gt" => IeltsVariant::GeneralTraining,
            _ => IeltsVariant::Academic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IeltsVariant::Academic => "academic",
            IeltsVariant::GeneralTraining => "general_training",
        }
    }
}

/// Band for a Listening paper of any length. Returns 0.0 (uncomputable) when
/// `total <= 0` or `correct < 0`.
pub fn convert_listening_score(correct: i32, total: i32) -> f64 {
    if total <= 0 || correct < 0 {
        return 0.0;
    }

    conversion_tables::lookup(LISTENING, normalize_to_forty(correct, total))
}

/// Band for a Reading paper; `variant` is normalized with [`IeltsVariant::normalize`].
pub fn convert_reading_score(correct: i32, total: i32, variant: &str) -> f64 {
    if total <= 0 || correct < 0 {
        return 0.0;
    }

    let normalized = normalize_to_forty(correct, total);
    match IeltsVariant::normalize(variant) {
        IeltsVariant::GeneralTraining => {
            conversion_tables::lookup(READING_GENERAL_TRAINING, normalized)
        }
        IeltsVariant::Academic => conversion_tables::lookup(READING_ACADEMIC, normalized),
    }
}

/// Dispatches on skill. Writing and Speaking have no raw-score table and yield 0.0.
pub fn convert_raw_score(
    skill: SkillType,
    correct: i32,
    total: i32,
    variant: Option<IeltsVariant>,
) -> f64 {
    match skill {
        SkillType::Listening => convert_listening_score(correct, total),
        SkillType::Reading => convert_reading_score(
            correct,
            total,
            variant.unwrap_or_default().as_str(),
        ),
        SkillType::Writing | SkillType::Speaking => 0.0,
    }
}

/// Task Achievement, Coherence & Cohesion, Lexical Resource, Grammatical Range & Accuracy.
pub fn calculate_writing_band(
    task_achievement: f64,
    coherence_cohesion: f64,
    lexical_resource: f64,
    grammatical_accuracy: f64,
) -> f64 {
    average_criteria([
        task_achievement,
        coherence_cohesion,
        lexical_resource,
        grammatical_accuracy,
    ])
}

/// Fluency & Coherence, Lexical Resource, Grammatical Range & Accuracy, Pronunciation.
pub fn calculate_speaking_band(
    fluency_coherence: f64,
    lexical_resource: f64,
    grammatical_accuracy: f64,
    pronunciation: f64,
) -> f64 {
    average_criteria([
        fluency_coherence,
        lexical_resource,
        grammatical_accuracy,
        pronunciation,
    ])
}

/// Mean of the skills actually taken. A zero band means "not taken" and is skipped.
pub fn calculate_overall_band(listening: f64, reading: f64, writing: f64, speaking: f64) -> f64 {
    let taken: Vec<f64> = [listening, reading, writing, speaking]
        .into_iter()
        .filter(|band| *band > 0.0)
        .collect();

    if taken.is_empty() {
        return 0.0;
    }

    round_to_ielts_band(taken.iter().sum::<f64>() / taken.len() as f64)
}

fn average_criteria(criteria: [f64; 4]) -> f64 {
    if !criteria.iter().all(|c| is_in_band_range(*c)) {
        return 0.0;
    }

    round_to_ielts_band(criteria.iter().sum::<f64>() / criteria.len() as f64)
}

fn is_in_band_range(score: f64) -> bool {
    (MIN_BAND..=MAX_BAND).contains(&score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_reference_points() {
        assert_eq!(convert_listening_score(39, 40), 9.0);
        assert_eq!(convert_listening_score(0, 40), 0.0);
        assert_eq!(convert_listening_score(30, 40), 7.0);
        assert_eq!(
            convert_listening_score(15, 20),
            convert_listening_score(30, 40)
        );
    }

    #[test]
    fn invalid_raw_input_is_uncomputable() {
        assert_eq!(convert_listening_score(10, 0), 0.0);
        assert_eq!(convert_listening_score(-1, 40), 0.0);
        assert_eq!(convert_reading_score(10, -4, "academic"), 0.0);
    }

    #[test]
    fn reading_tables_differ_at_the_top() {
        assert_eq!(convert_reading_score(40, 40, "general_training"), 9.0);
        assert_eq!(convert_reading_score(39, 40, "general_training"), 8.5);
        assert_eq!(convert_reading_score(39, 40, "academic"), 9.0);
    }

    #[test]
    fn reading_variant_aliases() {
        for alias in ["general", "general_training", "gt", "GT", "General Training"] {
            assert_eq!(IeltsVariant::normalize(alias), IeltsVariant::GeneralTraining);
        }
        for other in ["", "academic", "ac", "unknown"] {
            assert_eq!(IeltsVariant::normalize(other), IeltsVariant::Academic);
        }
        assert_eq!(convert_reading_score(30, 40, "gt"), 6.0);
        assert_eq!(convert_reading_score(30, 40, "whatever"), 7.0);
    }

    #[test]
    fn raw_conversion_dispatches_on_skill() {
        assert_eq!(convert_raw_score(SkillType::Listening, 35, 40, None), 8.0);
        assert_eq!(
            convert_raw_score(
                SkillType::Reading,
                34,
                40,
                Some(IeltsVariant::GeneralTraining)
            ),
            7.0
        );
        assert_eq!(convert_raw_score(SkillType::Reading, 34, 40, None), 7.5);
        assert_eq!(convert_raw_score(SkillType::Writing, 34, 40, None), 0.0);
        assert_eq!(convert_raw_score(SkillType::Speaking, 34, 40, None), 0.0);
    }

    #[test]
    fn writing_band_averages_and_rounds() {
        assert_eq!(calculate_writing_band(6.0, 6.0, 6.0, 6.0), 6.0);
        assert_eq!(calculate_writing_band(6.0, 6.0, 6.0, 7.0), 6.5);
        assert_eq!(calculate_writing_band(6.5, 6.5, 6.5, 6.0), 6.5);
        assert_eq!(calculate_writing_band(7.0, 7.0, 7.0, 6.0), 7.0);
    }

    #[test]
    fn criteria_out_of_range_are_uncomputable() {
        assert_eq!(calculate_writing_band(6.0, 6.0, 6.0, 9.5), 0.0);
        assert_eq!(calculate_speaking_band(-0.5, 6.0, 6.0, 6.0), 0.0);
        assert_eq!(calculate_speaking_band(f64::NAN, 6.0, 6.0, 6.0), 0.0);
    }

    #[test]
    fn speaking_band_averages_and_rounds() {
        assert_eq!(calculate_speaking_band(5.0, 6.0, 5.5, 6.0), 5.5);
        assert_eq!(calculate_speaking_band(9.0, 9.0, 9.0, 9.0), 9.0);
    }

    #[test]
    fn overall_band_skips_skills_not_taken() {
        assert_eq!(calculate_overall_band(0.0, 7.0, 7.0, 7.0), 7.0);
        assert_eq!(calculate_overall_band(6.0, 6.5, 0.0, 0.0), 6.5);
        assert_eq!(calculate_overall_band(0.0, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(calculate_overall_band(6.5, 6.5, 5.0, 7.0), 6.5);
    }
}
