use thiserror::Error;

use super::{MAX_BAND, MIN_BAND};

#[derive(Debug, Error, PartialEq)]
pub enum BandValidationError {
    #[error("band score must be between 0.0 and 9.0, got {0:.1}")]
    OutOfRange(f64),
    #[error("band score must be in 0.5 increments, got {0:.2}")]
    NotHalfBand(f64),
    #[error("total questions must be positive, got {0}")]
    NonPositiveTotal(i32),
    #[error("correct answers cannot be negative, got {0}")]
    NegativeCorrect(i32),
    #[error("correct answers ({correct}) cannot exceed total questions ({total})")]
    CorrectExceedsTotal { correct: i32, total: i32 },
    #[error("{criterion}: {source}")]
    Criterion {
        criterion: &'static str,
        #[source]
        source: Box<BandValidationError>,
    },
}

pub fn validate_band_score(score: f64) -> Result<(), BandValidationError> {
    if !(MIN_BAND..=MAX_BAND).contains(&score) {
        return Err(BandValidationError::OutOfRange(score));
    }
    if (score * 2.0).fract() != 0.0 {
        return Err(BandValidationError::NotHalfBand(score));
    }
    Ok(())
}

/// Criterion scores from an assessor may sit between half bands; only the
/// range is enforced. The averaged band is rounded afterwards.
pub fn validate_criterion_score(score: f64) -> Result<(), BandValidationError> {
    if !(MIN_BAND..=MAX_BAND).contains(&score) {
        return Err(BandValidationError::OutOfRange(score));
    }
    Ok(())
}

pub fn is_valid_band_score(score: f64) -> bool {
    validate_band_score(score).is_ok()
}

pub fn validate_raw_score(correct: i32, total: i32) -> Result<(), BandValidationError> {
    if total <= 0 {
        return Err(BandValidationError::NonPositiveTotal(total));
    }
    if correct < 0 {
        return Err(BandValidationError::NegativeCorrect(correct));
    }
    if correct > total {
        return Err(BandValidationError::CorrectExceedsTotal { correct, total });
    }
    Ok(())
}

pub fn validate_writing_criteria(
    task_achievement: f64,
    coherence_cohesion: f64,
    lexical_resource: f64,
    grammatical_accuracy: f64,
) -> Result<(), BandValidationError> {
    validate_named(
        &[
            ("task achievement", task_achievement),
            ("coherence and cohesion", coherence_cohesion),
            ("lexical resource", lexical_resource),
            ("grammatical range and accuracy", grammatical_accuracy),
        ],
        validate_criterion_score,
    )
}

pub fn validate_speaking_criteria(
    fluency_coherence: f64,
    lexical_resource: f64,
    grammatical_accuracy: f64,
    pronunciation: f64,
) -> Result<(), BandValidationError> {
    validate_named(
        &[
            ("fluency and coherence", fluency_coherence),
            ("lexical resource", lexical_resource),
            ("grammatical range and accuracy", grammatical_accuracy),
            ("pronunciation", pronunciation),
        ],
        validate_criterion_score,
    )
}

/// Only skills with a non-zero band are checked; zero means "not taken".
pub fn validate_overall_scores(
    listening: f64,
    reading: f64,
    writing: f64,
    speaking: f64,
) -> Result<(), BandValidationError> {
    let taken: Vec<(&'static str, f64)> = [
        ("listening", listening),
        ("reading", reading),
        ("writing", writing),
        ("speaking", speaking),
    ]
    .into_iter()
    .filter(|(_, score)| *score > 0.0)
    .collect();

    validate_named(&taken, validate_band_score)
}

fn validate_named(
    scores: &[(&'static str, f64)],
    check: fn(f64) -> Result<(), BandValidationError>,
) -> Result<(), BandValidationError> {
    for (criterion, score) in scores {
        check(*score).map_err(|source| BandValidationError::Criterion {
            criterion: *criterion,
            source: Box::new(source),
        })?;
    }
    Ok(())
}
