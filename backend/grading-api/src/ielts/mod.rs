//! IELTS band score arithmetic: raw-score conversion, criteria averaging and
//! half-band rounding. Everything in here is pure and safe to call from any task.

pub mod band_score;
pub mod conversion_tables;
pub mod normalize;
pub mod rounding;
pub mod validation;

pub use band_score::{
    calculate_overall_band, calculate_speaking_band, calculate_writing_band, convert_listening_score,
    convert_raw_score, convert_reading_score, IeltsVariant,
};
pub use normalize::normalize_to_forty;
pub use rounding::{round_to_half_band, round_to_ielts_band, round_to_whole_band};

/// Lowest and highest band the scale allows.
pub const MIN_BAND: f64 = 0.0;
pub const MAX_BAND: f64 = 9.0;

/// Canonical question count of a Listening or Reading paper.
pub const STANDARD_QUESTION_COUNT: i32 = 40;
