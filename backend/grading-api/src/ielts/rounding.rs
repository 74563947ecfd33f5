use super::{MAX_BAND, MIN_BAND};

/// Rounds a score to the nearest half band.
///
/// Doubling, rounding half away from zero and halving gives the published
/// behaviour: 6.125 -> 6.0, 6.25 -> 6.5, 6.75 -> 7.0.
pub fn round_to_ielts_band(score: f64) -> f64 {
    if score.is_nan() || score < MIN_BAND {
        return MIN_BAND;
    }
    if score > MAX_BAND {
        return MAX_BAND;
    }

    ((score * 2.0).round() / 2.0).clamp(MIN_BAND, MAX_BAND)
}

/// Alias kept for call sites that talk about "half bands".
pub fn round_to_half_band(score: f64) -> f64 {
    round_to_ielts_band(score)
}

/// Rounds to a whole band. Used by reporting views that hide half bands.
pub fn round_to_whole_band(score: f64) -> f64 {
    if score.is_nan() || score < MIN_BAND {
        return MIN_BAND;
    }
    if score > MAX_BAND {
        return MAX_BAND;
    }

    score.round().clamp(MIN_BAND, MAX_BAND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_boundaries() {
        assert_eq!(round_to_ielts_band(6.125), 6.0);
        assert_eq!(round_to_ielts_band(6.25), 6.5);
        assert_eq!(round_to_ielts_band(6.375), 6.5);
        assert_eq!(round_to_ielts_band(6.625), 6.5);
        assert_eq!(round_to_ielts_band(6.75), 7.0);
        assert_eq!(round_to_ielts_band(6.875), 7.0);
    }

    #[test]
    fn clamps_out_of_range_scores() {
        assert_eq!(round_to_ielts_band(-1.0), 0.0);
        assert_eq!(round_to_ielts_band(9.8), 9.0);
        assert_eq!(round_to_ielts_band(f64::NAN), 0.0);
        assert_eq!(round_to_whole_band(12.0), 9.0);
        assert_eq!(round_to_whole_band(-0.2), 0.0);
    }

    #[test]
    fn output_is_a_half_band_and_idempotent() {
        let mut x = -1.0;
        while x <= 10.0 {
            let rounded = round_to_ielts_band(x);
            assert_eq!((rounded * 2.0).fract(), 0.0, "{} -> {}", x, rounded);
            assert!((0.0..=9.0).contains(&rounded));
            assert_eq!(round_to_ielts_band(rounded), rounded);
            x += 0.01;
        }
    }

    #[test]
    fn whole_band_rounding() {
        assert_eq!(round_to_whole_band(6.49), 6.0);
        assert_eq!(round_to_whole_band(6.5), 7.0);
        assert_eq!(round_to_half_band(7.3), 7.5);
    }
}
