use super::STANDARD_QUESTION_COUNT;

/// Scales a raw score from an arbitrary-length paper onto the 40-question basis
/// the official tables are defined on.
///
/// The scaled value is truncated toward zero, never rounded: the band
/// boundaries of shorter practice papers depend on it.
pub fn normalize_to_forty(correct: i32, total: i32) -> i32 {
    if total == STANDARD_QUESTION_COUNT {
        return correct;
    }
    if total <= 0 {
        return 0;
    }

    let scaled = (correct as f64 / total as f64 * STANDARD_QUESTION_COUNT as f64) as i32;
    scaled.clamp(0, STANDARD_QUESTION_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_length_paper_is_identity() {
        for correct in 0..=40 {
            assert_eq!(normalize_to_forty(correct, 40), correct);
        }
    }

    #[test]
    fn shorter_paper_scales_proportionally() {
        assert_eq!(normalize_to_forty(15, 20), 30);
        assert_eq!(normalize_to_forty(10, 10), 40);
        assert_eq!(normalize_to_forty(0, 13), 0);
    }

    #[test]
    fn scaling_truncates_instead_of_rounding() {
        // 7 / 13 * 40 = 21.54
        assert_eq!(normalize_to_forty(7, 13), 21);
        // 2 / 3 * 40 = 26.67
        assert_eq!(normalize_to_forty(2, 3), 26);
    }

    #[test]
    fn result_is_clamped() {
        assert_eq!(normalize_to_forty(30, 20), 40);
        assert_eq!(normalize_to_forty(-5, 20), 0);
        assert_eq!(normalize_to_forty(5, 0), 0);
        assert_eq!(normalize_to_forty(5, -3), 0);
    }

    #[test]
    fn monotonic_in_correct_answers() {
        for total in 1..=60 {
            let mut previous = normalize_to_forty(0, total);
            for correct in 1..=total {
                let current = normalize_to_forty(correct, total);
                assert!(current >= previous, "{}/{} went down", correct, total);
                assert!((0..=40).contains(&current));
                previous = current;
            }
        }
    }
}
