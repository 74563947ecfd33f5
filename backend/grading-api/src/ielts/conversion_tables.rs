//! Published raw-score to band tables, defined on a 40-question paper.
//! Each row is `(minimum correct answers, band)`, ordered from the top band down.

type BandTable = &'static [(i32, f64)];

/// Listening uses one table for Academic and General Training.
pub const LISTENING: BandTable = &[
    (39, 9.0),
    (37, 8.5),
    (35, 8.0),
    (32, 7.5),
    (30, 7.0),
    (26, 6.5),
    (23, 6.0),
    (18, 5.5),
    (16, 5.0),
    (13, 4.5),
    (10, 4.0),
    (8, 3.5),
    (6, 3.0),
    (4, 2.5),
    (2, 2.0),
    (1, 1.0),
];

pub const READING_ACADEMIC: BandTable = &[
    (39, 9.0),
    (37, 8.5),
    (35, 8.0),
    (33, 7.5),
    (30, 7.0),
    (27, 6.5),
    (23, 6.0),
    (19, 5.5),
    (15, 5.0),
    (13, 4.5),
    (10, 4.0),
    (8, 3.5),
    (6, 3.0),
    (4, 2.5),
    (2, 2.0),
    (1, 1.0),
];

pub const READING_GENERAL_TRAINING: BandTable = &[
    (40, 9.0),
    (39, 8.5),
    (37, 8.0),
    (36, 7.5),
    (34, 7.0),
    (32, 6.5),
    (30, 6.0),
    (27, 5.5),
    (23, 5.0),
    (19, 4.5),
    (15, 4.0),
    (12, 3.5),
    (9, 3.0),
    (6, 2.5),
    (4, 2.0),
    (2, 1.0),
];

/// First row whose threshold the score reaches; below every row is band 0.
pub fn lookup(table: BandTable, normalized_correct: i32) -> f64 {
    table
        .iter()
        .find(|(min_correct, _)| normalized_correct >= *min_correct)
        .map(|(_, band)| *band)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_descending(table: BandTable) {
        for pair in table.windows(2) {
            assert!(pair[0].0 > pair[1].0);
            assert!(pair[0].1 > pair[1].1);
        }
    }

    #[test]
    fn tables_are_strictly_descending() {
        assert_descending(LISTENING);
        assert_descending(READING_ACADEMIC);
        assert_descending(READING_GENERAL_TRAINING);
    }

    #[test]
    fn lookup_hits_thresholds() {
        assert_eq!(lookup(LISTENING, 40), 9.0);
        assert_eq!(lookup(LISTENING, 31), 7.0);
        assert_eq!(lookup(LISTENING, 1), 1.0);
        assert_eq!(lookup(LISTENING, 0), 0.0);
        assert_eq!(lookup(READING_ACADEMIC, 33), 7.5);
        assert_eq!(lookup(READING_GENERAL_TRAINING, 33), 6.5);
        assert_eq!(lookup(READING_GENERAL_TRAINING, 1), 0.0);
    }
}
