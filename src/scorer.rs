//! Character Error Rate (CER) scoring.
//!
//! The prediction is aligned against the ground truth with unit-cost
//! Levenshtein distance. The alignment is then walked back to split the
//! total edit count into substitutions, deletions and insertions:
//!
//! - substitution: a ground-truth character was read as a different one
//! - deletion: a ground-truth character was not produced at all
//! - insertion: the prediction contains an extra character
//!
//! `CER = (S + D + I) / N` where `N` is the ground-truth length in characters.
//! The ground truth is always the denominator, so the metric is asymmetric
//! and has no upper bound.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScoreError {
    #[error("ground truth is empty, CER is undefined")]
    InvalidGroundTruth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EditOp {
    Match(char),
    Substitution { expected: char, predicted: char },
    Deletion(char),
    Insertion(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreResult {
    pub substitutions: usize,
    pub deletions: usize,
    pub insertions: usize,
    pub ground_truth_length: usize,
    pub cer: f64,
}

impl ScoreResult {
    pub fn total_errors(&self) -> usize {
        self.substitutions + self.deletions + self.insertions
    }

    pub fn is_exact_match(&self) -> bool {
        self.total_errors() == 0
    }
}

/// Dynamic-programming table over `(|prediction| + 1) x (|ground_truth| + 1)`
/// cells, stored row-major in a single buffer.
struct DistanceTable {
    cells: Vec<usize>,
    columns: usize,
}

impl DistanceTable {
    fn build(prediction: &[char], ground_truth: &[char]) -> Self {
        let rows = prediction.len() + 1;
        let columns = ground_truth.len() + 1;
        let mut table = Self {
            cells: vec![0; rows * columns],
            columns,
        };

        for j in 0..columns {
            table.set(0, j, j);
        }
        for i in 0..rows {
            table.set(i, 0, i);
        }

        for i in 1..rows {
            for j in 1..columns {
                let value = if prediction[i - 1] == ground_truth[j - 1] {
                    table.get(i - 1, j - 1)
                } else {
                    1 + table
                        .get(i - 1, j)
                        .min(table.get(i, j - 1))
                        .min(table.get(i - 1, j - 1))
                };
                table.set(i, j, value);
            }
        }
        table
    }

    #[inline]
    fn get(&self, i: usize, j: usize) -> usize {
        self.cells[i * self.columns + j]
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, value: usize) {
        self.cells[i * self.columns + j] = value;
    }
}

/// Minimal edit script turning a prediction into the ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alignment {
    pub distance: usize,
    pub operations: Vec<EditOp>,
}

impl Alignment {
    pub fn new(prediction: &str, ground_truth: &str) -> Self {
        let prediction: Vec<char> = prediction.chars().collect();
        let ground_truth: Vec<char> = ground_truth.chars().collect();
        let table = DistanceTable::build(&prediction, &ground_truth);

        let mut operations = Vec::with_capacity(prediction.len().max(ground_truth.len()));
        let (mut i, mut j) = (prediction.len(), ground_truth.len());

        // Walk back from the bottom-right corner. On ties the order is
        // substitution, deletion, insertion.
        while i > 0 || j > 0 {
            let current = table.get(i, j);
            if i > 0 && j > 0 && prediction[i - 1] == ground_truth[j - 1] {
                operations.push(EditOp::Match(ground_truth[j - 1]));
                i -= 1;
                j -= 1;
            } else if i > 0 && j > 0 && table.get(i - 1, j - 1) + 1 == current {
                operations.push(EditOp::Substitution {
                    expected: ground_truth[j - 1],
                    predicted: prediction[i - 1],
                });
                i -= 1;
                j -= 1;
            } else if j > 0 && table.get(i, j - 1) + 1 == current {
                operations.push(EditOp::Deletion(ground_truth[j - 1]));
                j -= 1;
            } else {
                operations.push(EditOp::Insertion(prediction[i - 1]));
                i -= 1;
            }
        }
        operations.reverse();

        Self {
            distance: table.get(prediction.len(), ground_truth.len()),
            operations,
        }
    }

    pub fn substitutions(&self) -> usize {
        self.count(|op| matches!(op, EditOp::Substitution { .. }))
    }

    pub fn deletions(&self) -> usize {
        self.count(|op| matches!(op, EditOp::Deletion(_)))
    }

    pub fn insertions(&self) -> usize {
        self.count(|op| matches!(op, EditOp::Insertion(_)))
    }

    fn count(&self, predicate: impl Fn(&EditOp) -> bool) -> usize {
        self.operations.iter().filter(|op| predicate(op)).count()
    }
}

/// Scores a prediction against the ground truth.
///
/// An absent prediction is scored as the empty string, which makes every
/// ground-truth character a deletion and yields a CER of exactly 1.0.
pub fn score(prediction: Option<&str>, ground_truth: &str) -> Result<ScoreResult, ScoreError> {
    score_with_alignment(prediction, ground_truth).map(|(result, _)| result)
}

/// Like [`score`], but also hands back the edit script the counts came from.
pub fn score_with_alignment(
    prediction: Option<&str>,
    ground_truth: &str,
) -> Result<(ScoreResult, Alignment), ScoreError> {
    let ground_truth_length = ground_truth.chars().count();
    if ground_truth_length == 0 {
        return Err(ScoreError::InvalidGroundTruth);
    }

    let alignment = Alignment::new(prediction.unwrap_or_default(), ground_truth);
    let substitutions = alignment.substitutions();
    let deletions = alignment.deletions();
    let insertions = alignment.insertions();
    debug_assert_eq!(substitutions + deletions + insertions, alignment.distance);

    let result = ScoreResult {
        substitutions,
        deletions,
        insertions,
        ground_truth_length,
        cer: alignment.distance as f64 / ground_truth_length as f64,
    };
    Ok((result, alignment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counts(prediction: &str, ground_truth: &str) -> (usize, usize, usize, f64) {
        let result = score(Some(prediction), ground_truth).unwrap();
        (
            result.substitutions,
            result.deletions,
            result.insertions,
            result.cer,
        )
    }

    #[test]
    fn exact_match_is_zero() {
        assert_eq!(counts("B1234XYZ", "B1234XYZ"), (0, 0, 0, 0.0));
        assert!(score(Some("B1234XYZ"), "B1234XYZ").unwrap().is_exact_match());
    }

    #[test]
    fn empty_prediction_is_all_deletions() {
        assert_eq!(counts("", "ABC"), (0, 3, 0, 1.0));
    }

    #[test]
    fn absent_prediction_scores_like_empty() {
        let result = score(None, "B1234XYZ").unwrap();
        assert_eq!(result.deletions, 8);
        assert_eq!(result.ground_truth_length, 8);
        assert_eq!(result.cer, 1.0);
    }

    #[test]
    fn extra_character_is_insertion() {
        assert_eq!(counts("AXB", "AB"), (0, 0, 1, 0.5));
    }

    #[test]
    fn single_substitution() {
        assert_eq!(counts("8D1234AB", "BD1234AB"), (1, 0, 0, 0.125));
    }

    #[test]
    fn metric_is_asymmetric() {
        let missing = score(Some("AC"), "ABC").unwrap();
        let extra = score(Some("ABC"), "AC").unwrap();
        assert_eq!(missing.deletions, 1);
        assert_eq!(extra.insertions, 1);
        assert!((missing.cer - 1.0 / 3.0).abs() < 1e-12);
        assert!((extra.cer - 0.5).abs() < 1e-12);
        assert_ne!(missing.cer, extra.cer);
    }

    #[test]
    fn cer_can_exceed_one() {
        let result = score(Some("XXXXXXXX"), "AB").unwrap();
        assert_eq!(result.total_errors(), 8);
        assert_eq!(result.cer, 4.0);
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert_eq!(counts("b1234xyz", "B1234XYZ"), (4, 0, 0, 0.5));
    }

    #[test]
    fn empty_ground_truth_is_rejected() {
        assert_eq!(score(Some("ABC"), ""), Err(ScoreError::InvalidGroundTruth));
        assert_eq!(score(None, ""), Err(ScoreError::InvalidGroundTruth));
    }

    #[test]
    fn alignment_operations_are_in_order() {
        let alignment = Alignment::new("AXC", "ABCD");
        assert_eq!(alignment.distance, 2);
        assert_eq!(
            alignment.operations,
            vec![
                EditOp::Match('A'),
                EditOp::Substitution {
                    expected: 'B',
                    predicted: 'X'
                },
                EditOp::Match('C'),
                EditOp::Deletion('D'),
            ]
        );
    }

    #[test]
    fn score_comes_with_its_alignment() {
        let (result, alignment) = score_with_alignment(Some("8D1234A"), "BD1234AB").unwrap();
        assert_eq!(result, score(Some("8D1234A"), "BD1234AB").unwrap());
        assert_eq!(result.total_errors(), alignment.distance);
        assert_eq!(alignment.substitutions(), result.substitutions);
        assert_eq!(alignment.deletions(), result.deletions);
        assert_eq!(
            alignment.operations.first(),
            Some(&EditOp::Substitution {
                expected: 'B',
                predicted: '8'
            })
        );
        assert_eq!(alignment.operations.last(), Some(&EditOp::Deletion('B')));

        let (missing, alignment) = score_with_alignment(None, "AB").unwrap();
        assert_eq!(missing.deletions, 2);
        assert_eq!(
            alignment.operations,
            vec![EditOp::Deletion('A'), EditOp::Deletion('B')]
        );
        assert_eq!(
            score_with_alignment(Some("AB"), "").unwrap_err(),
            ScoreError::InvalidGroundTruth
        );
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        let result = score(Some("ÄB"), "AB").unwrap();
        assert_eq!(result.ground_truth_length, 2);
        assert_eq!(result.substitutions, 1);
    }

    proptest! {
        #[test]
        fn identity_scores_zero(ground_truth in "[A-Z0-9]{1,12}") {
            let result = score(Some(ground_truth.as_str()), &ground_truth).unwrap();
            prop_assert_eq!(result.total_errors(), 0);
            prop_assert_eq!(result.cer, 0.0);
        }

        #[test]
        fn split_sums_to_distance(
            prediction in "[A-D0-3]{0,10}",
            ground_truth in "[A-D0-3]{1,10}",
        ) {
            let alignment = Alignment::new(&prediction, &ground_truth);
            let result = score(Some(prediction.as_str()), &ground_truth).unwrap();
            prop_assert_eq!(result.total_errors(), alignment.distance);
            let expected_cer = alignment.distance as f64 / ground_truth.chars().count() as f64;
            prop_assert_eq!(result.cer, expected_cer);
            prop_assert!(alignment.distance >= prediction.len().abs_diff(ground_truth.len()));
            prop_assert!(alignment.distance <= prediction.len().max(ground_truth.len()));
        }
    }
}
