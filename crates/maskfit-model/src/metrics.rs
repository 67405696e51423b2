//! Binary classification metrics shared by every trainer family.

use serde::{Deserialize, Serialize};

/// Confusion counts and derived rates at one decision threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

/// Evaluation summary published alongside a trained artifact.
///
/// Rates are `None` when no evaluation was possible (too few rows or a
/// single-class validation slice). `heldout_evaluation` is false when the
/// numbers were computed in-sample rather than on a held-out split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub auc: Option<f64>,
    pub accuracy: Option<f64>,
    pub training_rows: usize,
    pub validation_rows: usize,
    pub positive_rate: f64,
    pub heldout_evaluation: bool,
}

impl ValidationMetrics {
    /// Summary for a run where no evaluation slice existed.
    #[must_use]
    pub fn unavailable(training_rows: usize, positive_rate: f64) -> Self {
        Self {
            precision: None,
            recall: None,
            f1: None,
            auc: None,
            accuracy: None,
            training_rows,
            validation_rows: 0,
            positive_rate,
            heldout_evaluation: false,
        }
    }

    /// Summary from threshold metrics plus an AUC over the same slice.
    #[must_use]
    pub fn from_evaluation(
        at_threshold: &ClassificationMetrics,
        auc: f64,
        training_rows: usize,
        validation_rows: usize,
        positive_rate: f64,
        heldout_evaluation: bool,
    ) -> Self {
        Self {
            precision: Some(at_threshold.precision),
            recall: Some(at_threshold.recall),
            f1: Some(at_threshold.f1),
            auc: Some(auc),
            accuracy: Some(at_threshold.accuracy),
            training_rows,
            validation_rows,
            positive_rate,
            heldout_evaluation,
        }
    }
}

/// Confusion metrics with predictions at `prob >= threshold`.
///
/// Undefined rates (zero denominators) report as 0.0 rather than NaN so the
/// values stay JSON-serializable.
#[must_use]
pub fn classification_at_threshold(
    probs: &[f64],
    labels: &[f64],
    threshold: f64,
) -> ClassificationMetrics {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut tn = 0usize;
    let mut fn_ = 0usize;

    for (p, l) in probs.iter().zip(labels.iter()) {
        let predicted_pass = *p >= threshold;
        let actual_pass = *l > 0.5;
        match (predicted_pass, actual_pass) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let accuracy = ratio(tp + tn, tp + fp + tn + fn_);

    ClassificationMetrics {
        precision,
        recall,
        f1,
        accuracy,
        true_positives: tp,
        false_positives: fp,
        true_negatives: tn,
        false_negatives: fn_,
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Area under the ROC curve via the Wilcoxon statistic.
///
/// Returns 0.5 when only one class is present and 0.0 for empty or
/// mismatched input.
#[must_use]
pub fn roc_auc(probs: &[f64], labels: &[f64]) -> f64 {
    if probs.is_empty() || probs.len() != labels.len() {
        return 0.0;
    }

    let positives = labels.iter().filter(|&&l| l > 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut pairs: Vec<(f64, f64)> = probs
        .iter()
        .copied()
        .zip(labels.iter().copied())
        .collect();
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut positives_seen = 0usize;
    let mut concordant = 0usize;
    for (_, label) in &pairs {
        if *label > 0.5 {
            positives_seen += 1;
        } else {
            concordant += positives_seen;
        }
    }

    concordant as f64 / (positives * negatives) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_counts() {
        let probs = [0.9, 0.8, 0.4, 0.2];
        let labels = [1.0, 0.0, 1.0, 0.0];
        let m = classification_at_threshold(&probs, &labels, 0.5);

        assert_eq!(m.true_positives, 1);
        assert_eq!(m.false_positives, 1);
        assert_eq!(m.true_negatives, 1);
        assert_eq!(m.false_negatives, 1);
        assert!((m.precision - 0.5).abs() < 1e-12);
        assert!((m.recall - 0.5).abs() < 1e-12);
        assert!((m.f1 - 0.5).abs() < 1e-12);
        assert!((m.accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_denominators_report_zero() {
        // Nothing predicted positive: precision undefined, reported 0.0.
        let m = classification_at_threshold(&[0.1, 0.2], &[1.0, 1.0], 0.9);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.recall, 0.0);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let m = classification_at_threshold(&[0.5], &[1.0], 0.5);
        assert_eq!(m.true_positives, 1);
    }

    #[test]
    fn test_auc_perfect_separation() {
        let probs = [0.9, 0.8, 0.2, 0.1];
        let labels = [1.0, 1.0, 0.0, 0.0];
        assert!((roc_auc(&probs, &labels) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_auc_inverted_ranking() {
        let probs = [0.1, 0.2, 0.8, 0.9];
        let labels = [1.0, 1.0, 0.0, 0.0];
        assert!((roc_auc(&probs, &labels)).abs() < 1e-12);
    }

    #[test]
    fn test_auc_interleaved() {
        let probs = [0.9, 0.8, 0.7, 0.6];
        let labels = [1.0, 0.0, 1.0, 0.0];
        assert!((roc_auc(&probs, &labels) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_auc_degenerate_inputs() {
        assert_eq!(roc_auc(&[], &[]), 0.0);
        assert_eq!(roc_auc(&[0.5, 0.6], &[1.0, 1.0]), 0.5);
        assert_eq!(roc_auc(&[0.5, 0.6], &[0.0, 0.0]), 0.5);
    }
}
