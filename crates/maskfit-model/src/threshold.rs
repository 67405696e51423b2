//! Decision threshold tuning against a precision target.

use serde::{Deserialize, Serialize};

use crate::metrics::{classification_at_threshold, ClassificationMetrics};

/// Candidate decision thresholds: 0.50 to 0.95 in 0.05 steps.
#[must_use]
pub fn candidate_thresholds() -> Vec<f64> {
    (0..10).map(|i| 0.50 + 0.05 * i as f64).collect()
}

/// The tuned threshold plus the validation rates it achieved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdChoice {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub met_precision_target: bool,
}

/// Pick the decision threshold from the candidate grid.
///
/// Among candidates meeting the precision target the tuner maximizes recall,
/// breaking ties by F1 and then by the lower threshold. When no candidate
/// meets the target it falls back to the best (precision, F1) pair, again
/// preferring the lower threshold, and flags the miss.
#[must_use]
pub fn tune_threshold(probs: &[f64], labels: &[f64], precision_target: f64) -> ThresholdChoice {
    let evaluated: Vec<(f64, _)> = candidate_thresholds()
        .into_iter()
        .map(|thr| (thr, classification_at_threshold(probs, labels, thr)))
        .collect();

    let mut qualified: Option<&(f64, ClassificationMetrics)> = None;
    for entry in &evaluated {
        let m = &entry.1;
        if m.precision < precision_target {
            continue;
        }
        let better = match qualified {
            None => true,
            Some((_, best)) => {
                m.recall > best.recall || (m.recall == best.recall && m.f1 > best.f1)
            }
        };
        if better {
            qualified = Some(entry);
        }
    }

    if let Some((thr, m)) = qualified {
        return ThresholdChoice {
            threshold: *thr,
            precision: m.precision,
            recall: m.recall,
            f1: m.f1,
            met_precision_target: true,
        };
    }

    // Nothing reached the target: take the most precise candidate instead.
    let mut fallback = &evaluated[0];
    for entry in &evaluated[1..] {
        let (m, best) = (&entry.1, &fallback.1);
        if m.precision > best.precision || (m.precision == best.precision && m.f1 > best.f1) {
            fallback = entry;
        }
    }
    let (thr, m) = fallback;
    ThresholdChoice {
        threshold: *thr,
        precision: m.precision,
        recall: m.recall,
        f1: m.f1,
        met_precision_target: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 36 passes and 57 fails spread over four probability levels, shaped so
    /// 0.50 and 0.55 miss the 0.7 precision target and higher thresholds
    /// trade recall away.
    fn create_validation_slice() -> (Vec<f64>, Vec<f64>) {
        let mut probs = Vec::new();
        let mut labels = Vec::new();
        let mut push = |prob: f64, label: f64, count: usize| {
            for _ in 0..count {
                probs.push(prob);
                labels.push(label);
            }
        };
        push(0.85, 1.0, 7);
        push(0.85, 0.0, 1);
        push(0.62, 1.0, 11);
        push(0.62, 0.0, 6);
        push(0.55, 0.0, 20);
        push(0.30, 1.0, 18);
        push(0.20, 0.0, 30);
        (probs, labels)
    }

    #[test]
    fn test_grid_shape() {
        let grid = candidate_thresholds();
        assert_eq!(grid.len(), 10);
        assert!((grid[0] - 0.50).abs() < 1e-12);
        assert!((grid[9] - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_maximizes_recall_among_qualifying_thresholds() {
        let (probs, labels) = create_validation_slice();
        let choice = tune_threshold(&probs, &labels, 0.7);

        // 0.60 qualifies at precision 18/25 = 0.72 with recall 0.50; the
        // higher qualifying thresholds only reach recall 7/36.
        assert!((choice.threshold - 0.60).abs() < 1e-12);
        assert!((choice.precision - 0.72).abs() < 1e-12);
        assert!((choice.recall - 0.50).abs() < 1e-12);
        assert!(choice.met_precision_target);
    }

    #[test]
    fn test_unreachable_target_falls_back_to_best_precision() {
        let (probs, labels) = create_validation_slice();
        let choice = tune_threshold(&probs, &labels, 0.99);

        // Best available precision is 7/8 = 0.875, first reached at 0.65.
        assert!(!choice.met_precision_target);
        assert!((choice.threshold - 0.65).abs() < 1e-12);
        assert!((choice.precision - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_ties_prefer_the_lower_threshold() {
        // Identical confusion counts from 0.50 through 0.70.
        let probs = vec![0.75, 0.75, 0.40];
        let labels = vec![1.0, 1.0, 0.0];
        let choice = tune_threshold(&probs, &labels, 0.7);
        assert!((choice.threshold - 0.50).abs() < 1e-12);
    }

    #[test]
    fn test_empty_slice_keeps_grid_start() {
        let choice = tune_threshold(&[], &[], 0.7);
        assert!((choice.threshold - 0.50).abs() < 1e-12);
        assert!(!choice.met_precision_target);
    }
}
