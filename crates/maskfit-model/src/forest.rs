//! Random forest classifier, trained tree-parallel with rayon.
//!
//! Each tree fits a class-balanced bootstrap sample with Gini splits over a
//! random feature subset. Every tree seeds its own generator from the run
//! seed plus its index, so results do not depend on rayon's scheduling.
//!
//! When both outcomes are present the trainer first evaluates on a
//! stratified held-out slice to pick the decision threshold, then refits on
//! every row for the shipped parameters, keeping the held-out numbers
//! attached to the artifact.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use maskfit_core::config::TrainingConfig;

use crate::artifact::{ModelParams, TrainOutcome};
use crate::error::{ModelError, ModelResult};
use crate::metrics::{classification_at_threshold, roc_auc, ValidationMetrics};
use crate::split::stratified_split;
use crate::threshold::tune_threshold;

/// One node in a flattened decision tree. The root sits at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf { prob: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Walk a row down to its leaf probability.
    #[must_use]
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { prob } => return *prob,
                TreeNode::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// The fitted forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub input_dim: usize,
    pub trees: Vec<Tree>,
}

impl ForestParams {
    /// Mean leaf probability over all trees.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Prediction`] on a feature width mismatch.
    pub fn predict_proba(&self, matrix: &[Vec<f64>]) -> ModelResult<Vec<f64>> {
        for row in matrix {
            if row.len() != self.input_dim {
                return Err(ModelError::Prediction(format!(
                    "feature width {} does not match forest input {}",
                    row.len(),
                    self.input_dim
                )));
            }
        }
        Ok(matrix
            .iter()
            .map(|row| {
                if self.trees.is_empty() {
                    return 0.5;
                }
                let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
                sum / self.trees.len() as f64
            })
            .collect())
    }
}

/// Train the forest on normalized rows and 0/1 labels.
///
/// Tolerates single-class input: the forest then predicts the base rate and
/// ships with the default 0.5 threshold and no evaluation numbers.
pub fn train(
    matrix: &[Vec<f64>],
    labels: &[f64],
    config: &TrainingConfig,
) -> ModelResult<TrainOutcome> {
    let rows = matrix.len();
    if rows == 0 {
        return Err(ModelError::EmptyDataset("no rows for forest training".into()));
    }
    let input_dim = matrix[0].len();
    let positives = labels.iter().filter(|&&l| l > 0.5).count();
    let positive_rate = positives as f64 / rows as f64;
    let two_class = positives > 0 && positives < rows;

    if two_class && rows >= 4 {
        let split = stratified_split(labels, config.validation_fraction, config.seed);
        if !split.train.is_empty() && !split.validation.is_empty() {
            let holdout = ForestParams {
                input_dim,
                trees: fit_forest(matrix, labels, &split.train, config),
            };
            let val_rows: Vec<Vec<f64>> =
                split.validation.iter().map(|&i| matrix[i].clone()).collect();
            let val_labels: Vec<f64> =
                split.validation.iter().map(|&i| labels[i]).collect();
            let val_probs = holdout.predict_proba(&val_rows)?;

            let choice = tune_threshold(&val_probs, &val_labels, config.precision_target);
            let at_threshold =
                classification_at_threshold(&val_probs, &val_labels, choice.threshold);
            let auc = roc_auc(&val_probs, &val_labels);
            let metrics = ValidationMetrics::from_evaluation(
                &at_threshold,
                auc,
                split.train.len(),
                split.validation.len(),
                positive_rate,
                true,
            );

            // The shipped forest refits on every row; the numbers above stay
            // the held-out ones.
            let all: Vec<usize> = (0..rows).collect();
            let params = ForestParams { input_dim, trees: fit_forest(matrix, labels, &all, config) };

            info!(
                trees = config.trees,
                threshold = choice.threshold,
                precision = at_threshold.precision,
                recall = at_threshold.recall,
                auc,
                met_precision_target = choice.met_precision_target,
                "forest training complete"
            );

            return Ok(TrainOutcome {
                params: ModelParams::Forest(params),
                threshold: choice.threshold,
                calibration: None,
                metrics,
            });
        }
    }

    let all: Vec<usize> = (0..rows).collect();
    let params = ForestParams { input_dim, trees: fit_forest(matrix, labels, &all, config) };
    info!(
        trees = config.trees,
        positive_rate, "forest trained without a held-out evaluation slice"
    );
    Ok(TrainOutcome {
        params: ModelParams::Forest(params),
        threshold: 0.5,
        calibration: None,
        metrics: ValidationMetrics::unavailable(rows, positive_rate),
    })
}

fn fit_forest(
    matrix: &[Vec<f64>],
    labels: &[f64],
    pool: &[usize],
    config: &TrainingConfig,
) -> Vec<Tree> {
    let input_dim = matrix.first().map_or(0, Vec::len);
    let feature_subset = ((input_dim as f64).sqrt().round() as usize).max(1);

    (0..config.trees)
        .into_par_iter()
        .map(|tree_idx| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(tree_idx as u64));
            let samples = bootstrap_sample(labels, pool, &mut rng);
            let mut builder = TreeBuilder {
                matrix,
                labels,
                max_depth: config.max_depth,
                min_leaf: config.min_leaf.max(1),
                feature_subset,
                nodes: Vec::new(),
            };
            builder.build(samples, 0, &mut rng);
            Tree { nodes: builder.nodes }
        })
        .collect()
}

/// Bootstrap with replacement, drawing the minority-class count from each
/// class so no tree trains on a lopsided sample.
fn bootstrap_sample(labels: &[f64], pool: &[usize], rng: &mut StdRng) -> Vec<usize> {
    let pos: Vec<usize> = pool.iter().copied().filter(|&i| labels[i] > 0.5).collect();
    let neg: Vec<usize> = pool.iter().copied().filter(|&i| labels[i] <= 0.5).collect();

    if pos.is_empty() || neg.is_empty() {
        return (0..pool.len()).map(|_| pool[rng.gen_range(0..pool.len())]).collect();
    }

    let per_class = pos.len().min(neg.len());
    let mut out = Vec::with_capacity(2 * per_class);
    for _ in 0..per_class {
        out.push(pos[rng.gen_range(0..pos.len())]);
    }
    for _ in 0..per_class {
        out.push(neg[rng.gen_range(0..neg.len())]);
    }
    out
}

struct TreeBuilder<'a> {
    matrix: &'a [Vec<f64>],
    labels: &'a [f64],
    max_depth: usize,
    min_leaf: usize,
    feature_subset: usize,
    nodes: Vec<TreeNode>,
}

impl TreeBuilder<'_> {
    /// Grow a subtree and return its node index. The slot is allocated
    /// before recursing so the first call lands the root at index 0.
    fn build(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let total = samples.len();
        let positives = samples.iter().filter(|&&i| self.labels[i] > 0.5).count();
        let prob = if total == 0 { 0.5 } else { positives as f64 / total as f64 };

        let slot = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { prob });

        let pure = positives == 0 || positives == total;
        if depth >= self.max_depth || total < 2 * self.min_leaf || pure {
            return slot;
        }

        if let Some((feature, threshold)) = self.best_split(&samples, rng) {
            let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
                .iter()
                .copied()
                .partition(|&i| self.matrix[i][feature] <= threshold);
            let left = self.build(left_samples, depth + 1, rng);
            let right = self.build(right_samples, depth + 1, rng);
            self.nodes[slot] = TreeNode::Split { feature, threshold, left, right };
        }
        slot
    }

    /// Best Gini split over a random feature subset, or `None` when no
    /// split beats the parent impurity while respecting leaf minima.
    fn best_split(&self, samples: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
        let input_dim = self.matrix[samples[0]].len();
        let mut features: Vec<usize> = (0..input_dim).collect();
        features.shuffle(rng);
        features.truncate(self.feature_subset);

        let n = samples.len() as f64;
        let total_pos = samples.iter().filter(|&&i| self.labels[i] > 0.5).count() as f64;
        let parent = gini(total_pos / n);

        let mut best: Option<(f64, usize, f64)> = None;
        for &feature in &features {
            let mut values: Vec<(f64, f64)> = samples
                .iter()
                .map(|&i| (self.matrix[i][feature], self.labels[i]))
                .collect();
            values.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

            let mut left_pos = 0.0f64;
            for w in 0..values.len() - 1 {
                if values[w].1 > 0.5 {
                    left_pos += 1.0;
                }
                // Splits only between distinct values.
                if values[w + 1].0 <= values[w].0 + 1e-12 {
                    continue;
                }
                let left_n = (w + 1) as f64;
                let right_n = n - left_n;
                if (left_n as usize) < self.min_leaf || (right_n as usize) < self.min_leaf {
                    continue;
                }
                let right_pos = total_pos - left_pos;
                let weighted = (left_n / n) * gini(left_pos / left_n)
                    + (right_n / n) * gini(right_pos / right_n);
                if best.map_or(true, |(impurity, _, _)| weighted < impurity) {
                    let threshold = (values[w].0 + values[w + 1].0) / 2.0;
                    best = Some((weighted, feature, threshold));
                }
            }
        }

        match best {
            Some((impurity, feature, threshold)) if impurity < parent - 1e-12 => {
                Some((feature, threshold))
            }
            _ => None,
        }
    }
}

fn gini(p: f64) -> f64 {
    2.0 * p * (1.0 - p)
}
