//! Gradient-trained classifier: a small MLP fit with candle.
//!
//! Training runs on candle tensors on the CPU device. Initial weights are
//! drawn from the run seed (candle cannot seed the CPU device rng), so a
//! retrain with the same config reproduces the same network. The fitted
//! weights are exported to plain `Vec<f32>` so prediction is a
//! dependency-light matrix walk; validation probabilities for threshold
//! tuning and calibration come from the exported forward pass, not the
//! tensor graph, so serving reproduces them bit for bit.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Linear, Module, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use maskfit_core::config::TrainingConfig;

use crate::artifact::{ModelParams, TrainOutcome};
use crate::calibrate;
use crate::error::{ModelError, ModelResult};
use crate::metrics::{classification_at_threshold, roc_auc, ValidationMetrics};
use crate::split;
use crate::threshold::tune_threshold;

const MINIBATCH: usize = 32;
const PROB_EPS: f64 = 1e-7;

/// Exported weights of the two-layer network, row-major per output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientParams {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub fc1_weight: Vec<f32>,
    pub fc1_bias: Vec<f32>,
    pub fc2_weight: Vec<f32>,
    pub fc2_bias: f32,
}

impl GradientParams {
    /// Pass probabilities for already-normalized feature rows.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Prediction`] when a row width disagrees with
    /// the trained input dimension.
    pub fn predict_proba(&self, matrix: &[Vec<f64>]) -> ModelResult<Vec<f64>> {
        for row in matrix {
            if row.len() != self.input_dim {
                return Err(ModelError::Prediction(format!(
                    "feature width {} does not match model input {}",
                    row.len(),
                    self.input_dim
                )));
            }
        }
        Ok(matrix.iter().map(|row| self.forward(row)).collect())
    }

    /// relu(x W1^T + b1) W2^T + b2, squashed. Accumulates in f64.
    fn forward(&self, row: &[f64]) -> f64 {
        let mut z = self.fc2_bias as f64;
        for j in 0..self.hidden_dim {
            let base = j * self.input_dim;
            let mut acc = self.fc1_bias[j] as f64;
            for (i, x) in row.iter().enumerate() {
                acc += self.fc1_weight[base + i] as f64 * x;
            }
            z += self.fc2_weight[j] as f64 * acc.max(0.0);
        }
        sigmoid(z)
    }
}

/// Train the MLP on normalized rows and 0/1 labels.
///
/// Minibatch AdamW with a class-weighted BCE loss; the checkpoint with the
/// best validation F1 at 0.5 is the one shipped. Refuses single-class input.
pub fn train(
    matrix: &[Vec<f64>],
    labels: &[f64],
    config: &TrainingConfig,
) -> ModelResult<TrainOutcome> {
    let rows = matrix.len();
    if rows == 0 {
        return Err(ModelError::EmptyDataset("no rows for gradient training".into()));
    }
    let input_dim = matrix[0].len();
    let positives = labels.iter().filter(|&&l| l > 0.5).count();
    if positives == 0 || positives == rows {
        return Err(ModelError::SingleClass(format!(
            "gradient training needs both outcomes, got {} passes in {} rows",
            positives, rows
        )));
    }

    let split = split::split(rows, config.validation_fraction, config.seed);
    let val_labels: Vec<f64> = split.validation.iter().map(|&i| labels[i]).collect();

    let train_pos = split.train.iter().filter(|&&i| labels[i] > 0.5).count();
    let train_neg = split.train.len() - train_pos;
    let pos_weight = if train_pos == 0 {
        1.0
    } else {
        (train_neg as f64 / train_pos as f64).clamp(0.1, 10.0)
    };

    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let hidden = config.hidden_dim;

    // Kaiming-normal fan-in initialization, drawn from the run seed.
    let fc1_init = seeded_normal(&mut rng, hidden * input_dim, (2.0 / input_dim as f64).sqrt())?;
    let fc2_init = seeded_normal(&mut rng, hidden, (2.0 / hidden as f64).sqrt())?;
    // Start the output bias at the base pass rate so early epochs are not
    // dominated by bias correction.
    let base_rate =
        (train_pos.max(1) as f64 / split.train.len().max(1) as f64).clamp(0.05, 0.95);
    let bias0 = (base_rate / (1.0 - base_rate)).ln() as f32;

    let fc1_w = Var::from_tensor(
        &Tensor::from_vec(fc1_init, (hidden, input_dim), &device).map_err(map_candle)?,
    )
    .map_err(map_candle)?;
    let fc1_b = Var::zeros(hidden, DType::F32, &device).map_err(map_candle)?;
    let fc2_w = Var::from_tensor(
        &Tensor::from_vec(fc2_init, (1, hidden), &device).map_err(map_candle)?,
    )
    .map_err(map_candle)?;
    let fc2_b =
        Var::from_tensor(&Tensor::full(bias0, 1, &device).map_err(map_candle)?).map_err(map_candle)?;

    let fc1 = Linear::new(fc1_w.as_tensor().clone(), Some(fc1_b.as_tensor().clone()));
    let fc2 = Linear::new(fc2_w.as_tensor().clone(), Some(fc2_b.as_tensor().clone()));

    let mut optimizer = AdamW::new(
        vec![fc1_w, fc1_b, fc2_w, fc2_b],
        ParamsAdamW { lr: config.learning_rate, ..Default::default() },
    )
    .map_err(map_candle)?;

    let mut order = split.train.clone();
    let mut best: Option<(f64, GradientParams)> = None;

    for epoch in 0..config.epochs {
        order.shuffle(&mut rng);
        let mut epoch_loss = 0.0f64;
        let mut batches = 0usize;

        for chunk in order.chunks(MINIBATCH) {
            let (x, y) = batch_tensors(matrix, labels, chunk, input_dim, &device)?;
            let hidden_out = fc1.forward(&x).map_err(map_candle)?.relu().map_err(map_candle)?;
            let logits = fc2
                .forward(&hidden_out)
                .map_err(map_candle)?
                .squeeze(1)
                .map_err(map_candle)?;
            let loss = weighted_bce_with_logits(&logits, &y, pos_weight)?;
            optimizer.backward_step(&loss).map_err(map_candle)?;
            epoch_loss += tensor_to_f64(&loss)?;
            batches += 1;
        }

        // Checkpoint selection uses the exported forward pass, keeping the
        // later ties so degenerate validation slices still end fully trained.
        let params = extract_params(&fc1, &fc2, input_dim, hidden)?;
        let val_probs: Vec<f64> =
            split.validation.iter().map(|&i| params.forward(&matrix[i])).collect();
        let val_f1 = classification_at_threshold(&val_probs, &val_labels, 0.5).f1;
        let improved = best.as_ref().map_or(true, |(f1, _)| val_f1 >= *f1);
        if improved {
            best = Some((val_f1, params));
        }

        if epoch % 10 == 0 || epoch + 1 == config.epochs {
            debug!(
                epoch,
                avg_loss = epoch_loss / batches.max(1) as f64,
                val_f1,
                "gradient epoch"
            );
        }
    }

    let (best_f1, params) =
        best.ok_or_else(|| ModelError::Training("no training epochs ran".into()))?;

    let val_probs: Vec<f64> =
        split.validation.iter().map(|&i| params.forward(&matrix[i])).collect();
    let choice = tune_threshold(&val_probs, &val_labels, config.precision_target);
    let calibration = calibrate::fit(&val_probs, &val_labels);
    let at_threshold = classification_at_threshold(&val_probs, &val_labels, choice.threshold);
    let auc = roc_auc(&val_probs, &val_labels);
    let metrics = ValidationMetrics::from_evaluation(
        &at_threshold,
        auc,
        split.train.len(),
        split.validation.len(),
        positives as f64 / rows as f64,
        true,
    );

    info!(
        best_f1,
        threshold = choice.threshold,
        precision = at_threshold.precision,
        recall = at_threshold.recall,
        auc,
        calibrated = calibration.is_some(),
        met_precision_target = choice.met_precision_target,
        "gradient training complete"
    );

    Ok(TrainOutcome {
        params: ModelParams::Gradient(params),
        threshold: choice.threshold,
        calibration,
        metrics,
    })
}

fn seeded_normal(rng: &mut StdRng, n: usize, std_dev: f64) -> ModelResult<Vec<f32>> {
    let normal = Normal::new(0.0, std_dev)
        .map_err(|e| ModelError::Training(format!("bad init distribution: {}", e)))?;
    Ok((0..n).map(|_| normal.sample(rng) as f32).collect())
}

fn batch_tensors(
    matrix: &[Vec<f64>],
    labels: &[f64],
    indices: &[usize],
    input_dim: usize,
    device: &Device,
) -> ModelResult<(Tensor, Tensor)> {
    let mut flat = Vec::with_capacity(indices.len() * input_dim);
    let mut y = Vec::with_capacity(indices.len());
    for &i in indices {
        flat.extend(matrix[i].iter().map(|v| *v as f32));
        y.push(labels[i] as f32);
    }
    let x = Tensor::from_slice(&flat, (indices.len(), input_dim), device).map_err(map_candle)?;
    let y = Tensor::from_slice(&y, indices.len(), device).map_err(map_candle)?;
    Ok((x, y))
}

/// Class-weighted binary cross-entropy on logits:
/// `-mean(w * y * ln(p) + (1 - y) * ln(1 - p))`.
fn weighted_bce_with_logits(
    logits: &Tensor,
    targets: &Tensor,
    pos_weight: f64,
) -> ModelResult<Tensor> {
    let probs = candle_nn::ops::sigmoid(logits).map_err(map_candle)?;
    let probs = probs.clamp(PROB_EPS, 1.0 - PROB_EPS).map_err(map_candle)?;
    let log_p = probs.log().map_err(map_candle)?;
    let log_not_p = probs
        .affine(-1.0, 1.0)
        .map_err(map_candle)?
        .log()
        .map_err(map_candle)?;

    let pos_term = (targets * &log_p)
        .map_err(map_candle)?
        .affine(pos_weight, 0.0)
        .map_err(map_candle)?;
    let neg_mask = targets.affine(-1.0, 1.0).map_err(map_candle)?;
    let neg_term = (&neg_mask * &log_not_p).map_err(map_candle)?;

    (&pos_term + &neg_term)
        .map_err(map_candle)?
        .mean_all()
        .map_err(map_candle)?
        .affine(-1.0, 0.0)
        .map_err(map_candle)
}

fn extract_params(
    fc1: &Linear,
    fc2: &Linear,
    input_dim: usize,
    hidden_dim: usize,
) -> ModelResult<GradientParams> {
    let fc1_weight: Vec<f32> = fc1
        .weight()
        .to_vec2::<f32>()
        .map_err(map_candle)?
        .into_iter()
        .flatten()
        .collect();
    let fc1_bias = match fc1.bias() {
        Some(b) => b.to_vec1::<f32>().map_err(map_candle)?,
        None => vec![0.0; hidden_dim],
    };
    let fc2_weight: Vec<f32> = fc2
        .weight()
        .to_vec2::<f32>()
        .map_err(map_candle)?
        .into_iter()
        .flatten()
        .collect();
    let fc2_bias = match fc2.bias() {
        Some(b) => b.to_vec1::<f32>().map_err(map_candle)?.first().copied().unwrap_or(0.0),
        None => 0.0,
    };

    Ok(GradientParams { input_dim, hidden_dim, fc1_weight, fc1_bias, fc2_weight, fc2_bias })
}

fn tensor_to_f64(t: &Tensor) -> ModelResult<f64> {
    let flat = t.flatten_all().map_err(map_candle)?;
    let values = flat.to_vec1::<f32>().map_err(map_candle)?;
    Ok(values.first().copied().unwrap_or(0.0) as f64)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Training(format!("tensor operation failed: {}", e))
}
