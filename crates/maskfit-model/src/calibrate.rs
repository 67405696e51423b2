//! Post-hoc probability calibration (Platt scaling on logits).

use serde::{Deserialize, Serialize};

const PROB_FLOOR: f64 = 1e-6;
const MAX_NEWTON_ITERS: usize = 25;
/// Parameter magnitude beyond which the fit is treated as divergent.
const PARAM_LIMIT: f64 = 1e3;

/// Affine recalibration in logit space: `sigma(scale * logit(p) + offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    pub scale: f64,
    pub offset: f64,
}

impl CalibrationParams {
    /// Map a raw model probability to its calibrated value.
    #[must_use]
    pub fn apply(&self, prob: f64) -> f64 {
        let z = logit(prob.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR));
        sigmoid(self.scale * z + self.offset)
    }
}

/// Fit calibration parameters on validation probabilities by damped Newton
/// iteration on the binary cross-entropy.
///
/// Returns `None` when the slice is too small, single-class, numerically
/// singular, or the fit diverges; callers then ship the artifact without
/// calibration.
#[must_use]
pub fn fit(probs: &[f64], labels: &[f64]) -> Option<CalibrationParams> {
    if probs.len() != labels.len() || probs.len() < 4 {
        return None;
    }
    let positives = labels.iter().filter(|&&l| l > 0.5).count();
    if positives == 0 || positives == labels.len() {
        return None;
    }

    let z: Vec<f64> = probs
        .iter()
        .map(|p| logit(p.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR)))
        .collect();

    let mut scale = 1.0f64;
    let mut offset = 0.0f64;

    for _ in 0..MAX_NEWTON_ITERS {
        let mut g_scale = 0.0;
        let mut g_offset = 0.0;
        let mut h_ss = 0.0;
        let mut h_so = 0.0;
        let mut h_oo = 0.0;

        for (zi, yi) in z.iter().zip(labels.iter()) {
            let p = sigmoid(scale * zi + offset);
            let residual = p - yi;
            let weight = (p * (1.0 - p)).max(1e-12);
            g_scale += residual * zi;
            g_offset += residual;
            h_ss += weight * zi * zi;
            h_so += weight * zi;
            h_oo += weight;
        }

        let det = h_ss * h_oo - h_so * h_so;
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        let step_scale = (h_oo * g_scale - h_so * g_offset) / det;
        let step_offset = (h_ss * g_offset - h_so * g_scale) / det;

        let norm = (step_scale * step_scale + step_offset * step_offset).sqrt();
        let damp = if norm > 10.0 { 10.0 / norm } else { 1.0 };
        scale -= damp * step_scale;
        offset -= damp * step_offset;

        if !scale.is_finite() || !offset.is_finite() {
            return None;
        }
        if norm < 1e-10 {
            break;
        }
    }

    if scale.abs() > PARAM_LIMIT || offset.abs() > PARAM_LIMIT {
        return None;
    }
    Some(CalibrationParams { scale, offset })
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}
