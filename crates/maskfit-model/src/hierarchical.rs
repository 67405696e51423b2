//! Hierarchical Bayesian classifier over (style, perimeter-diff bin) groups.
//!
//! Each group's pass probability is Beta-distributed with style-level shape
//! parameters under Half-Normal hyperpriors, so sparse groups borrow
//! strength from their style. Strap type and facial hair enter as an
//! independent additive term on the logit scale. Inference runs a
//! Metropolis-within-Gibbs sweep on unconstrained coordinates and ships
//! posterior means.
//!
//! Group membership is recovered from the feature schema's column names, by
//! both training and prediction, so the two paths can never disagree about
//! which group a row belongs to.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use maskfit_core::config::TrainingConfig;

use crate::artifact::{ModelParams, TrainOutcome};
use crate::error::{ModelError, ModelResult};
use crate::metrics::{classification_at_threshold, roc_auc, ValidationMetrics};
use crate::schema::FeatureSchema;
use crate::threshold::candidate_thresholds;

/// Half-Normal scale for the Beta shape hyperpriors.
const SHAPE_SIGMA: f64 = 5.0;
/// Normal scale for the strap and hair coefficients.
const COEF_SIGMA: f64 = 1.0;
const STEP_THETA: f64 = 0.3;
const STEP_SHAPE: f64 = 0.3;
const STEP_COEF: f64 = 0.15;

/// Posterior-mean pass rate for one (style, bin) group. `bin` is `None` for
/// rows whose perimeter difference was unknown at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPassRate {
    pub style: String,
    pub bin: Option<i64>,
    pub theta: f64,
}

/// Posterior-mean Beta mean per style, the fallback for unseen bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylePassRate {
    pub style: String,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrapCoefficient {
    pub strap: String,
    pub coef: f64,
}

/// Posterior means of the fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalParams {
    pub groups: Vec<GroupPassRate>,
    pub styles: Vec<StylePassRate>,
    pub strap_coefs: Vec<StrapCoefficient>,
    pub hair_coef: f64,
    /// Mean over style means; the fallback for styles never seen in training.
    pub global_mean: f64,
}

impl HierarchicalParams {
    /// Pass probabilities for normalized rows encoded under `schema`.
    ///
    /// Rows resolve their group from the schema's one-hot columns; an unseen
    /// bin falls back to the style mean and an unseen style to the global
    /// mean, with the strap and hair terms still applied.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Prediction`] when row widths disagree with the
    /// schema.
    pub fn predict_proba(
        &self,
        schema: &FeatureSchema,
        matrix: &[Vec<f64>],
    ) -> ModelResult<Vec<f64>> {
        for row in matrix {
            if row.len() != schema.width() {
                return Err(ModelError::Prediction(format!(
                    "feature width {} does not match schema width {}",
                    row.len(),
                    schema.width()
                )));
            }
        }

        let decoder = SchemaDecoder::new(schema);
        let group_rates: HashMap<(&str, Option<i64>), f64> = self
            .groups
            .iter()
            .map(|g| ((g.style.as_str(), g.bin), g.theta))
            .collect();
        let style_rates: HashMap<&str, f64> =
            self.styles.iter().map(|s| (s.style.as_str(), s.mean)).collect();
        let strap_rates: HashMap<&str, f64> =
            self.strap_coefs.iter().map(|s| (s.strap.as_str(), s.coef)).collect();

        Ok(matrix
            .iter()
            .map(|row| {
                let decoded = decoder.decode(row);
                let theta = match decoded.style.as_deref() {
                    Some(style) => group_rates
                        .get(&(style, decoded.bin))
                        .or_else(|| style_rates.get(style))
                        .copied()
                        .unwrap_or(self.global_mean),
                    None => self.global_mean,
                };
                let strap_term = decoded
                    .strap
                    .as_deref()
                    .and_then(|s| strap_rates.get(s).copied())
                    .unwrap_or(0.0);
                let z = logit(theta.clamp(1e-6, 1.0 - 1e-6))
                    + strap_term
                    + self.hair_coef * decoded.hair;
                sigmoid(z)
            })
            .collect())
    }
}

/// Fit the model by Markov-chain sampling and ship posterior means.
///
/// Tolerates single-class input; the posterior then concentrates near the
/// observed rate under the pooled prior. There is no tuned decision
/// threshold: the artifact carries the neutral 0.5 and in-sample metrics at
/// the best swept-grid F1.
pub fn train(
    schema: &FeatureSchema,
    matrix: &[Vec<f64>],
    labels: &[f64],
    config: &TrainingConfig,
) -> ModelResult<TrainOutcome> {
    if matrix.is_empty() {
        return Err(ModelError::EmptyDataset("no rows for hierarchical training".into()));
    }
    if config.mcmc_draws <= config.mcmc_burn_in {
        return Err(ModelError::Training(format!(
            "draw budget {} must exceed burn-in {}",
            config.mcmc_draws, config.mcmc_burn_in
        )));
    }

    let layout = GroupLayout::from_rows(schema, matrix);
    let mut state = SamplerState::init(&layout, labels);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let kept = config.mcmc_draws - config.mcmc_burn_in;
    let mut theta_sum = vec![0.0f64; layout.group_count()];
    let mut style_sum = vec![0.0f64; layout.style_count()];
    let mut strap_sum = vec![0.0f64; layout.strap_count()];
    let mut hair_sum = 0.0f64;

    for draw in 0..config.mcmc_draws {
        state.sweep(&layout, labels, &mut rng);
        if draw >= config.mcmc_burn_in {
            for (sum, t) in theta_sum.iter_mut().zip(&state.theta_logit) {
                *sum += sigmoid(*t);
            }
            for (i, sum) in style_sum.iter_mut().enumerate() {
                *sum += state.alpha[i] / (state.alpha[i] + state.beta[i]);
            }
            for (sum, w) in strap_sum.iter_mut().zip(&state.strap_coef) {
                *sum += *w;
            }
            hair_sum += state.hair_coef;
        }
        if draw % 500 == 0 {
            debug!(draw, accepted = state.accepted, "sampler progress");
        }
    }

    let scale = kept as f64;
    let groups: Vec<GroupPassRate> = layout
        .group_keys
        .iter()
        .zip(&theta_sum)
        .map(|((style, bin), sum)| GroupPassRate {
            style: style.clone(),
            bin: *bin,
            theta: sum / scale,
        })
        .collect();
    let styles: Vec<StylePassRate> = layout
        .style_keys
        .iter()
        .zip(&style_sum)
        .map(|(style, sum)| StylePassRate { style: style.clone(), mean: sum / scale })
        .collect();
    let strap_coefs: Vec<StrapCoefficient> = layout
        .strap_keys
        .iter()
        .zip(&strap_sum)
        .map(|(strap, sum)| StrapCoefficient { strap: strap.clone(), coef: sum / scale })
        .collect();
    let global_mean = if styles.is_empty() {
        0.5
    } else {
        styles.iter().map(|s| s.mean).sum::<f64>() / styles.len() as f64
    };

    let params = HierarchicalParams {
        groups,
        styles,
        strap_coefs,
        hair_coef: hair_sum / scale,
        global_mean,
    };

    // In-sample metrics; F1 reported at its best over the swept grid.
    let probs = params.predict_proba(schema, matrix)?;
    let auc = roc_auc(&probs, labels);
    let best = candidate_thresholds()
        .into_iter()
        .map(|thr| classification_at_threshold(&probs, labels, thr))
        .max_by(|a, b| a.f1.partial_cmp(&b.f1).unwrap_or(std::cmp::Ordering::Equal));
    let positives = labels.iter().filter(|&&l| l > 0.5).count();
    let positive_rate = positives as f64 / labels.len() as f64;
    let metrics = match best {
        Some(at_best) => ValidationMetrics::from_evaluation(
            &at_best,
            auc,
            matrix.len(),
            0,
            positive_rate,
            false,
        ),
        None => ValidationMetrics::unavailable(matrix.len(), positive_rate),
    };

    info!(
        groups = layout.group_count(),
        styles = layout.style_count(),
        draws = config.mcmc_draws,
        auc,
        "hierarchical training complete"
    );

    Ok(TrainOutcome {
        params: ModelParams::Hierarchical(params),
        threshold: 0.5,
        calibration: None,
        metrics,
    })
}

/// Column roles recovered from a schema by name.
struct SchemaDecoder {
    style_cols: Vec<(usize, String)>,
    strap_cols: Vec<(usize, String)>,
    bin_cols: Vec<(usize, i64)>,
    bin_index_col: Option<usize>,
    hair_col: Option<usize>,
}

struct DecodedRow {
    style: Option<String>,
    bin: Option<i64>,
    strap: Option<String>,
    hair: f64,
}

impl SchemaDecoder {
    fn new(schema: &FeatureSchema) -> Self {
        let mut style_cols = Vec::new();
        let mut strap_cols = Vec::new();
        let mut bin_cols = Vec::new();
        let mut bin_index_col = None;
        let mut hair_col = None;

        for (j, name) in schema.columns.iter().enumerate() {
            if let Some(rest) = name.strip_prefix("perimeter_diff_bin_") {
                if let Ok(idx) = rest.parse::<i64>() {
                    bin_cols.push((j, idx));
                }
            } else if name == "perimeter_diff_bin" {
                bin_index_col = Some(j);
            } else if let Some(rest) = name.strip_prefix("style_") {
                if rest != "unseen" {
                    style_cols.push((j, rest.to_string()));
                }
            } else if let Some(rest) = name.strip_prefix("strap_") {
                if rest != "unseen" {
                    strap_cols.push((j, rest.to_string()));
                }
            } else if name == "facial_hair_mm" {
                hair_col = Some(j);
            }
        }

        Self { style_cols, strap_cols, bin_cols, bin_index_col, hair_col }
    }

    fn decode(&self, row: &[f64]) -> DecodedRow {
        let style = self
            .style_cols
            .iter()
            .find(|(j, _)| row[*j] > 0.5)
            .map(|(_, s)| s.clone());
        let strap = self
            .strap_cols
            .iter()
            .find(|(j, _)| row[*j] > 0.5)
            .map(|(_, s)| s.clone());
        let bin = match self.bin_index_col {
            Some(j) => Some(row[j].round() as i64),
            None => self.bin_cols.iter().find(|(j, _)| row[*j] > 0.5).map(|(_, b)| *b),
        };
        let hair = self.hair_col.map_or(0.0, |j| row[j]);
        DecodedRow { style, bin, strap, hair }
    }
}

/// Static structure of the sampling problem: which rows belong to which
/// group, style, and strap.
struct GroupLayout {
    group_keys: Vec<(String, Option<i64>)>,
    style_keys: Vec<String>,
    strap_keys: Vec<String>,
    rows_of_group: Vec<Vec<usize>>,
    groups_of_style: Vec<Vec<usize>>,
    rows_of_strap: Vec<Vec<usize>>,
    group_of_row: Vec<usize>,
    style_of_group: Vec<usize>,
    hair: Vec<f64>,
    hair_rows: Vec<usize>,
}

impl GroupLayout {
    fn from_rows(schema: &FeatureSchema, matrix: &[Vec<f64>]) -> Self {
        let decoder = SchemaDecoder::new(schema);

        let mut group_index: HashMap<(String, Option<i64>), usize> = HashMap::new();
        let mut style_index: HashMap<String, usize> = HashMap::new();
        let mut strap_index: HashMap<String, usize> = HashMap::new();
        let mut group_keys = Vec::new();
        let mut style_keys: Vec<String> = Vec::new();
        let mut strap_keys: Vec<String> = Vec::new();
        let mut rows_of_group: Vec<Vec<usize>> = Vec::new();
        let mut groups_of_style: Vec<Vec<usize>> = Vec::new();
        let mut rows_of_strap: Vec<Vec<usize>> = Vec::new();
        let mut group_of_row = Vec::with_capacity(matrix.len());
        let mut style_of_group = Vec::new();
        let mut hair = Vec::with_capacity(matrix.len());
        let mut hair_rows = Vec::new();

        for (i, row) in matrix.iter().enumerate() {
            let decoded = decoder.decode(row);
            let style = decoded.style.unwrap_or_else(|| "unseen".to_string());
            let key = (style.clone(), decoded.bin);

            let g = *group_index.entry(key.clone()).or_insert_with(|| {
                let s = *style_index.entry(style.clone()).or_insert_with(|| {
                    style_keys.push(style.clone());
                    groups_of_style.push(Vec::new());
                    style_keys.len() - 1
                });
                group_keys.push(key);
                rows_of_group.push(Vec::new());
                style_of_group.push(s);
                groups_of_style[s].push(group_keys.len() - 1);
                group_keys.len() - 1
            });
            rows_of_group[g].push(i);
            group_of_row.push(g);

            if let Some(strap) = decoded.strap {
                let k = *strap_index.entry(strap.clone()).or_insert_with(|| {
                    strap_keys.push(strap);
                    rows_of_strap.push(Vec::new());
                    strap_keys.len() - 1
                });
                rows_of_strap[k].push(i);
            }

            hair.push(decoded.hair);
            if decoded.hair != 0.0 {
                hair_rows.push(i);
            }
        }

        Self {
            group_keys,
            style_keys,
            strap_keys,
            rows_of_group,
            groups_of_style,
            rows_of_strap,
            group_of_row,
            style_of_group,
            hair,
            hair_rows,
        }
    }

    fn group_count(&self) -> usize {
        self.group_keys.len()
    }

    fn style_count(&self) -> usize {
        self.style_keys.len()
    }

    fn strap_count(&self) -> usize {
        self.strap_keys.len()
    }
}

struct SamplerState {
    theta_logit: Vec<f64>,
    alpha: Vec<f64>,
    beta: Vec<f64>,
    strap_coef: Vec<f64>,
    hair_coef: f64,
    /// Current linear predictor per row.
    predictor: Vec<f64>,
    accepted: u64,
}

impl SamplerState {
    fn init(layout: &GroupLayout, labels: &[f64]) -> Self {
        let theta_logit: Vec<f64> = layout
            .rows_of_group
            .iter()
            .map(|rows| {
                let pos = rows.iter().filter(|&&i| labels[i] > 0.5).count() as f64;
                let rate = (pos / rows.len() as f64).clamp(0.05, 0.95);
                logit(rate)
            })
            .collect();
        let strap_coef = vec![0.0; layout.strap_count()];
        let hair_coef = 0.0;

        let predictor: Vec<f64> = (0..layout.group_of_row.len())
            .map(|i| theta_logit[layout.group_of_row[i]])
            .collect();

        Self {
            theta_logit,
            alpha: vec![1.0; layout.style_count()],
            beta: vec![1.0; layout.style_count()],
            strap_coef,
            hair_coef,
            predictor,
            accepted: 0,
        }
    }

    /// One Metropolis-within-Gibbs sweep over every coordinate.
    fn sweep(&mut self, layout: &GroupLayout, labels: &[f64], rng: &mut StdRng) {
        for g in 0..layout.group_count() {
            self.update_group(g, layout, labels, rng);
        }
        for s in 0..layout.style_count() {
            self.update_shape(s, layout, true, rng);
            self.update_shape(s, layout, false, rng);
        }
        for k in 0..layout.strap_count() {
            self.update_strap(k, layout, labels, rng);
        }
        if !layout.hair_rows.is_empty() {
            self.update_hair(layout, labels, rng);
        }
    }

    fn update_group(&mut self, g: usize, layout: &GroupLayout, labels: &[f64], rng: &mut StdRng) {
        let step: f64 = rng.sample::<f64, _>(StandardNormal) * STEP_THETA;
        let current = self.theta_logit[g];
        let proposed = current + step;

        let s = layout.style_of_group[g];
        // Beta prior plus logit Jacobian collapses to
        // alpha*ln(theta) + beta*ln(1 - theta).
        let prior_delta = self.alpha[s] * (log_sigmoid(proposed) - log_sigmoid(current))
            + self.beta[s] * (log_sigmoid(-proposed) - log_sigmoid(-current));

        let mut likelihood_delta = 0.0;
        for &i in &layout.rows_of_group[g] {
            let l = self.predictor[i];
            likelihood_delta += bernoulli_loglik(l + step, labels[i]) - bernoulli_loglik(l, labels[i]);
        }

        if accept(prior_delta + likelihood_delta, rng) {
            self.theta_logit[g] = proposed;
            for &i in &layout.rows_of_group[g] {
                self.predictor[i] += step;
            }
            self.accepted += 1;
        }
    }

    /// Update one style's alpha (or beta) on the log scale.
    fn update_shape(&mut self, s: usize, layout: &GroupLayout, is_alpha: bool, rng: &mut StdRng) {
        let step: f64 = rng.sample::<f64, _>(StandardNormal) * STEP_SHAPE;
        let current = if is_alpha { self.alpha[s] } else { self.beta[s] };
        let proposed = (current.ln() + step).exp();

        let group_count = layout.groups_of_style[s].len() as f64;
        let log_theta_sum: f64 = layout.groups_of_style[s]
            .iter()
            .map(|&g| {
                let t = self.theta_logit[g];
                if is_alpha { log_sigmoid(t) } else { log_sigmoid(-t) }
            })
            .sum();

        let (alpha_new, beta_new) = if is_alpha {
            (proposed, self.beta[s])
        } else {
            (self.alpha[s], proposed)
        };
        let (alpha_old, beta_old) = (self.alpha[s], self.beta[s]);

        let delta = (proposed - current) * log_theta_sum
            - group_count * (ln_beta_fn(alpha_new, beta_new) - ln_beta_fn(alpha_old, beta_old))
            - (proposed * proposed - current * current) / (2.0 * SHAPE_SIGMA * SHAPE_SIGMA)
            + (proposed.ln() - current.ln());

        if accept(delta, rng) {
            if is_alpha {
                self.alpha[s] = proposed;
            } else {
                self.beta[s] = proposed;
            }
            self.accepted += 1;
        }
    }

    fn update_strap(&mut self, k: usize, layout: &GroupLayout, labels: &[f64], rng: &mut StdRng) {
        let step: f64 = rng.sample::<f64, _>(StandardNormal) * STEP_COEF;
        let current = self.strap_coef[k];
        let proposed = current + step;

        let prior_delta =
            (current * current - proposed * proposed) / (2.0 * COEF_SIGMA * COEF_SIGMA);
        let mut likelihood_delta = 0.0;
        for &i in &layout.rows_of_strap[k] {
            let l = self.predictor[i];
            likelihood_delta += bernoulli_loglik(l + step, labels[i]) - bernoulli_loglik(l, labels[i]);
        }

        if accept(prior_delta + likelihood_delta, rng) {
            self.strap_coef[k] = proposed;
            for &i in &layout.rows_of_strap[k] {
                self.predictor[i] += step;
            }
            self.accepted += 1;
        }
    }

    fn update_hair(&mut self, layout: &GroupLayout, labels: &[f64], rng: &mut StdRng) {
        let step: f64 = rng.sample::<f64, _>(StandardNormal) * STEP_COEF;
        let current = self.hair_coef;
        let proposed = current + step;

        let prior_delta =
            (current * current - proposed * proposed) / (2.0 * COEF_SIGMA * COEF_SIGMA);
        let mut likelihood_delta = 0.0;
        for &i in &layout.hair_rows {
            let l = self.predictor[i];
            let shifted = l + step * layout.hair[i];
            likelihood_delta += bernoulli_loglik(shifted, labels[i]) - bernoulli_loglik(l, labels[i]);
        }

        if accept(prior_delta + likelihood_delta, rng) {
            self.hair_coef = proposed;
            for &i in &layout.hair_rows {
                self.predictor[i] += step * layout.hair[i];
            }
            self.accepted += 1;
        }
    }
}

fn accept(log_ratio: f64, rng: &mut StdRng) -> bool {
    log_ratio >= 0.0 || rng.gen::<f64>().ln() < log_ratio
}

fn bernoulli_loglik(logit_p: f64, label: f64) -> f64 {
    if label > 0.5 {
        log_sigmoid(logit_p)
    } else {
        log_sigmoid(-logit_p)
    }
}

/// ln(sigmoid(x)) = -softplus(-x), computed without overflow.
fn log_sigmoid(x: f64) -> f64 {
    -softplus(-x)
}

fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn ln_beta_fn(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Lanczos approximation (g = 7), accurate to ~1e-13 over the positive axis.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507343278686905,
        -0.13857109526572012,
        9.984_369_578_019_572e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        pi.ln() - (pi * x).sin().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut acc = 0.999_999_999_999_809_9;
        for (i, &c) in COEFFS.iter().enumerate() {
            acc += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
    }
}
