//! Cross-user facial measurement imputation.
//!
//! Users without a complete measurement set borrow values from similar users.
//! Similarity is defined over fit-test outcomes: two users who pass and fail
//! the same masks likely have similar faces. Each user becomes a sparse
//! vector over masks (`+1` pass, `-1` fail, `0` untested); cosine similarity
//! is computed only over the dimensions the target user actually tested, so
//! a prolific donor is not penalized for extra tests the target never took.
//!
//! Imputation fills gaps and nothing else: measured values are never
//! overwritten, and a user with no qualifying donor keeps their gaps rather
//! than receiving a default.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use maskfit_core::config::ImputationConfig;
use maskfit_core::types::{FacialMeasurementSet, FitTestObservation, MEASUREMENT_DIMS};

/// Outcome counts for one imputation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeasurementImputationSummary {
    pub users_total: usize,
    pub users_complete: usize,
    pub users_imputed: usize,
    pub users_unresolved: usize,
}

/// Batch imputer for per-user facial measurement aggregates.
#[derive(Debug, Clone)]
pub struct MeasurementImputer {
    donor_k: usize,
    similarity_floor: f64,
}

struct UserProfile {
    user_id: String,
    /// mask_id -> +1.0 (pass) / -1.0 (fail); later tests overwrite earlier.
    outcomes: HashMap<i64, f64>,
    measurements: FacialMeasurementSet,
    observation_indices: Vec<usize>,
    saw_measurements: bool,
}

impl MeasurementImputer {
    #[must_use]
    pub fn new(config: &ImputationConfig) -> Self {
        Self {
            donor_k: config.donor_k,
            similarity_floor: config.similarity_floor,
        }
    }

    /// Run one batch imputation pass over the observations, filling missing
    /// measurement dimensions in place.
    ///
    /// Observations are grouped by user; the per-user set is the union of
    /// that user's snapshots. Filled users have every observation updated and
    /// marked `is_actual = false`.
    pub fn impute(&self, observations: &mut [FitTestObservation]) -> MeasurementImputationSummary {
        let profiles = build_profiles(observations);
        let mut summary = MeasurementImputationSummary {
            users_total: profiles.len(),
            ..Default::default()
        };

        // Donor pool is fixed up front: only fully-measured users donate, so
        // imputed values never cascade into later targets within a pass.
        let donor_indices: Vec<usize> = profiles
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.measurements.is_complete()
                    && p.measurements.is_actual
                    && !p.outcomes.is_empty()
            })
            .map(|(i, _)| i)
            .collect();

        let mut fills: Vec<(usize, FacialMeasurementSet)> = Vec::new();

        for (target_idx, target) in profiles.iter().enumerate() {
            if target.measurements.is_complete() {
                summary.users_complete += 1;
                continue;
            }

            let Some(filled) = self.impute_user(target, &profiles, &donor_indices, target_idx)
            else {
                summary.users_unresolved += 1;
                continue;
            };

            summary.users_imputed += 1;
            fills.push((target_idx, filled));
        }

        for (profile_idx, filled) in fills {
            let profile = &profiles[profile_idx];
            for &obs_idx in &profile.observation_indices {
                let set = &mut observations[obs_idx].measurements;
                for (dim, value) in filled.as_array().iter().enumerate() {
                    if let Some(value) = value {
                        set.fill_dim(dim, *value);
                    }
                }
                set.is_actual = false;
            }
        }

        info!(
            users = summary.users_total,
            imputed = summary.users_imputed,
            unresolved = summary.users_unresolved,
            "measurement imputation pass finished"
        );
        summary
    }

    /// Impute one user's missing dimensions. Returns the filled set, or
    /// `None` when no qualifying donor carries any weight.
    fn impute_user(
        &self,
        target: &UserProfile,
        profiles: &[UserProfile],
        donor_indices: &[usize],
        target_idx: usize,
    ) -> Option<FacialMeasurementSet> {
        if target.outcomes.is_empty() {
            return None;
        }

        let mut scored: Vec<(f64, usize)> = donor_indices
            .iter()
            .filter(|&&i| i != target_idx)
            .filter(|&&i| {
                target
                    .outcomes
                    .keys()
                    .any(|mask| profiles[i].outcomes.contains_key(mask))
            })
            .map(|&i| (restricted_cosine(&target.outcomes, &profiles[i].outcomes), i))
            .filter(|(sim, _)| *sim >= self.similarity_floor)
            .collect();

        // Stable sort keeps first-seen user order on similarity ties.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.donor_k);

        let total_weight: f64 = scored.iter().map(|(sim, _)| sim).sum();
        if scored.is_empty() || total_weight <= 0.0 {
            debug!(user = %target.user_id, donors = scored.len(), "no donor weight, leaving gaps");
            return None;
        }

        let mut filled = target.measurements.clone();
        for dim in 0..MEASUREMENT_DIMS {
            if filled.as_array()[dim].is_some() {
                continue;
            }
            let weighted: f64 = scored
                .iter()
                .filter_map(|(sim, i)| {
                    profiles[*i].measurements.as_array()[dim].map(|v| sim * v)
                })
                .sum();
            filled.fill_dim(dim, weighted / total_weight);
        }
        filled.is_actual = false;

        debug!(
            user = %target.user_id,
            donors = scored.len(),
            top_similarity = scored.first().map(|(s, _)| *s).unwrap_or(0.0),
            "imputed measurements from donors"
        );
        Some(filled)
    }
}

/// Cosine similarity restricted to the target's tested dimensions.
///
/// The donor contributes zero for masks it never tested; norms are taken over
/// the restricted dimensions only.
fn restricted_cosine(target: &HashMap<i64, f64>, donor: &HashMap<i64, f64>) -> f64 {
    let mut dot = 0.0;
    let mut norm_t = 0.0;
    let mut norm_d = 0.0;

    for (mask_id, t) in target {
        let d = donor.get(mask_id).copied().unwrap_or(0.0);
        dot += t * d;
        norm_t += t * t;
        norm_d += d * d;
    }

    let denom = norm_t.sqrt() * norm_d.sqrt();
    if denom < 1e-8 {
        0.0
    } else {
        dot / denom
    }
}

fn build_profiles(observations: &[FitTestObservation]) -> Vec<UserProfile> {
    let mut by_user: HashMap<String, usize> = HashMap::new();
    let mut profiles: Vec<UserProfile> = Vec::new();

    for (obs_idx, obs) in observations.iter().enumerate() {
        let profile_idx = match by_user.get(obs.user_id.as_str()) {
            Some(&i) => i,
            None => {
                let i = profiles.len();
                by_user.insert(obs.user_id.clone(), i);
                profiles.push(UserProfile {
                    user_id: obs.user_id.clone(),
                    outcomes: HashMap::new(),
                    measurements: FacialMeasurementSet::default(),
                    observation_indices: Vec::new(),
                    saw_measurements: false,
                });
                i
            }
        };

        let profile = &mut profiles[profile_idx];
        profile.observation_indices.push(obs_idx);

        if let Some(label) = obs.label {
            profile.outcomes.insert(obs.mask_id, if label.is_pass() { 1.0 } else { -1.0 });
        }

        let arr = obs.measurements.as_array();
        let any_present = arr.iter().any(Option::is_some);
        for (dim, value) in arr.iter().enumerate() {
            if let Some(value) = value {
                profile.measurements.fill_dim(dim, *value);
            }
        }
        if profile.measurements.facial_hair_mm.is_none() {
            profile.measurements.facial_hair_mm = obs.measurements.facial_hair_mm;
        }
        if any_present {
            // The merged set counts as measured only if every contributing
            // snapshot was.
            if profile.saw_measurements {
                profile.measurements.is_actual &= obs.measurements.is_actual;
            } else {
                profile.measurements.is_actual = obs.measurements.is_actual;
                profile.saw_measurements = true;
            }
        }
    }

    profiles
}
