//! Serving path: rank the mask catalog for one face.
//!
//! Every request scores against the `latest` artifact for the configured
//! (environment, backend) pair, via the process cache. The artifact's own
//! schema and normalization stats drive row encoding, so a query row is
//! expanded exactly the way training rows were.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;

use maskfit_model::{ModelArtifact, RawRow};

use crate::context::ServiceContext;
use crate::error::ServiceResult;
use crate::requests::InferRequest;
use crate::responses::{InferBody, WarmupBody};

/// One scored catalog entry.
#[derive(Debug, Clone)]
pub struct MaskRanking {
    pub mask_id: i64,
    pub model: String,
    pub probability: f64,
}

/// Score the catalog for the request and return the ranked body.
pub async fn run_infer(
    context: &ServiceContext,
    request: InferRequest,
) -> ServiceResult<InferBody> {
    let artifact = context
        .cache()
        .get_or_load(context.store(), context.environment(), context.backend())
        .await?;
    let rankings = rank_catalog(&artifact, &request)?;
    Ok(InferBody::from_rankings(&rankings, artifact.decision_threshold))
}

/// Rank the artifact's catalog snapshot against one measurement set.
///
/// Catalog entries outside `mask_ids` (when given) and entries without a
/// resolved perimeter are skipped. Output is sorted by descending
/// probability; ties keep catalog order.
pub fn rank_catalog(
    artifact: &ModelArtifact,
    request: &InferRequest,
) -> ServiceResult<Vec<MaskRanking>> {
    let wanted: Option<HashSet<i64>> = request
        .mask_ids
        .as_ref()
        .map(|ids| ids.iter().copied().collect());

    let eligible: Vec<_> = artifact
        .mask_catalog
        .iter()
        .filter(|entry| wanted.as_ref().map_or(true, |ids| ids.contains(&entry.id)))
        .filter(|entry| entry.has_perimeter())
        .collect();
    debug!(
        catalog = artifact.mask_catalog.len(),
        eligible = eligible.len(),
        restricted = wanted.is_some(),
        "scoring catalog"
    );
    if eligible.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<RawRow> = eligible
        .iter()
        .map(|entry| {
            RawRow::new(
                &request.measurements,
                entry.id,
                entry.style,
                entry.strap_type,
                entry.perimeter_mm,
            )
        })
        .collect();
    let probabilities = artifact.score_rows(&rows)?;

    let mut rankings: Vec<MaskRanking> = eligible
        .iter()
        .zip(probabilities)
        .map(|(entry, probability)| MaskRanking {
            mask_id: entry.id,
            model: entry.model.clone(),
            probability,
        })
        .collect();
    rankings.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(Ordering::Equal)
    });
    Ok(rankings)
}

/// Force-load the latest artifact into the cache.
pub async fn run_warmup(context: &ServiceContext) -> ServiceResult<WarmupBody> {
    let artifact = context
        .cache()
        .reload(context.store(), context.environment(), context.backend())
        .await?;
    Ok(WarmupBody {
        message: format!("{} model loaded", artifact.backend),
        backend: artifact.backend.clone(),
        run_id: artifact.run_id,
        trained_at: artifact.trained_at,
    })
}
