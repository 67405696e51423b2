//! Mask perimeter imputation via an ordered fallback chain.
//!
//! Each catalog entry without a perimeter walks the chain until a strategy
//! fires; the entry records which one did and what it matched. Source values
//! are frozen at the start of the pass: an entry imputed earlier in the pass
//! never feeds a later one, so results do not depend on catalog order.
//!
//! Chain order: same model in the same size, same model in the nearest size,
//! masks co-passed by this mask's passing users, same-style median, global
//! median, and finally `insufficient_data`.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use maskfit_core::types::{FitTestObservation, MaskCatalogEntry, MaskStyle, PerimeterSource};

/// Canonical size tokens, smallest first. Nearest-size ties resolve toward
/// the earlier entry.
pub const SIZE_RANKING: [&str; 7] = ["xs", "s", "m", "l", "xl", "xxl", "xxxl"];

/// Outcome counts for one perimeter imputation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerimeterImputationSummary {
    pub already_known: usize,
    pub base_size_exact: usize,
    pub base_size_nearest: usize,
    pub co_test: usize,
    pub style_median: usize,
    pub global_median: usize,
    pub insufficient_data: usize,
}

/// A model code split into its base name and canonical size token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModel {
    pub base: String,
    pub size: &'static str,
}

impl ParsedModel {
    fn size_rank(&self) -> usize {
        SIZE_RANKING.iter().position(|s| *s == self.size).unwrap_or(usize::MAX)
    }
}

/// Parse a model code into (base, size), e.g. `"FM-100-M"` -> (`"fm-100"`, `"m"`).
///
/// The last separator-delimited token must canonicalize to a known size;
/// otherwise the model does not participate in base-size strategies.
#[must_use]
pub fn parse_model(model: &str) -> Option<ParsedModel> {
    let tokens: Vec<&str> = model
        .split(['-', '_', ' ', '/'])
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 2 {
        return None;
    }

    let size = canonical_size(tokens[tokens.len() - 1])?;
    let base = tokens[..tokens.len() - 1].join("-").to_ascii_lowercase();
    Some(ParsedModel { base, size })
}

/// Collapse size synonyms onto the canonical ranking vocabulary.
#[must_use]
pub fn canonical_size(token: &str) -> Option<&'static str> {
    let compact: String = token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match compact.as_str() {
        "xs" | "xsmall" | "extrasmall" => Some("xs"),
        "s" | "sm" | "small" => Some("s"),
        "m" | "med" | "medium" => Some("m"),
        "l" | "lg" | "large" => Some("l"),
        "xl" | "xlarge" | "extralarge" => Some("xl"),
        "xxl" | "2xl" => Some("xxl"),
        "xxxl" | "3xl" => Some("xxxl"),
        _ => None,
    }
}

struct KnownPerimeter {
    mask_id: i64,
    model: String,
    parsed: Option<ParsedModel>,
    style: MaskStyle,
    perimeter_mm: f64,
}

/// Fill missing perimeters in place, tagging each entry with the strategy
/// that resolved it (or `insufficient_data` when none did).
pub fn impute_catalog(
    catalog: &mut [MaskCatalogEntry],
    observations: &[FitTestObservation],
) -> PerimeterImputationSummary {
    // Snapshot of source values, in catalog order.
    let known: Vec<KnownPerimeter> = catalog
        .iter()
        .filter_map(|entry| {
            entry.perimeter_mm.map(|perimeter_mm| KnownPerimeter {
                mask_id: entry.id,
                model: entry.model.clone(),
                parsed: parse_model(&entry.model),
                style: entry.style,
                perimeter_mm,
            })
        })
        .collect();

    let mut summary = PerimeterImputationSummary {
        already_known: known.len(),
        ..Default::default()
    };

    let mut resolutions: Vec<(usize, f64, PerimeterSource, String)> = Vec::new();
    let mut gaps: Vec<usize> = Vec::new();

    for (idx, entry) in catalog.iter().enumerate() {
        if entry.perimeter_mm.is_some() {
            continue;
        }

        if let Some((value, source, details)) = resolve(entry, &known, observations) {
            debug!(mask_id = entry.id, %source, value, "imputed perimeter");
            resolutions.push((idx, value, source, details));
        } else {
            gaps.push(idx);
        }
    }

    for (idx, value, source, details) in resolutions {
        match source {
            PerimeterSource::BaseSizeExact => summary.base_size_exact += 1,
            PerimeterSource::BaseSizeNearest => summary.base_size_nearest += 1,
            PerimeterSource::CoTest => summary.co_test += 1,
            PerimeterSource::StyleMedian => summary.style_median += 1,
            PerimeterSource::GlobalMedian => summary.global_median += 1,
            PerimeterSource::Existing | PerimeterSource::InsufficientData => {}
        }
        let entry = &mut catalog[idx];
        entry.perimeter_mm = Some(value);
        entry.source_tag = source;
        entry.details = Some(details);
    }

    for idx in gaps {
        summary.insufficient_data += 1;
        let entry = &mut catalog[idx];
        entry.source_tag = PerimeterSource::InsufficientData;
        entry.details = None;
    }

    info!(
        known = summary.already_known,
        unresolved = summary.insufficient_data,
        "perimeter imputation pass finished"
    );
    summary
}

fn resolve(
    entry: &MaskCatalogEntry,
    known: &[KnownPerimeter],
    observations: &[FitTestObservation],
) -> Option<(f64, PerimeterSource, String)> {
    if let Some(hit) = base_size_exact(entry, known) {
        return Some(hit);
    }
    if let Some(hit) = base_size_nearest(entry, known) {
        return Some(hit);
    }
    if let Some(hit) = co_test(entry, known, observations) {
        return Some(hit);
    }
    if let Some(hit) = style_median(entry, known) {
        return Some(hit);
    }
    global_median(known)
}

fn base_size_exact(
    entry: &MaskCatalogEntry,
    known: &[KnownPerimeter],
) -> Option<(f64, PerimeterSource, String)> {
    let target = parse_model(&entry.model)?;
    known
        .iter()
        .find(|k| {
            k.parsed
                .as_ref()
                .is_some_and(|p| p.base == target.base && p.size == target.size)
        })
        .map(|k| {
            (
                k.perimeter_mm,
                PerimeterSource::BaseSizeExact,
                format!("matched {}", k.model),
            )
        })
}

fn base_size_nearest(
    entry: &MaskCatalogEntry,
    known: &[KnownPerimeter],
) -> Option<(f64, PerimeterSource, String)> {
    let target = parse_model(&entry.model)?;
    let target_rank = target.size_rank();

    // Nearest by ordinal distance; ties go to the size ranked earlier, then
    // to catalog order within a size.
    known
        .iter()
        .filter_map(|k| {
            let parsed = k.parsed.as_ref()?;
            if parsed.base != target.base {
                return None;
            }
            let rank = parsed.size_rank();
            Some((target_rank.abs_diff(rank), rank, k))
        })
        .min_by_key(|(distance, rank, _)| (*distance, *rank))
        .map(|(_, _, k)| {
            (
                k.perimeter_mm,
                PerimeterSource::BaseSizeNearest,
                format!("nearest size from {}", k.model),
            )
        })
}

fn co_test(
    entry: &MaskCatalogEntry,
    known: &[KnownPerimeter],
    observations: &[FitTestObservation],
) -> Option<(f64, PerimeterSource, String)> {
    let passing_users: HashSet<&str> = observations
        .iter()
        .filter(|obs| obs.mask_id == entry.id && obs.label.is_some_and(|l| l.is_pass()))
        .map(|obs| obs.user_id.as_str())
        .collect();
    if passing_users.is_empty() {
        return None;
    }

    let co_passed: BTreeSet<i64> = observations
        .iter()
        .filter(|obs| {
            obs.mask_id != entry.id
                && obs.label.is_some_and(|l| l.is_pass())
                && passing_users.contains(obs.user_id.as_str())
        })
        .map(|obs| obs.mask_id)
        .collect();

    let values: Vec<f64> = co_passed
        .iter()
        .filter_map(|mask_id| {
            known
                .iter()
                .find(|k| k.mask_id == *mask_id)
                .map(|k| k.perimeter_mm)
        })
        .collect();
    if values.is_empty() {
        return None;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((
        mean,
        PerimeterSource::CoTest,
        format!("avg of {} co-passed masks", values.len()),
    ))
}

fn style_median(
    entry: &MaskCatalogEntry,
    known: &[KnownPerimeter],
) -> Option<(f64, PerimeterSource, String)> {
    let values: Vec<f64> = known
        .iter()
        .filter(|k| k.style == entry.style)
        .map(|k| k.perimeter_mm)
        .collect();
    median(&values).map(|m| {
        (
            m,
            PerimeterSource::StyleMedian,
            format!("median of {} {} masks", values.len(), entry.style),
        )
    })
}

fn global_median(known: &[KnownPerimeter]) -> Option<(f64, PerimeterSource, String)> {
    let values: Vec<f64> = known.iter().map(|k| k.perimeter_mm).collect();
    median(&values).map(|m| {
        (
            m,
            PerimeterSource::GlobalMedian,
            format!("median of {} masks", values.len()),
        )
    })
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}
