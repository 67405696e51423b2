//! Feature encoding: raw observation rows to numeric matrices.
//!
//! One deterministic function family covers both halves of the pipeline.
//! Training mode observes the batch, defines the [`FeatureSchema`], filters
//! outlier rows, and fits normalization statistics. Inference mode re-expands
//! rows against a previously fixed schema: columns absent from the row fill
//! with zero, values unknown to the schema land in the explicit unseen
//! columns, and nothing is ever dropped.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use maskfit_core::types::{FacialMeasurementSet, MaskStyle, StrapType};

use crate::error::{ModelError, ModelResult};
use crate::schema::{DiffMode, FeatureSchema, NormalizationStats};

/// Raw numeric measurement columns, in matrix order.
pub const NUMERIC_COLUMNS: [&str; 6] = [
    "nose_mm",
    "chin_mm",
    "top_cheek_mm",
    "mid_cheek_mm",
    "strap_mm",
    "facial_hair_mm",
];

/// Encoder settings fixed per training run.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub bin_width_mm: f64,
    pub diff_mode: DiffMode,
    /// Rows with any numeric z-score beyond this absolute value are dropped.
    pub z_score_limit: f64,
}

/// One observation or catalog row, before expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub mask_id: i64,
    pub style: MaskStyle,
    pub strap_type: StrapType,
    /// Values for [`NUMERIC_COLUMNS`], missing entries preserved.
    pub numeric: [Option<f64>; 6],
    /// Face seal total minus mask perimeter, when both are known.
    pub perimeter_diff_mm: Option<f64>,
}

impl RawRow {
    /// Build a row from domain values. The perimeter difference is only
    /// computed when both the seal total and the mask perimeter are known.
    #[must_use]
    pub fn new(
        measurements: &FacialMeasurementSet,
        mask_id: i64,
        style: MaskStyle,
        strap_type: StrapType,
        perimeter_mm: Option<f64>,
    ) -> Self {
        let perimeter_diff_mm = match (measurements.seal_total_mm(), perimeter_mm) {
            (Some(total), Some(perimeter)) => Some(total - perimeter),
            _ => None,
        };
        let m = measurements.as_array();
        Self {
            mask_id,
            style,
            strap_type,
            numeric: [m[0], m[1], m[2], m[3], m[4], measurements.facial_hair_mm],
            perimeter_diff_mm,
        }
    }
}

/// A fully encoded training batch.
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    pub schema: FeatureSchema,
    /// Dense matrix over surviving rows; missing values are zero-filled.
    pub matrix: Vec<Vec<f64>>,
    pub labels: Vec<f64>,
    pub stats: NormalizationStats,
    pub dropped_outliers: usize,
}

/// Bin index for a perimeter difference: `floor(diff / width)`.
#[must_use]
pub fn bin_index(diff_mm: f64, bin_width_mm: f64) -> i64 {
    (diff_mm / bin_width_mm).floor() as i64
}

/// Training-mode encoding: define the schema from the batch, drop outlier
/// rows, fit normalization statistics.
///
/// # Errors
///
/// Returns [`ModelError::EmptyDataset`] when no rows are given or none
/// survive the outlier filter, and [`ModelError::Encoding`] when rows and
/// labels disagree in length.
pub fn encode_for_training(
    rows: &[RawRow],
    labels: &[f64],
    options: &EncoderOptions,
) -> ModelResult<TrainingBatch> {
    if rows.is_empty() {
        return Err(ModelError::EmptyDataset("no rows to encode".into()));
    }
    if rows.len() != labels.len() {
        return Err(ModelError::Encoding(format!(
            "rows/labels length mismatch: {} vs {}",
            rows.len(),
            labels.len()
        )));
    }

    let schema = build_schema(rows, options);
    let kept = filter_outliers(rows, options.z_score_limit);
    if kept.is_empty() {
        return Err(ModelError::EmptyDataset(
            "every row was removed by the outlier filter".into(),
        ));
    }
    let dropped_outliers = rows.len() - kept.len();

    let index = schema.index_map();
    let matrix: Vec<Vec<f64>> = kept
        .iter()
        .map(|&i| encode_row(&rows[i], &schema, &index))
        .collect();
    let kept_labels: Vec<f64> = kept.iter().map(|&i| labels[i]).collect();
    let stats = fit_stats(rows, &kept, &schema);

    debug!(
        rows = rows.len(),
        kept = kept.len(),
        dropped_outliers,
        columns = schema.width(),
        "encoded training batch"
    );

    Ok(TrainingBatch {
        schema,
        matrix,
        labels: kept_labels,
        stats,
        dropped_outliers,
    })
}

/// Inference-mode encoding: re-expand rows against a fixed schema.
///
/// Never drops a row. Values the schema has no column for activate the
/// corresponding unseen column; missing values stay zero.
#[must_use]
pub fn encode_for_inference(rows: &[RawRow], schema: &FeatureSchema) -> Vec<Vec<f64>> {
    let index = schema.index_map();
    rows.iter().map(|row| encode_row(row, schema, &index)).collect()
}

fn encode_row(row: &RawRow, schema: &FeatureSchema, index: &HashMap<&str, usize>) -> Vec<f64> {
    let mut out = vec![0.0; schema.width()];

    for (i, col) in NUMERIC_COLUMNS.iter().enumerate() {
        if let (Some(&j), Some(v)) = (index.get(*col), row.numeric[i]) {
            out[j] = v;
        }
    }

    if let Some(diff) = row.perimeter_diff_mm {
        if let Some(idx) = schema.clamp_bin(bin_index(diff, schema.bin_width_mm)) {
            match schema.diff_mode {
                DiffMode::OneHot => {
                    let name = format!("perimeter_diff_bin_{}", idx);
                    if let Some(&j) = index.get(name.as_str()) {
                        out[j] = 1.0;
                    }
                }
                DiffMode::Index => {
                    if let Some(&j) = index.get("perimeter_diff_bin") {
                        out[j] = idx as f64;
                    }
                }
            }
        }
    }

    set_one_hot(&mut out, index, &format!("mask_{}", row.mask_id), "mask_unseen");
    set_one_hot(&mut out, index, &format!("style_{}", row.style.as_str()), "style_unseen");
    set_one_hot(
        &mut out,
        index,
        &format!("strap_{}", row.strap_type.as_str()),
        "strap_unseen",
    );

    out
}

fn set_one_hot(
    out: &mut [f64],
    index: &HashMap<&str, usize>,
    column: &str,
    unseen_column: &str,
) {
    if let Some(&j) = index.get(column) {
        out[j] = 1.0;
    } else if let Some(&j) = index.get(unseen_column) {
        out[j] = 1.0;
    }
}

fn build_schema(rows: &[RawRow], options: &EncoderOptions) -> FeatureSchema {
    let mut bins: BTreeSet<i64> = BTreeSet::new();
    let mut mask_ids: BTreeSet<i64> = BTreeSet::new();
    let mut styles: HashSet<MaskStyle> = HashSet::new();
    let mut straps: HashSet<StrapType> = HashSet::new();

    for row in rows {
        if let Some(diff) = row.perimeter_diff_mm {
            bins.insert(bin_index(diff, options.bin_width_mm));
        }
        mask_ids.insert(row.mask_id);
        styles.insert(row.style);
        straps.insert(row.strap_type);
    }

    let mut columns: Vec<String> = NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect();
    let numeric_columns = columns.clone();

    let bin_min = bins.iter().next().copied();
    let bin_max = bins.iter().next_back().copied();
    match options.diff_mode {
        DiffMode::OneHot => {
            // Contiguous range between the observed extremes; the edge bins
            // absorb out-of-range differences at inference.
            if let (Some(lo), Some(hi)) = (bin_min, bin_max) {
                for idx in lo..=hi {
                    columns.push(format!("perimeter_diff_bin_{}", idx));
                }
            }
        }
        DiffMode::Index => columns.push("perimeter_diff_bin".to_string()),
    }

    for id in &mask_ids {
        columns.push(format!("mask_{}", id));
    }
    columns.push("mask_unseen".to_string());

    for style in MaskStyle::ALL.iter().filter(|s| styles.contains(s)) {
        columns.push(format!("style_{}", style.as_str()));
    }
    columns.push("style_unseen".to_string());

    for strap in StrapType::ALL.iter().filter(|s| straps.contains(s)) {
        columns.push(format!("strap_{}", strap.as_str()));
    }
    columns.push("strap_unseen".to_string());

    FeatureSchema {
        columns,
        numeric_columns,
        diff_mode: options.diff_mode,
        bin_width_mm: options.bin_width_mm,
        bin_min,
        bin_max,
    }
}

/// Indices of rows surviving the z-score filter.
///
/// Z-scores are computed per numeric column over present values; a missing
/// value can never cause a drop.
fn filter_outliers(rows: &[RawRow], limit: f64) -> Vec<usize> {
    let mut keep = vec![true; rows.len()];

    for col in 0..NUMERIC_COLUMNS.len() {
        let present: Vec<f64> = rows.iter().filter_map(|r| r.numeric[col]).collect();
        if present.len() < 2 {
            continue;
        }
        let mean = present.iter().sum::<f64>() / present.len() as f64;
        let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / present.len() as f64;
        let std = var.sqrt();
        if std <= 1e-12 {
            continue;
        }

        for (i, row) in rows.iter().enumerate() {
            if let Some(v) = row.numeric[col] {
                if ((v - mean) / std).abs() > limit {
                    keep[i] = false;
                }
            }
        }
    }

    keep.iter()
        .enumerate()
        .filter(|(_, &k)| k)
        .map(|(i, _)| i)
        .collect()
}

/// Normalization statistics over the surviving rows, present values only.
fn fit_stats(rows: &[RawRow], kept: &[usize], schema: &FeatureSchema) -> NormalizationStats {
    let mut mean = Vec::with_capacity(schema.numeric_columns.len());
    let mut std = Vec::with_capacity(schema.numeric_columns.len());

    for col in 0..NUMERIC_COLUMNS.len() {
        let present: Vec<f64> = kept.iter().filter_map(|&i| rows[i].numeric[col]).collect();
        if present.is_empty() {
            mean.push(0.0);
            std.push(0.0);
            continue;
        }
        let m = present.iter().sum::<f64>() / present.len() as f64;
        let v = present.iter().map(|x| (x - m).powi(2)).sum::<f64>() / present.len() as f64;
        mean.push(m);
        std.push(v.sqrt());
    }

    NormalizationStats {
        columns: schema.numeric_columns.clone(),
        mean,
        std,
    }
}
