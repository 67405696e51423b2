//! Feature schema and normalization statistics.
//!
//! The schema is fixed at training time and shipped inside the artifact;
//! inference re-expands every row against this exact ordered column list.
//! That re-expansion, not shared code paths, is what guarantees train/infer
//! feature parity across process and machine boundaries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How the perimeter difference enters the feature matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// One column per observed bin, hot where the row's difference lands.
    OneHot,
    /// A single numeric column carrying the bin index.
    Index,
}

/// Ordered feature column list plus the binning parameters that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Every feature column, in matrix order.
    pub columns: Vec<String>,
    /// Columns subject to normalization (raw numeric measurements).
    pub numeric_columns: Vec<String>,
    pub diff_mode: DiffMode,
    pub bin_width_mm: f64,
    /// Lowest observed bin index; differences below it clamp here (open tail).
    pub bin_min: Option<i64>,
    /// Highest observed bin index; differences above it clamp here (open tail).
    pub bin_max: Option<i64>,
}

impl FeatureSchema {
    /// Number of feature columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Column name -> index map for hot paths.
    #[must_use]
    pub fn index_map(&self) -> HashMap<&str, usize> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect()
    }

    /// Clamp a raw bin index into the observed range (open-ended tails).
    #[must_use]
    pub fn clamp_bin(&self, idx: i64) -> Option<i64> {
        match (self.bin_min, self.bin_max) {
            (Some(lo), Some(hi)) => Some(idx.clamp(lo, hi)),
            _ => None,
        }
    }
}

/// Per-column mean and standard deviation for the numeric features.
///
/// Fitted over the post-filter training matrix, on present values only, and
/// applied identically at train and inference time. One-hot and bin columns
/// are never touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl NormalizationStats {
    /// Standardize the listed columns in place: `(x - mean) / std`.
    ///
    /// A column with zero spread maps to 0.0 everywhere.
    pub fn apply(&self, schema: &FeatureSchema, matrix: &mut [Vec<f64>]) {
        for (stat_idx, column) in self.columns.iter().enumerate() {
            let Some(col_idx) = schema.index_of(column) else {
                continue;
            };
            let mean = self.mean[stat_idx];
            let std = self.std[stat_idx];
            for row in matrix.iter_mut() {
                row[col_idx] = if std > 1e-12 {
                    (row[col_idx] - mean) / std
                } else {
                    0.0
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_schema() -> FeatureSchema {
        FeatureSchema {
            columns: vec![
                "nose_mm".to_string(),
                "perimeter_diff_bin_-1".to_string(),
                "perimeter_diff_bin_0".to_string(),
                "mask_1".to_string(),
                "mask_unseen".to_string(),
            ],
            numeric_columns: vec!["nose_mm".to_string()],
            diff_mode: DiffMode::OneHot,
            bin_width_mm: 10.0,
            bin_min: Some(-1),
            bin_max: Some(0),
        }
    }

    #[test]
    fn test_index_lookup() {
        let schema = create_test_schema();
        assert_eq!(schema.index_of("mask_1"), Some(3));
        assert_eq!(schema.index_of("mask_2"), None);
        assert_eq!(schema.index_map()["mask_unseen"], 4);
        assert_eq!(schema.width(), 5);
    }

    #[test]
    fn test_clamp_bin_open_tails() {
        let schema = create_test_schema();
        assert_eq!(schema.clamp_bin(-7), Some(-1));
        assert_eq!(schema.clamp_bin(0), Some(0));
        assert_eq!(schema.clamp_bin(12), Some(0));
    }

    #[test]
    fn test_normalization_applies_to_numeric_only() {
        let schema = create_test_schema();
        let stats = NormalizationStats {
            columns: vec!["nose_mm".to_string()],
            mean: vec![50.0],
            std: vec![5.0],
        };

        let mut matrix = vec![vec![60.0, 0.0, 1.0, 1.0, 0.0]];
        stats.apply(&schema, &mut matrix);

        assert!((matrix[0][0] - 2.0).abs() < 1e-12);
        assert_eq!(matrix[0][2], 1.0);
        assert_eq!(matrix[0][3], 1.0);
    }

    #[test]
    fn test_zero_spread_column_maps_to_zero() {
        let schema = create_test_schema();
        let stats = NormalizationStats {
            columns: vec!["nose_mm".to_string()],
            mean: vec![50.0],
            std: vec![0.0],
        };

        let mut matrix = vec![vec![50.0, 0.0, 0.0, 0.0, 0.0]];
        stats.apply(&schema, &mut matrix);
        assert_eq!(matrix[0][0], 0.0);
    }

    #[test]
    fn test_schema_round_trips_through_json() {
        let schema = create_test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: FeatureSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
