//! Core domain types for the fit-probability pipeline.
//!
//! Everything downstream (imputation, encoding, training, inference) operates
//! on the types defined here. Parsing from loose JSON lives next to each type
//! so the training path and the inference path read fields identically.

use serde::{Deserialize, Serialize};

/// Number of per-user facial measurement dimensions.
pub const MEASUREMENT_DIMS: usize = 5;

/// Canonical measurement field names, in dimension order.
pub const MEASUREMENT_DIM_NAMES: [&str; MEASUREMENT_DIMS] =
    ["nose_mm", "chin_mm", "top_cheek_mm", "mid_cheek_mm", "strap_mm"];

/// Per-user aggregate facial distances, in millimeters.
///
/// Fields are `None` until measured or imputed. `is_actual` records
/// provenance: `true` for scanner-measured sets, `false` once any field was
/// filled by cross-user imputation. Actual values are never overwritten.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FacialMeasurementSet {
    pub nose_mm: Option<f64>,
    pub chin_mm: Option<f64>,
    pub top_cheek_mm: Option<f64>,
    pub mid_cheek_mm: Option<f64>,
    pub strap_mm: Option<f64>,
    /// True when every present value came from a real scan.
    pub is_actual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facial_hair_mm: Option<f64>,
}

impl FacialMeasurementSet {
    /// Read measurement fields out of a loose JSON object.
    ///
    /// Accepts the canonical `_mm` names plus the bare aliases used by older
    /// exports. Numeric strings are tolerated. `is_actual` defaults to true
    /// whenever at least one dimension is present, unless the object carries
    /// an explicit `is_actual` flag.
    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let nose_mm = read_mm(map, &["nose_mm", "nose", "face_seal_nose_mm"]);
        let chin_mm = read_mm(map, &["chin_mm", "chin"]);
        let top_cheek_mm = read_mm(map, &["top_cheek_mm", "top_cheek"]);
        let mid_cheek_mm = read_mm(map, &["mid_cheek_mm", "mid_cheek"]);
        let strap_mm = read_mm(map, &["strap_mm", "strap"]);
        let facial_hair_mm = read_mm(
            map,
            &["facial_hair_beard_length_mm", "facial_hair_mm", "beard_length_mm"],
        );

        let any_present = nose_mm.is_some()
            || chin_mm.is_some()
            || top_cheek_mm.is_some()
            || mid_cheek_mm.is_some()
            || strap_mm.is_some();

        let is_actual = match map.get("is_actual").and_then(serde_json::Value::as_bool) {
            Some(flag) => flag,
            None => any_present,
        };

        Self {
            nose_mm,
            chin_mm,
            top_cheek_mm,
            mid_cheek_mm,
            strap_mm,
            is_actual,
            facial_hair_mm,
        }
    }

    /// Measurement dimensions as an ordered array (see [`MEASUREMENT_DIM_NAMES`]).
    #[must_use]
    pub fn as_array(&self) -> [Option<f64>; MEASUREMENT_DIMS] {
        [
            self.nose_mm,
            self.chin_mm,
            self.top_cheek_mm,
            self.mid_cheek_mm,
            self.strap_mm,
        ]
    }

    /// Fill one dimension only if it is currently missing.
    pub fn fill_dim(&mut self, idx: usize, value: f64) {
        let slot = match idx {
            0 => &mut self.nose_mm,
            1 => &mut self.chin_mm,
            2 => &mut self.top_cheek_mm,
            3 => &mut self.mid_cheek_mm,
            4 => &mut self.strap_mm,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// True when all five dimensions are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.as_array().iter().all(Option::is_some)
    }

    /// Summed face-seal distance: nose + chin + both cheek aggregates.
    ///
    /// `None` when any seal-relevant dimension is missing. The strap
    /// measurement sizes the harness, not the seal, and is excluded.
    #[must_use]
    pub fn seal_total_mm(&self) -> Option<f64> {
        Some(self.nose_mm? + self.chin_mm? + self.top_cheek_mm? + self.mid_cheek_mm?)
    }
}

fn read_mm(map: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(value) = map.get(*key) {
            if let Some(parsed) = json_f64(value) {
                return Some(parsed);
            }
        }
    }
    None
}

/// Extract an f64 from a JSON number or numeric string.
#[must_use]
pub fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Extract an i64 from a JSON number or numeric string.
#[must_use]
pub fn json_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Physical mask style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskStyle {
    Cup,
    Duckbill,
    Bifold,
    #[serde(rename = "Bifold+Gasket")]
    BifoldGasket,
    Boat,
    Adhesive,
    Elastomeric,
}

impl MaskStyle {
    /// All styles, in canonical order.
    pub const ALL: [MaskStyle; 7] = [
        MaskStyle::Cup,
        MaskStyle::Duckbill,
        MaskStyle::Bifold,
        MaskStyle::BifoldGasket,
        MaskStyle::Boat,
        MaskStyle::Adhesive,
        MaskStyle::Elastomeric,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskStyle::Cup => "Cup",
            MaskStyle::Duckbill => "Duckbill",
            MaskStyle::Bifold => "Bifold",
            MaskStyle::BifoldGasket => "Bifold+Gasket",
            MaskStyle::Boat => "Boat",
            MaskStyle::Adhesive => "Adhesive",
            MaskStyle::Elastomeric => "Elastomeric",
        }
    }

    /// Parse a loosely-formatted style token (case, spacing, and separator
    /// insensitive). Returns `None` for unrecognized styles.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match compact_token(raw).as_str() {
            "cup" => Some(MaskStyle::Cup),
            "duckbill" => Some(MaskStyle::Duckbill),
            "bifold" => Some(MaskStyle::Bifold),
            "bifoldgasket" | "gasketbifold" => Some(MaskStyle::BifoldGasket),
            "boat" => Some(MaskStyle::Boat),
            "adhesive" => Some(MaskStyle::Adhesive),
            "elastomeric" => Some(MaskStyle::Elastomeric),
            _ => None,
        }
    }
}

impl std::fmt::Display for MaskStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mask strap mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrapType {
    Earloop,
    #[serde(rename = "Adjustable Earloop")]
    AdjustableEarloop,
    Headstrap,
    #[serde(rename = "Adjustable Headstrap")]
    AdjustableHeadstrap,
    Strapless,
}

impl StrapType {
    /// All strap types, in canonical order.
    pub const ALL: [StrapType; 5] = [
        StrapType::Earloop,
        StrapType::AdjustableEarloop,
        StrapType::Headstrap,
        StrapType::AdjustableHeadstrap,
        StrapType::Strapless,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StrapType::Earloop => "Earloop",
            StrapType::AdjustableEarloop => "Adjustable Earloop",
            StrapType::Headstrap => "Headstrap",
            StrapType::AdjustableHeadstrap => "Adjustable Headstrap",
            StrapType::Strapless => "Strapless",
        }
    }

    /// Parse a loosely-formatted strap token. Returns `None` when unknown.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match compact_token(raw).as_str() {
            "earloop" | "earloops" => Some(StrapType::Earloop),
            "adjustableearloop" | "adjustableearloops" => Some(StrapType::AdjustableEarloop),
            "headstrap" | "headstraps" => Some(StrapType::Headstrap),
            "adjustableheadstrap" | "adjustableheadstraps" => Some(StrapType::AdjustableHeadstrap),
            "strapless" | "none" => Some(StrapType::Strapless),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn compact_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// How a mask's perimeter value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerimeterSource {
    /// Present in the source data; never imputed.
    Existing,
    /// Copied from the same base model in the same size.
    BaseSizeExact,
    /// Copied from the same base model in the nearest size.
    BaseSizeNearest,
    /// Averaged from masks co-passed by this mask's passing users.
    CoTest,
    /// Median over same-style masks.
    StyleMedian,
    /// Median over the whole catalog.
    GlobalMedian,
    /// No strategy resolved a value; excluded from feature encoding.
    InsufficientData,
}

impl PerimeterSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PerimeterSource::Existing => "existing",
            PerimeterSource::BaseSizeExact => "base_size_exact",
            PerimeterSource::BaseSizeNearest => "base_size_nearest",
            PerimeterSource::CoTest => "co_test",
            PerimeterSource::StyleMedian => "style_median",
            PerimeterSource::GlobalMedian => "global_median",
            PerimeterSource::InsufficientData => "insufficient_data",
        }
    }
}

impl std::fmt::Display for PerimeterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized fit-test outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitLabel {
    Pass,
    Fail,
}

impl FitLabel {
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, FitLabel::Pass)
    }

    /// Binary target value: pass = 1.0, fail = 0.0.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            FitLabel::Pass => 1.0,
            FitLabel::Fail => 0.0,
        }
    }
}

/// One mask in the recommendation catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskCatalogEntry {
    /// Stable mask identifier.
    pub id: i64,
    /// Manufacturer model code, used for base-size perimeter lookups.
    #[serde(default)]
    pub model: String,
    pub style: MaskStyle,
    pub strap_type: StrapType,
    /// Sealing-edge length in millimeters; `None` until imputed.
    pub perimeter_mm: Option<f64>,
    pub source_tag: PerimeterSource,
    /// Which reference the imputation strategy matched, when one fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MaskCatalogEntry {
    /// True when this entry may participate in feature encoding.
    #[must_use]
    pub fn has_perimeter(&self) -> bool {
        self.perimeter_mm.is_some() && self.source_tag != PerimeterSource::InsufficientData
    }
}

/// One labeled fit test: the atomic training unit. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitTestObservation {
    pub user_id: String,
    pub mask_id: i64,
    /// Normalized outcome; `None` means the raw label was unrecognizable.
    pub label: Option<FitLabel>,
    pub measurements: FacialMeasurementSet,
    /// Mask attributes as recorded at test time.
    pub style: MaskStyle,
    pub strap_type: StrapType,
    pub perimeter_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_measurements() -> FacialMeasurementSet {
        FacialMeasurementSet {
            nose_mm: Some(55.0),
            chin_mm: Some(80.0),
            top_cheek_mm: Some(95.0),
            mid_cheek_mm: Some(75.0),
            strap_mm: Some(320.0),
            is_actual: true,
            facial_hair_mm: None,
        }
    }

    #[test]
    fn test_seal_total_excludes_strap() {
        let m = create_test_measurements();
        assert_eq!(m.seal_total_mm(), Some(305.0));
    }

    #[test]
    fn test_seal_total_requires_all_face_dims() {
        let mut m = create_test_measurements();
        m.chin_mm = None;
        assert_eq!(m.seal_total_mm(), None);
    }

    #[test]
    fn test_completeness_requires_all_five_dims() {
        let mut m = create_test_measurements();
        assert!(m.is_complete());
        m.strap_mm = None;
        assert!(!m.is_complete());
    }

    #[test]
    fn test_fill_dim_never_overwrites() {
        let mut m = create_test_measurements();
        m.fill_dim(0, 99.0);
        assert_eq!(m.nose_mm, Some(55.0));

        m.nose_mm = None;
        m.fill_dim(0, 99.0);
        assert_eq!(m.nose_mm, Some(99.0));
    }

    #[test]
    fn test_from_json_map_accepts_aliases_and_numeric_strings() {
        let doc = serde_json::json!({
            "nose": "55.5",
            "chin_mm": 80,
            "top_cheek": 95.0,
            "mid_cheek_mm": 75.0,
            "facial_hair_beard_length_mm": 4.0
        });
        let m = FacialMeasurementSet::from_json_map(doc.as_object().unwrap());
        assert_eq!(m.nose_mm, Some(55.5));
        assert_eq!(m.chin_mm, Some(80.0));
        assert_eq!(m.facial_hair_mm, Some(4.0));
        assert_eq!(m.strap_mm, None);
        assert!(m.is_actual);
    }

    #[test]
    fn test_from_json_map_honors_explicit_is_actual() {
        let doc = serde_json::json!({ "nose_mm": 55.0, "is_actual": false });
        let m = FacialMeasurementSet::from_json_map(doc.as_object().unwrap());
        assert!(!m.is_actual);
    }

    #[test]
    fn test_empty_json_map_is_not_actual() {
        let doc = serde_json::json!({});
        let m = FacialMeasurementSet::from_json_map(doc.as_object().unwrap());
        assert!(!m.is_actual);
        assert!(!m.is_complete());
    }

    #[test]
    fn test_style_parse_tolerates_formatting() {
        assert_eq!(MaskStyle::parse("Bifold + Gasket"), Some(MaskStyle::BifoldGasket));
        assert_eq!(MaskStyle::parse("bifold+gasket"), Some(MaskStyle::BifoldGasket));
        assert_eq!(MaskStyle::parse("DUCKBILL"), Some(MaskStyle::Duckbill));
        assert_eq!(MaskStyle::parse("cone"), None);
    }

    #[test]
    fn test_strap_parse_tolerates_formatting() {
        assert_eq!(
            StrapType::parse("adjustable_headstrap"),
            Some(StrapType::AdjustableHeadstrap)
        );
        assert_eq!(StrapType::parse("Ear Loop"), Some(StrapType::Earloop));
        assert_eq!(StrapType::parse("velcro"), None);
    }

    #[test]
    fn test_style_serde_uses_display_vocabulary() {
        let json = serde_json::to_string(&MaskStyle::BifoldGasket).unwrap();
        assert_eq!(json, "\"Bifold+Gasket\"");
        let back: MaskStyle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MaskStyle::BifoldGasket);
    }

    #[test]
    fn test_perimeter_source_snake_case() {
        let json = serde_json::to_string(&PerimeterSource::BaseSizeExact).unwrap();
        assert_eq!(json, "\"base_size_exact\"");
        assert_eq!(PerimeterSource::InsufficientData.as_str(), "insufficient_data");
    }

    #[test]
    fn test_catalog_entry_encoding_eligibility() {
        let entry = MaskCatalogEntry {
            id: 1,
            model: "FM-100-M".to_string(),
            style: MaskStyle::Cup,
            strap_type: StrapType::Headstrap,
            perimeter_mm: Some(300.0),
            source_tag: PerimeterSource::Existing,
            details: None,
        };
        assert!(entry.has_perimeter());

        let gap = MaskCatalogEntry {
            perimeter_mm: None,
            source_tag: PerimeterSource::InsufficientData,
            ..entry
        };
        assert!(!gap.has_perimeter());
    }

    #[test]
    fn test_fit_label_target_values() {
        assert_eq!(FitLabel::Pass.as_f64(), 1.0);
        assert_eq!(FitLabel::Fail.as_f64(), 0.0);
        assert!(FitLabel::Pass.is_pass());
    }
}
