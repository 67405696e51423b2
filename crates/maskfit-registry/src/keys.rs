//! Canonical registry key layout.
//!
//! Every artifact lives under an `{environment}/{backend}` prefix. Each
//! training run writes an immutable timestamped model and metrics pair, then
//! repoints the `_latest` aliases that serving reads.

use chrono::{DateTime, Utc};

/// Timestamp format used in versioned keys, sortable lexicographically.
const VERSION_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[must_use]
pub fn prefix(environment: &str, backend: &str) -> String {
    format!("{}/{}", environment, backend)
}

#[must_use]
pub fn model_latest(environment: &str, backend: &str) -> String {
    format!("{}/fit_classifier_latest.bin", prefix(environment, backend))
}

#[must_use]
pub fn model_versioned(environment: &str, backend: &str, trained_at: &DateTime<Utc>) -> String {
    format!(
        "{}/fit_classifier_{}.bin",
        prefix(environment, backend),
        trained_at.format(VERSION_FORMAT)
    )
}

#[must_use]
pub fn metrics_latest(environment: &str, backend: &str) -> String {
    format!("{}/metrics_latest.json", prefix(environment, backend))
}

#[must_use]
pub fn metrics_versioned(environment: &str, backend: &str, trained_at: &DateTime<Utc>) -> String {
    format!(
        "{}/metrics_{}.json",
        prefix(environment, backend),
        trained_at.format(VERSION_FORMAT)
    )
}

#[must_use]
pub fn catalog_latest(environment: &str, backend: &str) -> String {
    format!("{}/mask_data_latest.json", prefix(environment, backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_layout() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(
            model_latest("prod", "gradient"),
            "prod/gradient/fit_classifier_latest.bin"
        );
        assert_eq!(
            model_versioned("prod", "gradient", &ts),
            "prod/gradient/fit_classifier_20240307T140509Z.bin"
        );
        assert_eq!(
            metrics_versioned("staging", "forest", &ts),
            "staging/forest/metrics_20240307T140509Z.json"
        );
        assert_eq!(metrics_latest("staging", "forest"), "staging/forest/metrics_latest.json");
        assert_eq!(
            catalog_latest("prod", "hierarchical"),
            "prod/hierarchical/mask_data_latest.json"
        );
    }

    #[test]
    fn test_versioned_keys_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 11, 2, 1, 0, 0).unwrap();
        assert!(model_versioned("e", "b", &earlier) < model_versioned("e", "b", &later));
    }
}
