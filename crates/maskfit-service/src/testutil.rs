//! Shared constructors for service tests: isolated contexts over in-memory
//! stores, and synthetic fit-test datasets written to temp files.

use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::NamedTempFile;

use maskfit_core::config::Config;
use maskfit_registry::{MemoryBlobStore, ModelCache};

use crate::context::ServiceContext;

/// Context with its own store and cache, so tests never share state.
/// Training knobs are turned down to keep runs fast.
pub(crate) fn create_test_context(backend: &str) -> ServiceContext {
    let mut config = Config::default_config();
    config.environment = "test".to_string();
    config.registry.backend = "memory".to_string();
    config.training.backend = backend.to_string();
    config.training.epochs = 15;
    config.training.trees = 25;
    config.training.mcmc_draws = 400;
    config.training.mcmc_burn_in = 100;
    ServiceContext::new(
        config,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(ModelCache::new()),
    )
}

/// The five-mask catalog every synthetic dataset draws from.
///
/// Mask 5 deliberately ships without a perimeter; the imputer resolves it
/// from its FM-200 sibling.
fn mask_attributes(mask_id: i64) -> (&'static str, &'static str, &'static str, Option<f64>) {
    match mask_id {
        1 => ("FM-100-S", "Cup", "Earloop", Some(290.0)),
        2 => ("FM-100-M", "Cup", "Earloop", Some(305.0)),
        3 => ("FM-100-L", "Cup", "Headstrap", Some(320.0)),
        4 => ("FM-200-M", "Duckbill", "Headstrap", Some(310.0)),
        _ => ("FM-200-L", "Duckbill", "Adjustable Headstrap", None),
    }
}

fn seal_step(user: usize) -> f64 {
    (user % 7) as f64
}

fn user_measurements(user: usize) -> (f64, f64, f64, f64) {
    let step = seal_step(user);
    (48.0 + step * 1.5, 80.0 + step * 2.0, 95.0 + step * 1.5, 72.0 + step)
}

/// One synthetic fit-test record. Labels follow seal-versus-perimeter
/// distance, with the true (unimputed) perimeter of mask 5 included, and
/// rotate through the accepted pass/fail spellings.
fn test_record(idx: usize) -> Value {
    let user = idx / 5;
    let mask_id = 1 + (idx % 5) as i64;
    let (model, style, strap_type, perimeter) = mask_attributes(mask_id);
    let (nose, chin, top_cheek, mid_cheek) = user_measurements(user);
    let seal = nose + chin + top_cheek + mid_cheek;

    let true_perimeter = perimeter.unwrap_or(318.0);
    let passed = (seal - true_perimeter).abs() <= 20.0;
    let label: Value = match idx % 3 {
        0 => json!(if passed { "PASS" } else { "FAIL" }),
        1 => json!(passed),
        _ => json!(if passed { 1 } else { 0 }),
    };

    let mut record = json!({
        "user_id": format!("user-{}", user),
        "mask_id": mask_id,
        "model": model,
        "style": style,
        "strap_type": strap_type,
        "perimeter_mm": perimeter,
        "qlft_pass": label,
        "nose_mm": nose,
        "chin_mm": chin,
        "top_cheek_mm": top_cheek,
        "facial_hair_beard_length_mm": if user % 6 == 5 { 6.0 } else { 0.0 },
    });
    // Some users are missing a cheek dimension or a strap measurement, which
    // exercises the donor imputer without starving it of donors.
    if user % 5 != 3 {
        record["mid_cheek_mm"] = json!(mid_cheek);
    }
    if user % 4 != 1 {
        record["strap_mm"] = json!(310.0 + seal_step(user) * 2.0);
    }
    record
}

fn write_document(records: Vec<Value>) -> NamedTempFile {
    let document = json!({ "fit_tests_with_facial_measurements": records });
    let mut file = NamedTempFile::new().expect("temp file");
    write!(file, "{}", serde_json::to_string(&document).expect("serialize dataset"))
        .expect("write dataset");
    file.flush().expect("flush dataset");
    file
}

/// Write a learnable synthetic dataset of `records` fit tests.
pub(crate) fn write_test_dataset(records: usize) -> NamedTempFile {
    write_document((0..records).map(test_record).collect())
}

/// Write a dataset whose outcome fields never normalize to a label.
pub(crate) fn write_unlabeled_dataset(records: usize) -> NamedTempFile {
    let rows = (0..records)
        .map(|idx| {
            let mut record = test_record(idx);
            record["qlft_pass"] = json!("inconclusive");
            record
        })
        .collect();
    write_document(rows)
}

/// A facial-measurement payload whose seal total lands mid-catalog.
pub(crate) fn sample_measurements() -> Value {
    json!({
        "nose_mm": 52.0,
        "chin_mm": 84.0,
        "top_cheek_mm": 98.0,
        "mid_cheek_mm": 74.0,
        "strap_mm": 312.0,
        "facial_hair_beard_length_mm": 0.0
    })
}
