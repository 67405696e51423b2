//! Maskfit Core Library
//!
//! Domain types and shared infrastructure for the respirator fit-probability
//! pipeline.
//!
//! # Architecture
//!
//! This crate defines:
//! - Domain types (`FacialMeasurementSet`, `MaskCatalogEntry`,
//!   `FitTestObservation`, style/strap/provenance enums)
//! - Label normalization for heterogeneous pass/fail encodings
//! - Dataset ingestion from loosely-typed JSON exports
//! - Error types and result aliases
//! - Configuration structures
//!
//! Imputation, feature encoding, model training, the artifact registry, and
//! the serving layer live in the sibling `maskfit-*` crates and all build on
//! the types here.

pub mod config;
pub mod dataset;
pub mod error;
pub mod label;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use types::{
    FacialMeasurementSet, FitLabel, FitTestObservation, MaskCatalogEntry, MaskStyle,
    PerimeterSource, StrapType,
};
