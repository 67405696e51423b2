//! Maskfit Imputation Library
//!
//! Repairs missing input data before feature encoding:
//! - [`measurement::MeasurementImputer`] fills per-user facial measurement
//!   gaps from similar users' values.
//! - [`perimeter::impute_catalog`] fills missing mask perimeters through an
//!   ordered fallback chain with recorded provenance.
//!
//! Neither path can fail: a value that cannot be resolved stays missing and
//! the affected entity is excluded downstream instead of being defaulted.

pub mod measurement;
pub mod perimeter;

pub use measurement::{MeasurementImputationSummary, MeasurementImputer};
pub use perimeter::{impute_catalog, PerimeterImputationSummary};
