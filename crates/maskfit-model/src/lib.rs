//! Feature encoding, trainer families, and artifact assembly for the mask
//! fit-probability pipeline.
//!
//! # Architecture
//!
//! ```text
//! observations ──> encoder ──> TrainingBatch ──> train_model ──> TrainOutcome
//!                    │  (schema, matrix,            │
//!                    │   stats, labels)             ├── gradient (candle MLP)
//!                    │                              ├── forest   (rayon trees)
//!                    │                              └── hierarchical (MCMC)
//!                    │
//!                    └────────────> ModelArtifact::score_rows <── serving
//! ```
//!
//! The schema is defined once at training time and travels inside the
//! artifact; inference re-expands rows against it, which is what guarantees
//! a row encodes identically on both sides. Trainer families share one
//! contract ([`TrainOutcome`]) and one scoring entry point
//! ([`ModelArtifact::score_rows`]).

pub mod artifact;
pub mod calibrate;
pub mod encoder;
pub mod error;
pub mod forest;
pub mod gradient;
pub mod hierarchical;
pub mod metrics;
pub mod schema;
pub mod split;
pub mod threshold;

pub use artifact::{train_model, ModelArtifact, ModelParams, TrainOutcome};
pub use calibrate::CalibrationParams;
pub use encoder::{
    encode_for_inference, encode_for_training, EncoderOptions, RawRow, TrainingBatch,
};
pub use error::{ModelError, ModelResult};
pub use metrics::ValidationMetrics;
pub use schema::{DiffMode, FeatureSchema, NormalizationStats};
pub use threshold::ThresholdChoice;
