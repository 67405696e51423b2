//! Request-facing layer of the mask fit pipeline.
//!
//! The [`dispatch::Dispatcher`] is the single entry point: it normalizes a
//! loose request envelope, routes on the `method` field, and answers with a
//! `{statusCode, body}` envelope.
//!
//! | method   | handler                 | outcome                            |
//! |----------|-------------------------|------------------------------------|
//! | `train`  | [`train::run_train`]    | published artifact + train report  |
//! | `infer`  | [`infer::run_infer`]    | ranked `(mask_id, proba_fit)` maps |
//! | `warmup` | [`infer::run_warmup`]   | latest artifact cached             |
//!
//! Handlers share one [`context::ServiceContext`] carrying the configuration,
//! the blob store, and the model cache.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod infer;
pub mod requests;
pub mod responses;
pub mod train;

#[cfg(test)]
pub(crate) mod testutil;

pub use context::ServiceContext;
pub use dispatch::{methods, Dispatcher};
pub use error::{ServiceError, ServiceResult};
pub use infer::MaskRanking;
pub use requests::{normalize_envelope, Envelope, InferRequest, TrainRequest};
pub use responses::{InferBody, ServiceResponse, TrainBody, WarmupBody};
pub use train::TrainReport;
