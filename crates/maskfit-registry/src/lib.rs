//! Versioned model artifact registry.
//!
//! Every training run produces one self-contained artifact (schema, weights,
//! threshold, calibration, catalog snapshot). This crate stores those
//! artifacts behind a small blob-store abstraction and maintains a `latest`
//! pointer per (environment, backend) pair:
//!
//! - [`store`] - the [`store::BlobStore`] trait with filesystem and
//!   in-memory implementations
//! - [`codec`] - binary container framing with checksum verification
//! - [`keys`] - the blob key layout under `{environment}/{backend}/`
//! - [`publisher`] - write-then-publish ordering for new runs, plus
//!   `latest` retrieval
//! - [`cache`] - process-wide cache of decoded artifacts for serving
//!
//! Versioned blobs are written before any `latest` pointer moves, so a
//! publish that dies half-way leaves the previous `latest` fully intact.

pub mod cache;
pub mod codec;
pub mod error;
pub mod keys;
pub mod publisher;
pub mod store;

pub use cache::ModelCache;
pub use codec::{decode_artifact, encode_artifact};
pub use error::{RegistryError, RegistryResult};
pub use publisher::{
    load_latest, publish_artifact, publish_artifact_with_metrics, PublishedKeys,
};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore};
