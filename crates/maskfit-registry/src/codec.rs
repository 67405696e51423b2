//! Binary container for serialized model artifacts.
//!
//! Layout: 4-byte magic, 1-byte container version, u64-LE payload length,
//! MessagePack payload, u64-LE xxh64 of the payload. Decoding verifies all
//! of it before touching the payload, so a truncated or bit-flipped blob
//! surfaces as [`RegistryError::Corrupt`] instead of garbage parameters.

use xxhash_rust::xxh64::xxh64;

use maskfit_model::ModelArtifact;

use crate::error::{RegistryError, RegistryResult};

pub const ARTIFACT_MAGIC: [u8; 4] = *b"MFAR";
pub const ARTIFACT_VERSION: u8 = 1;

const HEADER_LEN: usize = 4 + 1 + 8;
const TRAILER_LEN: usize = 8;
const CHECKSUM_SEED: u64 = 0;

pub fn encode_artifact(artifact: &ModelArtifact) -> RegistryResult<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(artifact)?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(&ARTIFACT_MAGIC);
    out.push(ARTIFACT_VERSION);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&xxh64(&payload, CHECKSUM_SEED).to_le_bytes());
    Ok(out)
}

pub fn decode_artifact(bytes: &[u8]) -> RegistryResult<ModelArtifact> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(RegistryError::Corrupt(format!(
            "blob too short for container: {} bytes",
            bytes.len()
        )));
    }
    if bytes[..4] != ARTIFACT_MAGIC {
        return Err(RegistryError::Corrupt("magic mismatch".into()));
    }
    let version = bytes[4];
    if version != ARTIFACT_VERSION {
        return Err(RegistryError::Corrupt(format!(
            "unsupported container version {}",
            version
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[5..13]);
    let payload_len = u64::from_le_bytes(len_bytes) as usize;
    if bytes.len() != HEADER_LEN + payload_len + TRAILER_LEN {
        return Err(RegistryError::Corrupt(format!(
            "length mismatch: header says {} payload bytes, blob holds {}",
            payload_len,
            bytes.len().saturating_sub(HEADER_LEN + TRAILER_LEN)
        )));
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + payload_len];
    let mut checksum_bytes = [0u8; 8];
    checksum_bytes.copy_from_slice(&bytes[HEADER_LEN + payload_len..]);
    let stored = u64::from_le_bytes(checksum_bytes);
    let computed = xxh64(payload, CHECKSUM_SEED);
    if stored != computed {
        return Err(RegistryError::Corrupt(format!(
            "checksum mismatch: stored {:016x}, computed {:016x}",
            stored, computed
        )));
    }

    Ok(rmp_serde::from_slice(payload)?)
}
