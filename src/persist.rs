//! Persisted snapshot envelope.
//!
//! Durable storage is left to an external persistence layer; this module only
//! defines what it stores. Layout:
//!
//! ```text
//! magic "SSS\0" | version u8 | body_len u32 LE | MessagePack body | crc32 u32 LE
//! ```

use crate::error::{Error, Result};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SNAPSHOT_MAGIC: &[u8; 4] = b"SSS\0";

const SNAPSHOT_VERSION: u8 = 1;

const HEADER_LEN: usize = 4 + 1 + 4;

/// A copy of the state keyed by a caller-chosen string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub key: String,
    pub state: Value,
    pub timestamp: Timestamp,
}

impl PersistedSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Serialize a snapshot into its framed binary form.
pub fn encode(snapshot: &PersistedSnapshot) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(snapshot)?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| Error::Serialization(format!("snapshot too large: {} bytes", body.len())))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + 4);
    out.extend_from_slice(SNAPSHOT_MAGIC);
    out.push(SNAPSHOT_VERSION);
    out.extend_from_slice(&body_len.to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(out)
}

/// Parse and verify a framed snapshot.
pub fn decode(bytes: &[u8]) -> Result<PersistedSnapshot> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Corruption("snapshot header truncated".into()));
    }
    if &bytes[..4] != SNAPSHOT_MAGIC {
        return Err(Error::Corruption("invalid snapshot magic".into()));
    }
    if bytes[4] != SNAPSHOT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported snapshot version: {}",
            bytes[4]
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[5..HEADER_LEN]);
    let body_len = u32::from_le_bytes(len_bytes) as usize;
    if bytes.len() != HEADER_LEN + body_len + 4 {
        return Err(Error::Corruption(format!(
            "snapshot length mismatch: header says {} body bytes, have {}",
            body_len,
            bytes.len().saturating_sub(HEADER_LEN + 4)
        )));
    }

    let body = &bytes[HEADER_LEN..HEADER_LEN + body_len];
    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(&bytes[HEADER_LEN + body_len..]);
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(Error::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok(rmp_serde::from_slice(body)?)
}
