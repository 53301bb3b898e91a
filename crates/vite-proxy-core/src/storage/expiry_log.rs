//! Fixed-width record format for the rate-limit expiry log.
//!
//! The whole log is persisted as one contiguous blob of 32-byte records:
//!
//! ```text
//! ┌────────────┬──────────────────────┬────────────────────┐
//! │ id (8 B)   │ key (16 B)           │ expire_at (8 B BE) │
//! └────────────┴──────────────────────┴────────────────────┘
//! ```
//!
//! `expire_at` is a signed big-endian millisecond Unix timestamp.

use super::StoreError;
use rand::RngCore;

pub const ENTRY_ID_LEN: usize = 8;
pub const ENTRY_KEY_LEN: usize = 16;
pub const ENTRY_LEN: usize = ENTRY_ID_LEN + ENTRY_KEY_LEN + 8;

/// One pending admission waiting for its release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryEntry {
    pub id: [u8; ENTRY_ID_LEN],
    pub key: [u8; ENTRY_KEY_LEN],
    pub expire_at: i64,
}

impl ExpiryEntry {
    /// Creates an entry with a fresh random id.
    #[must_use]
    pub fn new(key: [u8; ENTRY_KEY_LEN], expire_at: i64) -> Self {
        let mut id = [0u8; ENTRY_ID_LEN];
        rand::thread_rng().fill_bytes(&mut id);
        Self { id, key, expire_at }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; ENTRY_LEN] {
        let mut out = [0u8; ENTRY_LEN];
        out[..ENTRY_ID_LEN].copy_from_slice(&self.id);
        out[ENTRY_ID_LEN..ENTRY_ID_LEN + ENTRY_KEY_LEN].copy_from_slice(&self.key);
        out[ENTRY_ID_LEN + ENTRY_KEY_LEN..].copy_from_slice(&self.expire_at.to_be_bytes());
        out
    }

    /// Decodes a single record. `bytes` must be exactly [`ENTRY_LEN`] long.
    ///
    /// # Errors
    /// Returns `StoreError::CorruptExpiryLog` on a length mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != ENTRY_LEN {
            return Err(StoreError::CorruptExpiryLog(format!(
                "record is {} bytes, expected {ENTRY_LEN}",
                bytes.len()
            )));
        }

        let mut id = [0u8; ENTRY_ID_LEN];
        id.copy_from_slice(&bytes[..ENTRY_ID_LEN]);
        let mut key = [0u8; ENTRY_KEY_LEN];
        key.copy_from_slice(&bytes[ENTRY_ID_LEN..ENTRY_ID_LEN + ENTRY_KEY_LEN]);
        let mut expire_at = [0u8; 8];
        expire_at.copy_from_slice(&bytes[ENTRY_ID_LEN + ENTRY_KEY_LEN..]);

        Ok(Self { id, key, expire_at: i64::from_be_bytes(expire_at) })
    }

    /// Hex form of the id, used in logs.
    #[must_use]
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

/// Serializes the log in order.
#[must_use]
pub fn encode_log(entries: &[ExpiryEntry]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(entries.len() * ENTRY_LEN);
    for entry in entries {
        blob.extend_from_slice(&entry.encode());
    }
    blob
}

/// Parses a persisted log blob.
///
/// # Errors
/// Returns `StoreError::CorruptExpiryLog` if the blob is not a whole number of records.
pub fn decode_log(blob: &[u8]) -> Result<Vec<ExpiryEntry>, StoreError> {
    if blob.len() % ENTRY_LEN != 0 {
        return Err(StoreError::CorruptExpiryLog(format!(
            "blob length {} is not a multiple of {ENTRY_LEN}",
            blob.len()
        )));
    }
    blob.chunks_exact(ENTRY_LEN).map(ExpiryEntry::decode).collect()
}
