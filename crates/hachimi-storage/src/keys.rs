//! Key encoding and decoding for the storage layer.
//!
//! - Records: `item:{id}`
//! - Score index: `score:{biased_score:016x}:{id}`
//! - Updated index: `upd:{timestamp_ms:013}:{id}`
//!
//! Scores are signed, so they are biased by flipping the sign bit before
//! hex encoding; the encoded form sorts lexicographically in numeric order.
//! Ids may contain `:`; decoders split at most twice.

use crate::error::StorageError;

/// Key for a content record.
pub fn item_key(id: &str) -> Vec<u8> {
    format!("item:{}", id).into_bytes()
}

fn bias(score: i64) -> u64 {
    (score as u64) ^ (1u64 << 63)
}

fn unbias(encoded: u64) -> i64 {
    (encoded ^ (1u64 << 63)) as i64
}

fn split_index_key<'a>(bytes: &'a [u8], prefix: &str) -> Result<(&'a str, &'a str), StorageError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(p), Some(value), Some(id)) if p == prefix && !id.is_empty() => Ok((value, id)),
        _ => Err(StorageError::Key(format!(
            "Invalid {} key format: {}",
            prefix, s
        ))),
    }
}

/// Entry in the score index.
/// Format: score:{biased_score:016x}:{id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreKey {
    pub score: i64,
    pub id: String,
}

impl ScoreKey {
    pub fn new(score: i64, id: impl Into<String>) -> Self {
        Self {
            score,
            id: id.into(),
        }
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("score:{:016x}:{}", bias(self.score), self.id).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let (score, id) = split_index_key(bytes, "score")?;
        let encoded = u64::from_str_radix(score, 16)
            .map_err(|e| StorageError::Key(format!("Invalid score: {}", e)))?;
        Ok(Self {
            score: unbias(encoded),
            id: id.to_string(),
        })
    }

    /// Prefix of all entries with exactly `score`; the inclusive lower
    /// bound of a range scan starting at `score`.
    pub fn prefix(score: i64) -> Vec<u8> {
        format!("score:{:016x}:", bias(score)).into_bytes()
    }
}

/// Entry in the last-updated index.
/// Format: upd:{timestamp_ms:013}:{id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedKey {
    pub timestamp_ms: i64,
    pub id: String,
}

impl UpdatedKey {
    /// Negative timestamps are clamped to the epoch.
    pub fn new(timestamp_ms: i64, id: impl Into<String>) -> Self {
        Self {
            timestamp_ms: timestamp_ms.max(0),
            id: id.into(),
        }
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        // Zero-pad timestamp to 13 digits for lexicographic sorting
        format!("upd:{:013}:{}", self.timestamp_ms, self.id).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let (ts, id) = split_index_key(bytes, "upd")?;
        let timestamp_ms: i64 = ts
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        Ok(Self {
            timestamp_ms,
            id: id.to_string(),
        })
    }

    /// Prefix of all entries updated at exactly `timestamp_ms`.
    pub fn prefix(timestamp_ms: i64) -> Vec<u8> {
        format!("upd:{:013}:", timestamp_ms.max(0)).into_bytes()
    }
}
