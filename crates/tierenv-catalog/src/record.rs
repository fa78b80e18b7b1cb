// Catalog log record format and encoding/decoding
//
// Record format (binary):
// [length: u32 LE] [crc32: u32 LE] [payload bytes]
//
// The crc covers the payload. Every record carries absolute state (the full
// entry after the transition), so replaying a log over a checkpoint that
// already contains some of its effects converges to the same catalog.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tierenv_core::{CatalogEntry, Error, FileId, Result};

/// Frame overhead: length + crc
pub const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on a single record payload; anything larger is garbage
const MAX_RECORD_LEN: usize = 1 << 20;

/// One durable catalog transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogRecord {
    /// Insert or replace an entry
    Put { entry: CatalogEntry },
    /// Remove an entry
    Remove { id: FileId },
    /// Re-key an entry; `entry.id` is the new identity
    Rename { from: FileId, entry: CatalogEntry },
}

impl CatalogRecord {
    /// Fencing token carried by this record, if any
    pub fn token(&self) -> Option<u64> {
        match self {
            CatalogRecord::Put { entry } | CatalogRecord::Rename { entry, .. } => entry.token,
            CatalogRecord::Remove { .. } => None,
        }
    }

    /// Encode record to bytes with framing and CRC
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize record: {}", e)))?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        Ok(frame)
    }

    /// Decode one record from the front of `data`, returning it and its frame size
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(Error::Serialization("Incomplete record frame".to_string()));
        }

        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length > MAX_RECORD_LEN {
            return Err(Error::Corruption(format!(
                "Record length {} exceeds limit",
                length
            )));
        }

        let total_size = FRAME_HEADER_LEN + length;
        if data.len() < total_size {
            return Err(Error::Serialization(format!(
                "Incomplete record: expected {} bytes, got {}",
                total_size,
                data.len()
            )));
        }

        let expected_crc = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let payload = &data[FRAME_HEADER_LEN..total_size];

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let actual_crc = hasher.finalize();

        if actual_crc != expected_crc {
            return Err(Error::Corruption(format!(
                "CRC mismatch: expected {}, got {}",
                expected_crc, actual_crc
            )));
        }

        let record: CatalogRecord = bincode::deserialize(payload)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize record: {}", e)))?;

        Ok((record, total_size))
    }
}
