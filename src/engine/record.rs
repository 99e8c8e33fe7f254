//! Log records
//!
//! Frame format (binary):
//! [length: u32 LE] [length crc32: u32 LE] [payload crc32: u32 LE] [payload: bincode(LogOp)]
//!
//! `length` is the payload length. It carries its own checksum, so a damaged
//! length is never mistaken for a frame running past the end of the file.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// File magic: "KSDB"
pub const MAGIC: &[u8; 4] = b"KSDB";

/// On-disk format version
pub const FORMAT_VERSION: u16 = 1;

/// File header: magic (4) + version (2)
pub const HEADER_SIZE: usize = 6;

/// Frame header: length (4) + length crc (4) + payload crc (4)
pub const FRAME_HEADER_SIZE: usize = 12;

/// Bytes of the frame header that describe the frame's extent
const LENGTH_FIELD_SIZE: usize = 8;

/// A logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    /// Insert or replace a document
    Upsert {
        collection: String,
        id: String,
        content: String,
    },

    /// Remove a document
    Delete { collection: String, id: String },
}

/// Outcome of decoding one frame from a byte slice
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A valid frame and the number of bytes it occupied
    Frame(LogOp, usize),

    /// Not enough bytes for a whole frame (partial write at the tail)
    Incomplete,

    /// The length field fails its checksum; the frame's extent is unknown
    BadLength,

    /// The frame is whole but its checksum does not match
    BadChecksum { frame_len: usize },
}

impl LogOp {
    /// Encode into a framed, checksummed byte vector
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| StoreError::Serialization(format!("Failed to encode log op: {}", e)))?;

        let len_bytes = length_field(payload.len())?.to_le_bytes();

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&checksum(&len_bytes).to_le_bytes());
        frame.extend_from_slice(&checksum(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode the frame at the start of `data`
    pub fn decode(data: &[u8]) -> Result<Decoded> {
        if data.len() < LENGTH_FIELD_SIZE {
            return Ok(Decoded::Incomplete);
        }

        let len_bytes = [data[0], data[1], data[2], data[3]];
        let len_crc = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if checksum(&len_bytes) != len_crc {
            return Ok(Decoded::BadLength);
        }

        let frame_len = FRAME_HEADER_SIZE + u32::from_le_bytes(len_bytes) as usize;
        if data.len() < frame_len {
            return Ok(Decoded::Incomplete);
        }

        let payload_crc = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let payload = &data[FRAME_HEADER_SIZE..frame_len];
        if checksum(payload) != payload_crc {
            return Ok(Decoded::BadChecksum { frame_len });
        }

        let op: LogOp = bincode::deserialize(payload).map_err(|e| {
            StoreError::Corruption(format!("Checksummed frame failed to decode: {}", e))
        })?;

        Ok(Decoded::Frame(op, frame_len))
    }

    pub fn collection(&self) -> &str {
        match self {
            LogOp::Upsert { collection, .. } | LogOp::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            LogOp::Upsert { id, .. } | LogOp::Delete { id, .. } => id,
        }
    }
}

/// Payload length as stored in a frame header
fn length_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        StoreError::Serialization(format!(
            "Log op of {} bytes exceeds the maximum frame size",
            len
        ))
    })
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// File header bytes
pub fn encode_header() -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header
}

/// Validate the file header at the start of `data`
pub fn check_header(data: &[u8]) -> Result<()> {
    if data.len() < HEADER_SIZE {
        return Err(StoreError::Corruption(format!(
            "Store file header truncated: {} bytes",
            data.len()
        )));
    }

    if &data[0..4] != MAGIC {
        return Err(StoreError::Corruption(format!(
            "Invalid store file magic: expected KSDB, got {:?}",
            &data[0..4]
        )));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FORMAT_VERSION {
        return Err(StoreError::Corruption(format!(
            "Unsupported store file version: {}",
            version
        )));
    }

    Ok(())
}
