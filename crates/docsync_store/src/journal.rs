//! Append-only journal holding all durable store state.
//!
//! Each record is framed as `magic (4) | version (2) | length (4) |
//! payload | crc32 (4)` with the payload encoded as CBOR. The CRC covers
//! everything before it. A torn record at the tail (crash mid-write) is
//! trimmed on replay; a bad checksum anywhere else is corruption.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use crate::types::{OfflineRecord, QueueStatus, SyncQueueItem};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"DSJN";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

/// One durable store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Upsert an offline record and, optionally, its blob.
    PutDocument {
        /// The record being stored.
        record: OfflineRecord,
        /// Binary content, if provided with the record.
        blob: Option<Bytes>,
    },
    /// Bump a record's last-accessed time.
    Touch {
        /// Document id.
        id: String,
        /// New last-accessed time (unix millis).
        at: u64,
    },
    /// Remove a record and its blob.
    RemoveDocument {
        /// Document id.
        id: String,
    },
    /// Add a queue item.
    Enqueue {
        /// The item, with its assigned id.
        item: SyncQueueItem,
    },
    /// Change a queue item's delivery state.
    QueueUpdate {
        /// Queue item id.
        id: u64,
        /// New status.
        status: QueueStatus,
        /// New retry count.
        retry_count: u32,
    },
    /// Remove a queue item after confirmed delivery (or discard).
    QueueRemove {
        /// Queue item id.
        id: u64,
    },
    /// Wipe all three families.
    Clear,
}

impl JournalRecord {
    /// Encodes the record with its envelope.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| StoreError::corruption(format!("encode failed: {e}")))?;

        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::corruption("record payload exceeds 4 GiB"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Computes a CRC32 checksum (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// The journal: an append-only record stream over a [`StorageBackend`].
pub struct Journal {
    backend: Box<dyn StorageBackend>,
}

impl Journal {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends a record and syncs it to durable media before returning.
    pub fn append_sync(&mut self, record: &JournalRecord) -> StoreResult<()> {
        let data = record.encode()?;
        self.backend.append(&data)?;
        self.backend.sync()
    }

    /// Current journal size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.backend.len()
    }

    /// Returns true if the journal holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Reads all records, trimming a torn tail record if one is found.
    ///
    /// A record that decodes short or checksum-fails *at the very end* of
    /// the journal is treated as an interrupted write and discarded; the
    /// same condition earlier in the stream is corruption.
    pub fn replay(&mut self) -> StoreResult<Vec<JournalRecord>> {
        let total = self.backend.len();
        let bytes = self.backend.read_at(0, total as usize)?;

        let mut records = Vec::new();
        let mut cursor = 0usize;
        let mut valid_end = 0usize;

        while cursor < bytes.len() {
            let Some((record, next)) = decode_one(&bytes, cursor)? else {
                // Torn tail: stop replay here.
                break;
            };
            records.push(record);
            cursor = next;
            valid_end = next;
        }

        if valid_end < bytes.len() {
            tracing::warn!(
                trimmed = bytes.len() - valid_end,
                "discarding torn journal tail"
            );
            self.backend.replace(&bytes[..valid_end])?;
        }

        Ok(records)
    }

    /// Replaces the journal contents with the given records, atomically.
    ///
    /// Used by compaction to rewrite a snapshot of live state.
    pub fn rewrite(&mut self, records: &[JournalRecord]) -> StoreResult<()> {
        let mut data = Vec::new();
        for record in records {
            data.extend_from_slice(&record.encode()?);
        }
        self.backend.replace(&data)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("len", &self.backend.len())
            .finish_non_exhaustive()
    }
}

/// Decodes one record at `cursor`.
///
/// Returns `Ok(None)` for a torn record extending to the end of the
/// buffer, an error for corruption before the end.
fn decode_one(bytes: &[u8], cursor: usize) -> StoreResult<Option<(JournalRecord, usize)>> {
    let remaining = &bytes[cursor..];
    if remaining.len() < HEADER_SIZE {
        return Ok(None);
    }

    if remaining[0..4] != JOURNAL_MAGIC {
        return Err(StoreError::corruption(format!(
            "bad record magic at offset {cursor}"
        )));
    }
    let version = u16::from_le_bytes([remaining[4], remaining[5]]);
    if version != JOURNAL_VERSION {
        return Err(StoreError::corruption(format!(
            "unsupported journal version {version}"
        )));
    }
    let len = u32::from_le_bytes([remaining[6], remaining[7], remaining[8], remaining[9]]) as usize;

    let record_size = HEADER_SIZE + len + CRC_SIZE;
    if remaining.len() < record_size {
        return Ok(None);
    }

    let crc_offset = HEADER_SIZE + len;
    let expected = u32::from_le_bytes([
        remaining[crc_offset],
        remaining[crc_offset + 1],
        remaining[crc_offset + 2],
        remaining[crc_offset + 3],
    ]);
    let actual = compute_crc32(&remaining[..crc_offset]);
    if expected != actual {
        // A bad checksum on the final record is a torn write, not corruption.
        if cursor + record_size == bytes.len() {
            return Ok(None);
        }
        return Err(StoreError::ChecksumMismatch { expected, actual });
    }

    let record: JournalRecord = ciborium::from_reader(&remaining[HEADER_SIZE..crc_offset])
        .map_err(|e| StoreError::corruption(format!("decode failed at offset {cursor}: {e}")))?;

    Ok(Some((record, cursor + record_size)))
}
