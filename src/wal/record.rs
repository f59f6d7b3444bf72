use crate::errors::{DbError, Result};

/// Log record kinds (§4.4.2). The WAL is a flat sequence of these records;
/// transactions are interleaved by `txn_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Begin = 1,
    PageImage = 2,
    Commit = 3,
    CheckpointStart = 4,
    CheckpointEnd = 5,
}

impl RecordType {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            1 => RecordType::Begin,
            2 => RecordType::PageImage,
            3 => RecordType::Commit,
            4 => RecordType::CheckpointStart,
            5 => RecordType::CheckpointEnd,
            other => {
                return Err(DbError::FormatError {
                    offset: 0,
                    reason: format!("unknown WAL record type {other}"),
                })
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Begin,
    PageImage { page_id: u32, data: Vec<u8> },
    Commit,
    CheckpointStart { oldest_active_txn_id: u64 },
    CheckpointEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: u64,
    pub txn_id: u64,
    pub payload: Payload,
}

impl LogRecord {
    pub fn record_type(&self) -> RecordType {
        match &self.payload {
            Payload::Begin => RecordType::Begin,
            Payload::PageImage { .. } => RecordType::PageImage,
            Payload::Commit => RecordType::Commit,
            Payload::CheckpointStart { .. } => RecordType::CheckpointStart,
            Payload::CheckpointEnd => RecordType::CheckpointEnd,
        }
    }

    /// Encodes `[4B length][1B type][8B lsn][8B txn-id][payload][4B CRC32C]`.
    /// `length` counts every byte of the record, including itself, so a
    /// reader can slice out exactly one record at a time.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(self.record_type() as u8);
        body.extend_from_slice(&self.lsn.to_le_bytes());
        body.extend_from_slice(&self.txn_id.to_le_bytes());
        match &self.payload {
            Payload::Begin | Payload::Commit | Payload::CheckpointEnd => {}
            Payload::PageImage { page_id, data } => {
                body.extend_from_slice(&page_id.to_le_bytes());
                body.extend_from_slice(&(data.len() as u32).to_le_bytes());
                body.extend_from_slice(data);
            }
            Payload::CheckpointStart { oldest_active_txn_id } => {
                body.extend_from_slice(&oldest_active_txn_id.to_le_bytes());
            }
        }
        let total_len = 4u32 + body.len() as u32 + 4;
        let mut out = Vec::with_capacity(total_len as usize);
        out.extend_from_slice(&total_len.to_le_bytes());
        out.extend_from_slice(&body);
        let crc = crc32c::crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decodes one record from the front of `buf`. Returns the record and
    /// the number of bytes consumed. A CRC mismatch is reported distinctly
    /// from a structural/truncation error so the recovery scanner can tell
    /// "this is corrupt" from "this is a torn write at the tail".
    pub fn decode(buf: &[u8]) -> std::result::Result<(LogRecord, usize), DecodeOutcome> {
        if buf.len() < 4 {
            return Err(DecodeOutcome::Truncated);
        }
        let total_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if total_len < 4 + 1 + 8 + 8 + 4 {
            return Err(DecodeOutcome::Corrupt("declared length too small for a record header".into()));
        }
        if buf.len() < total_len {
            return Err(DecodeOutcome::Truncated);
        }
        let record_bytes = &buf[..total_len];
        let crc_stored = u32::from_le_bytes(record_bytes[total_len - 4..].try_into().unwrap());
        let crc_actual = crc32c::crc32c(&record_bytes[..total_len - 4]);
        if crc_stored != crc_actual {
            return Err(DecodeOutcome::Corrupt("CRC32C mismatch".into()));
        }
        let mut cursor = 4usize;
        let record_type = RecordType::from_u8(record_bytes[cursor])
            .map_err(|e| DecodeOutcome::Corrupt(e.to_string()))?;
        cursor += 1;
        let lsn = u64::from_le_bytes(record_bytes[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let txn_id = u64::from_le_bytes(record_bytes[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let payload_end = total_len - 4;
        let payload = match record_type {
            RecordType::Begin => Payload::Begin,
            RecordType::Commit => Payload::Commit,
            RecordType::CheckpointEnd => Payload::CheckpointEnd,
            RecordType::CheckpointStart => {
                if payload_end - cursor < 8 {
                    return Err(DecodeOutcome::Corrupt("truncated checkpoint-start payload".into()));
                }
                let oldest = u64::from_le_bytes(record_bytes[cursor..cursor + 8].try_into().unwrap());
                Payload::CheckpointStart {
                    oldest_active_txn_id: oldest,
                }
            }
            RecordType::PageImage => {
                if payload_end - cursor < 8 {
                    return Err(DecodeOutcome::Corrupt("truncated page-image header".into()));
                }
                let page_id = u32::from_le_bytes(record_bytes[cursor..cursor + 4].try_into().unwrap());
                cursor += 4;
                let data_len = u32::from_le_bytes(record_bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
                cursor += 4;
                if payload_end - cursor < data_len {
                    return Err(DecodeOutcome::Corrupt("truncated page-image body".into()));
                }
                let data = record_bytes[cursor..cursor + data_len].to_vec();
                Payload::PageImage { page_id, data }
            }
        };
        Ok((LogRecord { lsn, txn_id, payload }, total_len))
    }
}

/// Distinguishes "not enough bytes yet" (the normal end of a log that may
/// still be appended to, or a torn tail after a crash) from "the bytes that
/// are present don't check out" (a CRC or structural failure), which
/// recovery treats very differently.
#[derive(Debug)]
pub enum DecodeOutcome {
    Truncated,
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_image_round_trips() {
        let rec = LogRecord {
            lsn: 5,
            txn_id: 1,
            payload: Payload::PageImage {
                page_id: 3,
                data: vec![1, 2, 3, 4],
            },
        };
        let bytes = rec.encode();
        let (back, consumed) = LogRecord::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(back, rec);
    }

    #[test]
    fn crc_mismatch_is_reported_as_corrupt_not_truncated() {
        let rec = LogRecord {
            lsn: 1,
            txn_id: 1,
            payload: Payload::Commit,
        };
        let mut bytes = rec.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        match LogRecord::decode(&bytes) {
            Err(DecodeOutcome::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn short_buffer_is_reported_as_truncated() {
        let rec = LogRecord {
            lsn: 1,
            txn_id: 1,
            payload: Payload::Begin,
        };
        let bytes = rec.encode();
        match LogRecord::decode(&bytes[..bytes.len() - 2]) {
            Err(DecodeOutcome::Truncated) => {}
            other => panic!("expected Truncated, got {other:?}"),
        }
    }
}
