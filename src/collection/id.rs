//! ID generation strategies (§4.6): `None`, `ObjectId`, `Int32Identity`,
//! `Int64Identity`, `GuidV4`, `GuidV7`. A collection picks one strategy at
//! first insert if none was pre-declared, and uses it for every subsequent
//! auto-generated id.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{ObjectId, Value};

/// Binary subtype used to tag UUID-valued ids, matching the BSON convention
/// of binary subtype `0x04` for UUIDs (§3.1 only fixes the `binary` value
/// shape, not subtype meanings, so this crate picks the same convention the
/// wider BSON ecosystem already uses).
pub const UUID_SUBTYPE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// The caller supplies the id field themselves; no generation happens.
    None,
    ObjectId,
    Int32Identity,
    Int64Identity,
    GuidV4,
    GuidV7,
}

impl IdStrategy {
    pub fn tag(self) -> i32 {
        match self {
            IdStrategy::None => 0,
            IdStrategy::ObjectId => 1,
            IdStrategy::Int32Identity => 2,
            IdStrategy::Int64Identity => 3,
            IdStrategy::GuidV4 => 4,
            IdStrategy::GuidV7 => 5,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            0 => IdStrategy::None,
            1 => IdStrategy::ObjectId,
            2 => IdStrategy::Int32Identity,
            3 => IdStrategy::Int64Identity,
            4 => IdStrategy::GuidV4,
            5 => IdStrategy::GuidV7,
            _ => return None,
        })
    }

    /// Generates a fresh id value. `next_counter` is the collection's
    /// persisted counter, pre-incremented by the caller's call site and
    /// used only by the two identity strategies.
    pub fn generate(self, next_counter: u64) -> Value {
        match self {
            IdStrategy::None => Value::Null,
            IdStrategy::ObjectId => Value::ObjectId(new_object_id()),
            IdStrategy::Int32Identity => Value::Int32(next_counter as i32),
            IdStrategy::Int64Identity => Value::Int64(next_counter as i64),
            IdStrategy::GuidV4 => Value::Binary(UUID_SUBTYPE, uuid::Uuid::new_v4().as_bytes().to_vec()),
            IdStrategy::GuidV7 => Value::Binary(UUID_SUBTYPE, uuid::Uuid::now_v7().as_bytes().to_vec()),
        }
    }
}

/// The process-wide 5-byte machine+pid identifier baked into every
/// `ObjectId` this process mints (§3.1: "5 bytes machine+pid"). Derived once
/// from the process id and a random salt rather than a true machine
/// fingerprint — sufficient for collision avoidance within one process,
/// which is all a single-file embedded engine needs (§1: no multi-process
/// sharing of one file).
fn machine_pid_bytes() -> &'static [u8; 5] {
    static CELL: OnceLock<[u8; 5]> = OnceLock::new();
    CELL.get_or_init(|| {
        let pid = std::process::id();
        let salt = uuid::Uuid::new_v4();
        let mut out = [0u8; 5];
        out[0..2].copy_from_slice(&(pid as u16).to_be_bytes());
        out[2..5].copy_from_slice(&salt.as_bytes()[0..3]);
        out
    })
}

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

fn new_object_id() -> ObjectId {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as u32;
    let counter = OID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&secs.to_be_bytes());
    bytes[4..9].copy_from_slice(machine_pid_bytes());
    bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
    ObjectId(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique_and_time_prefixed() {
        let a = new_object_id();
        let b = new_object_id();
        assert_ne!(a, b);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32;
        let secs = u32::from_be_bytes(a.as_bytes()[0..4].try_into().unwrap());
        assert!(secs.abs_diff(now) <= 2);
    }

    #[test]
    fn identity_strategies_use_the_supplied_counter() {
        assert_eq!(IdStrategy::Int32Identity.generate(7), Value::Int32(7));
        assert_eq!(IdStrategy::Int64Identity.generate(7), Value::Int64(7));
    }

    #[test]
    fn guid_strategies_produce_16_byte_binary_values() {
        match IdStrategy::GuidV4.generate(0) {
            Value::Binary(subtype, bytes) => {
                assert_eq!(subtype, UUID_SUBTYPE);
                assert_eq!(bytes.len(), 16);
            }
            other => panic!("expected Binary, got {other:?}"),
        }
    }

    #[test]
    fn tag_round_trips() {
        for s in [
            IdStrategy::None,
            IdStrategy::ObjectId,
            IdStrategy::Int32Identity,
            IdStrategy::Int64Identity,
            IdStrategy::GuidV4,
            IdStrategy::GuidV7,
        ] {
            assert_eq!(IdStrategy::from_tag(s.tag()), Some(s));
        }
    }
}
