use chrono::{DateTime, TimeZone, Utc};

/// Wire tag bytes for each `Value` variant. Kept as associated constants so
/// encode/decode can match on the same names instead of bare literals.
pub mod tag {
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const ARRAY: u8 = 0x04;
    pub const BINARY: u8 = 0x05;
    pub const OBJECT_ID: u8 = 0x07;
    pub const BOOL: u8 = 0x08;
    pub const DATETIME: u8 = 0x09;
    pub const NULL: u8 = 0x0A;
    pub const INT32: u8 = 0x10;
    pub const INT64: u8 = 0x12;
    pub const DECIMAL128: u8 = 0x13;
}

/// The nesting cap for documents and arrays, enforced by both the encoder and
/// the decoder so a malicious or corrupt payload cannot blow the call stack.
pub const MAX_DEPTH: u32 = 64;

/// A 12-byte, big-endian-ordered object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// A practical fixed-point decimal representation used for the `decimal128`
/// value kind. This is TinyDb's own 16-byte layout (sign byte, i16 exponent,
/// 13-byte little-endian coefficient) rather than the IEEE 754-2008 BID/DPD
/// bit layout real decimal128 implementations use — spec.md fixes the tag
/// byte and payload size but not the bit-for-bit internal layout, and a
/// from-scratch BID/DPD codec is out of proportion to what this crate needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal128 {
    pub negative: bool,
    pub exponent: i16,
    /// Only the low 104 bits are significant (13-byte wire payload).
    pub coefficient: u128,
}

impl Decimal128 {
    pub fn from_i64(v: i64) -> Self {
        Decimal128 {
            negative: v < 0,
            exponent: 0,
            coefficient: v.unsigned_abs() as u128,
        }
    }

    /// Approximate numeric value, used for cross-type ordering (§3.3). Not
    /// lossless for coefficients beyond f64's 53 bits of precision.
    pub fn to_f64_approx(&self) -> f64 {
        let mag = self.coefficient as f64 * 10f64.powi(self.exponent as i32);
        if self.negative { -mag } else { mag }
    }
}

/// Binary subtype, preserved for ordering (binary compares by subtype then
/// bytes per §3.3).
pub type BinarySubtype = u8;

/// A tagged-union document value (§3.1 of the storage-core specification).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Value>),
    Binary(BinarySubtype, Vec<u8>),
    ObjectId(ObjectId),
    Bool(bool),
    /// Milliseconds since the Unix epoch, UTC.
    DateTime(i64),
    Null,
    Int32(i32),
    Int64(i64),
    Decimal128(Decimal128),
}

impl Value {
    pub fn tag(&self) -> u8 {
        match self {
            Value::Double(_) => tag::DOUBLE,
            Value::String(_) => tag::STRING,
            Value::Document(_) => tag::DOCUMENT,
            Value::Array(_) => tag::ARRAY,
            Value::Binary(_, _) => tag::BINARY,
            Value::ObjectId(_) => tag::OBJECT_ID,
            Value::Bool(_) => tag::BOOL,
            Value::DateTime(_) => tag::DATETIME,
            Value::Null => tag::NULL,
            Value::Int32(_) => tag::INT32,
            Value::Int64(_) => tag::INT64,
            Value::Decimal128(_) => tag::DECIMAL128,
        }
    }

    pub fn datetime(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt.timestamp_millis())
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(ms) => Utc.timestamp_millis_opt(*ms).single(),
            _ => None,
        }
    }
}

/// An ordered list of (name, value) fields. Field order is insertion order
/// and is preserved across encode/decode (the round-trip law in §3.4 covers
/// field order, not just field content).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fields.iter()
    }

    /// Appends a field, replacing an existing field of the same name in
    /// place (preserving its original position) rather than appending a
    /// duplicate.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        if let Some(pos) = self.fields.iter().position(|(n, _)| n == name) {
            Some(self.fields.remove(pos).1)
        } else {
            None
        }
    }

    /// Dotted-path lookup, e.g. `"a.b.c"`, descending through nested
    /// documents. Stops and returns `None` on the first missing or
    /// non-document segment.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        let mut parts = path.split('.').peekable();
        loop {
            let part = parts.next()?;
            let v = cur.get(part)?;
            if parts.peek().is_none() {
                return Some(v);
            }
            match v {
                Value::Document(d) => cur = d,
                _ => return None,
            }
        }
    }

    pub fn from_fields(fields: Vec<(String, Value)>) -> Self {
        Document { fields }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut d = Document::new();
        for (k, v) in iter {
            d.insert(k, v);
        }
        d
    }
}
