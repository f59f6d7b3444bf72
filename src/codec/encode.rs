use super::value::{Document, Value, MAX_DEPTH};
use crate::errors::{DbError, Result};

/// Encodes a top-level document to its wire representation: a 4-byte
/// little-endian total length (covering the length field itself), the field
/// list, and a trailing `0x00` terminator.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    encode_document_at_depth(doc, 0)
}

fn encode_document_at_depth(doc: &Document, depth: u32) -> Result<Vec<u8>> {
    if depth > MAX_DEPTH {
        return Err(DbError::FormatError {
            offset: 0,
            reason: format!("document nesting exceeds cap of {MAX_DEPTH}"),
        });
    }
    let mut body = Vec::new();
    for (name, value) in doc.iter() {
        encode_field(&mut body, name, value, depth)?;
    }
    body.push(0x00);
    let total_len = 4u32 + body.len() as u32;
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&total_len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn encode_cstring(out: &mut Vec<u8>, name: &str) -> Result<()> {
    if name.as_bytes().contains(&0) {
        return Err(DbError::FormatError {
            offset: out.len() as u64,
            reason: format!("field name '{name}' contains an embedded NUL byte"),
        });
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0x00);
    Ok(())
}

fn encode_field(out: &mut Vec<u8>, name: &str, value: &Value, depth: u32) -> Result<()> {
    out.push(value.tag());
    encode_cstring(out, name)?;
    encode_payload(out, value, depth)
}

fn encode_payload(out: &mut Vec<u8>, value: &Value, depth: u32) -> Result<()> {
    match value {
        Value::Double(d) => out.extend_from_slice(&d.to_le_bytes()),
        Value::String(s) => encode_string(out, s)?,
        Value::Document(d) => {
            out.extend_from_slice(&encode_document_at_depth(d, depth + 1)?);
        }
        Value::Array(items) => {
            let as_doc = array_to_document(items);
            out.extend_from_slice(&encode_document_at_depth(&as_doc, depth + 1)?);
        }
        Value::Binary(subtype, bytes) => {
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.push(*subtype);
            out.extend_from_slice(bytes);
        }
        Value::ObjectId(oid) => out.extend_from_slice(oid.as_bytes()),
        Value::Bool(b) => out.push(if *b { 1 } else { 0 }),
        Value::DateTime(ms) => out.extend_from_slice(&ms.to_le_bytes()),
        Value::Null => {}
        Value::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Decimal128(dec) => encode_decimal128(out, dec),
    }
    Ok(())
}

fn encode_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len = bytes.len() as u32 + 1;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    out.push(0x00);
    Ok(())
}

fn encode_decimal128(out: &mut Vec<u8>, dec: &super::value::Decimal128) {
    out.push(if dec.negative { 1 } else { 0 });
    out.extend_from_slice(&dec.exponent.to_le_bytes());
    let coeff_bytes = dec.coefficient.to_le_bytes();
    out.extend_from_slice(&coeff_bytes[..13]);
}

/// Arrays are encoded exactly like documents, with decimal field names
/// `"0"`, `"1"`, ... in order — the same convention BSON uses, and the
/// simplest way to reuse one record format for both tagged-union kinds.
pub(super) fn array_to_document(items: &[Value]) -> Document {
    let mut doc = Document::new();
    for (i, v) in items.iter().enumerate() {
        doc.insert(i.to_string(), v.clone());
    }
    doc
}
