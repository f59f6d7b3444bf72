use super::value::{tag, Decimal128, Document, ObjectId, Value, MAX_DEPTH};
use crate::errors::{DbError, Result};

/// Decodes a single top-level document from the front of `buf`. Returns the
/// decoded document and the number of bytes consumed, so callers reading a
/// stream of concatenated documents can advance past it.
pub fn decode_document(buf: &[u8]) -> Result<(Document, usize)> {
    decode_document_at(buf, 0, 0)
}

fn fmt_err(offset: u64, reason: impl Into<String>) -> DbError {
    DbError::FormatError {
        offset,
        reason: reason.into(),
    }
}

fn decode_document_at(buf: &[u8], base_offset: u64, depth: u32) -> Result<(Document, usize)> {
    if depth > MAX_DEPTH {
        return Err(fmt_err(base_offset, format!("document nesting exceeds cap of {MAX_DEPTH}")));
    }
    if buf.len() < 4 {
        return Err(fmt_err(base_offset, "truncated document: missing length prefix"));
    }
    let total_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if total_len < 5 {
        return Err(fmt_err(base_offset, format!("declared length {total_len} too small")));
    }
    if buf.len() < total_len {
        return Err(fmt_err(
            base_offset + 4,
            format!("declared length {total_len} exceeds available {}", buf.len()),
        ));
    }
    let mut cursor = 4usize;
    let mut doc = Document::new();
    loop {
        if cursor >= total_len {
            return Err(fmt_err(base_offset + cursor as u64, "missing document terminator"));
        }
        let tag_byte = buf[cursor];
        if tag_byte == 0x00 {
            cursor += 1;
            break;
        }
        cursor += 1;
        let (name, name_len) = decode_cstring(buf, cursor, base_offset)?;
        cursor += name_len;
        let (value, value_len) = decode_payload(buf, cursor, tag_byte, base_offset, depth)?;
        cursor += value_len;
        doc.insert(name, value);
    }
    if cursor != total_len {
        return Err(fmt_err(
            base_offset + cursor as u64,
            format!("trailing garbage: consumed {cursor}, declared length {total_len}"),
        ));
    }
    Ok((doc, total_len))
}

fn decode_cstring(buf: &[u8], start: usize, base_offset: u64) -> Result<(String, usize)> {
    let nul = buf[start..]
        .iter()
        .position(|&b| b == 0x00)
        .ok_or_else(|| fmt_err(base_offset + start as u64, "unterminated field name"))?;
    let s = std::str::from_utf8(&buf[start..start + nul])
        .map_err(|e| fmt_err(base_offset + start as u64, format!("field name not valid UTF-8: {e}")))?
        .to_owned();
    Ok((s, nul + 1))
}

fn need(buf: &[u8], start: usize, len: usize, base_offset: u64, what: &str) -> Result<()> {
    if buf.len() < start + len {
        Err(fmt_err(base_offset + start as u64, format!("truncated {what}")))
    } else {
        Ok(())
    }
}

fn decode_payload(
    buf: &[u8],
    start: usize,
    tag_byte: u8,
    base_offset: u64,
    depth: u32,
) -> Result<(Value, usize)> {
    match tag_byte {
        tag::DOUBLE => {
            need(buf, start, 8, base_offset, "double")?;
            let v = f64::from_le_bytes(buf[start..start + 8].try_into().unwrap());
            Ok((Value::Double(v), 8))
        }
        tag::STRING => {
            need(buf, start, 4, base_offset, "string length")?;
            let len = u32::from_le_bytes(buf[start..start + 4].try_into().unwrap()) as usize;
            if len == 0 {
                return Err(fmt_err(base_offset + start as u64, "string length must include NUL terminator"));
            }
            need(buf, start + 4, len, base_offset, "string body")?;
            let body = &buf[start + 4..start + 4 + len];
            if body[len - 1] != 0x00 {
                return Err(fmt_err(base_offset + start as u64, "string not NUL-terminated"));
            }
            let s = std::str::from_utf8(&body[..len - 1])
                .map_err(|e| fmt_err(base_offset + start as u64, format!("string not valid UTF-8: {e}")))?
                .to_owned();
            Ok((Value::String(s), 4 + len))
        }
        tag::DOCUMENT => {
            let (d, consumed) = decode_document_at(&buf[start..], base_offset + start as u64, depth + 1)?;
            Ok((Value::Document(d), consumed))
        }
        tag::ARRAY => {
            let (d, consumed) = decode_document_at(&buf[start..], base_offset + start as u64, depth + 1)?;
            let items = d.iter().map(|(_, v)| v.clone()).collect();
            Ok((Value::Array(items), consumed))
        }
        tag::BINARY => {
            need(buf, start, 5, base_offset, "binary header")?;
            let len = u32::from_le_bytes(buf[start..start + 4].try_into().unwrap()) as usize;
            let subtype = buf[start + 4];
            need(buf, start + 5, len, base_offset, "binary body")?;
            let bytes = buf[start + 5..start + 5 + len].to_vec();
            Ok((Value::Binary(subtype, bytes), 5 + len))
        }
        tag::OBJECT_ID => {
            need(buf, start, 12, base_offset, "object id")?;
            let mut bytes = [0u8; 12];
            bytes.copy_from_slice(&buf[start..start + 12]);
            Ok((Value::ObjectId(ObjectId(bytes)), 12))
        }
        tag::BOOL => {
            need(buf, start, 1, base_offset, "bool")?;
            match buf[start] {
                0 => Ok((Value::Bool(false), 1)),
                1 => Ok((Value::Bool(true), 1)),
                other => Err(fmt_err(base_offset + start as u64, format!("invalid bool byte {other}"))),
            }
        }
        tag::DATETIME => {
            need(buf, start, 8, base_offset, "datetime")?;
            let ms = i64::from_le_bytes(buf[start..start + 8].try_into().unwrap());
            Ok((Value::DateTime(ms), 8))
        }
        tag::NULL => Ok((Value::Null, 0)),
        tag::INT32 => {
            need(buf, start, 4, base_offset, "int32")?;
            let v = i32::from_le_bytes(buf[start..start + 4].try_into().unwrap());
            Ok((Value::Int32(v), 4))
        }
        tag::INT64 => {
            need(buf, start, 8, base_offset, "int64")?;
            let v = i64::from_le_bytes(buf[start..start + 8].try_into().unwrap());
            Ok((Value::Int64(v), 8))
        }
        tag::DECIMAL128 => {
            need(buf, start, 16, base_offset, "decimal128")?;
            let negative = match buf[start] {
                0 => false,
                1 => true,
                other => return Err(fmt_err(base_offset + start as u64, format!("invalid decimal128 sign byte {other}"))),
            };
            let exponent = i16::from_le_bytes(buf[start + 1..start + 3].try_into().unwrap());
            let mut coeff_bytes = [0u8; 16];
            coeff_bytes[..13].copy_from_slice(&buf[start + 3..start + 16]);
            let coefficient = u128::from_le_bytes(coeff_bytes);
            Ok((
                Value::Decimal128(Decimal128 {
                    negative,
                    exponent,
                    coefficient,
                }),
                16,
            ))
        }
        other => Err(fmt_err(base_offset + start as u64 - 1, format!("unknown tag byte 0x{other:02X}"))),
    }
}
