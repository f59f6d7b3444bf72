//! The collection heap (§3.2, §3.5): an unordered, singly-linked chain of
//! fixed-size pages, each packing variable-length records back to back.
//!
//! A record is `[4B slot length][1B deleted flag][document bytes]` (§3.2's
//! "length, id-value, encoded body, deleted flag" — the id and body are
//! combined into one document with `_id`/`_body` fields so the existing
//! document codec (C1) can serve as the record format instead of a second,
//! bespoke one). `slot length` is the number of bytes reserved for the
//! document payload, which may exceed the document's own declared length
//! when a record was updated in place with a smaller encoding (§3.5): the
//! slot keeps its original width so every later record's offset stays
//! valid, and the decoder trusts the document's own length prefix rather
//! than the slot width to know where the document ends.

use chrono::Utc;

use crate::codec::{decode_document, encode_document, Document, Value};
use crate::errors::{DbError, Result};
use crate::store::{Page, PageStore, PageType, NONE_PAGE};
use crate::PageCache;

const SLOT_LEN_BYTES: usize = 4;
const DELETED_FLAG_BYTES: usize = 1;
const SLOT_OVERHEAD: usize = SLOT_LEN_BYTES + DELETED_FLAG_BYTES;

/// A record's physical address: the page it lives on and its byte offset
/// within that page's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLoc {
    pub page_id: u32,
    pub offset: u16,
}

impl HeapLoc {
    /// Encodes a locator as an 8-byte `Value::Binary` so it can be stored as
    /// the target of the primary index (§3.2: the primary index maps the id
    /// field to the record that holds it).
    pub fn to_value(self) -> Value {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        bytes[4..8].copy_from_slice(&(self.offset as u32).to_le_bytes());
        Value::Binary(0, bytes.to_vec())
    }

    pub fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Binary(_, bytes) if bytes.len() == 8 => Ok(HeapLoc {
                page_id: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
                offset: u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as u16,
            }),
            other => Err(DbError::FormatError {
                offset: 0,
                reason: format!("expected an 8-byte heap locator, got {other:?}"),
            }),
        }
    }
}

/// Created/updated timestamps carried alongside every heap record body, for
/// diagnostics — not part of the document value a query sees.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Metadata {
    pub fn fresh() -> Self {
        let now = Utc::now().timestamp_millis();
        Metadata {
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    fn to_value(self) -> Value {
        let mut doc = Document::new();
        doc.insert("created_at", Value::DateTime(self.created_at_ms));
        doc.insert("updated_at", Value::DateTime(self.updated_at_ms));
        Value::Document(doc)
    }

    fn from_value(v: &Value) -> Result<Self> {
        let doc = match v {
            Value::Document(d) => d,
            other => {
                return Err(DbError::FormatError {
                    offset: 0,
                    reason: format!("heap record '_meta' is not a document: {other:?}"),
                })
            }
        };
        let created_at_ms = match doc.get("created_at") {
            Some(Value::DateTime(ms)) => *ms,
            _ => {
                return Err(DbError::FormatError {
                    offset: 0,
                    reason: "heap record '_meta' missing 'created_at'".into(),
                })
            }
        };
        let updated_at_ms = match doc.get("updated_at") {
            Some(Value::DateTime(ms)) => *ms,
            _ => {
                return Err(DbError::FormatError {
                    offset: 0,
                    reason: "heap record '_meta' missing 'updated_at'".into(),
                })
            }
        };
        Ok(Metadata { created_at_ms, updated_at_ms })
    }
}

/// Combines an id value, timestamps, and a document body into the single
/// document actually persisted in a heap record.
pub fn make_record_doc(id: &Value, meta: Metadata, body: &Document) -> Document {
    let mut doc = Document::new();
    doc.insert("_id", id.clone());
    doc.insert("_meta", meta.to_value());
    doc.insert("_body", Value::Document(body.clone()));
    doc
}

pub fn split_record_doc(doc: &Document) -> Result<(Value, Metadata, Document)> {
    let id = doc.get("_id").cloned().ok_or_else(|| DbError::FormatError {
        offset: 0,
        reason: "heap record missing '_id'".into(),
    })?;
    let meta = Metadata::from_value(doc.get("_meta").ok_or_else(|| DbError::FormatError {
        offset: 0,
        reason: "heap record missing '_meta'".into(),
    })?)?;
    let body = match doc.get("_body") {
        Some(Value::Document(d)) => d.clone(),
        _ => {
            return Err(DbError::FormatError {
                offset: 0,
                reason: "heap record missing '_body'".into(),
            })
        }
    };
    Ok((id, meta, body))
}

fn read_page(cache: &PageCache, store: &mut PageStore, page_id: u32) -> Result<Page> {
    let page = cache.fetch(page_id, store)?;
    cache.unpin(page_id);
    Ok(page)
}

fn write_page(cache: &PageCache, store: &mut PageStore, page_id: u32, page: Page) -> Result<()> {
    cache.insert_pinned(page_id, page, true, store)?;
    cache.unpin(page_id);
    Ok(())
}

/// Appends `record_doc` to the heap chain rooted at `head`/`tail`, growing
/// the chain with a fresh page when the current tail has no room. Returns
/// the new record's location.
pub fn append(
    store: &mut PageStore,
    cache: &PageCache,
    head: &mut u32,
    tail: &mut u32,
    record_doc: &Document,
) -> Result<HeapLoc> {
    let bytes = encode_document(record_doc)?;
    let needed = SLOT_OVERHEAD + bytes.len();
    let capacity = store.page_size() as usize - crate::store::PAGE_HEADER_LEN - crate::store::PAGE_TRAILER_LEN;
    if needed > capacity {
        return Err(DbError::RecordTooLarge {
            size: bytes.len(),
            capacity: capacity - SLOT_OVERHEAD,
        });
    }

    if *tail == NONE_PAGE {
        let page = store.allocate_page(PageType::Heap)?;
        let id = page.header()?.page_id;
        *head = id;
        *tail = id;
    }

    let mut page = read_page(cache, store, *tail)?;
    let mut header = page.header()?;
    if (header.free_space_offset as usize) + needed > capacity {
        let new_page = store.allocate_page(PageType::Heap)?;
        let new_id = new_page.header()?.page_id;
        header.next = new_id;
        page.set_header(&header);
        page.finalize_crc();
        write_page(cache, store, *tail, page)?;
        *tail = new_id;
        page = read_page(cache, store, *tail)?;
        header = page.header()?;
    }

    let offset = header.free_space_offset;
    let start = offset as usize;
    page.payload_mut()[start..start + SLOT_LEN_BYTES].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
    page.payload_mut()[start + SLOT_LEN_BYTES] = 0;
    page.payload_mut()[start + SLOT_OVERHEAD..start + SLOT_OVERHEAD + bytes.len()].copy_from_slice(&bytes);
    header.free_space_offset = (start + needed) as u16;
    header.entry_count += 1;
    page.set_header(&header);
    page.finalize_crc();
    let page_id = header.page_id;
    write_page(cache, store, page_id, page)?;

    Ok(HeapLoc {
        page_id,
        offset,
    })
}

/// Reads the record at `loc`. Returns `None` if it has been tombstoned.
pub fn read(store: &mut PageStore, cache: &PageCache, loc: HeapLoc) -> Result<Option<Document>> {
    let page = read_page(cache, store, loc.page_id)?;
    let start = loc.offset as usize;
    let deleted = page.payload()[start + SLOT_LEN_BYTES] != 0;
    if deleted {
        return Ok(None);
    }
    let (doc, _) = decode_document(&page.payload()[start + SLOT_OVERHEAD..])?;
    Ok(Some(doc))
}

/// Overwrites the record at `loc` in place if `record_doc`'s encoding still
/// fits the slot's reserved width; otherwise tombstones it and returns
/// `None` so the caller can `append` a replacement elsewhere (§3.5:
/// "updated in place if the new encoding fits, else relocated").
pub fn try_overwrite(store: &mut PageStore, cache: &PageCache, loc: HeapLoc, record_doc: &Document) -> Result<bool> {
    let bytes = encode_document(record_doc)?;
    let mut page = read_page(cache, store, loc.page_id)?;
    let start = loc.offset as usize;
    let slot_len = u32::from_le_bytes(page.payload()[start..start + SLOT_LEN_BYTES].try_into().unwrap()) as usize;
    if bytes.len() > slot_len {
        return Ok(false);
    }
    page.payload_mut()[start + SLOT_OVERHEAD..start + SLOT_OVERHEAD + bytes.len()].copy_from_slice(&bytes);
    page.finalize_crc();
    write_page(cache, store, loc.page_id, page)?;
    Ok(true)
}

/// Marks the record at `loc` as deleted without reclaiming its space.
pub fn tombstone(store: &mut PageStore, cache: &PageCache, loc: HeapLoc) -> Result<()> {
    let mut page = read_page(cache, store, loc.page_id)?;
    let start = loc.offset as usize;
    page.payload_mut()[start + SLOT_LEN_BYTES] = 1;
    page.finalize_crc();
    write_page(cache, store, loc.page_id, page)
}

/// Streams every live `(location, document)` pair in the heap, in physical
/// (page-chain, then in-page) order. Used by full scans and index builds.
pub fn scan(store: &mut PageStore, cache: &PageCache, head: u32) -> Result<Vec<(HeapLoc, Document)>> {
    let mut out = Vec::new();
    let mut cur = head;
    while cur != NONE_PAGE {
        let page = read_page(cache, store, cur)?;
        let header = page.header()?;
        let mut offset = 0usize;
        let used = header.free_space_offset as usize;
        while offset < used {
            let slot_len = u32::from_le_bytes(page.payload()[offset..offset + SLOT_LEN_BYTES].try_into().unwrap()) as usize;
            let deleted = page.payload()[offset + SLOT_LEN_BYTES] != 0;
            if !deleted {
                let (doc, _) = decode_document(&page.payload()[offset + SLOT_OVERHEAD..])?;
                out.push((
                    HeapLoc {
                        page_id: cur,
                        offset: offset as u16,
                    },
                    doc,
                ));
            }
            offset += SLOT_OVERHEAD + slot_len;
        }
        cur = header.next;
    }
    Ok(out)
}

/// Frees every page in the heap chain rooted at `head`. Used when a
/// collection is dropped.
pub fn free_chain(store: &mut PageStore, cache: &PageCache, head: u32) -> Result<()> {
    let mut cur = head;
    while cur != NONE_PAGE {
        let page = read_page(cache, store, cur)?;
        let header = page.header()?;
        store.free_page(cur)?;
        cur = header.next;
    }
    Ok(())
}
