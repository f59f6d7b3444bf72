use crate::codec::{decode_document, encode_document, Document, Value};
use crate::errors::{DbError, Result};
use crate::store::{Page, PageHeader, PageType, NONE_PAGE};

/// A B+tree node (§4.5): internal nodes route by key to children; leaf
/// nodes hold the actual doc-id lists and are threaded into a doubly-linked
/// chain for range scans.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Internal {
        keys: Vec<Value>,
        /// Always `keys.len() + 1` children.
        children: Vec<u32>,
    },
    Leaf {
        keys: Vec<Value>,
        /// Doc ids per key, in insertion order (multiset semantics for
        /// non-unique indexes).
        doc_ids: Vec<Vec<Value>>,
        prev: u32,
        next: u32,
    },
}

impl Node {
    pub fn new_leaf() -> Self {
        Node::Leaf {
            keys: Vec::new(),
            doc_ids: Vec::new(),
            prev: NONE_PAGE,
            next: NONE_PAGE,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn key_count(&self) -> usize {
        match self {
            Node::Internal { keys, .. } => keys.len(),
            Node::Leaf { keys, .. } => keys.len(),
        }
    }

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        match self {
            Node::Internal { keys, children } => {
                doc.insert("kind", Value::Int32(0));
                doc.insert("keys", Value::Array(keys.clone()));
                doc.insert(
                    "children",
                    Value::Array(children.iter().map(|c| Value::Int64(*c as i64)).collect()),
                );
            }
            Node::Leaf { keys, doc_ids, prev, next } => {
                doc.insert("kind", Value::Int32(1));
                doc.insert("keys", Value::Array(keys.clone()));
                doc.insert(
                    "doc_ids",
                    Value::Array(doc_ids.iter().map(|ids| Value::Array(ids.clone())).collect()),
                );
                doc.insert("prev", Value::Int64(*prev as i64));
                doc.insert("next", Value::Int64(*next as i64));
            }
        }
        doc
    }

    fn from_document(doc: &Document) -> Result<Self> {
        let bad = |reason: &str| DbError::FormatError {
            offset: 0,
            reason: format!("malformed B+tree node document: {reason}"),
        };
        let kind = match doc.get("kind") {
            Some(Value::Int32(k)) => *k,
            _ => return Err(bad("missing 'kind'")),
        };
        let keys = match doc.get("keys") {
            Some(Value::Array(items)) => items.clone(),
            _ => return Err(bad("missing 'keys'")),
        };
        match kind {
            0 => {
                let children = match doc.get("children") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::Int64(c) => Ok(*c as u32),
                            _ => Err(bad("'children' entry not an int64")),
                        })
                        .collect::<Result<Vec<u32>>>()?,
                    _ => return Err(bad("missing 'children'")),
                };
                Ok(Node::Internal { keys, children })
            }
            1 => {
                let doc_ids = match doc.get("doc_ids") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::Array(ids) => Ok(ids.clone()),
                            _ => Err(bad("'doc_ids' entry not an array")),
                        })
                        .collect::<Result<Vec<Vec<Value>>>>()?,
                    _ => return Err(bad("missing 'doc_ids'")),
                };
                let prev = match doc.get("prev") {
                    Some(Value::Int64(p)) => *p as u32,
                    _ => return Err(bad("missing 'prev'")),
                };
                let next = match doc.get("next") {
                    Some(Value::Int64(n)) => *n as u32,
                    _ => return Err(bad("missing 'next'")),
                };
                Ok(Node::Leaf { keys, doc_ids, prev, next })
            }
            other => Err(bad(&format!("unknown node kind {other}"))),
        }
    }

    /// Encodes this node into a page of the given id and type, fit for
    /// writing through the page store.
    pub fn to_page(&self, page_id: u32, page_size: u32) -> Result<Page> {
        let page_type = if self.is_leaf() { PageType::BTreeLeaf } else { PageType::BTreeInternal };
        let bytes = encode_document(&self.to_document())?;
        let mut page = Page::new_zeroed(page_size);
        let capacity = page.payload().len();
        if bytes.len() > capacity {
            return Err(DbError::DatabaseCorrupt(format!(
                "B+tree node for page {page_id} does not fit in a {page_size}-byte page ({} > {capacity})",
                bytes.len()
            )));
        }
        let (next, prev) = match self {
            Node::Leaf { next, prev, .. } => (*next, *prev),
            Node::Internal { .. } => (NONE_PAGE, NONE_PAGE),
        };
        page.set_header(&PageHeader {
            page_type,
            page_id,
            next,
            prev,
            entry_count: self.key_count() as u16,
            free_space_offset: bytes.len() as u16,
        });
        page.payload_mut()[..bytes.len()].copy_from_slice(&bytes);
        page.finalize_crc();
        Ok(page)
    }

    pub fn from_page(page: &Page) -> Result<Self> {
        let header = page.header()?;
        let len = header.free_space_offset as usize;
        let (doc, _) = decode_document(&page.payload()[..len])?;
        Node::from_document(&doc)
    }
}
