//! The catalog (§3.2, §4.6): persisted metadata for every collection in the
//! database — its heap chain, id-generation strategy and counter, and index
//! registry. The catalog itself is encoded with the document codec (C1) and
//! spans a chain of `PageType::Catalog` pages rooted at the main file
//! header's `catalog_root` (§6.1), the same linking convention the heap uses
//! for its own record chain.

use crate::codec::{decode_document, encode_document, Document, Value};
use crate::collection::id::IdStrategy;
use crate::errors::{DbError, Result};
use crate::store::{PageStore, PageType, NONE_PAGE};
use crate::PageCache;

#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub field: String,
    pub unique: bool,
    /// Planner tie-break priority (§3 of the expanded specification's Open
    /// Question resolutions): lower wins. Defaults to 0.
    pub priority: u32,
    pub root: u32,
}

impl IndexDescriptor {
    fn to_value(&self) -> Value {
        let mut doc = Document::new();
        doc.insert("field", Value::String(self.field.clone()));
        doc.insert("unique", Value::Bool(self.unique));
        doc.insert("priority", Value::Int32(self.priority as i32));
        doc.insert("root", Value::Int64(self.root as i64));
        Value::Document(doc)
    }

    fn from_value(v: &Value) -> Result<Self> {
        let doc = expect_document(v, "index descriptor")?;
        Ok(IndexDescriptor {
            field: expect_string(doc, "field")?,
            unique: expect_bool(doc, "unique")?,
            priority: expect_int(doc, "priority")? as u32,
            root: expect_int(doc, "root")? as u32,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CollectionDescriptor {
    pub name: String,
    pub heap_head: u32,
    pub heap_tail: u32,
    pub id_strategy: IdStrategy,
    pub next_counter: u64,
    /// Unique B+tree mapping id → heap locator (§3.2: "primary index (always
    /// present) on the id field").
    pub primary_root: u32,
    pub indexes: Vec<IndexDescriptor>,
}

impl CollectionDescriptor {
    pub fn new(name: impl Into<String>, primary_root: u32) -> Self {
        CollectionDescriptor {
            name: name.into(),
            heap_head: NONE_PAGE,
            heap_tail: NONE_PAGE,
            id_strategy: IdStrategy::None,
            next_counter: 0,
            primary_root,
            indexes: Vec::new(),
        }
    }

    fn to_value(&self) -> Value {
        let mut doc = Document::new();
        doc.insert("name", Value::String(self.name.clone()));
        doc.insert("heap_head", Value::Int64(self.heap_head as i64));
        doc.insert("heap_tail", Value::Int64(self.heap_tail as i64));
        doc.insert("id_strategy", Value::Int32(self.id_strategy.tag()));
        doc.insert("next_counter", Value::Int64(self.next_counter as i64));
        doc.insert("primary_root", Value::Int64(self.primary_root as i64));
        doc.insert(
            "indexes",
            Value::Array(self.indexes.iter().map(IndexDescriptor::to_value).collect()),
        );
        Value::Document(doc)
    }

    fn from_value(v: &Value) -> Result<Self> {
        let doc = expect_document(v, "collection descriptor")?;
        let tag = expect_int(doc, "id_strategy")? as i32;
        let id_strategy = IdStrategy::from_tag(tag).ok_or_else(|| DbError::FormatError {
            offset: 0,
            reason: format!("unknown id strategy tag {tag}"),
        })?;
        let indexes = match doc.get("indexes") {
            Some(Value::Array(items)) => items.iter().map(IndexDescriptor::from_value).collect::<Result<Vec<_>>>()?,
            _ => return Err(bad("collection descriptor missing 'indexes'")),
        };
        Ok(CollectionDescriptor {
            name: expect_string(doc, "name")?,
            heap_head: expect_int(doc, "heap_head")? as u32,
            heap_tail: expect_int(doc, "heap_tail")? as u32,
            id_strategy,
            next_counter: expect_int(doc, "next_counter")? as u64,
            primary_root: expect_int(doc, "primary_root")? as u32,
            indexes,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub collections: Vec<CollectionDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn get(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CollectionDescriptor> {
        self.collections.iter_mut().find(|c| c.name == name)
    }

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(
            "collections",
            Value::Array(self.collections.iter().map(CollectionDescriptor::to_value).collect()),
        );
        doc
    }

    fn from_document(doc: &Document) -> Result<Self> {
        let collections = match doc.get("collections") {
            Some(Value::Array(items)) => items.iter().map(CollectionDescriptor::from_value).collect::<Result<Vec<_>>>()?,
            _ => return Err(bad("catalog document missing 'collections'")),
        };
        Ok(Catalog { collections })
    }
}

fn bad(reason: &str) -> DbError {
    DbError::FormatError {
        offset: 0,
        reason: reason.to_string(),
    }
}

fn expect_document(v: &Value, what: &str) -> Result<&Document> {
    match v {
        Value::Document(d) => Ok(d),
        other => Err(bad(&format!("expected {what} to be a document, got {other:?}"))),
    }
}

fn expect_string(doc: &Document, field: &str) -> Result<String> {
    match doc.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(bad(&format!("missing or non-string field '{field}'"))),
    }
}

fn expect_bool(doc: &Document, field: &str) -> Result<bool> {
    match doc.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        _ => Err(bad(&format!("missing or non-bool field '{field}'"))),
    }
}

fn expect_int(doc: &Document, field: &str) -> Result<i64> {
    match doc.get(field) {
        Some(Value::Int64(i)) => Ok(*i),
        Some(Value::Int32(i)) => Ok(*i as i64),
        _ => Err(bad(&format!("missing or non-integer field '{field}'"))),
    }
}

const CATALOG_LEN_PREFIX: usize = 4;

/// Persists `catalog`, freeing the chain previously rooted at `old_root` (if
/// any) and writing a fresh one. Returns the new chain's root page id.
pub fn write_spanning(store: &mut PageStore, cache: &PageCache, old_root: u32, catalog: &Catalog) -> Result<u32> {
    if old_root != NONE_PAGE {
        free_chain(store, cache, old_root)?;
    }

    let bytes = encode_document(&catalog.to_document())?;
    let page_size = store.page_size() as usize;
    let capacity_first = page_size - crate::store::PAGE_HEADER_LEN - crate::store::PAGE_TRAILER_LEN - CATALOG_LEN_PREFIX;
    let capacity_rest = page_size - crate::store::PAGE_HEADER_LEN - crate::store::PAGE_TRAILER_LEN;

    let first_page = store.allocate_page(PageType::Catalog)?;
    let first_id = first_page.header()?.page_id;

    let mut chunks: Vec<(u32, Vec<u8>, usize)> = Vec::new();
    let mut cursor = 0usize;
    let first_chunk_len = bytes.len().min(capacity_first);
    chunks.push((first_id, bytes[0..first_chunk_len].to_vec(), CATALOG_LEN_PREFIX));
    cursor += first_chunk_len;

    while cursor < bytes.len() {
        let page = store.allocate_page(PageType::Catalog)?;
        let id = page.header()?.page_id;
        let chunk_len = (bytes.len() - cursor).min(capacity_rest);
        chunks.push((id, bytes[cursor..cursor + chunk_len].to_vec(), 0));
        cursor += chunk_len;
    }

    for i in 0..chunks.len() {
        let (page_id, chunk, prefix_len) = &chunks[i];
        let mut page = cache.fetch(*page_id, store)?;
        cache.unpin(*page_id);
        let mut header = page.header()?;
        header.next = if i + 1 < chunks.len() { chunks[i + 1].0 } else { NONE_PAGE };
        header.free_space_offset = (prefix_len + chunk.len()) as u16;
        page.set_header(&header);
        if *prefix_len == CATALOG_LEN_PREFIX {
            page.payload_mut()[0..CATALOG_LEN_PREFIX].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        }
        page.payload_mut()[*prefix_len..*prefix_len + chunk.len()].copy_from_slice(chunk);
        page.finalize_crc();
        cache.insert_pinned(*page_id, page, true, store)?;
        cache.unpin(*page_id);
    }

    store.set_catalog_root(first_id)?;
    Ok(first_id)
}

/// Reads back a catalog chain rooted at `root`. `NONE_PAGE` means no catalog
/// has been written yet (a brand new database).
pub fn read_spanning(store: &mut PageStore, cache: &PageCache, root: u32) -> Result<Catalog> {
    if root == NONE_PAGE {
        return Ok(Catalog::new());
    }
    let mut buf = Vec::new();
    let mut cur = root;
    let mut total_len = None;
    while cur != NONE_PAGE {
        let page = cache.fetch(cur, store)?;
        cache.unpin(cur);
        let header = page.header()?;
        let used = header.free_space_offset as usize;
        let prefix = if total_len.is_none() { CATALOG_LEN_PREFIX } else { 0 };
        if total_len.is_none() {
            total_len = Some(u32::from_le_bytes(page.payload()[0..CATALOG_LEN_PREFIX].try_into().unwrap()) as usize);
        }
        buf.extend_from_slice(&page.payload()[prefix..used]);
        cur = header.next;
    }
    let total_len = total_len.unwrap_or(0);
    if buf.len() < total_len {
        return Err(DbError::DatabaseCorrupt("catalog chain shorter than its declared length".into()));
    }
    let (doc, _) = decode_document(&buf[..total_len])?;
    Catalog::from_document(&doc)
}

fn free_chain(store: &mut PageStore, cache: &PageCache, head: u32) -> Result<()> {
    let mut cur = head;
    while cur != NONE_PAGE {
        let page = cache.fetch(cur, store)?;
        cache.unpin(cur);
        let header = page.header()?;
        store.free_page(cur)?;
        cur = header.next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_PAGE_SIZE;

    #[test]
    fn empty_catalog_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.db"), DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(16);
        let catalog = Catalog::new();
        let root = write_spanning(&mut store, &cache, NONE_PAGE, &catalog).unwrap();
        let back = read_spanning(&mut store, &cache, root).unwrap();
        assert!(back.collections.is_empty());
    }

    #[test]
    fn catalog_with_collections_and_indexes_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.db"), DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(16);

        let mut catalog = Catalog::new();
        let mut desc = CollectionDescriptor::new("users", 5);
        desc.heap_head = 2;
        desc.heap_tail = 3;
        desc.id_strategy = IdStrategy::ObjectId;
        desc.next_counter = 7;
        desc.indexes.push(IndexDescriptor {
            field: "email".into(),
            unique: true,
            priority: 0,
            root: 9,
        });
        catalog.collections.push(desc);

        let root = write_spanning(&mut store, &cache, NONE_PAGE, &catalog).unwrap();
        let back = read_spanning(&mut store, &cache, root).unwrap();
        assert_eq!(back.collections.len(), 1);
        let got = &back.collections[0];
        assert_eq!(got.name, "users");
        assert_eq!(got.heap_head, 2);
        assert_eq!(got.id_strategy, IdStrategy::ObjectId);
        assert_eq!(got.indexes.len(), 1);
        assert_eq!(got.indexes[0].field, "email");
        assert!(got.indexes[0].unique);
    }

    #[test]
    fn rewriting_the_catalog_frees_the_old_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.db"), DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(16);

        let root1 = write_spanning(&mut store, &cache, NONE_PAGE, &Catalog::new()).unwrap();
        let mut catalog = Catalog::new();
        catalog.collections.push(CollectionDescriptor::new("a", NONE_PAGE));
        let root2 = write_spanning(&mut store, &cache, root1, &catalog).unwrap();

        // The freed page from the first chain should be reused for the
        // second chain's allocation (LIFO free list), not leaked.
        assert_eq!(root1, root2);
    }

    #[test]
    fn large_catalog_spans_multiple_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.db"), DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(64);

        let mut catalog = Catalog::new();
        for i in 0..200 {
            catalog.collections.push(CollectionDescriptor::new(format!("collection_{i}"), NONE_PAGE));
        }
        let root = write_spanning(&mut store, &cache, NONE_PAGE, &catalog).unwrap();
        let back = read_spanning(&mut store, &cache, root).unwrap();
        assert_eq!(back.collections.len(), 200);
    }
}
