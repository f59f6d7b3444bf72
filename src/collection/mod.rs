//! The collection (storage-core component C6, §4.6): a named document heap
//! plus a primary index and zero or more secondary indexes, all persisted
//! through the catalog. `Collection` is a thin handle — the actual heap,
//! index, and catalog state lives behind the engine it was obtained from;
//! this mirrors the teacher crate's `Collection`, which likewise forwards
//! to state shared with its `Engine` rather than owning storage itself.

pub mod catalog;
pub mod heap;
pub mod id;

use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::btree::{self, BTree, Direction, DEFAULT_MAX_KEYS};
use crate::codec::{cmp_value, eq_value, Document, Value};
use crate::engine::EngineShared;
use crate::errors::{DbError, Result};
use crate::query::{choose_index, Filter, IndexProbe};
use heap::{HeapLoc, Metadata};
use id::IdStrategy;

fn primary_index_name(collection: &str) -> String {
    format!("{collection}.$primary")
}

fn secondary_index_name(collection: &str, field: &str) -> String {
    format!("{collection}.{field}")
}

/// Index build/usage statistics (supplemented feature, not in the
/// distilled specification): exposed read-only via `Collection::index_stats`.
#[derive(Debug, Clone, Copy)]
pub struct IndexStats {
    pub keys: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub build_time_ms: u64,
}

pub struct Collection {
    name: String,
    engine: Weak<EngineShared>,
}

impl Collection {
    pub(crate) fn new(name: String, engine: Weak<EngineShared>) -> Self {
        Collection { name, engine }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn shared(&self) -> Result<Arc<EngineShared>> {
        self.engine.upgrade().ok_or(DbError::AlreadyDisposed)
    }

    /// Inserts `body`. If `body` has no `_id` field, one is generated using
    /// the collection's id strategy, deciding that strategy (defaulting to
    /// `ObjectId`) on the collection's very first insert if it was never
    /// pre-declared via `create_index`-style configuration (§4.6: "set at
    /// first insert if not pre-declared").
    pub fn insert(&self, mut body: Document) -> Result<Value> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let _guard = shared.write_lock.lock();

        let mut catalog = shared.catalog.write();
        let descriptor = catalog.get_mut(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;

        if descriptor.id_strategy == IdStrategy::None && body.get("_id").is_none() {
            descriptor.id_strategy = IdStrategy::ObjectId;
        }
        let id = match body.remove("_id") {
            Some(existing) => existing,
            None => {
                descriptor.next_counter += 1;
                descriptor.id_strategy.generate(descriptor.next_counter)
            }
        };

        let mut store = shared.store.lock();
        let record_doc = heap::make_record_doc(&id, Metadata::fresh(), &body);
        let loc = heap::append(&mut store, &shared.cache, &mut descriptor.heap_head, &mut descriptor.heap_tail, &record_doc)?;

        let mut primary = BTree::open(&mut store, &shared.cache, descriptor.primary_root, DEFAULT_MAX_KEYS, true, primary_index_name(&self.name));
        if let Err(e) = primary.insert(id.clone(), loc.to_value()) {
            heap::tombstone(&mut store, &shared.cache, loc)?;
            return Err(e);
        }
        descriptor.primary_root = primary.root();

        for index in descriptor.indexes.clone() {
            let value = body.get_path(&index.field).cloned().unwrap_or(Value::Null);
            let mut tree = BTree::open(&mut store, &shared.cache, index.root, DEFAULT_MAX_KEYS, index.unique, secondary_index_name(&self.name, &index.field));
            if let Err(e) = tree.insert(value, id.clone()) {
                // Compensate: this insert is not part of a real rollback-
                // capable transaction, so undo what already succeeded.
                primary.delete(&id, &loc.to_value()).ok();
                descriptor.primary_root = primary.root();
                heap::tombstone(&mut store, &shared.cache, loc)?;
                return Err(e);
            }
            if let Some(desc) = descriptor.indexes.iter_mut().find(|i| i.field == index.field) {
                desc.root = tree.root();
            }
        }

        shared.persist_catalog(&mut store, &catalog)?;
        drop(store);
        drop(catalog);
        shared.commit_dirty_pages()?;
        Ok(id)
    }

    /// Looks up a document by its primary id.
    pub fn find_by_id(&self, id: &Value) -> Result<Option<Document>> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let catalog = shared.catalog.read();
        let descriptor = catalog.get(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;

        let mut store = shared.store.lock();
        let mut primary = BTree::open(&mut store, &shared.cache, descriptor.primary_root, DEFAULT_MAX_KEYS, true, primary_index_name(&self.name));
        let locs = primary.find(id)?;
        let Some(loc_value) = locs.into_iter().next() else {
            return Ok(None);
        };
        let loc = HeapLoc::from_value(&loc_value)?;
        match heap::read(&mut store, &shared.cache, loc)? {
            Some(record) => {
                let (_, _, body) = heap::split_record_doc(&record)?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    /// Updates the document with primary id `id` in place. Returns `false`
    /// if no such document exists.
    pub fn update(&self, id: &Value, new_body: Document) -> Result<bool> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let _guard = shared.write_lock.lock();

        let mut catalog = shared.catalog.write();
        let descriptor = catalog.get_mut(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;

        let mut store = shared.store.lock();
        let mut primary = BTree::open(&mut store, &shared.cache, descriptor.primary_root, DEFAULT_MAX_KEYS, true, primary_index_name(&self.name));
        let locs = primary.find(id)?;
        let Some(old_loc_value) = locs.into_iter().next() else {
            return Ok(false);
        };
        let old_loc = HeapLoc::from_value(&old_loc_value)?;
        let Some(old_record) = heap::read(&mut store, &shared.cache, old_loc)? else {
            return Ok(false);
        };
        let (_, old_meta, old_body) = heap::split_record_doc(&old_record)?;

        let meta = Metadata {
            created_at_ms: old_meta.created_at_ms,
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        let new_record = heap::make_record_doc(id, meta, &new_body);

        let new_loc = if heap::try_overwrite(&mut store, &shared.cache, old_loc, &new_record)? {
            old_loc
        } else {
            heap::tombstone(&mut store, &shared.cache, old_loc)?;
            let loc = heap::append(&mut store, &shared.cache, &mut descriptor.heap_head, &mut descriptor.heap_tail, &new_record)?;
            primary.delete(id, &old_loc_value)?;
            primary.insert(id.clone(), loc.to_value())?;
            descriptor.primary_root = primary.root();
            loc
        };
        let _ = new_loc;

        for index in descriptor.indexes.clone() {
            let old_value = old_body.get_path(&index.field).cloned().unwrap_or(Value::Null);
            let new_value = new_body.get_path(&index.field).cloned().unwrap_or(Value::Null);
            if eq_value(&old_value, &new_value) {
                continue;
            }
            let mut tree = BTree::open(&mut store, &shared.cache, index.root, DEFAULT_MAX_KEYS, index.unique, secondary_index_name(&self.name, &index.field));
            tree.delete(&old_value, id)?;
            tree.insert(new_value, id.clone())?;
            if let Some(desc) = descriptor.indexes.iter_mut().find(|i| i.field == index.field) {
                desc.root = tree.root();
            }
        }

        shared.persist_catalog(&mut store, &catalog)?;
        drop(store);
        drop(catalog);
        shared.commit_dirty_pages()?;
        Ok(true)
    }

    /// Deletes the document with primary id `id`. Returns `false` if no
    /// such document exists.
    pub fn delete(&self, id: &Value) -> Result<bool> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let _guard = shared.write_lock.lock();

        let mut catalog = shared.catalog.write();
        let descriptor = catalog.get_mut(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;

        let mut store = shared.store.lock();
        let mut primary = BTree::open(&mut store, &shared.cache, descriptor.primary_root, DEFAULT_MAX_KEYS, true, primary_index_name(&self.name));
        let locs = primary.find(id)?;
        let Some(loc_value) = locs.into_iter().next() else {
            return Ok(false);
        };
        let loc = HeapLoc::from_value(&loc_value)?;
        let Some(record) = heap::read(&mut store, &shared.cache, loc)? else {
            return Ok(false);
        };
        let (_, _, body) = heap::split_record_doc(&record)?;

        heap::tombstone(&mut store, &shared.cache, loc)?;
        primary.delete(id, &loc_value)?;
        descriptor.primary_root = primary.root();

        for index in descriptor.indexes.clone() {
            let value = body.get_path(&index.field).cloned().unwrap_or(Value::Null);
            let mut tree = BTree::open(&mut store, &shared.cache, index.root, DEFAULT_MAX_KEYS, index.unique, secondary_index_name(&self.name, &index.field));
            tree.delete(&value, id)?;
            if let Some(desc) = descriptor.indexes.iter_mut().find(|i| i.field == index.field) {
                desc.root = tree.root();
            }
        }

        shared.persist_catalog(&mut store, &catalog)?;
        drop(store);
        drop(catalog);
        shared.commit_dirty_pages()?;
        Ok(true)
    }

    /// Returns every live document, in heap order.
    pub fn find_all(&self) -> Result<Vec<Document>> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let catalog = shared.catalog.read();
        let descriptor = catalog.get(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;
        let mut store = shared.store.lock();
        let records = heap::scan(&mut store, &shared.cache, descriptor.heap_head)?;
        records
            .into_iter()
            .map(|(_, doc)| heap::split_record_doc(&doc).map(|(_, _, body)| body))
            .collect()
    }

    /// Evaluates `filter`, probing an index when the planner finds a usable
    /// conjunct (§4.6), falling back to a full heap scan otherwise.
    pub fn find(&self, filter: &Filter) -> Result<Vec<Document>> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let catalog = shared.catalog.read();
        let descriptor = catalog.get(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;
        let mut store = shared.store.lock();

        let Some(planned) = choose_index(filter, &descriptor.indexes) else {
            let records = heap::scan(&mut store, &shared.cache, descriptor.heap_head)?;
            return records
                .into_iter()
                .filter_map(|(_, doc)| match heap::split_record_doc(&doc) {
                    Ok((_, _, body)) => filter.eval(&body).then_some(Ok(body)),
                    Err(e) => Some(Err(e)),
                })
                .collect();
        };

        let mut index_tree = BTree::open(&mut store, &shared.cache, planned.index.root, DEFAULT_MAX_KEYS, planned.index.unique, secondary_index_name(&self.name, &planned.index.field));
        let ids: Vec<Value> = match &planned.probe {
            IndexProbe::Eq(v) => index_tree.find(v)?,
            IndexProbe::In(values) => {
                let mut out = Vec::new();
                for v in values {
                    out.extend(index_tree.find(v)?);
                }
                out
            }
            IndexProbe::Range { low, high } => index_tree
                .find_range(low.as_ref(), high.as_ref(), Direction::Forward)?
                .into_iter()
                .map(|(_, id)| id)
                .collect(),
        };

        let mut primary = BTree::open(&mut store, &shared.cache, descriptor.primary_root, DEFAULT_MAX_KEYS, true, primary_index_name(&self.name));
        let mut out = Vec::new();
        for id in ids {
            let locs = primary.find(&id)?;
            let Some(loc_value) = locs.into_iter().next() else { continue };
            let loc = HeapLoc::from_value(&loc_value)?;
            let Some(record) = heap::read(&mut store, &shared.cache, loc)? else { continue };
            let (_, _, body) = heap::split_record_doc(&record)?;
            if planned.residual.eval(&body) {
                out.push(body);
            }
        }
        Ok(out)
    }

    pub fn count(&self, filter: &Filter) -> Result<usize> {
        Ok(self.find(filter)?.len())
    }

    /// Creates a secondary index on `field`, building it by scanning the
    /// existing heap (§3.5: "rebuilt by scanning ... when created on a
    /// non-empty collection").
    pub fn create_index(&self, field: &str, unique: bool, priority: u32) -> Result<()> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let _guard = shared.write_lock.lock();

        let mut catalog = shared.catalog.write();
        let descriptor = catalog.get_mut(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;
        if descriptor.indexes.iter().any(|i| i.field == field) {
            return Err(DbError::IndexAlreadyExists(field.to_string()));
        }

        let started = Instant::now();
        let mut store = shared.store.lock();
        let mut tree = BTree::create(&mut store, &shared.cache, DEFAULT_MAX_KEYS, unique, secondary_index_name(&self.name, field))?;
        let records = heap::scan(&mut store, &shared.cache, descriptor.heap_head)?;
        for (_, record) in records {
            let (id, _, body) = heap::split_record_doc(&record)?;
            let value = body.get_path(field).cloned().unwrap_or(Value::Null);
            tree.insert(value, id)?;
        }
        let root = tree.root();
        let build_time_ms = started.elapsed().as_millis() as u64;

        descriptor.indexes.push(catalog::IndexDescriptor {
            field: field.to_string(),
            unique,
            priority,
            root,
        });
        shared
            .index_build_ms
            .lock()
            .insert((self.name.clone(), field.to_string()), build_time_ms);

        shared.persist_catalog(&mut store, &catalog)?;
        drop(store);
        drop(catalog);
        shared.commit_dirty_pages()?;
        Ok(())
    }

    /// Drops the secondary index on `field`, freeing its pages.
    pub fn drop_index(&self, field: &str) -> Result<()> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let _guard = shared.write_lock.lock();

        let mut catalog = shared.catalog.write();
        let descriptor = catalog.get_mut(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;
        let pos = descriptor.indexes.iter().position(|i| i.field == field).ok_or_else(|| DbError::NoSuchIndex(field.to_string()))?;
        let removed = descriptor.indexes.remove(pos);

        let mut store = shared.store.lock();
        btree::free_tree(&mut store, &shared.cache, removed.root)?;
        shared.persist_catalog(&mut store, &catalog)?;
        drop(store);
        drop(catalog);
        shared.commit_dirty_pages()?;
        shared.index_build_ms.lock().remove(&(self.name.clone(), field.to_string()));
        Ok(())
    }

    /// Runs the primary index's `validate()` (§4.5, §8 Testable Property 2):
    /// strictly ascending keys, every child subtree within its parent's
    /// separator bounds, uniform leaf depth, minimum occupancy, and a leaf
    /// chain consistent with in-order descent. `Ok(Err(reason))` carries the
    /// first violation found rather than panicking.
    pub fn validate_primary_index(&self) -> Result<std::result::Result<(), String>> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let catalog = shared.catalog.read();
        let descriptor = catalog.get(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;
        let mut store = shared.store.lock();
        let mut tree = BTree::open(&mut store, &shared.cache, descriptor.primary_root, DEFAULT_MAX_KEYS, true, primary_index_name(&self.name));
        Ok(tree.validate())
    }

    /// Diagnostics for the index on `field` (supplemented feature).
    pub fn index_stats(&self, field: &str) -> Result<IndexStats> {
        let shared = self.shared()?;
        shared.check_disposed()?;
        let catalog = shared.catalog.read();
        let descriptor = catalog.get(&self.name).ok_or_else(|| DbError::NoSuchCollection(self.name.clone()))?;
        let index = descriptor.indexes.iter().find(|i| i.field == field).ok_or_else(|| DbError::NoSuchIndex(field.to_string()))?;

        let mut store = shared.store.lock();
        let mut tree = BTree::open(&mut store, &shared.cache, index.root, DEFAULT_MAX_KEYS, index.unique, secondary_index_name(&self.name, field));
        let pairs = tree.all()?;
        let entries = pairs.len();
        let keys = pairs.iter().fold((0usize, None::<&Value>), |(count, prev), (k, _)| match prev {
            Some(p) if cmp_value(p, k) == std::cmp::Ordering::Equal => (count, Some(k)),
            _ => (count + 1, Some(k)),
        }).0;

        let metrics = shared.cache.metrics_snapshot();
        let build_time_ms = shared.index_build_ms.lock().get(&(self.name.clone(), field.to_string())).copied().unwrap_or(0);
        Ok(IndexStats {
            keys,
            entries,
            hits: metrics.hits,
            misses: metrics.misses,
            build_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineOptions};

    fn doc(name: &str, age: i32) -> Document {
        Document::from_fields(vec![("name".into(), Value::String(name.into())), ("age".into(), Value::Int32(age))])
    }

    #[test]
    fn insert_and_find_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("people").unwrap();
        let id = col.insert(doc("alice", 30)).unwrap();
        let found = col.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&Value::String("alice".into())));
        assert!(col.find_by_id(&Value::Int32(999)).unwrap().is_none());
    }

    #[test]
    fn unique_index_violation_is_surfaced_and_does_not_orphan_the_heap_record() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("people").unwrap();
        col.create_index("email", true, 0).unwrap();

        col.insert(Document::from_fields(vec![("email".into(), Value::String("x@example.com".into()))])).unwrap();
        let second = col.insert(Document::from_fields(vec![("email".into(), Value::String("x@example.com".into()))]));
        assert!(matches!(second, Err(DbError::UniqueViolation { .. })));
        assert_eq!(col.find_all().unwrap().len(), 1);
    }

    #[test]
    fn update_relocates_when_the_new_encoding_no_longer_fits() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("people").unwrap();
        let id = col.insert(doc("a", 1)).unwrap();
        // Long enough to outgrow the original slot (forcing a relocation)
        // but well within a single 4072-byte page payload.
        assert!(col.update(&id, doc(&"x".repeat(500), 2)).unwrap());
        let found = col.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.get("age"), Some(&Value::Int32(2)));
    }

    #[test]
    fn update_with_a_body_too_large_for_any_page_returns_record_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("people").unwrap();
        let id = col.insert(doc("a", 1)).unwrap();
        let err = col.update(&id, doc(&"x".repeat(4096), 2)).unwrap_err();
        assert!(matches!(err, DbError::RecordTooLarge { .. }));
    }

    #[test]
    fn delete_removes_document_and_index_entries() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("people").unwrap();
        col.create_index("name", false, 0).unwrap();
        let id = col.insert(doc("a", 1)).unwrap();
        assert!(col.delete(&id).unwrap());
        assert!(!col.delete(&id).unwrap());
        assert!(col.find_by_id(&id).unwrap().is_none());
        let hits = col.find(&Filter::Eq("name".into(), Value::String("a".into()))).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn range_scan_over_an_indexed_field_returns_ids_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("nums").unwrap();
        col.create_index("n", false, 0).unwrap();
        for i in 0..100 {
            col.insert(Document::from_fields(vec![("n".into(), Value::Int32(i))])).unwrap();
        }
        let filter = Filter::And(vec![Filter::Ge("n".into(), Value::Int32(30)), Filter::Le("n".into(), Value::Int32(40))]);
        let hits = col.find(&filter).unwrap();
        assert_eq!(hits.len(), 11);
    }

    #[test]
    fn create_index_on_a_nonempty_collection_backfills_existing_documents() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("people").unwrap();
        col.insert(doc("a", 1)).unwrap();
        col.insert(doc("b", 2)).unwrap();
        col.create_index("name", false, 0).unwrap();
        let stats = col.index_stats("name").unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.keys, 2);
    }

    #[test]
    fn drop_index_removes_it_from_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("people").unwrap();
        col.create_index("name", false, 0).unwrap();
        col.drop_index("name").unwrap();
        assert!(matches!(col.index_stats("name"), Err(DbError::NoSuchIndex(_))));
    }
}
