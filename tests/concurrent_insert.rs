//! Concurrent insert (§8 end-to-end scenario 5): several threads inserting
//! into the same collection's B+tree-backed primary and secondary indexes at
//! once. The engine serializes the actual page mutations behind its write
//! latch (see `DESIGN.md`'s concurrency-model note), but callers see normal
//! thread-safe `insert` semantics — this test exercises that caller-visible
//! contract, not the internal lock-coupling §5.2 describes for read-only
//! descents.

use std::sync::Arc;
use std::thread;

use tinydb::{Document, Engine, EngineOptions, Filter, Value};

#[test]
fn four_threads_inserting_a_hundred_keys_each_leave_a_valid_tree_of_four_hundred() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
    let people = engine.get_collection("people").unwrap();
    people.create_index("n", false, 0).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let people = Arc::clone(&people);
            thread::spawn(move || {
                for i in 0..100 {
                    let mut doc = Document::new();
                    doc.insert("n", Value::Int32(t * 100 + i));
                    people.insert(doc).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(people.count(&Filter::All).unwrap(), 400);
    assert_eq!(people.validate_primary_index().unwrap(), Ok(()));

    for t in 0..4 {
        for i in 0..100 {
            let hits = people.find(&Filter::Eq("n".into(), Value::Int32(t * 100 + i))).unwrap();
            assert_eq!(hits.len(), 1);
        }
    }
}
