//! TinyDb: an embedded, single-file document database storage core.
//!
//! TinyDb owns one data file end to end: a paged file store with a dual
//! (primary/shadow) header for crash-safe header updates, a write-ahead log
//! with group commit and checkpointing, a B+tree index engine shared by
//! primary and secondary indexes, and a BSON-style document codec. The
//! public entry point is [`Engine`]; it hands out [`Collection`] handles,
//! each a named document heap plus its indexes.
//!
//! ```no_run
//! use tinydb::{Engine, EngineOptions, Document, Value};
//!
//! # fn main() -> tinydb::Result<()> {
//! let engine = Engine::open("example.tinydb", EngineOptions::default())?;
//! let people = engine.create_collection("people")?;
//! let mut doc = Document::new();
//! doc.insert("name", Value::String("ada".to_owned()));
//! people.insert(doc)?;
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod btree;
pub mod cache;
pub mod codec;
pub mod collection;
pub mod engine;
pub mod errors;
pub mod logger;
pub mod query;
pub mod store;
pub mod utils;
pub mod wal;

pub use cache::{CacheMetricsSnapshot, PageCache};
pub use codec::{BinarySubtype, Decimal128, Document, ObjectId, Value};
pub use collection::id::IdStrategy;
pub use collection::{Collection, IndexStats};
pub use engine::{Engine, EngineOptions, Transaction};
pub use errors::{DbError, Result};
pub use query::{Filter, IndexProbe, PlannedQuery};
