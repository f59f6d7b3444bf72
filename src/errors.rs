use thiserror::Error;

/// The crate-wide error type. Every fallible public operation returns
/// `Result<T, DbError>`.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document's on-disk representation violates the wire format: bad tag
    /// byte, truncated payload, missing terminator, or recursion past the
    /// nesting cap. Carries the byte offset the reader was at when it gave up.
    #[error("format error at offset {offset}: {reason}")]
    FormatError { offset: u64, reason: String },

    /// The on-disk file is structurally inconsistent in a way recovery cannot
    /// repair: a CRC mismatch inside a record the log says is committed, or
    /// the main file shorter than the log's recorded high-water mark. The
    /// engine that raises this closes itself; it must not be reused.
    #[error("database corrupt: {0}")]
    DatabaseCorrupt(String),

    #[error("collection not found: {0}")]
    NoSuchCollection(String),

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("document not found: {0}")]
    NotFound(String),

    /// Raised by a unique index when an insert or update would create a
    /// second document under a key already present. The transaction that
    /// raised it must be rolled back by the caller.
    #[error("unique index violation on '{index}' for key {key}")]
    UniqueViolation { index: String, key: String },

    #[error("index not found: {0}")]
    NoSuchIndex(String),

    #[error("index already exists on field '{0}'")]
    IndexAlreadyExists(String),

    /// A single encoded record (heap slot or B+tree node) does not fit in
    /// one page. Neither the heap (§3.5) nor the B+tree (§4.5) spans a
    /// single logical record across pages, so this is a hard limit rather
    /// than a condition recovery can repair.
    #[error("record of {size} bytes does not fit in a page (capacity {capacity} bytes)")]
    RecordTooLarge { size: usize, capacity: usize },

    /// Returned by any method called after `Engine::close` (or after the
    /// engine fatally closed itself following `DatabaseCorrupt`).
    #[error("engine already disposed")]
    AlreadyDisposed,

    /// Returned when an operation observes a cooperative-cancellation
    /// request at a document or leaf boundary. No partial state is left
    /// behind.
    #[error("operation canceled")]
    Canceled,

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
