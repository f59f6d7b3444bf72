//! Small, crate-wide utilities: numeric conversions and developer-only tracing.
pub mod devlog;
pub mod num;

