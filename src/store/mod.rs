//! Persistence layer: libSQL-backed completion records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlCompletionStore;
pub use traits::{CompletionRecord, CompletionStore};
