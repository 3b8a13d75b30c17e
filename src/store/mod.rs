//! Persistence layer: libSQL-backed progress store, context summaries, and history.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, ProgressScan, UnitRecord};
