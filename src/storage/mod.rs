//! Storage for the lifecycle engine
//!
//! The engine talks to memories only through [`MemoryStore`]. Two backends
//! ship with the crate: SQLite in WAL mode and an in-process store.

mod backend;
mod connection;
mod in_memory;
mod migrations;
pub mod queries;
mod sqlite_backend;

pub use backend::MemoryStore;
pub use connection::Storage;
pub use in_memory::InMemoryStore;
pub use migrations::SCHEMA_VERSION;
pub use sqlite_backend::SqliteStore;
