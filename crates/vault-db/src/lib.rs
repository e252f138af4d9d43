//! Data model and persistence for the vault: entities, the `Store`
//! trait, an in-memory backing for tests, and a SQLite backing for
//! production use.

pub mod error;
pub mod memory_store;
pub mod model;
pub mod sqlite_store;
pub mod store;

pub use error::VaultError;
pub use memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;
pub use store::Store;
