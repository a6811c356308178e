//! SQLite persistence for migrated entities.
//!
//! Provides schema creation, the [`SqliteStore`] implementation of
//! `EntityStore` (filters, ranked queries, tree operations, sites) and the
//! [`SqliteCheckpoints`] key/value store used for resume progress. Backed
//! by rusqlite with the bundled feature.

pub mod checkpoints;
pub mod filter_sql;
pub mod schema;
pub mod store;

pub use checkpoints::SqliteCheckpoints;
pub use schema::{CURRENT_VERSION, SchemaError, create_schema, open_database, open_memory};
pub use store::{DbError, SqliteStore};
