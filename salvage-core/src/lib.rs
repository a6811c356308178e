//! Shared types for the salvage migration toolkit.
//!
//! This crate defines the entity model, cache keys, query filters, the
//! schema registry and the storage contracts. The finder, field and import
//! crates are written against these types; `salvage-db` implements the
//! storage contracts on top of SQLite.

pub mod entity;
pub mod error;
pub mod filter;
pub mod key;
pub mod schema;
pub mod store;
pub mod util;
pub mod urlpath;

pub use entity::{Entity, INTRINSIC_ATTRS};
pub use error::StoreError;
pub use filter::{Filter, Ranking};
pub use key::CacheKey;
pub use schema::{CoerceError, EntityType, FieldDescriptor, FieldKind, Schema, SchemaError};
pub use store::{CheckpointStore, EntityStore, Position, Site};
pub use urlpath::{LegacyHosts, UrlParts, filename_from_url, normalize_path, unquote_plus};
pub use util::{is_empty_value, slugify, storage_filename, unique_slug};
