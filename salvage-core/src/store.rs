//! Storage contracts.
//!
//! The migration engine never talks to a database directly. Everything it
//! needs from persistence is expressed by [`EntityStore`] (entities and
//! their tree) and [`CheckpointStore`] (durable resume progress).
//!
//! All methods take `&self`; implementations use interior mutability where
//! they need it. Every write method is atomic on its own.

use chrono::Duration;
use serde_json::Value;

use crate::entity::Entity;
use crate::error::StoreError;
use crate::filter::{Filter, Ranking};
use crate::key::CacheKey;

/// Where a moved entity lands amongst its new siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    FirstChild,
    LastChild,
}

/// A routable site: a hostname/port pair mapped to a tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: i64,
    pub hostname: String,
    pub port: u16,
    pub root_id: i64,
    pub is_default: bool,
}

pub trait EntityStore {
    /// Entities matching `filter`, in natural (id) order.
    fn query(&self, filter: &Filter) -> Result<Vec<Entity>, StoreError>;

    /// Entities matching `filter`, annotated with their rank under
    /// `ranking` and ordered lowest rank first (ties by id).
    fn query_ranked(
        &self,
        filter: &Filter,
        ranking: &Ranking,
    ) -> Result<Vec<(Entity, usize)>, StoreError>;

    fn get(&self, id: i64) -> Result<Option<Entity>, StoreError>;

    /// Insert (assigning `entity.id`) or update an entity. New entities are
    /// created at the top level; use [`add_child`](Self::add_child) to
    /// create one inside the tree.
    fn save(&self, entity: &mut Entity) -> Result<(), StoreError>;

    /// Insert a new entity as the last child of `parent_id`, filling in its
    /// tree columns.
    fn add_child(&self, parent_id: i64, entity: &mut Entity) -> Result<(), StoreError>;

    /// Move an entity (and its descendants) under a new parent. The
    /// in-memory copy held by the caller is not updated; re-fetch it.
    fn move_to(&self, id: i64, new_parent_id: i64, position: Position) -> Result<(), StoreError>;

    /// Direct children, in sibling order.
    fn children(&self, parent_id: i64) -> Result<Vec<Entity>, StoreError>;

    /// The stored child counter of an entity. May drift from the real
    /// number of children after an interrupted move.
    fn count_children(&self, id: i64) -> Result<i64, StoreError>;

    /// Recompute the stored child counter from the actual children.
    fn repair_child_count(&self, id: i64) -> Result<(), StoreError>;

    /// Whether no sibling under `parent_id` (other than `exclude`) uses `slug`.
    fn slug_is_available(
        &self,
        slug: &str,
        parent_id: Option<i64>,
        exclude: Option<i64>,
    ) -> Result<bool, StoreError>;

    fn sites(&self) -> Result<Vec<Site>, StoreError>;

    /// `(value of attr, entity id)` for every entity matching `filter` that
    /// has a scalar `attr`, in id order.
    fn attribute_ids(&self, filter: &Filter, attr: &str) -> Result<Vec<(CacheKey, i64)>, StoreError>;

    /// The first entity of one of `kinds` whose `attr` equals `value`.
    fn get_by_attribute(
        &self,
        kinds: &[String],
        attr: &str,
        value: &Value,
    ) -> Result<Entity, StoreError> {
        let filter = Filter::and(vec![
            Filter::KindIn(kinds.to_vec()),
            Filter::eq(attr, value.clone()),
        ]);
        self.query(&filter)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(kinds.join("|"), attr, value))
    }
}

/// Durable key/value storage with expiry, used for resume checkpoints.
pub trait CheckpointStore {
    /// The stored value, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
