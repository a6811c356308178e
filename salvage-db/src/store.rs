//! The SQLite [`EntityStore`].

use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use salvage_core::{
    CacheKey, Entity, EntityStore, Filter, Position, Ranking, Site, StoreError,
};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::filter_sql::{attr_expr, compile, compile_ranking};
use crate::schema::{SchemaError, open_memory};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Attribute encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Entity not found: {kind} with id '{id}'")]
    NotFound { kind: String, id: i64 },
    #[error("Integrity error: {0}")]
    Integrity(String),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::integrity(msg.unwrap_or_else(|| err.to_string()))
            }
            DbError::NotFound { kind, id } => StoreError::not_found(kind, "id", id),
            DbError::Integrity(msg) => StoreError::integrity(msg),
            other => StoreError::backend(other.to_string()),
        }
    }
}

const ENTITY_COLUMNS: &str = "id, kind, parent_id, slug, title, live, url_path, depth, attrs";

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let attrs_json: String = row.get(8)?;
    let attrs: Map<String, Value> = serde_json::from_str(&attrs_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    Ok(Entity {
        id: Some(row.get(0)?),
        kind: row.get(1)?,
        parent_id: row.get(2)?,
        slug: row.get(3)?,
        title: row.get(4)?,
        live: row.get(5)?,
        url_path: row.get(6)?,
        depth: row.get(7)?,
        attrs,
    })
}

fn child_url_path(parent_url_path: &str, slug: &str) -> String {
    format!("{}{}/", parent_url_path, slug)
}

fn root_url_path(slug: &str) -> String {
    if slug.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", slug)
    }
}

/// Tree position of a stored entity, as needed by the tree operations.
struct Node {
    id: i64,
    parent_id: Option<i64>,
    slug: String,
    url_path: String,
    depth: i64,
}

/// SQLite-backed entity store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// A store over a fresh in-memory database.
    pub fn open_memory() -> Result<Self, DbError> {
        Ok(Self::new(open_memory()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ── Sites ───────────────────────────────────────────────────────────────

    /// Register a site. Making a site the default clears the flag elsewhere.
    pub fn add_site(
        &self,
        hostname: &str,
        port: u16,
        root_id: i64,
        is_default: bool,
    ) -> Result<Site, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        if is_default {
            tx.execute("UPDATE sites SET is_default = 0", [])?;
        }
        tx.execute(
            "INSERT INTO sites (hostname, port, root_id, is_default) VALUES (?1, ?2, ?3, ?4)",
            params![hostname.to_lowercase(), port, root_id, is_default],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Site {
            id,
            hostname: hostname.to_lowercase(),
            port,
            root_id,
            is_default,
        })
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn node(&self, id: i64) -> Result<Node, DbError> {
        self.conn
            .query_row(
                "SELECT id, parent_id, slug, url_path, depth FROM entities WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Node {
                        id: row.get(0)?,
                        parent_id: row.get(1)?,
                        slug: row.get(2)?,
                        url_path: row.get(3)?,
                        depth: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound {
                kind: "entity".to_string(),
                id,
            })
    }

    fn select(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Entity>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params), entity_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rewrite `url_path` and `depth` for every descendant of `id` after its
    /// own path changed from `old_path` to `new_path`.
    fn rewrite_descendants(
        &self,
        id: i64,
        old_path: &str,
        new_path: &str,
        depth_delta: i64,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "WITH RECURSIVE sub(id) AS (
                 SELECT id FROM entities WHERE parent_id = ?1
                 UNION ALL
                 SELECT e.id FROM entities e JOIN sub ON e.parent_id = sub.id
             )
             UPDATE entities
             SET url_path = ?2 || substr(url_path, ?3),
                 depth = depth + ?4
             WHERE id IN (SELECT id FROM sub)",
            params![id, new_path, old_path.chars().count() as i64 + 1, depth_delta],
        )?;
        Ok(())
    }

    fn is_descendant(&self, id: i64, ancestor: i64) -> Result<bool, DbError> {
        let found: bool = self.conn.query_row(
            "WITH RECURSIVE sub(id) AS (
                 SELECT id FROM entities WHERE parent_id = ?1
                 UNION ALL
                 SELECT e.id FROM entities e JOIN sub ON e.parent_id = sub.id
             )
             SELECT EXISTS(SELECT 1 FROM sub WHERE id = ?2)",
            params![ancestor, id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn insert(&self, entity: &mut Entity) -> Result<(), DbError> {
        let url_path = root_url_path(&entity.slug);
        self.conn.execute(
            "INSERT INTO entities (kind, parent_id, slug, title, live, url_path, depth, attrs)
             VALUES (?1, NULL, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                entity.kind,
                entity.slug,
                entity.title,
                entity.live,
                url_path,
                serde_json::to_string(&entity.attrs)?,
            ],
        )?;
        entity.id = Some(self.conn.last_insert_rowid());
        entity.parent_id = None;
        entity.url_path = url_path;
        entity.depth = 1;
        Ok(())
    }

    fn update(&self, id: i64, entity: &mut Entity) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let node = self.node(id)?;

        let mut url_path = node.url_path.clone();
        if node.slug != entity.slug {
            url_path = match node.parent_id {
                Some(parent_id) => child_url_path(&self.node(parent_id)?.url_path, &entity.slug),
                None => root_url_path(&entity.slug),
            };
        }

        tx.execute(
            "UPDATE entities
             SET slug = ?2, title = ?3, live = ?4, url_path = ?5, attrs = ?6,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![
                id,
                entity.slug,
                entity.title,
                entity.live,
                url_path,
                serde_json::to_string(&entity.attrs)?,
            ],
        )?;
        if url_path != node.url_path {
            self.rewrite_descendants(id, &node.url_path, &url_path, 0)?;
        }
        tx.commit()?;

        entity.parent_id = node.parent_id;
        entity.depth = node.depth;
        entity.url_path = url_path;
        Ok(())
    }

    fn insert_child(&self, parent_id: i64, entity: &mut Entity) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let parent = self.node(parent_id)?;
        let url_path = child_url_path(&parent.url_path, &entity.slug);
        let depth = parent.depth + 1;

        tx.execute(
            "INSERT INTO entities (kind, parent_id, slug, title, live, url_path, depth, sort_order, attrs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                     (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM entities WHERE parent_id = ?2),
                     ?8)",
            params![
                entity.kind,
                parent_id,
                entity.slug,
                entity.title,
                entity.live,
                url_path,
                depth,
                serde_json::to_string(&entity.attrs)?,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE entities SET numchild = numchild + 1 WHERE id = ?1",
            params![parent_id],
        )?;
        tx.commit()?;

        entity.id = Some(id);
        entity.parent_id = Some(parent_id);
        entity.url_path = url_path;
        entity.depth = depth;
        Ok(())
    }

    fn move_node(&self, id: i64, new_parent_id: i64, position: Position) -> Result<(), DbError> {
        if id == new_parent_id || self.is_descendant(new_parent_id, id)? {
            return Err(DbError::Integrity(format!(
                "cannot move entity {} beneath itself",
                id
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        let node = self.node(id)?;
        let parent = self.node(new_parent_id)?;

        let clash: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE parent_id = ?1 AND slug = ?2 AND id != ?3)",
            params![parent.id, node.slug, id],
            |row| row.get(0),
        )?;
        if clash {
            return Err(DbError::Integrity(format!(
                "slug '{}' is already in use beneath {}",
                node.slug, parent.url_path
            )));
        }

        let sort_sql = match position {
            Position::FirstChild => {
                "SELECT COALESCE(MIN(sort_order), 1) - 1 FROM entities WHERE parent_id = ?1"
            }
            Position::LastChild => {
                "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM entities WHERE parent_id = ?1"
            }
        };
        let sort_order: i64 = tx.query_row(sort_sql, params![parent.id], |row| row.get(0))?;

        let new_path = child_url_path(&parent.url_path, &node.slug);
        let new_depth = parent.depth + 1;

        tx.execute(
            "UPDATE entities
             SET parent_id = ?2, sort_order = ?3, url_path = ?4, depth = ?5,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![id, parent.id, sort_order, new_path, new_depth],
        )?;
        self.rewrite_descendants(id, &node.url_path, &new_path, new_depth - node.depth)?;

        if let Some(old_parent) = node.parent_id {
            tx.execute(
                "UPDATE entities SET numchild = MAX(numchild - 1, 0) WHERE id = ?1",
                params![old_parent],
            )?;
        }
        tx.execute(
            "UPDATE entities SET numchild = numchild + 1 WHERE id = ?1",
            params![parent.id],
        )?;
        tx.commit()?;

        log::debug!("Moved entity {} from {} to {}", id, node.url_path, new_path);
        Ok(())
    }
}

impl EntityStore for SqliteStore {
    fn query(&self, filter: &Filter) -> Result<Vec<Entity>, StoreError> {
        let mut params = Vec::new();
        let where_sql = compile(filter, &mut params);
        let sql = format!(
            "SELECT {} FROM entities WHERE {} ORDER BY id",
            ENTITY_COLUMNS, where_sql
        );
        Ok(self.select(&sql, params)?)
    }

    fn query_ranked(
        &self,
        filter: &Filter,
        ranking: &Ranking,
    ) -> Result<Vec<(Entity, usize)>, StoreError> {
        let mut params = Vec::new();
        let rank_sql = compile_ranking(ranking, &mut params);
        let where_sql = compile(filter, &mut params);
        let sql = format!(
            "SELECT {}, {} AS rank FROM entities WHERE {} ORDER BY rank, id",
            ENTITY_COLUMNS, rank_sql, where_sql
        );

        let mut stmt = self.conn.prepare(&sql).map_err(DbError::from)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let rank: i64 = row.get(9)?;
                Ok((entity_from_row(row)?, rank as usize))
            })
            .map_err(DbError::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(DbError::from)?);
        }
        Ok(out)
    }

    fn get(&self, id: i64) -> Result<Option<Entity>, StoreError> {
        let sql = format!("SELECT {} FROM entities WHERE id = ?1", ENTITY_COLUMNS);
        let entity = self
            .conn
            .query_row(&sql, params![id], entity_from_row)
            .optional()
            .map_err(DbError::from)?;
        Ok(entity)
    }

    fn save(&self, entity: &mut Entity) -> Result<(), StoreError> {
        match entity.id {
            Some(id) => self.update(id, entity)?,
            None => self.insert(entity)?,
        }
        Ok(())
    }

    fn add_child(&self, parent_id: i64, entity: &mut Entity) -> Result<(), StoreError> {
        if !entity.is_new() {
            return Err(StoreError::integrity(format!(
                "{} is already saved; use move_to",
                entity.describe()
            )));
        }
        Ok(self.insert_child(parent_id, entity)?)
    }

    fn move_to(&self, id: i64, new_parent_id: i64, position: Position) -> Result<(), StoreError> {
        Ok(self.move_node(id, new_parent_id, position)?)
    }

    fn children(&self, parent_id: i64) -> Result<Vec<Entity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM entities WHERE parent_id = ?1 ORDER BY sort_order, id",
            ENTITY_COLUMNS
        );
        Ok(self.select(&sql, vec![SqlValue::Integer(parent_id)])?)
    }

    fn count_children(&self, id: i64) -> Result<i64, StoreError> {
        let count = self
            .conn
            .query_row(
                "SELECT numchild FROM entities WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DbError::from)?;
        count.ok_or_else(|| StoreError::not_found("entity", "id", id))
    }

    fn repair_child_count(&self, id: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE entities
                 SET numchild = (SELECT COUNT(*) FROM entities c WHERE c.parent_id = ?1)
                 WHERE id = ?1
                   AND numchild != (SELECT COUNT(*) FROM entities c WHERE c.parent_id = ?1)",
                params![id],
            )
            .map_err(DbError::from)?;
        if changed > 0 {
            log::warn!("Repaired child count of entity {}", id);
        }
        Ok(())
    }

    fn slug_is_available(
        &self,
        slug: &str,
        parent_id: Option<i64>,
        exclude: Option<i64>,
    ) -> Result<bool, StoreError> {
        let taken: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM entities
                     WHERE parent_id IS ?1 AND slug = ?2 AND id IS NOT ?3
                 )",
                params![parent_id, slug, exclude],
                |row| row.get(0),
            )
            .map_err(DbError::from)?;
        Ok(!taken)
    }

    fn sites(&self) -> Result<Vec<Site>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, hostname, port, root_id, is_default FROM sites ORDER BY id")
            .map_err(DbError::from)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Site {
                    id: row.get(0)?,
                    hostname: row.get(1)?,
                    port: row.get(2)?,
                    root_id: row.get(3)?,
                    is_default: row.get(4)?,
                })
            })
            .map_err(DbError::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(DbError::from)?);
        }
        Ok(out)
    }

    fn attribute_ids(&self, filter: &Filter, attr: &str) -> Result<Vec<(CacheKey, i64)>, StoreError> {
        let mut params = Vec::new();
        let expr = attr_expr(attr, &mut params);
        let where_sql = compile(filter, &mut params);
        let sql = format!(
            "SELECT {}, id FROM entities WHERE {} ORDER BY id",
            expr, where_sql
        );

        let mut stmt = self.conn.prepare(&sql).map_err(DbError::from)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((row.get::<_, SqlValue>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(DbError::from)?;
        let mut out = Vec::new();
        for row in rows {
            let (value, id) = row.map_err(DbError::from)?;
            let key = match value {
                SqlValue::Integer(i) => CacheKey::Int(i),
                SqlValue::Real(f) => CacheKey::Float(f.to_bits()),
                SqlValue::Text(s) => CacheKey::Text(s),
                SqlValue::Null | SqlValue::Blob(_) => continue,
            };
            out.push((key, id));
        }
        Ok(out)
    }
}
