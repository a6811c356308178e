//! Raw SQL over a SQLite connection, paginated with `LIMIT`/`OFFSET`.

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};

use super::{Reader, ReaderError};

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Runs `query` once per page, each row becoming an object keyed by
/// column name. The query must not carry its own `LIMIT`.
pub struct SqlReader<'c> {
    conn: &'c Connection,
    query: String,
}

impl<'c> SqlReader<'c> {
    pub const DEFAULT_PAGE_SIZE: u64 = 1000;

    pub fn new(conn: &'c Connection, query: impl Into<String>) -> Self {
        Self {
            conn,
            query: query.into().trim().trim_end_matches(';').to_string(),
        }
    }

    /// The query for one page.
    pub fn paged_query(&self, offset: u64, limit: Option<u64>) -> String {
        let mut sql = self.query.clone();
        match limit {
            Some(limit) => sql.push_str(&format!(" LIMIT {}", limit)),
            None if offset > 0 => sql.push_str(" LIMIT -1"),
            None => {}
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }
}

impl Reader for SqlReader<'_> {
    fn source(&self) -> String {
        format!("sql:{}", self.query)
    }

    fn default_page_size(&self) -> Option<u64> {
        Some(Self::DEFAULT_PAGE_SIZE)
    }

    fn total_rows(&mut self) -> Result<Option<u64>, ReaderError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM ({})", self.query),
            [],
            |row| row.get(0),
        )?;
        Ok(Some(count.max(0) as u64))
    }

    fn fetch(&mut self, offset: u64, limit: Option<u64>) -> Result<Vec<Value>, ReaderError> {
        let sql = self.paged_query(offset, limit);
        log::debug!("Fetching: {}", sql);
        let mut stmt = self.conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (i, name) in columns.iter().enumerate() {
                object.insert(name.clone(), to_json(row.get_ref(i)?));
            }
            out.push(Value::Object(object));
        }
        Ok(out)
    }
}
