//! JSON files holding a top-level array of rows.

use std::path::PathBuf;

use serde_json::Value;

use super::{Reader, ReaderError};

/// Loads the whole file on first use.
pub struct JsonReader {
    path: PathBuf,
    rows: Option<Vec<Value>>,
}

impl JsonReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: None,
        }
    }

    fn rows(&mut self) -> Result<&[Value], ReaderError> {
        if self.rows.is_none() {
            let display = self.path.display().to_string();
            let content = std::fs::read_to_string(&self.path).map_err(|source| ReaderError::Io {
                path: display.clone(),
                source,
            })?;
            match serde_json::from_str(&content)? {
                Value::Array(rows) => self.rows = Some(rows),
                _ => return Err(ReaderError::NotAnArray(display)),
            }
        }
        Ok(self.rows.as_deref().unwrap_or_default())
    }
}

impl Reader for JsonReader {
    fn source(&self) -> String {
        format!("json:{}", self.path.display())
    }

    fn total_rows(&mut self) -> Result<Option<u64>, ReaderError> {
        Ok(Some(self.rows()?.len() as u64))
    }

    fn fetch(&mut self, offset: u64, limit: Option<u64>) -> Result<Vec<Value>, ReaderError> {
        let take = limit.map_or(usize::MAX, |l| l as usize);
        Ok(self
            .rows()?
            .iter()
            .skip(offset as usize)
            .take(take)
            .cloned()
            .collect())
    }
}
