//! CSV files with a header row.

use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value};

use super::{Reader, ReaderError};

/// Convert a raw CSV cell to the JSON value it most likely stands for.
///
/// Cells are trimmed. `null` becomes null and `true`/`false` become
/// booleans (any case). Digit strings become integers and decimal strings
/// floats, unless they have a leading zero, which marks codes rather than
/// numbers.
pub fn sanitize_cell(cell: &str) -> Value {
    let value = cell.trim();
    if value.is_empty() {
        return Value::String(String::new());
    }
    match value.to_lowercase().as_str() {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    let unsigned = value.trim_start_matches('-');
    if !unsigned.is_empty() && !unsigned.starts_with('0') {
        if unsigned.chars().all(|c| c.is_ascii_digit())
            && let Ok(int) = value.parse::<i64>()
        {
            return Value::from(int);
        }
        let dots = unsigned.matches('.').count();
        if dots == 1
            && unsigned.len() > 1
            && unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
            && let Some(float) = value.parse::<f64>().ok().and_then(Number::from_f64)
        {
            return Value::Number(float);
        }
    }
    Value::String(value.to_string())
}

/// Reads a whole CSV file into memory, one JSON object per record keyed
/// by the header row.
pub struct CsvReader {
    path: PathBuf,
    rows: Option<Vec<Value>>,
}

impl CsvReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse CSV content. Malformed records are logged and skipped.
    pub fn parse(content: &str) -> Result<Vec<Value>, ReaderError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("Skipping malformed CSV row: {e}");
                    continue;
                }
            };
            let mut row = Map::new();
            for (i, name) in headers.iter().enumerate() {
                let cell = record.get(i).unwrap_or("");
                row.insert(name.clone(), sanitize_cell(cell));
            }
            rows.push(Value::Object(row));
        }
        Ok(rows)
    }

    fn rows(&mut self) -> Result<&[Value], ReaderError> {
        if self.rows.is_none() {
            let content = std::fs::read_to_string(&self.path).map_err(|source| ReaderError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
            let rows = Self::parse(&content)?;
            log::debug!("Read {} rows from {}", rows.len(), self.path.display());
            self.rows = Some(rows);
        }
        Ok(self.rows.as_deref().unwrap_or_default())
    }
}

impl Reader for CsvReader {
    fn source(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn total_rows(&mut self) -> Result<Option<u64>, ReaderError> {
        Ok(Some(self.rows()?.len() as u64))
    }

    fn fetch(&mut self, offset: u64, limit: Option<u64>) -> Result<Vec<Value>, ReaderError> {
        let rows = self.rows()?;
        let take = limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows.iter().skip(offset as usize).take(take).cloned().collect())
    }
}
