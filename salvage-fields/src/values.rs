//! Dotted-path extraction of raw values from source rows.

use serde_json::Value;
use thiserror::Error;

/// A value path could not be followed through a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{path}' could not be extracted: {reason}")]
pub struct ValueExtractionError {
    pub path: String,
    pub reason: String,
}

/// Follow `path` through `source`.
///
/// Segments are separated by dots. Each one is an object key or an array
/// index; negative indexes count from the end (`"sizes.-1.width"`). A key
/// containing dots is matched whole before it is split.
pub fn extract_value<'v>(source: &'v Value, path: &str) -> Result<&'v Value, ValueExtractionError> {
    let fail = |reason: String| ValueExtractionError {
        path: path.to_string(),
        reason,
    };

    if let Value::Object(map) = source
        && let Some(value) = map.get(path)
    {
        return Ok(value);
    }

    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let next = match source {
        Value::Object(map) => map
            .get(head)
            .ok_or_else(|| fail(format!("no key '{}'", head)))?,
        Value::Array(items) => {
            let index: i64 = head
                .parse()
                .map_err(|_| fail(format!("'{}' is not an index", head)))?;
            let len = items.len() as i64;
            let resolved = if index < 0 { len + index } else { index };
            if resolved < 0 || resolved >= len {
                return Err(fail(format!("index {} out of range for {} items", index, len)));
            }
            &items[resolved as usize]
        }
        other => return Err(fail(format!("cannot look up '{}' in {}", head, other))),
    };

    match rest {
        Some(rest) => extract_value(next, rest).map_err(|e| fail(e.reason)),
        None => Ok(next),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_indexes_and_nesting() {
        let row = json!({
            "title": "Hello",
            "image": {"sizes": [{"width": 100}, {"width": 800}]},
            "meta.tag": "dotted",
        });
        assert_eq!(extract_value(&row, "title").unwrap(), "Hello");
        assert_eq!(extract_value(&row, "image.sizes.0.width").unwrap(), 100);
        assert_eq!(extract_value(&row, "image.sizes.-1.width").unwrap(), 800);
        assert_eq!(extract_value(&row, "meta.tag").unwrap(), "dotted");
    }

    #[test]
    fn unresolvable_segments_fail() {
        let row = json!({"image": {"sizes": [1, 2]}, "empty": null});
        assert!(extract_value(&row, "missing").is_err());
        assert!(extract_value(&row, "image.sizes.5").is_err());
        assert!(extract_value(&row, "image.sizes.-3").is_err());
        assert!(extract_value(&row, "image.sizes.first").is_err());
        assert!(extract_value(&row, "empty.inner").is_err());
        // A present null is extracted; emptiness is the field's concern.
        assert_eq!(extract_value(&row, "empty").unwrap(), &Value::Null);
    }
}
