use serde_json::Value;

use crate::error::StoreError;
use crate::store::EntityStore;

/// Convert a title or path segment to a URL slug.
///
/// Lowercases ASCII alphanumerics and collapses everything else into single
/// hyphens. Underscores are kept, as legacy paths use them.
pub fn slugify(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_separator = false;

    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            result.push(c.to_ascii_lowercase());
            last_was_separator = false;
        } else if !last_was_separator && !result.is_empty() {
            result.push('-');
            last_was_separator = true;
        }
    }

    if result.ends_with('-') {
        result.pop();
    }

    result
}

/// The name a file is stored under: spaces become underscores and anything
/// other than word characters, `-` and `.` is dropped.
pub fn storage_filename(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') => Some(c),
            _ => None,
        })
        .collect()
}

/// `base`, or `base-2`, `base-3`, ... until a slug unused amongst the
/// children of `parent_id` (ignoring `exclude`) is found.
pub fn unique_slug(
    store: &dyn EntityStore,
    base: &str,
    parent_id: Option<i64>,
    exclude: Option<i64>,
) -> Result<String, StoreError> {
    let mut candidate = base.to_string();
    let mut n = 1;
    while !store.slug_is_available(&candidate, parent_id, exclude)? {
        n += 1;
        candidate = format!("{}-{}", base, n);
    }
    Ok(candidate)
}

/// Values treated as empty by field cleaning.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s == "NULL" || s == "null"
        }
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Our  Team "), "our-team");
        assert_eq!(slugify("page_2"), "page_2");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn storage_filename_strips_unsafe_chars() {
        assert_eq!(storage_filename("My Photo (1).JPG"), "My_Photo_1.JPG");
        assert_eq!(storage_filename("a/b\\c.png"), "abc.png");
    }

    #[test]
    fn empty_values() {
        for v in [json!(null), json!(""), json!("  "), json!("NULL"), json!([]), json!({})] {
            assert!(is_empty_value(&v), "{v} should be empty");
        }
        for v in [json!(0), json!(false), json!("x"), json!([1])] {
            assert!(!is_empty_value(&v), "{v} should not be empty");
        }
    }
}
