//! The target entity model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute names backed by dedicated entity columns rather than the
/// free-form `attrs` map.
pub const INTRINSIC_ATTRS: &[&str] = &[
    "id", "kind", "parent_id", "slug", "title", "live", "url_path", "depth",
];

/// A target entity: a page, image, document, or any other kind registered in
/// the [`Schema`](crate::Schema).
///
/// Tree placement (`parent_id`, `url_path`, `depth`) is owned by the store:
/// callers change it through `EntityStore::add_child` and
/// `EntityStore::move_to`, never by editing these fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Store-assigned id, `None` until the entity is first saved.
    pub id: Option<i64>,
    /// Concrete kind, e.g. `page.article`.
    pub kind: String,
    pub parent_id: Option<i64>,
    pub slug: String,
    pub title: String,
    pub live: bool,
    /// Slug path from below the tree root, e.g. `/home/about/`.
    pub url_path: String,
    pub depth: i64,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Entity {
    /// A new, unsaved entity of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            parent_id: None,
            slug: String::new(),
            title: String::new(),
            live: true,
            url_path: String::new(),
            depth: 0,
            attrs: Map::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set_attr(name, value.into());
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Read an attribute by name, including the intrinsic columns.
    pub fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "id" => self.id.map(Value::from),
            "kind" => Some(Value::from(self.kind.clone())),
            "parent_id" => self.parent_id.map(Value::from),
            "slug" => Some(Value::from(self.slug.clone())),
            "title" => Some(Value::from(self.title.clone())),
            "live" => Some(Value::from(self.live)),
            "url_path" => Some(Value::from(self.url_path.clone())),
            "depth" => Some(Value::from(self.depth)),
            _ => self.attrs.get(name).filter(|v| !v.is_null()).cloned(),
        }
    }

    /// Read a string attribute. Non-string values yield `None`.
    pub fn attr_str(&self, name: &str) -> Option<String> {
        match self.attr(name)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Set an attribute by name. Writable intrinsic columns (`slug`,
    /// `title`, `live`) are routed to their fields; tree columns are ignored.
    pub fn set_attr(&mut self, name: &str, value: Value) {
        match name {
            "slug" => self.slug = value_to_string(&value),
            "title" => self.title = value_to_string(&value),
            "live" => self.live = value.as_bool().unwrap_or(self.live),
            "id" | "kind" | "parent_id" | "url_path" | "depth" => {}
            _ => {
                self.attrs.insert(name.to_string(), value);
            }
        }
    }

    /// Short human-readable description used in log lines and reports.
    pub fn describe(&self) -> String {
        match self.id {
            Some(id) => format!("<{} id={} '{}'>", self.kind, id, self.title),
            None => format!("<{} (new) '{}'>", self.kind, self.title),
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_attrs_route_to_columns() {
        let mut e = Entity::new("page");
        e.set_attr("slug", Value::from("about"));
        e.set_attr("legacy_id", Value::from(12));
        e.set_attr("depth", Value::from(99));

        assert_eq!(e.slug, "about");
        assert_eq!(e.attr("legacy_id"), Some(Value::from(12)));
        assert_eq!(e.depth, 0);
        assert_eq!(e.attr_str("slug").as_deref(), Some("about"));
    }

    #[test]
    fn null_attrs_read_as_missing() {
        let e = Entity::new("image").with_attr("file", Value::Null);
        assert_eq!(e.attr("file"), None);
    }
}
