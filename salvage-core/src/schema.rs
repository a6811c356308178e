//! The entity schema registry.
//!
//! Entity kinds form a single-inheritance hierarchy (`page` →
//! `page.article`), with each kind declaring the fields it adds. The
//! registry is built once at startup and answers the questions lookup
//! options ask when they bind: does this kind (or any of its subtypes) expose
//! a field, and do all subtypes agree on its type?

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Entity kind '{0}' is registered twice")]
    DuplicateKind(String),
    #[error("Entity kind '{kind}' extends unknown kind '{parent}'")]
    UnknownParent { kind: String, parent: String },
    #[error("Legacy id field '{field}' is not declared on '{kind}'")]
    UnknownLegacyIdField { kind: String, field: String },
}

/// A value could not be converted to a field's type.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Could not coerce '{value}' to {kind:?}")]
pub struct CoerceError {
    pub value: String,
    pub kind: FieldKind,
}

/// Storage type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Uuid,
    /// A stored file name, relative to the storage root.
    File,
    /// The id of another entity.
    Reference,
}

impl FieldKind {
    /// Convert a raw value to this field's canonical representation.
    ///
    /// `"06"`, `"6"` and `6` all coerce to the integer `6`.
    pub fn coerce(self, value: &Value) -> Result<Value, CoerceError> {
        let fail = || CoerceError {
            value: match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            kind: self,
        };
        match self {
            FieldKind::Text | FieldKind::File => match value {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(fail()),
            },
            FieldKind::Integer | FieldKind::Reference => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(whole_f64_to_i64))
                    .map(Value::from)
                    .ok_or_else(fail),
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail()),
                _ => Err(fail()),
            },
            FieldKind::Float => match value {
                Value::Number(n) => n.as_f64().map(Value::from).ok_or_else(fail),
                Value::String(s) => s.trim().parse::<f64>().map(Value::from).map_err(|_| fail()),
                _ => Err(fail()),
            },
            FieldKind::Boolean => parse_bool(value).map(Value::Bool).ok_or_else(fail),
            FieldKind::Date => match value {
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
            FieldKind::DateTime => match value {
                Value::String(s) => parse_datetime(s)
                    .map(|dt| Value::String(dt.to_rfc3339()))
                    .ok_or_else(fail),
                _ => Err(fail()),
            },
            FieldKind::Uuid => match value {
                Value::String(s) => uuid::Uuid::parse_str(s.trim())
                    .map(|u| Value::String(u.hyphenated().to_string()))
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
        }
    }
}

/// Interpret common boolean spellings (`true/1/yes`, `false/0/no`).
/// Whole floats inside the `i64` range. `i64::MAX` itself rounds up to
/// 2^63 as a float, so the upper bound is exclusive.
fn whole_f64_to_i64(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse an RFC 3339 or naive ISO datetime (naive values are taken as UTC).
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// A declared field on an entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            max_length: None,
        }
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Coerce and validate a value for this field.
    pub fn clean(&self, value: &Value) -> Result<Value, CoerceError> {
        let coerced = self.kind.coerce(value)?;
        if let (Some(max), Value::String(s)) = (self.max_length, &coerced)
            && s.chars().count() > max
        {
            return Err(CoerceError {
                value: s.clone(),
                kind: self.kind,
            });
        }
        Ok(coerced)
    }
}

/// One registered entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub name: String,
    pub parent: Option<String>,
    /// Fields declared on this kind itself (not inherited).
    pub fields: Vec<FieldDescriptor>,
    /// Name of the field holding the legacy system's identifier, if this
    /// kind records one.
    pub legacy_id_field: Option<String>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            fields: Vec::new(),
            legacy_id_field: None,
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare the legacy id field (also adds it as a field).
    pub fn legacy_id(mut self, field: FieldDescriptor) -> Self {
        self.legacy_id_field = Some(field.name.clone());
        self.fields.push(field);
        self
    }

    pub fn local_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Registry of every entity kind, validated at build time.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, EntityType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Parents must be registered before their subtypes.
    pub fn register(&mut self, entity_type: EntityType) -> Result<&mut Self, SchemaError> {
        if self.types.contains_key(&entity_type.name) {
            return Err(SchemaError::DuplicateKind(entity_type.name));
        }
        if let Some(parent) = &entity_type.parent
            && !self.types.contains_key(parent)
        {
            return Err(SchemaError::UnknownParent {
                kind: entity_type.name.clone(),
                parent: parent.clone(),
            });
        }
        if let Some(field) = &entity_type.legacy_id_field
            && entity_type.local_field(field).is_none()
        {
            return Err(SchemaError::UnknownLegacyIdField {
                kind: entity_type.name.clone(),
                field: field.clone(),
            });
        }
        self.types.insert(entity_type.name.clone(), entity_type);
        Ok(self)
    }

    /// Builder-style registration for fixtures and static setup.
    pub fn with(mut self, entity_type: EntityType) -> Result<Self, SchemaError> {
        self.register(entity_type)?;
        Ok(self)
    }

    pub fn get(&self, kind: &str) -> Option<&EntityType> {
        self.types.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    /// The chain from `kind` up to its root, starting with `kind` itself.
    pub fn lineage(&self, kind: &str) -> Vec<&EntityType> {
        let mut chain = Vec::new();
        let mut current = self.types.get(kind);
        while let Some(t) = current {
            chain.push(t);
            current = t.parent.as_deref().and_then(|p| self.types.get(p));
        }
        chain
    }

    pub fn is_a(&self, kind: &str, ancestor: &str) -> bool {
        self.lineage(kind).iter().any(|t| t.name == ancestor)
    }

    /// `kind` and every registered kind that descends from it.
    pub fn descendants(&self, kind: &str) -> Vec<String> {
        self.types
            .keys()
            .filter(|name| self.is_a(name, kind))
            .cloned()
            .collect()
    }

    /// A field declared on `kind` or inherited from an ancestor. The
    /// intrinsic `slug` and `title` columns are always available.
    pub fn field(&self, kind: &str, name: &str) -> Option<FieldDescriptor> {
        if matches!(name, "slug" | "title" | "url_path") {
            return Some(FieldDescriptor::new(name, FieldKind::Text));
        }
        if name == "id" {
            return Some(FieldDescriptor::new(name, FieldKind::Integer));
        }
        self.lineage(kind)
            .into_iter()
            .find_map(|t| t.local_field(name).cloned())
    }

    /// Strict subtypes of `base` that declare `name` locally, paired with
    /// their descriptor.
    pub fn subtypes_declaring(&self, base: &str, name: &str) -> Vec<(String, FieldDescriptor)> {
        self.types
            .values()
            .filter(|t| t.name != base && self.is_a(&t.name, base))
            .filter_map(|t| t.local_field(name).map(|f| (t.name.clone(), f.clone())))
            .collect()
    }

    /// The legacy id field in effect for `kind`, inherited if necessary.
    pub fn legacy_id_field(&self, kind: &str) -> Option<FieldDescriptor> {
        self.lineage(kind).into_iter().find_map(|t| {
            t.legacy_id_field
                .as_deref()
                .and_then(|name| t.local_field(name).cloned())
        })
    }

    /// Strict subtypes of `base` that declare their own legacy id field.
    pub fn subtypes_with_legacy_id(&self, base: &str) -> Vec<(String, FieldDescriptor)> {
        self.types
            .values()
            .filter(|t| t.name != base && self.is_a(&t.name, base))
            .filter_map(|t| {
                t.legacy_id_field
                    .as_deref()
                    .and_then(|name| t.local_field(name).cloned())
                    .map(|f| (t.name.clone(), f))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_schema() -> Schema {
        Schema::new()
            .with(EntityType::new("page"))
            .unwrap()
            .with(
                EntityType::new("page.article")
                    .extends("page")
                    .legacy_id(FieldDescriptor::new("nid", FieldKind::Integer)),
            )
            .unwrap()
            .with(
                EntityType::new("page.feature")
                    .extends("page.article")
                    .field(FieldDescriptor::new("strapline", FieldKind::Text)),
            )
            .unwrap()
    }

    #[test]
    fn integer_coercion_normalizes_spellings() {
        for raw in [json!("06"), json!("6"), json!(6), json!(6.0)] {
            assert_eq!(FieldKind::Integer.coerce(&raw).unwrap(), json!(6));
        }
        assert!(FieldKind::Integer.coerce(&json!("six")).is_err());
    }

    #[test]
    fn out_of_range_floats_are_not_integers() {
        assert!(FieldKind::Integer.coerce(&json!(1e30)).is_err());
        assert!(FieldKind::Integer.coerce(&json!(-1e19)).is_err());
        assert!(FieldKind::Integer.coerce(&json!(6.5)).is_err());
        assert_eq!(FieldKind::Integer.coerce(&json!(-4.0e3)).unwrap(), json!(-4000));
    }

    #[test]
    fn text_max_length_is_enforced() {
        let f = FieldDescriptor::new("code", FieldKind::Text).max_length(3);
        assert!(f.clean(&json!("abc")).is_ok());
        assert!(f.clean(&json!("abcd")).is_err());
    }

    #[test]
    fn uuid_and_date_coercion() {
        let u = FieldKind::Uuid
            .coerce(&json!("67E55044-10B1-426F-9247-BB680E5FE0C8"))
            .unwrap();
        assert_eq!(u, json!("67e55044-10b1-426f-9247-bb680e5fe0c8"));
        assert_eq!(
            FieldKind::Date.coerce(&json!("2021-03-04")).unwrap(),
            json!("2021-03-04")
        );
        assert!(FieldKind::Date.coerce(&json!("04/03/2021")).is_err());
    }

    #[test]
    fn fields_are_inherited() {
        let schema = page_schema();
        assert_eq!(schema.field("page.feature", "nid").unwrap().kind, FieldKind::Integer);
        assert!(schema.field("page", "nid").is_none());
        assert_eq!(schema.legacy_id_field("page.feature").unwrap().name, "nid");
    }

    #[test]
    fn subtype_queries() {
        let schema = page_schema();
        let declaring = schema.subtypes_declaring("page", "nid");
        assert_eq!(declaring.len(), 1);
        assert_eq!(declaring[0].0, "page.article");

        let mut desc = schema.descendants("page.article");
        desc.sort();
        assert_eq!(desc, vec!["page.article", "page.feature"]);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = Schema::new()
            .with(EntityType::new("page.article").extends("page"))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownParent { .. }));
    }
}
