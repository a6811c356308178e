//! Lists of structured items.

use salvage_finder::FinderRegistry;
use serde_json::{Map, Value};

use crate::error::{FieldConfigError, FieldError, ValidationError};
use crate::field::{CLEAN_COST_MEDIUM, CleanContext, Field, FieldBase};
use crate::strategy::FieldDefaults;

/// A list whose items are cleaned by a set of sub-fields.
///
/// Each item becomes an object keyed by sub-field target, or, when
/// flattened, the single sub-field's value. A non-list source value is
/// treated as a one-item list.
pub struct ListField {
    base: FieldBase,
    sub_fields: Vec<Box<dyn Field>>,
    flatten: bool,
}

impl ListField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_MEDIUM)
                .with_default_fallback(Value::Array(Vec::new())),
            sub_fields: Vec::new(),
            flatten: false,
        }
    }

    /// Add a sub-field. Flattened lists keep their single sub-field, so
    /// further calls are recorded and rejected when the field is bound.
    pub fn sub_field(mut self, field: impl Field + 'static) -> Self {
        self.sub_fields.push(Box::new(field));
        self.sub_fields.sort_by_key(|f| f.base().clean_cost);
        self
    }

    /// Produce a list of plain values. Only valid with exactly one sub-field.
    pub fn flatten(mut self) -> Result<Self, FieldConfigError> {
        self.flatten = true;
        self.check_flatten()?;
        Ok(self)
    }

    fn check_flatten(&self) -> Result<(), FieldConfigError> {
        if self.flatten && self.sub_fields.len() != 1 {
            return Err(FieldConfigError::FlattenNeedsOneSubField {
                field: self.base.name.clone(),
                count: self.sub_fields.len(),
            });
        }
        Ok(())
    }

    fn clean_item(
        &self,
        item: &Value,
        ctx: &mut CleanContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let mut ctx = ctx.with_row(item);
        let mut cleaned = Map::new();
        for field in &self.sub_fields {
            match field.contribute(&mut ctx, &mut cleaned) {
                Ok(()) | Err(FieldError::SkipField) => {}
                Err(FieldError::SkipRow) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        if self.flatten {
            let value = self
                .sub_fields
                .first()
                .and_then(|f| cleaned.remove(f.base().target()))
                .unwrap_or(Value::Null);
            return Ok(Some(value));
        }
        Ok(Some(Value::Object(cleaned)))
    }
}

impl Field for ListField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn bind(
        &mut self,
        finders: &FinderRegistry,
        defaults: &FieldDefaults,
    ) -> Result<(), FieldConfigError> {
        self.check_flatten()?;
        for field in &mut self.sub_fields {
            field.bind(finders, defaults)?;
        }
        Ok(())
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        let mut cleaned = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match self.clean_item(item, ctx) {
                Ok(Some(value)) => cleaned.push(value),
                Ok(None) => log::debug!("Field '{}': dropped item {}", self.base.name, i),
                Err(FieldError::Invalid(e)) => {
                    return Err(ValidationError::invalid(format!(
                        "Item {} is invalid: {}",
                        i, e
                    ))
                    .into());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Value::Array(cleaned))
    }
}
