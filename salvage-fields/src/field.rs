//! The field contract, shared field configuration and row cleaning.

use std::sync::Arc;

use salvage_core::{Entity, EntityStore, is_empty_value};
use salvage_finder::FinderRegistry;
use serde_json::{Map, Value};

use crate::error::{ErrorCode, FieldConfigError, FieldError, RowErrors, ValidationError};
use crate::fetch::FileServices;
use crate::strategy::{EMPTY_VALUE, FieldDefaults, MISSING_VALUE, Strategy, StrategySlot};
use crate::values::extract_value;

// ── Clean costs ─────────────────────────────────────────────────────────────

pub const CLEAN_COST_LOW: u8 = 1;
pub const CLEAN_COST_MEDIUM_LOW: u8 = 3;
pub const CLEAN_COST_MEDIUM: u8 = 5;
pub const CLEAN_COST_MEDIUM_HIGH: u8 = 7;
pub const CLEAN_COST_HIGH: u8 = 10;

/// A value-level check run after cleaning. Empty values are not checked.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), ValidationError>>;

/// Value used by the `UseFallback` strategy.
#[derive(Clone)]
pub enum Fallback {
    Value(Value),
    Computed(Arc<dyn Fn() -> Value>),
}

impl Fallback {
    pub fn get(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Computed(f) => f(),
        }
    }
}

/// Everything a field may touch while cleaning one row.
pub struct CleanContext<'a> {
    pub store: &'a dyn EntityStore,
    pub finders: &'a mut FinderRegistry,
    pub files: Option<&'a FileServices>,
    pub defaults: &'a FieldDefaults,
    /// The raw source row.
    pub row: &'a Value,
    /// The entity the row will update, if it already exists.
    pub current: Option<&'a Entity>,
}

impl<'a> CleanContext<'a> {
    /// The same context over a different row, used for nested items.
    pub fn with_row<'b>(&'b mut self, row: &'b Value) -> CleanContext<'b> {
        CleanContext {
            store: self.store,
            finders: &mut *self.finders,
            files: self.files,
            defaults: self.defaults,
            row,
            current: self.current,
        }
    }
}

// ── Shared configuration ────────────────────────────────────────────────────

/// Configuration common to every field kind.
#[derive(Clone)]
pub struct FieldBase {
    pub name: String,
    pub source: Option<String>,
    pub target: Option<String>,
    pub required: bool,
    pub clean_cost: u8,
    fallback: Option<Fallback>,
    default_fallback: Value,
    on_missing_value: StrategySlot,
    on_empty_value: StrategySlot,
    validators: Vec<Validator>,
}

impl FieldBase {
    pub fn new(name: impl Into<String>, required: bool, clean_cost: u8) -> Self {
        Self {
            name: name.into(),
            source: None,
            target: None,
            required,
            clean_cost,
            fallback: None,
            default_fallback: Value::Null,
            on_missing_value: StrategySlot::new("on_missing_value", MISSING_VALUE),
            on_empty_value: StrategySlot::new("on_empty_value", EMPTY_VALUE),
            validators: Vec::new(),
        }
    }

    /// Fallback used when none is configured.
    pub fn with_default_fallback(mut self, value: Value) -> Self {
        self.default_fallback = value;
        self
    }

    /// Path of the raw value in the source row.
    pub fn source_path(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    /// Entity attribute the cleaned value is written to.
    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.name)
    }

    pub fn fallback_value(&self) -> Value {
        match &self.fallback {
            Some(f) => f.get(),
            None => self.default_fallback.clone(),
        }
    }

    fn redundant(&self, option: &'static str) -> FieldConfigError {
        FieldConfigError::RedundantForRequired {
            field: self.name.clone(),
            option,
        }
    }

    pub fn set_required(&mut self, required: bool) -> Result<(), FieldConfigError> {
        if required {
            if self.fallback.is_some() {
                return Err(self.redundant("fallback"));
            }
            for slot in [&self.on_missing_value, &self.on_empty_value] {
                if slot.is_set() {
                    return Err(self.redundant(slot.option()));
                }
            }
        }
        self.required = required;
        Ok(())
    }

    pub fn set_fallback(&mut self, fallback: Fallback) -> Result<(), FieldConfigError> {
        if self.required {
            return Err(self.redundant("fallback"));
        }
        self.fallback = Some(fallback);
        Ok(())
    }

    pub fn set_on_missing_value(&mut self, strategy: Strategy) -> Result<(), FieldConfigError> {
        if self.required {
            return Err(self.redundant("on_missing_value"));
        }
        self.on_missing_value.set(&self.name, strategy)
    }

    pub fn set_on_empty_value(&mut self, strategy: Strategy) -> Result<(), FieldConfigError> {
        if self.required {
            return Err(self.redundant("on_empty_value"));
        }
        self.on_empty_value.set(&self.name, strategy)
    }

    pub fn add_validator(&mut self, validator: Validator) {
        self.validators.push(validator);
    }

    /// Required fields always raise.
    pub fn on_missing_value(&self, defaults: &FieldDefaults) -> Strategy {
        if self.required {
            return Strategy::Raise;
        }
        self.on_missing_value
            .resolve(defaults.on_missing_value.as_ref(), Strategy::UseFallback)
    }

    pub fn on_empty_value(&self, defaults: &FieldDefaults) -> Strategy {
        if self.required {
            return Strategy::Raise;
        }
        self.on_empty_value
            .resolve(defaults.on_empty_value.as_ref(), Strategy::UseFallback)
    }

    /// Pull the raw value out of `row`, applying the missing and empty value
    /// strategies. The flag is `false` for replacement values, which are used
    /// without cleaning.
    pub fn extract(
        &self,
        row: &Value,
        defaults: &FieldDefaults,
        is_empty: impl Fn(&Value) -> bool,
    ) -> Result<(Value, bool), FieldError> {
        let path = self.source_path();
        let value = match extract_value(row, path) {
            Ok(value) => value.clone(),
            Err(e) => {
                log::debug!("Field '{}': {}", self.name, e);
                return match self.on_missing_value(defaults) {
                    Strategy::UseFallback => Ok((self.fallback_value(), false)),
                    Strategy::SkipField => Err(FieldError::SkipField),
                    Strategy::SkipRow => Err(FieldError::SkipRow),
                    Strategy::Custom(handler) => Ok((handler(None)?, false)),
                    _ => Err(ValidationError::new(
                        ErrorCode::ValueMissing,
                        format!(
                            "Field '{}' could not extract '{}' from the source data.",
                            self.name, path
                        ),
                    )
                    .into()),
                };
            }
        };

        if is_empty(&value) {
            return match self.on_empty_value(defaults) {
                Strategy::UseFallback => Ok((self.fallback_value(), false)),
                Strategy::SkipField => Err(FieldError::SkipField),
                Strategy::SkipRow => Err(FieldError::SkipRow),
                Strategy::Custom(handler) => Ok((handler(Some(&value))?, false)),
                _ => Err(ValidationError::new(
                    ErrorCode::ValueEmpty,
                    format!(
                        "Field '{}' unexpectedly found an empty value for '{}'.",
                        self.name, path
                    ),
                )
                .into()),
            };
        }
        Ok((value, true))
    }

    /// Apply a recovery strategy to a value that failed with `error`.
    /// Strategies with no recovery of their own raise the error.
    pub fn recover(
        &self,
        strategy: Strategy,
        value: &Value,
        error: ValidationError,
    ) -> Result<Value, FieldError> {
        match strategy {
            Strategy::UseFallback => Ok(self.fallback_value()),
            Strategy::SkipField => Err(FieldError::SkipField),
            Strategy::SkipRow => Err(FieldError::SkipRow),
            Strategy::Custom(handler) => handler(Some(value)),
            _ => Err(error.into()),
        }
    }

    pub fn run_validators(&self, value: &Value) -> Result<(), ValidationError> {
        if is_empty_value(value) {
            return Ok(());
        }
        for validator in &self.validators {
            validator(value)?;
        }
        Ok(())
    }
}

// ── The field contract ──────────────────────────────────────────────────────

/// One attribute's worth of row cleaning.
pub trait Field {
    fn base(&self) -> &FieldBase;

    fn base_mut(&mut self) -> &mut FieldBase;

    /// Check the field against the run's finders and command defaults
    /// before the first row.
    fn bind(
        &mut self,
        _finders: &FinderRegistry,
        _defaults: &FieldDefaults,
    ) -> Result<(), FieldConfigError> {
        Ok(())
    }

    fn is_empty(&self, value: &Value) -> bool {
        is_empty_value(value)
    }

    /// Convert and validate an extracted raw value.
    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError>;

    /// Extract, clean and record this field's value(s) in `cleaned`.
    fn contribute(
        &self,
        ctx: &mut CleanContext<'_>,
        cleaned: &mut Map<String, Value>,
    ) -> Result<(), FieldError> {
        let value = extract_and_clean(self, ctx)?;
        cleaned.insert(self.base().target().to_string(), value);
        Ok(())
    }

    /// Copy this field's cleaned value(s) onto the entity.
    fn update_entity(&self, entity: &mut Entity, cleaned: &Map<String, Value>, _is_new: bool) {
        let target = self.base().target();
        if let Some(value) = cleaned.get(target) {
            entity.set_attr(target, value.clone());
        }
    }
}

/// The default extract-then-clean sequence behind [`Field::contribute`].
pub fn extract_and_clean<F: Field + ?Sized>(
    field: &F,
    ctx: &mut CleanContext<'_>,
) -> Result<Value, FieldError> {
    let base = field.base();
    let (value, needs_cleaning) = base.extract(ctx.row, ctx.defaults, |v| field.is_empty(v))?;
    if !needs_cleaning {
        return Ok(value);
    }
    let cleaned = field.clean(value, ctx)?;
    base.run_validators(&cleaned)?;
    Ok(cleaned)
}

/// Builder methods available on every field kind.
pub trait FieldBuilder: Field + Sized {
    fn source(mut self, path: impl Into<String>) -> Self {
        self.base_mut().source = Some(path.into());
        self
    }

    fn target(mut self, attr: impl Into<String>) -> Self {
        self.base_mut().target = Some(attr.into());
        self
    }

    fn optional(mut self) -> Self {
        self.base_mut().required = false;
        self
    }

    fn required(mut self) -> Result<Self, FieldConfigError> {
        self.base_mut().set_required(true)?;
        Ok(self)
    }

    fn clean_cost(mut self, cost: u8) -> Self {
        self.base_mut().clean_cost = cost;
        self
    }

    fn fallback(mut self, value: impl Into<Value>) -> Result<Self, FieldConfigError> {
        self.base_mut().set_fallback(Fallback::Value(value.into()))?;
        Ok(self)
    }

    fn fallback_with(
        mut self,
        compute: impl Fn() -> Value + 'static,
    ) -> Result<Self, FieldConfigError> {
        self.base_mut()
            .set_fallback(Fallback::Computed(Arc::new(compute)))?;
        Ok(self)
    }

    fn on_missing_value(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        self.base_mut().set_on_missing_value(strategy)?;
        Ok(self)
    }

    fn on_empty_value(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        self.base_mut().set_on_empty_value(strategy)?;
        Ok(self)
    }

    fn validator(
        mut self,
        check: impl Fn(&Value) -> Result<(), ValidationError> + 'static,
    ) -> Self {
        self.base_mut().add_validator(Arc::new(check));
        self
    }
}

impl<F: Field> FieldBuilder for F {}

// ── Field sets ──────────────────────────────────────────────────────────────

/// The outcome of cleaning one row.
#[derive(Debug, Default)]
pub struct CleanedRow {
    pub data: Map<String, Value>,
    pub errors: RowErrors,
}

/// An ordered collection of fields, cleaned cheapest first.
#[derive(Default)]
pub struct FieldSet {
    fields: Vec<Box<dyn Field>>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Fields of equal cost keep their declaration order.
    pub fn add(&mut self, field: impl Field + 'static) {
        self.fields.push(Box::new(field));
        self.fields.sort_by_key(|f| f.base().clean_cost);
    }

    pub fn with(mut self, field: impl Field + 'static) -> Self {
        self.add(field);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in cleaning order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.base().name.as_str()).collect()
    }

    pub fn bind(
        &mut self,
        finders: &FinderRegistry,
        defaults: &FieldDefaults,
    ) -> Result<(), FieldConfigError> {
        for field in &mut self.fields {
            field.bind(finders, defaults)?;
        }
        Ok(())
    }

    /// Clean every field against `ctx.row`.
    ///
    /// Validation errors are collected per field and the field's partial
    /// value dropped. `SkipRow` and non-validation errors end the row
    /// immediately.
    pub fn clean_row(&self, ctx: &mut CleanContext<'_>) -> Result<CleanedRow, FieldError> {
        let mut row = CleanedRow::default();
        for field in &self.fields {
            let base = field.base();
            match field.contribute(ctx, &mut row.data) {
                Ok(()) => {}
                Err(FieldError::SkipField) => {
                    log::debug!("Skipping field '{}'", base.name);
                    row.data.remove(base.target());
                }
                Err(FieldError::Invalid(e)) => {
                    row.data.remove(base.target());
                    row.errors.push(&base.name, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(row)
    }

    pub fn update_entity(&self, entity: &mut Entity, cleaned: &Map<String, Value>, is_new: bool) {
        for field in &self.fields {
            field.update_entity(entity, cleaned, is_new);
        }
    }
}
