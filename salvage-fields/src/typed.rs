//! Scalar field kinds.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use salvage_core::schema::parse_datetime;
use salvage_core::{FieldKind, unquote_plus};
use serde_json::Value;

use crate::error::{ErrorCode, FieldConfigError, FieldError, ValidationError};
use crate::field::{CLEAN_COST_LOW, CleanContext, Field, FieldBase};
use crate::html::{strip_tags, unescape};
use crate::strategy::{MAX_LENGTH_EXCEEDED, Strategy, StrategySlot};

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerce with a core field kind, reporting failures as `incoercible`.
fn coerce(kind: FieldKind, value: &Value, type_name: &str) -> Result<Value, FieldError> {
    kind.coerce(value)
        .map_err(|_| ValidationError::incoercible(display(value), type_name).into())
}

// ── ValueField ──────────────────────────────────────────────────────────────

/// Passes values through untouched.
pub struct ValueField {
    base: FieldBase,
}

impl ValueField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW),
        }
    }
}

impl Field for ValueField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        Ok(value)
    }
}

// ── TextField ───────────────────────────────────────────────────────────────

pub type Modifier = Arc<dyn Fn(String) -> String>;

/// Text with optional HTML stripping, line-break removal and a length
/// limit. Values are percent/plus decoded and trimmed.
pub struct TextField {
    base: FieldBase,
    modifiers: Vec<Modifier>,
    strip_html: bool,
    strip_line_breaks: bool,
    max_length: Option<usize>,
    on_max_length_exceeded: StrategySlot,
}

impl TextField {
    /// Optional by default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, false, CLEAN_COST_LOW)
                .with_default_fallback(Value::String(String::new())),
            modifiers: Vec::new(),
            strip_html: false,
            strip_line_breaks: false,
            max_length: None,
            on_max_length_exceeded: StrategySlot::new("on_max_length_exceeded", MAX_LENGTH_EXCEEDED),
        }
    }

    pub fn modifier(mut self, modifier: impl Fn(String) -> String + 'static) -> Self {
        self.modifiers.push(Arc::new(modifier));
        self
    }

    pub fn strip_html(mut self) -> Self {
        self.strip_html = true;
        self
    }

    pub fn strip_line_breaks(mut self) -> Self {
        self.strip_line_breaks = true;
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn on_max_length_exceeded(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        self.on_max_length_exceeded.set(&self.base.name, strategy)?;
        Ok(self)
    }

    fn to_text(&self, value: &Value) -> Result<String, FieldError> {
        let text = match coerce(FieldKind::Text, value, "text")? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let mut text = unquote_plus(&text);
        for modifier in &self.modifiers {
            text = modifier(text);
        }
        if self.strip_html {
            for pattern in ["<br>", "&nbsp;", "\n", "\r"] {
                text = text.replace(pattern, " ");
            }
            text = strip_tags(&unescape(&text));
        }
        if self.strip_line_breaks {
            text = text.replace("\r\n", " ").replace(['\n', '\r'], " ");
        }
        Ok(text.trim().to_string())
    }
}

impl Field for TextField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let text = self.to_text(&value)?;
        let Some(max) = self.max_length else {
            return Ok(Value::String(text));
        };
        let length = text.chars().count();
        if length <= max {
            return Ok(Value::String(text));
        }

        let strategy = self
            .on_max_length_exceeded
            .resolve(ctx.defaults.on_max_length_exceeded.as_ref(), Strategy::Raise);
        match strategy {
            Strategy::TrimToFit => Ok(Value::String(text.chars().take(max).collect())),
            Strategy::UseFallback => Ok(self.base.fallback_value()),
            Strategy::Custom(handler) => handler(Some(&Value::String(text))),
            _ => Err(ValidationError::new(
                ErrorCode::MaxLengthExceeded,
                format!(
                    "The value is {} characters long, which exceeds the {} character limit.",
                    length, max
                ),
            )
            .into()),
        }
    }
}

// ── Simple coercions ────────────────────────────────────────────────────────

/// Accepts `true/1/yes` and `false/0/no`, case-insensitively.
pub struct BooleanField {
    base: FieldBase,
}

impl BooleanField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW),
        }
    }
}

impl Field for BooleanField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        coerce(FieldKind::Boolean, &value, "bool")
    }
}

pub struct IntegerField {
    base: FieldBase,
}

impl IntegerField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW),
        }
    }
}

impl Field for IntegerField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        coerce(FieldKind::Integer, &value, "int")
    }
}

pub struct FloatField {
    base: FieldBase,
}

impl FloatField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW),
        }
    }
}

impl Field for FloatField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        coerce(FieldKind::Float, &value, "float")
    }
}

/// UUIDs, normalized to the hyphenated lowercase form.
pub struct UuidField {
    base: FieldBase,
}

impl UuidField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW),
        }
    }
}

impl Field for UuidField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        coerce(FieldKind::Uuid, &value, "uuid")
    }
}

// ── Dates ───────────────────────────────────────────────────────────────────

/// Epoch seconds from an integer or an all-digit (optionally negative) string.
fn timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let digits = s.strip_prefix('-').unwrap_or(s);
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn out_of_range(value: &Value, type_name: &str) -> FieldError {
    ValidationError::incoercible(display(value), type_name).into()
}

/// Dates from ISO `YYYY-MM-DD` strings or epoch timestamps, stored as
/// `YYYY-MM-DD`. Unparsable strings become null.
pub struct DateField {
    base: FieldBase,
}

impl DateField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW),
        }
    }
}

impl Field for DateField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        if let Some(ts) = timestamp(&value) {
            let dt = DateTime::from_timestamp(ts, 0).ok_or_else(|| out_of_range(&value, "date"))?;
            return Ok(Value::String(dt.date_naive().format("%Y-%m-%d").to_string()));
        }
        match &value {
            Value::String(s) => {
                let s = s.trim();
                let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()));
                Ok(date
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .unwrap_or(Value::Null))
            }
            other => Err(out_of_range(other, "date")),
        }
    }
}

/// Datetimes from ISO strings or epoch timestamps, stored as RFC 3339 UTC.
/// Unparsable strings become null.
pub struct DateTimeField {
    base: FieldBase,
}

impl DateTimeField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW),
        }
    }
}

impl Field for DateTimeField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        if let Some(ts) = timestamp(&value) {
            let dt = DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| out_of_range(&value, "datetime"))?;
            return Ok(Value::String(dt.to_rfc3339()));
        }
        match &value {
            Value::String(s) => Ok(parse_datetime(s)
                .map(|dt| Value::String(dt.to_rfc3339()))
                .unwrap_or(Value::Null)),
            other => Err(out_of_range(other, "datetime")),
        }
    }
}
