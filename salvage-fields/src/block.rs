//! Block-structured content.

use salvage_finder::FinderRegistry;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{FieldConfigError, FieldError, ValidationError};
use crate::field::{CLEAN_COST_HIGH, CleanContext, Field, FieldBase};
use crate::strategy::FieldDefaults;

/// An ordered list of typed blocks, each `{"type", "value"}`.
///
/// Every block type is cleaned by its own field, which reads from the block
/// object: a field named `value` cleans the block's value. Cleaned blocks
/// get a fresh `id`. Use a [`RichTextField`](crate::RichTextField) for rich
/// text blocks so their links are rewritten too.
pub struct BlockField {
    base: FieldBase,
    blocks: Vec<(String, Box<dyn Field>)>,
    ignored: Vec<String>,
    as_json_string: bool,
}

impl BlockField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_HIGH)
                .with_default_fallback(Value::Array(Vec::new())),
            blocks: Vec::new(),
            ignored: Vec::new(),
            as_json_string: false,
        }
    }

    /// Clean blocks of `block_type` with `field`.
    pub fn block(mut self, block_type: impl Into<String>, field: impl Field + 'static) -> Self {
        self.blocks.push((block_type.into(), Box::new(field)));
        self
    }

    /// Drop blocks of `block_type`.
    pub fn ignore(mut self, block_type: impl Into<String>) -> Self {
        self.ignored.push(block_type.into());
        self
    }

    /// Produce the blocks serialized as a JSON string.
    pub fn as_json_string(mut self) -> Self {
        self.as_json_string = true;
        self
    }

    fn block_field(&self, block_type: &str) -> Option<&dyn Field> {
        self.blocks
            .iter()
            .find(|(t, _)| t == block_type)
            .map(|(_, field)| field.as_ref())
    }

    fn clean_block(
        &self,
        index: usize,
        block: &Value,
        ctx: &mut CleanContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let Some(block_type) = block.get("type").and_then(Value::as_str) else {
            return Err(ValidationError::invalid(format!("Block {} has no type.", index)).into());
        };
        if self.ignored.iter().any(|t| t == block_type) {
            log::debug!("Field '{}': ignoring {} block {}", self.base.name, block_type, index);
            return Ok(None);
        }
        let Some(field) = self.block_field(block_type) else {
            return Err(ValidationError::invalid(format!(
                "Block {} has an unknown type '{}'.",
                index, block_type
            ))
            .into());
        };

        let mut ctx = ctx.with_row(block);
        let mut cleaned = Map::new();
        match field.contribute(&mut ctx, &mut cleaned) {
            Ok(()) => {}
            Err(FieldError::SkipField | FieldError::SkipRow) => {
                log::debug!("Field '{}': dropped {} block {}", self.base.name, block_type, index);
                return Ok(None);
            }
            Err(FieldError::Invalid(e)) => {
                return Err(ValidationError::invalid(format!(
                    "Block {} ({}) is invalid: {}",
                    index, block_type, e
                ))
                .into());
            }
            Err(e) => return Err(e),
        }
        let value = cleaned
            .remove(field.base().target())
            .unwrap_or(Value::Null);
        Ok(Some(json!({
            "type": block_type,
            "value": value,
            "id": Uuid::new_v4().to_string(),
        })))
    }
}

impl Field for BlockField {
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
        for (_, field) in &mut self.blocks {
            field.bind(finders, defaults)?;
        }
        Ok(())
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let blocks = match value {
            Value::Array(blocks) => blocks,
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Array(blocks)) => blocks,
                _ => {
                    return Err(ValidationError::invalid("The value is not a list of blocks.").into());
                }
            },
            other => vec![other],
        };

        let mut cleaned = Vec::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            if let Some(block) = self.clean_block(i, block, ctx)? {
                cleaned.push(block);
            }
        }
        let cleaned = Value::Array(cleaned);
        if self.as_json_string {
            return Ok(Value::String(cleaned.to_string()));
        }
        Ok(cleaned)
    }
}
