//! Argument resolution against an execution context.
//!
//! Argument values are classified by their first character:
//! - `#text`: literal; one leading `#` is stripped and the rest is passed through.
//! - `@name`: context reference; `@user_input` always yields the request text.
//! - `@name::field`: field of a mapping-valued context entry (`null` if the field is absent).
//! - anything else: passed through unchanged.

use serde_json::Value;

use conductor_core::context::{ExecutionContext, USER_INPUT_KEY};
use conductor_core::error::{ConductorError, Result};
use conductor_core::types::Args;

const LITERAL_MARKER: char = '#';
const REFERENCE_MARKER: char = '@';
const FIELD_SEPARATOR: &str = "::";

/// Resolve every top-level value in `raw_args`.
pub fn resolve(raw_args: &Args, context: &ExecutionContext, user_input: &str) -> Result<Args> {
    raw_args
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, context, user_input)?)))
        .collect()
}

/// Resolve a single argument value.
pub fn resolve_value(value: &Value, context: &ExecutionContext, user_input: &str) -> Result<Value> {
    let Some(text) = value.as_str() else {
        return Ok(value.clone());
    };

    if let Some(literal) = text.strip_prefix(LITERAL_MARKER) {
        return Ok(Value::String(literal.to_string()));
    }

    match text.strip_prefix(REFERENCE_MARKER) {
        Some(reference) => resolve_reference(reference, context, user_input),
        None => Ok(value.clone()),
    }
}

fn resolve_reference(reference: &str, context: &ExecutionContext, user_input: &str) -> Result<Value> {
    if let Some((var_name, field)) = reference.split_once(FIELD_SEPARATOR) {
        let value = context
            .get(var_name)
            .ok_or_else(|| ConductorError::UnresolvedVariable(var_name.to_string()))?;
        let mapping = value
            .as_object()
            .ok_or_else(|| ConductorError::InvalidReference(var_name.to_string()))?;
        return Ok(mapping.get(field).cloned().unwrap_or(Value::Null));
    }

    if reference == USER_INPUT_KEY {
        return Ok(Value::String(user_input.to_string()));
    }

    context
        .get(reference)
        .cloned()
        .ok_or_else(|| ConductorError::UnresolvedVariable(reference.to_string()))
}
