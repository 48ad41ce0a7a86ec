//! Raw form input to column-typed values
//!
//! Every field is attempted before anything is reported, so a submission with
//! several bad fields comes back with all of them marked at once.

use crate::database::statement::SqlValue;
use crate::schema::{ColumnDescriptor, FieldErrors, SemanticType};
use std::collections::HashMap;

/// Raw values that check a boolean column
pub const TRUTHY_TOKENS: [&str; 4] = ["on", "true", "1", "True"];

/// A value bound to a named column or parameter, with the cast its store expects
#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue {
    pub name: String,
    pub value: SqlValue,
    pub cast_type: Option<String>,
}

/// Convert one non-blank raw value according to its semantic type
pub fn coerce_value(semantic_type: SemanticType, raw: &str) -> Result<SqlValue, String> {
    let value = match semantic_type {
        SemanticType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|error| error.to_string())?,
        SemanticType::Floating => raw
            .trim()
            .parse::<f64>()
            .map(SqlValue::Float)
            .map_err(|error| error.to_string())?,
        SemanticType::Boolean => SqlValue::Bool(TRUTHY_TOKENS.contains(&raw)),
        SemanticType::Json => serde_json::from_str(raw)
            .map(SqlValue::Json)
            .map_err(|error| error.to_string())?,
        SemanticType::Binary => SqlValue::Bytes(raw.as_bytes().to_vec()),
        // Dates go through as text; the store casts ISO strings itself
        SemanticType::DateTime | SemanticType::Text | SemanticType::Other => {
            SqlValue::Text(raw.to_string())
        }
    };
    Ok(value)
}

/// What a blank or missing field becomes
///
/// `None` means the field is left out entirely so the store can fill it in.
pub fn blank_value(column: &ColumnDescriptor) -> Option<SqlValue> {
    // Generated columns are omitted even outside the key: binding NULL to an
    // identity or GENERATED ALWAYS column is rejected by the store, and an
    // omitted serial column takes its sequence value.
    if column.is_primary_key || column.is_generated {
        return None;
    }
    match column.semantic_type {
        SemanticType::Boolean => Some(SqlValue::Bool(false)),
        _ => Some(SqlValue::Null),
    }
}

fn invalid(error: String) -> String {
    format!("Invalid value: {}", error)
}

/// Coerce a submitted form against a table's columns, in column order
///
/// Returns the full value set or the per-field errors; never a partial set.
pub fn coerce_row(
    columns: &[ColumnDescriptor],
    form: &HashMap<String, String>,
) -> Result<Vec<BoundValue>, FieldErrors> {
    let mut values = Vec::with_capacity(columns.len());
    let mut errors = FieldErrors::default();

    for column in columns {
        let raw = form.get(&column.name).map(String::as_str).unwrap_or("");
        let value = if raw.is_empty() {
            match blank_value(column) {
                Some(value) => value,
                None => continue,
            }
        } else {
            match coerce_value(column.semantic_type, raw) {
                Ok(value) => value,
                Err(error) => {
                    errors.fields.insert(column.name.clone(), invalid(error));
                    continue;
                }
            }
        };
        values.push(BoundValue {
            name: column.name.clone(),
            value,
            cast_type: column.cast_type.clone(),
        });
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(errors)
    }
}

/// Coerce a single watermark or argument value for a typed target
pub fn coerce_single(semantic_type: SemanticType, raw: &str) -> Result<SqlValue, String> {
    if raw.is_empty() {
        return Ok(match semantic_type {
            SemanticType::Boolean => SqlValue::Bool(false),
            _ => SqlValue::Null,
        });
    }
    coerce_value(semantic_type, raw).map_err(invalid)
}
