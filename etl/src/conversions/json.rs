use serde_json::{Map, Number, Value};

use crate::conversions::timestamp::format_timestamp;
use crate::types::Cell;

/// Decodes a JSON value, such as a search-index document field, into a [`Cell`].
///
/// Integers that fit an `i64` become [`Cell::I64`], larger ones [`Cell::U64`]; other numbers
/// become [`Cell::F64`]. Objects become maps.
pub fn json_to_cell(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(value) => Cell::Bool(value),
        Value::Number(number) => number_to_cell(&number),
        Value::String(value) => Cell::String(value),
        Value::Array(values) => Cell::Array(values.into_iter().map(json_to_cell).collect()),
        Value::Object(entries) => Cell::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key, json_to_cell(value)))
                .collect(),
        ),
    }
}

fn number_to_cell(number: &Number) -> Cell {
    if let Some(value) = number.as_i64() {
        Cell::I64(value)
    } else if let Some(value) = number.as_u64() {
        Cell::U64(value)
    } else {
        number.as_f64().map_or(Cell::Null, Cell::F64)
    }
}

/// Flattens a JSON document into top-level fields.
///
/// Only the top level is split; nested objects stay as map values.
pub fn json_document_to_record(document: Map<String, Value>) -> Vec<(String, Cell)> {
    document
        .into_iter()
        .map(|(key, value)| (key, json_to_cell(value)))
        .collect()
}

/// Encodes a [`Cell`] as JSON. Non-finite floats become `null`.
pub fn cell_to_json(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(value) => Value::Bool(*value),
        Cell::I32(value) => Value::from(*value),
        Cell::I64(value) => Value::from(*value),
        Cell::U64(value) => Value::from(*value),
        Cell::F32(value) => Number::from_f64(f64::from(*value)).map_or(Value::Null, Value::Number),
        Cell::F64(value) => Number::from_f64(*value).map_or(Value::Null, Value::Number),
        Cell::String(value) => Value::String(value.clone()),
        Cell::Timestamp(value) => Value::String(format_timestamp(value)),
        Cell::Array(values) => Value::Array(values.iter().map(cell_to_json).collect()),
        Cell::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), cell_to_json(value)))
                .collect(),
        ),
    }
}
