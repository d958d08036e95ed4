use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::conversions::bool::render_bool;
use crate::conversions::json::cell_to_json;
use crate::conversions::timestamp::format_timestamp;
use crate::types::ColumnType;

/// A single value flowing from a source object to a destination table.
///
/// Sources hand over heterogeneous records (relational rows, columnar rows, search-index
/// documents); all of them are decoded into [`Cell`]s so that inference, null-fill and coercion
/// share one representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Timestamp(NaiveDateTime),
    Array(Vec<Cell>),
    Map(BTreeMap<String, Cell>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Infers the [`ColumnType`] of this value from its runtime variant.
    ///
    /// Returns [`None`] for [`Cell::Null`]. Empty containers infer a text element type.
    pub fn infer_type(&self) -> Option<ColumnType> {
        let typ = match self {
            Cell::Null => return None,
            Cell::Bool(_) => ColumnType::Boolean,
            Cell::I32(_) => ColumnType::Integer {
                bits: 32,
                signed: true,
            },
            Cell::I64(_) => ColumnType::Integer {
                bits: 64,
                signed: true,
            },
            Cell::U64(_) => ColumnType::Integer {
                bits: 64,
                signed: false,
            },
            Cell::F32(_) => ColumnType::Float { bits: 32 },
            Cell::F64(_) => ColumnType::Float { bits: 64 },
            Cell::String(_) => ColumnType::Text,
            Cell::Timestamp(_) => ColumnType::Timestamp,
            Cell::Array(values) => {
                let element = values
                    .iter()
                    .find_map(Cell::infer_type)
                    .unwrap_or(ColumnType::Text);
                ColumnType::Array(Box::new(element))
            }
            Cell::Map(entries) => {
                let value = entries
                    .values()
                    .find_map(Cell::infer_type)
                    .unwrap_or(ColumnType::Text);
                ColumnType::Map(Box::new(value))
            }
        };

        Some(typ)
    }

    /// Renders the value as text, as stored in a text column.
    ///
    /// Returns [`None`] for [`Cell::Null`]. Containers render as compact JSON.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Cell::Null => return None,
            Cell::Bool(value) => render_bool(*value).to_owned(),
            Cell::I32(value) => value.to_string(),
            Cell::I64(value) => value.to_string(),
            Cell::U64(value) => value.to_string(),
            Cell::F32(value) => value.to_string(),
            Cell::F64(value) => value.to_string(),
            Cell::String(value) => value.clone(),
            Cell::Timestamp(value) => format_timestamp(value),
            Cell::Array(_) | Cell::Map(_) => cell_to_json(self).to_string(),
        };

        Some(text)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(value) => Some(value),
            _ => None,
        }
    }

    /// Orders two values of comparable variants.
    ///
    /// Numbers compare across integer and float variants. Values of unrelated variants, nulls
    /// and containers are not comparable.
    pub fn partial_compare(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => Some(a.cmp(b)),
            (Cell::String(a), Cell::String(b)) => Some(a.cmp(b)),
            (Cell::Timestamp(a), Cell::Timestamp(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_i128(), b.as_i128()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Cell::I32(value) => Some(i128::from(*value)),
            Cell::I64(value) => Some(i128::from(*value)),
            Cell::U64(value) => Some(i128::from(*value)),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::F32(value) => Some(f64::from(*value)),
            Cell::F64(value) => Some(*value),
            other => other.as_i128().map(|value| value as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn infers_container_element_types_from_first_non_null_value() {
        let array = Cell::Array(vec![Cell::Null, Cell::I64(3)]);
        assert_eq!(
            array.infer_type(),
            Some(ColumnType::Array(Box::new(ColumnType::Integer {
                bits: 64,
                signed: true
            })))
        );

        let empty_map = Cell::Map(BTreeMap::new());
        assert_eq!(
            empty_map.infer_type(),
            Some(ColumnType::Map(Box::new(ColumnType::Text)))
        );
        assert_eq!(Cell::Null.infer_type(), None);
    }

    #[test]
    fn renders_scalars_and_containers_as_text() {
        let timestamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();

        assert_eq!(Cell::Bool(true).to_text().as_deref(), Some("true"));
        assert_eq!(Cell::I64(-7).to_text().as_deref(), Some("-7"));
        assert_eq!(
            Cell::Timestamp(timestamp).to_text().as_deref(),
            Some("2024-03-01 08:30:00")
        );
        assert_eq!(
            Cell::Array(vec![Cell::String("a".into()), Cell::I32(1)])
                .to_text()
                .as_deref(),
            Some(r#"["a",1]"#)
        );
        assert_eq!(Cell::Null.to_text(), None);
    }
}
