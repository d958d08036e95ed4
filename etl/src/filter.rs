//! Builds the source-side predicate that selects records newer than the watermark.

use serde_json::{Value, json};
use std::cmp::Ordering;

use crate::bail;
use crate::conversions::timestamp::{
    normalize_timestamp_literal, parse_timestamp, timestamp_literal_to_epoch_nanos,
};
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, OrderingColumn, OrderingType, Watermark};

/// The comparison value of a [`Predicate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateValue {
    Integer(i64),
    /// A normalized `YYYY-MM-DD HH:MM:SS[.fraction]` literal.
    Timestamp(String),
}

/// A filter selecting the records of a source object to extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Selects every record.
    All,
    /// Selects records whose `column` is strictly greater than `value`.
    GreaterThan {
        column: String,
        value: PredicateValue,
    },
}

impl Predicate {
    pub fn is_all(&self) -> bool {
        matches!(self, Predicate::All)
    }

    /// Renders the predicate as a SQL `WHERE` clause, or an empty string for [`Predicate::All`].
    pub fn to_sql_where(&self) -> String {
        match self {
            Predicate::All => String::new(),
            Predicate::GreaterThan { column, value } => {
                let column = quote_identifier(column);
                match value {
                    PredicateValue::Integer(value) => format!("WHERE {column} > {value}"),
                    PredicateValue::Timestamp(value) => {
                        format!("WHERE {column} > '{}'", value.replace('\'', "''"))
                    }
                }
            }
        }
    }

    /// Renders the predicate as a search-index query clause.
    ///
    /// Timestamps are sent in ISO form with a `T` separator.
    pub fn to_range_query(&self) -> Value {
        match self {
            Predicate::All => json!({ "match_all": {} }),
            Predicate::GreaterThan { column, value } => {
                let bound = match value {
                    PredicateValue::Integer(value) => json!(value),
                    PredicateValue::Timestamp(value) => json!(value.replacen(' ', "T", 1)),
                };
                json!({ "range": { column.as_str(): { "gt": bound } } })
            }
        }
    }

    /// Returns `true` when a record whose filtered column holds `cell` passes the predicate.
    pub fn admits(&self, cell: &Cell) -> bool {
        let Predicate::GreaterThan { value, .. } = self else {
            return true;
        };

        compare(cell, value) == Some(Ordering::Greater)
    }

    /// Returns the filtered column, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Predicate::All => None,
            Predicate::GreaterThan { column, .. } => Some(column),
        }
    }
}

/// Quotes an identifier with backticks, as both the relational and columnar dialects accept.
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

fn compare(cell: &Cell, value: &PredicateValue) -> Option<Ordering> {
    match value {
        PredicateValue::Integer(bound) => match cell {
            Cell::I32(v) => Some(i64::from(*v).cmp(bound)),
            Cell::I64(v) => Some(v.cmp(bound)),
            Cell::U64(v) => Some(i128::from(*v).cmp(&i128::from(*bound))),
            Cell::F32(v) => f64::from(*v).partial_cmp(&(*bound as f64)),
            Cell::F64(v) => v.partial_cmp(&(*bound as f64)),
            Cell::String(v) => v.trim().parse::<i64>().ok().map(|v| v.cmp(bound)),
            _ => None,
        },
        PredicateValue::Timestamp(bound) => {
            let bound = parse_timestamp(bound)?;
            match cell {
                Cell::Timestamp(v) => Some(v.cmp(&bound)),
                Cell::String(v) => parse_timestamp(v).map(|v| v.cmp(&bound)),
                _ => None,
            }
        }
    }
}

/// Builds the predicate selecting records strictly newer than `watermark`.
///
/// An absent watermark selects everything. Combinations that cannot be expressed fail with
/// [`ErrorKind::FilterBuildFailed`]; the caller skips the object instead of extracting it fully.
pub fn build_filter(ordering: &OrderingColumn, watermark: &Watermark) -> EtlResult<Predicate> {
    let value = match (ordering.typ, watermark) {
        (_, Watermark::Absent) => return Ok(Predicate::All),
        (
            OrderingType::MonotonicSequence | OrderingType::IntegerEpoch,
            Watermark::NumericEpoch(value),
        ) => PredicateValue::Integer(*value),
        (OrderingType::Timestamp, Watermark::TimestampLiteral(literal)) => {
            PredicateValue::Timestamp(normalize_timestamp_literal(literal))
        }
        (OrderingType::IntegerEpoch, Watermark::TimestampLiteral(literal)) => {
            let normalized = normalize_timestamp_literal(literal);
            let Some(nanos) = timestamp_literal_to_epoch_nanos(&normalized) else {
                bail!(
                    ErrorKind::FilterBuildFailed,
                    "Watermark is not a timestamp",
                    format!(
                        "Cannot convert '{literal}' to an epoch for column '{}'",
                        ordering.name
                    )
                );
            };
            PredicateValue::Integer(nanos)
        }
        (typ, watermark) => {
            bail!(
                ErrorKind::FilterBuildFailed,
                "Unsupported watermark for ordering column",
                format!(
                    "Column '{}' of type {typ:?} cannot be filtered by watermark '{watermark}'",
                    ordering.name
                )
            );
        }
    };

    Ok(Predicate::GreaterThan {
        column: ordering.name.clone(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversions::timestamp::format_timestamp;

    fn column(typ: OrderingType) -> OrderingColumn {
        OrderingColumn::new("event_time", typ)
    }

    #[test]
    fn absent_watermark_selects_everything() {
        for typ in [
            OrderingType::Timestamp,
            OrderingType::IntegerEpoch,
            OrderingType::MonotonicSequence,
        ] {
            let predicate = build_filter(&column(typ), &Watermark::Absent).unwrap();
            assert!(predicate.is_all());
            assert_eq!(predicate.to_sql_where(), "");
        }
    }

    #[test]
    fn numeric_watermark_compares_directly() {
        let predicate = build_filter(
            &column(OrderingType::MonotonicSequence),
            &Watermark::NumericEpoch(42),
        )
        .unwrap();

        assert_eq!(predicate.to_sql_where(), "WHERE `event_time` > 42");
        assert!(predicate.admits(&Cell::I64(43)));
        assert!(!predicate.admits(&Cell::I64(42)));
        assert!(!predicate.admits(&Cell::Null));
    }

    #[test]
    fn timestamp_watermark_strips_timezone_suffix() {
        let predicate = build_filter(
            &column(OrderingType::Timestamp),
            &Watermark::TimestampLiteral("2024-05-01T12:00:00+09:00".into()),
        )
        .unwrap();

        assert_eq!(
            predicate.to_sql_where(),
            "WHERE `event_time` > '2024-05-01 12:00:00'"
        );
        assert_eq!(
            predicate.to_range_query(),
            json!({ "range": { "event_time": { "gt": "2024-05-01T12:00:00" } } })
        );
    }

    #[test]
    fn timestamp_literal_round_trips_through_filter() {
        let watermark = parse_timestamp("2024-05-01 12:00:00.250").unwrap();
        let predicate = build_filter(
            &column(OrderingType::Timestamp),
            &Watermark::TimestampLiteral(format_timestamp(&watermark)),
        )
        .unwrap();

        let Predicate::GreaterThan {
            value: PredicateValue::Timestamp(literal),
            ..
        } = &predicate
        else {
            panic!("expected a timestamp predicate");
        };
        assert_eq!(parse_timestamp(literal), Some(watermark));
        assert!(!predicate.admits(&Cell::Timestamp(watermark)));
    }

    #[test]
    fn integer_epoch_converts_timestamp_watermark_to_nanos() {
        let predicate = build_filter(
            &column(OrderingType::IntegerEpoch),
            &Watermark::TimestampLiteral("2024-01-01T00:00:00.5Z".into()),
        )
        .unwrap();

        assert_eq!(
            predicate.to_sql_where(),
            "WHERE `event_time` > 1704067200500000000"
        );
    }

    #[test]
    fn malformed_epoch_literal_fails_the_build() {
        let err = build_filter(
            &column(OrderingType::IntegerEpoch),
            &Watermark::TimestampLiteral("not a time".into()),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FilterBuildFailed);
    }

    #[test]
    fn unsupported_combination_fails_the_build() {
        let err = build_filter(
            &column(OrderingType::Timestamp),
            &Watermark::NumericEpoch(5),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FilterBuildFailed);
    }
}
