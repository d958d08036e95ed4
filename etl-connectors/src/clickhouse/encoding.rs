use chrono::{NaiveDate, NaiveDateTime};
use etl::conversions::bool::parse_bool;
use etl::conversions::timestamp::parse_timestamp;
use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use etl::types::Cell;

use crate::clickhouse::schema::ClickHouseType;

// ── RowBinary encoding ────────────────────────────────────────────────────────
//
// Rows are written as RowBinary bytes via
// `Client::insert_formatted_with("INSERT INTO t (...) FORMAT RowBinary")`, driven by the
// column types the destination table reports. Cells have already been coerced to the table's
// column types, so the encoder only converts between equivalent representations.

/// Encodes a variable-length integer (LEB128) used by ClickHouse for string/array lengths.
pub(crate) fn rb_varint(mut v: usize, buf: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Encodes a full row, one cell per entry of `types`.
pub(crate) fn rb_encode_row(
    cells: Vec<Cell>,
    types: &[ClickHouseType],
    buf: &mut Vec<u8>,
) -> EtlResult<()> {
    if cells.len() != types.len() {
        return Err(etl_error!(
            ErrorKind::InvalidData,
            "Row does not match the insert columns",
            format!("Row has {} values for {} columns", cells.len(), types.len())
        ));
    }

    for (cell, typ) in cells.into_iter().zip(types) {
        rb_encode_cell(cell, typ, buf)?;
    }

    Ok(())
}

/// Encodes one cell for a column of type `typ`.
///
/// A null reaching a non-nullable column is written as the type's default value.
pub(crate) fn rb_encode_cell(cell: Cell, typ: &ClickHouseType, buf: &mut Vec<u8>) -> EtlResult<()> {
    match typ {
        ClickHouseType::Nullable(inner) => {
            if cell.is_null() {
                buf.push(1);
            } else {
                buf.push(0);
                rb_encode_cell(cell, inner, buf)?;
            }
        }
        ClickHouseType::Int { bits, signed } => {
            let value = integer_value(&cell).unwrap_or_default();
            rb_encode_integer(value, *bits, *signed, buf);
        }
        ClickHouseType::Float { bits: 32 } => {
            let value = float_value(&cell).unwrap_or_default() as f32;
            buf.extend_from_slice(&value.to_le_bytes());
        }
        ClickHouseType::Float { .. } => {
            let value = float_value(&cell).unwrap_or_default();
            buf.extend_from_slice(&value.to_le_bytes());
        }
        ClickHouseType::String => {
            let value = match cell {
                Cell::String(value) => value,
                other => other.to_text().unwrap_or_default(),
            };
            rb_varint(value.len(), buf);
            buf.extend_from_slice(value.as_bytes());
        }
        ClickHouseType::Bool => {
            let value = match &cell {
                Cell::Bool(value) => *value,
                Cell::String(value) => parse_bool(value).unwrap_or(false),
                other => integer_value(other).is_some_and(|value| value != 0),
            };
            buf.push(u8::from(value));
        }
        ClickHouseType::Date => {
            let days = timestamp_value(&cell)
                .map(|value| days_since_epoch(&value))
                .unwrap_or_default()
                .clamp(0, i64::from(u16::MAX)) as u16;
            buf.extend_from_slice(&days.to_le_bytes());
        }
        ClickHouseType::Date32 => {
            let days = timestamp_value(&cell)
                .map(|value| days_since_epoch(&value))
                .unwrap_or_default()
                .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
            buf.extend_from_slice(&days.to_le_bytes());
        }
        ClickHouseType::DateTime => {
            let seconds = timestamp_value(&cell)
                .map(|value| value.and_utc().timestamp())
                .unwrap_or_default()
                .clamp(0, i64::from(u32::MAX)) as u32;
            buf.extend_from_slice(&seconds.to_le_bytes());
        }
        ClickHouseType::DateTime64 { precision } => {
            let ticks = timestamp_value(&cell)
                .map(|value| datetime64_ticks(&value, *precision))
                .unwrap_or_default();
            buf.extend_from_slice(&ticks.to_le_bytes());
        }
        ClickHouseType::Array(element) => {
            let values = match cell {
                Cell::Array(values) => values,
                _ => Vec::new(),
            };
            rb_varint(values.len(), buf);
            for value in values {
                rb_encode_cell(value, element, buf)?;
            }
        }
        ClickHouseType::Map(value_type) => {
            let entries = match cell {
                Cell::Map(entries) => entries,
                _ => Default::default(),
            };
            rb_varint(entries.len(), buf);
            for (key, value) in entries {
                rb_varint(key.len(), buf);
                buf.extend_from_slice(key.as_bytes());
                rb_encode_cell(value, value_type, buf)?;
            }
        }
        ClickHouseType::Unsupported(name) => {
            return Err(etl_error!(
                ErrorKind::ConversionError,
                "Unsupported ClickHouse column type",
                format!("Values cannot be encoded for columns of type {name}")
            ));
        }
    }

    Ok(())
}

fn rb_encode_integer(value: i128, bits: u8, signed: bool, buf: &mut Vec<u8>) {
    // Values were range-checked during coercion; truncation only hits the default fallback.
    match (bits, signed) {
        (8, true) => buf.extend_from_slice(&(value as i8).to_le_bytes()),
        (16, true) => buf.extend_from_slice(&(value as i16).to_le_bytes()),
        (32, true) => buf.extend_from_slice(&(value as i32).to_le_bytes()),
        (_, true) => buf.extend_from_slice(&(value as i64).to_le_bytes()),
        (8, false) => buf.extend_from_slice(&(value as u8).to_le_bytes()),
        (16, false) => buf.extend_from_slice(&(value as u16).to_le_bytes()),
        (32, false) => buf.extend_from_slice(&(value as u32).to_le_bytes()),
        (_, false) => buf.extend_from_slice(&(value as u64).to_le_bytes()),
    }
}

fn integer_value(cell: &Cell) -> Option<i128> {
    match cell {
        Cell::I32(value) => Some(i128::from(*value)),
        Cell::I64(value) => Some(i128::from(*value)),
        Cell::U64(value) => Some(i128::from(*value)),
        Cell::Bool(value) => Some(i128::from(*value)),
        Cell::String(value) => value.trim().parse::<i128>().ok(),
        _ => None,
    }
}

fn float_value(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::F32(value) => Some(f64::from(*value)),
        Cell::F64(value) => Some(*value),
        Cell::I32(value) => Some(f64::from(*value)),
        Cell::I64(value) => Some(*value as f64),
        Cell::U64(value) => Some(*value as f64),
        Cell::String(value) => value.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn timestamp_value(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::Timestamp(value) => Some(*value),
        Cell::String(value) => parse_timestamp(value),
        _ => None,
    }
}

fn days_since_epoch(value: &NaiveDateTime) -> i64 {
    value
        .date()
        .signed_duration_since(NaiveDate::default())
        .num_days()
}

fn datetime64_ticks(value: &NaiveDateTime, precision: u32) -> i64 {
    let micros = value.and_utc().timestamp_micros();
    if precision <= 6 {
        micros / 10_i64.pow(6 - precision)
    } else {
        micros.saturating_mul(10_i64.pow(precision - 6))
    }
}
