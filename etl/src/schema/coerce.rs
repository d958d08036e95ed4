use crate::conversions::bool::parse_bool;
use crate::conversions::timestamp::parse_timestamp;
use crate::types::{Batch, Cell, ColumnType, TableSchema};

/// Converts `cell` to a value of type `target`.
///
/// Values that cannot be represented become [`Cell::Null`], except for containers which become
/// empty, since container columns are never nullable. Text columns take the textual rendering of
/// any value.
pub fn coerce_cell(cell: Cell, target: &ColumnType) -> Cell {
    if cell.is_null() {
        return cell;
    }

    let coerced = match target {
        ColumnType::Text => cell.to_text().map(Cell::String),
        ColumnType::Boolean => to_bool(&cell),
        ColumnType::Integer { bits, signed } => to_integer(&cell, *bits, *signed),
        ColumnType::Float { bits } => to_float(&cell).map(|value| match bits {
            32 => Cell::F32(value as f32),
            _ => Cell::F64(value),
        }),
        ColumnType::Timestamp => match &cell {
            Cell::Timestamp(value) => Some(Cell::Timestamp(*value)),
            Cell::String(value) => parse_timestamp(value).map(Cell::Timestamp),
            _ => None,
        },
        ColumnType::Array(element) => match cell {
            Cell::Array(values) => Some(Cell::Array(
                values
                    .into_iter()
                    .map(|value| coerce_cell(value, element))
                    .filter(|value| !value.is_null())
                    .collect(),
            )),
            _ => None,
        },
        ColumnType::Map(value_type) => match cell {
            Cell::Map(entries) => Some(Cell::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, coerce_cell(value, value_type)))
                    .filter(|(_, value)| !value.is_null())
                    .collect(),
            )),
            _ => None,
        },
    };

    match coerced {
        Some(cell) => cell,
        None if target.is_container() => target.null_fill().unwrap_or(Cell::Null),
        None => Cell::Null,
    }
}

/// Aligns the values of `batch` with the column types of an existing table.
///
/// Columns absent from `schema` are left untouched.
pub fn align_batch(batch: &mut Batch, schema: &TableSchema) {
    let retyped: Vec<(usize, ColumnType)> = batch
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(index, column)| {
            let existing = schema.column(&column.name)?;
            (existing.typ != column.typ).then(|| (index, existing.typ.clone()))
        })
        .collect();

    if retyped.is_empty() {
        return;
    }

    for row in batch.rows_mut() {
        for (index, typ) in &retyped {
            let value = std::mem::replace(&mut row.values_mut()[*index], Cell::Null);
            row.values_mut()[*index] = coerce_cell(value, typ);
        }
    }

    for (index, typ) in retyped {
        batch.columns_mut()[index].typ = typ;
    }
}

fn to_bool(cell: &Cell) -> Option<Cell> {
    let value = match cell {
        Cell::Bool(value) => *value,
        Cell::String(value) => parse_bool(value.trim()).ok()?,
        Cell::I32(_) | Cell::I64(_) | Cell::U64(_) => match integer_value(cell)? {
            0 => false,
            1 => true,
            _ => return None,
        },
        _ => return None,
    };

    Some(Cell::Bool(value))
}

fn to_integer(cell: &Cell, bits: u8, signed: bool) -> Option<Cell> {
    let value = match cell {
        Cell::Bool(value) => i128::from(*value),
        Cell::F32(_) | Cell::F64(_) => {
            let value = to_float(cell)?;
            if value.fract() != 0.0 || !value.is_finite() {
                return None;
            }
            value as i128
        }
        Cell::String(value) => value.trim().parse::<i128>().ok()?,
        _ => integer_value(cell)?,
    };

    let bits = bits.clamp(1, 64);
    let (min, max) = if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    if value < min || value > max {
        return None;
    }

    let cell = match (signed, bits) {
        (false, _) => Cell::U64(value as u64),
        (true, 0..=32) => Cell::I32(value as i32),
        (true, _) => Cell::I64(value as i64),
    };

    Some(cell)
}

fn to_float(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::F32(value) => Some(f64::from(*value)),
        Cell::F64(value) => Some(*value),
        Cell::String(value) => value.trim().parse().ok(),
        other => integer_value(other).map(|value| value as f64),
    }
}

fn integer_value(cell: &Cell) -> Option<i128> {
    match cell {
        Cell::I32(value) => Some(i128::from(*value)),
        Cell::I64(value) => Some(i128::from(*value)),
        Cell::U64(value) => Some(i128::from(*value)),
        _ => None,
    }
}
