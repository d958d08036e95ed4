//! Resolution of the position already applied to a destination table.

use tracing::{debug, warn};

use crate::bail;
use crate::conversions::timestamp::{format_timestamp, parse_timestamp};
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, OrderingType, Watermark};

/// Determines the watermark of `table` from the maximum of its `column`.
///
/// A missing or empty table yields [`Watermark::Absent`]. So does any failed lookup: the failure
/// is logged and the object is re-extracted from the beginning, trading duplicate rows for
/// availability.
pub async fn resolve_watermark<D>(
    destination: &D,
    table: &str,
    column: &str,
    typ: OrderingType,
) -> Watermark
where
    D: Destination + Sync,
{
    match try_resolve_watermark(destination, table, column, typ).await {
        Ok(watermark) => {
            debug!(table, column, %watermark, "resolved watermark");
            watermark
        }
        Err(err) => {
            warn!(
                table,
                column,
                error = %err,
                "watermark lookup failed, re-syncing the table from the start"
            );
            Watermark::Absent
        }
    }
}

async fn try_resolve_watermark<D>(
    destination: &D,
    table: &str,
    column: &str,
    typ: OrderingType,
) -> EtlResult<Watermark>
where
    D: Destination + Sync,
{
    if !destination.table_exists(table).await? {
        return Ok(Watermark::Absent);
    }

    if destination.row_count(table).await? == 0 {
        return Ok(Watermark::Absent);
    }

    match destination.max_value(table, column).await? {
        Some(max) => cell_to_watermark(&max, typ),
        None => Ok(Watermark::Absent),
    }
}

/// Converts the maximum of an ordering column into its canonical watermark.
pub fn cell_to_watermark(cell: &Cell, typ: OrderingType) -> EtlResult<Watermark> {
    let watermark = match cell {
        Cell::Null => Watermark::Absent,
        Cell::I32(value) => Watermark::NumericEpoch(i64::from(*value)),
        Cell::I64(value) => Watermark::NumericEpoch(*value),
        Cell::U64(value) => match i64::try_from(*value) {
            Ok(value) => Watermark::NumericEpoch(value),
            Err(_) => bail!(
                ErrorKind::WatermarkLookupFailed,
                "Watermark out of range",
                format!("The maximum {value} does not fit a signed 64-bit integer")
            ),
        },
        Cell::F32(_) | Cell::F64(_) => {
            let Some(value) = cell.to_text().and_then(|text| text.parse::<i64>().ok()) else {
                bail!(
                    ErrorKind::WatermarkLookupFailed,
                    "Watermark is not an integer",
                    format!("The maximum {cell:?} has a fractional part")
                );
            };
            Watermark::NumericEpoch(value)
        }
        Cell::Timestamp(value) => Watermark::TimestampLiteral(format_timestamp(value)),
        Cell::String(value) => string_to_watermark(value, typ),
        Cell::Bool(_) | Cell::Array(_) | Cell::Map(_) => bail!(
            ErrorKind::WatermarkLookupFailed,
            "Unsupported watermark value",
            format!("The maximum {cell:?} cannot be used as a position")
        ),
    };

    Ok(watermark)
}

fn string_to_watermark(value: &str, typ: OrderingType) -> Watermark {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Watermark::Absent;
    }

    if matches!(
        typ,
        OrderingType::IntegerEpoch | OrderingType::MonotonicSequence
    ) {
        if let Ok(value) = trimmed.parse::<i64>() {
            return Watermark::NumericEpoch(value);
        }
    }

    match parse_timestamp(trimmed) {
        Some(parsed) => Watermark::TimestampLiteral(format_timestamp(&parsed)),
        None => Watermark::TimestampLiteral(trimmed.to_owned()),
    }
}
