use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::source::memory::Record;
use crate::types::Cell;

/// Builds a record from field names and values.
pub fn record<const N: usize>(fields: [(&str, Cell); N]) -> Record {
    fields
        .into_iter()
        .map(|(name, cell)| (name.to_owned(), cell))
        .collect()
}

/// Builds `count` order records with ids starting at `first_id`, one minute apart from `start`.
pub fn order_records(first_id: i64, count: usize, start: NaiveDateTime) -> Vec<Record> {
    (0..count)
        .map(|index| {
            let id = first_id + index as i64;
            record([
                ("id", Cell::I64(id)),
                (
                    "updated_at",
                    Cell::Timestamp(start + Duration::minutes(index as i64)),
                ),
                ("amount", Cell::F64(id as f64 * 1.5)),
            ])
        })
        .collect()
}

/// Returns midnight of the given day.
pub fn midnight(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("valid date")
}
