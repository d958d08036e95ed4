//! Normalization of extracted batches into destination-ready rows.

use std::collections::{HashMap, HashSet};

use crate::conversions::bool::render_bool;
use crate::conversions::timestamp::parse_timestamp;
use crate::types::{Batch, BatchColumn, Cell, ColumnType, ObjectKind, SourceObject, TableRow};

/// Column stamped with the source-system label on unkeyed objects.
pub const SOURCE_SYSTEM_COLUMN: &str = "source_system";

/// Column stamped with the source object name on unkeyed objects.
pub const SOURCE_OBJECT_COLUMN: &str = "source_object";

/// Field names reserved by search engines, with the column they are renamed to.
const RESERVED_FIELDS: &[(&str, &str)] = &[
    ("@timestamp", "opensearch_timestamp"),
    ("@metadata", "opensearch_metadata"),
    ("@version", "opensearch_version"),
];

/// Provenance labels written into every row of an unkeyed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_system: String,
    pub source_object: String,
}

/// Options of a [`RowTransformer`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransformOptions {
    /// Lower-cases column names, as relational sources are case-insensitive.
    pub lowercase_names: bool,
    pub provenance: Option<Provenance>,
}

impl TransformOptions {
    pub fn for_object(object: &SourceObject) -> Self {
        let provenance = (!object.is_deduplicating()).then(|| Provenance {
            source_system: object.source_system.clone(),
            source_object: object.name.clone(),
        });

        Self {
            lowercase_names: object.kind == ObjectKind::Relational,
            provenance,
        }
    }
}

/// Turns a field name into a valid destination column name.
///
/// Reserved search-engine fields get dedicated names, `.` and `-` become `_` and `@` becomes
/// `at_`.
pub fn normalize_field_name(name: &str, lowercase: bool) -> String {
    let normalized = match RESERVED_FIELDS.iter().find(|(field, _)| *field == name) {
        Some((_, column)) => (*column).to_owned(),
        None => name.replace(['.', '-'], "_").replace('@', "at_"),
    };

    if lowercase {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

/// Destination names handed out to the source fields of one object.
///
/// A field keeps the name it was first given for the whole run, so fields whose normalized names
/// collide land in the same columns on every page, whatever order pages list them in.
#[derive(Debug, Clone, Default)]
struct ColumnNames {
    assigned: HashMap<String, String>,
    taken: HashSet<String>,
}

impl ColumnNames {
    fn assign(&mut self, field: &str, lowercase: bool) -> String {
        if let Some(name) = self.assigned.get(field) {
            return name.clone();
        }

        let base = normalize_field_name(field, lowercase);
        let mut name = base.clone();
        let mut suffix = 0;
        while self.taken.contains(&name) {
            suffix += 1;
            name = format!("{base}_{suffix}");
        }

        self.taken.insert(name.clone());
        self.assigned.insert(field.to_owned(), name.clone());
        name
    }
}

/// Deterministic batch transformation applied between extraction and loading.
///
/// One transformer is used per object and run: it remembers the destination name of every field
/// it has seen. A fresh transformer returns an already transformed batch unchanged.
#[derive(Debug, Clone, Default)]
pub struct RowTransformer {
    options: TransformOptions,
    names: ColumnNames,
}

impl RowTransformer {
    pub fn new(options: TransformOptions) -> Self {
        Self {
            options,
            names: ColumnNames::default(),
        }
    }

    /// Builds the transformer of `object`, with its ordering and key columns named first.
    pub fn for_object(object: &SourceObject) -> Self {
        let mut transformer = Self::new(TransformOptions::for_object(object));
        if let Some(ordering) = &object.ordering {
            transformer.column_name(&ordering.name);
        }
        for key in &object.key_columns {
            transformer.column_name(key);
        }

        transformer
    }

    /// Returns the destination name of a source field, naming it if it was never seen.
    pub fn column_name(&mut self, field: &str) -> String {
        self.names.assign(field, self.options.lowercase_names)
    }

    pub fn transform(&mut self, batch: Batch) -> Batch {
        let (columns, rows) = batch.into_parts();
        let original_first = columns.first().map(|column| column.name.clone());

        let mut columns = self.rename_columns(columns);
        let mut rows = drop_header_rows(rows, original_first.as_deref(), &columns);

        for (index, column) in columns.iter_mut().enumerate() {
            let values = rows.iter_mut().map(|row| &mut row.values_mut()[index]);
            normalize_column(column, values);
        }

        if let Some(provenance) = &self.options.provenance {
            stamp(&mut columns, &mut rows, SOURCE_SYSTEM_COLUMN, &provenance.source_system);
            stamp(&mut columns, &mut rows, SOURCE_OBJECT_COLUMN, &provenance.source_object);
        }

        Batch::new(columns, rows)
    }

    fn rename_columns(&mut self, columns: Vec<BatchColumn>) -> Vec<BatchColumn> {
        columns
            .into_iter()
            .map(|column| BatchColumn::new(self.column_name(&column.name), column.typ))
            .collect()
    }
}

/// Drops rows that repeat the column header, an artifact of CSV-backed source tables.
fn drop_header_rows(
    rows: Vec<TableRow>,
    original_first: Option<&str>,
    columns: &[BatchColumn],
) -> Vec<TableRow> {
    let (Some(original), Some(renamed)) = (original_first, columns.first()) else {
        return rows;
    };

    rows.into_iter()
        .filter(|row| {
            let Some(Cell::String(value)) = row.values().first() else {
                return true;
            };
            value != original && *value != renamed.name
        })
        .collect()
}

fn normalize_column<'a>(column: &mut BatchColumn, values: impl Iterator<Item = &'a mut Cell>) {
    let timestamp_array = is_timestamp_array(column);
    if timestamp_array {
        column.typ = ColumnType::Array(Box::new(ColumnType::Timestamp));
    }
    if column.typ == ColumnType::Boolean {
        column.typ = ColumnType::Text;
    }

    let text = column.typ == ColumnType::Text;
    let fill = column.typ.null_fill();
    for value in values {
        if timestamp_array {
            if let Cell::Array(elements) = value {
                *elements = std::mem::take(elements)
                    .into_iter()
                    .filter_map(|element| match element {
                        Cell::Timestamp(_) => Some(element),
                        Cell::String(text) => parse_timestamp(&text).map(Cell::Timestamp),
                        _ => None,
                    })
                    .collect();
                continue;
            }
        }

        let replacement = match &*value {
            Cell::Bool(flag) if text => Some(Cell::String(render_bool(*flag).to_owned())),
            Cell::Null => fill.clone(),
            _ => None,
        };
        if let Some(replacement) = replacement {
            *value = replacement;
        }
    }
}

/// Arrays of timestamps, either declared as such or named like time columns.
fn is_timestamp_array(column: &BatchColumn) -> bool {
    let ColumnType::Array(element) = &column.typ else {
        return false;
    };
    if **element == ColumnType::Timestamp {
        return true;
    }

    let name = column.name.to_lowercase();
    **element == ColumnType::Text && (name.contains("timestamp") || name.contains("timeunix"))
}

fn stamp(columns: &mut Vec<BatchColumn>, rows: &mut [TableRow], name: &str, value: &str) {
    let index = match columns.iter().position(|column| column.name == name) {
        Some(index) => {
            columns[index].typ = ColumnType::Text;
            index
        }
        None => {
            columns.push(BatchColumn::new(name, ColumnType::Text));
            for row in rows.iter_mut() {
                row.values_mut().push(Cell::Null);
            }
            columns.len() - 1
        }
    };

    for row in rows {
        row.values_mut()[index] = Cell::String(value.to_owned());
    }
}
