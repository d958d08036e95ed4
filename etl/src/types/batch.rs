use std::collections::{HashMap, HashSet};

use crate::types::{Cell, ColumnType, TableRow};

/// A named, typed column of a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchColumn {
    pub name: String,
    pub typ: ColumnType,
}

impl BatchColumn {
    pub fn new(name: impl Into<String>, typ: ColumnType) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// A rectangular chunk of rows pulled from a source object.
///
/// Every row holds exactly one value per column, in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    columns: Vec<BatchColumn>,
    rows: Vec<TableRow>,
}

impl Batch {
    /// Creates a batch from columns and rows that are already aligned with each other.
    pub fn new(columns: Vec<BatchColumn>, rows: Vec<TableRow>) -> Self {
        debug_assert!(rows.iter().all(|row| row.values().len() == columns.len()));

        Self { columns, rows }
    }

    /// Builds a batch from loosely shaped records such as search-index documents.
    ///
    /// Columns are the union of all field names in first-seen order. Fields missing from a record
    /// become [`Cell::Null`]. Column types are inferred from the non-null values, widening numeric
    /// types when records disagree and falling back to [`ColumnType::Text`] otherwise.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Vec<(String, Cell)>>,
    {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut names: Vec<String> = Vec::new();
        let mut types: Vec<Option<ColumnType>> = Vec::new();
        let mut sparse_rows: Vec<Vec<(usize, Cell)>> = Vec::new();

        for record in records {
            let mut sparse_row = Vec::with_capacity(record.len());
            for (name, cell) in record {
                let position = match positions.get(&name) {
                    Some(position) => *position,
                    None => {
                        let position = names.len();
                        positions.insert(name.clone(), position);
                        names.push(name);
                        types.push(None);
                        position
                    }
                };

                if let Some(inferred) = cell.infer_type() {
                    types[position] = Some(match types[position].take() {
                        Some(existing) => widen(existing, inferred),
                        None => inferred,
                    });
                }

                sparse_row.push((position, cell));
            }
            sparse_rows.push(sparse_row);
        }

        let width = names.len();
        let rows = sparse_rows
            .into_iter()
            .map(|sparse_row| {
                let mut values = vec![Cell::Null; width];
                for (position, cell) in sparse_row {
                    values[position] = cell;
                }
                TableRow::new(values)
            })
            .collect();

        let columns = names
            .into_iter()
            .zip(types)
            .map(|(name, typ)| BatchColumn::new(name, typ.unwrap_or(ColumnType::Text)))
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[BatchColumn] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [BatchColumn] {
        &mut self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<TableRow> {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    /// Keeps only the first `len` rows.
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    /// Removes the named columns and their values from every row.
    pub fn drop_columns(&mut self, names: &HashSet<String>) {
        if names.is_empty() {
            return;
        }

        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|column| !names.contains(&column.name))
            .collect();

        let mut index = 0;
        self.columns.retain(|_| {
            let retain = keep[index];
            index += 1;
            retain
        });

        for row in &mut self.rows {
            let mut index = 0;
            row.values_mut().retain(|_| {
                let retain = keep[index];
                index += 1;
                retain
            });
        }
    }

    pub fn into_parts(self) -> (Vec<BatchColumn>, Vec<TableRow>) {
        (self.columns, self.rows)
    }
}

/// Returns a type able to hold values of both `a` and `b`.
pub fn widen(a: ColumnType, b: ColumnType) -> ColumnType {
    if a == b {
        return a;
    }

    match (a, b) {
        (
            ColumnType::Integer {
                bits: bits_a,
                signed: signed_a,
            },
            ColumnType::Integer {
                bits: bits_b,
                signed: signed_b,
            },
        ) => {
            if signed_a == signed_b {
                ColumnType::Integer {
                    bits: bits_a.max(bits_b),
                    signed: signed_a,
                }
            } else {
                ColumnType::Integer {
                    bits: 64,
                    signed: true,
                }
            }
        }
        (ColumnType::Float { bits: bits_a }, ColumnType::Float { bits: bits_b }) => {
            ColumnType::Float {
                bits: bits_a.max(bits_b),
            }
        }
        (ColumnType::Integer { .. }, ColumnType::Float { .. })
        | (ColumnType::Float { .. }, ColumnType::Integer { .. }) => ColumnType::Float { bits: 64 },
        (ColumnType::Array(a), ColumnType::Array(b)) => ColumnType::Array(Box::new(widen(*a, *b))),
        (ColumnType::Map(a), ColumnType::Map(b)) => ColumnType::Map(Box::new(widen(*a, *b))),
        _ => ColumnType::Text,
    }
}
