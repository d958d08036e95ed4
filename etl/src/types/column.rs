use std::fmt;

use crate::types::Cell;

/// Closed set of column types understood by inference, coercion, null-fill and DDL rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer { bits: u8, signed: bool },
    Float { bits: u8 },
    Text,
    Boolean,
    Timestamp,
    Array(Box<ColumnType>),
    Map(Box<ColumnType>),
}

impl ColumnType {
    /// Returns the value a null is replaced with for this type.
    ///
    /// Timestamps have no fill value and keep their nulls. Booleans are rendered to text by the
    /// transformer before filling, so they fill like text.
    pub fn null_fill(&self) -> Option<Cell> {
        let cell = match self {
            ColumnType::Integer { bits, signed } => zero_integer(*bits, *signed),
            ColumnType::Float { bits: 32 } => Cell::F32(0.0),
            ColumnType::Float { .. } => Cell::F64(0.0),
            ColumnType::Text | ColumnType::Boolean => Cell::String(String::new()),
            ColumnType::Timestamp => return None,
            ColumnType::Array(_) => Cell::Array(Vec::new()),
            ColumnType::Map(_) => Cell::Map(Default::default()),
        };

        Some(cell)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, ColumnType::Array(_) | ColumnType::Map(_))
    }
}

fn zero_integer(bits: u8, signed: bool) -> Cell {
    match (bits, signed) {
        (_, false) => Cell::U64(0),
        (0..=32, true) => Cell::I32(0),
        (_, true) => Cell::I64(0),
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer { bits, signed: true } => write!(f, "int{bits}"),
            ColumnType::Integer {
                bits,
                signed: false,
            } => write!(f, "uint{bits}"),
            ColumnType::Float { bits } => write!(f, "float{bits}"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::Boolean => f.write_str("boolean"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::Array(element) => write!(f, "array<{element}>"),
            ColumnType::Map(value) => write!(f, "map<text, {value}>"),
        }
    }
}

/// A column as declared in a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// Current schema of a destination table, as introspected from the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Storage behavior of a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEngine {
    /// Rows are only ever appended.
    Append,
    /// Rows sharing the sort key collapse to the most recently inserted version on compaction.
    Deduplicating,
}

/// Everything a destination needs to create a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// Sort key columns. Empty means the table has no natural order.
    pub order_by: Vec<String>,
    pub engine: TableEngine,
}

impl TableDefinition {
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            name: self.name.clone(),
            columns: self.columns.clone(),
        }
    }
}
