use etl::filter::quote_identifier;
use etl::types::ColumnType;

/// How the values of a MySQL column are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MySqlColumnKind {
    Integer { bits: u8, signed: bool },
    Float { bits: u8 },
    /// Date and time types, read as text so that zero dates degrade to nulls instead of failing
    /// the page.
    Timestamp,
    /// Everything else, read as text.
    Text,
}

/// A column of a source table, as listed in `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MySqlColumn {
    pub name: String,
    pub kind: MySqlColumnKind,
}

impl MySqlColumn {
    /// Builds a column from its `data_type` (e.g. `int`) and `column_type` (e.g.
    /// `int(10) unsigned`).
    pub(crate) fn new(name: String, data_type: &str, column_type: &str) -> Self {
        let signed = !column_type.to_ascii_lowercase().contains("unsigned");
        let kind = match data_type.to_ascii_lowercase().as_str() {
            "tinyint" => MySqlColumnKind::Integer { bits: 8, signed },
            "smallint" => MySqlColumnKind::Integer { bits: 16, signed },
            "mediumint" | "int" | "integer" => MySqlColumnKind::Integer { bits: 32, signed },
            "bigint" => MySqlColumnKind::Integer { bits: 64, signed },
            "float" => MySqlColumnKind::Float { bits: 32 },
            "double" | "real" => MySqlColumnKind::Float { bits: 64 },
            "date" | "datetime" | "timestamp" => MySqlColumnKind::Timestamp,
            _ => MySqlColumnKind::Text,
        };

        Self { name, kind }
    }

    pub(crate) fn column_type(&self) -> ColumnType {
        match self.kind {
            MySqlColumnKind::Integer { bits, signed } => ColumnType::Integer { bits, signed },
            MySqlColumnKind::Float { bits } => ColumnType::Float { bits },
            MySqlColumnKind::Timestamp => ColumnType::Timestamp,
            MySqlColumnKind::Text => ColumnType::Text,
        }
    }

    /// Returns the select-list expression reading this column.
    pub(crate) fn select_expr(&self) -> String {
        let column = quote_identifier(&self.name);
        match self.kind {
            MySqlColumnKind::Integer { .. } | MySqlColumnKind::Float { .. } => column,
            MySqlColumnKind::Timestamp | MySqlColumnKind::Text => {
                format!("CAST({column} AS CHAR) AS {column}")
            }
        }
    }
}
