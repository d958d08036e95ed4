use etl::filter::quote_identifier;
use etl::types::{ColumnSchema, ColumnType, TableDefinition, TableEngine};

/// A ClickHouse column type, as far as the encoder understands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClickHouseType {
    Int { bits: u8, signed: bool },
    Float { bits: u8 },
    String,
    Bool,
    /// Days since the epoch as `UInt16`.
    Date,
    /// Days since the epoch as `Int32`.
    Date32,
    /// Seconds since the epoch as `UInt32`.
    DateTime,
    /// Ticks of `10^-precision` seconds since the epoch as `Int64`.
    DateTime64 { precision: u32 },
    Array(Box<ClickHouseType>),
    /// `Map(String, T)`.
    Map(Box<ClickHouseType>),
    Nullable(Box<ClickHouseType>),
    /// Any type the encoder cannot write, such as decimals or UUIDs.
    Unsupported(String),
}

impl ClickHouseType {
    /// Returns the engine type values of this ClickHouse type are coerced to.
    pub(crate) fn column_type(&self) -> ColumnType {
        match self {
            ClickHouseType::Int { bits, signed } => ColumnType::Integer {
                bits: *bits,
                signed: *signed,
            },
            ClickHouseType::Float { bits } => ColumnType::Float { bits: *bits },
            ClickHouseType::String | ClickHouseType::Unsupported(_) => ColumnType::Text,
            ClickHouseType::Bool => ColumnType::Boolean,
            ClickHouseType::Date
            | ClickHouseType::Date32
            | ClickHouseType::DateTime
            | ClickHouseType::DateTime64 { .. } => ColumnType::Timestamp,
            ClickHouseType::Array(element) => ColumnType::Array(Box::new(element.column_type())),
            ClickHouseType::Map(value) => ColumnType::Map(Box::new(value.column_type())),
            ClickHouseType::Nullable(inner) => inner.column_type(),
        }
    }

    pub(crate) fn is_nullable(&self) -> bool {
        matches!(self, ClickHouseType::Nullable(_))
    }

    pub(crate) fn is_supported(&self) -> bool {
        match self {
            ClickHouseType::Unsupported(_) => false,
            ClickHouseType::Array(inner)
            | ClickHouseType::Map(inner)
            | ClickHouseType::Nullable(inner) => inner.is_supported(),
            _ => true,
        }
    }
}

/// Parses a type name as reported by `system.columns`.
///
/// `LowCardinality` is transparent on the wire and is unwrapped. Integers wider than 64 bits are
/// reported as unsupported.
pub(crate) fn parse_clickhouse_type(name: &str) -> ClickHouseType {
    let name = name.trim();

    if let Some(inner) = unwrap_call(name, "Nullable") {
        return ClickHouseType::Nullable(Box::new(parse_clickhouse_type(inner)));
    }
    if let Some(inner) = unwrap_call(name, "LowCardinality") {
        return parse_clickhouse_type(inner);
    }
    if let Some(inner) = unwrap_call(name, "Array") {
        return ClickHouseType::Array(Box::new(parse_clickhouse_type(inner)));
    }
    if let Some(inner) = unwrap_call(name, "Map") {
        let arguments = split_arguments(inner);
        return match arguments.as_slice() {
            [key, value] if parse_clickhouse_type(key) == ClickHouseType::String => {
                ClickHouseType::Map(Box::new(parse_clickhouse_type(value)))
            }
            _ => ClickHouseType::Unsupported(name.to_owned()),
        };
    }
    if let Some(inner) = unwrap_call(name, "DateTime64") {
        let precision = split_arguments(inner)
            .first()
            .and_then(|precision| precision.trim().parse::<u32>().ok());
        return match precision {
            Some(precision) if precision <= 9 => ClickHouseType::DateTime64 { precision },
            _ => ClickHouseType::Unsupported(name.to_owned()),
        };
    }
    if name.starts_with("DateTime(") {
        return ClickHouseType::DateTime;
    }

    match name {
        "Int8" => ClickHouseType::Int { bits: 8, signed: true },
        "Int16" => ClickHouseType::Int { bits: 16, signed: true },
        "Int32" => ClickHouseType::Int { bits: 32, signed: true },
        "Int64" => ClickHouseType::Int { bits: 64, signed: true },
        "UInt8" => ClickHouseType::Int { bits: 8, signed: false },
        "UInt16" => ClickHouseType::Int { bits: 16, signed: false },
        "UInt32" => ClickHouseType::Int { bits: 32, signed: false },
        "UInt64" => ClickHouseType::Int { bits: 64, signed: false },
        "Float32" => ClickHouseType::Float { bits: 32 },
        "Float64" => ClickHouseType::Float { bits: 64 },
        "String" => ClickHouseType::String,
        "Bool" | "Boolean" => ClickHouseType::Bool,
        "Date" => ClickHouseType::Date,
        "Date32" => ClickHouseType::Date32,
        "DateTime" => ClickHouseType::DateTime,
        other => ClickHouseType::Unsupported(other.to_owned()),
    }
}

fn unwrap_call<'a>(name: &'a str, function: &str) -> Option<&'a str> {
    name.strip_prefix(function)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Splits type arguments on the commas that are not nested in parentheses.
fn split_arguments(arguments: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (index, character) in arguments.char_indices() {
        match character {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(arguments[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(arguments[start..].trim());

    parts
}

/// Returns the bare ClickHouse type for an engine column type.
///
/// Array elements and map values are never nullable; the reconciler drops null elements before
/// they are written.
pub fn column_type_to_clickhouse_sql(typ: &ColumnType) -> String {
    match typ {
        ColumnType::Integer { bits, signed } => {
            let bits = match bits {
                0..=8 => 8,
                9..=16 => 16,
                17..=32 => 32,
                _ => 64,
            };
            if *signed {
                format!("Int{bits}")
            } else {
                format!("UInt{bits}")
            }
        }
        ColumnType::Float { bits: 32 } => "Float32".to_owned(),
        ColumnType::Float { .. } => "Float64".to_owned(),
        ColumnType::Text => "String".to_owned(),
        ColumnType::Boolean => "Bool".to_owned(),
        ColumnType::Timestamp => "DateTime64(6)".to_owned(),
        ColumnType::Array(element) => format!("Array({})", column_type_to_clickhouse_sql(element)),
        ColumnType::Map(value) => {
            format!("Map(String, {})", column_type_to_clickhouse_sql(value))
        }
    }
}

/// Returns the column type as declared in DDL, wrapping nullable scalars in `Nullable(...)`.
///
/// ClickHouse does not allow `Nullable` around arrays and maps, so container columns are always
/// declared non-nullable.
pub fn column_schema_to_clickhouse_sql(column: &ColumnSchema) -> String {
    let base = column_type_to_clickhouse_sql(&column.typ);
    if column.nullable && !column.typ.is_container() {
        format!("Nullable({base})")
    } else {
        base
    }
}

/// Generates the `CREATE TABLE` statement for a table definition.
///
/// - Append tables use `MergeTree()`, deduplicating tables `ReplacingMergeTree()`.
/// - Tables without sort columns are ordered by `tuple()`.
///
/// The statement has no `IF NOT EXISTS`, so that a concurrent creation surfaces as an error the
/// caller can recognize.
pub fn build_create_table_sql(definition: &TableDefinition) -> String {
    let columns = definition
        .columns
        .iter()
        .map(|column| {
            format!(
                "  {} {}",
                quote_identifier(&column.name),
                column_schema_to_clickhouse_sql(column)
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    let engine = match definition.engine {
        TableEngine::Append => "MergeTree()",
        TableEngine::Deduplicating => "ReplacingMergeTree()",
    };

    let order_by = if definition.order_by.is_empty() {
        "tuple()".to_owned()
    } else {
        let keys = definition
            .order_by
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        format!("({keys})")
    };

    format!(
        "CREATE TABLE {} (\n{columns}\n) ENGINE = {engine}\nORDER BY {order_by}",
        quote_identifier(&definition.name)
    )
}

pub fn build_add_column_sql(table: &str, column: &ColumnSchema) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_identifier(table),
        quote_identifier(&column.name),
        column_schema_to_clickhouse_sql(column)
    )
}

/// Rewrites a statement reported by `SHOW CREATE TABLE` so that it creates `table` in the
/// current database.
///
/// Everything after the table name is kept, including engine, sort key and codecs. Any
/// `IF NOT EXISTS` is dropped, for the same reason as in [`build_create_table_sql`]. Returns
/// `None` when the statement does not create a plain table.
pub fn rewrite_create_statement(statement: &str, table: &str) -> Option<String> {
    let rest = statement
        .trim_start()
        .strip_prefix("CREATE TABLE ")?
        .trim_start();
    let rest = rest
        .strip_prefix("IF NOT EXISTS ")
        .map_or(rest, str::trim_start);

    let name_len = table_name_len(rest);
    if name_len == 0 {
        return None;
    }

    Some(format!(
        "CREATE TABLE {}{}",
        quote_identifier(table),
        &rest[name_len..]
    ))
}

/// Length of the possibly qualified and quoted table name `sql` starts with.
fn table_name_len(sql: &str) -> usize {
    let mut quoted = false;
    for (index, c) in sql.char_indices() {
        match c {
            '`' => quoted = !quoted,
            c if !quoted && (c.is_whitespace() || c == '(') => return index,
            _ => {}
        }
    }

    sql.len()
}
