pub use etl_config::shared::{ObjectKind, OrderingType};

/// The column a source object is incrementally extracted by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingColumn {
    /// Column name as it appears in the source.
    pub name: String,
    pub typ: OrderingType,
}

impl OrderingColumn {
    pub fn new(name: impl Into<String>, typ: OrderingType) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// A table or index to sync into one destination table.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObject {
    /// Name of the table or index in the source.
    pub name: String,
    pub kind: ObjectKind,
    /// Name of the destination table. Defaults to the source name.
    pub destination: String,
    /// Label stamped into `source_system` on unkeyed rows.
    pub source_system: String,
    /// Objects without an ordering column are fully re-extracted on every run.
    pub ordering: Option<OrderingColumn>,
    /// A non-empty key makes the destination table deduplicating.
    pub key_columns: Vec<String>,
    /// Cap on rows pulled per run. Falls back to the extraction default.
    pub max_rows: Option<u64>,
    /// Page size override. Falls back to the extraction default.
    pub page_size: Option<u64>,
    /// Keywords routing the indices of a wildcard pattern to `<destination>_<keyword>` tables.
    pub route_keywords: Vec<String>,
}

impl SourceObject {
    pub fn new(
        name: impl Into<String>,
        kind: ObjectKind,
        source_system: impl Into<String>,
    ) -> Self {
        let name = name.into();

        Self {
            destination: name.clone(),
            name,
            kind,
            source_system: source_system.into(),
            ordering: None,
            key_columns: Vec::new(),
            max_rows: None,
            page_size: None,
            route_keywords: Vec::new(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_ordering(mut self, name: impl Into<String>, typ: OrderingType) -> Self {
        self.ordering = Some(OrderingColumn::new(name, typ));
        self
    }

    pub fn with_key_columns<I, S>(mut self, key_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = key_columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_route_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` when rows are deduplicated by key in the destination.
    pub fn is_deduplicating(&self) -> bool {
        !self.key_columns.is_empty()
    }
}
