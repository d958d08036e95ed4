use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// The shape of a source object, which decides how it is extracted and transformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A table of a relational database, paged with limit/offset.
    Relational,
    /// An index of a search engine, read through scroll cursors.
    SearchIndex,
    /// A table of a columnar warehouse, paged with limit/offset.
    Columnar,
}

/// Declared type of an ordering column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingType {
    /// A date-time value, possibly stored as text.
    Timestamp,
    /// An integer count of nanoseconds since the Unix epoch.
    IntegerEpoch,
    /// A strictly increasing integer such as an auto-increment id.
    MonotonicSequence,
}

/// Ordering column of a configured object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: OrderingType,
}

/// A table or index to sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ObjectConfig {
    /// Key of the source in [`crate::shared::SyncConfig::sources`].
    pub source: String,
    /// Table or index name. Search-index names may contain `*` wildcards.
    pub name: String,
    pub kind: ObjectKind,
    /// Destination table. Defaults to `name`.
    #[serde(default)]
    pub destination: Option<String>,
    /// Provenance label. Defaults to the source key.
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub ordering_column: Option<OrderingColumnConfig>,
    /// Columns deduplicating the destination table.
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub max_rows: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u64>,
    /// Keywords routing the indices of a wildcard pattern to dedicated tables.
    #[serde(default = "default_route_keywords")]
    pub route_keywords: Vec<String>,
}

impl ObjectConfig {
    /// Returns the destination table, falling back to the object name.
    pub fn destination_table(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.name)
    }

    /// Returns `true` when the name is a wildcard pattern.
    pub fn is_pattern(&self) -> bool {
        self.name.contains('*')
    }

    /// Validates the object settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(invalid(self, "name", "must not be empty"));
        }

        if self.page_size == Some(0) {
            return Err(invalid(self, "page_size", "must be greater than 0"));
        }

        if self.max_rows == Some(0) {
            return Err(invalid(self, "max_rows", "must be greater than 0"));
        }

        if self.is_pattern() && self.kind != ObjectKind::SearchIndex {
            return Err(invalid(
                self,
                "name",
                "wildcard patterns are only supported for search indices",
            ));
        }

        if self
            .ordering_column
            .as_ref()
            .is_some_and(|column| column.name.trim().is_empty())
        {
            return Err(invalid(self, "ordering_column.name", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(object: &ObjectConfig, field: &str, constraint: &str) -> ValidationError {
    ValidationError::InvalidFieldValue {
        field: format!("objects[{}].{field}", object.name),
        constraint: constraint.to_string(),
    }
}

fn default_route_keywords() -> Vec<String> {
    vec!["sms".to_string(), "nms".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str, kind: ObjectKind) -> ObjectConfig {
        ObjectConfig {
            source: "guava".into(),
            name: name.into(),
            kind,
            destination: None,
            source_system: None,
            ordering_column: None,
            key_columns: Vec::new(),
            max_rows: None,
            page_size: None,
            route_keywords: default_route_keywords(),
        }
    }

    #[test]
    fn patterns_require_search_indices() {
        assert!(object("perfhist-*", ObjectKind::SearchIndex).validate().is_ok());
        assert!(object("orders_*", ObjectKind::Relational).validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let object: ObjectConfig = serde_json::from_str(
            r#"{
                "source": "guava",
                "name": "otel_logs",
                "kind": "columnar",
                "ordering_column": { "name": "Timestamp", "type": "integer_epoch" }
            }"#,
        )
        .unwrap();

        assert_eq!(object.destination_table(), "otel_logs");
        assert_eq!(
            object.ordering_column.unwrap().typ,
            OrderingType::IntegerEpoch
        );
        assert_eq!(object.route_keywords, ["sms", "nms"]);
    }
}
