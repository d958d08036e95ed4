use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::Config;
use crate::shared::{DestinationConfig, ObjectConfig, PipelineConfig, SourceConfig, ValidationError};

/// Complete configuration of the sync runner.
///
/// Sources are keyed by a logical name (`guava`, `applemango`, …) that objects refer to and that
/// doubles as the default provenance label. Environment overrides address them by key, as in
/// `APP_SOURCES__GUAVA__MYSQL__PASSWORD`.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally leaking
/// secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub destination: DestinationConfig,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Restricts a run to the objects of these source keys. Empty runs every source.
    #[serde(default)]
    pub only_sources: Vec<String>,
}

impl SyncConfig {
    /// Validates the complete configuration.
    ///
    /// When objects run concurrently, no two configured objects may write the same destination
    /// table. Indices expanded from one pattern are exempt since they are processed in order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.destination.validate()?;
        self.pipeline.validate()?;

        for (key, source) in &self.sources {
            source.validate(key)?;
        }

        for key in &self.only_sources {
            if !self.sources.contains_key(key) {
                return Err(ValidationError::InvalidFieldValue {
                    field: "only_sources".to_string(),
                    constraint: format!("`{key}` is not a configured source"),
                });
            }
        }

        for object in &self.objects {
            object.validate()?;
            if !self.sources.contains_key(&object.source) {
                return Err(ValidationError::UnknownSource {
                    object: object.name.clone(),
                    source_name: object.source.clone(),
                });
            }
        }

        if self.pipeline.max_concurrent_objects > 1 {
            let mut owners: HashMap<&str, &str> = HashMap::new();
            for object in &self.objects {
                let destination = object.destination_table();
                if let Some(first) = owners.insert(destination, &object.name) {
                    return Err(ValidationError::SharedDestination {
                        destination: destination.to_string(),
                        first: first.to_string(),
                        second: object.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns `true` when the objects of source `key` take part in the run.
    pub fn runs_source(&self, key: &str) -> bool {
        self.only_sources.is_empty() || self.only_sources.iter().any(|only| only == key)
    }
}

impl Config for SyncConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["only_sources"];
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "destination": {
            "clickhouse": { "url": "http://localhost:8123", "user": "default", "database": "dw" }
        },
        "sources": {
            "guava": {
                "mysql": { "host": "db", "username": "etl", "database": "guava" }
            }
        },
        "objects": [
            { "source": "guava", "name": "orders", "kind": "relational", "key_columns": ["order_id"] },
            { "source": "guava", "name": "orders_archive", "kind": "relational", "destination": "orders" }
        ]
    }"#;

    #[test]
    fn sequential_runs_allow_shared_destinations() {
        let config: SyncConfig = serde_json::from_str(CONFIG).unwrap();

        assert!(config.validate().is_ok());
        let SourceConfig::MySql(mysql) = &config.sources["guava"] else {
            panic!("expected a mysql source");
        };
        assert_eq!(mysql.port, 3306);
    }

    #[test]
    fn concurrent_runs_reject_shared_destinations() {
        let mut config: SyncConfig = serde_json::from_str(CONFIG).unwrap();
        config.pipeline.max_concurrent_objects = 4;

        assert_eq!(
            config.validate(),
            Err(ValidationError::SharedDestination {
                destination: "orders".to_string(),
                first: "orders".to_string(),
                second: "orders_archive".to_string(),
            })
        );
    }

    #[test]
    fn objects_must_name_a_configured_source() {
        let mut config: SyncConfig = serde_json::from_str(CONFIG).unwrap();
        config.objects[0].source = "applemango".to_string();

        assert_eq!(
            config.validate(),
            Err(ValidationError::UnknownSource {
                object: "orders".to_string(),
                source_name: "applemango".to_string(),
            })
        );
    }

    #[test]
    fn source_selection_must_name_configured_sources() {
        let mut config: SyncConfig = serde_json::from_str(CONFIG).unwrap();
        config.only_sources = vec!["guava".to_string(), "metrics".to_string()];

        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue {
                field: "only_sources".to_string(),
                constraint: "`metrics` is not a configured source".to_string(),
            })
        );
    }

    #[test]
    fn empty_source_selection_runs_every_source() {
        let mut config: SyncConfig = serde_json::from_str(CONFIG).unwrap();

        assert!(config.only_sources.is_empty());
        assert!(config.runs_source("guava"));
        assert!(config.runs_source("applemango"));

        config.only_sources = vec!["applemango".to_string()];
        assert!(!config.runs_source("guava"));
        assert!(config.runs_source("applemango"));
    }
}
