use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection settings of a ClickHouse server, used both as a source and as the destination.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally leaking
/// secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConnectionConfig {
    /// HTTP(S) endpoint, e.g. `http://localhost:8123`.
    pub url: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    pub database: String,
}

/// Connection settings of a MySQL or MariaDB server.
#[derive(Debug, Clone, Deserialize)]
pub struct MySqlConnectionConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    pub database: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Connection settings of an OpenSearch cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenSearchConnectionConfig {
    /// Base URL, e.g. `https://search.internal:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// How long the cluster keeps a scroll cursor alive between pages.
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,
    /// Accepts self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// A configured source, keyed by its logical name in [`crate::shared::SyncConfig::sources`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    #[serde(rename = "clickhouse")]
    ClickHouse(ClickHouseConnectionConfig),
    #[serde(rename = "mysql")]
    MySql(MySqlConnectionConfig),
    #[serde(rename = "opensearch")]
    OpenSearch(OpenSearchConnectionConfig),
}

impl SourceConfig {
    /// Returns the name of the source's engine.
    pub fn engine(&self) -> &'static str {
        match self {
            SourceConfig::ClickHouse(_) => "clickhouse",
            SourceConfig::MySql(_) => "mysql",
            SourceConfig::OpenSearch(_) => "opensearch",
        }
    }

    pub fn validate(&self, key: &str) -> Result<(), ValidationError> {
        let (field, value) = match self {
            SourceConfig::ClickHouse(config) => ("url", config.url.as_str()),
            SourceConfig::MySql(config) => ("host", config.host.as_str()),
            SourceConfig::OpenSearch(config) => ("url", config.url.as_str()),
        };

        if value.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("sources.{key}.{field}"),
                constraint: "must not be empty".to_string(),
            });
        }

        if let SourceConfig::MySql(config) = self {
            if config.max_connections == 0 {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("sources.{key}.max_connections"),
                    constraint: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// The warehouse synced data is written to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    #[serde(rename = "clickhouse")]
    ClickHouse(ClickHouseConnectionConfig),
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            DestinationConfig::ClickHouse(config) if config.url.trim().is_empty() => {
                Err(ValidationError::InvalidFieldValue {
                    field: "destination.clickhouse.url".to_string(),
                    constraint: "must not be empty".to_string(),
                })
            }
            DestinationConfig::ClickHouse(_) => Ok(()),
        }
    }
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_max_connections() -> u32 {
    4
}

fn default_scroll_keep_alive() -> String {
    "2m".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}
