use etl::connector::SourceConnector;
use etl::error::{ErrorKind, EtlResult};
use etl_config::shared::MySqlConnectionConfig;
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use tracing::debug;

use crate::mysql::source::{MySqlSource, to_etl_error};

/// Opens pooled connections to a MySQL or MariaDB database.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    config: MySqlConnectionConfig,
}

impl MySqlConnector {
    pub fn new(config: MySqlConnectionConfig) -> Self {
        Self { config }
    }

    /// Creates MySQL connection options for connecting to the configured database.
    fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.username)
            .database(&self.config.database);

        if let Some(password) = &self.config.password {
            options = options.password(password.expose_secret());
        }

        options
    }
}

impl SourceConnector for MySqlConnector {
    type Source = MySqlSource;

    async fn connect(&self) -> EtlResult<Self::Source> {
        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect_with(self.connect_options())
            .await
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::SourceConnectionFailed,
                    "MySQL connection failed",
                    format!(
                        "Failed to connect to {}:{}/{}: {e}",
                        self.config.host, self.config.port, self.config.database
                    ),
                    e,
                )
            })?;
        debug!(host = %self.config.host, database = %self.config.database, "connected to mysql");

        Ok(MySqlSource::new(pool))
    }
}
