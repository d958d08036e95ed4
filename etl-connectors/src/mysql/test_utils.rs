//! Test utilities for MySQL sources.

use etl_config::shared::MySqlConnectionConfig;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{Connection, Executor, MySqlConnection, MySqlPool};
use uuid::Uuid;

use crate::mysql::MySqlConnector;

/// MySQL host name (required).
pub const MYSQL_HOST_ENV: &str = "TESTS_MYSQL_HOST";
/// MySQL port (optional, defaults to 3306).
pub const MYSQL_PORT_ENV: &str = "TESTS_MYSQL_PORT";
/// MySQL user name (required).
pub const MYSQL_USER_ENV: &str = "TESTS_MYSQL_USER";
/// MySQL password (optional).
pub const MYSQL_PASSWORD_ENV: &str = "TESTS_MYSQL_PASSWORD";

/// Returns whether MySQL integration tests should be skipped.
///
/// Prints a warning and returns `true` when any required env var is missing.
pub fn skip_if_missing_mysql_env_vars() -> bool {
    let missing: Vec<&str> = [MYSQL_HOST_ENV, MYSQL_USER_ENV]
        .iter()
        .copied()
        .filter(|var| std::env::var_os(var).is_none())
        .collect();

    if missing.is_empty() {
        return false;
    }

    eprintln!("skipping mysql integration test: missing {}", missing.join(", "));
    true
}

/// A MySQL database created for a single test.
pub struct MySqlTestDatabase {
    config: MySqlConnectionConfig,
    pool: MySqlPool,
}

impl MySqlTestDatabase {
    /// Connection settings scoped to the test database.
    pub fn config(&self) -> MySqlConnectionConfig {
        self.config.clone()
    }

    /// Builds a [`MySqlConnector`] scoped to this test database.
    pub fn connector(&self) -> MySqlConnector {
        MySqlConnector::new(self.config())
    }

    /// Pool connected to the test database, for seeding.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Runs a statement in the test database.
    ///
    /// # Panics
    /// Panics if the statement fails.
    pub async fn execute(&self, sql: &str) {
        self.pool
            .execute(sql)
            .await
            .unwrap_or_else(|e| panic!("MySQL statement `{sql}` failed: {e}"));
    }

    /// Drops the test database.
    ///
    /// # Panics
    /// Panics if any database operation fails.
    pub async fn drop_database(self) {
        self.pool.close().await;

        let mut connection = MySqlConnection::connect(&server_url(&self.config))
            .await
            .expect("Failed to connect to MySQL");

        connection
            .execute(&*format!("DROP DATABASE IF EXISTS `{}`", self.config.database))
            .await
            .expect("Failed to destroy database");
    }
}

fn server_url(config: &MySqlConnectionConfig) -> String {
    format!(
        "mysql://{}:{}@{}:{}",
        config.username,
        config
            .password
            .as_ref()
            .map(|password| password.expose_secret().as_str())
            .unwrap_or_default(),
        config.host,
        config.port
    )
}

/// Creates a new MySQL database named after a random UUID.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn setup_mysql_database() -> MySqlTestDatabase {
    let env = |name: &str| std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"));
    let config = MySqlConnectionConfig {
        host: env(MYSQL_HOST_ENV),
        port: std::env::var(MYSQL_PORT_ENV)
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(3306),
        username: env(MYSQL_USER_ENV),
        password: std::env::var(MYSQL_PASSWORD_ENV)
            .ok()
            .filter(|password| !password.is_empty())
            .map(SecretString::new),
        database: format!("etl_tests_{}", Uuid::new_v4().simple()),
        max_connections: 2,
    };

    let connection_url = server_url(&config);
    let mut connection = MySqlConnection::connect(&connection_url)
        .await
        .expect("Failed to connect to MySQL");

    connection
        .execute(&*format!("CREATE DATABASE `{}`", config.database))
        .await
        .expect("Failed to create database");

    let pool = MySqlPool::connect(&format!("{connection_url}/{}", config.database))
        .await
        .expect("Failed to connect to MySQL database");

    MySqlTestDatabase { config, pool }
}
