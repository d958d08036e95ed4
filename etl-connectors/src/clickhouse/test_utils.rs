//! Test utilities for ClickHouse sources and destinations.

use clickhouse::Client;
use etl_config::shared::ClickHouseConnectionConfig;
use secrecy::SecretString;
use uuid::Uuid;

use crate::clickhouse::ClickHouseConnector;

/// ClickHouse HTTP URL (e.g. `http://localhost:8123`).
pub const CLICKHOUSE_URL_ENV: &str = "TESTS_CLICKHOUSE_URL";
/// ClickHouse user name (required).
pub const CLICKHOUSE_USER_ENV: &str = "TESTS_CLICKHOUSE_USER";
/// ClickHouse password (optional, omit or leave empty for passwordless access).
pub const CLICKHOUSE_PASSWORD_ENV: &str = "TESTS_CLICKHOUSE_PASSWORD";

/// Returns whether ClickHouse integration tests should be skipped.
///
/// Prints a warning and returns `true` when any required env var is missing.
/// Required: [`CLICKHOUSE_URL_ENV`], [`CLICKHOUSE_USER_ENV`].
/// Optional: [`CLICKHOUSE_PASSWORD_ENV`].
pub fn skip_if_missing_clickhouse_env_vars() -> bool {
    let missing: Vec<&str> = [CLICKHOUSE_URL_ENV, CLICKHOUSE_USER_ENV]
        .iter()
        .copied()
        .filter(|var| std::env::var_os(var).is_none())
        .collect();

    if missing.is_empty() {
        return false;
    }

    eprintln!(
        "skipping clickhouse integration test: missing {}",
        missing.join(", ")
    );
    true
}

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

/// Generates a unique database name for test isolation.
pub fn random_database_name() -> String {
    format!("etl_tests_{}", Uuid::new_v4().simple())
}

/// An isolated ClickHouse database for a single test.
///
/// Unlike a guard, the database is not dropped implicitly: call
/// [`ClickHouseTestDatabase::drop_database`] at the end of the test.
pub struct ClickHouseTestDatabase {
    /// Root client (no database selected) used for CREATE/DROP DATABASE.
    root_client: Client,
    /// Client scoped to the test database for seeding and assertions.
    db_client: Client,
    config: ClickHouseConnectionConfig,
}

impl ClickHouseTestDatabase {
    fn new(config: ClickHouseConnectionConfig, password: Option<String>) -> Self {
        let build_client = |db: Option<&str>| {
            let mut client = Client::default()
                .with_url(&config.url)
                .with_user(&config.user);
            if let Some(db) = db {
                client = client.with_database(db);
            }
            if let Some(password) = &password {
                client = client.with_password(password);
            }
            client
        };

        Self {
            root_client: build_client(None),
            db_client: build_client(Some(&config.database)),
            config,
        }
    }

    /// Name of the test database.
    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Connection settings scoped to the test database.
    pub fn config(&self) -> ClickHouseConnectionConfig {
        self.config.clone()
    }

    /// Builds a [`ClickHouseConnector`] scoped to this test database.
    pub fn connector(&self) -> ClickHouseConnector {
        ClickHouseConnector::new(self.config())
    }

    /// Creates the test database in ClickHouse.
    pub async fn create_database(&self) {
        self.root_client
            .query(&format!("CREATE DATABASE IF NOT EXISTS `{}`", self.database()))
            .execute()
            .await
            .expect("Failed to create test ClickHouse database");
    }

    /// Drops the test database from ClickHouse.
    pub async fn drop_database(&self) {
        self.root_client
            .query(&format!("DROP DATABASE IF EXISTS `{}`", self.database()))
            .execute()
            .await
            .expect("Failed to drop test ClickHouse database");
    }

    /// Runs a statement, such as DDL or an `INSERT ... VALUES`, in the test database.
    pub async fn execute(&self, sql: &str) {
        self.db_client
            .query(sql)
            .execute()
            .await
            .unwrap_or_else(|e| panic!("ClickHouse statement `{sql}` failed: {e}"));
    }

    /// Fetches all rows of a query.
    ///
    /// `T` must be an owned row type (i.e. `Value<'a> = Self`) and implement
    /// [`serde::de::DeserializeOwned`]. The caller is responsible for writing a SELECT whose
    /// columns match `T`'s fields in the correct order.
    pub async fn query<T>(&self, sql: &str) -> Vec<T>
    where
        T: for<'a> clickhouse::Row<Value<'a> = T> + serde::de::DeserializeOwned + 'static,
    {
        self.db_client
            .query(sql)
            .fetch_all::<T>()
            .await
            .expect("ClickHouse query failed")
    }
}

/// Creates a fresh, isolated ClickHouse database for a single test.
///
/// Reads connection parameters from environment variables:
/// - [`CLICKHOUSE_URL_ENV`]: required
/// - [`CLICKHOUSE_USER_ENV`]: required
/// - [`CLICKHOUSE_PASSWORD_ENV`]: optional
pub async fn setup_clickhouse_database() -> ClickHouseTestDatabase {
    let password = std::env::var(CLICKHOUSE_PASSWORD_ENV)
        .ok()
        .filter(|password| !password.is_empty());
    let config = ClickHouseConnectionConfig {
        url: env_var(CLICKHOUSE_URL_ENV),
        user: env_var(CLICKHOUSE_USER_ENV),
        password: password.clone().map(SecretString::new),
        database: random_database_name(),
    };

    let database = ClickHouseTestDatabase::new(config, password);
    database.create_database().await;
    database
}
