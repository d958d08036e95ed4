use etl::connector::{DestinationConnector, SourceConnector};
use etl::error::{ErrorKind, EtlResult};
use etl_config::shared::ClickHouseConnectionConfig;
use tracing::debug;

use crate::clickhouse::{ClickHouseClient, ClickHouseDestination, ClickHouseSource};

/// Opens ClickHouse connections, either as the sync destination or as a columnar source.
///
/// Every connection is verified with a round trip before it is handed out, so an unreachable
/// server surfaces as a connection failure rather than as the first failed query.
#[derive(Debug, Clone)]
pub struct ClickHouseConnector {
    config: ClickHouseConnectionConfig,
    max_bytes_per_insert: u64,
}

impl ClickHouseConnector {
    /// Uncompressed bytes after which an INSERT statement is committed and a new one opened.
    pub const DEFAULT_MAX_BYTES_PER_INSERT: u64 = 64 * 1024 * 1024;

    pub fn new(config: ClickHouseConnectionConfig) -> Self {
        Self {
            config,
            max_bytes_per_insert: Self::DEFAULT_MAX_BYTES_PER_INSERT,
        }
    }

    pub fn with_max_bytes_per_insert(mut self, max_bytes_per_insert: u64) -> Self {
        self.max_bytes_per_insert = max_bytes_per_insert.max(1);
        self
    }

    async fn open(&self, fallback: ErrorKind) -> EtlResult<ClickHouseClient> {
        let client = ClickHouseClient::new(&self.config);
        client.ping(fallback).await?;
        debug!(url = %self.config.url, database = %self.config.database, "connected to clickhouse");

        Ok(client)
    }
}

impl DestinationConnector for ClickHouseConnector {
    type Destination = ClickHouseDestination;

    async fn connect(&self) -> EtlResult<Self::Destination> {
        let client = self.open(ErrorKind::DestinationQueryFailed).await?;
        Ok(ClickHouseDestination::new(client, self.max_bytes_per_insert))
    }
}

impl SourceConnector for ClickHouseConnector {
    type Source = ClickHouseSource;

    async fn connect(&self) -> EtlResult<Self::Source> {
        let client = self.open(ErrorKind::SourceQueryFailed).await?;
        Ok(ClickHouseSource::new(client))
    }
}
