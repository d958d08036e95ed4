use etl::connector::SourceConnector;
use etl::error::EtlResult;
use etl_config::shared::OpenSearchConnectionConfig;
use tracing::debug;

use crate::opensearch::{OpenSearchClient, OpenSearchSource};

/// Opens connections to an OpenSearch cluster.
#[derive(Debug, Clone)]
pub struct OpenSearchConnector {
    config: OpenSearchConnectionConfig,
}

impl OpenSearchConnector {
    pub fn new(config: OpenSearchConnectionConfig) -> Self {
        Self { config }
    }
}

impl SourceConnector for OpenSearchConnector {
    type Source = OpenSearchSource;

    async fn connect(&self) -> EtlResult<Self::Source> {
        let client = OpenSearchClient::new(&self.config)?;
        client.ping().await?;
        debug!(url = %self.config.url, "connected to opensearch");

        Ok(OpenSearchSource::new(
            client,
            self.config.scroll_keep_alive.clone(),
        ))
    }
}
