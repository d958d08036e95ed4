//! Test utilities for OpenSearch sources.

use etl_config::shared::OpenSearchConnectionConfig;
use reqwest::Method;
use serde_json::Value;
use uuid::Uuid;

use crate::opensearch::{OpenSearchClient, OpenSearchConnector};

/// OpenSearch base URL (e.g. `http://localhost:9200`).
pub const OPENSEARCH_URL_ENV: &str = "TESTS_OPENSEARCH_URL";

/// Returns whether OpenSearch integration tests should be skipped.
///
/// Prints a warning and returns `true` when [`OPENSEARCH_URL_ENV`] is missing.
pub fn skip_if_missing_opensearch_env_vars() -> bool {
    if std::env::var_os(OPENSEARCH_URL_ENV).is_some() {
        return false;
    }

    eprintln!("skipping opensearch integration test: missing {OPENSEARCH_URL_ENV}");
    true
}

/// A cluster handle that creates uniquely prefixed indices for a single test.
pub struct OpenSearchTestCluster {
    config: OpenSearchConnectionConfig,
    client: OpenSearchClient,
    prefix: String,
}

impl OpenSearchTestCluster {
    /// Prefix shared by every index this test creates, e.g. `etl-tests-1f0c...`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn connector(&self) -> OpenSearchConnector {
        OpenSearchConnector::new(self.config.clone())
    }

    /// Indexes `documents` into `index` and refreshes it so they are searchable.
    ///
    /// # Panics
    /// Panics if any request fails.
    pub async fn index_documents(&self, index: &str, documents: Vec<Value>) {
        for document in documents {
            self.client
                .send::<Value>(Method::POST, &format!("/{index}/_doc"), Some(document))
                .await
                .expect("Failed to index document");
        }

        self.client
            .send::<Value>(Method::POST, &format!("/{index}/_refresh"), None)
            .await
            .expect("Failed to refresh index");
    }

    /// Deletes every index created under [`Self::prefix`].
    ///
    /// # Panics
    /// Panics if the request fails.
    pub async fn delete_indices(&self) {
        self.client
            .send::<Value>(Method::DELETE, &format!("/{}*", self.prefix), None)
            .await
            .expect("Failed to delete test indices");
    }
}

/// Connects to the cluster named by [`OPENSEARCH_URL_ENV`].
pub fn setup_opensearch_cluster() -> OpenSearchTestCluster {
    let config = OpenSearchConnectionConfig {
        url: std::env::var(OPENSEARCH_URL_ENV)
            .unwrap_or_else(|_| panic!("{OPENSEARCH_URL_ENV} must be set")),
        username: None,
        password: None,
        scroll_keep_alive: "1m".to_owned(),
        accept_invalid_certs: true,
        request_timeout_secs: 30,
    };
    let client = OpenSearchClient::new(&config).expect("Failed to build OpenSearch client");

    OpenSearchTestCluster {
        config,
        client,
        prefix: format!("etl-tests-{}", Uuid::new_v4().simple()),
    }
}
