use etl::conversions::json::json_document_to_record;
use etl::error::EtlResult;
use etl::filter::Predicate;
use etl::routing::matches_pattern;
use etl::source::{ScrollPage, Source};
use etl::types::{Batch, SourceObject};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::opensearch::client::OpenSearchClient;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `hits.total`, an object on current clusters and a bare number on legacy ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Object { value: u64 },
    Count(u64),
}

impl TotalHits {
    fn value(&self) -> u64 {
        match self {
            TotalHits::Object { value } | TotalHits::Count(value) => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct CatIndex {
    index: String,
}

impl SearchResponse {
    fn into_scroll_page(self) -> ScrollPage {
        let total = self.hits.total.as_ref().map(TotalHits::value);
        let records = self
            .hits
            .hits
            .into_iter()
            .map(|hit| json_document_to_record(hit.source.unwrap_or_default()));

        ScrollPage {
            scroll_id: self.scroll_id,
            batch: Batch::from_records(records),
            total,
        }
    }
}

/// Builds the body of a search request.
fn search_body(predicate: &Predicate, sort_column: Option<&str>, size: u64) -> Value {
    let sort = match sort_column {
        Some(column) => json!([{ column: { "order": "asc" } }]),
        None => json!(["_doc"]),
    };

    json!({
        "size": size,
        "query": predicate.to_range_query(),
        "sort": sort,
        "track_total_hits": true,
    })
}

/// OpenSearch indices read as a search-index source.
///
/// Extraction goes through scroll cursors; document `_source` objects are flattened one level
/// into records. Counting and `from`/`size` paging are supported as well, within the cluster's
/// result window.
#[derive(Debug, Clone)]
pub struct OpenSearchSource {
    client: OpenSearchClient,
    scroll_keep_alive: String,
}

impl OpenSearchSource {
    pub fn new(client: OpenSearchClient, scroll_keep_alive: impl Into<String>) -> Self {
        Self {
            client,
            scroll_keep_alive: scroll_keep_alive.into(),
        }
    }
}

impl Source for OpenSearchSource {
    fn name() -> &'static str {
        "opensearch"
    }

    async fn count_rows(&self, object: &SourceObject, predicate: &Predicate) -> EtlResult<u64> {
        let body = json!({ "query": predicate.to_range_query() });
        let response: CountResponse = self
            .client
            .send(Method::POST, &format!("/{}/_count", object.name), Some(body))
            .await?;

        Ok(response.count)
    }

    async fn fetch_page(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        limit: u64,
        offset: u64,
    ) -> EtlResult<Batch> {
        let sort_column = object.ordering.as_ref().map(|ordering| ordering.name.as_str());
        let mut body = search_body(predicate, sort_column, limit);
        body["from"] = json!(offset);

        let response: SearchResponse = self
            .client
            .send(Method::POST, &format!("/{}/_search", object.name), Some(body))
            .await?;

        Ok(response.into_scroll_page().batch)
    }

    async fn open_scroll(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        sort_column: Option<&str>,
        page_size: u64,
    ) -> EtlResult<ScrollPage> {
        let path = format!("/{}/_search?scroll={}", object.name, self.scroll_keep_alive);
        let response: SearchResponse = self
            .client
            .send(
                Method::POST,
                &path,
                Some(search_body(predicate, sort_column, page_size)),
            )
            .await?;
        debug!(index = %object.name, hits = response.hits.hits.len(), "opened scroll");

        Ok(response.into_scroll_page())
    }

    async fn continue_scroll(&self, scroll_id: &str) -> EtlResult<ScrollPage> {
        let body = json!({ "scroll": self.scroll_keep_alive, "scroll_id": scroll_id });
        let response: SearchResponse = self
            .client
            .send(Method::POST, "/_search/scroll", Some(body))
            .await?;

        Ok(response.into_scroll_page())
    }

    async fn clear_scroll(&self, scroll_id: &str) -> EtlResult<()> {
        let body = json!({ "scroll_id": [scroll_id] });
        self.client
            .send::<Value>(Method::DELETE, "/_search/scroll", Some(body))
            .await?;

        Ok(())
    }

    async fn list_objects(&self, pattern: &str) -> EtlResult<Vec<String>> {
        let path = format!("/_cat/indices/{pattern}?format=json&h=index");
        let indices: Vec<CatIndex> = self.client.send(Method::GET, &path, None).await?;

        let mut names: Vec<String> = indices
            .into_iter()
            .map(|index| index.index)
            .filter(|index| matches_pattern(pattern, index))
            .collect();
        names.sort();

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl::filter::PredicateValue;
    use etl::types::Cell;

    #[test]
    fn scroll_body_sorts_by_the_ordering_column() {
        let predicate = Predicate::GreaterThan {
            column: "@timestamp".to_owned(),
            value: PredicateValue::Timestamp("2024-01-01 00:00:00".to_owned()),
        };

        assert_eq!(
            search_body(&predicate, Some("@timestamp"), 1000),
            json!({
                "size": 1000,
                "query": { "range": { "@timestamp": { "gt": "2024-01-01T00:00:00" } } },
                "sort": [{ "@timestamp": { "order": "asc" } }],
                "track_total_hits": true,
            })
        );
    }

    #[test]
    fn unsorted_scroll_uses_index_order() {
        let body = search_body(&Predicate::All, None, 10);

        assert_eq!(body["sort"], json!(["_doc"]));
        assert_eq!(body["query"], json!({ "match_all": {} }));
    }

    #[test]
    fn search_responses_become_scroll_pages() {
        let response: SearchResponse = serde_json::from_value(json!({
            "_scroll_id": "c2Nyb2xs",
            "hits": {
                "total": { "value": 2, "relation": "eq" },
                "hits": [
                    { "_index": "perfhist-sms", "_source": { "host": "a", "latency.ms": 1.5 } },
                    { "_index": "perfhist-sms", "_source": { "host": "b", "cpu": { "user": 3 } } }
                ]
            }
        }))
        .unwrap();

        let page = response.into_scroll_page();

        assert_eq!(page.scroll_id.as_deref(), Some("c2Nyb2xs"));
        assert_eq!(page.total, Some(2));
        assert_eq!(page.batch.len(), 2);
        let host = page.batch.column_index("host").unwrap();
        assert_eq!(page.batch.rows()[1].values()[host], Cell::String("b".to_owned()));
        let latency = page.batch.column_index("latency.ms").unwrap();
        assert_eq!(page.batch.rows()[1].values()[latency], Cell::Null);
        assert!(page.batch.column_index("cpu").is_some());
    }

    #[test]
    fn legacy_totals_are_plain_numbers() {
        let response: SearchResponse =
            serde_json::from_value(json!({ "hits": { "total": 7, "hits": [] } })).unwrap();

        let page = response.into_scroll_page();

        assert_eq!(page.scroll_id, None);
        assert_eq!(page.total, Some(7));
        assert!(page.batch.is_empty());
    }
}
