//! Search-cluster adapter backed by the official `elasticsearch` driver.

use super::{BulkOutcome, SearchIndex, UpdateByQueryOutcome};
use crate::error::{BulkDocError, SearchError};
use crate::model::IndexedDocument;
use async_trait::async_trait;
use elasticsearch::cluster::ClusterHealthParts;
use elasticsearch::http::transport::Transport;
use elasticsearch::indices::{
    IndicesCreateParts, IndicesDeleteParts, IndicesGetParts, IndicesPutMappingParts, IndicesRefreshParts,
};
use elasticsearch::{BulkOperation, BulkParts, Elasticsearch, SearchParts, UpdateByQueryParts};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub struct ElasticsearchIndex {
    client: Elasticsearch,
}

impl ElasticsearchIndex {
    /// Waits for an HTTP 200 from the cluster root, indefinitely (1 s between tries), then
    /// blocks on `wait_healthy`, per §4.1's "initial HTTP probe waits indefinitely".
    pub async fn connect(host: &str, port: u16, health_timeout_sec: u64) -> Result<Self, SearchError> {
        let base_url = format!("http://{host}:{port}");
        let probe_client = reqwest::Client::new();
        loop {
            match probe_client.get(&base_url).send().await {
                Ok(response) if response.status().is_success() => break,
                _ => tokio::time::sleep(Duration::from_secs(1)).await,
            }
        }

        let transport = Transport::single_node(&base_url).map_err(|e| SearchError::Connection(e.to_string()))?;
        let client = Elasticsearch::new(transport);
        let index = Self { client };
        index.wait_healthy(health_timeout_sec).await?;
        Ok(index)
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn wait_healthy(&self, timeout_sec: u64) -> Result<(), SearchError> {
        for _ in 0..timeout_sec.max(1) {
            let response = self
                .client
                .cluster()
                .health(ClusterHealthParts::None)
                .wait_for_status(elasticsearch::params::WaitForStatus::Yellow)
                .send()
                .await;
            if response.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(SearchError::HealthTimeout)
    }

    async fn existing_indices(&self, pattern: &str) -> Result<HashSet<String>, SearchError> {
        let response = self
            .client
            .indices()
            .get(IndicesGetParts::Index(&[pattern]))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(body
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_index(&self, name: &str, mapping: &Value) -> Result<(), SearchError> {
        self.client
            .indices()
            .create(IndicesCreateParts::Index(name))
            .body(mapping.clone())
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(())
    }

    async fn put_mapping(&self, name: &str, mapping: &Value) -> Result<(), SearchError> {
        let properties = mapping.get("mappings").cloned().unwrap_or_else(|| json!({}));
        self.client
            .indices()
            .put_mapping(IndicesPutMappingParts::Index(&[name]))
            .body(properties)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(())
    }

    async fn delete_indices(&self, names: &[String]) -> Result<(), SearchError> {
        if names.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        self.client
            .indices()
            .delete(IndicesDeleteParts::Index(&names))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(())
    }

    async fn bulk_upsert(&self, index: &str, docs: &[IndexedDocument]) -> Result<BulkOutcome, SearchError> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let mut body: Vec<BulkOperation<Value>> = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut fields = serde_json::to_value(doc).map_err(|e| SearchError::Request(e.to_string()))?;
            if let Some(obj) = fields.as_object_mut() {
                obj.remove("_id");
            }
            let op = BulkOperation::update(doc.id.clone(), json!({ "doc": fields, "doc_as_upsert": true }));
            body.push(op.into());
        }

        let response = self
            .client
            .bulk(BulkParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let mut outcome = BulkOutcome::default();
        if let Some(items) = body.get("items").and_then(|v| v.as_array()) {
            for item in items {
                let Some(update) = item.get("update") else { continue };
                let id = update.get("_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                if let Some(error) = update.get("error") {
                    let error_type = error.get("type").and_then(|v| v.as_str()).unwrap_or("unknown");
                    let reason = error.get("reason").and_then(|v| v.as_str()).unwrap_or("");
                    let doc_error = BulkDocError {
                        error_type: error_type.to_string(),
                        reason: reason.to_string(),
                    };
                    outcome.failed.push((id, doc_error.as_store_message()));
                } else {
                    outcome.indexed_ids.push(id);
                }
            }
        }
        Ok(outcome)
    }

    async fn update_by_query(
        &self,
        index: &str,
        old_webentity: &str,
        new_webentity: &str,
        prefixes: &[String],
    ) -> Result<UpdateByQueryOutcome, SearchError> {
        let query = if prefixes.is_empty() {
            json!({ "term": { "webentity_id": old_webentity } })
        } else {
            json!({
                "bool": {
                    "must": [
                        { "term": { "webentity_id": old_webentity } },
                        {
                            "bool": {
                                "should": prefixes.iter().map(|p| json!({ "term": { "prefixes": p } })).collect::<Vec<_>>(),
                                "minimum_should_match": 1
                            }
                        }
                    ]
                }
            })
        };

        let body = json!({
            "script": {
                "lang": "painless",
                "source": "ctx._source.webentity_id = params.new_webentity_id; ctx._source.WEUpdateDate = params.updateDate",
                "params": {
                    "new_webentity_id": new_webentity,
                    "updateDate": chrono::Utc::now().to_rfc3339(),
                }
            },
            "query": query,
        });

        let response = self
            .client
            .update_by_query(UpdateByQueryParts::Index(&[index]))
            .conflicts(&["proceed"])
            .body(body)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        Ok(UpdateByQueryOutcome {
            updated: body.get("updated").and_then(|v| v.as_u64()).unwrap_or(0),
            took_ms: body.get("took").and_then(|v| v.as_u64()).unwrap_or(0),
        })
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        self.client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(())
    }

    async fn max_index_dates(&self, indices: &[String]) -> Result<HashMap<String, i64>, SearchError> {
        if indices.is_empty() {
            return Ok(HashMap::new());
        }
        let index_names: Vec<&str> = indices.iter().map(|s| s.as_str()).collect();
        let response = self
            .client
            .search(SearchParts::Index(&index_names))
            .body(json!({
                "size": 0,
                "aggs": {
                    "indices": {
                        "terms": { "field": "_index" },
                        "aggs": { "maxIndexDate": { "max": { "field": "indexDate" } } }
                    }
                }
            }))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let mut result = HashMap::new();
        if let Some(buckets) = body
            .pointer("/aggregations/indices/buckets")
            .and_then(|v| v.as_array())
        {
            for bucket in buckets {
                let Some(key) = bucket.get("key").and_then(|v| v.as_str()) else { continue };
                let value = bucket
                    .pointer("/maxIndexDate/value")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                result.insert(key.to_string(), value as i64);
            }
        }
        Ok(result)
    }
}
