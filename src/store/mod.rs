//! Store clients (C1): typed adapters over the document store and the search cluster.

mod elastic;
mod fake;
mod mongo;

pub use elastic::ElasticsearchIndex;
pub use fake::{FakeDocumentStore, FakeSearchIndex};
pub use mongo::MongoDocumentStore;

use crate::error::{SearchError, StoreError};
use crate::model::{Corpus, IndexedDocument, PageRecord, WebEntityUpdate};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Outcome of a bulk upsert: which document ids succeeded, and which failed with why.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub indexed_ids: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Outcome of an update-by-query call.
#[derive(Debug, Clone)]
pub struct UpdateByQueryOutcome {
    pub updated: u64,
    pub took_ms: u64,
}

/// Typed operations against `hyphe_<c>.pages` / `.jobs` / `.WEupdates` and the global
/// `hyphe.corpus` collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_indexed_corpora(&self) -> Result<Vec<Corpus>, StoreError>;

    async fn count_pending_pages(&self, corpus: &str) -> Result<u64, StoreError>;
    async fn count_pending_we_updates(&self, corpus: &str) -> Result<u64, StoreError>;

    /// Next `batch_size` page ids in `TO_INDEX`/non-forgotten state, ordered by `timestamp`.
    async fn next_batch_page_ids(&self, corpus: &str, batch_size: i64) -> Result<Vec<String>, StoreError>;

    /// Atomically set `text_indexation_status = IN_BATCH_<uuid>` for the given ids.
    async fn mark_pages_in_batch(&self, corpus: &str, ids: &[String], batch_uuid: &str) -> Result<(), StoreError>;

    /// All pages currently carrying `IN_BATCH_<uuid>` for this corpus.
    async fn pages_in_batch(&self, corpus: &str, batch_uuid: &str) -> Result<Vec<PageRecord>, StoreError>;

    async fn mark_page_indexed(&self, corpus: &str, url: &str, batch_uuid: &str) -> Result<(), StoreError>;
    async fn mark_page_error(
        &self,
        corpus: &str,
        url: &str,
        batch_uuid: &str,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Revert every page still carrying `IN_BATCH_<uuid>` back to `TO_INDEX`.
    async fn revert_batch_to_to_index(&self, corpus: &str, batch_uuid: &str) -> Result<u64, StoreError>;

    /// Shutdown-time sweep (§5 step 4): revert every non-terminal `IN_BATCH_*` page to `TO_INDEX`.
    async fn revert_all_in_batch_pages(&self, corpus: &str) -> Result<u64, StoreError>;

    async fn pending_we_updates(&self, corpus: &str) -> Result<Vec<WebEntityUpdate>, StoreError>;
    async fn count_unindexed_jobs_before(
        &self,
        corpus: &str,
        webentity_id: &str,
        before_ts_ms: i64,
    ) -> Result<u64, StoreError>;
    async fn mark_we_update_finished(&self, corpus: &str, id: &str) -> Result<(), StoreError>;

    /// Job ids whose crawl is terminal and that have no remaining non-terminal page, per §4.6 step 5.
    async fn completed_job_ids(&self, corpus: &str) -> Result<Vec<String>, StoreError>;
    async fn mark_jobs_text_indexed(&self, corpus: &str, job_ids: &[String]) -> Result<u64, StoreError>;
}

/// Typed operations against the search cluster.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Blocks until the cluster reports at least `yellow` health, retrying once per second,
    /// up to `timeout_sec`. Fatal (`SearchError::HealthTimeout`) if the budget is exceeded.
    async fn wait_healthy(&self, timeout_sec: u64) -> Result<(), SearchError>;

    async fn existing_indices(&self, pattern: &str) -> Result<HashSet<String>, SearchError>;
    async fn create_index(&self, name: &str, mapping: &serde_json::Value) -> Result<(), SearchError>;
    async fn put_mapping(&self, name: &str, mapping: &serde_json::Value) -> Result<(), SearchError>;
    async fn delete_indices(&self, names: &[String]) -> Result<(), SearchError>;

    async fn bulk_upsert(&self, index: &str, docs: &[IndexedDocument]) -> Result<BulkOutcome, SearchError>;

    async fn update_by_query(
        &self,
        index: &str,
        old_webentity: &str,
        new_webentity: &str,
        prefixes: &[String],
    ) -> Result<UpdateByQueryOutcome, SearchError>;

    async fn refresh(&self, index: &str) -> Result<(), SearchError>;

    /// Max `indexDate` per index name, via a terms aggregation on `_index` (§4.6 step 3).
    async fn max_index_dates(&self, indices: &[String]) -> Result<HashMap<String, i64>, SearchError>;
}
