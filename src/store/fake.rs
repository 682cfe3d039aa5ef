//! In-memory fakes for `DocumentStore` and `SearchIndex`, used by the test suite instead of a
//! mocking framework, matching the hand-written mock-struct style used throughout this corpus.

use super::{BulkOutcome, DocumentStore, SearchIndex, UpdateByQueryOutcome};
use crate::error::{SearchError, StoreError};
use crate::model::{Corpus, CrawlJob, IndexedDocument, PageRecord, TextIndexationStatus, WebEntityUpdate};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeDocumentStore {
    corpora: Mutex<Vec<Corpus>>,
    pages: Mutex<HashMap<String, Vec<PageRecord>>>,
    jobs: Mutex<HashMap<String, Vec<CrawlJob>>>,
    we_updates: Mutex<HashMap<String, Vec<WebEntityUpdate>>>,
}

impl FakeDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_corpus(&self, corpus: Corpus) {
        self.corpora.lock().unwrap().push(corpus);
    }

    pub fn seed_page(&self, corpus: &str, page: PageRecord) {
        self.pages.lock().unwrap().entry(corpus.to_string()).or_default().push(page);
    }

    pub fn seed_job(&self, corpus: &str, job: CrawlJob) {
        self.jobs.lock().unwrap().entry(corpus.to_string()).or_default().push(job);
    }

    pub fn seed_we_update(&self, corpus: &str, update: WebEntityUpdate) {
        self.we_updates
            .lock()
            .unwrap()
            .entry(corpus.to_string())
            .or_default()
            .push(update);
    }

    pub fn pages_snapshot(&self, corpus: &str) -> Vec<PageRecord> {
        self.pages.lock().unwrap().get(corpus).cloned().unwrap_or_default()
    }

    pub fn remove_corpus(&self, corpus: &str) {
        self.corpora.lock().unwrap().retain(|c| c.id != corpus);
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn list_indexed_corpora(&self) -> Result<Vec<Corpus>, StoreError> {
        Ok(self.corpora.lock().unwrap().clone())
    }

    async fn count_pending_pages(&self, corpus: &str) -> Result<u64, StoreError> {
        let pages = self.pages.lock().unwrap();
        Ok(pages
            .get(corpus)
            .map(|p| {
                p.iter()
                    .filter(|p| p.text_indexation_status == "TO_INDEX" && !p.forgotten)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn count_pending_we_updates(&self, corpus: &str) -> Result<u64, StoreError> {
        let updates = self.we_updates.lock().unwrap();
        Ok(updates
            .get(corpus)
            .map(|u| u.iter().filter(|u| u.index_status == "PENDING").count() as u64)
            .unwrap_or(0))
    }

    async fn next_batch_page_ids(&self, corpus: &str, batch_size: i64) -> Result<Vec<String>, StoreError> {
        let pages = self.pages.lock().unwrap();
        let mut matching: Vec<&PageRecord> = pages
            .get(corpus)
            .map(|p| p.iter().filter(|p| p.text_indexation_status == "TO_INDEX" && !p.forgotten).collect())
            .unwrap_or_default();
        matching.sort_by_key(|p| p.timestamp_ms);
        Ok(matching
            .into_iter()
            .take(batch_size.max(0) as usize)
            .map(|p| p.id.clone())
            .collect())
    }

    async fn mark_pages_in_batch(&self, corpus: &str, ids: &[String], batch_uuid: &str) -> Result<(), StoreError> {
        let mut pages = self.pages.lock().unwrap();
        if let Some(pages) = pages.get_mut(corpus) {
            for page in pages.iter_mut() {
                if ids.contains(&page.id) {
                    page.text_indexation_status = TextIndexationStatus::InBatch(batch_uuid.to_string()).as_store_value();
                }
            }
        }
        Ok(())
    }

    async fn pages_in_batch(&self, corpus: &str, batch_uuid: &str) -> Result<Vec<PageRecord>, StoreError> {
        let pages = self.pages.lock().unwrap();
        let status = TextIndexationStatus::InBatch(batch_uuid.to_string()).as_store_value();
        Ok(pages
            .get(corpus)
            .map(|p| p.iter().filter(|p| p.text_indexation_status == status).cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_page_indexed(&self, corpus: &str, url: &str, batch_uuid: &str) -> Result<(), StoreError> {
        let mut pages = self.pages.lock().unwrap();
        let status = TextIndexationStatus::InBatch(batch_uuid.to_string()).as_store_value();
        if let Some(pages) = pages.get_mut(corpus) {
            for page in pages.iter_mut() {
                if page.url == url && page.text_indexation_status == status {
                    page.text_indexation_status = "INDEXED".to_string();
                }
            }
        }
        Ok(())
    }

    async fn mark_page_error(
        &self,
        corpus: &str,
        url: &str,
        batch_uuid: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut pages = self.pages.lock().unwrap();
        let status = TextIndexationStatus::InBatch(batch_uuid.to_string()).as_store_value();
        if let Some(pages) = pages.get_mut(corpus) {
            for page in pages.iter_mut() {
                if page.url == url && page.text_indexation_status == status {
                    page.text_indexation_status = "ERROR".to_string();
                    page.text_indexation_error = Some(reason.to_string());
                }
            }
        }
        Ok(())
    }

    async fn revert_batch_to_to_index(&self, corpus: &str, batch_uuid: &str) -> Result<u64, StoreError> {
        let mut pages = self.pages.lock().unwrap();
        let status = TextIndexationStatus::InBatch(batch_uuid.to_string()).as_store_value();
        let mut reverted = 0;
        if let Some(pages) = pages.get_mut(corpus) {
            for page in pages.iter_mut() {
                if page.text_indexation_status == status {
                    page.text_indexation_status = "TO_INDEX".to_string();
                    reverted += 1;
                }
            }
        }
        Ok(reverted)
    }

    async fn revert_all_in_batch_pages(&self, corpus: &str) -> Result<u64, StoreError> {
        let mut pages = self.pages.lock().unwrap();
        let mut reverted = 0;
        if let Some(pages) = pages.get_mut(corpus) {
            for page in pages.iter_mut() {
                let status = TextIndexationStatus::from_store_value(&page.text_indexation_status);
                if matches!(status, TextIndexationStatus::InBatch(_)) {
                    page.text_indexation_status = "TO_INDEX".to_string();
                    reverted += 1;
                }
            }
        }
        Ok(reverted)
    }

    async fn pending_we_updates(&self, corpus: &str) -> Result<Vec<WebEntityUpdate>, StoreError> {
        let updates = self.we_updates.lock().unwrap();
        let mut pending: Vec<WebEntityUpdate> = updates
            .get(corpus)
            .map(|u| u.iter().filter(|u| u.index_status == "PENDING").cloned().collect())
            .unwrap_or_default();
        pending.sort_by_key(|u| u.timestamp_ms);
        Ok(pending)
    }

    async fn count_unindexed_jobs_before(
        &self,
        corpus: &str,
        webentity_id: &str,
        before_ts_ms: i64,
    ) -> Result<u64, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .get(corpus)
            .map(|jobs| {
                jobs.iter()
                    .filter(|j| j.webentity_id == webentity_id && j.scheduled_at_ms < before_ts_ms && !j.text_indexed)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn mark_we_update_finished(&self, corpus: &str, id: &str) -> Result<(), StoreError> {
        let mut updates = self.we_updates.lock().unwrap();
        if let Some(updates) = updates.get_mut(corpus) {
            for update in updates.iter_mut() {
                if update.id == id {
                    update.index_status = "FINISHED".to_string();
                }
            }
        }
        Ok(())
    }

    async fn completed_job_ids(&self, corpus: &str) -> Result<Vec<String>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let pages = self.pages.lock().unwrap();
        let Some(jobs) = jobs.get(corpus) else { return Ok(Vec::new()) };
        let empty = Vec::new();
        let pages = pages.get(corpus).unwrap_or(&empty);

        Ok(jobs
            .iter()
            .filter(|j| matches!(j.crawling_status.as_str(), "FINISHED" | "CANCELED" | "RETRIED") && !j.text_indexed)
            .filter(|j| {
                !pages.iter().any(|p| {
                    p.job_id.as_deref() == Some(j.crawljob_id.as_str())
                        && !p.forgotten
                        && !matches!(
                            TextIndexationStatus::from_store_value(&p.text_indexation_status),
                            TextIndexationStatus::DontIndex | TextIndexationStatus::Indexed | TextIndexationStatus::Error
                        )
                })
            })
            .map(|j| j.crawljob_id.clone())
            .collect())
    }

    async fn mark_jobs_text_indexed(&self, corpus: &str, job_ids: &[String]) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut count = 0;
        if let Some(jobs) = jobs.get_mut(corpus) {
            for job in jobs.iter_mut() {
                if job_ids.contains(&job.crawljob_id) {
                    job.text_indexed = true;
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

#[derive(Default)]
pub struct FakeSearchIndex {
    indices: Mutex<HashMap<String, Value>>,
    docs: Mutex<HashMap<String, HashMap<String, IndexedDocument>>>,
    fail_doc_ids: Mutex<HashSet<String>>,
}

impl FakeSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next bulk upsert report a per-document error for this id, for S2-style tests.
    pub fn fail_next_upsert_for(&self, id: &str) {
        self.fail_doc_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn doc(&self, index: &str, id: &str) -> Option<IndexedDocument> {
        self.docs.lock().unwrap().get(index)?.get(id).cloned()
    }

    pub fn doc_count(&self, index: &str) -> usize {
        self.docs.lock().unwrap().get(index).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SearchIndex for FakeSearchIndex {
    async fn wait_healthy(&self, _timeout_sec: u64) -> Result<(), SearchError> {
        Ok(())
    }

    async fn existing_indices(&self, pattern: &str) -> Result<HashSet<String>, SearchError> {
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .indices
            .lock()
            .unwrap()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_index(&self, name: &str, mapping: &Value) -> Result<(), SearchError> {
        self.indices.lock().unwrap().insert(name.to_string(), mapping.clone());
        self.docs.lock().unwrap().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn put_mapping(&self, name: &str, mapping: &Value) -> Result<(), SearchError> {
        self.indices.lock().unwrap().insert(name.to_string(), mapping.clone());
        Ok(())
    }

    async fn delete_indices(&self, names: &[String]) -> Result<(), SearchError> {
        let mut indices = self.indices.lock().unwrap();
        let mut docs = self.docs.lock().unwrap();
        for name in names {
            indices.remove(name);
            docs.remove(name);
        }
        Ok(())
    }

    async fn bulk_upsert(&self, index: &str, docs: &[IndexedDocument]) -> Result<BulkOutcome, SearchError> {
        let mut outcome = BulkOutcome::default();
        let mut store = self.docs.lock().unwrap();
        let index_docs = store.entry(index.to_string()).or_default();
        let mut failing = self.fail_doc_ids.lock().unwrap();
        for doc in docs {
            if failing.remove(&doc.id) {
                outcome.failed.push((doc.id.clone(), "mapper_parsing_exception : simulated failure".to_string()));
            } else {
                index_docs.insert(doc.id.clone(), doc.clone());
                outcome.indexed_ids.push(doc.id.clone());
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
        let mut store = self.docs.lock().unwrap();
        let mut updated = 0;
        if let Some(index_docs) = store.get_mut(index) {
            for doc in index_docs.values_mut() {
                let matches_we = doc.webentity_id == old_webentity;
                let matches_prefix = prefixes.is_empty() || prefixes.iter().any(|p| doc.prefixes.contains(p));
                if matches_we && matches_prefix {
                    doc.webentity_id = new_webentity.to_string();
                    doc.we_update_date = Some(chrono::Utc::now());
                    updated += 1;
                }
            }
        }
        Ok(UpdateByQueryOutcome { updated, took_ms: 1 })
    }

    async fn refresh(&self, _index: &str) -> Result<(), SearchError> {
        Ok(())
    }

    async fn max_index_dates(&self, indices: &[String]) -> Result<HashMap<String, i64>, SearchError> {
        let store = self.docs.lock().unwrap();
        let mut result = HashMap::new();
        for index in indices {
            let max = store
                .get(index)
                .and_then(|docs| docs.values().map(|d| d.index_date.timestamp_millis()).max())
                .unwrap_or(0);
            result.insert(index.clone(), max);
        }
        Ok(result)
    }
}

