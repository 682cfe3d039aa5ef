//! Batch worker (C4): consumes indexation tasks from the bounded channel, runs the page
//! transformer per page, issues one bulk upsert, and reconciles outcomes back to the store.
//!
//! Workers never install a signal handler and never watch a cancellation token tied to the
//! process signal — they stop only when the task channel closes, mirroring a worker process
//! that ignores `SIGINT`/`SIGTERM` and leaves lifecycle entirely to the coordinator.

use crate::error::BatchError;
use crate::model::index_name;
use crate::store::{DocumentStore, SearchIndex};
use crate::transform::transform_page;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct IndexationTask {
    pub corpus: String,
    pub batch_uuid: String,
    pub extraction_methods: Vec<String>,
}

/// Multiple workers pull from the same bounded channel; `tokio::sync::mpsc::Receiver` has a
/// single owner, so the receiving end is shared behind a mutex, matching a pool of OS
/// processes all calling `Queue.get` on the same underlying queue.
pub type SharedTaskReceiver = Arc<Mutex<mpsc::Receiver<IndexationTask>>>;

pub async fn run_worker(
    id: usize,
    tasks: SharedTaskReceiver,
    store: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchIndex>,
) {
    let span = tracing::info_span!("worker", worker = format!("worker-{id}"));
    async move {
        loop {
            let task = { tasks.lock().await.recv().await };
            let Some(task) = task else { break };
            if let Err(error) = process_task(&task, store.as_ref(), search.as_ref()).await {
                tracing::error!(corpus = %task.corpus, batch_uuid = %task.batch_uuid, %error, "batch failed, reverting to TO_INDEX");
                if let Err(revert_error) = store.revert_batch_to_to_index(&task.corpus, &task.batch_uuid).await {
                    tracing::error!(corpus = %task.corpus, batch_uuid = %task.batch_uuid, error = %revert_error, "failed to revert batch after error");
                }
            }
        }
        tracing::info!("worker stopping");
    }
    .instrument(span)
    .await
}

async fn process_task(
    task: &IndexationTask,
    store: &dyn DocumentStore,
    search: &dyn SearchIndex,
) -> Result<(), BatchError> {
    let pages = store.pages_in_batch(&task.corpus, &task.batch_uuid).await?;
    tracing::info!(corpus = %task.corpus, batch_uuid = %task.batch_uuid, pages = pages.len(), "working on batch");

    let mut docs = Vec::with_capacity(pages.len());
    for page in &pages {
        match transform_page(page, &task.extraction_methods) {
            Ok(doc) => docs.push(doc),
            Err(error) => {
                tracing::warn!(corpus = %task.corpus, url = %page.url, %error, "page rejected, marking ERROR");
                store
                    .mark_page_error(&task.corpus, &page.url, &task.batch_uuid, &error.as_store_message())
                    .await?;
            }
        }
    }

    if docs.is_empty() {
        return Ok(());
    }

    tracing::info!(corpus = %task.corpus, batch_uuid = %task.batch_uuid, count = docs.len(), "pages to index in batch");

    let index = index_name(&task.corpus);
    let outcome = search.bulk_upsert(&index, &docs).await?;

    let url_by_id: HashMap<&str, &str> = docs.iter().map(|d| (d.id.as_str(), d.url.as_str())).collect();

    for id in &outcome.indexed_ids {
        if let Some(url) = url_by_id.get(id.as_str()) {
            store.mark_page_indexed(&task.corpus, url, &task.batch_uuid).await?;
        }
    }
    if !outcome.failed.is_empty() {
        tracing::warn!(corpus = %task.corpus, batch_uuid = %task.batch_uuid, count = outcome.failed.len(), "docs were not indexed in the batch");
    }
    for (id, reason) in &outcome.failed {
        if let Some(url) = url_by_id.get(id.as_str()) {
            store.mark_page_error(&task.corpus, url, &task.batch_uuid, reason).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CrawlJob, PageRecord};
    use crate::store::{FakeDocumentStore, FakeSearchIndex};

    fn page(id: &str, url: &str, batch_uuid: &str, html: &str) -> PageRecord {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(html.as_bytes()).unwrap();
        PageRecord {
            id: id.to_string(),
            url: url.to_string(),
            lru: "s:http|h:com|h:example|".to_string(),
            status: 200,
            timestamp_ms: 1,
            encoding: "UTF-8".to_string(),
            body: encoder.finish().unwrap(),
            webentity_when_crawled: "we1".to_string(),
            forgotten: false,
            job_id: None,
            text_indexation_status: format!("IN_BATCH_{batch_uuid}"),
            text_indexation_error: None,
        }
    }

    #[tokio::test]
    async fn s1_happy_batch_indexes_all_pages() {
        let store = Arc::new(FakeDocumentStore::new());
        let search = Arc::new(FakeSearchIndex::new());
        store.seed_corpus(crate::model::Corpus {
            id: "c1".to_string(),
            index_text_content: true,
            extraction_methods: vec!["textify".to_string()],
            default_extraction_method: Some("textify".to_string()),
        });
        search.create_index("hyphe_c1", &serde_json::json!({})).await.unwrap();

        let batch_uuid = "batch1";
        store.seed_page("c1", page("id_a", "a", batch_uuid, "<html><body>hello</body></html>"));
        store.seed_page("c1", page("id_b", "b", batch_uuid, "<html><body>world</body></html>"));
        store.seed_page("c1", page("id_c", "c", batch_uuid, "<html><body>!</body></html>"));

        let task = IndexationTask {
            corpus: "c1".to_string(),
            batch_uuid: batch_uuid.to_string(),
            extraction_methods: vec!["textify".to_string()],
        };
        process_task(&task, store.as_ref(), search.as_ref()).await.unwrap();

        for url in ["a", "b", "c"] {
            let pages = store.pages_snapshot("c1");
            let page = pages.iter().find(|p| p.url == url).unwrap();
            assert_eq!(page.text_indexation_status, "INDEXED");
        }
        assert_eq!(search.doc_count("hyphe_c1"), 3);
        assert!(search.doc("hyphe_c1", &crate::model::document_id("a")).is_some());
    }

    #[tokio::test]
    async fn s2_partial_failure_marks_only_failing_doc_as_error() {
        let store = Arc::new(FakeDocumentStore::new());
        let search = Arc::new(FakeSearchIndex::new());
        search.create_index("hyphe_c1", &serde_json::json!({})).await.unwrap();

        let batch_uuid = "batch2";
        for (id, url) in [("id_a", "a"), ("id_b", "b"), ("id_c", "c"), ("id_d", "d")] {
            store.seed_page("c1", page(id, url, batch_uuid, "<html><body>content</body></html>"));
        }
        search.fail_next_upsert_for(&crate::model::document_id("b"));

        let task = IndexationTask {
            corpus: "c1".to_string(),
            batch_uuid: batch_uuid.to_string(),
            extraction_methods: vec!["textify".to_string()],
        };
        process_task(&task, store.as_ref(), search.as_ref()).await.unwrap();

        let pages = store.pages_snapshot("c1");
        let indexed = pages.iter().filter(|p| p.text_indexation_status == "INDEXED").count();
        let errored = pages.iter().filter(|p| p.text_indexation_status == "ERROR").count();
        assert_eq!(indexed, 3);
        assert_eq!(errored, 1);
        assert_eq!(
            pages.iter().find(|p| p.url == "b").unwrap().text_indexation_error.as_deref(),
            Some("mapper_parsing_exception : simulated failure")
        );
    }

    #[tokio::test]
    async fn job_becomes_complete_once_its_only_page_is_terminal() {
        let store = Arc::new(FakeDocumentStore::new());
        let mut p = page("id_a", "a", "batch3", "<html><body>hi</body></html>");
        p.job_id = Some("job1".to_string());
        p.text_indexation_status = "INDEXED".to_string();
        store.seed_page("c1", p);
        store.seed_job(
            "c1",
            CrawlJob {
                crawljob_id: "job1".to_string(),
                webentity_id: "we1".to_string(),
                scheduled_at_ms: 1,
                crawling_status: "FINISHED".to_string(),
                text_indexed: false,
            },
        );

        let completed = store.completed_job_ids("c1").await.unwrap();
        assert_eq!(completed, vec!["job1".to_string()]);
        let modified = store.mark_jobs_text_indexed("c1", &completed).await.unwrap();
        assert_eq!(modified, 1);
    }
}
