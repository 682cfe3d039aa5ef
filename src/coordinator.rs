//! Coordinator (C6): the long-running control loop. Each iteration ("tick") discovers
//! corpora, provisions their search indices, forms batches under durable hand-off flags,
//! dispatches those batches to the worker pool, sweeps completed crawl jobs, interleaves
//! the web-entity updater, and paces itself with an idle-growing throttle.
//!
//! The coordinator is the sole agent allowed to transition a page `TO_INDEX -> IN_BATCH_*`
//! and the sole agent that reverts orphaned `IN_BATCH_*` pages on shutdown; workers never
//! touch either side of that transition.

use crate::extractors::{self, KNOWN_EXTRACTORS};
use crate::model::{batch_uuid, Corpus};
use crate::reclassify;
use crate::store::{DocumentStore, SearchIndex};
use crate::worker::{self, IndexationTask};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MIN_THROTTLE_SEC: f64 = 0.5;
const MAX_THROTTLE_SEC: f64 = 5.0;
const THROTTLE_STEP_SEC: f64 = 0.5;

struct CorpusState {
    extraction_methods: Vec<String>,
    default_extraction_method: String,
    nb_index_batches_since_last_update: u32,
}

pub struct Coordinator {
    store: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchIndex>,
    tasks: mpsc::Sender<IndexationTask>,
    batch_size: i64,
    update_we_freq: u32,
    mapping_template: Value,
    state: HashMap<String, CorpusState>,
    throttle: f64,
    first_tick: bool,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        search: Arc<dyn SearchIndex>,
        tasks: mpsc::Sender<IndexationTask>,
        batch_size: i64,
        update_we_freq: u32,
        mapping_template: Value,
    ) -> Self {
        Self {
            store,
            search,
            tasks,
            batch_size,
            update_we_freq,
            mapping_template,
            state: HashMap::new(),
            throttle: MIN_THROTTLE_SEC,
            first_tick: true,
        }
    }

    /// Runs ticks until `cancel` fires, then returns without dispatching any further batches.
    ///
    /// Deliberately does *not* perform the §5 revert sweep itself: `self` (and with it the
    /// task-channel sender) is dropped the moment this returns, but outstanding queued/in-flight
    /// tasks may still be live at that point. The caller owns the rest of the shutdown sequence
    /// (drain the queue, join workers, *then* call [`revert_in_flight_pages`]) so that a batch
    /// a worker is still finishing isn't reverted out from under it.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.tick().await {
                Ok(idle) => {
                    if idle {
                        self.throttle = (self.throttle + THROTTLE_STEP_SEC).min(MAX_THROTTLE_SEC);
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs_f64(self.throttle)) => {}
                            _ = cancel.cancelled() => break,
                        }
                    } else {
                        self.throttle = MIN_THROTTLE_SEC;
                    }
                }
                Err(error) => {
                    tracing::error!(%error, "tick failed, continuing to next tick");
                }
            }
        }
    }

    /// One iteration of §4.6. Returns `true` if the tick was idle (no pending pages or
    /// WE-updates across any corpus), used to drive the throttle.
    async fn tick(&mut self) -> anyhow::Result<bool> {
        let corpora = self.discover().await?;
        self.provision(&corpora).await?;

        let mut ordered = self.order_by_staleness(&corpora).await?;
        ordered.retain(|c| self.state.contains_key(&c.id));

        let mut total_pending = 0u64;
        let mut total_pending_we = 0u64;

        for corpus in &ordered {
            total_pending += self.form_batches(corpus).await?;
        }

        // Step 4e: paces WE-updates by loop iteration, so this runs for every surviving
        // corpus regardless of whether this tick produced a batch for it, and *before* the
        // reclassification step below so a freshly-due corpus is serviced this same tick
        // rather than one tick late.
        for corpus in &ordered {
            if let Some(state) = self.state.get_mut(&corpus.id) {
                state.nb_index_batches_since_last_update += 1;
            }
        }

        self.sweep_completed_jobs(&ordered).await?;

        for corpus in &ordered {
            let pending_we = self.store.count_pending_we_updates(&corpus.id).await?;
            total_pending_we += pending_we;
            self.maybe_reclassify(&corpus.id, pending_we).await?;
        }

        self.first_tick = false;
        Ok(total_pending == 0 && total_pending_we == 0)
    }

    /// Step 1: discover corpora opted into text indexing and resolve their extractor config.
    async fn discover(&mut self) -> anyhow::Result<Vec<Corpus>> {
        let corpora = self.store.list_indexed_corpora().await?;

        let mut next_state = HashMap::with_capacity(corpora.len());
        for corpus in &corpora {
            let configured_methods = &corpus.extraction_methods;
            let configured_default = corpus
                .default_extraction_method
                .clone()
                .unwrap_or_else(|| KNOWN_EXTRACTORS[0].to_string());
            let (extraction_methods, default_extraction_method) =
                extractors::resolve_extraction_methods(&corpus.id, configured_methods, &configured_default);

            let carried_over = self
                .state
                .get(&corpus.id)
                .map(|s| s.nb_index_batches_since_last_update)
                .unwrap_or(0);

            next_state.insert(
                corpus.id.clone(),
                CorpusState {
                    extraction_methods,
                    default_extraction_method,
                    nb_index_batches_since_last_update: carried_over,
                },
            );
        }
        self.state = next_state;
        Ok(corpora)
    }

    /// Step 2: create/update indices for surviving corpora, delete orphaned `hyphe_*` indices.
    async fn provision(&mut self, corpora: &[Corpus]) -> anyhow::Result<()> {
        let existing = self.search.existing_indices("hyphe_*").await?;
        let current_index_names: std::collections::HashSet<String> =
            corpora.iter().map(|c| c.index_name()).collect();

        for corpus in corpora {
            let Some(state) = self.state.get(&corpus.id) else { continue };
            let name = corpus.index_name();
            let mapping = self.mapping_for(&state.default_extraction_method);
            if !existing.contains(&name) {
                self.search.create_index(&name, &mapping).await?;
                tracing::info!(corpus = %corpus.id, index = %name, "created index");
            } else if self.first_tick {
                self.search.put_mapping(&name, &mapping).await?;
                tracing::info!(corpus = %corpus.id, index = %name, "updated mapping");
            }
        }

        let orphaned: Vec<String> = existing
            .iter()
            .filter(|name| !current_index_names.contains(*name) && name.starts_with("hyphe_"))
            .cloned()
            .collect();
        if !orphaned.is_empty() {
            tracing::info!(indices = ?orphaned, "deleting indices for removed corpora");
            self.search.delete_indices(&orphaned).await?;
        }

        Ok(())
    }

    /// Clones the mapping template and rewrites `text.path` to the resolved default
    /// extractor's field name, per §6. Cloning (rather than mutating the shared template in
    /// place) keeps provisioning order-independent across corpora, see DESIGN.md.
    fn mapping_for(&self, default_extraction_method: &str) -> Value {
        let mut mapping = self.mapping_template.clone();
        if let Some(path) = mapping.pointer_mut("/mappings/properties/text/path") {
            *path = Value::String(default_extraction_method.to_string());
        }
        mapping
    }

    /// Step 3: order corpora ascending by their index's max `indexDate` (missing = 0).
    async fn order_by_staleness(&self, corpora: &[Corpus]) -> anyhow::Result<Vec<Corpus>> {
        let names: Vec<String> = corpora.iter().map(|c| c.index_name()).collect();
        let max_dates = self.search.max_index_dates(&names).await?;

        let mut ordered: Vec<Corpus> = corpora.to_vec();
        ordered.sort_by_key(|c| max_dates.get(&c.index_name()).copied().unwrap_or(0));
        Ok(ordered)
    }

    /// Step 4: form and dispatch as many batches as the task channel has room for.
    async fn form_batches(&mut self, corpus: &Corpus) -> anyhow::Result<u64> {
        let pending = self.store.count_pending_pages(&corpus.id).await?;
        if pending == 0 || self.tasks.capacity() == 0 {
            return Ok(pending);
        }

        let ids = self.store.next_batch_page_ids(&corpus.id, self.batch_size).await?;
        if ids.is_empty() {
            return Ok(pending);
        }

        let uuid = batch_uuid(&ids);
        self.store.mark_pages_in_batch(&corpus.id, &ids, &uuid).await?;

        let extraction_methods = self
            .state
            .get(&corpus.id)
            .map(|s| s.extraction_methods.clone())
            .unwrap_or_default();

        let task = IndexationTask {
            corpus: corpus.id.clone(),
            batch_uuid: uuid.clone(),
            extraction_methods,
        };

        match self.tasks.try_send(task) {
            Ok(()) => {
                tracing::info!(corpus = %corpus.id, batch_uuid = %uuid, pages = ids.len(), "batch dispatched");
            }
            Err(_) => {
                // The channel has capacity checked above but the precondition can in
                // principle race with another sender; revert rather than lose the lease.
                tracing::warn!(corpus = %corpus.id, batch_uuid = %uuid, "task channel unexpectedly full, reverting batch");
                self.store.revert_batch_to_to_index(&corpus.id, &uuid).await?;
            }
        }

        Ok(pending)
    }

    /// Step 5: mark crawl jobs complete once every non-forgotten page they own is terminal.
    async fn sweep_completed_jobs(&self, corpora: &[Corpus]) -> anyhow::Result<()> {
        for corpus in corpora {
            let completed = self.store.completed_job_ids(&corpus.id).await?;
            if completed.is_empty() {
                continue;
            }
            let modified = self.store.mark_jobs_text_indexed(&corpus.id, &completed).await?;
            tracing::info!(corpus = %corpus.id, jobs = modified, "crawl jobs marked text_indexed");
            self.search.refresh(&corpus.index_name()).await?;
        }
        Ok(())
    }

    /// Step 6: run C5 inline once a corpus has accumulated enough ticks since its last run.
    async fn maybe_reclassify(&mut self, corpus_id: &str, pending_we: u64) -> anyhow::Result<()> {
        if pending_we == 0 {
            return Ok(());
        }
        let due = self
            .state
            .get(corpus_id)
            .map(|s| s.nb_index_batches_since_last_update > self.update_we_freq)
            .unwrap_or(false);
        if !due {
            return Ok(());
        }

        reclassify::apply_pending_updates(corpus_id, self.store.as_ref(), self.search.as_ref()).await?;
        if let Some(state) = self.state.get_mut(corpus_id) {
            state.nb_index_batches_since_last_update = 0;
        }
        Ok(())
    }

}

/// Parses the on-disk index mapping template (`index_mappings.json`), per §6.
pub fn load_mapping_template(raw: &str) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

/// §5 step 1: pull any tasks the coordinator already enqueued but no worker has picked up yet
/// out of the shared channel and discard them, without ever handing them to a worker. Their
/// pages are still carrying `IN_BATCH_*` in the store, so [`revert_in_flight_pages`] reverts
/// them below; this just stops a worker from wastefully starting on a batch the coordinator
/// has already stopped scheduling around.
pub async fn drain_pending_tasks(tasks: &worker::SharedTaskReceiver) {
    let mut rx = tasks.lock().await;
    let mut drained = 0;
    while let Ok(task) = rx.try_recv() {
        tracing::info!(corpus = %task.corpus, batch_uuid = %task.batch_uuid, "draining queued batch without dispatching");
        drained += 1;
    }
    if drained > 0 {
        tracing::info!(drained, "drained queued batches ahead of worker join");
    }
}

/// §5 step 4: scan every corpus and reset non-terminal `IN_BATCH_*` pages back to `TO_INDEX`
/// so a restart reindexes them rather than leaving them leased forever.
///
/// Callers must run this only *after* every worker has been joined (§5 steps 2-3) — reverting
/// while a worker is still finishing its current batch would race the worker's own
/// `mark_page_indexed`/`mark_page_error` calls for that same batch.
pub async fn revert_in_flight_pages(store: &dyn DocumentStore) {
    tracing::info!("reverting in-flight batches");
    let corpora = match store.list_indexed_corpora().await {
        Ok(corpora) => corpora,
        Err(error) => {
            tracing::error!(%error, "failed to list corpora during shutdown sweep");
            return;
        }
    };
    for corpus in &corpora {
        let corpus_id = corpus.id.as_str();
        match store.revert_all_in_batch_pages(corpus_id).await {
            Ok(reverted) if reverted > 0 => {
                tracing::info!(corpus = %corpus_id, reverted, "reverted in-flight pages to TO_INDEX");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(corpus = %corpus_id, %error, "failed to revert in-flight pages on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Corpus, PageRecord};
    use crate::store::{FakeDocumentStore, FakeSearchIndex};
    use crate::worker::SharedTaskReceiver;

    fn template() -> Value {
        serde_json::json!({
            "mappings": {
                "properties": {
                    "text": { "type": "alias", "path": "textify" }
                }
            }
        })
    }

    fn page(id: &str, url: &str, html: &str, ts: i64) -> PageRecord {
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
            timestamp_ms: ts,
            encoding: "UTF-8".to_string(),
            body: encoder.finish().unwrap(),
            webentity_when_crawled: "we1".to_string(),
            forgotten: false,
            job_id: None,
            text_indexation_status: "TO_INDEX".to_string(),
            text_indexation_error: None,
        }
    }

    async fn drain_one(receiver: &SharedTaskReceiver) -> IndexationTask {
        receiver.lock().await.recv().await.expect("expected a dispatched task")
    }

    #[tokio::test]
    async fn s1_happy_batch_provisions_index_and_dispatches_one_batch() {
        let store = Arc::new(FakeDocumentStore::new());
        let search = Arc::new(FakeSearchIndex::new());
        store.seed_corpus(Corpus {
            id: "c1".to_string(),
            index_text_content: true,
            extraction_methods: vec!["textify".to_string()],
            default_extraction_method: Some("textify".to_string()),
        });
        store.seed_page("c1", page("id_a", "a", "<html><body>hello</body></html>", 1));
        store.seed_page("c1", page("id_b", "b", "<html><body>world</body></html>", 2));
        store.seed_page("c1", page("id_c", "c", "<html><body>!</body></html>", 3));

        let (tx, rx) = mpsc::channel(4);
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
        let mut coordinator = Coordinator::new(store.clone(), search.clone(), tx, 10, 10, template());

        let idle = coordinator.tick().await.unwrap();
        assert!(!idle);

        let task = drain_one(&rx).await;
        assert_eq!(task.corpus, "c1");
        assert_eq!(task.batch_uuid, crate::model::batch_uuid(&["id_a".to_string(), "id_b".to_string(), "id_c".to_string()]));

        assert!(search.doc_count("hyphe_c1") == 0, "coordinator itself never writes documents");
        let existing = search.existing_indices("hyphe_*").await.unwrap();
        assert!(existing.contains("hyphe_c1"));
    }

    #[tokio::test]
    async fn idle_tick_reports_idle_when_nothing_pending() {
        let store = Arc::new(FakeDocumentStore::new());
        let search = Arc::new(FakeSearchIndex::new());
        store.seed_corpus(Corpus {
            id: "c1".to_string(),
            index_text_content: true,
            extraction_methods: vec!["textify".to_string()],
            default_extraction_method: Some("textify".to_string()),
        });

        let (tx, _rx) = mpsc::channel(4);
        let mut coordinator = Coordinator::new(store, search, tx, 10, 10, template());

        let idle = coordinator.tick().await.unwrap();
        assert!(idle);
    }

    #[tokio::test]
    async fn s6_corpus_removal_deletes_its_index_and_drops_state() {
        let store = Arc::new(FakeDocumentStore::new());
        let search = Arc::new(FakeSearchIndex::new());
        store.seed_corpus(Corpus {
            id: "c1".to_string(),
            index_text_content: true,
            extraction_methods: vec!["textify".to_string()],
            default_extraction_method: Some("textify".to_string()),
        });

        let (tx, _rx) = mpsc::channel(4);
        let mut coordinator = Coordinator::new(store.clone(), search.clone(), tx, 10, 10, template());
        coordinator.tick().await.unwrap();
        assert!(search.existing_indices("hyphe_*").await.unwrap().contains("hyphe_c1"));

        store.remove_corpus("c1");
        coordinator.tick().await.unwrap();

        let remaining = search.existing_indices("hyphe_*").await.unwrap();
        assert!(!remaining.contains("hyphe_c1"));
        assert!(!coordinator.state.contains_key("c1"));
    }

    #[tokio::test]
    async fn shutdown_reverts_in_flight_pages_for_every_known_corpus() {
        let store = Arc::new(FakeDocumentStore::new());
        store.seed_corpus(Corpus {
            id: "c1".to_string(),
            index_text_content: true,
            extraction_methods: vec!["textify".to_string()],
            default_extraction_method: Some("textify".to_string()),
        });
        let mut p = page("id_a", "a", "<html><body>hi</body></html>", 1);
        p.text_indexation_status = "IN_BATCH_deadbeef".to_string();
        store.seed_page("c1", p);

        revert_in_flight_pages(store.as_ref()).await;

        let pages = store.pages_snapshot("c1");
        assert_eq!(pages[0].text_indexation_status, "TO_INDEX");
    }

    #[tokio::test]
    async fn drain_pending_tasks_discards_queued_items_without_dispatching() {
        let (tx, rx) = mpsc::channel(4);
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
        tx.try_send(IndexationTask {
            corpus: "c1".to_string(),
            batch_uuid: "deadbeef".to_string(),
            extraction_methods: vec!["textify".to_string()],
        })
        .unwrap();

        drain_pending_tasks(&rx).await;

        assert!(rx.lock().await.try_recv().is_err(), "queue should be empty after draining");
    }

    #[tokio::test]
    async fn reclassification_runs_once_threshold_exceeded() {
        let store = Arc::new(FakeDocumentStore::new());
        let search = Arc::new(FakeSearchIndex::new());
        store.seed_corpus(Corpus {
            id: "c1".to_string(),
            index_text_content: true,
            extraction_methods: vec!["textify".to_string()],
            default_extraction_method: Some("textify".to_string()),
        });
        search.create_index("hyphe_c1", &serde_json::json!({})).await.unwrap();
        search
            .bulk_upsert(
                "hyphe_c1",
                &[crate::model::IndexedDocument {
                    id: "d1".to_string(),
                    url: "http://example.com/d1".to_string(),
                    lru: "s:http|h:com|h:example|".to_string(),
                    prefixes: vec![],
                    http_status: 200,
                    crawl_date: chrono::Utc::now(),
                    webentity_id: "we_old".to_string(),
                    title: None,
                    textify: None,
                    dragnet: None,
                    trafilatura: None,
                    trafilatura_date: None,
                    trafilatura_author: None,
                    trafilatura_comments: None,
                    index_date: chrono::Utc::now(),
                    we_update_date: None,
                }],
            )
            .await
            .unwrap();
        store.seed_we_update(
            "c1",
            crate::model::WebEntityUpdate {
                id: "u1".to_string(),
                timestamp_ms: 10,
                old_webentity: "we_old".to_string(),
                new_webentity: "we_new".to_string(),
                prefixes: vec![],
                index_status: "PENDING".to_string(),
            },
        );

        let (tx, _rx) = mpsc::channel(4);
        let mut coordinator = Coordinator::new(store.clone(), search.clone(), tx, 10, 1, template());

        // Tick 1 increments the counter to 1 (not yet past UPDATE_WE_FREQ=1), so the update
        // stays pending.
        coordinator.tick().await.unwrap();
        assert_eq!(store.pending_we_updates("c1").await.unwrap().len(), 1);

        // Tick 2 increments the counter to 2, past the threshold, so C5 runs inline this
        // same tick (the increment happens before reclassification within a tick).
        coordinator.tick().await.unwrap();
        assert!(store.pending_we_updates("c1").await.unwrap().is_empty());
        assert_eq!(search.doc("hyphe_c1", "d1").unwrap().webentity_id, "we_new");
    }
}
