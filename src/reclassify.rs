//! Web-entity updater (C5): applies pending reclassification events in timestamp order,
//! head-of-line blocked by any crawl job that hasn't finished indexing yet.

use crate::error::WebEntityUpdateError;
use crate::model::index_name;
use crate::store::{DocumentStore, SearchIndex};

/// Runs C5 for a single corpus, applying as many leading pending updates as are safe to
/// apply this round. Stops at the first update still blocked by an in-flight crawl job,
/// per invariant 4 and property P5 — later, possibly-independent updates do not overtake it.
pub async fn apply_pending_updates(
    corpus: &str,
    store: &dyn DocumentStore,
    search: &dyn SearchIndex,
) -> Result<(), WebEntityUpdateError> {
    let updates = store.pending_we_updates(corpus).await?;
    tracing::info!(corpus, count = updates.len(), "WE updates waiting");

    let index = index_name(corpus);
    for update in updates {
        let nb_unindexed_jobs = store
            .count_unindexed_jobs_before(corpus, &update.old_webentity, update.timestamp_ms)
            .await?;
        if nb_unindexed_jobs > 0 {
            tracing::info!(corpus, update_id = %update.id, "update WE blocked by job stopping updates");
            break;
        }

        tracing::info!(
            corpus,
            old_webentity = %update.old_webentity,
            new_webentity = %update.new_webentity,
            "updating index WE_is"
        );

        match search
            .update_by_query(&index, &update.old_webentity, &update.new_webentity, &update.prefixes)
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    corpus,
                    update_id = %update.id,
                    updated = outcome.updated,
                    took_ms = outcome.took_ms,
                    "pages updated"
                );
                store.mark_we_update_finished(corpus, &update.id).await?;
                // sync write operations so subsequent updates in this same round observe it.
                search.refresh(&index).await?;
            }
            Err(error) => {
                tracing::error!(corpus, update_id = %update.id, %error, "update WE failed");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CrawlJob, IndexedDocument, WebEntityUpdate};
    use crate::store::{FakeDocumentStore, FakeSearchIndex};
    use chrono::Utc;

    fn indexed_doc(id: &str, webentity_id: &str, prefixes: Vec<String>) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            url: format!("http://example.com/{id}"),
            lru: "s:http|h:com|h:example|".to_string(),
            prefixes,
            http_status: 200,
            crawl_date: Utc::now(),
            webentity_id: webentity_id.to_string(),
            title: None,
            textify: None,
            dragnet: None,
            trafilatura: None,
            trafilatura_date: None,
            trafilatura_author: None,
            trafilatura_comments: None,
            index_date: Utc::now(),
            we_update_date: None,
        }
    }

    #[tokio::test]
    async fn s5_head_of_line_block_prevents_both_updates() {
        let store = FakeDocumentStore::new();
        let search = FakeSearchIndex::new();
        search.create_index("hyphe_c1", &serde_json::json!({})).await.unwrap();
        search
            .bulk_upsert("hyphe_c1", &[indexed_doc("d1", "we_old", vec!["a|".to_string()])])
            .await
            .unwrap();

        store.seed_job(
            "c1",
            CrawlJob {
                crawljob_id: "job1".to_string(),
                webentity_id: "we_old".to_string(),
                scheduled_at_ms: 5,
                crawling_status: "RUNNING".to_string(),
                text_indexed: false,
            },
        );
        store.seed_we_update(
            "c1",
            WebEntityUpdate {
                id: "u1".to_string(),
                timestamp_ms: 10,
                old_webentity: "we_old".to_string(),
                new_webentity: "we_new".to_string(),
                prefixes: vec![],
                index_status: "PENDING".to_string(),
            },
        );
        store.seed_we_update(
            "c1",
            WebEntityUpdate {
                id: "u2".to_string(),
                timestamp_ms: 20,
                old_webentity: "we_other".to_string(),
                new_webentity: "we_new2".to_string(),
                prefixes: vec![],
                index_status: "PENDING".to_string(),
            },
        );

        apply_pending_updates("c1", &store, &search).await.unwrap();

        let pending = store.pending_we_updates("c1").await.unwrap();
        assert_eq!(pending.len(), 2, "neither update should be applied this round");
        assert_eq!(search.doc("hyphe_c1", "d1").unwrap().webentity_id, "we_old");
    }

    #[tokio::test]
    async fn unblocked_update_applies_and_finishes() {
        let store = FakeDocumentStore::new();
        let search = FakeSearchIndex::new();
        search.create_index("hyphe_c1", &serde_json::json!({})).await.unwrap();
        search
            .bulk_upsert("hyphe_c1", &[indexed_doc("d1", "we_old", vec![])])
            .await
            .unwrap();

        store.seed_we_update(
            "c1",
            WebEntityUpdate {
                id: "u1".to_string(),
                timestamp_ms: 10,
                old_webentity: "we_old".to_string(),
                new_webentity: "we_new".to_string(),
                prefixes: vec![],
                index_status: "PENDING".to_string(),
            },
        );

        apply_pending_updates("c1", &store, &search).await.unwrap();

        assert!(store.pending_we_updates("c1").await.unwrap().is_empty());
        assert_eq!(search.doc("hyphe_c1", "d1").unwrap().webentity_id, "we_new");
    }
}
