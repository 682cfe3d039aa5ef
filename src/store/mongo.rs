//! Document-store adapter backed by the official `mongodb` driver.

use super::DocumentStore;
use crate::error::StoreError;
use crate::model::{Corpus, PageRecord, WebEntityUpdate};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::Client;

pub struct MongoDocumentStore {
    client: Client,
}

impl MongoDocumentStore {
    pub async fn connect(host: &str, port: u16) -> Result<Self, StoreError> {
        let uri = format!("mongodb://{host}:{port}");
        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        options.app_name = Some("hyphe-text-indexer".to_string());
        let client = Client::with_options(options).map_err(|e| StoreError::Connection(e.to_string()))?;

        // Fail fast if the server is unreachable, rather than discovering it lazily later.
        client
            .database("hyphe")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { client })
    }

    fn pages(&self, corpus: &str) -> mongodb::Collection<Document> {
        self.client
            .database(&format!("hyphe_{corpus}"))
            .collection("pages")
    }

    fn jobs(&self, corpus: &str) -> mongodb::Collection<Document> {
        self.client
            .database(&format!("hyphe_{corpus}"))
            .collection("jobs")
    }

    fn we_updates(&self, corpus: &str) -> mongodb::Collection<Document> {
        self.client
            .database(&format!("hyphe_{corpus}"))
            .collection("WEupdates")
    }

    fn global_corpus(&self) -> mongodb::Collection<Document> {
        self.client.database("hyphe").collection("corpus")
    }
}

fn page_from_doc(doc: Document) -> Option<PageRecord> {
    Some(PageRecord {
        id: doc.get_str("_id").ok()?.to_string(),
        url: doc.get_str("url").ok()?.to_string(),
        lru: doc.get_str("lru").ok()?.to_string(),
        status: doc.get_i32("status").unwrap_or(0),
        timestamp_ms: doc.get_i64("timestamp").unwrap_or(0),
        encoding: doc.get_str("encoding").unwrap_or("").to_string(),
        body: doc
            .get_binary_generic("body")
            .map(|b| b.to_vec())
            .unwrap_or_default(),
        webentity_when_crawled: doc.get_str("webentity_when_crawled").unwrap_or("").to_string(),
        forgotten: doc.get_bool("forgotten").unwrap_or(false),
        job_id: doc.get_str("_job").ok().map(|s| s.to_string()),
        text_indexation_status: doc.get_str("text_indexation_status").unwrap_or("TO_INDEX").to_string(),
        text_indexation_error: doc.get_str("text_indexation_error").ok().map(|s| s.to_string()),
    })
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn list_indexed_corpora(&self) -> Result<Vec<Corpus>, StoreError> {
        let filter = doc! { "options.indexTextContent": true };
        let mut cursor = self
            .global_corpus()
            .find(filter)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut corpora = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            let Some(id) = doc.get_str("_id").ok().map(|s| s.to_string()) else {
                continue;
            };
            let options = doc.get_document("options").ok();
            let extraction_methods = options
                .and_then(|o| o.get_array("text_indexation_extraction_methods").ok())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|b| b.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            let default_extraction_method = options
                .and_then(|o| o.get_str("text_indexation_default_extraction_method").ok())
                .map(|s| s.to_string());

            corpora.push(Corpus {
                id,
                index_text_content: true,
                extraction_methods,
                default_extraction_method,
            });
        }
        Ok(corpora)
    }

    async fn count_pending_pages(&self, corpus: &str) -> Result<u64, StoreError> {
        let filter = doc! { "text_indexation_status": "TO_INDEX", "forgotten": false };
        self.pages(corpus)
            .count_documents(filter)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn count_pending_we_updates(&self, corpus: &str) -> Result<u64, StoreError> {
        let filter = doc! { "index_status": "PENDING" };
        self.we_updates(corpus)
            .count_documents(filter)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn next_batch_page_ids(&self, corpus: &str, batch_size: i64) -> Result<Vec<String>, StoreError> {
        let filter = doc! { "text_indexation_status": "TO_INDEX", "forgotten": false };
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": 1 })
            .limit(batch_size)
            .projection(doc! { "_id": 1 })
            .build();
        let mut cursor = self
            .pages(corpus)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut ids = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            if let Ok(id) = doc.get_str("_id") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    async fn mark_pages_in_batch(&self, corpus: &str, ids: &[String], batch_uuid: &str) -> Result<(), StoreError> {
        let filter = doc! { "_id": { "$in": ids } };
        let update = doc! { "$set": { "text_indexation_status": format!("IN_BATCH_{batch_uuid}") } };
        self.pages(corpus)
            .update_many(filter, update)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn pages_in_batch(&self, corpus: &str, batch_uuid: &str) -> Result<Vec<PageRecord>, StoreError> {
        let filter = doc! { "text_indexation_status": format!("IN_BATCH_{batch_uuid}") };
        let mut cursor = self
            .pages(corpus)
            .find(filter)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut pages = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            if let Some(page) = page_from_doc(doc) {
                pages.push(page);
            }
        }
        Ok(pages)
    }

    async fn mark_page_indexed(&self, corpus: &str, url: &str, batch_uuid: &str) -> Result<(), StoreError> {
        let filter = doc! { "url": url, "text_indexation_status": format!("IN_BATCH_{batch_uuid}") };
        let update = doc! { "$set": { "text_indexation_status": "INDEXED" } };
        self.pages(corpus)
            .update_one(filter, update)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn mark_page_error(
        &self,
        corpus: &str,
        url: &str,
        batch_uuid: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let filter = doc! { "url": url, "text_indexation_status": format!("IN_BATCH_{batch_uuid}") };
        let update = doc! { "$set": { "text_indexation_status": "ERROR", "text_indexation_error": reason } };
        self.pages(corpus)
            .update_one(filter, update)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn revert_batch_to_to_index(&self, corpus: &str, batch_uuid: &str) -> Result<u64, StoreError> {
        let filter = doc! { "text_indexation_status": format!("IN_BATCH_{batch_uuid}") };
        let update = doc! { "$set": { "text_indexation_status": "TO_INDEX" } };
        let result = self
            .pages(corpus)
            .update_many(filter, update)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.modified_count)
    }

    async fn revert_all_in_batch_pages(&self, corpus: &str) -> Result<u64, StoreError> {
        let filter = doc! { "text_indexation_status": { "$nin": ["DONT_INDEX", "INDEXED", "ERROR", "TO_INDEX"] } };
        let update = doc! { "$set": { "text_indexation_status": "TO_INDEX" } };
        let result = self
            .pages(corpus)
            .update_many(filter, update)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.modified_count)
    }

    async fn pending_we_updates(&self, corpus: &str) -> Result<Vec<WebEntityUpdate>, StoreError> {
        let filter = doc! { "index_status": "PENDING" };
        let options = FindOptions::builder().sort(doc! { "timestamp": 1 }).build();
        let mut cursor = self
            .we_updates(corpus)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut updates = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            let Some(id) = doc.get_str("_id").ok().map(|s| s.to_string()) else {
                continue;
            };
            let prefixes = doc
                .get_array("prefixes")
                .map(|arr| arr.iter().filter_map(|b| b.as_str().map(|s| s.to_string())).collect())
                .unwrap_or_default();
            updates.push(WebEntityUpdate {
                id,
                timestamp_ms: doc.get_i64("timestamp").unwrap_or(0),
                old_webentity: doc.get_str("old_webentity").unwrap_or("").to_string(),
                new_webentity: doc.get_str("new_webentity").unwrap_or("").to_string(),
                prefixes,
                index_status: doc.get_str("index_status").unwrap_or("PENDING").to_string(),
            });
        }
        Ok(updates)
    }

    async fn count_unindexed_jobs_before(
        &self,
        corpus: &str,
        webentity_id: &str,
        before_ts_ms: i64,
    ) -> Result<u64, StoreError> {
        let filter = doc! {
            "webentity_id": webentity_id,
            "text_indexed": { "$exists": false },
            "scheduled_at": { "$lt": before_ts_ms },
        };
        self.jobs(corpus)
            .count_documents(filter)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn mark_we_update_finished(&self, corpus: &str, id: &str) -> Result<(), StoreError> {
        let filter = doc! { "_id": id };
        let update = doc! { "$set": { "index_status": "FINISHED" } };
        self.we_updates(corpus)
            .update_one(filter, update)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn completed_job_ids(&self, corpus: &str) -> Result<Vec<String>, StoreError> {
        let pending_filter = doc! {
            "crawling_status": { "$in": ["FINISHED", "CANCELED", "RETRIED"] },
            "text_indexed": { "$ne": true },
        };
        let mut cursor = self
            .jobs(corpus)
            .find(pending_filter)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut pending_job_ids = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            if let Ok(id) = doc.get_str("crawljob_id") {
                pending_job_ids.push(Bson::String(id.to_string()));
            }
        }
        if pending_job_ids.is_empty() {
            return Ok(Vec::new());
        }

        let pipeline = vec![
            doc! { "$match": {
                "_job": { "$in": pending_job_ids.clone() },
                "text_indexation_status": { "$nin": ["DONT_INDEX", "INDEXED", "ERROR"] },
                "forgotten": false,
            }},
            doc! { "$group": { "_id": "$_job" } },
        ];
        let mut cursor = self
            .pages(corpus)
            .aggregate(pipeline)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut not_completed = std::collections::HashSet::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            if let Ok(id) = doc.get_str("_id") {
                not_completed.insert(id.to_string());
            }
        }

        Ok(pending_job_ids
            .into_iter()
            .filter_map(|b| b.as_str().map(|s| s.to_string()))
            .filter(|id| !not_completed.contains(id))
            .collect())
    }

    async fn mark_jobs_text_indexed(&self, corpus: &str, job_ids: &[String]) -> Result<u64, StoreError> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let filter = doc! { "crawljob_id": { "$in": job_ids } };
        let update = doc! { "$set": { "text_indexed": true } };
        let result = self
            .jobs(corpus)
            .update_many(filter, update)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.modified_count)
    }
}
