//! Data model shared by the store clients, the page transformer and the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-page indexation lifecycle. Terminal states are `Indexed`, `Error` and `DontIndex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextIndexationStatus {
    ToIndex,
    InBatch(String),
    Indexed,
    Error,
    DontIndex,
}

impl TextIndexationStatus {
    pub fn as_store_value(&self) -> String {
        match self {
            TextIndexationStatus::ToIndex => "TO_INDEX".to_string(),
            TextIndexationStatus::InBatch(uuid) => format!("IN_BATCH_{uuid}"),
            TextIndexationStatus::Indexed => "INDEXED".to_string(),
            TextIndexationStatus::Error => "ERROR".to_string(),
            TextIndexationStatus::DontIndex => "DONT_INDEX".to_string(),
        }
    }

    pub fn from_store_value(value: &str) -> Self {
        match value {
            "TO_INDEX" => TextIndexationStatus::ToIndex,
            "INDEXED" => TextIndexationStatus::Indexed,
            "ERROR" => TextIndexationStatus::Error,
            "DONT_INDEX" => TextIndexationStatus::DontIndex,
            other => other
                .strip_prefix("IN_BATCH_")
                .map(|uuid| TextIndexationStatus::InBatch(uuid.to_string()))
                .unwrap_or(TextIndexationStatus::ToIndex),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TextIndexationStatus::Indexed | TextIndexationStatus::Error | TextIndexationStatus::DontIndex
        )
    }
}

/// Per-corpus extraction configuration, read from `hyphe.corpus.options`.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub id: String,
    pub index_text_content: bool,
    pub extraction_methods: Vec<String>,
    pub default_extraction_method: Option<String>,
}

impl Corpus {
    pub fn index_name(&self) -> String {
        index_name(&self.id)
    }
}

pub fn index_name(corpus: &str) -> String {
    format!("hyphe_{corpus}")
}

/// A raw page record as stored in `hyphe_<corpus>.pages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: String,
    pub url: String,
    pub lru: String,
    pub status: i32,
    pub timestamp_ms: i64,
    pub encoding: String,
    pub body: Vec<u8>,
    pub webentity_when_crawled: String,
    pub forgotten: bool,
    pub job_id: Option<String>,
    pub text_indexation_status: String,
    pub text_indexation_error: Option<String>,
}

/// A crawl job record as stored in `hyphe_<corpus>.jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub crawljob_id: String,
    pub webentity_id: String,
    pub scheduled_at_ms: i64,
    pub crawling_status: String,
    pub text_indexed: bool,
}

/// A pending (or finished) web-entity reclassification event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebEntityUpdate {
    pub id: String,
    pub timestamp_ms: i64,
    pub old_webentity: String,
    pub new_webentity: String,
    pub prefixes: Vec<String>,
    pub index_status: String,
}

/// The enriched document written to the search cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub url: String,
    pub lru: String,
    pub prefixes: Vec<String>,
    #[serde(rename = "HTTP_status")]
    pub http_status: i32,
    pub crawl_date: DateTime<Utc>,
    pub webentity_id: String,
    pub title: Option<String>,
    pub textify: Option<String>,
    pub dragnet: Option<String>,
    pub trafilatura: Option<String>,
    #[serde(rename = "trafilaturaDate")]
    pub trafilatura_date: Option<String>,
    #[serde(rename = "trafilaturaAuthor")]
    pub trafilatura_author: Option<String>,
    #[serde(rename = "trafilaturaComments")]
    pub trafilatura_comments: Option<String>,
    pub index_date: DateTime<Utc>,
    #[serde(rename = "WEUpdateDate", skip_serializing_if = "Option::is_none")]
    pub we_update_date: Option<DateTime<Utc>>,
}

/// `prefixes` per invariant 5: every ancestor stem of the lru, each trailing-piped.
pub fn derive_prefixes(lru: &str) -> Vec<String> {
    let stems: Vec<&str> = lru.trim_end_matches('|').split('|').collect();
    (0..stems.len())
        .map(|i| format!("{}|", stems[0..=i].join("|")))
        .collect()
}

/// The lease identifier for a dispatched batch: md5 of the pipe-joined sorted page ids.
pub fn batch_uuid(ids: &[String]) -> String {
    format!("{:x}", md5::compute(ids.join("|")))
}

/// `_id = md5hex(utf8(url))`, the document idempotency key (invariant 2 / property P1).
pub fn document_id(url: &str) -> String {
    format!("{:x}", md5::compute(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_follow_invariant_5() {
        let prefixes = derive_prefixes("a|b|c|");
        assert_eq!(prefixes, vec!["a|", "a|b|", "a|b|c|"]);
    }

    #[test]
    fn prefixes_of_single_stem() {
        assert_eq!(derive_prefixes("a|"), vec!["a|"]);
    }

    #[test]
    fn document_id_is_stable_and_independent_of_other_fields() {
        let id1 = document_id("http://example.com/a");
        let id2 = document_id("http://example.com/a");
        assert_eq!(id1, id2);
        assert_ne!(id1, document_id("http://example.com/b"));
    }

    #[test]
    fn status_round_trips_through_store_value() {
        let status = TextIndexationStatus::InBatch("abc123".to_string());
        assert_eq!(status.as_store_value(), "IN_BATCH_abc123");
        assert_eq!(TextIndexationStatus::from_store_value("IN_BATCH_abc123"), status);
        assert!(TextIndexationStatus::from_store_value("INDEXED").is_terminal());
        assert!(!TextIndexationStatus::from_store_value("TO_INDEX").is_terminal());
    }
}
