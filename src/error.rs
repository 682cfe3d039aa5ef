//! Error taxonomy: typed errors at the store/search-cluster boundary, `anyhow` above it.

use thiserror::Error;

/// Errors surfaced by the document-store adapter (C1).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unreachable: {0}")]
    Connection(String),
    #[error("document store query failed: {0}")]
    Query(String),
}

/// Errors surfaced by the search-cluster adapter (C1).
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search cluster unreachable: {0}")]
    Connection(String),
    #[error("search cluster did not become healthy within the configured budget")]
    HealthTimeout,
    #[error("search cluster request failed: {0}")]
    Request(String),
}

/// A single document rejected by the page transformer (C3), never fatal to the batch.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct TransformError {
    pub kind: String,
    pub detail: String,
}

impl TransformError {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    /// The `"<kind>: <detail>"` message the data model requires for `text_indexation_error`.
    pub fn as_store_message(&self) -> String {
        format!("{self}")
    }
}

/// A single document rejected by the search cluster during bulk upsert (C4 step 4).
#[derive(Debug, Error)]
#[error("{error_type} : {reason}")]
pub struct BulkDocError {
    pub error_type: String,
    pub reason: String,
}

impl BulkDocError {
    /// The `"<type> : <reason>"` message the data model requires for `text_indexation_error`.
    pub fn as_store_message(&self) -> String {
        format!("{self}")
    }
}

/// Batch-level failure: the whole batch is reverted, the worker returns non-zero.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("document store error while processing batch: {0}")]
    Store(#[from] StoreError),
    #[error("search cluster error while processing batch: {0}")]
    Search(#[from] SearchError),
}

/// Errors from applying a single web-entity reclassification (C5); never fatal, update stays PENDING.
#[derive(Debug, Error)]
pub enum WebEntityUpdateError {
    #[error("document store error: {0}")]
    Store(#[from] StoreError),
    #[error("search cluster error: {0}")]
    Search(#[from] SearchError),
}
