//! Document backend abstraction
//!
//! The store only needs six verbs from its backend. Anything that can check
//! and create an index and get, overwrite, merge and delete documents by id
//! can stand in for Elasticsearch.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchBackend;
pub use memory::MemoryBackend;

/// Failures reported by a backend, before they are mapped to `PermissionError`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected request with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, DocumentError>;

    /// Create `index` with the given mapping text.
    async fn create_index(&self, index: &str, mapping: &str) -> Result<(), DocumentError>;

    /// Stored source of the document.
    async fn get_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> Result<Value, DocumentError>;

    /// Create or fully replace the document.
    async fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), DocumentError>;

    /// Merge `fields` into an existing document. Missing documents are `NotFound`.
    async fn update_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), DocumentError>;

    async fn delete_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> Result<(), DocumentError>;
}
