//! Permission record storage
//!
//! Persists per-user access-control records in Elasticsearch (or any backend
//! implementing [`backend::DocumentBackend`]) and exposes get / put / patch /
//! delete keyed by username.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod storage;
pub mod types;

pub use backend::{DocumentBackend, DocumentError, ElasticsearchBackend, MemoryBackend};
pub use config::AppConfig;
pub use context::RequestContext;
pub use error::{PermissionError, Result};
pub use storage::{IndexStatus, PermissionStorage, StoreSettings, DEFAULT_MAPPING};
pub use types::{Op, Permission, PermissionPatch, RESERVED_FIELDS};
