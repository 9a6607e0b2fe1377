// Index initialization utilities

use crate::backend::{DocumentBackend, DocumentError};
use crate::context::RequestContext;
use crate::error::{PermissionError, Result};
use tracing::{info, warn};

/// Outcome of `ensure_index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    AlreadyExists,
}

fn cancelled_or(
    err: DocumentError,
    fallback: impl FnOnce(DocumentError) -> PermissionError,
) -> PermissionError {
    match err {
        DocumentError::Cancelled => PermissionError::from(err),
        other => fallback(other),
    }
}

/// Make sure `index` exists, creating it with `mapping` when absent.
///
/// Safe to call on every start. A failed existence check is a
/// `ConnectionError`; a rejected creation is a `SchemaCreationError`.
pub async fn ensure_index(
    backend: &dyn DocumentBackend,
    ctx: &RequestContext,
    index: &str,
    mapping: &str,
) -> Result<IndexStatus> {
    let exists = ctx.run(backend.index_exists(index)).await.map_err(|e| {
        cancelled_or(e, |e| {
            PermissionError::ConnectionError(format!(
                "Failed to check whether index '{}' exists: {}",
                index, e
            ))
        })
    })?;

    if exists {
        info!("Index named '{}' already exists, skipping...", index);
        return Ok(IndexStatus::AlreadyExists);
    }

    if let Err(e) = ctx.run(backend.create_index(index, mapping)).await {
        if e == DocumentError::Cancelled {
            return Err(e.into());
        }

        // Another process may have won the race to create it.
        if let Ok(true) = ctx.run(backend.index_exists(index)).await {
            warn!(
                "Creating index '{}' failed ({}), but it exists now; continuing",
                index, e
            );
            return Ok(IndexStatus::AlreadyExists);
        }

        return Err(PermissionError::SchemaCreationError(format!(
            "Failed to create index named '{}': {}",
            index, e
        )));
    }

    info!("Successfully created index named '{}'", index);
    Ok(IndexStatus::Created)
}
