// Permission storage on top of a document backend

use std::sync::Arc;
use tracing::{debug, info};

use super::init::{ensure_index, IndexStatus};
use super::StoreSettings;
use crate::backend::{DocumentBackend, ElasticsearchBackend};
use crate::config::AppConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::types::{validate_username, Permission, PermissionPatch};

/// Permission records keyed by username.
///
/// Holds no mutable state of its own; clones share the backend handle.
/// Writes to the same username race at the backend: concurrent `put`s are
/// last-write-wins and concurrent `patch`es merge field by field without
/// any version check.
#[derive(Clone)]
pub struct PermissionStorage {
    backend: Arc<dyn DocumentBackend>,
    settings: Arc<StoreSettings>,
}

impl PermissionStorage {
    /// Ensure the index exists, then hand out the storage.
    pub async fn initialize(
        backend: Arc<dyn DocumentBackend>,
        settings: StoreSettings,
        ctx: &RequestContext,
    ) -> Result<Self> {
        let status =
            ensure_index(backend.as_ref(), ctx, &settings.index, &settings.mapping).await?;
        debug!("Index '{}' ready ({:?})", settings.index, status);

        Ok(Self {
            backend,
            settings: Arc::new(settings),
        })
    }

    /// Build the Elasticsearch backend described by `config` and initialize on it.
    pub async fn connect(config: &AppConfig, ctx: &RequestContext) -> Result<Self> {
        let backend = ElasticsearchBackend::new(&config.elasticsearch)?;
        info!(
            "Connecting permission storage to {} (index '{}')",
            backend.base_url(),
            config.index.name
        );
        Self::initialize(Arc::new(backend), config.store_settings()?, ctx).await
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Re-run the index check, e.g. after the index was dropped externally.
    pub async fn ensure_index(&self, ctx: &RequestContext) -> Result<IndexStatus> {
        ensure_index(
            self.backend.as_ref(),
            ctx,
            &self.settings.index,
            &self.settings.mapping,
        )
        .await
    }

    /// Raw stored document for `username`.
    pub async fn get(&self, ctx: &RequestContext, username: &str) -> Result<Vec<u8>> {
        validate_username(username)?;
        debug!("Fetching permission: {}", username);

        let source = ctx
            .run(
                self.backend
                    .get_document(&self.settings.index, &self.settings.doc_type, username),
            )
            .await?;

        Ok(serde_json::to_vec(&source)?)
    }

    pub async fn get_permission(&self, ctx: &RequestContext, username: &str) -> Result<Permission> {
        let raw = self.get(ctx, username).await?;
        Permission::from_slice(&raw)
    }

    /// Create or fully replace the record for `permission.username`.
    pub async fn put(&self, ctx: &RequestContext, permission: &Permission) -> Result<bool> {
        permission.validate()?;
        info!("Storing permission: {}", permission.username);

        let body = serde_json::to_value(permission)?;
        ctx.run(self.backend.index_document(
            &self.settings.index,
            &self.settings.doc_type,
            &permission.username,
            &body,
        ))
        .await?;

        Ok(true)
    }

    /// Merge the populated fields of `patch` into the existing record.
    ///
    /// An empty patch is still sent so that a missing record reports `NotFound`.
    pub async fn patch(
        &self,
        ctx: &RequestContext,
        username: &str,
        patch: &PermissionPatch,
    ) -> Result<bool> {
        validate_username(username)?;

        let fields = patch.fields();
        if fields.is_empty() {
            debug!("Empty patch for permission {}, sending anyway", username);
        } else {
            info!(
                "Patching permission {}: {:?}",
                username,
                fields.keys().collect::<Vec<_>>()
            );
        }

        ctx.run(self.backend.update_document(
            &self.settings.index,
            &self.settings.doc_type,
            username,
            &fields,
        ))
        .await?;

        Ok(true)
    }

    pub async fn delete(&self, ctx: &RequestContext, username: &str) -> Result<bool> {
        validate_username(username)?;
        info!("Deleting permission: {}", username);

        ctx.run(
            self.backend
                .delete_document(&self.settings.index, &self.settings.doc_type, username),
        )
        .await?;

        Ok(true)
    }
}
