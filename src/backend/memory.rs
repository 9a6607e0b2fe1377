// In-process document backend
//
// Mirrors the Elasticsearch semantics the store relies on: one document per id,
// full overwrite on index, object merge on update, 404 on missing ids.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

use super::{DocumentBackend, DocumentError};

#[derive(Debug)]
struct MemoryIndex {
    mapping: Value,
    docs: DashMap<String, Value>,
}

/// Document backend held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    indices: DashMap<String, MemoryIndex>,
    offline: AtomicBool,
    created: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful index creations since construction.
    pub fn indices_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.indices.get(index).map(|idx| idx.mapping.clone())
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.indices.get(index).map(|idx| idx.docs.len()).unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), DocumentError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DocumentError::Unavailable(
                "memory backend is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn with_index<T>(
        &self,
        index: &str,
        f: impl FnOnce(&MemoryIndex) -> Result<T, DocumentError>,
    ) -> Result<T, DocumentError> {
        self.check_online()?;
        let idx = self
            .indices
            .get(index)
            .ok_or_else(|| DocumentError::Rejected {
                status: 404,
                reason: format!("no such index [{}]", index),
            })?;
        f(&idx)
    }
}

/// Merge `patch` into `target` the way a partial document update does:
/// nested objects merge key by key, everything else is replaced.
fn merge_object(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) =
            (target.get_mut(key), value)
        {
            merge_object(existing, incoming);
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, DocumentError> {
        self.check_online()?;
        Ok(self.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, mapping: &str) -> Result<(), DocumentError> {
        self.check_online()?;

        let mapping: Value = serde_json::from_str(mapping).map_err(|e| DocumentError::Rejected {
            status: 400,
            reason: format!("failed to parse mapping: {}", e),
        })?;

        match self.indices.entry(index.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DocumentError::Rejected {
                status: 400,
                reason: format!("index [{}] already exists", index),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(MemoryIndex {
                    mapping,
                    docs: DashMap::new(),
                });
                self.created.fetch_add(1, Ordering::SeqCst);
                debug!("memory backend created index {}", index);
                Ok(())
            }
        }
    }

    async fn get_document(
        &self,
        index: &str,
        _doc_type: &str,
        id: &str,
    ) -> Result<Value, DocumentError> {
        self.with_index(index, |idx| {
            idx.docs
                .get(id)
                .map(|doc| doc.value().clone())
                .ok_or_else(|| DocumentError::NotFound(id.to_string()))
        })
    }

    async fn index_document(
        &self,
        index: &str,
        _doc_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), DocumentError> {
        self.with_index(index, |idx| {
            idx.docs.insert(id.to_string(), body.clone());
            Ok(())
        })
    }

    async fn update_document(
        &self,
        index: &str,
        _doc_type: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), DocumentError> {
        self.with_index(index, |idx| {
            let mut doc = idx
                .docs
                .get_mut(id)
                .ok_or_else(|| DocumentError::NotFound(id.to_string()))?;
            match doc.value_mut() {
                Value::Object(existing) => merge_object(existing, fields),
                other => *other = Value::Object(fields.clone()),
            }
            Ok(())
        })
    }

    async fn delete_document(
        &self,
        index: &str,
        _doc_type: &str,
        id: &str,
    ) -> Result<(), DocumentError> {
        self.with_index(index, |idx| {
            idx.docs
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| DocumentError::NotFound(id.to_string()))
        })
    }
}
