// Permission storage module

pub mod init;
pub mod permission_storage;

pub use init::{ensure_index, IndexStatus};
pub use permission_storage::PermissionStorage;

/// Mapping applied when the permissions index is created.
pub const DEFAULT_MAPPING: &str = r#"{
  "mappings": {
    "properties": {
      "username": { "type": "keyword" },
      "acl": { "type": "keyword" },
      "op": { "type": "keyword" },
      "indices": { "type": "keyword" }
    }
  }
}"#;

/// Where and how permission documents are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub index: String,
    pub doc_type: String,
    pub mapping: String,
}

impl StoreSettings {
    /// Settings for `index` with the `_doc` type and the default mapping.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: "_doc".to_string(),
            mapping: DEFAULT_MAPPING.to_string(),
        }
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }

    pub fn with_mapping(mut self, mapping: impl Into<String>) -> Self {
        self.mapping = mapping.into();
        self
    }
}
