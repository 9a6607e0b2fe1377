use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::{PermissionError, Result};

/// Top-level keys owned by the record itself; never valid as attributes.
pub const RESERVED_FIELDS: [&str; 4] = ["username", "acl", "op", "indices"];

// ============================================================================
// Permission record
// ============================================================================

/// Operation class granted by a permission.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Op {
    Read,
    Write,
    Delete,
}

/// A user's access-control record, stored as one document keyed by `username`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Permission {
    pub username: String,
    #[serde(default)]
    pub acl: BTreeSet<String>,
    pub op: Op,
    #[serde(default)]
    pub indices: Vec<String>,
    /// Descriptive attributes the store does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Permission {
    pub fn new(username: impl Into<String>, op: Op) -> Self {
        Self {
            username: username.into(),
            acl: BTreeSet::new(),
            op,
            indices: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_acl<I, S>(mut self, acl: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acl = acl.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_indices<I, S>(mut self, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices = indices.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a passthrough attribute. Keys in `RESERVED_FIELDS` are ignored.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !RESERVED_FIELDS.contains(&key.as_str()) {
            self.extra.insert(key, value);
        }
        self
    }

    /// Check the key and that no attribute shadows a record field.
    pub fn validate(&self) -> Result<()> {
        validate_username(&self.username)?;
        if let Some(key) = self.extra.keys().find(|k| RESERVED_FIELDS.contains(&k.as_str())) {
            return Err(PermissionError::ValidationError(format!(
                "attribute '{}' would overwrite a permission field",
                key
            )));
        }
        Ok(())
    }

    /// Parse a stored document body.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            PermissionError::SerializationError(format!("Failed to parse permission: {}", e))
        })
    }
}

// ============================================================================
// Partial update
// ============================================================================

/// Fields of a partial update. `None` leaves the stored value untouched,
/// `Some` replaces it, including `Some` of an empty collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PermissionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<Op>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<String>>,
}

impl PermissionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acl<I, S>(mut self, acl: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acl = Some(acl.into_iter().map(Into::into).collect());
        self
    }

    pub fn op(mut self, op: Op) -> Self {
        self.op = Some(op);
        self
    }

    pub fn indices<I, S>(mut self, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices = Some(indices.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.acl.is_none() && self.op.is_none() && self.indices.is_none()
    }

    /// Update payload holding only the populated fields.
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(ref acl) = self.acl {
            fields.insert(
                "acl".to_string(),
                Value::Array(acl.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(op) = self.op {
            fields.insert("op".to_string(), Value::String(op.to_string()));
        }
        if let Some(ref indices) = self.indices {
            fields.insert(
                "indices".to_string(),
                Value::Array(indices.iter().cloned().map(Value::String).collect()),
            );
        }
        fields
    }
}

/// Reject keys that cannot address a single document: blank names, and the
/// dot segments that URL path normalization would drop.
pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(PermissionError::ValidationError(
            "username must not be empty".to_string(),
        ));
    }
    if username == "." || username == ".." {
        return Err(PermissionError::ValidationError(format!(
            "username '{}' is not a valid document id",
            username
        )));
    }
    Ok(())
}
