use crate::backend::DocumentError;

#[derive(thiserror::Error, Debug)]
pub enum PermissionError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Schema creation failed: {0}")]
    SchemaCreationError(String),

    #[error("Permission not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl From<serde_json::Error> for PermissionError {
    fn from(err: serde_json::Error) -> Self {
        PermissionError::SerializationError(err.to_string())
    }
}

// Repository-side mapping of backend failures; the initializer maps its own
// failures to ConnectionError/SchemaCreationError instead.
impl From<DocumentError> for PermissionError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::NotFound(what) => PermissionError::NotFound(what),
            DocumentError::Malformed(msg) => PermissionError::SerializationError(msg),
            DocumentError::Cancelled => {
                PermissionError::Cancelled("request cancelled by caller".to_string())
            }
            DocumentError::Timeout(after) => {
                PermissionError::Timeout(format!("request timed out after {:?}", after))
            }
            other => PermissionError::BackendError(other.to_string()),
        }
    }
}

impl PermissionError {
    /// True for `NotFound`, the only failure a caller is expected to branch on.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PermissionError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, PermissionError>;
