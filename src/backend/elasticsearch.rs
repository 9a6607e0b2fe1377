//! Elasticsearch document backend
//!
//! Talks to the Elasticsearch REST API with a single shared `reqwest::Client`.
//! The client is cheap to clone and safe to use from concurrent requests.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{DocumentBackend, DocumentError};
use crate::config::ElasticsearchConfig;
use crate::error::{PermissionError, Result};

const USER_AGENT: &str = concat!("permstore/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    base_url: Url,
    http: Client,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticsearchBackend {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url).map_err(|e| {
            PermissionError::ConfigError(format!("Invalid Elasticsearch URL {}: {}", config.url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PermissionError::ConfigError(format!(
                "Elasticsearch URL {} cannot be used as a base",
                config.url
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                PermissionError::ConnectionError(format!("Failed to build HTTP client: {}", e))
            })?;

        let credentials = config
            .username
            .as_ref()
            .filter(|name| !name.is_empty())
            .map(|name| (name.clone(), config.password.clone()));

        Ok(Self {
            base_url,
            http,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}`, percent-encoding every segment.
    ///
    /// `.` and `..` are refused: the URL parser would drop them and the
    /// request would land on a different endpoint.
    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, DocumentError> {
        if let Some(dots) = segments.iter().find(|s| **s == "." || **s == "..") {
            return Err(DocumentError::Rejected {
                status: 400,
                reason: format!("'{}' cannot be used as a path segment", dots),
            });
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DocumentError::Unavailable(format!("invalid base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn document_url(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> std::result::Result<Url, DocumentError> {
        self.endpoint(&[index, doc_type, id])
    }

    fn update_url(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> std::result::Result<Url, DocumentError> {
        if doc_type == "_doc" {
            self.endpoint(&[index, "_update", id])
        } else {
            self.endpoint(&[index, doc_type, id, "_update"])
        }
    }

    async fn send(&self, req: RequestBuilder) -> std::result::Result<Response, DocumentError> {
        let req = match self.credentials {
            Some((ref user, ref password)) => req.basic_auth(user, password.as_deref()),
            None => req,
        };
        req.send().await.map_err(transport_error)
    }
}

/// Connection failures and client-side timeouts alike mean the cluster is unreachable.
fn transport_error(err: reqwest::Error) -> DocumentError {
    DocumentError::Unavailable(err.to_string())
}

/// Pull `error.reason` (or a plain `error` string) out of an error body.
fn error_reason(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::Object(err) => err
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::String(reason) => Some(reason.clone()),
        _ => None,
    }
}

fn is_index_missing(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/type")
                .and_then(Value::as_str)
                .map(|t| t == "index_not_found_exception")
        })
        .unwrap_or(false)
}

fn rejection(status: StatusCode, body: &str) -> DocumentError {
    let reason = error_reason(body)
        .or_else(|| (!body.is_empty()).then(|| body.to_string()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
    DocumentError::Rejected {
        status: status.as_u16(),
        reason,
    }
}

/// Read the body of a successful response and record it for diagnostics.
async fn read_json(resp: Response) -> std::result::Result<Value, DocumentError> {
    let bytes = resp.bytes().await.map_err(transport_error)?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| DocumentError::Malformed(format!("invalid JSON body: {}", e)))?;
    debug!(es_response = %value, "elasticsearch response");
    Ok(value)
}

/// Turn a non-success response for document `id` into an error. A 404 means
/// a missing document unless the index itself is gone.
async fn document_failure(resp: Response, id: &str) -> DocumentError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND && !is_index_missing(&body) {
        return DocumentError::NotFound(id.to_string());
    }
    rejection(status, &body)
}

/// Extract `_source` from a get response.
fn source_of(mut response: Value, id: &str) -> std::result::Result<Value, DocumentError> {
    if response.get("found").and_then(Value::as_bool) == Some(false) {
        return Err(DocumentError::NotFound(id.to_string()));
    }
    response
        .get_mut("_source")
        .map(Value::take)
        .ok_or_else(|| DocumentError::Malformed(format!("response for {} has no _source", id)))
}

#[async_trait]
impl DocumentBackend for ElasticsearchBackend {
    async fn index_exists(&self, index: &str) -> std::result::Result<bool, DocumentError> {
        let url = self.endpoint(&[index])?;
        let resp = self.send(self.http.head(url)).await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(rejection(status, &body))
            }
        }
    }

    async fn create_index(
        &self,
        index: &str,
        mapping: &str,
    ) -> std::result::Result<(), DocumentError> {
        let url = self.endpoint(&[index])?;
        let req = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(mapping.to_string());
        let resp = self.send(req).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(rejection(status, &body));
        }
        read_json(resp).await?;
        Ok(())
    }

    async fn get_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> std::result::Result<Value, DocumentError> {
        let url = self.document_url(index, doc_type, id)?;
        let resp = self.send(self.http.get(url)).await?;
        if !resp.status().is_success() {
            return Err(document_failure(resp, id).await);
        }
        source_of(read_json(resp).await?, id)
    }

    async fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
    ) -> std::result::Result<(), DocumentError> {
        let url = self.document_url(index, doc_type, id)?;
        let resp = self.send(self.http.put(url).json(body)).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(rejection(status, &body));
        }
        read_json(resp).await?;
        Ok(())
    }

    async fn update_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> std::result::Result<(), DocumentError> {
        let url = self.update_url(index, doc_type, id)?;
        let body = json!({ "doc": fields });
        let resp = self.send(self.http.post(url).json(&body)).await?;
        if !resp.status().is_success() {
            return Err(document_failure(resp, id).await);
        }
        read_json(resp).await?;
        Ok(())
    }

    async fn delete_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> std::result::Result<(), DocumentError> {
        let url = self.document_url(index, doc_type, id)?;
        let resp = self.send(self.http.delete(url)).await?;
        if !resp.status().is_success() {
            return Err(document_failure(resp, id).await);
        }
        read_json(resp).await?;
        Ok(())
    }
}
