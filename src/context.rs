//! Per-call request context
//!
//! Each repository call gets its own context so that callers can bound or
//! abort a single backend round trip without affecting concurrent calls.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backend::DocumentError;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// No deadline and never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie this context to an externally owned token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive a backend call to completion, or stop early on cancellation or deadline.
    ///
    /// An expired deadline is `DocumentError::Timeout`, which surfaces as
    /// `PermissionError::Timeout` rather than `BackendError`. Callers treating
    /// backend failures as "service unavailable" should match both.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DocumentError>
    where
        F: Future<Output = Result<T, DocumentError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(DocumentError::Cancelled);
        }

        match self.timeout {
            Some(limit) => tokio::select! {
                _ = self.cancel.cancelled() => Err(DocumentError::Cancelled),
                res = tokio::time::timeout(limit, fut) => {
                    res.unwrap_or(Err(DocumentError::Timeout(limit)))
                }
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(DocumentError::Cancelled),
                res = fut => res,
            },
        }
    }
}
