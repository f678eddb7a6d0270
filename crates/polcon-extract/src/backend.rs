//! Extractor backend capability.

use crate::wire::ExtractionRequest;
use async_trait::async_trait;

/// Anything that can read a chunk and answer with the wire JSON.
///
/// The gateway owns schema enforcement, evidence checks, retries and
/// timeouts; a backend only produces a candidate response.
#[async_trait]
pub trait ExtractorBackend: Send + Sync {
    /// Short name recorded in the run summary.
    fn name(&self) -> &str;

    async fn extract(&self, request: &ExtractionRequest) -> Result<serde_json::Value, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend timed out after {0}ms")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("backend API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("backend rejected credentials or configuration: {0}")]
    Unauthorized(String),
}

impl BackendError {
    /// Authentication failures and client errors other than 408/429 will not
    /// succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Unauthorized(_) => false,
            BackendError::Api { status, .. } => !(400..500).contains(status) || *status == 408,
            _ => true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}
