use std::future::Future;

use crate::error::AppError;
use crate::models::{FieldMap, WorkItem};

/// Raw outcome of one HTTP exchange, before any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single GET, optionally through an egress proxy.
///
/// Implementations report connection failures as [`AppError::NetworkError`],
/// timeouts as [`AppError::Timeout`] and anything else as [`AppError::HttpError`].
/// Non-2xx statuses are returned as responses, not errors.
pub trait Transport: Send + Sync + Clone {
    fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
    ) -> impl Future<Output = Result<HttpResponse, AppError>> + Send;
}

/// Fetches the raw document for one work item.
pub trait DocumentFetcher: Send + Sync + Clone {
    fn fetch_document(
        &self,
        id: WorkItem,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Extracts structured fields from a fetched document.
pub trait Extractor: Send + Sync + Clone {
    /// Returns `Ok(None)` when the document holds no record for the identifier.
    fn extract(&self, document: &str) -> Result<Option<FieldMap>, AppError>;
}
