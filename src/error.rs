//! Typed failure for non-2xx responses from the document store.

use serde_json::Value;

/// Not found status, treated as "already gone" for single revision fetches
pub const NOT_FOUND_STATUS: u16 = 404;

/// A non-2xx response from the store.
///
/// This is the only error the pipeline inspects; everything else is
/// propagated as an opaque `anyhow::Error`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("HTTP Error Response: {status} {status_text}")]
pub struct HttpError {
    /// Response status code.
    pub status: u16,
    /// Canonical reason phrase for the status, empty when unknown.
    pub status_text: String,
    /// Parsed JSON error payload, or the raw body as a JSON string when it
    /// was not valid JSON.
    pub payload: Value,
}

impl HttpError {
    pub fn new(status: u16, status_text: impl Into<String>, payload: Value) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            payload,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == NOT_FOUND_STATUS
    }
}

/// Returns the status of an `HttpError` wrapped in `err`, if any
pub fn http_status(err: &anyhow::Error) -> Option<u16> {
    err.downcast_ref::<HttpError>().map(|e| e.status)
}

/// Check if an error is a 404 from the store
pub fn is_not_found_error(err: &anyhow::Error) -> bool {
    http_status(err) == Some(NOT_FOUND_STATUS)
}
