//! HTTP plumbing shared by the REST adapters
//!
//! Maps transport failures and status codes onto the adapter error taxonomy:
//! - connect/timeout/body-read failures, 408, 429, 5xx → `Unreachable`
//! - other non-2xx → `Rejected` (carrying the backend's error text)
//! - unparseable 2xx bodies → `Malformed`

use crate::error::SourceError;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

/// Send a request and return the status plus the raw body text
pub(super) async fn send(adapter: &str, request: RequestBuilder) -> Result<(StatusCode, String), SourceError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(adapter, &e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(adapter, &e))?;

    tracing::debug!(adapter = %adapter, status = status.as_u16(), bytes = body.len(), "Backend responded");

    if status.is_success() {
        Ok((status, body))
    } else {
        Err(classify_status(adapter, status, &body))
    }
}

/// Parse a successful body as JSON
pub(super) fn parse_json(adapter: &str, body: &str) -> Result<Value, SourceError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| SourceError::malformed(adapter, format!("invalid JSON: {}", e)))
}

pub(super) fn transport_error(adapter: &str, err: &reqwest::Error) -> SourceError {
    if err.is_decode() {
        SourceError::malformed(adapter, err.to_string())
    } else {
        SourceError::unreachable(adapter, err.to_string())
    }
}

pub(super) fn classify_status(adapter: &str, status: StatusCode, body: &str) -> SourceError {
    let message = format!("HTTP {}: {}", status.as_u16(), error_message(body).unwrap_or_else(|| {
        status.canonical_reason().unwrap_or("error").to_string()
    }));

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        SourceError::unreachable(adapter, message)
    } else {
        SourceError::rejected(adapter, message)
    }
}

/// Human-readable error text from an error body
///
/// JSON bodies contribute their `error` or `message` field (string, or the
/// `message` of a nested object); other non-empty bodies are used verbatim.
pub(super) fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => ["error", "message"].iter().find_map(|k| match map.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Object(inner)) => inner.get("message").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}
