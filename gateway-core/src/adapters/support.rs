//! Shared plumbing used by every vendor adapter: HTTP client construction,
//! response-status classification into the adapter error taxonomy, and the
//! byte-stream → `sse::lines` pipeline each streaming response is built on.

use crate::error::{extract_vendor_message, AdapterError};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use std::time::Duration;

/// One client, reused by every adapter: connection pooling matters more here
/// than per-vendor tuning, and all vendors are hit over plain HTTPS.
pub static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("static reqwest client config is always valid")
});

/// Maps a transport-level failure (DNS, TLS, premature close) to the
/// adapter error taxonomy.
pub fn transport_err(err: reqwest::Error) -> AdapterError {
    AdapterError::transport(err.to_string())
}

/// Classifies a non-2xx HTTP response into `VendorBusy` (429/5xx, retryable)
/// or `VendorReject` (other 4xx, terminal), pulling a human message out of
/// the JSON body via the shared candidate field list when present.
pub fn classify_error_response(status: u16, body: &str) -> AdapterError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| extract_vendor_message(&v))
        .unwrap_or_else(|| body.chars().take(500).collect());
    if status == 429 || status >= 500 {
        AdapterError::vendor_busy(message, status)
    } else {
        AdapterError::vendor_reject(message, status)
    }
}

/// Converts a successful streaming response's body into a boxed byte stream
/// the line framer in [`crate::sse`] can consume directly.
pub fn byte_stream(resp: reqwest::Response) -> BoxStream<'static, Result<Bytes, AdapterError>> {
    resp.bytes_stream().map(|r| r.map_err(transport_err)).boxed()
}

/// Standard impersonation headers every adapter layers its own
/// signature/auth headers on top of.
pub fn common_headers() -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("user-agent"),
        HeaderValue::from_static(crate::fingerprint::USER_AGENT),
    );
    headers.insert(
        HeaderName::from_static("accept"),
        HeaderValue::from_static("*/*"),
    );
    headers
}
