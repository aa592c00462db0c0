//! Rate limit response headers and rejection bodies.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ratelimit::Decision;

/// Quota for the caller and category.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Unix timestamp at which the window lapses.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Error code on 429 responses.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
/// Error code on 503 responses when the counter store is down.
pub const RATE_LIMIT_UNAVAILABLE: &str = "RATE_LIMIT_UNAVAILABLE";

/// JSON body of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    /// Always false
    pub success: bool,
    /// Human readable explanation
    pub message: String,
    /// `RATE_LIMIT_EXCEEDED` or `RATE_LIMIT_UNAVAILABLE`
    pub error_code: String,
    /// Seconds until the window lapses, on 429 only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Attach `X-RateLimit-*` headers describing `decision`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));
}

/// 429 response for a denied decision.
pub fn rejection(decision: &Decision, now: i64) -> Response {
    let retry_after = decision.retry_after(now);
    let body = RejectionBody {
        success: false,
        message: format!(
            "Rate limit exceeded. Try again in {} seconds.",
            retry_after
        ),
        error_code: RATE_LIMIT_EXCEEDED.to_string(),
        retry_after: Some(retry_after),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, decision);
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// 503 response used when the counter store fails and the layer fails closed.
pub fn unavailable() -> Response {
    let body = RejectionBody {
        success: false,
        message: "Rate limiting is temporarily unavailable.".to_string(),
        error_code: RATE_LIMIT_UNAVAILABLE.to_string(),
        retry_after: None,
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}
