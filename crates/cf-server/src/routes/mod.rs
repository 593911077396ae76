//! Route handlers for the HTTP API.

pub mod health;
pub mod live;
pub mod streaming_helpers;
pub mod videos;
pub mod vod;

use axum::http::{header, HeaderMap};

/// The raw `Range` header, if present and valid UTF-8.
pub(crate) fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}
