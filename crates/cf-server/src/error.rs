//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`cf_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on core results.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: cf_core::Error,
}

/// The JSON body of an error response, attached to the response so the
/// request ID middleware can fill in `request_id`.
#[derive(Debug, Clone)]
pub struct ErrorBody(serde_json::Value);

impl ErrorBody {
    /// Re-render `response` with `request_id` set in its body.
    pub fn stamp(mut self, request_id: &str, response: Response) -> Response {
        self.0["request_id"] = json!(request_id);
        let (mut parts, _) = response.into_parts();
        let bytes = self.0.to_string().into_bytes();
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        Response::from_parts(parts, Body::from(bytes))
    }
}

impl AppError {
    pub fn new(inner: cf_core::Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &cf_core::Error {
        &self.inner
    }
}

impl From<cf_core::Error> for AppError {
    fn from(e: cf_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let mut body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": null,
        });

        let content_range = match &self.inner {
            cf_core::Error::RangeNotSatisfiable { start, end, size } => {
                body["range"] = json!({ "start": start, "end": end });
                body["size"] = json!(size);
                HeaderValue::from_str(&format!("bytes */{size}")).ok()
            }
            _ => None,
        };

        let mut response = (status, axum::Json(body.clone())).into_response();
        if let Some(value) = content_range {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response.extensions_mut().insert(ErrorBody(body));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(cf_core::Error::not_found("stream", "abc"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unsupported_media_produces_400() {
        let err = AppError::new(cf_core::Error::UnsupportedMedia("mp4".into()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn range_error_reports_size() {
        let err = AppError::new(cf_core::Error::RangeNotSatisfiable {
            start: 900,
            end: 1200,
            size: 1000,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");

        let body = body_json(response).await;
        assert_eq!(body["code"], "range_not_satisfiable");
        assert_eq!(body["size"], 1000);
        assert_eq!(body["range"]["start"], 900);
        assert!(body["error"].as_str().unwrap().contains("900-1200/1000"));
    }

    #[tokio::test]
    async fn stamped_body_carries_request_id() {
        let mut response = AppError::new(cf_core::Error::Internal("oops".into())).into_response();
        let error_body = response.extensions_mut().remove::<ErrorBody>().unwrap();

        let response = error_body.stamp("req-123", response);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["request_id"], "req-123");
        assert_eq!(body["code"], "internal_error");
    }
}
