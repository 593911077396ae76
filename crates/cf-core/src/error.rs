//! Unified error type for the castforge application.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in castforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "stream", "file").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested file has an extension the server does not serve.
    #[error("Unsupported file type: {0}")]
    UnsupportedMedia(String),

    /// A byte range lies outside the resource.
    #[error("Requested range not satisfiable: {start}-{end}/{size}")]
    RangeNotSatisfiable {
        /// First requested byte.
        start: u64,
        /// Last requested byte (inclusive).
        end: u64,
        /// Total resource size in bytes.
        size: u64,
    },

    /// The request carried missing, invalid or expired credentials.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The server cannot take on more work right now.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// An upload exceeded the configured size limit.
    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge {
        /// Maximum accepted size in bytes.
        limit: u64,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool returned an error or could not be run.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A supervised encoder failed to start or died mid-stream.
    #[error("Encoder error [{label}]: {message}")]
    Encoder {
        /// Label of the encoder process (session or job id).
        label: String,
        /// Human-readable error description.
        message: String,
    },

    /// The encoder input queue stayed full past the feed deadline.
    #[error("Encoder input stalled: {0}")]
    Backpressure(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::UnsupportedMedia(_) => 400,
            Error::RangeNotSatisfiable { .. } => 416,
            Error::Forbidden(_) => 403,
            Error::Unavailable(_) => 503,
            Error::PayloadTooLarge { .. } => 413,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Encoder { .. } => 502,
            Error::Backpressure(_) => 503,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::UnsupportedMedia(_) => "unsupported_file_type",
            Error::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Error::Forbidden(_) => "forbidden",
            Error::Unavailable(_) => "unavailable",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Encoder { .. } => "encoder_error",
            Error::Backpressure(_) => "backpressure",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Encoder`].
    pub fn encoder(label: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Encoder {
            label: label.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("stream", "abc-123");
        assert_eq!(err.to_string(), "stream not found: abc-123");
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn unsupported_media_is_400() {
        let err = Error::UnsupportedMedia("poster.jpg".into());
        assert_eq!(err.to_string(), "Unsupported file type: poster.jpg");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn range_display_reports_size() {
        let err = Error::RangeNotSatisfiable {
            start: 900,
            end: 1200,
            size: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Requested range not satisfiable: 900-1200/1000"
        );
        assert_eq!(err.http_status(), 416);
    }

    #[test]
    fn unavailable_is_503() {
        let err = Error::Unavailable("too many live sessions".into());
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.code(), "unavailable");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn encoder_display() {
        let err = Error::encoder("live-42", "failed to spawn");
        assert_eq!(err.to_string(), "Encoder error [live-42]: failed to spawn");
        assert_eq!(err.code(), "encoder_error");
    }

    #[test]
    fn payload_too_large_is_413() {
        let err = Error::PayloadTooLarge { limit: 1024 };
        assert_eq!(err.http_status(), 413);
        assert!(err.to_string().contains("1024"));
    }
}
