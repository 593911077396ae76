//! Shared HLS file serving: content types, range parsing, and chunked
//! segment streaming via `ReaderStream`.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Read size for segment bodies.
const CHUNK_SIZE: usize = 64 * 1024;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// The two kinds of file the HLS endpoints serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsFile {
    /// `.m3u8` playlist: served whole, never cached, no range support.
    Manifest,
    /// `.ts` segment: range-capable.
    Segment,
}

impl HlsFile {
    /// Classify a requested file by extension.
    ///
    /// # Errors
    ///
    /// [`cf_core::Error::UnsupportedMedia`] for anything but `.m3u8` / `.ts`.
    pub fn from_name(file_name: &str) -> cf_core::Result<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        match ext {
            "m3u8" => Ok(HlsFile::Manifest),
            "ts" => Ok(HlsFile::Segment),
            _ => Err(cf_core::Error::UnsupportedMedia(file_name.to_string())),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            HlsFile::Manifest => MANIFEST_CONTENT_TYPE,
            HlsFile::Segment => SEGMENT_CONTENT_TYPE,
        }
    }
}

/// A single byte range from a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-` or `bytes=START-END`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-N`: the last N bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Resolve against a resource of `size` bytes into an inclusive span.
    ///
    /// A start or end at or past the end of the resource is unsatisfiable;
    /// ends are not clamped.
    pub fn resolve(self, size: u64) -> cf_core::Result<(u64, u64)> {
        let last = size.checked_sub(1);
        match self {
            ByteRange::From { start, end } => {
                let end_or_last = end.unwrap_or_else(|| last.unwrap_or(0));
                match last {
                    Some(last) if start <= last && end_or_last <= last && start <= end_or_last => {
                        Ok((start, end_or_last))
                    }
                    _ => Err(cf_core::Error::RangeNotSatisfiable {
                        start,
                        end: end_or_last,
                        size,
                    }),
                }
            }
            ByteRange::Suffix(len) => match last {
                Some(last) if len > 0 => Ok((size.saturating_sub(len), last)),
                _ => Err(cf_core::Error::RangeNotSatisfiable {
                    start: size.saturating_sub(len),
                    end: last.unwrap_or(0),
                    size,
                }),
            },
        }
    }
}

/// Parse a `Range: bytes=...` header value.
///
/// Returns `None` for anything that is not a single well-formed byte range;
/// callers then ignore the header and serve the full resource.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    let (start_str, end_str) = ranges.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        return end_str.parse().ok().map(ByteRange::Suffix);
    }

    let start: u64 = start_str.parse().ok()?;
    let end: Option<u64> = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().ok()?)
    };

    Some(ByteRange::From { start, end })
}

/// Serve a resolved HLS file.
///
/// Manifests are read whole and sent with `Cache-Control: no-cache`, so a
/// player polling a live playlist always sees the latest window. Segments are
/// streamed in 64KB chunks and honor a single `Range`.
pub async fn serve_hls_file(
    file_path: &Path,
    kind: HlsFile,
    range_header: Option<&str>,
) -> cf_core::Result<Response> {
    let not_found = || cf_core::Error::not_found("file", file_path.display());

    match kind {
        HlsFile::Manifest => {
            let body = tokio::fs::read(file_path).await.map_err(|_| not_found())?;
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, kind.content_type().to_string()),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                    (header::CONTENT_LENGTH, body.len().to_string()),
                ],
                body,
            )
                .into_response())
        }
        HlsFile::Segment => {
            let mut file = tokio::fs::File::open(file_path)
                .await
                .map_err(|_| not_found())?;
            let file_size = file.metadata().await?.len();

            match range_header.and_then(parse_range_header) {
                Some(range) => {
                    let (start, end) = range.resolve(file_size)?;
                    let length = end - start + 1;

                    file.seek(std::io::SeekFrom::Start(start)).await?;
                    // Take limits reads to exactly `length` bytes.
                    let stream = ReaderStream::with_capacity(file.take(length), CHUNK_SIZE);

                    Ok((
                        StatusCode::PARTIAL_CONTENT,
                        [
                            (header::CONTENT_TYPE, kind.content_type().to_string()),
                            (
                                header::CONTENT_RANGE,
                                format!("bytes {start}-{end}/{file_size}"),
                            ),
                            (header::CONTENT_LENGTH, length.to_string()),
                            (header::ACCEPT_RANGES, "bytes".to_string()),
                        ],
                        Body::from_stream(stream),
                    )
                        .into_response())
                }
                None => {
                    // The segment being appended may grow; send what we measured.
                    let stream = ReaderStream::with_capacity(file.take(file_size), CHUNK_SIZE);

                    Ok((
                        StatusCode::OK,
                        [
                            (header::CONTENT_TYPE, kind.content_type().to_string()),
                            (header::CONTENT_LENGTH, file_size.to_string()),
                            (header::ACCEPT_RANGES, "bytes".to_string()),
                        ],
                        Body::from_stream(stream),
                    )
                        .into_response())
                }
            }
        }
    }
}
