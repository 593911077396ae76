//! VOD API: upload, job status, asset listing and signed read URLs.

use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, SecondsFormat, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use cf_core::{JobId, Ladder, Rendition};

use crate::context::AppContext;
use crate::error::AppError;
use crate::jobs::JobRecord;
use crate::routes::range_header;
use crate::routes::streaming_helpers::{serve_hls_file, HlsFile};
use crate::store::AssetSummary;
use crate::vod::spawn_job;

/// Name recorded for uploads that do not carry one.
const DEFAULT_UPLOAD_NAME: &str = "upload";

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct VideoList {
    pub videos: Vec<AssetSummary>,
}

/// GET /api/videos
pub async fn list_videos(State(ctx): State<AppContext>) -> Result<Json<VideoList>, AppError> {
    let videos = ctx.store.list_assets().await?;
    Ok(Json(VideoList { videos }))
}

// ---------------------------------------------------------------------------
// Upload and jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub filename: Option<String>,
    /// Comma-separated `WxH:VIDEOk:AUDIOk` list overriding the configured ladder.
    pub renditions: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub job_id: JobId,
    pub status_url: String,
}

fn ladder_override(list: &str) -> cf_core::Result<Ladder> {
    let renditions = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Rendition>)
        .collect::<cf_core::Result<Vec<_>>>()?;
    Ladder::new(renditions)
}

/// Reduce a client-supplied name to its final component.
fn sanitize_name(name: Option<&str>) -> String {
    name.and_then(|n| FsPath::new(n).file_name())
        .and_then(|n| n.to_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_UPLOAD_NAME)
        .to_string()
}

/// POST /api/videos/upload
///
/// Streams the raw request body into the staging area, queues a packaging
/// job and answers `202 Accepted` straight away.
pub async fn upload(
    State(ctx): State<AppContext>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let limit = ctx.config.vod.max_upload_bytes;

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(cf_core::Error::PayloadTooLarge { limit }.into());
    }

    let ladder = match params.renditions.as_deref() {
        Some(list) => ladder_override(list)?,
        None => ctx.config.vod.ladder.clone(),
    };

    let source_name = sanitize_name(params.filename.as_deref());
    let job_id = JobId::new();
    let ext = FsPath::new(&source_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let upload_path = ctx
        .store
        .staging_root()
        .join(format!("upload-{job_id}{ext}"));

    let written = match receive_body(body, &upload_path, limit).await {
        Ok(written) => written,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&upload_path).await {
                tracing::debug!("Failed to remove partial upload: {rm}");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        job_id = %job_id,
        bytes = written,
        renditions = ladder.len(),
        "Received upload {source_name:?}"
    );

    ctx.jobs
        .insert(JobRecord::queued(job_id, source_name, &ladder));
    spawn_job(ctx.packager(), ctx.jobs.clone(), job_id, upload_path, ladder);

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            job_id,
            status_url: format!("/api/videos/jobs/{job_id}"),
        }),
    )
        .into_response())
}

/// Write `body` to `path`, failing once more than `limit` bytes arrive.
async fn receive_body(body: Body, path: &FsPath, limit: u64) -> cf_core::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = body.into_data_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| cf_core::Error::Validation(format!("upload aborted: {e}")))?;
        written += chunk.len() as u64;
        if written > limit {
            return Err(cf_core::Error::PayloadTooLarge { limit });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written == 0 {
        return Err(cf_core::Error::Validation("upload body is empty".into()));
    }
    Ok(written)
}

/// GET /api/videos/jobs/{job_id}
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    let id: JobId = job_id
        .parse()
        .map_err(|_| cf_core::Error::not_found("job", &job_id))?;
    let job = ctx
        .jobs
        .get(id)
        .ok_or_else(|| cf_core::Error::not_found("job", id))?;
    Ok(Json(job))
}

// ---------------------------------------------------------------------------
// Signed URLs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SignedUrlParams {
    #[serde(rename = "filePath")]
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SignatureParams {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

fn signing_disabled() -> cf_core::Error {
    cf_core::Error::Unavailable("URL signing is not configured".into())
}

/// GET /api/videos/signed-url?filePath={assetId}/{file}
pub async fn signed_url(
    State(ctx): State<AppContext>,
    Query(params): Query<SignedUrlParams>,
) -> Result<Json<SignedUrlResponse>, AppError> {
    let file_path = params
        .file_path
        .as_deref()
        .map(|p| p.trim_start_matches('/'))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| cf_core::Error::Validation("filePath is required".into()))?;
    let signer = ctx.signer.as_ref().ok_or_else(signing_disabled)?;

    // Only existing files get a URL.
    ctx.store.resolve_video_path(file_path).await?;

    let expires_at = i64::try_from(ctx.config.signing.ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| cf_core::Error::Internal("signing.ttl_secs is out of range".into()))?;
    let expires = expires_at.timestamp();
    let signature = signer.sign(file_path, expires);

    let base = ctx
        .config
        .server
        .public_base_url
        .as_deref()
        .map(|b| b.trim_end_matches('/'))
        .unwrap_or("");

    Ok(Json(SignedUrlResponse {
        url: format!("{base}/api/videos/signed/{file_path}?expires={expires}&signature={signature}"),
        expires_at: expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

/// GET /api/videos/signed/{*file_path}?expires=..&signature=..
pub async fn signed_file(
    State(ctx): State<AppContext>,
    Path(file_path): Path<String>,
    Query(params): Query<SignatureParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let signer = ctx.signer.as_ref().ok_or_else(signing_disabled)?;
    let file_path = file_path.trim_start_matches('/');

    let (Some(expires), Some(signature)) = (params.expires, params.signature.as_deref()) else {
        return Err(cf_core::Error::Forbidden("missing signature".into()).into());
    };
    if expires < Utc::now().timestamp() {
        return Err(cf_core::Error::Forbidden("signature expired".into()).into());
    }
    if !signer.verify(file_path, expires, signature) {
        return Err(cf_core::Error::Forbidden("invalid signature".into()).into());
    }

    let kind = HlsFile::from_name(file_path)?;
    let path = ctx.store.resolve_video_path(file_path).await?;
    Ok(serve_hls_file(&path, kind, range_header(&headers)).await?)
}
