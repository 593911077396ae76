//! Published VOD asset serving.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::range_header;
use crate::routes::streaming_helpers::{serve_hls_file, HlsFile};

/// GET /stream/{id}/{*file}
///
/// Serves the master playlist, variant playlists and segments of a published
/// asset, e.g. `/stream/{id}/index.m3u8` or `/stream/{id}/v1/segment_004.ts`.
pub async fn serve_asset_file(
    State(ctx): State<AppContext>,
    Path((asset_id, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let kind = HlsFile::from_name(&file)?;
    let path = ctx.store.resolve_video(&asset_id, &file).await?;
    Ok(serve_hls_file(&path, kind, range_header(&headers)).await?)
}
