//! Live stream route handlers: discovery, playlist/segment serving, and the
//! WebSocket ingest endpoint.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::{future, SinkExt, StreamExt};
use serde::Serialize;

use cf_av::LIVE_MANIFEST;
use cf_core::SessionId;

use crate::context::AppContext;
use crate::error::AppError;
use crate::ingest::{CloseReason, Frame, IngestSession};
use crate::routes::range_header;
use crate::routes::streaming_helpers::{serve_hls_file, HlsFile};

/// WebSocket close reasons must fit in a 125-byte control frame.
const MAX_CLOSE_REASON_BYTES: usize = 120;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStream {
    pub stream_id: SessionId,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub playlist_url: String,
}

#[derive(Debug, Serialize)]
pub struct ActiveStreams {
    pub streams: Vec<ActiveStream>,
}

pub fn live_playlist_url(id: SessionId) -> String {
    format!("/api/live/stream/{id}/{LIVE_MANIFEST}")
}

/// GET /api/live/active
///
/// Registered sessions whose playlist exists on disk. Sessions that are
/// still waiting for their first segment are omitted.
pub async fn list_active(State(ctx): State<AppContext>) -> Json<ActiveStreams> {
    // The registry lock is released here, before any filesystem check.
    let entries = ctx.registry.snapshot();

    let mut streams = Vec::with_capacity(entries.len());
    for entry in entries {
        if ctx.store.live_manifest_exists(entry.id).await {
            streams.push(ActiveStream {
                stream_id: entry.id,
                playlist_url: live_playlist_url(entry.id),
                name: entry.name,
                started_at: entry.started_at,
            });
        }
    }

    Json(ActiveStreams { streams })
}

/// GET /api/live/stream/{stream_id}/{file}
pub async fn serve_live_file(
    State(ctx): State<AppContext>,
    Path((stream_id, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let kind = HlsFile::from_name(&file)?;
    let path = ctx.store.resolve_live(&stream_id, &file).await?;
    Ok(serve_hls_file(&path, kind, range_header(&headers)).await?)
}

/// GET /api/live/ingest
///
/// Refuses with 503 before upgrading when the session limit is reached or
/// the live store is not writable.
pub async fn ingest(
    State(ctx): State<AppContext>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let max = ctx.config.live.max_sessions;
    if ctx.registry.len() >= max {
        return Err(cf_core::Error::Unavailable(format!("live session limit of {max} reached")).into());
    }
    ctx.store.check_writable().await?;

    Ok(ws.on_upgrade(move |socket| run_socket(ctx, socket)))
}

async fn run_socket(ctx: AppContext, socket: WebSocket) {
    let (mut sender, receiver) = socket.split();

    // Registration happens after the upgrade so an abandoned handshake
    // never leaves a registry entry behind.
    let session = match IngestSession::accept(&ctx) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Refusing ingest session: {e}");
            let _ = sender.send(close_message(close_code::AGAIN, &e.to_string())).await;
            return;
        }
    };

    let frames = receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes))),
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                // Ping/pong are answered by the protocol layer.
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    let report = session.run(frames).await;

    match &report.reason {
        CloseReason::StartFailed(_) | CloseReason::EncoderExited(_) | CloseReason::FeedFailed(_) => {
            let _ = sender
                .send(close_message(close_code::ERROR, &report.reason.to_string()))
                .await;
        }
        CloseReason::ServerShutdown => {
            let _ = sender
                .send(close_message(close_code::AWAY, &report.reason.to_string()))
                .await;
        }
        CloseReason::ClientClosed | CloseReason::Transport(_) => {
            let _ = sender.close().await;
        }
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    let mut end = reason.len().min(MAX_CLOSE_REASON_BYTES);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    Message::Close(Some(CloseFrame {
        code,
        reason: reason[..end].to_string().into(),
    }))
}
