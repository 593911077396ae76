//! Live ingestion sessions.
//!
//! One [`IngestSession`] per connection drives the state machine
//!
//! ```text
//! Connecting -> Naming -> Encoding -> Closing -> Terminated
//! ```
//!
//! against a transport-neutral stream of [`Frame`]s. The first frame may be a
//! JSON control object naming the stream; anything else, including every
//! later frame, is forwarded verbatim to the session's encoder. The session
//! directory and encoder are created exactly once, on the first frame.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cf_av::{CommandTemplate, EncoderExit, EncoderProcess, SupervisorOptions};
use cf_core::SessionId;

use crate::context::AppContext;
use crate::registry::{LiveEntry, LiveRegistry, DEFAULT_STREAM_NAME};
use crate::store::SegmentStore;

/// Maximum accepted length of a stream name, in characters.
const MAX_NAME_CHARS: usize = 200;

/// One message received from the ingest transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Frame::Text(text) => Bytes::from(text),
            Frame::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Naming,
    Encoding,
    Closing,
    Terminated,
}

/// Why a session left the `Encoding` (or `Naming`) state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the client.
    ClientClosed,
    /// The transport reported an error.
    Transport(String),
    /// The encoder exited on its own.
    EncoderExited(EncoderExit),
    /// Forwarding a frame to the encoder failed.
    FeedFailed(String),
    /// The session directory or encoder could not be created.
    StartFailed(String),
    /// The server is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// Whether the server side ended the session with an error.
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            CloseReason::ClientClosed | CloseReason::Transport(_) | CloseReason::ServerShutdown
        )
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed the connection"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
            CloseReason::EncoderExited(exit) => write!(f, "encoder exited with {exit}"),
            CloseReason::FeedFailed(e) => write!(f, "encoder input failed: {e}"),
            CloseReason::StartFailed(e) => write!(f, "failed to start: {e}"),
            CloseReason::ServerShutdown => write!(f, "server shutting down"),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub id: SessionId,
    pub name: String,
    pub state: SessionState,
    pub reason: CloseReason,
    /// Bytes handed to the encoder, including the first frame when it was media.
    pub bytes_forwarded: u64,
    /// Queued bytes evicted under the drop-oldest policy.
    pub bytes_dropped: u64,
    /// Background encoder shutdown; resolves once the process has been reaped
    /// and, if configured, its directory removed.
    pub cleanup: Option<JoinHandle<EncoderExit>>,
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    name: String,
}

/// Extract the stream name from a control frame.
///
/// Returns `None` for anything that is not a JSON object with a non-empty
/// string `name`; such frames are treated as media.
pub fn parse_control(payload: &[u8]) -> Option<String> {
    let payload = payload.trim_ascii();
    if !payload.starts_with(b"{") {
        return None;
    }
    let control: ControlMessage = serde_json::from_slice(payload).ok()?;
    let name = control.name.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.chars().take(MAX_NAME_CHARS).collect())
}

/// A single ingest connection.
pub struct IngestSession {
    id: SessionId,
    name: String,
    state: SessionState,
    store: Arc<SegmentStore>,
    registry: Arc<LiveRegistry>,
    template: Arc<dyn CommandTemplate>,
    options: SupervisorOptions,
    retain_dirs: bool,
    shutdown: CancellationToken,
}

impl IngestSession {
    /// Register a new session, moving it to `Naming`.
    ///
    /// # Errors
    ///
    /// Returns [`cf_core::Error::Unavailable`] when `live.max_sessions` are
    /// already registered.
    pub fn accept(ctx: &AppContext) -> cf_core::Result<Self> {
        let id = SessionId::new();
        ctx.registry
            .try_register(LiveEntry::new(id), ctx.config.live.max_sessions)?;

        tracing::info!(session_id = %id, "Ingest session accepted");

        Ok(Self {
            id,
            name: DEFAULT_STREAM_NAME.to_string(),
            state: SessionState::Naming,
            store: ctx.store.clone(),
            registry: ctx.registry.clone(),
            template: ctx.template.clone(),
            options: ctx.supervisor_options(),
            retain_dirs: ctx.config.storage.retain_live_sessions,
            shutdown: ctx.shutdown.clone(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the transport closes or the encoder dies.
    ///
    /// Always returns with the session in `Terminated` and removed from the
    /// registry.
    pub async fn run<S, E>(mut self, frames: S) -> SessionReport
    where
        S: Stream<Item = Result<Frame, E>>,
        E: std::fmt::Display,
    {
        let mut frames = std::pin::pin!(frames);
        let mut forwarded: u64 = 0;

        let first = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CloseReason::ServerShutdown),
            frame = frames.next() => match frame {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(e)) => Err(CloseReason::Transport(e.to_string())),
                None => Err(CloseReason::ClientClosed),
            },
        };
        let first = match first {
            Ok(frame) => frame,
            Err(reason) => return self.finish(reason, None, 0),
        };

        let pending = match parse_control(first.as_bytes()) {
            Some(name) => {
                tracing::info!(session_id = %self.id, "Stream named {name:?}");
                self.registry.rename(self.id, name.clone());
                self.name = name;
                None
            }
            None => Some(first.into_bytes()),
        };

        let encoder = match self.start_encoder().await {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::error!(session_id = %self.id, "Failed to start session: {e}");
                return self.finish(CloseReason::StartFailed(e.to_string()), None, 0);
            }
        };
        self.state = SessionState::Encoding;

        if let Some(bytes) = pending {
            let len = bytes.len() as u64;
            if let Err(e) = self.forward(&encoder, bytes).await {
                return self.finish(CloseReason::FeedFailed(e.to_string()), Some(encoder), 0);
            }
            forwarded += len;
        }

        let reason = loop {
            tokio::select! {
                biased;
                exit = encoder.on_exit() => break CloseReason::EncoderExited(exit),
                _ = self.shutdown.cancelled() => break CloseReason::ServerShutdown,
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => {
                        let bytes = frame.into_bytes();
                        let len = bytes.len() as u64;
                        if let Err(e) = self.forward(&encoder, bytes).await {
                            break CloseReason::FeedFailed(e.to_string());
                        }
                        forwarded += len;
                    }
                    Some(Err(e)) => break CloseReason::Transport(e.to_string()),
                    None => break CloseReason::ClientClosed,
                },
            }
        };

        self.finish(reason, Some(encoder), forwarded)
    }

    async fn start_encoder(&self) -> cf_core::Result<EncoderProcess> {
        let dir = self.store.create_live_dir(self.id).await?;
        let started = self.template.live(&dir).and_then(|command| {
            EncoderProcess::spawn(self.id.to_string(), &command, &self.options)
        });
        if started.is_err() {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                tracing::debug!(session_id = %self.id, "Failed to remove session dir: {e}");
            }
        }
        started
    }

    async fn forward(&self, encoder: &EncoderProcess, bytes: Bytes) -> cf_core::Result<()> {
        let evicted = encoder.feed(bytes).await?;
        if evicted > 0 {
            tracing::warn!(
                session_id = %self.id,
                evicted,
                "Encoder input full; dropped oldest queued bytes"
            );
        }
        Ok(())
    }

    /// `Closing -> Terminated`: deregister synchronously, end the encoder in
    /// the background.
    fn finish(
        mut self,
        reason: CloseReason,
        encoder: Option<EncoderProcess>,
        bytes_forwarded: u64,
    ) -> SessionReport {
        self.state = SessionState::Closing;
        self.registry.remove(self.id);

        if reason.is_error() {
            tracing::warn!(session_id = %self.id, name = %self.name, "Session closing: {reason}");
        } else {
            tracing::info!(session_id = %self.id, name = %self.name, "Session closing: {reason}");
        }

        // A client that went away gets its queued input encoded. The encoder
        // sees EOF and may finish on its own during the first half of the
        // grace period; the second half is the SIGTERM to SIGKILL window.
        let drain = matches!(reason, CloseReason::ClientClosed | CloseReason::Transport(_));
        let bytes_dropped = encoder.as_ref().map_or(0, EncoderProcess::dropped_input_bytes);
        let cleanup = encoder.map(|encoder| {
            if drain {
                encoder.close_input();
            } else {
                encoder.request_stop();
            }
            let store = self.store.clone();
            let id = self.id;
            let retain = self.retain_dirs;
            let grace = self.options.stop_grace;
            tokio::spawn(async move {
                let exit = if drain {
                    let eof_window = grace / 2;
                    match tokio::time::timeout(eof_window, encoder.on_exit()).await {
                        Ok(exit) => exit,
                        Err(_) => {
                            tracing::debug!(session_id = %id, "Encoder still running after EOF; stopping");
                            encoder.request_stop_within(grace.saturating_sub(eof_window));
                            encoder.on_exit().await
                        }
                    }
                } else {
                    encoder.on_exit().await
                };
                if !retain {
                    if let Err(e) = store.remove_live_dir(id).await {
                        tracing::warn!(session_id = %id, "Failed to remove session dir: {e}");
                    }
                }
                tracing::debug!(session_id = %id, "Session cleanup finished");
                exit
            })
        });

        self.state = SessionState::Terminated;
        tracing::info!(
            session_id = %self.id,
            bytes_forwarded,
            bytes_dropped,
            "Session terminated"
        );

        SessionReport {
            id: self.id,
            name: self.name,
            state: self.state,
            reason,
            bytes_forwarded,
            bytes_dropped,
            cleanup,
        }
    }
}
