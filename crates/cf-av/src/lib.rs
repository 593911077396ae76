//! # cf-av
//!
//! Encoder process management for castforge.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to ffmpeg.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for short one-shot invocations.
//! - **Encoder supervision** ([`EncoderProcess`]) -- long-running encoders
//!   with a bounded input queue, exit signal and graceful stop.
//! - **Argument templates** ([`CommandTemplate`], [`FfmpegTemplate`]) -- the
//!   live and VOD command lines.
//! - **Playlists** ([`playlist`]) -- master playlist generation for
//!   multi-rendition assets.

pub mod command;
pub mod encoder;
pub mod feed;
pub mod playlist;
pub mod template;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use encoder::{EncoderCommand, EncoderExit, EncoderProcess, SupervisorOptions};
pub use feed::FeedQueue;
pub use template::{CommandTemplate, FfmpegTemplate, LIVE_MANIFEST, SEGMENT_PATTERN};
pub use tools::{ToolInfo, ToolRegistry};
