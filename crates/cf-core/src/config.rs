//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, storage, tools, live ingestion, VOD packaging
//! and URL signing. Every section defaults sensibly so a completely empty
//! `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::{Ladder, Rendition};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub live: LiveConfig,
    pub vod: VodConfig,
    pub signing: SigningConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration strictly: a missing file yields defaults, but an
    /// unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io { source: e }),
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.live.segment_duration_secs == 0 {
            warnings.push("live.segment_duration_secs is 0; ffmpeg will pick its default".into());
        }

        if self.live.list_size == 0 {
            warnings.push(
                "live.list_size is 0; the live playlist will keep every segment".into(),
            );
        }

        if self.live.max_sessions == 0 {
            warnings.push("live.max_sessions is 0; every ingest attempt will be refused".into());
        }

        if self.live.feed_buffer_bytes < 64 * 1024 {
            warnings.push(format!(
                "live.feed_buffer_bytes is {}; values below 64 KiB stall on ordinary frames",
                self.live.feed_buffer_bytes
            ));
        }

        if self.vod.ladder.len() > 8 {
            warnings.push(format!(
                "vod.ladder has {} renditions; each one is encoded in the same ffmpeg run",
                self.vod.ladder.len()
            ));
        }

        if self.signing.secret.as_deref().is_some_and(|s| s.len() < 16) {
            warnings.push("signing.secret is shorter than 16 bytes".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Absolute base used when building signed URLs (e.g. `https://cdn.example`).
    /// Relative URLs are returned when unset.
    pub public_base_url: Option<String>,
    /// Allowed CORS origins; any origin is allowed when empty.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
            public_base_url: None,
            cors_origins: Vec::new(),
        }
    }
}

/// Segment store location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root holding `live/`, `video/` and `.staging/`.
    pub root: PathBuf,
    /// Keep a live session's directory after the session ends.
    pub retain_live_sessions: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./uploads"),
            retain_live_sessions: true,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}

/// What the encoder supervisor does when an encoder stops draining its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for room up to the feed timeout, then fail the feed.
    #[default]
    Wait,
    /// Never wait: evict the oldest queued chunks to make room.
    DropOldest,
}

/// Live ingestion and low-latency encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// ffmpeg demuxer for the incoming byte stream.
    pub input_format: String,
    /// Target HLS segment length in seconds.
    pub segment_duration_secs: u32,
    /// Number of segments kept in the rolling live playlist.
    pub list_size: u32,
    /// Expected source frame rate, used to align keyframes with segments.
    pub fps: u32,
    pub preset: String,
    pub crf: u32,
    /// Optional output rendition; the source resolution is kept when unset.
    pub rendition: Option<Rendition>,
    /// Maximum number of concurrently registered sessions.
    pub max_sessions: usize,
    /// Byte budget of each session's encoder input queue.
    pub feed_buffer_bytes: usize,
    /// How long a feed may wait for queue space under [`BackpressurePolicy::Wait`].
    pub feed_timeout_ms: u64,
    pub backpressure: BackpressurePolicy,
    /// Grace period between SIGTERM and SIGKILL when stopping an encoder.
    /// After a client close the same period covers the EOF drain (first
    /// half) and the SIGTERM window (second half). Also used for VOD
    /// encoders stopped on timeout.
    pub stop_grace_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            input_format: "webm".into(),
            segment_duration_secs: 3,
            list_size: 8,
            fps: 30,
            preset: "ultrafast".into(),
            crf: 28,
            rendition: None,
            max_sessions: 32,
            feed_buffer_bytes: 8 * 1024 * 1024,
            feed_timeout_ms: 5_000,
            backpressure: BackpressurePolicy::Wait,
            stop_grace_secs: 5,
        }
    }
}

/// Pre-recorded upload packaging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VodConfig {
    pub segment_duration_secs: u32,
    pub ladder: Ladder,
    pub preset: String,
    pub crf: u32,
    /// Upper bound on a single packaging run.
    pub timeout_secs: u64,
    pub max_upload_bytes: u64,
    /// How long finished job records stay queryable.
    pub job_retention_secs: u64,
}

impl Default for VodConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 10,
            ladder: Ladder::default(),
            preset: "veryfast".into(),
            crf: 28,
            timeout_secs: 4 * 60 * 60,
            max_upload_bytes: 4 * 1024 * 1024 * 1024,
            job_retention_secs: 24 * 60 * 60,
        }
    }
}

/// Signed read URL settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// HMAC secret; signing is disabled when unset.
    pub secret: Option<String>,
    pub ttl_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: 15 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.storage.root, PathBuf::from("./uploads"));
        assert_eq!(cfg.live.input_format, "webm");
        assert_eq!(cfg.live.segment_duration_secs, 3);
        assert_eq!(cfg.live.list_size, 8);
        assert_eq!(cfg.live.backpressure, BackpressurePolicy::Wait);
        assert_eq!(cfg.vod.segment_duration_secs, 10);
        assert_eq!(cfg.vod.ladder.len(), 1);
        assert_eq!(cfg.signing.ttl_secs, 900);
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"server": {"port": 9090}, "live": {"backpressure": "drop_oldest"}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.live.backpressure, BackpressurePolicy::DropOldest);
        assert_eq!(cfg.live.list_size, 8);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert!(cfg.storage.retain_live_sessions);
        assert_eq!(cfg.vod.job_retention_secs, 24 * 60 * 60);
    }

    #[test]
    fn parse_vod_ladder() {
        let json = r#"{"vod": {"ladder": [
            {"width":1920,"height":1080,"video_bitrate_kbps":5000,"audio_bitrate_kbps":192},
            {"width":1280,"height":720,"video_bitrate_kbps":2800,"audio_bitrate_kbps":128},
            {"width":640,"height":360,"video_bitrate_kbps":800,"audio_bitrate_kbps":96}
        ]}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.vod.ladder.len(), 3);
        assert!(cfg.vod.ladder.is_multi());
    }

    #[test]
    fn empty_ladder_is_a_parse_error() {
        assert!(Config::from_json(r#"{"vod": {"ladder": []}}"#).is_err());
    }

    #[test]
    fn strict_load_of_missing_file_uses_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(cfg.server.port, 4000);
    }

    #[test]
    fn strict_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn zero_sessions_warns() {
        let mut cfg = Config::default();
        cfg.live.max_sessions = 0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("max_sessions")));
    }

    #[test]
    fn short_secret_warns() {
        let mut cfg = Config::default();
        cfg.signing.secret = Some("abc".into());
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("signing.secret")));
    }
}
