//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over a
//! temporary storage root with a shell-script encoder standing in for
//! ffmpeg, and serves the router on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cf_av::{CommandTemplate, EncoderCommand, ToolRegistry};
use cf_core::config::Config;
use cf_core::{AssetId, Ladder, SessionId};
use cf_server::context::AppContext;

/// Live encoder that writes a playlist and copies its stdin to `capture.bin`.
pub const LIVE_CAPTURE: &str =
    r#"printf '#EXTM3U\n#EXT-X-TARGETDURATION:3\n' > "$1/index.m3u8"; exec cat > "$1/capture.bin""#;

/// VOD encoder that copies the input into one segment per rendition, laid out
/// the way ffmpeg's HLS muxer would.
pub const VOD_COPY: &str = r#"
    in="$1"; out="$2"; n="$3"
    playlist='#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXTINF:10.0,\nsegment_000.ts\n#EXT-X-ENDLIST\n'
    if [ "$n" -eq 1 ]; then
        cat "$in" > "$out/segment_000.ts"
        printf "$playlist" > "$out/index.m3u8"
    else
        i=0
        while [ "$i" -lt "$n" ]; do
            mkdir -p "$out/v$i"
            cat "$in" > "$out/v$i/segment_000.ts"
            printf "$playlist" > "$out/v$i/index.m3u8"
            i=$((i + 1))
        done
    fi
"#;

/// [`CommandTemplate`] running shell scripts instead of ffmpeg.
///
/// Live scripts get the session directory as `$1`; VOD scripts get the
/// input, output directory and rendition count as `$1`..`$3`.
pub struct ShellTemplate {
    pub live: &'static str,
    pub vod: &'static str,
}

impl Default for ShellTemplate {
    fn default() -> Self {
        Self {
            live: LIVE_CAPTURE,
            vod: VOD_COPY,
        }
    }
}

impl CommandTemplate for ShellTemplate {
    fn live(&self, session_dir: &Path) -> cf_core::Result<EncoderCommand> {
        let mut cmd = EncoderCommand::new("sh");
        cmd.args(["-c", self.live, "sh"])
            .arg(session_dir.to_string_lossy().as_ref())
            .stdin_pipe();
        Ok(cmd)
    }

    fn vod(&self, input: &Path, output_dir: &Path, ladder: &Ladder) -> cf_core::Result<EncoderCommand> {
        let mut cmd = EncoderCommand::new("sh");
        cmd.args(["-c", self.vod, "sh"])
            .arg(input.to_string_lossy().as_ref())
            .arg(output_dir.to_string_lossy().as_ref())
            .arg(ladder.len().to_string());
        Ok(cmd)
    }
}

/// A running server over a temporary storage root.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    _root: tempfile::TempDir,
}

impl TestHarness {
    /// Default configuration and encoder scripts.
    pub async fn with_server() -> Self {
        Self::with_options(Config::default(), ShellTemplate::default()).await
    }

    /// Custom configuration with the default encoder scripts.
    pub async fn with_server_config(config: Config) -> Self {
        Self::with_options(config, ShellTemplate::default()).await
    }

    /// Custom configuration and encoder scripts. `storage.root` is always
    /// replaced with a fresh temporary directory.
    pub async fn with_options(mut config: Config, template: ShellTemplate) -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        config.storage.root = root.path().join("uploads");
        config.live.stop_grace_secs = 2;

        let template: Arc<dyn CommandTemplate> = Arc::new(template);
        let tools = Arc::new(ToolRegistry::with_tool("ffmpeg", "sh"));
        let ctx = AppContext::new(config, template, tools).expect("failed to build context");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let server_ctx = ctx.clone();
        tokio::spawn(async move {
            cf_server::serve(listener, server_ctx, std::future::pending())
                .await
                .ok();
        });

        Self {
            ctx,
            addr,
            _root: root,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    /// Create a live session directory holding `file` without a running
    /// encoder, for serving tests.
    pub fn write_live_file(&self, id: SessionId, file: &str, contents: &[u8]) {
        let dir = self.ctx.store.live_dir(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), contents).unwrap();
    }

    /// Publish a single-rendition asset directly into the video store.
    pub fn publish_asset(&self, segment: &[u8]) -> AssetId {
        let id = AssetId::new();
        let dir = self.ctx.store.video_dir(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("index.m3u8"),
            "#EXTM3U\n#EXTINF:10.0,\nsegment_000.ts\n#EXT-X-ENDLIST\n",
        )
        .unwrap();
        std::fs::write(dir.join("segment_000.ts"), segment).unwrap();
        id
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default wait for asynchronous teardown and encoder output.
pub const WAIT: Duration = Duration::from_secs(5);

impl TestHarness {
    /// `GET /api/live/active`, returning the `streams` array.
    pub async fn active_streams(&self) -> Vec<serde_json::Value> {
        let json: serde_json::Value = reqwest::get(self.url("/api/live/active"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        json["streams"].as_array().cloned().unwrap_or_default()
    }

    /// Poll the active list until it has `count` entries.
    pub async fn wait_for_streams(&self, count: usize) -> Vec<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let streams = self.active_streams().await;
            if streams.len() == count || tokio::time::Instant::now() >= deadline {
                return streams;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll the registry until it holds `count` sessions.
    pub async fn wait_for_sessions(&self, count: usize) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.ctx.registry.len() != count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        true
    }
}

/// Poll until the file at `path` is exactly `len` bytes long.
pub async fn wait_for_file_len(path: &Path, len: u64) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if std::fs::metadata(path).map(|m| m.len()).unwrap_or(0) == len {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// 1000 bytes whose values follow their offsets.
pub fn segment_bytes() -> Vec<u8> {
    (0..1000u32).map(|i| (i % 256) as u8).collect()
}
