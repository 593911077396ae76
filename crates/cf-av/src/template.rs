//! Encoder argument templates.
//!
//! A [`CommandTemplate`] turns a session directory (live) or an input file
//! plus ladder (VOD) into a concrete [`EncoderCommand`]. [`FfmpegTemplate`]
//! is the production implementation; tests provide shell-script templates.

use std::path::{Path, PathBuf};

use cf_core::config::{Config, LiveConfig, VodConfig};
use cf_core::{Ladder, Rendition};

use crate::encoder::EncoderCommand;
use crate::tools::ToolRegistry;

/// Live media playlist written into each session directory.
pub const LIVE_MANIFEST: &str = "index.m3u8";
/// ffmpeg segment filename pattern, yielding `segment_000.ts`, `segment_001.ts`, ...
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// Builds encoder command lines for live sessions and VOD jobs.
pub trait CommandTemplate: Send + Sync {
    /// Command reading live media from stdin and writing a rolling HLS
    /// playlist plus segments into `session_dir`.
    fn live(&self, session_dir: &Path) -> cf_core::Result<EncoderCommand>;

    /// Command packaging `input` into `output_dir`.
    ///
    /// A single-rendition ladder writes `index.m3u8` and its segments directly
    /// into `output_dir`; a multi-rendition ladder writes `v{n}/index.m3u8`
    /// and `v{n}/segment_NNN.ts` per variant and leaves the master playlist
    /// to the caller. Building the command touches no files; the caller
    /// checks the input and creates `output_dir` and its `v{n}/` directories.
    fn vod(&self, input: &Path, output_dir: &Path, ladder: &Ladder)
        -> cf_core::Result<EncoderCommand>;
}

/// The real ffmpeg / libx264 / AAC command lines.
#[derive(Debug, Clone)]
pub struct FfmpegTemplate {
    ffmpeg: PathBuf,
    live: LiveConfig,
    vod: VodConfig,
}

impl FfmpegTemplate {
    pub fn new(ffmpeg: impl Into<PathBuf>, live: LiveConfig, vod: VodConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            live,
            vod,
        }
    }

    /// Build from the application config, using the discovered ffmpeg.
    ///
    /// A missing ffmpeg is not fatal here: the bare program name is used and
    /// every spawn then fails with a descriptive encoder error.
    pub fn from_config(config: &Config, tools: &ToolRegistry) -> Self {
        let ffmpeg = match tools.require("ffmpeg") {
            Ok(path) => path.to_path_buf(),
            Err(e) => {
                tracing::warn!("{e}; encoders will fail to start");
                PathBuf::from("ffmpeg")
            }
        };
        Self::new(ffmpeg, config.live.clone(), config.vod.clone())
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    fn base_command(&self) -> EncoderCommand {
        let mut cmd = EncoderCommand::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostats", "-loglevel", "info"]);
        cmd
    }

    fn single_vod_args(&self, cmd: &mut EncoderCommand, output_dir: &Path, r: &Rendition) {
        cmd.args(["-vf", &scale_filter(r)]);
        cmd.args(["-c:v", "libx264", "-preset", &self.vod.preset]);
        cmd.args(["-crf", &self.vod.crf.to_string()]);
        cmd.args(["-maxrate", &kbps(r.video_bitrate_kbps)]);
        cmd.args(["-bufsize", &kbps(r.video_bitrate_kbps * 2)]);
        cmd.args(["-c:a", "aac", "-b:a", &kbps(r.audio_bitrate_kbps), "-ac", "2"]);
        self.vod_hls_args(cmd);
        cmd.args([
            "-hls_segment_filename",
            &path_arg(&output_dir.join(SEGMENT_PATTERN)),
        ]);
        cmd.arg(path_arg(&output_dir.join(LIVE_MANIFEST)));
    }

    fn multi_vod_args(&self, cmd: &mut EncoderCommand, output_dir: &Path, ladder: &Ladder) {
        let n = ladder.len();

        // [0:v]split=3[s0][s1][s2];[s0]scale=w=1920:h=1080[o0];...
        let mut graph = format!("[0:v]split={n}");
        for i in 0..n {
            graph.push_str(&format!("[s{i}]"));
        }
        for (i, r) in ladder.iter().enumerate() {
            graph.push_str(&format!(";[s{i}]{}[o{i}]", scale_filter(r)));
        }
        cmd.args(["-filter_complex", &graph]);

        for (i, r) in ladder.iter().enumerate() {
            cmd.args(["-map", &format!("[o{i}]")]);
            cmd.args([format!("-c:v:{i}"), "libx264".to_string()]);
            cmd.args([format!("-crf:v:{i}"), self.vod.crf.to_string()]);
            cmd.args([format!("-maxrate:v:{i}"), kbps(r.video_bitrate_kbps)]);
            cmd.args([format!("-bufsize:v:{i}"), kbps(r.video_bitrate_kbps * 2)]);
        }
        for (i, r) in ladder.iter().enumerate() {
            cmd.args(["-map", "0:a:0"]);
            cmd.args([format!("-c:a:{i}"), "aac".to_string()]);
            cmd.args([format!("-b:a:{i}"), kbps(r.audio_bitrate_kbps)]);
        }
        cmd.args(["-preset", &self.vod.preset, "-ac", "2"]);

        self.vod_hls_args(cmd);

        let stream_map = (0..n)
            .map(|i| format!("v:{i},a:{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        cmd.args(["-var_stream_map", &stream_map]);
        cmd.args([
            "-hls_segment_filename",
            &path_arg(&output_dir.join("v%v").join(SEGMENT_PATTERN)),
        ]);
        cmd.arg(path_arg(&output_dir.join("v%v").join(LIVE_MANIFEST)));
    }

    fn vod_hls_args(&self, cmd: &mut EncoderCommand) {
        let seg = self.vod.segment_duration_secs;
        // Align keyframes with segment boundaries so every variant cuts alike.
        cmd.args([
            "-force_key_frames",
            &format!("expr:gte(t,n_forced*{seg})"),
            "-sc_threshold",
            "0",
        ]);
        cmd.args(["-f", "hls", "-hls_time", &seg.to_string()]);
        cmd.args(["-hls_playlist_type", "vod"]);
    }
}

impl CommandTemplate for FfmpegTemplate {
    fn live(&self, session_dir: &Path) -> cf_core::Result<EncoderCommand> {
        let live = &self.live;
        let gop = live.fps.max(1) * live.segment_duration_secs.max(1);

        let mut cmd = self.base_command();
        cmd.stdin_pipe();
        cmd.args(["-f", &live.input_format, "-i", "pipe:0"]);
        cmd.args(["-c:v", "libx264", "-preset", &live.preset]);
        cmd.args(["-tune", "zerolatency", "-crf", &live.crf.to_string()]);
        cmd.args(["-g", &gop.to_string(), "-sc_threshold", "0"]);
        if let Some(r) = &live.rendition {
            cmd.args(["-vf", &scale_filter(r)]);
            cmd.args(["-maxrate", &kbps(r.video_bitrate_kbps)]);
            cmd.args(["-bufsize", &kbps(r.video_bitrate_kbps * 2)]);
        }
        cmd.args(["-c:a", "aac"]);
        if let Some(r) = &live.rendition {
            cmd.args(["-b:a", &kbps(r.audio_bitrate_kbps)]);
        }
        cmd.args(["-fflags", "+genpts"]);
        cmd.args(["-f", "hls"]);
        cmd.args(["-hls_time", &live.segment_duration_secs.to_string()]);
        cmd.args(["-hls_list_size", &live.list_size.to_string()]);
        cmd.args([
            "-hls_flags",
            "delete_segments+append_list+independent_segments+temp_file",
        ]);
        cmd.args([
            "-hls_segment_filename",
            &path_arg(&session_dir.join(SEGMENT_PATTERN)),
        ]);
        cmd.arg(path_arg(&session_dir.join(LIVE_MANIFEST)));
        Ok(cmd)
    }

    fn vod(
        &self,
        input: &Path,
        output_dir: &Path,
        ladder: &Ladder,
    ) -> cf_core::Result<EncoderCommand> {
        let mut cmd = self.base_command();
        cmd.args(["-y", "-i"]);
        cmd.arg(path_arg(input));

        match ladder.renditions() {
            [single] => self.single_vod_args(&mut cmd, output_dir, single),
            _ => self.multi_vod_args(&mut cmd, output_dir, ladder),
        }
        Ok(cmd)
    }
}

fn scale_filter(r: &Rendition) -> String {
    format!("scale=w={}:h={}", r.width, r.height)
}

fn kbps(value: u32) -> String {
    format!("{value}k")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> FfmpegTemplate {
        FfmpegTemplate::new("/usr/bin/ffmpeg", LiveConfig::default(), VodConfig::default())
    }

    /// Value following `flag` in an argument list.
    fn value_of<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn live_command_reads_stdin_and_writes_rolling_playlist() {
        let cmd = template().live(Path::new("/data/live/abc")).unwrap();
        let args = cmd.get_args();

        assert!(cmd.uses_stdin());
        assert_eq!(cmd.program(), Path::new("/usr/bin/ffmpeg"));
        assert_eq!(value_of(args, "-i"), Some("pipe:0"));
        assert_eq!(value_of(args, "-f"), Some("webm"));
        assert_eq!(value_of(args, "-tune"), Some("zerolatency"));
        assert_eq!(value_of(args, "-g"), Some("90"));
        assert_eq!(value_of(args, "-hls_time"), Some("3"));
        assert_eq!(value_of(args, "-hls_list_size"), Some("8"));
        assert_eq!(
            value_of(args, "-hls_flags"),
            Some("delete_segments+append_list+independent_segments+temp_file")
        );
        assert_eq!(
            value_of(args, "-hls_segment_filename"),
            Some("/data/live/abc/segment_%03d.ts")
        );
        assert_eq!(args.last().unwrap(), "/data/live/abc/index.m3u8");
        assert!(!args.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn live_rendition_adds_scaling_and_caps() {
        let live = LiveConfig {
            rendition: Some(Rendition::new(854, 480, 1200, 96)),
            ..LiveConfig::default()
        };
        let t = FfmpegTemplate::new("ffmpeg", live, VodConfig::default());
        let cmd = t.live(Path::new("/tmp/s")).unwrap();
        let args = cmd.get_args();
        assert_eq!(value_of(args, "-vf"), Some("scale=w=854:h=480"));
        assert_eq!(value_of(args, "-maxrate"), Some("1200k"));
        assert_eq!(value_of(args, "-b:a"), Some("96k"));
    }

    #[test]
    fn single_rendition_vod_writes_one_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"fake").unwrap();
        let out = dir.path().join("out");

        let cmd = template().vod(&input, &out, &Ladder::default()).unwrap();
        let args = cmd.get_args();

        assert!(!cmd.uses_stdin());
        assert_eq!(value_of(args, "-i"), Some(input.to_str().unwrap()));
        assert_eq!(value_of(args, "-vf"), Some("scale=w=1280:h=720"));
        assert_eq!(value_of(args, "-maxrate"), Some("2800k"));
        assert_eq!(value_of(args, "-b:a"), Some("96k"));
        assert_eq!(value_of(args, "-hls_time"), Some("10"));
        assert_eq!(value_of(args, "-hls_playlist_type"), Some("vod"));
        assert!(!args.iter().any(|a| a == "-var_stream_map"));
        assert_eq!(
            args.last().unwrap(),
            out.join("index.m3u8").to_str().unwrap()
        );
    }

    #[test]
    fn multi_rendition_vod_uses_variant_stream_map() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"fake").unwrap();
        let out = dir.path().join("out");
        let ladder = Ladder::new(vec![
            Rendition::new(1920, 1080, 5000, 192),
            Rendition::new(1280, 720, 2800, 128),
            Rendition::new(640, 360, 800, 96),
        ])
        .unwrap();

        let cmd = template().vod(&input, &out, &ladder).unwrap();
        let args = cmd.get_args();

        assert_eq!(
            value_of(args, "-filter_complex"),
            Some(
                "[0:v]split=3[s0][s1][s2];[s0]scale=w=1920:h=1080[o0];\
                 [s1]scale=w=1280:h=720[o1];[s2]scale=w=640:h=360[o2]"
            )
        );
        assert_eq!(
            value_of(args, "-var_stream_map"),
            Some("v:0,a:0 v:1,a:1 v:2,a:2")
        );
        assert_eq!(value_of(args, "-maxrate:v:2"), Some("800k"));
        assert_eq!(value_of(args, "-b:a:0"), Some("192k"));
        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 6);
        assert_eq!(
            args.last().unwrap(),
            out.join("v%v").join("index.m3u8").to_str().unwrap()
        );
        assert!(!out.exists());
    }
}
