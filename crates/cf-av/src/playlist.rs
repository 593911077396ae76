//! Master playlist generation for multi-rendition VOD assets.
//!
//! ffmpeg writes the per-variant media playlists; the master is written here
//! so its content depends only on the ladder.

use std::fmt::Write;

use cf_core::Ladder;

/// Directory holding variant `index` inside a multi-rendition asset.
pub fn variant_dir(index: usize) -> String {
    format!("v{index}")
}

/// Media playlist URI of variant `index`, relative to the master.
pub fn variant_uri(index: usize) -> String {
    format!("{}/index.m3u8", variant_dir(index))
}

/// Generate a master playlist listing every rendition of `ladder`.
///
/// Variants appear in ladder order, each with its `BANDWIDTH` and
/// `RESOLUTION`, pointing at `v{n}/index.m3u8`.
pub fn master_playlist(ladder: &Ladder) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-VERSION:3");

    for (index, rendition) in ladder.iter().enumerate() {
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}",
            rendition.bandwidth(),
            rendition.resolution()
        );
        let _ = writeln!(out, "{}", variant_uri(index));
    }

    out
}

/// URIs of the variant playlists referenced by a master playlist.
pub fn variant_uris(master: &str) -> Vec<String> {
    let mut uris = Vec::new();
    let mut expect_uri = false;
    for line in master.lines().map(str::trim) {
        if line.starts_with("#EXT-X-STREAM-INF") {
            expect_uri = true;
        } else if expect_uri && !line.is_empty() && !line.starts_with('#') {
            uris.push(line.to_string());
            expect_uri = false;
        }
    }
    uris
}
