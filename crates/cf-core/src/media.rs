//! Rendition ladder types shared by the encoder templates and the VOD
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// One quality variant: output resolution plus video/audio bitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rendition {
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in kbit/s.
    pub video_bitrate_kbps: u32,
    /// Target audio bitrate in kbit/s.
    pub audio_bitrate_kbps: u32,
}

impl Rendition {
    pub const fn new(width: u32, height: u32, video_kbps: u32, audio_kbps: u32) -> Self {
        Self {
            width,
            height,
            video_bitrate_kbps: video_kbps,
            audio_bitrate_kbps: audio_kbps,
        }
    }

    /// Peak bandwidth advertised in a master playlist, in bits per second.
    pub fn bandwidth(&self) -> u64 {
        (u64::from(self.video_bitrate_kbps) + u64::from(self.audio_bitrate_kbps)) * 1000
    }

    /// `WIDTHxHEIGHT`, the form used by both ffmpeg and `#EXT-X-STREAM-INF`.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Validation(format!(
                "rendition resolution {} must be non-zero",
                self.resolution()
            )));
        }
        // libx264 with yuv420p rejects odd dimensions.
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(Error::Validation(format!(
                "rendition resolution {} must have even dimensions",
                self.resolution()
            )));
        }
        if self.video_bitrate_kbps == 0 || self.audio_bitrate_kbps == 0 {
            return Err(Error::Validation(format!(
                "rendition {} must have non-zero bitrates",
                self.resolution()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}:{}k:{}k",
            self.width, self.height, self.video_bitrate_kbps, self.audio_bitrate_kbps
        )
    }
}

/// Parses `WIDTHxHEIGHT:VIDEO[k]:AUDIO[k]`, e.g. `1280x720:2800k:128k`.
impl FromStr for Rendition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            Error::Validation(format!(
                "invalid rendition '{s}', expected WIDTHxHEIGHT:VIDEOk:AUDIOk"
            ))
        };

        let mut parts = s.trim().split(':');
        let (res, video, audio) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(r), Some(v), Some(a), None) => (r, v, a),
            _ => return Err(invalid()),
        };

        let (w, h) = res.split_once(['x', 'X']).ok_or_else(invalid)?;
        let kbps = |v: &str| -> Result<u32, Error> {
            v.trim_end_matches(['k', 'K']).parse().map_err(|_| invalid())
        };

        let rendition = Rendition {
            width: w.parse().map_err(|_| invalid())?,
            height: h.parse().map_err(|_| invalid())?,
            video_bitrate_kbps: kbps(video)?,
            audio_bitrate_kbps: kbps(audio)?,
        };
        rendition.validate()?;
        Ok(rendition)
    }
}

/// A non-empty, ordered set of renditions for one encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Rendition>", into = "Vec<Rendition>")]
pub struct Ladder(Vec<Rendition>);

impl Ladder {
    /// Build a ladder, rejecting empty lists and invalid renditions.
    pub fn new(renditions: Vec<Rendition>) -> crate::Result<Self> {
        if renditions.is_empty() {
            return Err(Error::Validation("rendition ladder is empty".into()));
        }
        for r in &renditions {
            r.validate()?;
        }
        Ok(Self(renditions))
    }

    /// A ladder holding exactly one rendition.
    pub fn single(rendition: Rendition) -> Self {
        Self(vec![rendition])
    }

    /// Whether this ladder needs a variant stream map and master playlist.
    pub fn is_multi(&self) -> bool {
        self.0.len() > 1
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rendition> {
        self.0.iter()
    }

    pub fn renditions(&self) -> &[Rendition] {
        &self.0
    }
}

impl Default for Ladder {
    /// The single 720p rendition the upload path has always produced.
    fn default() -> Self {
        Self::single(Rendition::new(1280, 720, 2800, 96))
    }
}

impl TryFrom<Vec<Rendition>> for Ladder {
    type Error = Error;

    fn try_from(value: Vec<Rendition>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Ladder> for Vec<Rendition> {
    fn from(ladder: Ladder) -> Self {
        ladder.0
    }
}

impl<'a> IntoIterator for &'a Ladder {
    type Item = &'a Rendition;
    type IntoIter = std::slice::Iter<'a, Rendition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
