//! On-disk segment store.
//!
//! The store owns the storage root and its three areas:
//!
//! ```text
//! {root}/live/{sessionId}/index.m3u8, segment_NNN.ts
//! {root}/video/{assetId}/index.m3u8 (+ v{n}/index.m3u8, v{n}/segment_NNN.ts)
//! {root}/.staging/
//! ```
//!
//! The filesystem is the only source of truth for readiness: a live session
//! or VOD asset is playable exactly when its `index.m3u8` exists. Every path
//! derived from a request goes through [`SegmentStore::resolve_live`] or
//! [`SegmentStore::resolve_video`], which reject traversal.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use cf_av::LIVE_MANIFEST;
use cf_core::{AssetId, SessionId};

const LIVE_DIR: &str = "live";
const VIDEO_DIR: &str = "video";
const STAGING_DIR: &str = ".staging";

/// A published VOD asset, as listed by `GET /api/videos`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSummary {
    pub asset_id: AssetId,
    pub playlist_url: String,
    /// Number of variant playlists (`v{n}/`); 0 for single-rendition assets.
    pub variants: usize,
    pub size_bytes: u64,
    pub published_at: Option<DateTime<Utc>>,
}

/// Segment store rooted at a canonical directory.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    root: PathBuf,
}

impl SegmentStore {
    /// Create the directory layout under `root` and canonicalize it.
    ///
    /// # Errors
    ///
    /// Fails if any of the directories cannot be created. Callers treat this
    /// as fatal at startup.
    pub fn open(root: impl AsRef<Path>) -> cf_core::Result<Self> {
        let root = root.as_ref();
        for dir in [LIVE_DIR, VIDEO_DIR, STAGING_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        let root = root.canonicalize()?;
        tracing::debug!("Segment store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn live_root(&self) -> PathBuf {
        self.root.join(LIVE_DIR)
    }

    pub fn video_root(&self) -> PathBuf {
        self.root.join(VIDEO_DIR)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn live_dir(&self, id: SessionId) -> PathBuf {
        self.live_root().join(id.to_string())
    }

    pub fn video_dir(&self, id: AssetId) -> PathBuf {
        self.video_root().join(id.to_string())
    }

    /// Create a fresh live session directory.
    ///
    /// Uses `create_dir`, not `create_dir_all`, so two sessions can never
    /// share a directory.
    pub async fn create_live_dir(&self, id: SessionId) -> cf_core::Result<PathBuf> {
        let dir = self.live_dir(id);
        tokio::fs::create_dir(&dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                cf_core::Error::Internal(format!(
                    "session directory {} already exists",
                    dir.display()
                ))
            } else {
                cf_core::Error::Io { source: e }
            }
        })?;
        Ok(dir)
    }

    /// Whether the session's live playlist has been written yet.
    pub async fn live_manifest_exists(&self, id: SessionId) -> bool {
        tokio::fs::try_exists(self.live_dir(id).join(LIVE_MANIFEST))
            .await
            .unwrap_or(false)
    }

    /// Remove a live session directory and everything in it.
    pub async fn remove_live_dir(&self, id: SessionId) -> cf_core::Result<()> {
        match tokio::fs::remove_dir_all(self.live_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve `{root}/live/{session}/{file}` for serving.
    ///
    /// # Errors
    ///
    /// - 404 if `session` is not a valid session id or the file is missing.
    /// - 400 if `file` is not a plain relative path inside the session.
    pub async fn resolve_live(&self, session: &str, file: &str) -> cf_core::Result<PathBuf> {
        let id: SessionId = session
            .parse()
            .map_err(|_| cf_core::Error::not_found("stream", session))?;
        resolve_within(&self.live_dir(id), file).await
    }

    /// Resolve `{root}/video/{asset}/{file}` for serving.
    pub async fn resolve_video(&self, asset: &str, file: &str) -> cf_core::Result<PathBuf> {
        let id: AssetId = asset
            .parse()
            .map_err(|_| cf_core::Error::not_found("video", asset))?;
        resolve_within(&self.video_dir(id), file).await
    }

    /// Resolve a store-relative video path such as `{assetId}/v0/index.m3u8`.
    pub async fn resolve_video_path(&self, path: &str) -> cf_core::Result<PathBuf> {
        let (asset, file) = path
            .trim_start_matches('/')
            .split_once('/')
            .ok_or_else(|| cf_core::Error::Validation(format!("invalid video path '{path}'")))?;
        self.resolve_video(asset, file).await
    }

    /// A scratch directory under `.staging/`, removed when dropped.
    pub fn staging_dir(&self, prefix: &str) -> cf_core::Result<tempfile::TempDir> {
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(self.staging_root())?)
    }

    /// Atomically move a fully built asset directory into `video/`.
    ///
    /// `staged` must live under `.staging/` so the rename stays on one
    /// filesystem.
    pub async fn publish(&self, staged: &Path, id: AssetId) -> cf_core::Result<PathBuf> {
        let target = self.video_dir(id);
        if tokio::fs::try_exists(&target).await? {
            return Err(cf_core::Error::Internal(format!(
                "asset {id} is already published"
            )));
        }
        tokio::fs::rename(staged, &target).await?;
        tracing::info!(asset_id = %id, "Published asset to {}", target.display());
        Ok(target)
    }

    /// Verify the live area accepts new files.
    pub async fn check_writable(&self) -> cf_core::Result<()> {
        let live_root = self.live_root();
        let written = tokio::task::spawn_blocking(move || {
            tempfile::NamedTempFile::new_in(live_root).map(drop)
        })
        .await
        .map_err(|e| cf_core::Error::Internal(format!("writability check panicked: {e}")))?;

        written.map_err(|e| {
            cf_core::Error::Unavailable(format!(
                "storage root {} is not writable: {e}",
                self.root.display()
            ))
        })
    }

    /// List published assets that have a manifest, newest first.
    pub async fn list_assets(&self) -> cf_core::Result<Vec<AssetSummary>> {
        let video_root = self.video_root();
        tokio::task::spawn_blocking(move || scan_assets(&video_root))
            .await
            .map_err(|e| cf_core::Error::Internal(format!("asset scan panicked: {e}")))
    }
}

fn scan_assets(video_root: &Path) -> Vec<AssetSummary> {
    let mut assets: Vec<AssetSummary> = walkdir::WalkDir::new(video_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .filter_map(|entry| {
            let asset_id: AssetId = entry.file_name().to_str()?.parse().ok()?;
            let dir = entry.path();
            if !dir.join(LIVE_MANIFEST).is_file() {
                return None;
            }

            let mut variants = 0;
            let mut size_bytes = 0;
            for file in walkdir::WalkDir::new(dir).into_iter().filter_map(Result::ok) {
                if file.depth() == 1 && file.file_type().is_dir() {
                    variants += 1;
                } else if file.file_type().is_file() {
                    size_bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }

            let published_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            Some(AssetSummary {
                asset_id,
                playlist_url: format!("/stream/{asset_id}/{LIVE_MANIFEST}"),
                variants,
                size_bytes,
                published_at,
            })
        })
        .collect();

    // v7 ids sort by creation time.
    assets.sort_by(|a, b| b.asset_id.cmp(&a.asset_id));
    assets
}

/// Join `file` onto `base`, rejecting anything that could escape it.
async fn resolve_within(base: &Path, file: &str) -> cf_core::Result<PathBuf> {
    let relative = plain_relative_path(file)?;
    let candidate = base.join(&relative);

    let not_found = || cf_core::Error::not_found("file", file);
    let canonical_base = tokio::fs::canonicalize(base).await.map_err(|_| not_found())?;
    let canonical = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|_| not_found())?;

    // Symlinks inside the session directory must not lead out of it.
    if !canonical.starts_with(&canonical_base) {
        return Err(cf_core::Error::Validation(format!(
            "path '{file}' escapes its directory"
        )));
    }
    if !canonical.is_file() {
        return Err(not_found());
    }
    Ok(canonical)
}

/// Accept only `name` or `dir/name` style paths made of normal components.
fn plain_relative_path(file: &str) -> cf_core::Result<PathBuf> {
    let invalid = || cf_core::Error::Validation(format!("invalid file path '{file}'"));

    if file.is_empty() || file.contains('\\') || file.contains('\0') {
        return Err(invalid());
    }

    let mut path = PathBuf::new();
    for segment in file.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == segment => path.push(name),
            _ => return Err(invalid()),
        }
    }
    Ok(path)
}
