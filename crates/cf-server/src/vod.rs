//! VOD packaging orchestrator.
//!
//! Packages one input file into an HLS asset: a single encoder run (with a
//! variant stream map when the ladder has several rungs) into a staging
//! directory, a master playlist for multi-rendition output, then a single
//! rename into `video/{assetId}`. A failed or timed-out run leaves nothing
//! behind: the staging directory is a [`tempfile::TempDir`] and is removed
//! on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cf_av::{playlist, CommandTemplate, EncoderProcess, SupervisorOptions, LIVE_MANIFEST};
use cf_core::{AssetId, JobId, Ladder};

use crate::jobs::JobTable;
use crate::store::SegmentStore;

/// Result of a successful packaging run.
#[derive(Debug, Clone)]
pub struct PackageOutcome {
    pub asset_id: AssetId,
    /// Path of the published top-level `index.m3u8`.
    pub manifest: PathBuf,
    /// URL under which the manifest is served.
    pub playlist_url: String,
}

/// Runs packaging jobs against a segment store.
#[derive(Clone)]
pub struct VodPackager {
    store: Arc<SegmentStore>,
    template: Arc<dyn CommandTemplate>,
    options: SupervisorOptions,
    timeout: Duration,
}

impl VodPackager {
    pub fn new(
        store: Arc<SegmentStore>,
        template: Arc<dyn CommandTemplate>,
        options: SupervisorOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            template,
            options,
            timeout,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Package `input` with `ladder` into a new asset.
    pub async fn package(&self, input: &Path, ladder: &Ladder) -> cf_core::Result<PackageOutcome> {
        self.package_as(AssetId::new(), input, ladder).await
    }

    /// Package `input` under a caller-chosen asset id.
    pub async fn package_as(
        &self,
        asset_id: AssetId,
        input: &Path,
        ladder: &Ladder,
    ) -> cf_core::Result<PackageOutcome> {
        let label = format!("vod-{asset_id}");
        match tokio::fs::metadata(input).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(cf_core::Error::not_found("input file", input.display())),
        }

        let staging = self.store.staging_dir(&format!("{asset_id}-"))?;
        let out_dir = staging.path().join("asset");
        tokio::fs::create_dir(&out_dir).await?;
        if ladder.is_multi() {
            for i in 0..ladder.len() {
                tokio::fs::create_dir(out_dir.join(playlist::variant_dir(i))).await?;
            }
        }

        tracing::info!(
            asset_id = %asset_id,
            renditions = ladder.len(),
            "Packaging {}",
            input.display()
        );

        let command = self.template.vod(input, &out_dir, ladder)?;
        let encoder = EncoderProcess::spawn(label.clone(), &command, &self.options)?;

        let exit = match tokio::time::timeout(self.timeout, encoder.on_exit()).await {
            Ok(exit) => exit,
            Err(_) => {
                encoder.stop().await;
                return Err(cf_core::Error::encoder(
                    label,
                    format!("packaging timed out after {:?}", self.timeout),
                ));
            }
        };

        if !exit.success() {
            let message = match encoder.stderr_tail().pop() {
                Some(line) => format!("encoder failed with {exit}: {line}"),
                None => format!("encoder failed with {exit}"),
            };
            return Err(cf_core::Error::encoder(label, message));
        }

        if ladder.is_multi() {
            for i in 0..ladder.len() {
                let variant = out_dir.join(playlist::variant_uri(i));
                if !tokio::fs::try_exists(&variant).await.unwrap_or(false) {
                    return Err(cf_core::Error::encoder(
                        label,
                        format!("encoder did not write {}", playlist::variant_uri(i)),
                    ));
                }
            }
            tokio::fs::write(out_dir.join(LIVE_MANIFEST), playlist::master_playlist(ladder))
                .await?;
        } else if !tokio::fs::try_exists(out_dir.join(LIVE_MANIFEST))
            .await
            .unwrap_or(false)
        {
            return Err(cf_core::Error::encoder(
                label,
                format!("encoder did not write {LIVE_MANIFEST}"),
            ));
        }

        let published = self.store.publish(&out_dir, asset_id).await?;
        drop(staging);

        Ok(PackageOutcome {
            asset_id,
            manifest: published.join(LIVE_MANIFEST),
            playlist_url: format!("/stream/{asset_id}/{LIVE_MANIFEST}"),
        })
    }
}

/// Run a queued job to completion in the background, recording the outcome.
///
/// The uploaded input is deleted once packaging ends, whatever the result.
pub fn spawn_job(
    packager: VodPackager,
    jobs: Arc<JobTable>,
    job_id: JobId,
    input: PathBuf,
    ladder: Ladder,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        jobs.mark_running(job_id);
        tracing::info!(job_id = %job_id, "VOD job started");

        let result = packager.package(&input, &ladder).await;

        // Removed before the terminal state is visible to pollers.
        if let Err(e) = tokio::fs::remove_file(&input).await {
            tracing::debug!(job_id = %job_id, "Failed to remove upload {}: {e}", input.display());
        }

        match result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %job_id,
                    asset_id = %outcome.asset_id,
                    "VOD job succeeded"
                );
                jobs.mark_succeeded(job_id, outcome.asset_id, outcome.playlist_url);
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, "VOD job failed: {e}");
                jobs.mark_failed(job_id, e.to_string());
            }
        }
    })
}
