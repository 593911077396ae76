//! In-memory VOD job table.
//!
//! Finished jobs are kept for `vod.job_retention_secs` so clients can poll
//! their outcome, then swept by [`start_cleanup_task`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use cf_core::{AssetId, JobId, Ladder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Status of one packaging job, as returned by `GET /api/videos/jobs/{jobId}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub state: JobState,
    /// Original upload name, for display.
    pub source_name: String,
    pub renditions: usize,
    pub asset_id: Option<AssetId>,
    pub playlist_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn queued(job_id: JobId, source_name: impl Into<String>, ladder: &Ladder) -> Self {
        Self {
            job_id,
            state: JobState::Queued,
            source_name: source_name.into(),
            renditions: ladder.len(),
            asset_id: None,
            playlist_url: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Retention used by [`JobTable::default`].
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
pub struct JobTable {
    jobs: DashMap<JobId, JobRecord>,
    retention: Duration,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl JobTable {
    /// A table that forgets finished jobs `retention` after they finish.
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            retention,
        }
    }

    pub fn insert(&self, record: JobRecord) {
        self.jobs.insert(record.job_id, record);
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.get(&id).map(|r| r.value().clone())
    }

    pub fn mark_running(&self, id: JobId) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.state = JobState::Running;
        }
    }

    pub fn mark_succeeded(&self, id: JobId, asset_id: AssetId, playlist_url: String) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.state = JobState::Succeeded;
            job.asset_id = Some(asset_id);
            job.playlist_url = Some(playlist_url);
            job.finished_at = Some(Utc::now());
        }
    }

    pub fn mark_failed(&self, id: JobId, error: impl Into<String>) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.state = JobState::Failed;
            job.error = Some(error.into());
            job.finished_at = Some(Utc::now());
        }
    }

    /// Remove finished jobs older than the retention period.
    ///
    /// Queued and running jobs are never removed. Returns the number of
    /// records dropped.
    pub fn cleanup_expired_jobs(&self) -> usize {
        let now = Utc::now();
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::days(1));

        let mut removed = 0;
        self.jobs.retain(|job_id, job| {
            let expired = job.state.is_terminal()
                && job.finished_at.is_some_and(|finished| now - finished > retention);
            if expired {
                tracing::debug!(job_id = %job_id, state = ?job.state, "Expired job removed");
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            tracing::info!(removed, "Cleaned up finished jobs");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Periodically sweep `jobs` until `shutdown` is cancelled.
pub fn start_cleanup_task(
    jobs: Arc<JobTable>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    jobs.cleanup_expired_jobs();
                }
            }
        }
    })
}
