//! Application context shared with every handler via Axum state.
//!
//! [`AppContext`] wraps long-lived infrastructure (segment store, live
//! registry, job table, command template, URL signer) in `Arc`s so cloning
//! it per request is cheap.

use std::sync::Arc;
use std::time::Duration;

use cf_av::{CommandTemplate, SupervisorOptions, ToolRegistry};
use cf_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::jobs::JobTable;
use crate::registry::LiveRegistry;
use crate::signer::{HmacUrlSigner, UrlSigner};
use crate::store::SegmentStore;
use crate::vod::VodPackager;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<SegmentStore>,
    pub registry: Arc<LiveRegistry>,
    pub template: Arc<dyn CommandTemplate>,
    pub jobs: Arc<JobTable>,
    /// `None` when `signing.secret` is unset.
    pub signer: Option<Arc<dyn UrlSigner>>,
    pub tools: Arc<ToolRegistry>,
    /// Cancelled when the server begins shutting down; live sessions watch it.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Open the segment store under `config.storage.root` and assemble the
    /// context.
    ///
    /// # Errors
    ///
    /// Fails if the storage layout cannot be created or the signing secret
    /// is rejected.
    pub fn new(
        config: Config,
        template: Arc<dyn CommandTemplate>,
        tools: Arc<ToolRegistry>,
    ) -> cf_core::Result<Self> {
        let store = Arc::new(SegmentStore::open(&config.storage.root)?);

        let signer: Option<Arc<dyn UrlSigner>> = match config.signing.secret.as_deref() {
            Some(secret) => Some(Arc::new(HmacUrlSigner::new(secret)?)),
            None => {
                tracing::info!("signing.secret not set; signed URLs are disabled");
                None
            }
        };

        let job_retention = Duration::from_secs(config.vod.job_retention_secs);

        Ok(Self {
            config: Arc::new(config),
            store,
            registry: Arc::new(LiveRegistry::new()),
            template,
            jobs: Arc::new(JobTable::new(job_retention)),
            signer,
            tools,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions::from_live(&self.config.live)
    }

    /// Packaging orchestrator bound to this context's store and template.
    pub fn packager(&self) -> VodPackager {
        VodPackager::new(
            self.store.clone(),
            self.template.clone(),
            self.supervisor_options(),
            Duration::from_secs(self.config.vod.timeout_secs),
        )
    }
}
