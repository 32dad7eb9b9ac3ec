//! Per-run execution context: the bundle every phase receives instead of
//! reaching for globals. Constructed once in the orchestrator and cloned
//! cheaply (an `Arc`-backed `Db`, reference-counted clients) into each phase
//! and worker task.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::db::{Db, Repositories};
use crate::error::Result;
use crate::settings::Settings;

/// Shared state for a single pipeline run: the run id, repositories,
/// materialized settings, and the cancellation token every long-running
/// phase polls between units of work.
#[derive(Clone)]
pub struct Context {
    pub run_id: String,
    pub repos: Repositories,
    pub settings: Settings,
    pub cancellation: CancellationToken,
    pub http: Arc<reqwest::Client>,
}

impl Context {
    pub fn new(db: Db, run_id: String) -> Result<Self> {
        let repos = Repositories::new(db);
        let settings = Settings::load(&repos.settings)?;
        Ok(Self {
            run_id,
            repos,
            settings,
            cancellation: CancellationToken::new(),
            http: Arc::new(reqwest::Client::new()),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}
