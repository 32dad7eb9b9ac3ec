//! Phase orchestration: runs phases in a fixed order, recording a
//! `starting`/`completed`/`failed` event per phase and aggregating each
//! phase's outcome rather than raising on the first error.

use tracing::{error, info, info_span, warn};

use crate::context::Context;
use crate::db::runs::RunStatus;
use crate::error::{PipelineError, Result};

pub mod phases {
    pub const FEED_INGEST: &str = "feed_ingest";
    pub const ACQUIRE: &str = "acquire";
    pub const CHUNK: &str = "chunk";
    pub const TRANSCRIBE: &str = "transcribe";
    pub const SCORE: &str = "score";
    pub const DIGEST: &str = "digest";
    pub const DIALOGUE_TTS: &str = "dialogue_tts";
    pub const PUBLISH: &str = "publish";
    pub const RETENTION: &str = "retention";

    pub const ALL: &[&str] = &[
        FEED_INGEST,
        ACQUIRE,
        CHUNK,
        TRANSCRIBE,
        SCORE,
        DIGEST,
        DIALOGUE_TTS,
        PUBLISH,
        RETENTION,
    ];
}

/// Tagged result a phase returns instead of raising: what was attempted,
/// what succeeded, which units failed (with reason), and whether the whole
/// phase is fatally broken.
#[derive(Debug, Default)]
pub struct PhaseOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<(i64, String)>,
    pub fatal: Option<PipelineError>,
}

impl PhaseOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fatal(err: PipelineError) -> Self {
        Self {
            fatal: Some(err),
            ..Self::default()
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// A phase with any failures but no fatal error.
    pub fn is_partial_failure(&self) -> bool {
        self.fatal.is_none() && !self.failed.is_empty()
    }

    pub fn to_json(&self, phase: &str) -> serde_json::Value {
        serde_json::json!({
            "success": self.fatal.is_none(),
            "phase": phase,
            "attempted": self.attempted,
            "succeeded": self.succeeded,
            "failed_count": self.failed.len(),
            "failed": self.failed.iter().map(|(id, reason)| serde_json::json!({"id": id, "reason": reason})).collect::<Vec<_>>(),
            "error": self.fatal.as_ref().map(|e| e.to_string()),
        })
    }
}

pub struct Orchestrator;

impl Orchestrator {
    /// Runs every phase in order against a single `Context`, stopping early
    /// only on a fatal phase outcome (feed discovery failing is fatal to the
    /// whole run; later phases like publish still run after a non-fatal TTS
    /// failure so forward progress isn't blocked). `stop_after`, if given,
    /// ends the run once that phase completes without error.
    pub async fn run_all(ctx: &Context, stop_after: Option<&str>) -> Result<()> {
        ctx.repos.runs.start(&ctx.run_id, None)?;
        Self::recover_stuck_episodes(ctx)?;

        for &phase in phases::ALL {
            if ctx.is_cancelled() {
                warn!(phase, "run cancelled, stopping before phase");
                break;
            }
            let outcome = Self::run_phase(ctx, phase).await;
            if outcome.is_fatal() && phase == phases::FEED_INGEST {
                ctx.repos.runs.finish(&ctx.run_id, RunStatus::Failed, outcome.fatal.as_ref().map(|e| e.to_string()).as_deref())?;
                return Err(outcome.fatal.unwrap());
            }
            if outcome.is_fatal() {
                error!(phase, error = %outcome.fatal.as_ref().unwrap(), "phase fatal, continuing with remaining phases");
            }
            if Some(phase) == stop_after {
                break;
            }
        }

        ctx.repos.runs.finish(&ctx.run_id, RunStatus::Completed, Some("success"))?;
        Ok(())
    }

    /// Runs a single named phase, recording its entry/exit in the run table
    /// and mirroring warn/error events into the `pipeline_logs` repository.
    pub async fn run_phase(ctx: &Context, phase: &str) -> PhaseOutcome {
        let _span = info_span!("phase", phase, run_id = %ctx.run_id).entered();
        if let Err(err) = ctx.repos.runs.enter_phase(&ctx.run_id, phase) {
            return PhaseOutcome::fatal(err);
        }
        info!(phase, "starting");

        let outcome = match phase {
            phases::FEED_INGEST => crate::feed::FeedIngester::run(ctx).await,
            phases::ACQUIRE => crate::acquire::AudioAcquirer::run(ctx).await,
            phases::CHUNK => crate::chunk::Chunker::run(ctx).await,
            phases::TRANSCRIBE => crate::transcribe::Transcriber::run(ctx).await,
            phases::SCORE => crate::score::Scorer::run(ctx).await,
            phases::DIGEST => crate::digest::DigestComposer::run(ctx).await,
            phases::DIALOGUE_TTS => crate::dialogue::tts::TtsDriver::run(ctx).await,
            phases::PUBLISH => crate::publish::Publisher::run(ctx).await,
            phases::RETENTION => crate::retention::Retention::run(ctx).await,
            other => PhaseOutcome::fatal(PipelineError::config(format!("unknown phase {other}"))),
        };

        for (id, reason) in &outcome.failed {
            warn!(phase, episode_id = id, reason, "unit failed");
            let _ = ctx.repos.logs.record(
                &ctx.run_id,
                phase,
                crate::db::logs::LogLevel::Warn,
                &format!("episode {id} failed: {reason}"),
            );
        }
        if let Some(err) = &outcome.fatal {
            error!(phase, error = %err, "phase failed fatally");
            let _ = ctx.repos.logs.record(&ctx.run_id, phase, crate::db::logs::LogLevel::Error, &err.to_string());
        } else {
            info!(phase, succeeded = outcome.succeeded, attempted = outcome.attempted, "completed");
        }
        outcome
    }

    /// Reclaims episodes abandoned mid-`processing` by a prior crashed run.
    fn recover_stuck_episodes(ctx: &Context) -> Result<()> {
        let recovered = ctx.repos.episodes.recover_stuck(ctx.settings.stuck_episode_timeout_secs)?;
        if recovered > 0 {
            info!(recovered, "stuck episodes reset to pending");
        }
        Ok(())
    }
}
