//! Crate-wide error taxonomy.
//!
//! One flat enum with typed leaf variants, following the error kinds a phase
//! actually needs to branch on (config, external tool, transient network,
//! rate limit, permanent content, fatal phase failure), plus an `Other`
//! escape hatch for conditions that don't warrant their own variant.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("external tool unavailable: {tool}: {detail}")]
    ExternalTool { tool: String, detail: String },

    #[error("transient network error calling {target}: {detail}")]
    TransientNetwork { target: String, detail: String },

    #[error("rate limited by {provider}, retry after {retry_after_secs:?}s")]
    RateLimit {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("permanent content error: {0}")]
    PermanentContent(String),

    #[error("fatal phase failure in {phase}: {detail}")]
    FatalPhase { phase: String, detail: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model weights not found or checksum mismatch at {path}")]
    ModelValidation { path: PathBuf },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Config(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        PipelineError::PermanentContent(msg.into())
    }

    /// Whether this is retried under the transient/rate-limit backoff
    /// policy rather than counted as a permanent per-episode failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientNetwork { .. } | PipelineError::RateLimit { .. }
        )
    }
}
