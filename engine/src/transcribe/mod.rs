//! Transcriber: drives a pluggable STT provider over one episode's chunks,
//! appending incrementally so memory use never scales with episode length.

pub mod provider;

use std::path::PathBuf;

use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::episodes::EpisodeStatus;
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use provider::SttProvider;

const TRANSCRIBE_RETRY_POLICY: BackoffPolicy = BackoffPolicy::new(std::time::Duration::from_secs(2), 2.0, 3);

pub struct Transcriber;

impl Transcriber {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        Self::run_with_provider(ctx, &provider::RemoteSttProvider::new(ctx.http.clone(), "", "")).await
    }

    pub async fn run_with_provider(ctx: &Context, provider: &dyn SttProvider) -> PhaseOutcome {
        let _span = info_span!("transcribe").entered();
        let episodes = match ctx.repos.episodes.list_by_status(EpisodeStatus::Pending, None) {
            Ok(e) => e,
            Err(err) => return PhaseOutcome::fatal(err),
        };

        let mut outcome = PhaseOutcome::new();
        for episode in episodes {
            if ctx.is_cancelled() {
                break;
            }
            let chunk_dir = PathBuf::from("cache/chunks").join(episode.id.to_string());
            let mut chunk_paths: Vec<PathBuf> = match tokio::fs::read_dir(&chunk_dir).await {
                Ok(mut entries) => {
                    let mut paths = Vec::new();
                    while let Ok(Some(entry)) = entries.next_entry().await {
                        paths.push(entry.path());
                    }
                    paths
                }
                Err(_) => continue,
            };
            chunk_paths.sort();
            if chunk_paths.is_empty() {
                continue;
            }

            outcome.attempted += 1;
            match Self::transcribe_episode(ctx, provider, episode.id, &chunk_paths).await {
                Ok(()) => {
                    outcome.succeeded += 1;
                    info!(episode_id = episode.id, chunks = chunk_paths.len(), "transcription complete");
                }
                Err(err) => {
                    warn!(episode_id = episode.id, error = %err, "transcription failed");
                    let max = ctx.settings.max_episode_failures;
                    let _ = ctx.repos.episodes.record_failure(episode.id, &err.to_string(), max);
                    outcome.failed.push((episode.id, err.to_string()));
                }
            }
        }
        outcome
    }

    /// Processes one episode's chunks **serially, in order** — the append
    /// operation is not commutative, so a single episode is never fanned
    /// across workers even though distinct episodes may run concurrently.
    async fn transcribe_episode(ctx: &Context, provider: &dyn SttProvider, episode_id: i64, chunk_paths: &[PathBuf]) -> Result<()> {
        let mut first_chunk = true;
        for path in chunk_paths {
            if ctx.is_cancelled() {
                return Err(PipelineError::permanent("cancelled mid-transcription"));
            }
            let path = path.clone();
            let response = retry_with_backoff(TRANSCRIBE_RETRY_POLICY, "transcribe_chunk", || {
                let provider = provider;
                let path = path.clone();
                async move { provider.transcribe_chunk(&path, None).await }
            })
            .await;

            let response = match response {
                Ok(r) => r,
                Err(err) if !err.is_retryable() => {
                    warn!(episode_id, path = %path.display(), error = %err, "chunk skipped as permanent failure");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if first_chunk {
                ctx.repos.episodes.mark_processing_started(episode_id)?;
                first_chunk = false;
            }
            let word_count = response.text.split_whitespace().count() as i64;
            let text_with_space = if response.text.is_empty() {
                response.text
            } else {
                format!("{} ", response.text.trim_end())
            };
            ctx.repos.episodes.append_transcript_chunk(episode_id, &text_with_space, word_count)?;
        }

        let episode = ctx
            .repos
            .episodes
            .get(episode_id)?
            .ok_or_else(|| PipelineError::permanent("episode vanished during transcription"))?;
        if episode.transcript_content.trim().is_empty() {
            return Err(PipelineError::permanent("no valid chunks produced"));
        }
        ctx.repos.episodes.mark_transcribed(episode_id)?;
        Ok(())
    }
}
