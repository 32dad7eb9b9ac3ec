//! Chunker: splits each acquired episode's audio into fixed-duration mono
//! 16 kHz segments via the transcoder, test-decode-validates each one, and
//! applies the partial-transcription acceptance threshold.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::episodes::EpisodeStatus;
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;
use crate::transcoder::Transcoder;

/// Guards chunk-directory creation so concurrent episode workers never race
/// to create the same per-episode output directory.
static CHUNK_DIR_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct ValidChunk {
    pub index: u32,
    pub path: PathBuf,
}

pub struct Chunker;

impl Chunker {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let _span = info_span!("chunk").entered();
        let episodes = match ctx.repos.episodes.list_by_status(EpisodeStatus::Pending, None) {
            Ok(e) => e,
            Err(err) => return PhaseOutcome::fatal(err),
        };

        let mut outcome = PhaseOutcome::new();
        for episode in episodes {
            let Some(audio_path) = &episode.audio_path else {
                continue;
            };
            if ctx.is_cancelled() {
                break;
            }
            outcome.attempted += 1;
            match Self::chunk_one(ctx, Path::new(audio_path), episode.id, episode.duration_seconds).await {
                Ok(valid) => {
                    outcome.succeeded += 1;
                    info!(episode_id = episode.id, valid_chunks = valid.len(), "chunking succeeded");
                }
                Err(err) => {
                    warn!(episode_id = episode.id, error = %err, "chunking failed");
                    let max = ctx.settings.max_episode_failures;
                    let _ = ctx.repos.episodes.record_failure(episode.id, &err.to_string(), max);
                    outcome.failed.push((episode.id, err.to_string()));
                }
            }
        }
        outcome
    }

    async fn chunk_one(ctx: &Context, audio_path: &Path, episode_id: i64, duration_seconds: Option<i64>) -> Result<Vec<ValidChunk>> {
        let out_dir = chunk_dir_for(episode_id);
        create_dir_serialized(&out_dir)?;

        let total_duration = match duration_seconds {
            Some(d) => d as u64,
            None => Transcoder::probe_duration(audio_path).await?.round() as u64,
        };
        let chunk_secs = ctx.settings.chunk_duration_secs.max(1) as u64;
        let total_chunks = total_duration.div_ceil(chunk_secs).max(1);

        let mut valid = Vec::new();
        for index in 0..total_chunks {
            let start = index * chunk_secs;
            let output = out_dir.join(format!("chunk_{index:04}.mp3"));
            if let Err(err) = Transcoder::extract_chunk(audio_path, start, chunk_secs, &output).await {
                warn!(episode_id, index, error = %err, "chunk extraction failed, skipping");
                let _ = tokio::fs::remove_file(&output).await;
                continue;
            }
            if Transcoder::test_decode(&output).await.is_err() {
                warn!(episode_id, index, "chunk failed test-decode validation, discarded");
                let _ = tokio::fs::remove_file(&output).await;
                continue;
            }
            valid.push(ValidChunk {
                index: index as u32,
                path: output,
            });
        }

        if !passes_partial_threshold(valid.len(), total_chunks as usize, ctx.settings.partial_transcription_threshold) {
            return Err(PipelineError::permanent("insufficient valid chunks"));
        }
        Ok(valid)
    }
}

fn chunk_dir_for(episode_id: i64) -> PathBuf {
    Path::new("cache/chunks").join(episode_id.to_string())
}

fn create_dir_serialized(dir: &Path) -> Result<()> {
    let lock = CHUNK_DIR_LOCK.get_or_init(|| Mutex::new(()));
    let _guard = lock.lock();
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// An episode with `>= threshold` valid chunks proceeds; for very short
/// episodes (`total < 3`), a single valid chunk is enough.
pub fn passes_partial_threshold(valid: usize, total: usize, threshold: f64) -> bool {
    if total == 0 {
        return false;
    }
    if total < 3 {
        return valid >= 1;
    }
    (valid as f64) / (total as f64) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_accepts_majority_valid() {
        assert!(passes_partial_threshold(17, 20, 0.70));
        assert!(!passes_partial_threshold(5, 20, 0.70));
    }

    #[test]
    fn small_episode_needs_only_one_valid_chunk() {
        assert!(passes_partial_threshold(1, 2, 0.70));
        assert!(!passes_partial_threshold(0, 2, 0.70));
    }
}
