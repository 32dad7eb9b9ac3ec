//! Digest composer: selects undigested qualifying episodes per topic,
//! renders a narrative or dialogue script, heals common LLM formatting
//! deviations, and persists the digest atomically with its episode links.

pub mod format;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::digests::DigestEpisodeLink;
use crate::db::episodes::Episode;
use crate::db::topics::Topic;
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;
use crate::score::provider::{LlmProvider, LlmRequest};

pub struct DigestComposer;

impl DigestComposer {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let provider = crate::score::provider::RemoteLlmProvider::new(ctx.http.clone(), "", "");
        Self::run_with_provider(ctx, &provider).await
    }

    pub async fn run_with_provider(ctx: &Context, provider: &dyn LlmProvider) -> PhaseOutcome {
        let _span = info_span!("digest").entered();
        let topics = match ctx.repos.topics.list_active() {
            Ok(t) => t,
            Err(err) => return PhaseOutcome::fatal(err),
        };
        let digest_date = Utc::now().format("%Y-%m-%d").to_string();

        let mut outcome = PhaseOutcome::new();
        for topic in &topics {
            if ctx.is_cancelled() {
                break;
            }
            outcome.attempted += 1;
            match Self::compose_for_topic(ctx, provider, topic, &digest_date).await {
                Ok(Some(digest_id)) => {
                    outcome.succeeded += 1;
                    info!(topic = %topic.slug, digest_id, "digest composed");
                }
                Ok(None) => {
                    outcome.succeeded += 1;
                }
                Err(err) => {
                    warn!(topic = %topic.slug, error = %err, "digest composition failed");
                    outcome.failed.push((0, format!("{}: {err}", topic.slug)));
                }
            }
        }
        outcome
    }

    /// Returns `Ok(Some(digest_id))` if a digest was written, `Ok(None)` if
    /// the topic was skipped for this date (too few qualifying episodes and
    /// no prior digest exists).
    async fn compose_for_topic(ctx: &Context, provider: &dyn LlmProvider, topic: &Topic, digest_date: &str) -> Result<Option<i64>> {
        let qualifying = ctx
            .repos
            .episodes
            .list_qualifying_for_topic(&topic.name, ctx.settings.topic_qualification_threshold)?;
        let selected: Vec<(Episode, f64)> = qualifying
            .into_iter()
            .take(ctx.settings.max_episodes_per_digest as usize)
            .collect();

        if (selected.len() as i64) < ctx.settings.min_episodes_per_digest {
            // Too few qualifying episodes to compose a fresh digest. If one
            // already exists for this date, keep it rather than emitting a
            // weaker replacement.
            return Ok(ctx
                .repos
                .digests
                .get_for_date(&topic.slug, digest_date)?
                .map(|existing| existing.id));
        }

        let budget_per_episode = per_episode_char_budget(
            selected.len(),
            ctx.settings.per_episode_char_budget_min as usize,
            ctx.settings.per_episode_char_budget_max as usize,
        );

        let script = if topic.use_dialogue_api {
            Self::render_dialogue(provider, topic, &selected, budget_per_episode).await?
        } else {
            Self::render_narrative(provider, topic, &selected, budget_per_episode).await?
        };

        let average_score = selected.iter().map(|(_, score)| score).sum::<f64>() / selected.len() as f64;
        let links: Vec<DigestEpisodeLink> = selected
            .iter()
            .enumerate()
            .map(|(position, (episode, score))| DigestEpisodeLink {
                episode_id: episode.id,
                topic: topic.slug.clone(),
                score: *score,
                position: position as i64,
            })
            .collect();

        let timestamp = Utc::now().to_rfc3339();
        let word_count = script.split_whitespace().count() as i64;
        let digest_id = ctx.repos.digests.create_with_links(
            &topic.slug,
            digest_date,
            &timestamp,
            &script,
            word_count,
            average_score,
            &links,
        )?;

        for (episode, _) in &selected {
            ctx.repos.episodes.mark_digested(episode.id)?;
        }

        Ok(Some(digest_id))
    }

    async fn render_narrative(provider: &dyn LlmProvider, topic: &Topic, episodes: &[(Episode, f64)], budget: usize) -> Result<String> {
        let sources = build_sources_block(episodes, budget);
        let prompt = format!(
            "{}\n\nSources:\n{sources}\n\nWrite a single-voice narrative script, 10000-15000 characters. \
             Spell out numbers, dates, symbols, and abbreviations. Convey emotion through dialogue tags, never markup.",
            topic.instructions_md
        );
        let response = provider
            .complete(LlmRequest {
                model: "digest-default".to_string(),
                system_prompt: "You write podcast digest scripts.".to_string(),
                user_prompt: prompt,
                max_output_tokens: 8000,
                reasoning_effort: None,
            })
            .await?;
        Ok(response.output_text)
    }

    async fn render_dialogue(provider: &dyn LlmProvider, topic: &Topic, episodes: &[(Episode, f64)], budget: usize) -> Result<String> {
        let sources = build_sources_block(episodes, budget);
        let prompt = format!(
            "{}\n\nSources:\n{sources}\n\nWrite a two-speaker dialogue script, 15000-20000 characters. \
             Every line must be exactly `SPEAKER_1: [audio_tag] text` or `SPEAKER_2: [audio_tag] text` \
             with the colon immediately after the speaker label. Never use named speakers.",
            topic.instructions_md
        );
        let response = provider
            .complete(LlmRequest {
                model: topic.dialogue_model.clone(),
                system_prompt: "You write two-speaker podcast dialogue scripts.".to_string(),
                user_prompt: prompt,
                max_output_tokens: 10_000,
                reasoning_effort: None,
            })
            .await?;

        match format::fix_dialogue_format(&response.output_text) {
            Some(fixed) => Ok(fixed),
            None => Err(PipelineError::permanent(
                "dialogue script lacks SPEAKER_1/SPEAKER_2 labels after fixer",
            )),
        }
    }
}

fn build_sources_block(episodes: &[(Episode, f64)], budget_per_episode: usize) -> String {
    episodes
        .iter()
        .map(|(episode, _)| {
            let excerpt: String = episode.transcript_content.chars().take(budget_per_episode).collect();
            format!(
                "### {} ({})\n{}",
                episode.title,
                episode.published_date.as_deref().unwrap_or("unknown date"),
                excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Divides the per-episode transcript character budget across selected
/// episodes, clamped to `[min, max]`.
pub fn per_episode_char_budget(episode_count: usize, min: usize, max: usize) -> usize {
    if episode_count == 0 {
        return min;
    }
    let total_budget = max * 3;
    (total_budget / episode_count).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_clamped_between_min_and_max() {
        assert_eq!(per_episode_char_budget(1, 2_000, 20_000), 20_000);
        assert_eq!(per_episode_char_budget(30, 2_000, 20_000), 2_000);
    }
}
