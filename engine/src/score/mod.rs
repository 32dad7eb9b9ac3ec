//! Scorer: scores each transcribed episode against the active topic catalog
//! via a single LLM call, parsing the response under a strict schema with a
//! bounded retry-with-repair loop.

pub mod provider;

use std::collections::HashMap;

use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::episodes::EpisodeStatus;
use crate::db::topics::Topic;
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;
use provider::{LlmProvider, LlmRequest};

pub struct Scorer;

impl Scorer {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let provider = provider::RemoteLlmProvider::new(ctx.http.clone(), "", "");
        Self::run_with_provider(ctx, &provider).await
    }

    pub async fn run_with_provider(ctx: &Context, provider: &dyn LlmProvider) -> PhaseOutcome {
        let _span = info_span!("score").entered();
        let episodes = match ctx.repos.episodes.list_by_status(EpisodeStatus::Transcribed, None) {
            Ok(e) => e,
            Err(err) => return PhaseOutcome::fatal(err),
        };
        let topics = match ctx.repos.topics.list_active() {
            Ok(t) => t,
            Err(err) => return PhaseOutcome::fatal(err),
        };
        if topics.is_empty() {
            return PhaseOutcome::fatal(PipelineError::config("no active topics configured"));
        }

        let mut outcome = PhaseOutcome::new();
        for episode in episodes {
            if ctx.is_cancelled() {
                break;
            }
            outcome.attempted += 1;
            let transcript = trim_for_ads(
                &episode.transcript_content,
                ctx.settings.ad_trim_prefix_fraction,
                ctx.settings.ad_trim_suffix_fraction,
            );
            let capped = cap_chars(&transcript, ctx.settings.scorer_transcript_char_cap as usize);

            match Self::score_one(provider, &topics, &capped).await {
                Ok(scores) => {
                    if let Err(err) = ctx.repos.episodes.set_scores(episode.id, &scores) {
                        outcome.failed.push((episode.id, err.to_string()));
                        continue;
                    }
                    outcome.succeeded += 1;
                    info!(episode_id = episode.id, "scored");
                }
                Err(err) => {
                    warn!(episode_id = episode.id, error = %err, "scoring failed");
                    let max = ctx.settings.max_episode_failures;
                    let _ = ctx.repos.episodes.record_failure(episode.id, &err.to_string(), max);
                    outcome.failed.push((episode.id, err.to_string()));
                }
            }
        }
        outcome
    }

    async fn score_one(provider: &dyn LlmProvider, topics: &[Topic], transcript: &str) -> Result<HashMap<String, f64>> {
        let catalog: String = topics
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Topics:\n{catalog}\n\nTranscript:\n{transcript}\n\nReturn a JSON object mapping each topic name to a number in [0, 1]."
        );

        let request = LlmRequest {
            model: "scoring-default".to_string(),
            system_prompt: "You are a podcast topic relevance scorer.".to_string(),
            user_prompt: prompt,
            max_output_tokens: 500,
            reasoning_effort: None,
        };

        let response = provider.complete(request.clone()).await?;
        if let Some(scores) = parse_scores(&response.output_text, topics) {
            return Ok(scores);
        }

        let stripped = strip_code_fences(&response.output_text);
        if let Some(scores) = parse_scores(&stripped, topics) {
            return Ok(scores);
        }

        let mut repaired_request = request;
        repaired_request.user_prompt = format!(
            "{}\n\nYour previous response could not be parsed as the required JSON object. Respond with ONLY the JSON object, no commentary.",
            repaired_request.user_prompt
        );
        let repaired = provider.complete(repaired_request).await?;
        let stripped_repair = strip_code_fences(&repaired.output_text);
        parse_scores(&stripped_repair, topics)
            .ok_or_else(|| PipelineError::permanent("scorer output failed schema after repair attempt"))
    }
}

/// Discards a leading/trailing fraction of the transcript to reduce
/// ad-read bias before scoring.
pub fn trim_for_ads(transcript: &str, prefix_fraction: f64, suffix_fraction: f64) -> String {
    let chars: Vec<char> = transcript.chars().collect();
    let len = chars.len();
    let prefix_cut = (len as f64 * prefix_fraction).round() as usize;
    let suffix_cut = (len as f64 * suffix_fraction).round() as usize;
    if prefix_cut + suffix_cut >= len {
        return transcript.to_string();
    }
    chars[prefix_cut..len - suffix_cut].iter().collect()
}

fn cap_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        text.chars().take(cap).collect()
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim().to_string()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Strict schema: keys are exactly the active topic names, values numbers
/// in [0, 1]; missing topics default to 0.
fn parse_scores(text: &str, topics: &[Topic]) -> Option<HashMap<String, f64>> {
    let parsed: serde_json::Value = serde_json::from_str(text).ok()?;
    let object = parsed.as_object()?;
    let mut scores = HashMap::new();
    for topic in topics {
        let value = object.get(&topic.name).and_then(|v| v.as_f64()).unwrap_or(0.0);
        if !(0.0..=1.0).contains(&value) {
            return None;
        }
        scores.insert(topic.name.clone(), value);
    }
    Some(scores)
}
