//! TTS driver: renders each dialogue/narrative chunk through a pluggable
//! TTS provider with resumable progress tracking, then concatenates the
//! rendered chunks into one MP3 via stream-copy.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::digests::DigestStatus;
use crate::dialogue::{chunk_dialogue, Chunk};
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::transcoder::Transcoder;

#[derive(Debug, Clone)]
pub struct TtsLine {
    pub voice_id: String,
    pub text: String,
}

/// One entry of a topic's `voice_config`: the provider voice bound to a
/// speaker label, plus the display name surfaced in rendered digest
/// metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceBinding {
    pub voice_id: String,
    pub display_name: String,
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Dialogue mode: `{model, inputs: [{voice_id, text}]}` -> MP3 bytes.
    async fn synthesize_dialogue(&self, lines: &[TtsLine]) -> Result<Vec<u8>>;
    /// Single-voice mode: `{model, voice_id, text, voice_settings}` -> MP3 bytes.
    async fn synthesize_narrative(&self, voice_id: &str, text: &str) -> Result<Vec<u8>>;
}

pub struct RemoteTtsProvider {
    http: std::sync::Arc<reqwest::Client>,
    endpoint: String,
    api_key: String,
}

impl RemoteTtsProvider {
    pub fn new(http: std::sync::Arc<reqwest::Client>, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TtsProvider for RemoteTtsProvider {
    async fn synthesize_dialogue(&self, lines: &[TtsLine]) -> Result<Vec<u8>> {
        let inputs: Vec<serde_json::Value> = lines
            .iter()
            .map(|l| serde_json::json!({"voice_id": l.voice_id, "text": l.text}))
            .collect();
        self.call(serde_json::json!({"model": "dialogue-tts", "inputs": inputs})).await
    }

    async fn synthesize_narrative(&self, voice_id: &str, text: &str) -> Result<Vec<u8>> {
        self.call(serde_json::json!({
            "model": "narrative-tts",
            "voice_id": voice_id,
            "text": text,
            "voice_settings": {"stability": 0.5, "similarity_boost": 0.75, "style": 0.0, "use_speaker_boost": true},
        }))
        .await
    }
}

impl RemoteTtsProvider {
    async fn call(&self, body: serde_json::Value) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: self.endpoint.clone(),
                detail: e.to_string(),
            })?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PipelineError::RateLimit {
                provider: "tts".to_string(),
                retry_after_secs,
            });
        }
        if !response.status().is_success() {
            return Err(PipelineError::TransientNetwork {
                target: self.endpoint.clone(),
                detail: format!("status {}", response.status()),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Per-digest resumable progress file: which chunk numbers have already
/// been rendered, so a crashed run doesn't re-spend on completed chunks.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Progress {
    completed_chunks: HashSet<usize>,
}

impl Progress {
    fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

const TTS_RETRY_POLICY: BackoffPolicy = BackoffPolicy::new(std::time::Duration::from_secs(5), 2.0, 3);

pub struct TtsDriver;

impl TtsDriver {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let provider = RemoteTtsProvider::new(ctx.http.clone(), "", "");
        Self::run_with_provider(ctx, &provider).await
    }

    pub async fn run_with_provider(ctx: &Context, provider: &dyn TtsProvider) -> PhaseOutcome {
        let _span = info_span!("dialogue_tts").entered();
        let digests = match ctx.repos.digests.list_by_status(DigestStatus::Draft) {
            Ok(d) => d,
            Err(err) => return PhaseOutcome::fatal(err),
        };

        let mut outcome = PhaseOutcome::new();
        for digest in digests {
            if ctx.is_cancelled() {
                break;
            }
            outcome.attempted += 1;
            let topic = match ctx.repos.topics.get(&digest.topic) {
                Ok(Some(t)) => t,
                Ok(None) => {
                    outcome.failed.push((digest.id, "topic missing".to_string()));
                    continue;
                }
                Err(err) => {
                    outcome.failed.push((digest.id, err.to_string()));
                    continue;
                }
            };
            let voice_config = parse_voice_config(&topic.voice_config);

            let max_chunk_size = if topic.use_dialogue_api {
                ctx.settings.dialogue_max_chunk_size as usize
            } else {
                ctx.settings.narrative_max_chunk_size as usize
            };
            let chunks = chunk_dialogue(&digest.script_content, max_chunk_size);

            match Self::render_digest(provider, digest.id, &chunks, &voice_config, topic.use_dialogue_api, &topic.voice_id).await {
                Ok(mp3_path) => {
                    let duration = Transcoder::probe_duration(&mp3_path).await.unwrap_or(0.0);
                    let summary = hosts_summary(&voice_config);
                    if let Err(err) = ctx.repos.digests.set_rendered(
                        digest.id,
                        &mp3_path.display().to_string(),
                        duration,
                        &format!("{} digest", topic.name),
                        &summary,
                    ) {
                        warn!(digest_id = digest.id, error = %err, "rendered mp3 left orphaned, db write failed");
                        outcome.failed.push((digest.id, err.to_string()));
                        continue;
                    }
                    outcome.succeeded += 1;
                    info!(digest_id = digest.id, "tts rendered");
                }
                Err(err) => {
                    warn!(digest_id = digest.id, error = %err, "tts rendering failed");
                    let _ = ctx.repos.digests.set_failed(digest.id);
                    outcome.failed.push((digest.id, err.to_string()));
                }
            }
        }
        outcome
    }

    async fn render_digest(
        provider: &dyn TtsProvider,
        digest_id: i64,
        chunks: &[Chunk],
        voice_config: &HashMap<String, VoiceBinding>,
        dialogue_mode: bool,
        narrative_voice_id: &str,
    ) -> Result<PathBuf> {
        let work_dir = PathBuf::from("cache/tts").join(digest_id.to_string());
        std::fs::create_dir_all(&work_dir)?;
        let progress_path = work_dir.join("progress.json");
        let mut progress = Progress::load(&progress_path);

        for chunk in chunks {
            if progress.completed_chunks.contains(&chunk.number) {
                continue;
            }
            let output_path = work_dir.join(format!("chunk_{:04}.mp3", chunk.number));

            let audio = retry_with_backoff(TTS_RETRY_POLICY, "tts_chunk", || {
                let chunk = chunk.clone();
                let voice_config = voice_config.clone();
                async move {
                    if dialogue_mode {
                        let lines = parse_chunk_lines(&chunk.text, &voice_config);
                        if lines.is_empty() {
                            return Err(PipelineError::permanent("chunk has no bound voices"));
                        }
                        provider.synthesize_dialogue(&lines).await
                    } else {
                        provider.synthesize_narrative(narrative_voice_id, &chunk.text).await
                    }
                }
            })
            .await?;

            std::fs::write(&output_path, audio)?;
            progress.completed_chunks.insert(chunk.number);
            progress.save(&progress_path)?;
        }

        let concat_list_path = work_dir.join("concat.txt");
        let mut concat_list = String::new();
        for chunk in chunks {
            let path = work_dir.join(format!("chunk_{:04}.mp3", chunk.number));
            concat_list.push_str(&format!("file '{}'\n", path.display()));
        }
        std::fs::write(&concat_list_path, concat_list)?;

        let final_path = work_dir.join("digest.mp3");
        Transcoder::concat(&concat_list_path, &final_path).await?;
        Ok(final_path)
    }
}

/// Parses a rendered chunk's lines back into `{voice_id, text}` entries by
/// looking up each speaker label in the topic's voice binding. Lines whose
/// speaker has no bound voice are dropped with a warning, not a hard abort.
fn parse_chunk_lines(chunk_text: &str, voice_config: &HashMap<String, VoiceBinding>) -> Vec<TtsLine> {
    let mut lines = Vec::new();
    for turn in crate::dialogue::split_into_turns(chunk_text) {
        match voice_config.get(&turn.speaker) {
            Some(binding) => lines.push(TtsLine {
                voice_id: binding.voice_id.clone(),
                text: turn.text,
            }),
            None => warn!(speaker = %turn.speaker, "no voice binding, line dropped"),
        }
    }
    lines
}

/// Deserializes a topic's `voice_config` column, warning (rather than
/// silently treating the topic as voiceless) if the JSON doesn't match the
/// documented `{SPEAKER_n: {voice_id, display_name}}` shape.
fn parse_voice_config(raw: &str) -> HashMap<String, VoiceBinding> {
    match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(err) => {
            warn!(error = %err, "voice_config failed to parse, treating topic as voiceless");
            HashMap::new()
        }
    }
}

/// Joins the distinct display names bound in a dialogue topic's voice
/// config, in speaker-label order, for use as the rendered digest's summary.
fn hosts_summary(voice_config: &HashMap<String, VoiceBinding>) -> String {
    let mut speakers: Vec<&String> = voice_config.keys().collect();
    speakers.sort();
    speakers
        .into_iter()
        .map(|speaker| voice_config[speaker].display_name.clone())
        .collect::<Vec<_>>()
        .join(" & ")
}
