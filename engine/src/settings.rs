//! Typed, materialized settings.
//!
//! The `web_settings` table is `(category, key) -> (value, type)`. Rather
//! than have every consumer re-read individual keys mid-phase, `Settings` is
//! built once per run from compiled-in defaults overlaid with whatever rows
//! are present in the repository, then handed to every phase by value
//! through the `Context`.

use crate::db::settings_repo::SettingsRepository;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Episodes stuck in `processing` longer than this are reset to
    /// `pending` at phase start.
    pub stuck_episode_timeout_secs: i64,

    /// Feed ingestion look-back window, in days.
    pub feed_lookback_days: i64,

    /// Chunk duration target, seconds.
    pub chunk_duration_secs: i64,
    /// Fraction of chunks that must decode-validate for the episode to
    /// proceed.
    pub partial_transcription_threshold: f64,

    /// Ad-trim prefix/suffix fraction applied before scoring.
    pub ad_trim_prefix_fraction: f64,
    pub ad_trim_suffix_fraction: f64,
    /// Character budget for the transcript prefix sent to the scorer.
    pub scorer_transcript_char_cap: i64,
    /// Score at or above which an episode qualifies for a topic.
    pub topic_qualification_threshold: f64,

    /// Digest composer selection bounds.
    pub max_episodes_per_digest: i64,
    pub min_episodes_per_digest: i64,
    pub per_episode_char_budget_min: i64,
    pub per_episode_char_budget_max: i64,
    /// Gates the "general summary" fallback digest. Off by default.
    pub digest_general_summary_enabled: bool,

    /// Dialogue chunking cap, characters; kept below the provider's hard
    /// 3000-char ceiling.
    pub dialogue_max_chunk_size: i64,
    /// Narrative (single-voice) chunk cap, characters.
    pub narrative_max_chunk_size: i64,
    /// TTS retry policy: base delay seconds, ceiling attempts.
    pub tts_retry_base_secs: u64,
    pub tts_retry_max_attempts: u32,

    /// Failure count at which an episode transitions to `failed`.
    pub max_episode_failures: i64,

    /// Retention windows, days, per category.
    pub retention_local_mp3_days: i64,
    pub retention_audio_cache_days: i64,
    pub retention_logs_days: i64,
    pub retention_database_rows_days: i64,
    pub retention_remote_releases_days: i64,

    /// Worker pool sizes.
    pub transcription_parallelism: usize,
    pub tts_parallelism: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stuck_episode_timeout_secs: 2 * 60 * 60,
            feed_lookback_days: 14,
            chunk_duration_secs: 300,
            partial_transcription_threshold: 0.70,
            ad_trim_prefix_fraction: 0.05,
            ad_trim_suffix_fraction: 0.05,
            scorer_transcript_char_cap: 120_000,
            topic_qualification_threshold: 0.65,
            max_episodes_per_digest: 5,
            min_episodes_per_digest: 1,
            per_episode_char_budget_min: 2_000,
            per_episode_char_budget_max: 20_000,
            digest_general_summary_enabled: false,
            dialogue_max_chunk_size: 2_800,
            narrative_max_chunk_size: 2_800,
            tts_retry_base_secs: 5,
            tts_retry_max_attempts: 3,
            max_episode_failures: 3,
            retention_local_mp3_days: 7,
            retention_audio_cache_days: 3,
            retention_logs_days: 30,
            retention_database_rows_days: 180,
            retention_remote_releases_days: 365,
            transcription_parallelism: 2,
            tts_parallelism: 2,
        }
    }
}

impl Settings {
    /// Materialize defaults overlaid with whatever `web_settings` rows exist.
    pub fn load(repo: &SettingsRepository) -> Result<Self> {
        let mut settings = Settings::default();
        let rows = repo.load_all()?;

        for row in rows {
            let key = format!("{}.{}", row.category, row.key);
            apply_override(&mut settings, &key, &row.value);
        }

        Ok(settings)
    }
}

fn apply_override(settings: &mut Settings, key: &str, raw: &str) {
    macro_rules! set_i64 {
        ($field:ident) => {
            if let Ok(v) = raw.parse::<i64>() {
                settings.$field = v;
            }
        };
    }
    macro_rules! set_f64 {
        ($field:ident) => {
            if let Ok(v) = raw.parse::<f64>() {
                settings.$field = v;
            }
        };
    }
    macro_rules! set_bool {
        ($field:ident) => {
            if let Ok(v) = raw.parse::<bool>() {
                settings.$field = v;
            }
        };
    }
    macro_rules! set_usize {
        ($field:ident) => {
            if let Ok(v) = raw.parse::<usize>() {
                settings.$field = v;
            }
        };
    }

    match key {
        "episode.stuck_timeout_secs" => set_i64!(stuck_episode_timeout_secs),
        "feed.lookback_days" => set_i64!(feed_lookback_days),
        "chunk.duration_secs" => set_i64!(chunk_duration_secs),
        "chunk.partial_transcription_threshold" => set_f64!(partial_transcription_threshold),
        "scorer.ad_trim_prefix_fraction" => set_f64!(ad_trim_prefix_fraction),
        "scorer.ad_trim_suffix_fraction" => set_f64!(ad_trim_suffix_fraction),
        "scorer.transcript_char_cap" => set_i64!(scorer_transcript_char_cap),
        "scorer.topic_qualification_threshold" => set_f64!(topic_qualification_threshold),
        "digest.max_episodes_per_digest" => set_i64!(max_episodes_per_digest),
        "digest.min_episodes_per_digest" => set_i64!(min_episodes_per_digest),
        "digest.per_episode_char_budget_min" => set_i64!(per_episode_char_budget_min),
        "digest.per_episode_char_budget_max" => set_i64!(per_episode_char_budget_max),
        "digest.general_summary_enabled" => set_bool!(digest_general_summary_enabled),
        "dialogue.max_chunk_size" => set_i64!(dialogue_max_chunk_size),
        "narrative.max_chunk_size" => set_i64!(narrative_max_chunk_size),
        "tts.retry_base_secs" => {
            if let Ok(v) = raw.parse::<u64>() {
                settings.tts_retry_base_secs = v;
            }
        }
        "tts.retry_max_attempts" => {
            if let Ok(v) = raw.parse::<u32>() {
                settings.tts_retry_max_attempts = v;
            }
        }
        "episode.max_failures" => set_i64!(max_episode_failures),
        "retention.local_mp3_days" => set_i64!(retention_local_mp3_days),
        "retention.audio_cache_days" => set_i64!(retention_audio_cache_days),
        "retention.logs_days" => set_i64!(retention_logs_days),
        "retention.database_rows_days" => set_i64!(retention_database_rows_days),
        "retention.remote_releases_days" => set_i64!(retention_remote_releases_days),
        "worker.transcription_parallelism" => set_usize!(transcription_parallelism),
        "worker.tts_parallelism" => set_usize!(tts_parallelism),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_parses_typed_value() {
        let mut settings = Settings::default();
        apply_override(&mut settings, "scorer.topic_qualification_threshold", "0.8");
        assert_eq!(settings.topic_qualification_threshold, 0.8);
    }

    #[test]
    fn unknown_key_is_ignored() {
        let mut settings = Settings::default();
        let before = settings.feed_lookback_days;
        apply_override(&mut settings, "bogus.key", "99");
        assert_eq!(settings.feed_lookback_days, before);
    }
}
