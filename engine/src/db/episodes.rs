use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

use super::{now_rfc3339, Db};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    Processing,
    Transcribed,
    Scored,
    Digested,
    Failed,
}

impl EpisodeStatus {
    fn as_str(self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Processing => "processing",
            EpisodeStatus::Transcribed => "transcribed",
            EpisodeStatus::Scored => "scored",
            EpisodeStatus::Digested => "digested",
            EpisodeStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "processing" => EpisodeStatus::Processing,
            "transcribed" => EpisodeStatus::Transcribed,
            "scored" => EpisodeStatus::Scored,
            "digested" => EpisodeStatus::Digested,
            "failed" => EpisodeStatus::Failed,
            _ => EpisodeStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub episode_guid: String,
    pub feed_id: i64,
    pub title: String,
    pub published_date: Option<String>,
    pub audio_url: String,
    pub duration_seconds: Option<i64>,
    pub description: String,
    pub audio_path: Option<String>,
    pub transcript_content: String,
    pub transcript_word_count: i64,
    pub transcript_generated_at: Option<String>,
    pub chunk_count: i64,
    pub scores: Option<HashMap<String, f64>>,
    pub scored_at: Option<String>,
    pub status: EpisodeStatus,
    pub failure_count: i64,
    pub failure_reason: Option<String>,
    pub processing_started_at: Option<String>,
}

/// Fields required to insert a newly discovered episode.
pub struct NewEpisode<'a> {
    pub episode_guid: &'a str,
    pub feed_id: i64,
    pub title: &'a str,
    pub published_date: Option<&'a str>,
    pub audio_url: &'a str,
    pub description: &'a str,
}

#[derive(Clone)]
pub struct EpisodeRepository {
    db: Db,
}

impl EpisodeRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Idempotent on `episode_guid`: inserting a duplicate GUID is a no-op
    /// and returns `false`.
    pub fn insert_if_new(&self, new: NewEpisode<'_>) -> Result<bool> {
        let conn = self.db.conn()?;
        let now = now_rfc3339();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO episodes
                (episode_guid, feed_id, title, published_date, audio_url, description,
                 status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            params![
                new.episode_guid,
                new.feed_id,
                new.title,
                new.published_date,
                new.audio_url,
                new.description,
                now,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get(&self, id: i64) -> Result<Option<Episode>> {
        let conn = self.db.conn()?;
        conn.query_row(SELECT_EPISODE_SQL, params![id], row_to_episode)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_by_status(&self, status: EpisodeStatus, limit: Option<i64>) -> Result<Vec<Episode>> {
        let conn = self.db.conn()?;
        let sql = format!(
            "{} WHERE status = ?1 ORDER BY id LIMIT ?2",
            SELECT_EPISODES_BASE_SQL
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str(), limit.unwrap_or(i64::MAX)], row_to_episode)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stuck-worker recovery: episodes left in `processing` past
    /// `timeout_secs` are reset to `pending`. Returns the count reclaimed.
    pub fn recover_stuck(&self, timeout_secs: i64) -> Result<usize> {
        let conn = self.db.conn()?;
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(timeout_secs)).to_rfc3339();
        let changed = conn.execute(
            "UPDATE episodes SET status = 'pending', processing_started_at = NULL, updated_at = ?2
             WHERE status = 'processing' AND processing_started_at < ?1",
            params![cutoff, now_rfc3339()],
        )?;
        Ok(changed)
    }

    /// Marks the episode `processing`, called on the first successful chunk
    /// of transcription. A no-op if already processing or beyond.
    pub fn mark_processing_started(&self, id: i64) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE episodes SET status = 'processing', processing_started_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Appends one chunk's transcript text. Incremental, memory-bounded
    /// assembly: the repository concatenates under the hood, and the caller
    /// never holds more than this one chunk in RAM. Appends are
    /// serialized per-row by SQLite's own write lock, so concurrent appends
    /// for distinct episodes proceed independently while appends to the same
    /// episode are strictly ordered by call order.
    pub fn append_transcript_chunk(&self, id: i64, text: &str, word_count_delta: i64) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE episodes SET
                transcript_content = transcript_content || ?2,
                transcript_word_count = transcript_word_count + ?3,
                chunk_count = chunk_count + 1,
                updated_at = ?4
             WHERE id = ?1",
            params![id, text, word_count_delta, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Records the cache path the acquirer wrote the episode's audio to.
    pub fn set_audio_path(&self, id: i64, path: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE episodes SET audio_path = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, path, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn mark_transcribed(&self, id: i64) -> Result<()> {
        let conn = self.db.conn()?;
        let now = now_rfc3339();
        conn.execute(
            "UPDATE episodes SET status = 'transcribed', transcript_generated_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    pub fn set_scores(&self, id: i64, scores: &HashMap<String, f64>) -> Result<()> {
        let conn = self.db.conn()?;
        let now = now_rfc3339();
        let json = serde_json::to_string(scores)?;
        conn.execute(
            "UPDATE episodes SET scores = ?2, scored_at = ?3, status = 'scored', updated_at = ?3
             WHERE id = ?1",
            params![id, json, now],
        )?;
        Ok(())
    }

    pub fn mark_digested(&self, id: i64) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE episodes SET status = 'digested', updated_at = ?2 WHERE id = ?1",
            params![id, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Records a permanent per-episode failure: increments `failure_count`,
    /// stores the reason, and transitions to `failed` once the count
    /// reaches `max_failures`.
    pub fn record_failure(&self, id: i64, reason: &str, max_failures: i64) -> Result<EpisodeStatus> {
        let conn = self.db.conn()?;
        let now = now_rfc3339();
        conn.execute(
            "UPDATE episodes SET failure_count = failure_count + 1, failure_reason = ?2,
                    updated_at = ?3 WHERE id = ?1",
            params![id, reason, now],
        )?;
        let failure_count: i64 = conn.query_row(
            "SELECT failure_count FROM episodes WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if failure_count >= max_failures {
            conn.execute(
                "UPDATE episodes SET status = 'failed', updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(EpisodeStatus::Failed)
        } else {
            conn.query_row(
                "SELECT status FROM episodes WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .map(|s| EpisodeStatus::from_str(&s))
            .map_err(Into::into)
        }
    }

    /// Episodes scored and not yet digested, qualifying for `topic` at
    /// `threshold`, ordered by score desc then publish date desc.
    pub fn list_qualifying_for_topic(&self, topic: &str, threshold: f64) -> Result<Vec<(Episode, f64)>> {
        let conn = self.db.conn()?;
        let sql = format!("{} WHERE status = 'scored'", SELECT_EPISODES_BASE_SQL);
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map([], row_to_episode)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut qualifying: Vec<(Episode, f64)> = episodes
            .into_iter()
            .filter_map(|ep| {
                let score = ep.scores.as_ref()?.get(topic).copied()?;
                (score >= threshold).then_some((ep, score))
            })
            .collect();
        qualifying.sort_by(|(a_ep, a_score), (b_ep, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_ep.published_date.cmp(&a_ep.published_date))
        });
        Ok(qualifying)
    }

    /// Any scored-and-undigested episode, regardless of topic score — used
    /// only by the general-summary fallback, which is gated off by default.
    pub fn list_any_scored_undigested(&self) -> Result<Vec<Episode>> {
        self.list_by_status(EpisodeStatus::Scored, None)
    }

    /// Deletes digested episodes last touched before `cutoff`, skipping any
    /// still referenced by a digest's episode links so the link table never
    /// ends up pointing at a missing row.
    pub fn delete_digested_before(&self, cutoff: &str) -> Result<usize> {
        let conn = self.db.conn()?;
        let deleted = conn.execute(
            "DELETE FROM episodes WHERE status = 'digested' AND updated_at < ?1
                AND id NOT IN (SELECT episode_id FROM digest_episode_links)",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

const SELECT_EPISODES_BASE_SQL: &str = "SELECT id, episode_guid, feed_id, title, published_date,
        audio_url, duration_seconds, description, audio_path, transcript_content,
        transcript_word_count, transcript_generated_at, chunk_count, scores, scored_at,
        status, failure_count, failure_reason, processing_started_at
     FROM episodes";

const SELECT_EPISODE_SQL: &str = "SELECT id, episode_guid, feed_id, title, published_date,
        audio_url, duration_seconds, description, audio_path, transcript_content,
        transcript_word_count, transcript_generated_at, chunk_count, scores, scored_at,
        status, failure_count, failure_reason, processing_started_at
     FROM episodes WHERE id = ?1";

fn row_to_episode(row: &rusqlite::Row) -> rusqlite::Result<Episode> {
    let scores_json: Option<String> = row.get(13)?;
    let scores = scores_json
        .map(|s| serde_json::from_str::<HashMap<String, f64>>(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e)))?;
    let status: String = row.get(15)?;
    Ok(Episode {
        id: row.get(0)?,
        episode_guid: row.get(1)?,
        feed_id: row.get(2)?,
        title: row.get(3)?,
        published_date: row.get(4)?,
        audio_url: row.get(5)?,
        duration_seconds: row.get(6)?,
        description: row.get(7)?,
        audio_path: row.get(8)?,
        transcript_content: row.get(9)?,
        transcript_word_count: row.get(10)?,
        transcript_generated_at: row.get(11)?,
        chunk_count: row.get(12)?,
        scores,
        scored_at: row.get(14)?,
        status: EpisodeStatus::from_str(&status),
        failure_count: row.get(16)?,
        failure_reason: row.get(17)?,
        processing_started_at: row.get(18)?,
    })
}

impl Episode {
    /// FSM invariant checker: status must be consistent with populated
    /// fields.
    pub fn check_fsm_invariants(&self) -> std::result::Result<(), String> {
        match self.status {
            EpisodeStatus::Transcribed | EpisodeStatus::Scored | EpisodeStatus::Digested => {
                if self.transcript_content.is_empty() || self.transcript_generated_at.is_none() {
                    return Err(format!(
                        "episode {} is {:?} but missing transcript",
                        self.id, self.status
                    ));
                }
            }
            _ => {}
        }
        if matches!(self.status, EpisodeStatus::Scored | EpisodeStatus::Digested) && self.scores.is_none() {
            return Err(format!("episode {} is {:?} but scores is null", self.id, self.status));
        }
        if self.status == EpisodeStatus::Failed && self.failure_count < 3 {
            return Err(format!(
                "episode {} is failed with failure_count {} < 3",
                self.id, self.failure_count
            ));
        }
        Ok(())
    }
}

pub fn classify_transcription_not_found(id: i64) -> PipelineError {
    PipelineError::permanent(format!("episode {id} produced no valid chunks"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::feeds::FeedRepository;

    fn setup() -> (tempfile::TempDir, EpisodeRepository, i64) {
        let (dir, db) = super::super::test_db();
        let feeds = FeedRepository::new(db.clone());
        let feed = feeds.upsert("https://example.com/feed", "Example", "").unwrap();
        (dir, EpisodeRepository::new(db), feed.id)
    }

    #[test]
    fn insert_if_new_is_idempotent_on_guid() {
        let (_dir, repo, feed_id) = setup();
        let new = NewEpisode {
            episode_guid: "guid-1",
            feed_id,
            title: "Ep 1",
            published_date: Some("2026-01-01"),
            audio_url: "https://example.com/ep1.mp3",
            description: "",
        };
        assert!(repo
            .insert_if_new(NewEpisode {
                episode_guid: "guid-1",
                feed_id,
                title: "Ep 1",
                published_date: Some("2026-01-01"),
                audio_url: "https://example.com/ep1.mp3",
                description: "",
            })
            .unwrap());
        assert!(!repo.insert_if_new(new).unwrap());
    }

    #[test]
    fn transcript_append_is_ordered_and_incremental() {
        let (_dir, repo, feed_id) = setup();
        repo.insert_if_new(NewEpisode {
            episode_guid: "guid-2",
            feed_id,
            title: "Ep 2",
            published_date: None,
            audio_url: "https://example.com/ep2.mp3",
            description: "",
        })
        .unwrap();
        let episode = repo.list_by_status(EpisodeStatus::Pending, None).unwrap().remove(0);
        repo.mark_processing_started(episode.id).unwrap();
        repo.append_transcript_chunk(episode.id, "hello ", 1).unwrap();
        repo.append_transcript_chunk(episode.id, "world", 1).unwrap();
        repo.mark_transcribed(episode.id).unwrap();
        let reloaded = repo.get(episode.id).unwrap().unwrap();
        assert_eq!(reloaded.transcript_content, "hello world");
        assert_eq!(reloaded.transcript_word_count, 2);
        assert_eq!(reloaded.status, EpisodeStatus::Transcribed);
        assert!(reloaded.check_fsm_invariants().is_ok());
    }

    #[test]
    fn failure_count_transitions_to_failed_at_threshold() {
        let (_dir, repo, feed_id) = setup();
        repo.insert_if_new(NewEpisode {
            episode_guid: "guid-3",
            feed_id,
            title: "Ep 3",
            published_date: None,
            audio_url: "https://example.com/ep3.mp3",
            description: "",
        })
        .unwrap();
        let episode = repo.list_by_status(EpisodeStatus::Pending, None).unwrap().remove(0);
        assert_eq!(
            repo.record_failure(episode.id, "bad audio", 3).unwrap(),
            EpisodeStatus::Pending
        );
        assert_eq!(
            repo.record_failure(episode.id, "bad audio", 3).unwrap(),
            EpisodeStatus::Pending
        );
        assert_eq!(
            repo.record_failure(episode.id, "bad audio", 3).unwrap(),
            EpisodeStatus::Failed
        );
    }

    #[test]
    fn stuck_processing_episode_is_recovered_to_pending() {
        let (_dir, repo, feed_id) = setup();
        repo.insert_if_new(NewEpisode {
            episode_guid: "guid-4",
            feed_id,
            title: "Ep 4",
            published_date: None,
            audio_url: "https://example.com/ep4.mp3",
            description: "",
        })
        .unwrap();
        let episode = repo.list_by_status(EpisodeStatus::Pending, None).unwrap().remove(0);
        repo.mark_processing_started(episode.id).unwrap();
        // Force processing_started_at into the past.
        let conn = repo.db.conn().unwrap();
        conn.execute(
            "UPDATE episodes SET processing_started_at = '2000-01-01T00:00:00Z' WHERE id = ?1",
            params![episode.id],
        )
        .unwrap();
        let recovered = repo.recover_stuck(60).unwrap();
        assert_eq!(recovered, 1);
        let reloaded = repo.get(episode.id).unwrap().unwrap();
        assert_eq!(reloaded.status, EpisodeStatus::Pending);
    }

    #[test]
    fn qualifying_episodes_ordered_by_score_then_date() {
        let (_dir, repo, feed_id) = setup();
        for (guid, date) in [("a", "2026-01-01"), ("b", "2026-01-02"), ("c", "2026-01-01")] {
            repo.insert_if_new(NewEpisode {
                episode_guid: guid,
                feed_id,
                title: guid,
                published_date: Some(date),
                audio_url: "https://example.com/x.mp3",
                description: "",
            })
            .unwrap();
        }
        let pending = repo.list_by_status(EpisodeStatus::Pending, None).unwrap();
        let scores = [("a", 0.9), ("b", 0.9), ("c", 0.5)];
        for ep in &pending {
            let score = scores.iter().find(|(g, _)| *g == ep.episode_guid).unwrap().1;
            let mut map = HashMap::new();
            map.insert("AI News".to_string(), score);
            repo.set_scores(ep.id, &map).unwrap();
        }
        let qualifying = repo.list_qualifying_for_topic("AI News", 0.6).unwrap();
        assert_eq!(qualifying.len(), 2);
        assert_eq!(qualifying[0].0.episode_guid, "b");
        assert_eq!(qualifying[1].0.episode_guid, "a");
    }
}
