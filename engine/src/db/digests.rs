use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Draft,
    Scripted,
    Rendered,
    Published,
    Failed,
}

impl DigestStatus {
    fn as_str(self) -> &'static str {
        match self {
            DigestStatus::Draft => "draft",
            DigestStatus::Scripted => "scripted",
            DigestStatus::Rendered => "rendered",
            DigestStatus::Published => "published",
            DigestStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "scripted" => DigestStatus::Scripted,
            "rendered" => DigestStatus::Rendered,
            "published" => DigestStatus::Published,
            "failed" => DigestStatus::Failed,
            _ => DigestStatus::Draft,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub id: i64,
    pub topic: String,
    pub digest_date: String,
    pub digest_timestamp: String,
    pub script_content: String,
    pub script_word_count: i64,
    pub mp3_path: Option<String>,
    pub mp3_duration_seconds: Option<f64>,
    pub mp3_title: String,
    pub mp3_summary: String,
    pub episode_count: i64,
    pub average_score: f64,
    pub published_url: Option<String>,
    pub published_at: Option<String>,
    pub status: DigestStatus,
}

pub struct DigestEpisodeLink {
    pub episode_id: i64,
    pub topic: String,
    pub score: f64,
    pub position: i64,
}

#[derive(Clone)]
pub struct DigestRepository {
    db: Db,
}

impl DigestRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Creates the digest row and its episode links in one transaction:
    /// a crash between the two must never leave a digest with zero links
    /// referencing episodes that were actually selected.
    pub fn create_with_links(
        &self,
        topic: &str,
        digest_date: &str,
        digest_timestamp: &str,
        script_content: &str,
        script_word_count: i64,
        average_score: f64,
        links: &[DigestEpisodeLink],
    ) -> Result<i64> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO digests
                (topic, digest_date, digest_timestamp, script_content, script_word_count,
                 episode_count, average_score, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft', ?8)",
            params![
                topic,
                digest_date,
                digest_timestamp,
                script_content,
                script_word_count,
                links.len() as i64,
                average_score,
                super::now_rfc3339(),
            ],
        )?;
        let digest_id = tx.last_insert_rowid();
        for link in links {
            tx.execute(
                "INSERT INTO digest_episode_links (digest_id, episode_id, topic, score, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![digest_id, link.episode_id, link.topic, link.score, link.position],
            )?;
        }
        tx.commit()?;
        Ok(digest_id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Digest>> {
        let conn = self.db.conn()?;
        conn.query_row(SELECT_DIGEST_SQL, params![id], row_to_digest)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_by_status(&self, status: DigestStatus) -> Result<Vec<Digest>> {
        let conn = self.db.conn()?;
        let sql = format!("{} WHERE status = ?1 ORDER BY id", SELECT_DIGESTS_BASE_SQL);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str()], row_to_digest)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_rendered(&self, id: i64, mp3_path: &str, duration_seconds: f64, title: &str, summary: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE digests SET mp3_path = ?2, mp3_duration_seconds = ?3, mp3_title = ?4,
                    mp3_summary = ?5, status = 'rendered' WHERE id = ?1",
            params![id, mp3_path, duration_seconds, title, summary],
        )?;
        Ok(())
    }

    pub fn set_published(&self, id: i64, published_url: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE digests SET published_url = ?2, published_at = ?3, status = 'published'
             WHERE id = ?1",
            params![id, published_url, super::now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_failed(&self, id: i64) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute("UPDATE digests SET status = 'failed' WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn links_for(&self, digest_id: i64) -> Result<Vec<DigestEpisodeLink>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT episode_id, topic, score, position FROM digest_episode_links
             WHERE digest_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![digest_id], |row| {
                Ok(DigestEpisodeLink {
                    episode_id: row.get(0)?,
                    topic: row.get(1)?,
                    score: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Whether a digest already exists for `topic` on `digest_date`, guarding
    /// the uniqueness invariant before composing a new one.
    pub fn exists_for_date(&self, topic: &str, digest_date: &str) -> Result<bool> {
        let conn = self.db.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM digests WHERE topic = ?1 AND digest_date = ?2",
            params![topic, digest_date],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// The digest already on file for `topic`/`digest_date`, if any.
    pub fn get_for_date(&self, topic: &str, digest_date: &str) -> Result<Option<Digest>> {
        let sql = format!("{} WHERE topic = ?1 AND digest_date = ?2", SELECT_DIGESTS_BASE_SQL);
        let conn = self.db.conn()?;
        conn.query_row(&sql, params![topic, digest_date], row_to_digest)
            .optional()
            .map_err(Into::into)
    }

    /// Distinct dates of published digests older than `cutoff_date`, used by
    /// retention to find candidate remote releases to prune.
    pub fn list_published_dates_before(&self, cutoff_date: &str) -> Result<Vec<String>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT digest_date FROM digests WHERE status = 'published' AND digest_date < ?1",
        )?;
        let rows = stmt
            .query_map(params![cutoff_date], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes digest rows (and their episode links) for digests older than
    /// `cutoff_date`, regardless of status. Returns the number of digest
    /// rows removed.
    pub fn delete_rows_before(&self, cutoff_date: &str) -> Result<usize> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM digest_episode_links WHERE digest_id IN
                (SELECT id FROM digests WHERE digest_date < ?1)",
            params![cutoff_date],
        )?;
        let deleted = tx.execute("DELETE FROM digests WHERE digest_date < ?1", params![cutoff_date])?;
        tx.commit()?;
        Ok(deleted)
    }
}

const SELECT_DIGESTS_BASE_SQL: &str = "SELECT id, topic, digest_date, digest_timestamp,
        script_content, script_word_count, mp3_path, mp3_duration_seconds, mp3_title,
        mp3_summary, episode_count, average_score, published_url, published_at, status
     FROM digests";

const SELECT_DIGEST_SQL: &str = "SELECT id, topic, digest_date, digest_timestamp,
        script_content, script_word_count, mp3_path, mp3_duration_seconds, mp3_title,
        mp3_summary, episode_count, average_score, published_url, published_at, status
     FROM digests WHERE id = ?1";

fn row_to_digest(row: &rusqlite::Row) -> rusqlite::Result<Digest> {
    let status: String = row.get(14)?;
    Ok(Digest {
        id: row.get(0)?,
        topic: row.get(1)?,
        digest_date: row.get(2)?,
        digest_timestamp: row.get(3)?,
        script_content: row.get(4)?,
        script_word_count: row.get(5)?,
        mp3_path: row.get(6)?,
        mp3_duration_seconds: row.get(7)?,
        mp3_title: row.get(8)?,
        mp3_summary: row.get(9)?,
        episode_count: row.get(10)?,
        average_score: row.get(11)?,
        published_url: row.get(12)?,
        published_at: row.get(13)?,
        status: DigestStatus::from_str(&status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_repo() -> (tempfile::TempDir, DigestRepository) {
        let (dir, db) = super::super::test_db();
        (dir, DigestRepository::new(db))
    }

    #[test]
    fn create_with_links_is_atomic() {
        let (_dir, repo) = test_repo();
        let links = vec![
            DigestEpisodeLink {
                episode_id: 1,
                topic: "ai-news".to_string(),
                score: 0.9,
                position: 0,
            },
            DigestEpisodeLink {
                episode_id: 2,
                topic: "ai-news".to_string(),
                score: 0.8,
                position: 1,
            },
        ];
        let id = repo
            .create_with_links("ai-news", "2026-07-27", "2026-07-27T12:00:00Z", "script", 2, 0.85, &links)
            .unwrap();
        let digest = repo.get(id).unwrap().unwrap();
        assert_eq!(digest.episode_count, 2);
        assert_eq!(repo.links_for(id).unwrap().len(), 2);
    }

    #[test]
    fn exists_for_date_reflects_uniqueness_invariant() {
        let (_dir, repo) = test_repo();
        assert!(!repo.exists_for_date("ai-news", "2026-07-27").unwrap());
        repo.create_with_links("ai-news", "2026-07-27", "2026-07-27T12:00:00Z", "s", 1, 0.5, &[])
            .unwrap();
        assert!(repo.exists_for_date("ai-news", "2026-07-27").unwrap());
    }

    #[test]
    fn lifecycle_transitions_update_status() {
        let (_dir, repo) = test_repo();
        let id = repo
            .create_with_links("ai-news", "2026-07-27", "2026-07-27T12:00:00Z", "s", 1, 0.5, &[])
            .unwrap();
        repo.set_rendered(id, "/cache/digest.mp3", 600.0, "Title", "Summary").unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap().status, DigestStatus::Rendered);
        repo.set_published(id, "https://releases.example.com/d/1").unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap().status, DigestStatus::Published);
    }
}
