use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{now_rfc3339, Db};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub active: bool,
    pub consecutive_failures: i64,
    pub last_checked: Option<String>,
    pub last_episode_date: Option<String>,
}

#[derive(Clone)]
pub struct FeedRepository {
    db: Db,
}

impl FeedRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a feed row on first ingestion. Idempotent on `url`.
    pub fn upsert(&self, url: &str, title: &str, description: &str) -> Result<Feed> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO feeds (url, title, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                description = excluded.description",
            params![url, title, description],
        )?;
        self.get_by_url(url)?
            .ok_or_else(|| crate::error::PipelineError::config("feed vanished after upsert"))
    }

    pub fn get_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT id, url, title, description, active, consecutive_failures,
                    last_checked, last_episode_date
             FROM feeds WHERE url = ?1",
            params![url],
            row_to_feed,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_active(&self) -> Result<Vec<Feed>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, url, title, description, active, consecutive_failures,
                    last_checked, last_episode_date
             FROM feeds WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], row_to_feed)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Successful fetch: reset the failure counter, stamp `last_checked`.
    pub fn record_success(&self, feed_id: i64) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE feeds SET consecutive_failures = 0, last_checked = ?2 WHERE id = ?1",
            params![feed_id, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Failed fetch/parse: increment the counter. Exceeding a threshold is
    /// logged by the caller but never auto-deactivates the feed here.
    pub fn record_failure(&self, feed_id: i64) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE feeds SET consecutive_failures = consecutive_failures + 1,
                    last_checked = ?2 WHERE id = ?1",
            params![feed_id, now_rfc3339()],
        )?;
        conn.query_row(
            "SELECT consecutive_failures FROM feeds WHERE id = ?1",
            params![feed_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    pub fn record_last_episode_date(&self, feed_id: i64, date: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE feeds SET last_episode_date = ?2 WHERE id = ?1",
            params![feed_id, date],
        )?;
        Ok(())
    }
}

fn row_to_feed(row: &rusqlite::Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        consecutive_failures: row.get(5)?,
        last_checked: row.get(6)?,
        last_episode_date: row.get(7)?,
    })
}
