//! Schema initialization.
//!
//! One `execute_batch` of `CREATE TABLE IF NOT EXISTS` statements, run once
//! per connection open: WAL mode, idempotent DDL, indexes alongside their
//! table.

use rusqlite::Connection;

use crate::error::Result;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS feeds (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            url                 TEXT NOT NULL UNIQUE,
            title               TEXT NOT NULL DEFAULT '',
            description         TEXT NOT NULL DEFAULT '',
            active              INTEGER NOT NULL DEFAULT 1,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_checked        TEXT,
            last_episode_date   TEXT
        );

        CREATE TABLE IF NOT EXISTS episodes (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            episode_guid            TEXT NOT NULL UNIQUE,
            feed_id                 INTEGER NOT NULL REFERENCES feeds(id),
            title                   TEXT NOT NULL DEFAULT '',
            published_date          TEXT,
            audio_url               TEXT NOT NULL,
            duration_seconds        INTEGER,
            description             TEXT NOT NULL DEFAULT '',
            audio_path              TEXT,
            transcript_content      TEXT NOT NULL DEFAULT '',
            transcript_word_count   INTEGER NOT NULL DEFAULT 0,
            transcript_generated_at TEXT,
            chunk_count             INTEGER NOT NULL DEFAULT 0,
            scores                  TEXT,
            scored_at               TEXT,
            status                  TEXT NOT NULL DEFAULT 'pending',
            failure_count           INTEGER NOT NULL DEFAULT 0,
            failure_reason          TEXT,
            processing_started_at   TEXT,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(status);
        CREATE INDEX IF NOT EXISTS idx_episodes_feed ON episodes(feed_id);

        CREATE TABLE IF NOT EXISTS topics (
            slug              TEXT PRIMARY KEY,
            name              TEXT NOT NULL,
            description       TEXT NOT NULL DEFAULT '',
            voice_id          TEXT NOT NULL DEFAULT '',
            voice_settings    TEXT NOT NULL DEFAULT '{}',
            instructions_md   TEXT NOT NULL DEFAULT '',
            is_active         INTEGER NOT NULL DEFAULT 1,
            sort_order        INTEGER NOT NULL DEFAULT 0,
            use_dialogue_api  INTEGER NOT NULL DEFAULT 0,
            dialogue_model    TEXT NOT NULL DEFAULT '',
            voice_config      TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS digests (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            topic                TEXT NOT NULL REFERENCES topics(slug),
            digest_date          TEXT NOT NULL,
            digest_timestamp     TEXT NOT NULL,
            script_content       TEXT NOT NULL DEFAULT '',
            script_word_count    INTEGER NOT NULL DEFAULT 0,
            mp3_path             TEXT,
            mp3_duration_seconds REAL,
            mp3_title            TEXT NOT NULL DEFAULT '',
            mp3_summary          TEXT NOT NULL DEFAULT '',
            episode_count        INTEGER NOT NULL DEFAULT 0,
            average_score        REAL NOT NULL DEFAULT 0,
            published_url        TEXT,
            published_at         TEXT,
            status               TEXT NOT NULL DEFAULT 'draft',
            created_at           TEXT NOT NULL,
            UNIQUE(topic, digest_date, digest_timestamp)
        );
        CREATE INDEX IF NOT EXISTS idx_digests_topic_date ON digests(topic, digest_date);
        CREATE INDEX IF NOT EXISTS idx_digests_status ON digests(status);

        CREATE TABLE IF NOT EXISTS digest_episode_links (
            digest_id  INTEGER NOT NULL REFERENCES digests(id),
            episode_id INTEGER NOT NULL REFERENCES episodes(id),
            topic      TEXT NOT NULL,
            score      REAL NOT NULL,
            position   INTEGER NOT NULL,
            PRIMARY KEY (digest_id, episode_id)
        );

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id              TEXT PRIMARY KEY,
            workflow_run_id TEXT,
            status          TEXT NOT NULL DEFAULT 'running',
            conclusion      TEXT,
            started_at      TEXT NOT NULL,
            finished_at     TEXT,
            phase_history   TEXT NOT NULL DEFAULT '[]',
            current_phase   TEXT
        );

        CREATE TABLE IF NOT EXISTS pipeline_logs (
            run_id    TEXT NOT NULL,
            phase     TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            level     TEXT NOT NULL,
            message   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pipeline_logs_run ON pipeline_logs(run_id, phase);

        CREATE TABLE IF NOT EXISTS web_settings (
            category TEXT NOT NULL,
            key      TEXT NOT NULL,
            value    TEXT NOT NULL,
            type     TEXT NOT NULL,
            PRIMARY KEY (category, key)
        );
        ",
    )?;
    Ok(())
}
