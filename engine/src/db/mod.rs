//! Repository layer: typed CRUD over the relational store.
//!
//! Each repository opens its own short-lived `rusqlite::Connection` per call
//! rather than holding one open across an `await`. Repository methods are
//! synchronous; phases call them directly since a local SQLite file read or
//! write is fast enough not to warrant `spawn_blocking`.

pub mod digests;
pub mod episodes;
pub mod feeds;
pub mod logs;
pub mod runs;
pub mod schema;
pub mod settings_repo;
pub mod topics;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;

use crate::error::Result;

/// Handle to the database file. Cheaply cloneable (wraps the path only);
/// every repository method opens its own connection.
#[derive(Clone)]
pub struct Db {
    path: Arc<PathBuf>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            path: Arc::new(path),
        })
    }

    pub fn conn(&self) -> Result<Connection> {
        Ok(Connection::open(self.path.as_path())?)
    }
}

/// Bundle of every repository, constructed once per `Context`.
#[derive(Clone)]
pub struct Repositories {
    pub feeds: feeds::FeedRepository,
    pub episodes: episodes::EpisodeRepository,
    pub topics: topics::TopicRepository,
    pub digests: digests::DigestRepository,
    pub runs: runs::RunRepository,
    pub logs: logs::LogRepository,
    pub settings: settings_repo::SettingsRepository,
}

impl Repositories {
    pub fn new(db: Db) -> Self {
        Self {
            feeds: feeds::FeedRepository::new(db.clone()),
            episodes: episodes::EpisodeRepository::new(db.clone()),
            topics: topics::TopicRepository::new(db.clone()),
            digests: digests::DigestRepository::new(db.clone()),
            runs: runs::RunRepository::new(db.clone()),
            logs: logs::LogRepository::new(db.clone()),
            settings: settings_repo::SettingsRepository::new(db),
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Test-only helper: a `Db` backed by a real temp file (not `:memory:`,
/// which would hand every repository call a fresh, independent database
/// since each method opens its own connection).
#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Db::open(dir.path().join("test.sqlite3")).expect("open test db");
    (dir, db)
}
