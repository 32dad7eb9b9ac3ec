use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{now_rfc3339, Db};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLogEntry {
    pub run_id: String,
    pub phase: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

/// Mirrors warn/error tracing events into the relational store so a run's
/// problems survive past the log file's retention window.
#[derive(Clone)]
pub struct LogRepository {
    db: Db,
}

impl LogRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn record(&self, run_id: &str, phase: &str, level: LogLevel, message: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO pipeline_logs (run_id, phase, timestamp, level, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, phase, now_rfc3339(), level.as_str(), message],
        )?;
        Ok(())
    }

    pub fn for_run(&self, run_id: &str) -> Result<Vec<PipelineLogEntry>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, phase, timestamp, level, message FROM pipeline_logs
             WHERE run_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let level: String = row.get(3)?;
                Ok(PipelineLogEntry {
                    run_id: row.get(0)?,
                    phase: row.get(1)?,
                    timestamp: row.get(2)?,
                    level: if level == "ERROR" { LogLevel::Error } else { LogLevel::Warn },
                    message: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes log rows older than `cutoff_rfc3339`.
    pub fn purge_before(&self, cutoff_rfc3339: &str) -> Result<usize> {
        let conn = self.db.conn()?;
        let deleted = conn.execute(
            "DELETE FROM pipeline_logs WHERE timestamp < ?1",
            params![cutoff_rfc3339],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_repo() -> (tempfile::TempDir, LogRepository) {
        let (dir, db) = super::super::test_db();
        (dir, LogRepository::new(db))
    }

    #[test]
    fn records_and_lists_for_run() {
        let (_dir, repo) = test_repo();
        repo.record("run-1", "score", LogLevel::Warn, "low confidence").unwrap();
        repo.record("run-1", "score", LogLevel::Error, "provider timeout").unwrap();
        repo.record("run-2", "publish", LogLevel::Error, "unrelated run").unwrap();
        let entries = repo.for_run("run-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Warn);
    }
}
