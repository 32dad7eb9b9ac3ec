use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{now_rfc3339, Db};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub workflow_run_id: Option<String>,
    pub status: RunStatus,
    pub conclusion: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub phase_history: Vec<String>,
    pub current_phase: Option<String>,
}

#[derive(Clone)]
pub struct RunRepository {
    db: Db,
}

impl RunRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn start(&self, id: &str, workflow_run_id: Option<&str>) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO pipeline_runs (id, workflow_run_id, status, started_at, phase_history)
             VALUES (?1, ?2, 'running', ?3, '[]')",
            params![id, workflow_run_id, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PipelineRun>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT id, workflow_run_id, status, conclusion, started_at, finished_at,
                    phase_history, current_phase
             FROM pipeline_runs WHERE id = ?1",
            params![id],
            row_to_run,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Appends `phase` to the run's phase history and marks it current.
    pub fn enter_phase(&self, id: &str, phase: &str) -> Result<()> {
        let conn = self.db.conn()?;
        let history_json: String = conn.query_row(
            "SELECT phase_history FROM pipeline_runs WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let mut history: Vec<String> = serde_json::from_str(&history_json)?;
        history.push(phase.to_string());
        conn.execute(
            "UPDATE pipeline_runs SET phase_history = ?2, current_phase = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(&history)?, phase],
        )?;
        Ok(())
    }

    pub fn finish(&self, id: &str, status: RunStatus, conclusion: Option<&str>) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE pipeline_runs SET status = ?2, conclusion = ?3, finished_at = ?4,
                    current_phase = NULL WHERE id = ?1",
            params![id, status.as_str(), conclusion, now_rfc3339()],
        )?;
        Ok(())
    }
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<PipelineRun> {
    let status: String = row.get(2)?;
    let history_json: String = row.get(6)?;
    let phase_history = serde_json::from_str(&history_json).unwrap_or_default();
    Ok(PipelineRun {
        id: row.get(0)?,
        workflow_run_id: row.get(1)?,
        status: RunStatus::from_str(&status),
        conclusion: row.get(3)?,
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        phase_history,
        current_phase: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_repo() -> (tempfile::TempDir, RunRepository) {
        let (dir, db) = super::super::test_db();
        (dir, RunRepository::new(db))
    }

    #[test]
    fn phase_history_accumulates_in_order() {
        let (_dir, repo) = test_repo();
        repo.start("run-1", None).unwrap();
        repo.enter_phase("run-1", "feed_ingest").unwrap();
        repo.enter_phase("run-1", "acquire").unwrap();
        let run = repo.get("run-1").unwrap().unwrap();
        assert_eq!(run.phase_history, vec!["feed_ingest", "acquire"]);
        assert_eq!(run.current_phase.as_deref(), Some("acquire"));
    }

    #[test]
    fn finish_clears_current_phase() {
        let (_dir, repo) = test_repo();
        repo.start("run-2", Some("wf-123")).unwrap();
        repo.enter_phase("run-2", "publish").unwrap();
        repo.finish("run-2", RunStatus::Completed, Some("success")).unwrap();
        let run = repo.get("run-2").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.current_phase.is_none());
        assert!(run.finished_at.is_some());
    }
}
