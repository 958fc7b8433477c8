use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::content::Content;
use crate::publish::{PublishResult, PublishStatus};

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One finished publish run as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub content_path: String,
    pub title: String,
    pub draft: bool,
    pub status: String,
    pub message: String,
    pub evidence_path: Option<String>,
    pub trail: Vec<String>,
}

impl RunRecord {
    pub fn from_result(
        content_path: &Path,
        content: &Content,
        result: &PublishResult,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            content_path: content_path.to_string_lossy().to_string(),
            title: content.title.clone(),
            draft: result.draft,
            status: result.status.as_str().to_string(),
            message: result.message.clone(),
            evidence_path: result
                .evidence_path
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
            trail: result
                .trail
                .iter()
                .map(|state| format!("{state:?}"))
                .collect(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn is_failure(&self) -> bool {
        self.status == PublishStatus::Failure.as_str()
    }
}

/// SQLite history of publish runs plus a JSON-lines log of failed ones.
#[derive(Debug)]
pub struct RunLedger {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl RunLedger {
    pub fn new(db_path: impl AsRef<Path>, failure_log: impl AsRef<Path>) -> LedgerResult<Self> {
        let log_path = failure_log.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let ledger = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        ledger.initialize_db()?;
        Ok(ledger)
    }

    fn initialize_db(&self) -> LedgerResult<()> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS publish_runs (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                content_path TEXT,
                title TEXT,
                draft INTEGER,
                status TEXT,
                message TEXT,
                evidence_path TEXT,
                trail TEXT,
                duration_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_publish_runs_started ON publish_runs(started_at DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> LedgerResult<Connection> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record(&self, run: &RunRecord) -> LedgerResult<()> {
        if run.is_failure() {
            let json = serde_json::to_string(run)?;
            if let Ok(mut guard) = self.log.lock() {
                writeln!(guard, "{json}")?;
                guard.flush()?;
            }
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO publish_runs (
                id, started_at, finished_at, content_path, title, draft, status, message,
                evidence_path, trail, duration_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.id,
                run.started_at,
                run.finished_at,
                run.content_path,
                run.title,
                if run.draft { 1 } else { 0 },
                run.status,
                run.message,
                run.evidence_path,
                serde_json::to_string(&run.trail)?,
                run.duration_ms(),
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> LedgerResult<Vec<RunRecord>> {
        let conn = self.open_db()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, content_path, title, draft, status, message,
                    evidence_path, trail
             FROM publish_runs
             ORDER BY started_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let trail: String = row.get(9)?;
            Ok((
                RunRecord {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    content_path: row.get(3)?,
                    title: row.get(4)?,
                    draft: row.get::<_, i64>(5)? != 0,
                    status: row.get(6)?,
                    message: row.get(7)?,
                    evidence_path: row.get(8)?,
                    trail: Vec::new(),
                },
                trail,
            ))
        })?;
        let mut runs = Vec::new();
        for row in rows {
            let (mut run, trail) = row?;
            run.trail = serde_json::from_str(&trail)?;
            runs.push(run);
        }
        Ok(runs)
    }
}
