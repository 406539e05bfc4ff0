use crate::query::JobStatus;
use crate::workflow::{RunPath, RunReport};
use anyhow::Context;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Run history, job handles, run lease and recorded fingerprints.
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: i64,
    pub database: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub path: Option<String>,
    pub failed_step: Option<String>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub run_id: i64,
    pub step: String,
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    Acquired,
    Held { holder: String, expires_at: String },
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn job_status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    pub fn create_run(&self, database: &str) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs(database, started_at, status) VALUES (?1, ?2, 'running')",
            params![database, ts(Utc::now())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_run(&self, run_id: i64, report: &RunReport) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let status = if report.succeeded() { "done" } else { "failed" };
        let path = report.path.map(|p| match p {
            RunPath::Bootstrap => "bootstrap",
            RunPath::Incremental => "incremental",
        });
        let (failed_step, error_kind, error) = match &report.error {
            Some(e) => (
                Some(e.step.clone()),
                Some(e.cause.kind().to_string()),
                Some(e.cause.to_string()),
            ),
            None => (None, None, None),
        };
        let report_json = serde_json::to_string(report)?;

        tx.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2, path = ?3, failed_step = ?4,
                 error_kind = ?5, error = ?6, report_json = ?7
             WHERE id = ?8",
            params![
                ts(report.finished_at),
                status,
                path,
                failed_step,
                error_kind,
                error,
                report_json,
                run_id
            ],
        )?;

        for job in &report.jobs {
            tx.execute(
                "INSERT INTO jobs(run_id, step, job_id, status, rows_affected)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id,
                    job.step,
                    job.job_id,
                    job_status_str(job.status),
                    job.rows_affected.map(|n| n as i64)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn fetch_recent_runs(&self, limit: u32) -> anyhow::Result<Vec<RunSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, database, started_at, finished_at, status, path, failed_step, error_kind, error
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(RunSummary {
                id: row.get(0)?,
                database: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                status: row.get(4)?,
                path: row.get(5)?,
                failed_step: row.get(6)?,
                error_kind: row.get(7)?,
                error: row.get(8)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn jobs_for_run(&self, run_id: i64) -> anyhow::Result<Vec<StoredJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, step, job_id, status FROM jobs WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(StoredJob {
                run_id: row.get(0)?,
                step: row.get(1)?,
                job_id: row.get(2)?,
                status: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Last job handle of the most recent run that recorded any job.
    pub fn last_job(&self) -> anyhow::Result<Option<StoredJob>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                "SELECT run_id, step, job_id, status FROM jobs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(StoredJob {
                        run_id: row.get(0)?,
                        step: row.get(1)?,
                        job_id: row.get(2)?,
                        status: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(job)
    }

    pub fn mark_job_cancelled(&self, job_id: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE jobs SET status = 'cancelled' WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    /// Takes the named lease unless another holder has a live one.
    /// Expired leases are taken over; re-acquiring by the same holder extends it.
    pub fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> anyhow::Result<LeaseOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let now = Utc::now();

        tx.execute(
            "DELETE FROM leases WHERE name = ?1 AND (expires_at < ?2 OR holder = ?3)",
            params![name, ts(now), holder],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO leases(name, holder, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, holder, ts(now), ts(now + ttl)],
        )?;

        let outcome = if inserted == 1 {
            LeaseOutcome::Acquired
        } else {
            let (holder, expires_at): (String, String) = tx.query_row(
                "SELECT holder, expires_at FROM leases WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            LeaseOutcome::Held { holder, expires_at }
        };
        tx.commit()?;
        Ok(outcome)
    }

    pub fn release_lease(&self, name: &str, holder: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(())
    }

    pub fn get_fingerprint(&self, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.lock()?;
        let hex = conn
            .query_row(
                "SELECT hex FROM fingerprints WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hex)
    }

    pub fn put_fingerprint(&self, key: &str, hex: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO fingerprints(key, hex, recorded_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET hex = excluded.hex, recorded_at = excluded.recorded_at",
            params![key, hex, ts(Utc::now())],
        )?;
        Ok(())
    }
}
