use super::state::{RunPath, WorkflowState};
use crate::errors::WorkflowError;
use crate::loader::LoadOutcome;
use crate::query::{JobStatus, Row};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub queries: u32,
    pub objects_applied: u32,
    pub objects_existing: u32,
    pub loads: u32,
    pub raw_skipped: u32,
    pub unrecognized_skipped: u32,
    /// Optimized by name, but no configured dataset to pair it with.
    pub unpaired_skipped: u32,
    pub duplicate_skipped: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub step: String,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

/// State threaded through one workflow run. Owned by that run only.
#[derive(Debug)]
pub struct ExecutionContext {
    pub started_at: DateTime<Utc>,
    pub state: WorkflowState,
    pub visited: Vec<WorkflowState>,
    pub path: Option<RunPath>,
    pub lookup_rows: Vec<Row>,
    /// Catalog row being classified.
    pub current_row: Option<Row>,
    pub counters: Counters,
    pub jobs: Vec<JobRecord>,
    pub loads: Vec<LoadOutcome>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            state: WorkflowState::Start,
            visited: vec![WorkflowState::Start],
            path: None,
            lookup_rows: Vec::new(),
            current_row: None,
            counters: Counters::default(),
            jobs: Vec::new(),
            loads: Vec::new(),
        }
    }

    pub(crate) fn transition(&mut self, next: WorkflowState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::info!(
            event = "lakeflow.workflow.transition",
            from = %self.state,
            to = %next,
        );
        self.state = next;
        self.visited.push(next);
    }

    pub(crate) fn record_job(
        &mut self,
        step: &str,
        job_id: &str,
        status: JobStatus,
        rows_affected: Option<u64>,
    ) {
        self.counters.queries += 1;
        self.jobs.push(JobRecord {
            step: step.to_string(),
            job_id: job_id.to_string(),
            status,
            rows_affected,
        });
    }

    /// Most recent job handle; may still be running after a timeout or cancel.
    pub fn last_job(&self) -> Option<&str> {
        self.jobs.last().map(|j| j.job_id.as_str())
    }

    pub fn lookup_table_names(&self) -> Vec<String> {
        self.lookup_rows
            .iter()
            .filter_map(|r| r.first_text().map(str::to_string))
            .collect()
    }

    pub(crate) fn into_report(self, database: &str, error: Option<WorkflowError>) -> RunReport {
        let finished_at = Utc::now();
        let lookup_tables = self.lookup_table_names();
        RunReport {
            database: database.to_string(),
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds().max(0) as u64,
            final_state: self.state,
            path: self.path,
            visited: self.visited,
            lookup_tables,
            counters: self.counters,
            loads: self.loads,
            jobs: self.jobs,
            error,
        }
    }
}

/// What a run did, for humans and for the run history.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub database: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub final_state: WorkflowState,
    pub path: Option<RunPath>,
    pub visited: Vec<WorkflowState>,
    pub lookup_tables: Vec<String>,
    pub counters: Counters,
    pub loads: Vec<LoadOutcome>,
    pub jobs: Vec<JobRecord>,
    pub error: Option<WorkflowError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == WorkflowState::Done
    }

    pub fn last_job(&self) -> Option<&str> {
        self.jobs.last().map(|j| j.job_id.as_str())
    }

    pub fn into_result(mut self) -> Result<RunReport, WorkflowError> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}
