use crate::errors::QueryError;
use crate::model::{EtlConfig, QuerySettings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub mod http;
pub mod memory;

/// A typed scalar value in a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Datum {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Datum>);

impl Row {
    pub fn text(values: &[&str]) -> Self {
        Row(values.iter().map(|v| Datum::Text((*v).to_string())).collect())
    }

    /// Catalog listings carry the table name in the first field.
    pub fn first_text(&self) -> Option<&str> {
        self.0.first().and_then(Datum::as_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_scanned_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_ms: Option<u64>,
}

/// Snapshot of a submitted statement as reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryJob {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_location: Option<String>,
    #[serde(default)]
    pub statistics: JobStatistics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_location: Option<String>,
    /// Database the statement runs in, for unqualified table references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl ExecutionOptions {
    pub fn from_settings(q: &QuerySettings) -> Self {
        Self {
            workgroup: q.workgroup.clone(),
            result_location: q.result_location.clone(),
            database: None,
        }
    }

    pub fn in_database(&self, database: &str) -> Self {
        Self {
            database: Some(database.to_string()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// The external SQL query service.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn submit(&self, sql: &str, options: &ExecutionOptions) -> Result<String, QueryError>;
    async fn get_status(&self, job_id: &str) -> Result<QueryJob, QueryError>;
    async fn get_results(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, QueryError>;
    async fn cancel(&self, job_id: &str) -> Result<(), QueryError>;
    fn service_name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Succeeded(QueryJob),
    /// Terminal but not successful; `job.status` is `Failed` or `Cancelled`.
    Failed(QueryJob),
    TimedOut { waited: Duration },
}

/// Submits statements and waits for them. Never retries.
#[derive(Clone)]
pub struct QueryExecutor {
    service: Arc<dyn QueryService>,
    options: ExecutionOptions,
    poll_interval: Duration,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(service: Arc<dyn QueryService>, settings: &QuerySettings) -> Self {
        Self {
            service,
            options: ExecutionOptions::from_settings(settings),
            poll_interval: settings.poll_interval(),
            timeout: settings.timeout(),
        }
    }

    pub fn from_config(service: Arc<dyn QueryService>, cfg: &EtlConfig) -> Self {
        Self::new(service, &cfg.query)
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn service(&self) -> &Arc<dyn QueryService> {
        &self.service
    }

    pub async fn submit(
        &self,
        sql: &str,
        options: &ExecutionOptions,
    ) -> Result<JobHandle, QueryError> {
        let id = self.service.submit(sql, options).await?;
        tracing::debug!(
            event = "lakeflow.query.submitted",
            job_id = %id,
            service = self.service.service_name(),
            statement = %first_line(sql),
        );
        Ok(JobHandle { id })
    }

    /// Polls every `poll_interval` until the job is terminal or `timeout` has elapsed.
    pub async fn await_completion(
        &self,
        handle: &JobHandle,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Completion, QueryError> {
        let start = Instant::now();
        loop {
            let job = self.service.get_status(&handle.id).await?;
            match job.status {
                JobStatus::Succeeded => return Ok(Completion::Succeeded(job)),
                JobStatus::Failed | JobStatus::Cancelled => return Ok(Completion::Failed(job)),
                JobStatus::Queued | JobStatus::Running => {}
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Ok(Completion::TimedOut { waited });
            }
            tokio::time::sleep(poll_interval.min(timeout - waited)).await;
        }
    }

    /// Lazily pages through the result set of a finished job.
    pub fn fetch_rows(&self, handle: &JobHandle) -> ResultRows {
        ResultRows {
            service: self.service.clone(),
            job_id: handle.id.clone(),
            next_token: None,
            exhausted: false,
        }
    }

    /// Submits `sql` and waits with the configured bounds, turning every
    /// non-success into an error.
    pub async fn execute(
        &self,
        sql: &str,
        options: &ExecutionOptions,
    ) -> Result<QueryJob, QueryError> {
        let handle = self.submit(sql, options).await?;
        let completion = self
            .await_completion(&handle, self.poll_interval, self.timeout)
            .await
            .map_err(|e| e.for_job(&handle.id))?;
        match completion {
            Completion::Succeeded(job) => {
                tracing::debug!(
                    event = "lakeflow.query.succeeded",
                    job_id = %job.id,
                    rows_affected = ?job.statistics.rows_affected,
                );
                Ok(job)
            }
            Completion::Failed(job) if job.status == JobStatus::Cancelled => {
                Err(QueryError::JobCancelled { job_id: job.id })
            }
            Completion::Failed(job) => {
                let reason = job
                    .reason
                    .clone()
                    .unwrap_or_else(|| "query failed without a reason".into());
                tracing::warn!(
                    event = "lakeflow.query.failed",
                    job_id = %job.id,
                    reason = %reason,
                );
                Err(QueryError::ExecutionFailure {
                    job_id: job.id,
                    reason,
                })
            }
            Completion::TimedOut { waited } => {
                tracing::warn!(
                    event = "lakeflow.query.timeout",
                    job_id = %handle.id,
                    waited_ms = waited.as_millis() as u64,
                );
                Err(QueryError::Timeout {
                    job_id: handle.id,
                    waited,
                })
            }
        }
    }

    /// `execute` followed by reading every result row.
    pub async fn query_rows(
        &self,
        sql: &str,
        options: &ExecutionOptions,
    ) -> Result<(QueryJob, Vec<Row>), QueryError> {
        let job = self.execute(sql, options).await?;
        let rows = self
            .fetch_rows(&JobHandle { id: job.id.clone() })
            .collect_all()
            .await
            .map_err(|e| e.for_job(&job.id))?;
        Ok((job, rows))
    }

    pub async fn cancel(&self, handle: &JobHandle) -> Result<(), QueryError> {
        self.service.cancel(&handle.id).await
    }
}

/// Pageable result rows of one job. Consumed once; fetch again for a fresh pass.
pub struct ResultRows {
    service: Arc<dyn QueryService>,
    job_id: String,
    next_token: Option<String>,
    exhausted: bool,
}

impl ResultRows {
    pub async fn next_page(&mut self) -> Result<Option<Vec<Row>>, QueryError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .service
            .get_results(&self.job_id, self.next_token.as_deref())
            .await?;
        self.next_token = page.next_token;
        if self.next_token.is_none() {
            self.exhausted = true;
        }
        Ok(Some(page.rows))
    }

    pub async fn collect_all(mut self) -> Result<Vec<Row>, QueryError> {
        let mut rows = Vec::new();
        while let Some(page) = self.next_page().await? {
            rows.extend(page);
        }
        Ok(rows)
    }
}

fn first_line(sql: &str) -> &str {
    sql.trim_start().lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryQueryService;
    use super::*;

    fn executor(svc: Arc<InMemoryQueryService>, timeout_s: u64) -> QueryExecutor {
        QueryExecutor::new(
            svc,
            &QuerySettings {
                poll_interval_ms: Some(100),
                timeout_seconds: Some(timeout_s),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_success() {
        let svc = Arc::new(InMemoryQueryService::new());
        svc.set_polls_until_done(3);
        let ex = executor(svc.clone(), 10);

        let job = ex
            .execute("CREATE DATABASE IF NOT EXISTS db", &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(svc.status_calls() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_job_times_out_with_handle() {
        let svc = Arc::new(InMemoryQueryService::new());
        svc.hang_on("SHOW TABLES");
        let ex = executor(svc, 2);

        let err = ex
            .execute("SHOW TABLES IN db", &ExecutionOptions::default())
            .await
            .unwrap_err();
        match err {
            QueryError::Timeout { job_id, waited } => {
                assert!(!job_id.is_empty());
                assert!(waited >= Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failure_reports_message_verbatim() {
        let svc = Arc::new(InMemoryQueryService::new());
        svc.fail_on("SELECT 1", "SYNTAX_ERROR: line 1:1");
        let ex = executor(svc, 5);

        let err = ex
            .execute("SELECT 1", &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::ExecutionFailure {
                job_id: "q-1".into(),
                reason: "SYNTAX_ERROR: line 1:1".into()
            }
        );
    }

    /// Accepts submissions, then cannot report on them.
    struct StatusOutage {
        inner: InMemoryQueryService,
    }

    #[async_trait]
    impl QueryService for StatusOutage {
        async fn submit(&self, sql: &str, options: &ExecutionOptions) -> Result<String, QueryError> {
            self.inner.submit(sql, options).await
        }

        async fn get_status(&self, _job_id: &str) -> Result<QueryJob, QueryError> {
            Err(QueryError::Submission("status: connection reset".into()))
        }

        async fn get_results(
            &self,
            job_id: &str,
            next_token: Option<&str>,
        ) -> Result<ResultPage, QueryError> {
            self.inner.get_results(job_id, next_token).await
        }

        async fn cancel(&self, job_id: &str) -> Result<(), QueryError> {
            self.inner.cancel(job_id).await
        }

        fn service_name(&self) -> &'static str {
            "status-outage"
        }
    }

    #[tokio::test]
    async fn status_failure_after_submit_keeps_the_handle() {
        let ex = QueryExecutor::new(
            Arc::new(StatusOutage {
                inner: InMemoryQueryService::new(),
            }),
            &QuerySettings::default(),
        );
        let err = ex
            .execute("CREATE DATABASE IF NOT EXISTS db", &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::Unreachable {
                job_id: "q-1".into(),
                reason: "status: connection reset".into()
            }
        );
    }

    #[tokio::test]
    async fn result_rows_page_and_are_not_restartable() {
        let svc = Arc::new(InMemoryQueryService::new().with_page_size(2));
        let ex = executor(svc.clone(), 5);
        let opts = ExecutionOptions::default();
        ex.execute("CREATE DATABASE IF NOT EXISTS db", &opts).await.unwrap();
        for t in ["a_data_csv", "b_data_csv", "c_data_csv"] {
            svc.add_table("db", t, 0);
        }

        let job = ex.execute("SHOW TABLES IN db", &opts).await.unwrap();
        let handle = JobHandle { id: job.id };
        let mut rows = ex.fetch_rows(&handle);
        assert_eq!(rows.next_page().await.unwrap().map(|p| p.len()), Some(2));
        assert_eq!(rows.next_page().await.unwrap().map(|p| p.len()), Some(1));
        assert_eq!(rows.next_page().await.unwrap(), None);

        let all = ex.fetch_rows(&handle).collect_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].first_text(), Some("a_data_csv"));
    }
}
