//! The orchestration state machine.
//!
//! ```text
//! Start -> EnsureDatabase -> LookupTables -> FirstRunDecision
//!                                              |            |
//!                                          Bootstrap   ClassifyAndLoad -> [RefreshView]
//!                                              |            |
//!                                              +--> Done <--+
//! ```
//!
//! Every step may move the run to `Failed`, which ends it. Nothing is retried:
//! re-triggering a whole run is safe for the bootstrap path but repeats the
//! incremental loads, so retry policy belongs to the caller.

pub mod context;
pub mod state;

use crate::classify::{TableClass, TableClassifier};
use crate::errors::{EtlError, QueryError, WorkflowError};
use crate::loader::{IncrementalLoader, LoadOutcome};
use crate::model::EtlConfig;
use crate::query::{JobStatus, QueryExecutor, QueryService};
use crate::schema::{Created, SchemaBootstrapper};
use crate::sql;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub use context::{Counters, ExecutionContext, JobRecord, RunReport};
pub use state::{first_run_decision, RunPath, WorkflowState};

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Catalog rows processed concurrently during incremental loading.
    pub parallel: usize,
    /// Re-issue the view definition after incremental loading.
    pub refresh_view: bool,
}

impl WorkflowSettings {
    pub fn from_config(cfg: &EtlConfig) -> Self {
        Self {
            parallel: cfg.query.parallel(),
            refresh_view: false,
        }
    }
}

/// Requests a run to stop at the next step boundary. Jobs already submitted
/// keep running in the service.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Workflow {
    cfg: Arc<EtlConfig>,
    executor: QueryExecutor,
    bootstrapper: SchemaBootstrapper,
    classifier: TableClassifier,
    loader: IncrementalLoader,
    settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(cfg: Arc<EtlConfig>, service: Arc<dyn QueryService>) -> Self {
        let executor = QueryExecutor::from_config(service, &cfg);
        Self {
            bootstrapper: SchemaBootstrapper::new(executor.clone(), cfg.clone()),
            classifier: TableClassifier::from_naming(&cfg.naming),
            loader: IncrementalLoader::new(executor.clone(), cfg.clone()),
            settings: WorkflowSettings::from_config(&cfg),
            executor,
            cfg,
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub async fn run(&self) -> RunReport {
        self.run_with_cancel(&CancelToken::new()).await
    }

    pub async fn run_with_cancel(&self, cancel: &CancelToken) -> RunReport {
        let mut ctx = ExecutionContext::new();
        tracing::info!(
            event = "lakeflow.workflow.start",
            database = %self.cfg.database,
            parallel = self.settings.parallel,
        );

        let mut next = WorkflowState::EnsureDatabase;
        let error = loop {
            ctx.transition(next);
            if next == WorkflowState::Done {
                break None;
            }
            if cancel.is_cancelled() {
                break Some(self.fail(&ctx, &next.to_string(), EtlError::Cancelled));
            }

            let step = match next {
                WorkflowState::EnsureDatabase => self
                    .ensure_database(&mut ctx)
                    .await
                    .map(|_| WorkflowState::LookupTables),
                WorkflowState::LookupTables => self
                    .lookup_tables(&mut ctx)
                    .await
                    .map(|_| WorkflowState::FirstRunDecision),
                WorkflowState::FirstRunDecision => {
                    let (branch, path) = first_run_decision(&ctx.lookup_rows);
                    ctx.path = Some(path);
                    tracing::info!(
                        event = "lakeflow.workflow.decision",
                        existing_tables = ctx.lookup_rows.len(),
                        path = ?path,
                    );
                    Ok(branch)
                }
                WorkflowState::Bootstrap => self
                    .bootstrap(&mut ctx, cancel)
                    .await
                    .map(|_| WorkflowState::Done),
                WorkflowState::ClassifyAndLoad => {
                    self.classify_and_load(&mut ctx, cancel).await.map(|_| {
                        if self.settings.refresh_view {
                            WorkflowState::RefreshView
                        } else {
                            WorkflowState::Done
                        }
                    })
                }
                WorkflowState::RefreshView => self
                    .refresh_view(&mut ctx)
                    .await
                    .map(|_| WorkflowState::Done),
                WorkflowState::Start | WorkflowState::Done | WorkflowState::Failed => {
                    Err(self.fail(
                        &ctx,
                        &next.to_string(),
                        EtlError::Internal(format!("no step runs in state {}", next)),
                    ))
                }
            };

            match step {
                Ok(s) => next = s,
                Err(e) => break Some(e),
            }
        };

        if let Some(e) = &error {
            ctx.transition(WorkflowState::Failed);
            tracing::error!(
                event = "lakeflow.workflow.failed",
                step = %e.step,
                kind = e.cause.kind(),
                last_job = ?e.last_job,
                "{}", e
            );
        } else {
            tracing::info!(
                event = "lakeflow.workflow.done",
                path = ?ctx.path,
                loads = ctx.counters.loads,
                queries = ctx.counters.queries,
            );
        }
        ctx.into_report(&self.cfg.database, error)
    }

    fn fail(&self, ctx: &ExecutionContext, step: &str, cause: EtlError) -> WorkflowError {
        WorkflowError {
            step: step.to_string(),
            last_job: cause
                .job_id()
                .map(str::to_string)
                .or_else(|| ctx.last_job().map(str::to_string)),
            cause,
        }
    }

    /// Logs a failed step's job (if it got one) and builds the step error.
    fn step_failed(&self, ctx: &mut ExecutionContext, step: &str, cause: EtlError) -> WorkflowError {
        if let Some(job_id) = cause.job_id() {
            let status = match &cause {
                EtlError::Query(QueryError::Timeout { .. })
                | EtlError::Query(QueryError::Unreachable { .. }) => JobStatus::Running,
                EtlError::Query(QueryError::JobCancelled { .. }) => JobStatus::Cancelled,
                _ => JobStatus::Failed,
            };
            let job_id = job_id.to_string();
            ctx.record_job(step, &job_id, status, None);
        }
        self.fail(ctx, step, cause)
    }

    fn record_created(&self, ctx: &mut ExecutionContext, step: &str, created: &Created) {
        match created {
            Created::Applied(job) => {
                ctx.counters.objects_applied += 1;
                ctx.record_job(step, &job.id, job.status, job.statistics.rows_affected);
            }
            Created::AlreadyExists { job_id } => {
                ctx.counters.objects_existing += 1;
                ctx.record_job(step, job_id, JobStatus::Failed, None);
            }
        }
    }

    async fn ensure_database(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let step = WorkflowState::EnsureDatabase.to_string();
        match self.bootstrapper.ensure_database().await {
            Ok(created) => {
                self.record_created(ctx, &step, &created);
                Ok(())
            }
            Err(e) => Err(self.step_failed(ctx, &step, e)),
        }
    }

    async fn lookup_tables(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let step = WorkflowState::LookupTables.to_string();
        let stmt = sql::show_tables(&self.cfg.database);
        match self.executor.query_rows(&stmt, self.executor.options()).await {
            Ok((job, rows)) => {
                ctx.record_job(&step, &job.id, job.status, None);
                tracing::info!(
                    event = "lakeflow.workflow.lookup",
                    job_id = %job.id,
                    tables = rows.len(),
                );
                ctx.lookup_rows = rows;
                Ok(())
            }
            Err(e) => Err(self.step_failed(ctx, &step, e.into())),
        }
    }

    /// Raw tables, then optimized tables, then the view. Stops at the first failure.
    async fn bootstrap(
        &self,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<(), WorkflowError> {
        for ds in &self.cfg.datasets {
            let step = format!("create-raw-table:{}", ds.raw.table);
            self.check_cancel(ctx, &step, cancel)?;
            match self.bootstrapper.create_raw_table(ds).await {
                Ok(created) => self.record_created(ctx, &step, &created),
                Err(e) => return Err(self.step_failed(ctx, &step, e)),
            }
        }

        for ds in &self.cfg.datasets {
            let step = format!("create-optimized-table:{}", ds.optimized.table);
            self.check_cancel(ctx, &step, cancel)?;
            match self.bootstrapper.create_optimized_table(ds).await {
                Ok(created) => self.record_created(ctx, &step, &created),
                Err(e) => return Err(self.step_failed(ctx, &step, e)),
            }
        }

        let step = format!("create-view:{}", self.cfg.view.name);
        self.check_cancel(ctx, &step, cancel)?;
        match self.bootstrapper.create_or_replace_view().await {
            Ok(created) => {
                self.record_created(ctx, &step, &created);
                Ok(())
            }
            Err(e) => Err(self.step_failed(ctx, &step, e)),
        }
    }

    /// Visits every catalog row in listing order. Optimized tables with a
    /// configured raw source are loaded, at most `parallel` at a time and at
    /// most once per run. After a failed load no further rows are started.
    async fn classify_and_load(
        &self,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<(), WorkflowError> {
        let sem = Arc::new(Semaphore::new(self.settings.parallel.max(1)));
        let halted = Arc::new(AtomicBool::new(false));
        let mut seen: HashSet<String> = HashSet::new();
        let mut handles = Vec::new();
        let mut interrupted = None;

        let rows = ctx.lookup_rows.clone();
        for row in rows {
            if halted.load(Ordering::SeqCst) {
                break;
            }
            ctx.current_row = Some(row.clone());

            let Some(name) = row.first_text() else {
                tracing::warn!(
                    event = "lakeflow.classify.unreadable_row",
                    row = ?row,
                    "catalog row has no table name, skipping"
                );
                ctx.counters.unrecognized_skipped += 1;
                continue;
            };

            match self.classifier.classify(name) {
                TableClass::Raw => {
                    tracing::debug!(event = "lakeflow.classify.raw", table = %name);
                    ctx.counters.raw_skipped += 1;
                }
                TableClass::Unrecognized => {
                    tracing::warn!(
                        event = "lakeflow.classify.unrecognized",
                        table = %name,
                        "table matches no naming pattern, skipping"
                    );
                    ctx.counters.unrecognized_skipped += 1;
                }
                TableClass::Optimized => {
                    let Some(ds) = self.cfg.dataset_for_optimized(name) else {
                        tracing::warn!(
                            event = "lakeflow.classify.unpaired",
                            table = %name,
                            "optimized table has no configured raw source, skipping"
                        );
                        ctx.counters.unpaired_skipped += 1;
                        continue;
                    };
                    if !seen.insert(name.to_string()) {
                        ctx.counters.duplicate_skipped += 1;
                        continue;
                    }

                    let step = format!("load:{}", name);
                    if cancel.is_cancelled() {
                        interrupted = Some(step);
                        break;
                    }
                    let permit = sem.clone().acquire_owned().await.map_err(|e| {
                        self.fail(ctx, &step, EtlError::Internal(e.to_string()))
                    })?;
                    // A load that finished while we waited may have failed.
                    if halted.load(Ordering::SeqCst) {
                        break;
                    }
                    if cancel.is_cancelled() {
                        interrupted = Some(step);
                        break;
                    }

                    let loader = self.loader.clone();
                    let ds = ds.clone();
                    let halted = halted.clone();
                    let h = tokio::spawn(async move {
                        let _permit = permit;
                        let res = loader.load_increment(&ds).await;
                        if res.is_err() {
                            halted.store(true, Ordering::SeqCst);
                        }
                        res
                    });
                    handles.push((step, h));
                }
            }
        }
        ctx.current_row = None;

        let mut first_error: Option<WorkflowError> = None;
        for (step, h) in handles {
            let res: Result<LoadOutcome, EtlError> = match h.await {
                Ok(r) => r,
                Err(e) => Err(EtlError::Internal(format!("load task failed: {}", e))),
            };
            match res {
                Ok(out) => {
                    ctx.counters.loads += 1;
                    ctx.record_job(&step, &out.job_id, JobStatus::Succeeded, out.rows_affected);
                    ctx.loads.push(out);
                }
                Err(e) => {
                    let err = self.step_failed(ctx, &step, e);
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Some(step) = interrupted {
            return Err(self.fail(ctx, &step, EtlError::Cancelled));
        }
        Ok(())
    }

    async fn refresh_view(&self, ctx: &mut ExecutionContext) -> Result<(), WorkflowError> {
        let step = format!("refresh-view:{}", self.cfg.view.name);
        match self.bootstrapper.create_or_replace_view().await {
            Ok(created) => {
                self.record_created(ctx, &step, &created);
                Ok(())
            }
            Err(e) => Err(self.step_failed(ctx, &step, e)),
        }
    }

    fn check_cancel(
        &self,
        ctx: &ExecutionContext,
        step: &str,
        cancel: &CancelToken,
    ) -> Result<(), WorkflowError> {
        if cancel.is_cancelled() {
            return Err(self.fail(ctx, step, EtlError::Cancelled));
        }
        Ok(())
    }
}
