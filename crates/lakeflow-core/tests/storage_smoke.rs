use lakeflow_core::config::{parse_config, SAMPLE_CONFIG};
use lakeflow_core::query::memory::InMemoryQueryService;
use lakeflow_core::query::QueryService;
use lakeflow_core::storage::Store;
use lakeflow_core::Workflow;
use std::sync::Arc;

#[tokio::test]
async fn run_history_round_trips_through_sqlite() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(&dir.path().join("state/lakeflow.db"))?;
    store.init_schema()?;

    let cfg = Arc::new(parse_config(SAMPLE_CONFIG, true)?);
    let svc: Arc<dyn QueryService> = Arc::new(InMemoryQueryService::new());

    let ok_id = store.create_run(&cfg.database)?;
    let report = Workflow::new(cfg.clone(), svc.clone()).run().await;
    store.finalize_run(ok_id, &report)?;

    let runs = store.fetch_recent_runs(10)?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "done");
    assert_eq!(runs[0].path.as_deref(), Some("bootstrap"));
    assert!(runs[0].finished_at.is_some());

    let jobs = store.jobs_for_run(ok_id)?;
    assert_eq!(jobs.len(), report.jobs.len());
    assert_eq!(jobs[0].step, "ensure-database");

    let last = store.last_job()?.expect("jobs were recorded");
    assert_eq!(Some(last.job_id.as_str()), report.last_job());

    store.mark_job_cancelled(&last.job_id)?;
    assert_eq!(store.last_job()?.unwrap().status, "cancelled");
    Ok(())
}

#[tokio::test]
async fn failed_runs_keep_step_and_kind() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let cfg = Arc::new(parse_config(SAMPLE_CONFIG, true)?);
    let mem = Arc::new(InMemoryQueryService::new());
    mem.reject_on("CREATE DATABASE", "AccessDeniedException");
    let svc: Arc<dyn QueryService> = mem;

    let id = store.create_run(&cfg.database)?;
    let report = Workflow::new(cfg, svc).run().await;
    store.finalize_run(id, &report)?;

    let run = &store.fetch_recent_runs(1)?[0];
    assert_eq!(run.status, "failed");
    assert_eq!(run.failed_step.as_deref(), Some("ensure-database"));
    assert_eq!(run.error_kind.as_deref(), Some("submission"));
    assert!(run.error.as_deref().unwrap_or("").contains("AccessDenied"));
    Ok(())
}
