use super::{build_service, exit_codes};
use crate::cli::args::{OutputFormat, RunArgs};
use lakeflow_core::config::load_config;
use lakeflow_core::fingerprint::{view_fingerprint, view_key};
use lakeflow_core::report::{console, json};
use lakeflow_core::storage::{LeaseOutcome, Store};
use lakeflow_core::workflow::{RunPath, WorkflowState};
use lakeflow_core::{CancelToken, Workflow, WorkflowSettings};
use std::sync::Arc;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let mut cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if let Some(p) = args.parallel {
        cfg.query.parallel = Some(p);
    }
    if let Some(t) = args.timeout_seconds {
        if t == 0 {
            eprintln!("config error: --timeout-seconds must be positive");
            return Ok(exit_codes::CONFIG_ERROR);
        }
        cfg.query.timeout_seconds = Some(t);
    }
    let cfg = Arc::new(cfg);

    let service = match build_service(&args.engine) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let store = Store::open(&args.db)?;
    store.init_schema()?;

    // One run per database at a time: concurrent loads would duplicate rows.
    let lease = format!("run:{}", cfg.database);
    let holder = format!("pid-{}@{}", std::process::id(), chrono::Utc::now().timestamp_millis());
    let ttl = chrono::Duration::seconds(args.lease_ttl_secs.max(1));
    if let LeaseOutcome::Held { holder, expires_at } =
        store.try_acquire_lease(&lease, &holder, ttl)?
    {
        eprintln!(
            "another run holds the lease for {} ({}, expires {})",
            cfg.database, holder, expires_at
        );
        return Ok(exit_codes::LEASE_HELD);
    }

    let result = run_locked(&args, cfg, service, &store).await;

    if let Err(e) = store.release_lease(&lease, &holder) {
        tracing::warn!(event = "lakeflow.lease.release_failed", error = %e);
    }
    result
}

async fn run_locked(
    args: &RunArgs,
    cfg: Arc<lakeflow_core::model::EtlConfig>,
    service: Arc<dyn lakeflow_core::query::QueryService>,
    store: &Store,
) -> anyhow::Result<i32> {
    let fp = view_fingerprint(&cfg);
    let key = view_key(&cfg);
    let recorded = store.get_fingerprint(&key)?;
    let view_changed = recorded.as_deref() != Some(fp.hex.as_str());

    let settings = WorkflowSettings {
        refresh_view: args.refresh_view || view_changed,
        ..WorkflowSettings::from_config(&cfg)
    };
    tracing::info!(
        event = "lakeflow.run.start",
        database = %cfg.database,
        service = service.service_name(),
        refresh_view = settings.refresh_view,
        view_fingerprint = %fp.hex,
    );

    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("cancelling after the current step (in-flight jobs keep running)");
                cancel.cancel();
            }
        })
    };

    let run_id = store.create_run(&cfg.database)?;
    let workflow = Workflow::new(cfg.clone(), service).with_settings(settings);
    let report = workflow.run_with_cancel(&cancel).await;
    watcher.abort();

    store.finalize_run(run_id, &report)?;

    let view_issued = report.path == Some(RunPath::Bootstrap)
        || report.visited.contains(&WorkflowState::RefreshView);
    if report.succeeded() && view_issued {
        store.put_fingerprint(&key, &fp.hex)?;
    }

    if let Some(out) = &args.out {
        json::write_json(&report, out)?;
        eprintln!("wrote file: {}", out.display());
    }
    match args.format {
        OutputFormat::Json => println!("{}", json::to_json(&report)?),
        OutputFormat::Text => console::print_summary(&report),
    }

    if report.succeeded() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::RUN_FAILED)
    }
}
