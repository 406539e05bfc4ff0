use super::exit_codes;
use crate::cli::args::{HistoryArgs, OutputFormat};
use lakeflow_core::storage::Store;
use serde_json::json;

pub fn run(args: HistoryArgs) -> anyhow::Result<i32> {
    if !args.db.exists() {
        eprintln!("no run history at {}", args.db.display());
        return Ok(exit_codes::OK);
    }
    let store = Store::open(&args.db)?;
    store.init_schema()?;
    let runs = store.fetch_recent_runs(args.last)?;

    match args.format {
        OutputFormat::Json => {
            let rows: Vec<_> = runs
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "database": r.database,
                        "started_at": r.started_at,
                        "finished_at": r.finished_at,
                        "status": r.status,
                        "path": r.path,
                        "failed_step": r.failed_step,
                        "error_kind": r.error_kind,
                        "error": r.error,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            for r in &runs {
                let detail = match (&r.failed_step, &r.error) {
                    (Some(step), Some(err)) => format!("failed at {}: {}", step, err),
                    _ => r.path.clone().unwrap_or_default(),
                };
                println!(
                    "#{:<5} {:<25} {:<16} {:<8} {}",
                    r.id, r.started_at, r.database, r.status, detail
                );
            }
        }
    }
    Ok(exit_codes::OK)
}
