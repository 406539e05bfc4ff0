use super::{build_service, exit_codes};
use crate::cli::args::CancelArgs;
use lakeflow_core::storage::Store;

pub async fn run(args: CancelArgs) -> anyhow::Result<i32> {
    let job_id = match args.job_id.clone() {
        Some(id) => id,
        None => {
            if !args.db.exists() {
                eprintln!("no run history at {}", args.db.display());
                return Ok(exit_codes::OK);
            }
            let store = Store::open(&args.db)?;
            store.init_schema()?;
            match store.last_job()? {
                Some(job) => job.job_id,
                None => {
                    eprintln!("no recorded jobs");
                    return Ok(exit_codes::OK);
                }
            }
        }
    };

    let service = match build_service(&args.engine) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    if let Err(e) = service.cancel(&job_id).await {
        eprintln!("failed to cancel {}: {}", job_id, e);
        return Ok(exit_codes::RUN_FAILED);
    }
    if args.db.exists() {
        let store = Store::open(&args.db)?;
        store.init_schema()?;
        store.mark_job_cancelled(&job_id)?;
    }
    eprintln!("cancel requested for {}", job_id);
    Ok(exit_codes::OK)
}
