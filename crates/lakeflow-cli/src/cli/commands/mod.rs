pub mod cancel;
pub mod history;
pub mod init;
pub mod plan;
pub mod run;
pub mod validate;

use super::args::{Command, Engine, EngineArgs};
use crate::cli::args::Cli;
use lakeflow_core::query::http::HttpQueryService;
use lakeflow_core::query::memory::InMemoryQueryService;
use lakeflow_core::query::QueryService;
use std::sync::Arc;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const RUN_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const LEASE_HELD: i32 = 3;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::run(args).await,
        Command::Plan(args) => plan::run(args),
        Command::Validate(args) => validate::run(args),
        Command::Init(args) => init::run(args),
        Command::History(args) => history::run(args),
        Command::Cancel(args) => cancel::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

pub(crate) fn build_service(args: &EngineArgs) -> anyhow::Result<Arc<dyn QueryService>> {
    match args.engine {
        Engine::Memory => Ok(Arc::new(InMemoryQueryService::new())),
        Engine::Http => {
            let endpoint = args
                .endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--endpoint (or LAKEFLOW_ENDPOINT) is required for --engine http"))?;
            Ok(Arc::new(HttpQueryService::new(endpoint, args.token.clone())))
        }
    }
}
