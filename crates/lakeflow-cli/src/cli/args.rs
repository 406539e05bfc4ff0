use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "lakeflow",
    version,
    about = "Re-runnable raw-to-optimized table loads over a SQL query service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,

    /// tracing filter, e.g. `info` or `lakeflow_core=debug`
    #[arg(long, global = true, env = "LAKEFLOW_LOG", default_value = "warn")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the workflow once against the configured database
    Run(RunArgs),
    /// Print the statements a bootstrap and an incremental run would submit
    Plan(PlanArgs),
    Validate(ValidateArgs),
    /// Write a sample configuration
    Init(InitArgs),
    /// Show recent runs from the local history
    History(HistoryArgs),
    /// Cancel the last job handle recorded in the history
    Cancel(CancelArgs),
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    /// In-process simulated catalog, starts empty
    Memory,
    /// JSON query gateway at --endpoint
    Http,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args, Clone, Debug)]
pub struct EngineArgs {
    #[arg(long, value_enum, default_value_t = Engine::Http)]
    pub engine: Engine,

    #[arg(long, env = "LAKEFLOW_ENDPOINT")]
    pub endpoint: Option<String>,

    /// bearer token for the gateway
    #[arg(long, env = "LAKEFLOW_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Parser, Clone, Debug)]
pub struct RunArgs {
    #[arg(long, default_value = "lakeflow.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".lakeflow/lakeflow.db")]
    pub db: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// fail on unknown config keys
    #[arg(long)]
    pub strict: bool,

    /// override query.parallel
    #[arg(long, env = "LAKEFLOW_PARALLEL")]
    pub parallel: Option<usize>,

    /// override query.timeout_seconds
    #[arg(long)]
    pub timeout_seconds: Option<u64>,

    /// re-issue the view after loading even if its definition is unchanged
    #[arg(long)]
    pub refresh_view: bool,

    /// seconds before a lease left by a crashed run can be taken over
    #[arg(long, default_value_t = 3600)]
    pub lease_ttl_secs: i64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// also write the JSON run report here
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
pub struct PlanArgs {
    #[arg(long, default_value = "lakeflow.yaml")]
    pub config: PathBuf,

    #[arg(long)]
    pub strict: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = "lakeflow.yaml")]
    pub config: PathBuf,

    #[arg(long)]
    pub strict: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Clone, Debug)]
pub struct InitArgs {
    #[arg(long, default_value = "lakeflow.yaml")]
    pub config: PathBuf,

    /// overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
pub struct HistoryArgs {
    #[arg(long, default_value = ".lakeflow/lakeflow.db")]
    pub db: PathBuf,

    /// Number of recent runs to show
    #[arg(long, default_value_t = 20)]
    pub last: u32,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Clone, Debug)]
pub struct CancelArgs {
    #[arg(long, default_value = ".lakeflow/lakeflow.db")]
    pub db: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// cancel this job instead of the last recorded one
    #[arg(long)]
    pub job_id: Option<String>,
}
