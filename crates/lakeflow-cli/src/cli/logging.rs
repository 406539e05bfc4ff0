use super::args::LogFormat;
use tracing_subscriber::{fmt, EnvFilter};

/// Logs go to stderr; stdout is reserved for `--format json` output.
pub fn init_logging(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(std::io::stderr);

    let res = match format {
        LogFormat::Json => builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .try_init(),
        LogFormat::Text => builder.compact().try_init(),
    };
    if let Err(e) = res {
        eprintln!("warning: logging already initialized: {}", e);
    }
}
