use super::exit_codes;
use crate::cli::args::{OutputFormat, ValidateArgs};
use lakeflow_core::config::load_config;
use serde_json::json;

pub fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let result = load_config(&args.config, args.strict);

    match args.format {
        OutputFormat::Json => {
            let output = match &result {
                Ok(cfg) => json!({
                    "ok": true,
                    "database": cfg.database,
                    "datasets": cfg.datasets.iter().map(|d| &d.name).collect::<Vec<_>>(),
                    "view": cfg.view.name,
                }),
                Err(e) => json!({ "ok": false, "error": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match &result {
            Ok(cfg) => eprintln!(
                "✔ Config OK: database {}, {} dataset{}, view {}",
                cfg.database,
                cfg.datasets.len(),
                if cfg.datasets.len() != 1 { "s" } else { "" },
                cfg.view.name
            ),
            Err(e) => eprintln!("✖ Config invalid: {}", e),
        },
    }

    if result.is_ok() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::CONFIG_ERROR)
    }
}
