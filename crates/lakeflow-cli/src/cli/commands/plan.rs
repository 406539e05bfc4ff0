use super::exit_codes;
use crate::cli::args::{OutputFormat, PlanArgs};
use lakeflow_core::config::load_config;
use lakeflow_core::model::EtlConfig;
use lakeflow_core::sql;
use serde_json::json;

struct Planned {
    step: String,
    sql: String,
}

fn bootstrap_plan(cfg: &EtlConfig) -> Vec<Planned> {
    let mut out = vec![
        Planned {
            step: "ensure-database".into(),
            sql: sql::create_database(&cfg.database),
        },
        Planned {
            step: "lookup-tables".into(),
            sql: sql::show_tables(&cfg.database),
        },
    ];
    for ds in &cfg.datasets {
        out.push(Planned {
            step: format!("create-raw-table:{}", ds.raw.table),
            sql: sql::create_raw_table(cfg, ds),
        });
    }
    for ds in &cfg.datasets {
        out.push(Planned {
            step: format!("create-optimized-table:{}", ds.optimized.table),
            sql: sql::create_optimized_table(cfg, ds),
        });
    }
    out.push(Planned {
        step: format!("create-view:{}", cfg.view.name),
        sql: sql::create_or_replace_view(&cfg.view),
    });
    out
}

/// Loads for every configured pair; a real run only loads the optimized
/// tables the catalog lists under the optimized suffix.
fn incremental_plan(cfg: &EtlConfig) -> Vec<Planned> {
    cfg.datasets
        .iter()
        .map(|ds| Planned {
            step: format!("load:{}", ds.optimized.table),
            sql: sql::insert_increment(cfg, ds),
        })
        .collect()
}

pub fn run(args: PlanArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let bootstrap = bootstrap_plan(&cfg);
    let incremental = incremental_plan(&cfg);

    match args.format {
        OutputFormat::Json => {
            let render = |p: &[Planned]| {
                p.iter()
                    .map(|s| json!({ "step": s.step, "sql": s.sql }))
                    .collect::<Vec<_>>()
            };
            let output = json!({
                "database": cfg.database,
                "bootstrap": render(&bootstrap),
                "incremental": render(&incremental),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("-- bootstrap (empty catalog)");
            for p in &bootstrap {
                println!("-- {}\n{};\n", p.step, p.sql);
            }
            println!("-- incremental");
            for p in &incremental {
                println!("-- {}\n{};\n", p.step, p.sql);
            }
        }
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeflow_core::config::{parse_config, SAMPLE_CONFIG};

    #[test]
    fn bootstrap_plan_matches_workflow_order() {
        let cfg = parse_config(SAMPLE_CONFIG, true).unwrap();
        let steps: Vec<String> = bootstrap_plan(&cfg).into_iter().map(|p| p.step).collect();
        assert_eq!(
            steps,
            vec![
                "ensure-database",
                "lookup-tables",
                "create-raw-table:traffic_offences_data_csv",
                "create-raw-table:traffic_speed_camera_locations_data_csv",
                "create-optimized-table:traffic_offences_data_parquet",
                "create-optimized-table:traffic_camera_locations_lookup_parquet",
                "create-view:offences_view",
            ]
        );
        assert_eq!(incremental_plan(&cfg).len(), 2);
    }
}
