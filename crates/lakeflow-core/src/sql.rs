//! Statement rendering.
//!
//! Every statement the engine submits comes from here, so the in-memory
//! query service and the plan printer see exactly what a real backend sees.

use crate::model::{Dataset, EtlConfig, ViewDef};

pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", database)
}

pub fn show_tables(database: &str) -> String {
    format!("SHOW TABLES IN {}", database)
}

pub fn create_raw_table(cfg: &EtlConfig, ds: &Dataset) -> String {
    let raw = &ds.raw;
    let columns = raw
        .columns
        .iter()
        .map(|c| format!("  {} {}", c.name, c.ty.sql_name()))
        .collect::<Vec<_>>()
        .join(",\n");

    let mut sql = format!(
        "CREATE EXTERNAL TABLE IF NOT EXISTS {}.{} (\n{}\n)\n\
         ROW FORMAT DELIMITED FIELDS TERMINATED BY '{}'\n\
         STORED AS INPUTFORMAT 'org.apache.hadoop.mapred.TextInputFormat'\n\
         OUTPUTFORMAT 'org.apache.hadoop.hive.ql.io.HiveIgnoreKeyTextOutputFormat'\n\
         LOCATION '{}'",
        cfg.database,
        raw.table,
        columns,
        escape_literal(&raw.delimiter),
        escape_literal(&cfg.raw_location(ds)),
    );
    if raw.skip_header_lines > 0 {
        sql.push_str(&format!(
            "\nTBLPROPERTIES ('skip.header.line.count'='{}')",
            raw.skip_header_lines
        ));
    }
    sql
}

pub fn create_optimized_table(cfg: &EtlConfig, ds: &Dataset) -> String {
    let opt = &ds.optimized;
    let mut props = vec![
        format!("format = '{}'", opt.format.sql_name()),
        format!(
            "{} = '{}'",
            opt.format.compression_property(),
            opt.compression.sql_name()
        ),
    ];
    if !opt.partitioned_by.is_empty() {
        let cols = opt
            .partitioned_by
            .iter()
            .map(|c| format!("'{}'", c))
            .collect::<Vec<_>>()
            .join(", ");
        props.push(format!("partitioned_by = ARRAY[{}]", cols));
    }
    props.push(format!(
        "external_location = '{}'",
        escape_literal(&cfg.optimized_location(ds))
    ));

    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} WITH (\n  {}\n) AS {}",
        cfg.database,
        opt.table,
        props.join(",\n  "),
        projection(cfg, ds)
    )
}

pub fn insert_increment(cfg: &EtlConfig, ds: &Dataset) -> String {
    format!(
        "INSERT INTO {}.{}\n{}",
        cfg.database,
        ds.optimized.table,
        projection(cfg, ds)
    )
}

pub fn create_or_replace_view(view: &ViewDef) -> String {
    format!(
        "CREATE OR REPLACE VIEW {} AS\n{}",
        view.name,
        view.query.trim_end()
    )
}

fn projection(cfg: &EtlConfig, ds: &Dataset) -> String {
    format!(
        "SELECT\n  {}\nFROM {}.{}",
        ds.optimized.select.join(",\n  "),
        cfg.database,
        ds.raw.table
    )
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}
