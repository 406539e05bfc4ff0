use crate::errors::ConfigError;
use crate::model::EtlConfig;
use std::collections::HashSet;
use std::path::Path;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

pub fn load_config(path: &Path, strict: bool) -> Result<EtlConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))
}

pub fn parse_config(raw: &str, strict: bool) -> Result<EtlConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: EtlConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // YAML anchors conventionally live under x-* or _* keys.
    let meaningful_unknowns: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();

    if !meaningful_unknowns.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?}",
                meaningful_unknowns
            )));
        }
        tracing::warn!(
            event = "lakeflow.config.unknown_fields",
            fields = ?meaningful_unknowns,
            "ignored unknown config fields"
        );
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    validate(&cfg)?;
    Ok(cfg)
}

/// Semantic checks that serde cannot express.
pub fn validate(cfg: &EtlConfig) -> Result<(), ConfigError> {
    if cfg.database.trim().is_empty() {
        return Err(ConfigError("database name is empty".into()));
    }
    if !is_identifier(&cfg.database) {
        return Err(ConfigError(format!(
            "database name '{}' is not a valid identifier",
            cfg.database
        )));
    }

    let naming = &cfg.naming;
    if naming.raw_suffix.is_empty() || naming.optimized_suffix.is_empty() {
        return Err(ConfigError("naming suffixes must not be empty".into()));
    }
    if naming.raw_suffix == naming.optimized_suffix {
        return Err(ConfigError(format!(
            "raw and optimized suffixes are identical ('{}')",
            naming.raw_suffix
        )));
    }

    if cfg.datasets.is_empty() {
        return Err(ConfigError("config has no datasets".into()));
    }

    let mut names = HashSet::new();
    for ds in &cfg.datasets {
        for table in [&ds.raw.table, &ds.optimized.table] {
            if !is_identifier(table) {
                return Err(ConfigError(format!(
                    "dataset '{}': table name '{}' is not a valid identifier",
                    ds.name, table
                )));
            }
            if !names.insert(table.as_str()) {
                return Err(ConfigError(format!("table '{}' is declared twice", table)));
            }
        }

        if ds.raw.columns.is_empty() {
            return Err(ConfigError(format!(
                "dataset '{}': raw table has no columns",
                ds.name
            )));
        }
        if ds.raw.delimiter.chars().count() != 1 {
            return Err(ConfigError(format!(
                "dataset '{}': delimiter must be a single character",
                ds.name
            )));
        }
        if ds.optimized.select.is_empty() {
            return Err(ConfigError(format!(
                "dataset '{}': optimized table has an empty select list",
                ds.name
            )));
        }

        // Partition columns must be the trailing outputs of the projection.
        let outputs: Vec<String> = ds.optimized.select.iter().map(|e| output_name(e)).collect();
        let tail = &outputs[outputs.len().saturating_sub(ds.optimized.partitioned_by.len())..];
        for p in &ds.optimized.partitioned_by {
            if !tail.iter().any(|o| o.eq_ignore_ascii_case(p)) {
                return Err(ConfigError(format!(
                    "dataset '{}': partition column '{}' must be one of the last {} select outputs",
                    ds.name,
                    p,
                    ds.optimized.partitioned_by.len()
                )));
            }
        }
    }

    if !is_identifier(&cfg.view.name) {
        return Err(ConfigError(format!(
            "view name '{}' is not a valid identifier",
            cfg.view.name
        )));
    }
    if names.contains(cfg.view.name.as_str()) {
        return Err(ConfigError(format!(
            "view '{}' clashes with a table name",
            cfg.view.name
        )));
    }
    if cfg.view.query.trim().is_empty() {
        return Err(ConfigError("view query is empty".into()));
    }

    if cfg.query.poll_interval_ms == Some(0) {
        return Err(ConfigError("query.poll_interval_ms must be positive".into()));
    }
    if cfg.query.timeout_seconds == Some(0) {
        return Err(ConfigError("query.timeout_seconds must be positive".into()));
    }

    Ok(())
}

/// Output column name of a select expression: the alias, or the last token.
pub fn output_name(expr: &str) -> String {
    expr.split_whitespace()
        .last()
        .unwrap_or("")
        .trim_matches(|c| c == '"' || c == '`')
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_string()
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub const SAMPLE_CONFIG: &str = r#"version: 1
database: traffic_camera
storage:
  raw_prefix: s3://raw-etl-ingestion
  optimized_prefix: s3://clean-etl-ingestion
naming:
  raw_suffix: data_csv
  optimized_suffix: data_parquet
query:
  workgroup: primary
  result_location: s3://clean-etl-ingestion/athena/
  poll_interval_ms: 500
  timeout_seconds: 300
  parallel: 4
datasets:
  - name: offences
    raw:
      table: traffic_offences_data_csv
      location: traffic_offences/data
      skip_header_lines: 1
      columns:
        - { name: offence_month, type: string }
        - { name: rego_state, type: string }
        - { name: cit_catg, type: string }
        - { name: camera_type, type: string }
        - { name: location_code, type: int }
        - { name: location_desc, type: string }
        - { name: offence_desc, type: string }
        - { name: sum_pen_amt, type: int }
        - { name: sum_inf_count, type: int }
        - { name: sum_with_amt, type: int }
        - { name: sum_with_count, type: int }
    optimized:
      table: traffic_offences_data_parquet
      location: traffic_offences/optimized-data
      format: parquet
      compression: snappy
      partitioned_by: [offence_month, offence_year]
      select:
        - offence_month AS offence_date_raw
        - rego_state
        - cit_catg
        - camera_type
        - location_code
        - location_desc
        - offence_desc
        - sum_pen_amt
        - sum_inf_count
        - sum_with_amt
        - sum_with_count
        - substr("offence_month", 1, 3) AS offence_month
        - substr("offence_month", 5, 5) AS offence_year
  - name: locations
    raw:
      table: traffic_speed_camera_locations_data_csv
      location: traffic_camera_locations/lookup
      skip_header_lines: 1
      columns:
        - { name: camera_type, type: string }
        - { name: camera_location_code, type: int }
        - { name: location_code, type: string }
        - { name: latitude, type: string }
        - { name: longitude, type: string }
        - { name: location_desc, type: string }
    optimized:
      table: traffic_camera_locations_lookup_parquet
      location: traffic_camera_locations/optimized-data-lookup
      select:
        - camera_type
        - camera_location_code
        - location_code
        - latitude
        - longitude
        - location_desc
view:
  name: offences_view
  query: |
    SELECT a.*, lkup.*
    FROM (
      SELECT
        datatab.camera_type AS camera_type_offence,
        rego_state,
        offence_month,
        offence_year,
        datatab.location_code AS offence_location_code,
        SUM(sum_pen_amt) AS sum_pen_amt,
        SUM(sum_inf_count) AS sum_inf_count
      FROM traffic_offences_data_parquet datatab
      WHERE datatab.rego_state IS NOT NULL
      GROUP BY datatab.location_code, offence_month, offence_year, datatab.camera_type, rego_state
    ) a, traffic_camera_locations_lookup_parquet lkup
    WHERE lkup.camera_location_code = a.offence_location_code
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
