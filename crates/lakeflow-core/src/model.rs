use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    pub database: String,
    pub storage: StorageSettings,
    #[serde(default)]
    pub naming: NamingSettings,
    #[serde(default, skip_serializing_if = "is_default_query")]
    pub query: QuerySettings,
    pub datasets: Vec<Dataset>,
    pub view: ViewDef,
}

impl EtlConfig {
    pub fn dataset_for_optimized(&self, table: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.optimized.table == table)
    }

    pub fn raw_location(&self, ds: &Dataset) -> String {
        join_location(&self.storage.raw_prefix, &ds.raw.location)
    }

    pub fn optimized_location(&self, ds: &Dataset) -> String {
        join_location(&self.storage.optimized_prefix, &ds.optimized.location)
    }
}

fn is_default_query(q: &QuerySettings) -> bool {
    q == &QuerySettings::default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    pub raw_prefix: String,
    pub optimized_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamingSettings {
    #[serde(default = "default_raw_suffix")]
    pub raw_suffix: String,
    #[serde(default = "default_optimized_suffix")]
    pub optimized_suffix: String,
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            raw_suffix: default_raw_suffix(),
            optimized_suffix: default_optimized_suffix(),
        }
    }
}

fn default_raw_suffix() -> String {
    "data_csv".into()
}

fn default_optimized_suffix() -> String {
    "data_parquet".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuerySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Upper bound on concurrently processed catalog rows during incremental loads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,
}

impl QuerySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(500))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(300))
    }

    pub fn parallel(&self) -> usize {
        self.parallel.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub raw: RawTableDef,
    pub optimized: OptimizedTableDef,
}

/// Schema-on-read table over delimited files. Never written by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawTableDef {
    pub table: String,
    /// Relative to `storage.raw_prefix`.
    pub location: String,
    pub columns: Vec<Column>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub skip_header_lines: u32,
}

fn default_delimiter() -> String {
    ",".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Int,
    Bigint,
    Double,
    Boolean,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Bigint => "bigint",
            ColumnType::Double => "double",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

/// Partitioned, compressed copy of a raw table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizedTableDef {
    pub table: String,
    /// Relative to `storage.optimized_prefix`.
    pub location: String,
    #[serde(default)]
    pub format: StorageFormat,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub partitioned_by: Vec<String>,
    /// Projection over the raw table, used for the initial create-as-select and
    /// for every incremental insert. Partition columns come last.
    pub select: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    #[default]
    Parquet,
    Orc,
}

impl StorageFormat {
    pub fn sql_name(&self) -> &'static str {
        match self {
            StorageFormat::Parquet => "PARQUET",
            StorageFormat::Orc => "ORC",
        }
    }

    pub fn compression_property(&self) -> &'static str {
        match self {
            StorageFormat::Parquet => "parquet_compression",
            StorageFormat::Orc => "orc_compression",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    Snappy,
    Gzip,
    Zstd,
    None,
}

impl Compression {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Compression::Snappy => "SNAPPY",
            Compression::Gzip => "GZIP",
            Compression::Zstd => "ZSTD",
            Compression::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewDef {
    pub name: String,
    /// Body of the view; may reference tables unqualified (runs in the database context).
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Raw,
    Optimized,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Raw => write!(f, "raw"),
            TableKind::Optimized => write!(f, "optimized"),
        }
    }
}

/// Joins a storage prefix and a relative location into a directory URI.
pub fn join_location(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let relative = relative.trim_matches('/');
    if relative.is_empty() {
        format!("{}/", prefix)
    } else {
        format!("{}/{}/", prefix, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_location_normalizes_slashes() {
        assert_eq!(
            join_location("s3://raw-bucket/", "/offences/data"),
            "s3://raw-bucket/offences/data/"
        );
        assert_eq!(join_location("s3://raw-bucket", ""), "s3://raw-bucket/");
    }

    #[test]
    fn query_settings_defaults() {
        let q = QuerySettings::default();
        assert_eq!(q.poll_interval(), Duration::from_millis(500));
        assert_eq!(q.timeout(), Duration::from_secs(300));
        assert_eq!(q.parallel(), 1);

        let q = QuerySettings {
            parallel: Some(0),
            ..Default::default()
        };
        assert_eq!(q.parallel(), 1);
    }

    #[test]
    fn column_type_parses_snake_case() {
        let c: Column = serde_yaml::from_str("{ name: sum_pen_amt, type: int }").unwrap();
        assert_eq!(c.ty, ColumnType::Int);
        assert_eq!(c.ty.sql_name(), "int");
    }
}
