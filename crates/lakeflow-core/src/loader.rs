use crate::errors::EtlError;
use crate::model::{Dataset, EtlConfig};
use crate::query::QueryExecutor;
use crate::sql;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub raw_table: String,
    pub optimized_table: String,
    pub job_id: String,
    /// As reported by the service; not every backend reports it.
    pub rows_affected: Option<u64>,
}

/// Appends everything currently in a raw table to its optimized table.
///
/// Not idempotent: a second call with unchanged raw data duplicates rows.
/// Callers decide when it is safe to run.
#[derive(Clone)]
pub struct IncrementalLoader {
    executor: QueryExecutor,
    cfg: Arc<EtlConfig>,
}

impl IncrementalLoader {
    pub fn new(executor: QueryExecutor, cfg: Arc<EtlConfig>) -> Self {
        Self { executor, cfg }
    }

    pub async fn load_increment(&self, ds: &Dataset) -> Result<LoadOutcome, EtlError> {
        let stmt = sql::insert_increment(&self.cfg, ds);
        tracing::info!(
            event = "lakeflow.load.start",
            raw = %ds.raw.table,
            optimized = %ds.optimized.table,
        );

        let job = self.executor.execute(&stmt, self.executor.options()).await?;

        tracing::info!(
            event = "lakeflow.load.done",
            optimized = %ds.optimized.table,
            job_id = %job.id,
            rows_affected = ?job.statistics.rows_affected,
        );
        Ok(LoadOutcome {
            raw_table: ds.raw.table.clone(),
            optimized_table: ds.optimized.table.clone(),
            job_id: job.id,
            rows_affected: job.statistics.rows_affected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, SAMPLE_CONFIG};
    use crate::errors::QueryError;
    use crate::query::memory::InMemoryQueryService;

    #[tokio::test]
    async fn appends_raw_rows_each_time_it_runs() {
        let cfg = Arc::new(parse_config(SAMPLE_CONFIG, true).unwrap());
        let svc = Arc::new(InMemoryQueryService::new());
        svc.add_table("traffic_camera", "traffic_offences_data_csv", 7);
        svc.add_table("traffic_camera", "traffic_offences_data_parquet", 7);
        let loader = IncrementalLoader::new(QueryExecutor::from_config(svc.clone(), &cfg), cfg.clone());

        let out = loader.load_increment(&cfg.datasets[0]).await.unwrap();
        assert_eq!(out.rows_affected, Some(7));
        assert_eq!(out.optimized_table, "traffic_offences_data_parquet");

        // Running again without new raw data duplicates rows.
        loader.load_increment(&cfg.datasets[0]).await.unwrap();
        assert_eq!(
            svc.table_rows("traffic_camera", "traffic_offences_data_parquet"),
            Some(21)
        );
    }

    #[tokio::test]
    async fn failure_is_surfaced_not_retried() {
        let cfg = Arc::new(parse_config(SAMPLE_CONFIG, true).unwrap());
        let svc = Arc::new(InMemoryQueryService::new());
        svc.add_database("traffic_camera");
        svc.fail_on("INSERT INTO", "INVALID_CAST_ARGUMENT: Value cannot be cast to int");
        let loader = IncrementalLoader::new(QueryExecutor::from_config(svc.clone(), &cfg), cfg.clone());

        let err = loader.load_increment(&cfg.datasets[0]).await.unwrap_err();
        assert!(matches!(
            err,
            EtlError::Query(QueryError::ExecutionFailure { .. })
        ));
        assert_eq!(svc.submitted().len(), 1);
    }
}
