//! Idempotent schema setup: database, raw tables, optimized tables, view.

use crate::errors::{EtlError, QueryError};
use crate::model::{Dataset, EtlConfig};
use crate::query::{QueryExecutor, QueryJob};
use crate::sql;
use std::sync::Arc;

/// Outcome of one creation statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    /// The statement ran; a create-if-not-exists may still have found the object present.
    Applied(QueryJob),
    /// The backend refused because the object already exists.
    AlreadyExists { job_id: String },
}

impl Created {
    pub fn job_id(&self) -> &str {
        match self {
            Created::Applied(job) => &job.id,
            Created::AlreadyExists { job_id } => job_id,
        }
    }
}

#[derive(Clone)]
pub struct SchemaBootstrapper {
    executor: QueryExecutor,
    cfg: Arc<EtlConfig>,
}

impl SchemaBootstrapper {
    pub fn new(executor: QueryExecutor, cfg: Arc<EtlConfig>) -> Self {
        Self { executor, cfg }
    }

    pub async fn ensure_database(&self) -> Result<Created, EtlError> {
        let stmt = sql::create_database(&self.cfg.database);
        self.run_ddl(&self.cfg.database, &stmt, false).await
    }

    pub async fn create_raw_table(&self, ds: &Dataset) -> Result<Created, EtlError> {
        let stmt = sql::create_raw_table(&self.cfg, ds);
        self.run_ddl(&ds.raw.table, &stmt, false).await
    }

    /// Declared as a select over the raw table, so the first population
    /// happens together with creation.
    pub async fn create_optimized_table(&self, ds: &Dataset) -> Result<Created, EtlError> {
        let stmt = sql::create_optimized_table(&self.cfg, ds);
        self.run_ddl(&ds.optimized.table, &stmt, false).await
    }

    /// Always overwrites the previous definition.
    pub async fn create_or_replace_view(&self) -> Result<Created, EtlError> {
        let stmt = sql::create_or_replace_view(&self.cfg.view);
        self.run_ddl(&self.cfg.view.name, &stmt, true).await
    }

    async fn run_ddl(
        &self,
        object: &str,
        stmt: &str,
        in_database: bool,
    ) -> Result<Created, EtlError> {
        let options = if in_database {
            self.executor.options().in_database(&self.cfg.database)
        } else {
            self.executor.options().clone()
        };

        match self.executor.execute(stmt, &options).await {
            Ok(job) => {
                tracing::info!(
                    event = "lakeflow.schema.applied",
                    object = %object,
                    job_id = %job.id,
                );
                Ok(Created::Applied(job))
            }
            Err(e) if e.is_already_exists() => {
                tracing::info!(
                    event = "lakeflow.schema.exists",
                    object = %object,
                    "object already exists, nothing to do"
                );
                Ok(Created::AlreadyExists {
                    job_id: e.job_id().unwrap_or_default().to_string(),
                })
            }
            Err(QueryError::ExecutionFailure { job_id, reason }) => Err(EtlError::Schema {
                object: object.to_string(),
                reason,
                job_id: Some(job_id),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
