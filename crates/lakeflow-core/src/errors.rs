use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::time::Duration;
use thiserror::Error;

/// Failures reported while talking to the query service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The statement never became a job: malformed request or unreachable service.
    #[error("submission failed: {0}")]
    Submission(String),

    /// The backend accepted the job and then reported it as failed.
    #[error("query {job_id} failed: {reason}")]
    ExecutionFailure { job_id: String, reason: String },

    /// Polling gave up before the job reached a terminal state.
    #[error("query {job_id} did not finish within {waited:?}")]
    Timeout { job_id: String, waited: Duration },

    /// The job was cancelled in the service.
    #[error("query {job_id} was cancelled")]
    JobCancelled { job_id: String },

    /// The job was submitted, then its status or results could not be read.
    /// Its state in the service is unknown; it may still be running.
    #[error("lost track of query {job_id}: {reason}")]
    Unreachable { job_id: String, reason: String },
}

impl QueryError {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueryError::Submission(_) => None,
            QueryError::ExecutionFailure { job_id, .. }
            | QueryError::Timeout { job_id, .. }
            | QueryError::JobCancelled { job_id }
            | QueryError::Unreachable { job_id, .. } => Some(job_id),
        }
    }

    /// Ties a transport failure that happened after submission to its job.
    pub fn for_job(self, job_id: &str) -> QueryError {
        match self {
            QueryError::Submission(reason) => QueryError::Unreachable {
                job_id: job_id.to_string(),
                reason,
            },
            other => other,
        }
    }

    /// Backends phrase this differently; all of them say "already exists".
    pub fn is_already_exists(&self) -> bool {
        match self {
            QueryError::ExecutionFailure { reason, .. } => {
                reason.to_ascii_lowercase().contains("already exists")
            }
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EtlError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("schema error on {object}: {reason}")]
    Schema {
        object: String,
        reason: String,
        job_id: Option<String>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EtlError {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            EtlError::Query(q) => q.job_id(),
            EtlError::Schema { job_id, .. } => job_id.as_deref(),
            EtlError::Cancelled | EtlError::Config(_) | EtlError::Internal(_) => None,
        }
    }

    /// Short machine-readable label, stored in run history.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::Query(QueryError::Submission(_)) => "submission",
            EtlError::Query(QueryError::ExecutionFailure { .. }) => "execution_failure",
            EtlError::Query(QueryError::Timeout { .. }) => "timeout",
            EtlError::Query(QueryError::JobCancelled { .. }) => "job_cancelled",
            EtlError::Query(QueryError::Unreachable { .. }) => "unreachable",
            EtlError::Schema { .. } => "schema",
            EtlError::Cancelled => "cancelled",
            EtlError::Config(_) => "config",
            EtlError::Internal(_) => "internal",
        }
    }
}

/// A step of a workflow run failed; the run stopped there.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("step '{step}' failed: {cause}")]
pub struct WorkflowError {
    pub step: String,
    #[source]
    pub cause: EtlError,
    /// Last job handle the run knew about. It may still be running in the service.
    pub last_job: Option<String>,
}

impl Serialize for WorkflowError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("WorkflowError", 4)?;
        s.serialize_field("step", &self.step)?;
        s.serialize_field("kind", self.cause.kind())?;
        s.serialize_field("message", &self.cause.to_string())?;
        s.serialize_field("last_job", &self.last_job)?;
        s.end()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ConfigError(pub String);

impl From<ConfigError> for EtlError {
    fn from(e: ConfigError) -> Self {
        EtlError::Config(e.0)
    }
}
