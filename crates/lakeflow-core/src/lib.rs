pub mod classify;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod loader;
pub mod model;
pub mod query;
pub mod report;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod workflow;

pub use errors::{EtlError, QueryError, WorkflowError};
pub use workflow::{CancelToken, RunReport, Workflow, WorkflowSettings};
