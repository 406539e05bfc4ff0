pub mod schema;
pub mod store;

pub use store::{LeaseOutcome, RunSummary, Store, StoredJob};
