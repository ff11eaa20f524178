//! # Repositories
//!
//! Database access layers wrapping SeaORM entity operations.

pub mod sync_app;
pub mod sync_job;

pub use sync_app::SyncAppRepository;
pub use sync_job::{FinalizeResult, JobOutcome, SyncJobRepository};
