//! # Data Models
//!
//! SeaORM entity models and shared API types for the Syncboard service.

pub mod sync_app;
pub mod sync_job;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Basic service information returned by the root endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    /// Service version
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: "syncboard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
