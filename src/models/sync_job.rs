//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! one row per sync attempt, plus the typed status and trigger enums.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// SyncJob entity representing one sync attempt for an app
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// App this job belongs to (no FK; jobs outlive app deletion)
    pub app_id: Uuid,

    /// App name captured at trigger time for display
    pub app_name: String,

    /// Current status: pending, running, success or failed
    pub status: String,

    /// Timestamp when the job was admitted
    pub started_at: DateTimeWithTimeZone,

    /// Timestamp when the job reached a terminal status
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Wall-clock duration reported at completion
    pub duration_seconds: Option<i64>,

    /// Number of tables the worker processed
    pub tables_processed: Option<i32>,

    /// Number of rows the worker imported
    pub rows_imported: Option<i64>,

    /// Failure message, set only on failed jobs
    pub error_message: Option<String>,

    /// Worker log output captured at completion
    pub log_content: Option<String>,

    /// What initiated the job: manual or cron
    pub triggered_by: String,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Typed job lifecycle status stored as text in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// In-flight statuses block admission of a new job for the same app.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What initiated a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Cron,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Cron => "cron",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(TriggeredBy::Manual),
            "cron" => Some(TriggeredBy::Cron),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }

    #[test]
    fn terminal_and_in_flight_partition() {
        assert!(JobStatus::Pending.is_in_flight());
        assert!(JobStatus::Running.is_in_flight());
        assert!(!JobStatus::Success.is_in_flight());
        assert!(!JobStatus::Failed.is_in_flight());

        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn triggered_by_roundtrip() {
        assert_eq!(TriggeredBy::parse("manual"), Some(TriggeredBy::Manual));
        assert_eq!(TriggeredBy::parse("cron"), Some(TriggeredBy::Cron));
        assert_eq!(TriggeredBy::parse("webhook"), None);
    }
}
