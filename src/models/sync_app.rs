//! SyncApp entity model
//!
//! This module contains the SeaORM entity model for the sync_apps table,
//! which represents operator-configured sync targets.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// SyncApp entity representing a configured sync application
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_apps")]
pub struct Model {
    /// Unique identifier for the sync app (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Operator-facing unique name, also used in the worker dispatch URL
    pub name: String,

    /// Optional free-form description
    pub description: Option<String>,

    /// Credential the worker uses to reach the app's source deployment
    pub deploy_key: String,

    /// Source tables to sync (JSON array of strings)
    #[sea_orm(column_type = "JsonBinary")]
    pub tables: JsonValue,

    /// Optional source-to-destination table name mapping
    #[sea_orm(column_type = "JsonBinary")]
    pub table_mapping: Option<JsonValue>,

    /// Five-field cron descriptor, present when the app can be scheduled
    pub cron_schedule: Option<String>,

    /// Whether the cron evaluator considers this app
    pub cron_enabled: bool,

    /// Timestamp when the app was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the app was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
