//! # SyncApp Repository
//!
//! Repository operations for the sync_apps table.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::sync_app::{ActiveModel, Column, Entity, Model};

/// Fields accepted when creating a sync app.
#[derive(Debug, Clone)]
pub struct NewSyncApp {
    pub name: String,
    pub description: Option<String>,
    pub deploy_key: String,
    pub tables: Vec<String>,
    pub table_mapping: Option<JsonValue>,
    pub cron_schedule: Option<String>,
    pub cron_enabled: bool,
}

/// Partial update for a sync app. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SyncAppUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub deploy_key: Option<String>,
    pub tables: Option<Vec<String>>,
    pub table_mapping: Option<Option<JsonValue>>,
    pub cron_schedule: Option<Option<String>>,
    pub cron_enabled: Option<bool>,
}

/// Repository for sync app database operations
pub struct SyncAppRepository {
    db: DatabaseConnection,
}

impl SyncAppRepository {
    /// Create a new SyncAppRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a new sync app. A duplicate name maps to a conflict error.
    pub async fn create(&self, new_app: NewSyncApp) -> Result<Model, ApiError> {
        let now = Utc::now().fixed_offset();

        let app = ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new_app.name),
            description: Set(new_app.description),
            deploy_key: Set(new_app.deploy_key),
            tables: Set(JsonValue::from(new_app.tables)),
            table_mapping: Set(new_app.table_mapping),
            cron_schedule: Set(new_app.cron_schedule),
            cron_enabled: Set(new_app.cron_enabled),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = app.insert(&self.db).await?;

        tracing::info!(app_id = %result.id, app_name = %result.name, "Sync app created");

        Ok(result)
    }

    /// Find a sync app by ID
    pub async fn find_by_id(&self, app_id: Uuid) -> Result<Option<Model>, ApiError> {
        let app = Entity::find_by_id(app_id).one(&self.db).await.map_err(|e| {
            tracing::error!("Failed to find sync app: {}", e);
            ApiError::from(e)
        })?;

        Ok(app)
    }

    /// Find a sync app by its unique name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Model>, ApiError> {
        let app = Entity::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find sync app by name: {}", e);
                ApiError::from(e)
            })?;

        Ok(app)
    }

    /// List all sync apps ordered by name
    pub async fn list(&self) -> Result<Vec<Model>, ApiError> {
        let apps = Entity::find()
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list sync apps: {}", e);
                ApiError::from(e)
            })?;

        Ok(apps)
    }

    /// List apps the cron evaluator should consider
    pub async fn list_cron_enabled(&self) -> Result<Vec<Model>, ApiError> {
        let apps = Entity::find()
            .filter(Column::CronEnabled.eq(true))
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list cron-enabled sync apps: {}", e);
                ApiError::from(e)
            })?;

        Ok(apps)
    }

    /// Apply a partial update to an existing sync app
    pub async fn update(&self, app: Model, update: SyncAppUpdate) -> Result<Model, ApiError> {
        let mut active: ActiveModel = app.into();

        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(description) = update.description {
            active.description = Set(description);
        }
        if let Some(deploy_key) = update.deploy_key {
            active.deploy_key = Set(deploy_key);
        }
        if let Some(tables) = update.tables {
            active.tables = Set(JsonValue::from(tables));
        }
        if let Some(table_mapping) = update.table_mapping {
            active.table_mapping = Set(table_mapping);
        }
        if let Some(cron_schedule) = update.cron_schedule {
            active.cron_schedule = Set(cron_schedule);
        }
        if let Some(cron_enabled) = update.cron_enabled {
            active.cron_enabled = Set(cron_enabled);
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        let updated = active.update(&self.db).await?;

        Ok(updated)
    }

    /// Delete a sync app. Job history is intentionally preserved.
    pub async fn delete(&self, app_id: Uuid) -> Result<bool, ApiError> {
        let result = Entity::delete_by_id(app_id)
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete sync app: {}", e);
                ApiError::from(e)
            })?;

        Ok(result.rows_affected > 0)
    }
}
