//! # Apps API Handlers
//!
//! CRUD handlers for sync app registrations. Cron descriptors are validated
//! at write time so the scheduler never sees a descriptor it cannot parse.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, not_found, validation_error};
use crate::models::sync_app;
use crate::repositories::SyncAppRepository;
use crate::repositories::sync_app::{NewSyncApp, SyncAppUpdate};
use crate::schedule::CronSchedule;
use crate::server::AppState;

/// Request payload for registering a sync app
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAppRequest {
    /// Unique app name, used in worker dispatch URLs
    #[schema(example = "crm")]
    pub name: String,
    /// Optional human-readable description
    pub description: Option<String>,
    /// Deploy key the worker uses to reach the app's backend
    pub deploy_key: String,
    /// Tables to sync
    #[schema(example = json!(["users", "orders"]))]
    pub tables: Vec<String>,
    /// Optional per-table column mapping
    pub table_mapping: Option<JsonValue>,
    /// Five-field cron descriptor, e.g. `30 6 * * *`
    pub cron_schedule: Option<String>,
    /// Whether the cron scheduler should consider this app
    #[serde(default)]
    pub cron_enabled: bool,
}

/// Request payload for updating a sync app.
///
/// Absent fields are left untouched; nullable fields accept an explicit
/// `null` to clear the stored value.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateAppRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub deploy_key: Option<String>,
    pub tables: Option<Vec<String>>,
    #[serde(default, deserialize_with = "present")]
    pub table_mapping: Option<Option<JsonValue>>,
    #[serde(default, deserialize_with = "present")]
    pub cron_schedule: Option<Option<String>>,
    pub cron_enabled: Option<bool>,
}

/// Wrap a field that was present in the payload, so an explicit `null`
/// (`Some(None)`) stays distinguishable from an absent field (`None`).
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Sync app response payload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppInfo {
    /// Unique identifier for the app
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub deploy_key: String,
    pub tables: JsonValue,
    pub table_mapping: Option<JsonValue>,
    pub cron_schedule: Option<String>,
    pub cron_enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Response payload for the apps listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppsResponse {
    pub apps: Vec<AppInfo>,
}

impl From<sync_app::Model> for AppInfo {
    fn from(model: sync_app::Model) -> Self {
        Self {
            id: model.id.to_string(),
            name: model.name,
            description: model.description,
            deploy_key: model.deploy_key,
            tables: model.tables,
            table_mapping: model.table_mapping,
            cron_schedule: model.cron_schedule,
            cron_enabled: model.cron_enabled,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(validation_error(
            "Invalid app name",
            serde_json::json!({ "name": "Must not be empty" }),
        ));
    }
    if name.len() > 100 {
        return Err(validation_error(
            "Invalid app name",
            serde_json::json!({ "name": "Must be at most 100 characters" }),
        ));
    }
    // Names are path segments in worker dispatch URLs.
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(validation_error(
            "Invalid app name",
            serde_json::json!({ "name": "May only contain letters, digits, '-' and '_'" }),
        ));
    }
    Ok(())
}

fn validate_schedule(descriptor: &str) -> Result<(), ApiError> {
    CronSchedule::parse(descriptor).map_err(|err| {
        validation_error(
            "Invalid cron schedule",
            serde_json::json!({ "cron_schedule": err.to_string() }),
        )
    })?;
    Ok(())
}

fn require_schedule_when_enabled(
    cron_enabled: bool,
    cron_schedule: Option<&str>,
) -> Result<(), ApiError> {
    if cron_enabled && cron_schedule.is_none() {
        return Err(validation_error(
            "Invalid cron configuration",
            serde_json::json!({ "cron_schedule": "Required when cron_enabled is true" }),
        ));
    }
    Ok(())
}

/// Register a new sync app
#[utoipa::path(
    post,
    path = "/api/apps",
    security(("bearer_auth" = [])),
    request_body = CreateAppRequest,
    responses(
        (status = 201, description = "App created", body = AppInfo),
        (status = 400, description = "Invalid request payload", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "App name already taken", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn create_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(payload): Json<CreateAppRequest>,
) -> Result<(StatusCode, Json<AppInfo>), ApiError> {
    validate_name(&payload.name)?;

    if payload.deploy_key.trim().is_empty() {
        return Err(validation_error(
            "Invalid deploy key",
            serde_json::json!({ "deploy_key": "Must not be empty" }),
        ));
    }
    if payload.tables.is_empty() {
        return Err(validation_error(
            "Invalid tables",
            serde_json::json!({ "tables": "Must contain at least one table" }),
        ));
    }
    if let Some(descriptor) = &payload.cron_schedule {
        validate_schedule(descriptor)?;
    }
    require_schedule_when_enabled(payload.cron_enabled, payload.cron_schedule.as_deref())?;

    let repo = SyncAppRepository::new(state.db.clone());
    let app = repo
        .create(NewSyncApp {
            name: payload.name,
            description: payload.description,
            deploy_key: payload.deploy_key,
            tables: payload.tables,
            table_mapping: payload.table_mapping,
            cron_schedule: payload.cron_schedule,
            cron_enabled: payload.cron_enabled,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(AppInfo::from(app))))
}

/// List all registered sync apps
#[utoipa::path(
    get,
    path = "/api/apps",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "List of registered apps", body = AppsResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn list_apps(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<AppsResponse>, ApiError> {
    let repo = SyncAppRepository::new(state.db.clone());
    let apps = repo.list().await?;

    Ok(Json(AppsResponse {
        apps: apps.into_iter().map(AppInfo::from).collect(),
    }))
}

/// Fetch a single sync app
#[utoipa::path(
    get,
    path = "/api/apps/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "App ID (UUID)")),
    responses(
        (status = 200, description = "App details", body = AppInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn get_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<AppInfo>, ApiError> {
    let app_id = parse_app_id(&id)?;
    let repo = SyncAppRepository::new(state.db.clone());

    let app = repo
        .find_by_id(app_id)
        .await?
        .ok_or_else(|| not_found("Sync app not found"))?;

    Ok(Json(AppInfo::from(app)))
}

/// Update a sync app
#[utoipa::path(
    put,
    path = "/api/apps/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "App ID (UUID)")),
    request_body = UpdateAppRequest,
    responses(
        (status = 200, description = "Updated app", body = AppInfo),
        (status = 400, description = "Invalid request payload", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError),
        (status = 409, description = "App name already taken", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn update_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
    Json(payload): Json<UpdateAppRequest>,
) -> Result<Json<AppInfo>, ApiError> {
    let app_id = parse_app_id(&id)?;
    let repo = SyncAppRepository::new(state.db.clone());

    let app = repo
        .find_by_id(app_id)
        .await?
        .ok_or_else(|| not_found("Sync app not found"))?;

    if let Some(name) = &payload.name {
        validate_name(name)?;
    }
    if let Some(deploy_key) = &payload.deploy_key {
        if deploy_key.trim().is_empty() {
            return Err(validation_error(
                "Invalid deploy key",
                serde_json::json!({ "deploy_key": "Must not be empty" }),
            ));
        }
    }
    if let Some(tables) = &payload.tables {
        if tables.is_empty() {
            return Err(validation_error(
                "Invalid tables",
                serde_json::json!({ "tables": "Must contain at least one table" }),
            ));
        }
    }
    if let Some(Some(descriptor)) = &payload.cron_schedule {
        validate_schedule(descriptor)?;
    }

    // Validate the combined cron state the update would produce.
    let effective_enabled = payload.cron_enabled.unwrap_or(app.cron_enabled);
    let effective_schedule = match &payload.cron_schedule {
        Some(new_value) => new_value.as_deref(),
        None => app.cron_schedule.as_deref(),
    };
    require_schedule_when_enabled(effective_enabled, effective_schedule)?;

    let updated = repo
        .update(
            app,
            SyncAppUpdate {
                name: payload.name,
                description: payload.description,
                deploy_key: payload.deploy_key,
                tables: payload.tables,
                table_mapping: payload.table_mapping,
                cron_schedule: payload.cron_schedule,
                cron_enabled: payload.cron_enabled,
            },
        )
        .await?;

    Ok(Json(AppInfo::from(updated)))
}

/// Delete a sync app.
///
/// Job history for the app is preserved.
#[utoipa::path(
    delete,
    path = "/api/apps/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "App ID (UUID)")),
    responses(
        (status = 204, description = "App deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn delete_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let app_id = parse_app_id(&id)?;
    let repo = SyncAppRepository::new(state.db.clone());

    if repo.delete(app_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Sync app not found"))
    }
}

fn parse_app_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        validation_error(
            "Invalid app ID",
            serde_json::json!({ "id": "Must be a valid UUID" }),
        )
    })
}
