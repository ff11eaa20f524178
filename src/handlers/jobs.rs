//! # Jobs API Handlers
//!
//! Handlers for listing sync jobs and sweeping stuck ones.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, not_found, validation_error};
use crate::models::sync_job::{self, JobStatus};
use crate::repositories::SyncJobRepository;
use crate::repositories::sync_job::ListJobsFilter;
use crate::server::AppState;
use crate::sweeper::SweepReport;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job status (one of: pending, running, success, failed)
    pub status: Option<String>,
    /// Filter by app ID (UUID)
    pub app_id: Option<String>,
    /// Maximum number of jobs to return (default: 50, max: 100)
    pub limit: Option<u64>,
    /// Number of jobs to skip
    pub offset: Option<u64>,
}

/// Sync job response payload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    /// Unique identifier for the sync job
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    pub app_id: String,
    pub app_name: String,
    /// Current status of the job
    #[schema(example = "running")]
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<i64>,
    pub tables_processed: Option<i32>,
    pub rows_imported: Option<i64>,
    pub error_message: Option<String>,
    pub log_content: Option<String>,
    /// What initiated the job
    #[schema(example = "manual")]
    pub triggered_by: String,
}

/// Response payload for the jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        Self {
            id: model.id.to_string(),
            app_id: model.app_id.to_string(),
            app_name: model.app_name,
            status: model.status,
            started_at: model.started_at.to_rfc3339(),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
            duration_seconds: model.duration_seconds,
            tables_processed: model.tables_processed,
            rows_imported: model.rows_imported,
            error_message: model.error_message,
            log_content: model.log_content,
            triggered_by: model.triggered_by,
        }
    }
}

/// List sync jobs, newest first
#[utoipa::path(
    get,
    path = "/api/jobs",
    security(("bearer_auth" = [])),
    params(
        ("status" = Option<String>, Query, description = "Filter by job status"),
        ("app_id" = Option<String>, Query, description = "Filter by app ID (UUID)"),
        ("limit" = Option<u64>, Query, description = "Maximum number of jobs to return (default 50, max 100)"),
        ("offset" = Option<u64>, Query, description = "Number of jobs to skip")
    ),
    responses(
        (status = 200, description = "List of sync jobs", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let status = match &params.status {
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            validation_error(
                "Invalid status",
                serde_json::json!({
                    "status": "Must be one of: pending, running, success, failed"
                }),
            )
        })?),
        None => None,
    };

    let app_id = match &params.app_id {
        Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| {
            validation_error(
                "Invalid app_id",
                serde_json::json!({ "app_id": "Must be a valid UUID" }),
            )
        })?),
        None => None,
    };

    let limit = params.limit.unwrap_or(50);
    if limit == 0 || limit > 100 {
        return Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": "Must be between 1 and 100" }),
        ));
    }

    let repo = SyncJobRepository::new(state.db.clone());
    let jobs = repo
        .list(ListJobsFilter {
            app_id,
            status,
            limit: Some(limit),
            offset: params.offset,
        })
        .await?;

    Ok(Json(JobsResponse {
        jobs: jobs.into_iter().map(JobInfo::from).collect(),
    }))
}

/// Fetch a single sync job
#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Job ID (UUID)")),
    responses(
        (status = 200, description = "Job details", body = JobInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    let job_id = Uuid::parse_str(&id).map_err(|_| {
        validation_error(
            "Invalid job ID",
            serde_json::json!({ "id": "Must be a valid UUID" }),
        )
    })?;

    let repo = SyncJobRepository::new(state.db.clone());
    let job = repo
        .find_by_id(job_id)
        .await?
        .ok_or_else(|| not_found("Sync job not found"))?;

    Ok(Json(JobInfo::from(job)))
}

/// Fail all in-flight jobs stuck beyond the allowed run time
#[utoipa::path(
    post,
    path = "/api/jobs/sweep",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep report", body = SweepReport),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn sweep_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<SweepReport>, ApiError> {
    let report = state.sweeper.sweep().await?;
    Ok(Json(report))
}
