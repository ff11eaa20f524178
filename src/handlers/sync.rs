//! # Sync API Handlers
//!
//! The manual trigger endpoint and the worker completion callback.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, require_shared_secret};
use crate::error::{ApiError, not_found, validation_error};
use crate::handlers::jobs::JobInfo;
use crate::models::sync_job::{JobStatus, TriggeredBy};
use crate::repositories::{FinalizeResult, JobOutcome, SyncAppRepository, SyncJobRepository};
use crate::server::AppState;

/// Request payload for manually triggering a sync.
///
/// The app may be addressed by ID or by name; exactly one is required.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerRequest {
    pub app_id: Option<String>,
    #[schema(example = "crm")]
    pub app_name: Option<String>,
}

/// Response payload for a successful trigger
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TriggerResponse {
    pub job: JobInfo,
}

/// Completion report posted by the worker when a sync finishes
#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackRequest {
    pub job_id: String,
    /// Terminal status: `success` or `failed`
    #[schema(example = "success")]
    pub status: String,
    /// When the sync finished (RFC 3339)
    pub completed_at: String,
    pub duration_seconds: Option<i64>,
    pub tables_processed: Option<i32>,
    pub rows_imported: Option<i64>,
    pub error_message: Option<String>,
    pub log_content: Option<String>,
}

/// Response payload for the completion callback
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CallbackResponse {
    pub job: JobInfo,
    /// True when the job already carried this terminal status
    pub already_finalized: bool,
}

/// Trigger a sync for an app
#[utoipa::path(
    post,
    path = "/api/sync/trigger",
    security(("bearer_auth" = [])),
    request_body = TriggerRequest,
    responses(
        (status = 202, description = "Sync started", body = TriggerResponse),
        (status = 400, description = "Invalid request payload", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError),
        (status = 409, description = "A sync is already in flight for this app", body = ApiError),
        (status = 502, description = "Worker did not accept the dispatch", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(payload): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let repo = SyncAppRepository::new(state.db.clone());

    let app = match (&payload.app_id, &payload.app_name) {
        (Some(raw_id), _) => {
            let app_id = Uuid::parse_str(raw_id).map_err(|_| {
                validation_error(
                    "Invalid app_id",
                    serde_json::json!({ "app_id": "Must be a valid UUID" }),
                )
            })?;
            repo.find_by_id(app_id).await?
        }
        (None, Some(name)) => repo.find_by_name(name).await?,
        (None, None) => {
            return Err(validation_error(
                "Missing app reference",
                serde_json::json!({ "app_id": "Provide app_id or app_name" }),
            ));
        }
    };

    let app = app.ok_or_else(|| not_found("Sync app not found"))?;
    let job = state.invoker.trigger(&app, TriggeredBy::Manual).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            job: JobInfo::from(job),
        }),
    ))
}

/// Worker completion callback
#[utoipa::path(
    post,
    path = "/api/sync/callback",
    security(("bearer_auth" = [])),
    request_body = CallbackRequest,
    responses(
        (status = 200, description = "Job finalized", body = CallbackResponse),
        (status = 400, description = "Invalid callback payload", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job already reached a different terminal status", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, ApiError> {
    require_shared_secret(&headers, state.config.callback_secret.as_deref())?;

    let job_id = Uuid::parse_str(&payload.job_id).map_err(|_| {
        validation_error(
            "Invalid job_id",
            serde_json::json!({ "job_id": "Must be a valid UUID" }),
        )
    })?;

    let status = JobStatus::parse(&payload.status)
        .filter(JobStatus::is_terminal)
        .ok_or_else(|| {
            validation_error(
                "Invalid status",
                serde_json::json!({ "status": "Must be 'success' or 'failed'" }),
            )
        })?;

    let completed_at = DateTime::parse_from_rfc3339(&payload.completed_at)
        .map_err(|_| {
            validation_error(
                "Invalid completed_at",
                serde_json::json!({
                    "completed_at": "Must be a valid ISO 8601 timestamp (RFC 3339)"
                }),
            )
        })?
        .with_timezone(&Utc);

    let outcome = match status {
        JobStatus::Success => JobOutcome::Success {
            duration_seconds: payload.duration_seconds,
            tables_processed: payload.tables_processed,
            rows_imported: payload.rows_imported,
            log_content: payload.log_content,
        },
        JobStatus::Failed => JobOutcome::Failure {
            error_message: payload
                .error_message
                .unwrap_or_else(|| "Worker reported failure without a message".to_string()),
            log_content: payload.log_content,
        },
        JobStatus::Pending | JobStatus::Running => unreachable!("filtered to terminal statuses"),
    };

    let repo = SyncJobRepository::new(state.db.clone());
    let result = repo.finalize(job_id, outcome, completed_at).await?;
    let already_finalized = matches!(result, FinalizeResult::AlreadyFinalized(_));

    Ok(Json(CallbackResponse {
        job: JobInfo::from(result.into_model()),
        already_finalized,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::sync_app::NewSyncApp;
    use crate::server::tests::{
        authorized_request, callback_request, setup_test_state, setup_test_state_with_worker,
    };
    use axum::http::StatusCode;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seed_app(state: &AppState, name: &str) -> crate::models::sync_app::Model {
        SyncAppRepository::new(state.db.clone())
            .create(NewSyncApp {
                name: name.to_string(),
                description: None,
                deploy_key: "key".to_string(),
                tables: vec!["users".to_string()],
                table_mapping: None,
                cron_schedule: None,
                cron_enabled: false,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn trigger_by_name_starts_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/crm"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let state = setup_test_state_with_worker(&server.uri()).await;
        seed_app(&state, "crm").await;
        let app = crate::server::create_app(state);

        let response = app
            .oneshot(authorized_request(
                "POST",
                "/api/sync/trigger",
                Some(serde_json::json!({ "app_name": "crm" }).to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["job"]["status"], "running");
        assert_eq!(body["job"]["triggered_by"], "manual");
    }

    #[tokio::test]
    async fn trigger_conflicts_while_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let state = setup_test_state_with_worker(&server.uri()).await;
        seed_app(&state, "crm").await;
        let app = crate::server::create_app(state);

        let trigger = || {
            authorized_request(
                "POST",
                "/api/sync/trigger",
                Some(serde_json::json!({ "app_name": "crm" }).to_string()),
            )
        };

        let first = app.clone().oneshot(trigger()).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app.oneshot(trigger()).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = json_body(second).await;
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn trigger_unknown_app_is_404() {
        let state = setup_test_state().await;
        let app = crate::server::create_app(state);

        let response = app
            .oneshot(authorized_request(
                "POST",
                "/api/sync/trigger",
                Some(serde_json::json!({ "app_name": "ghost" }).to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trigger_requires_app_reference() {
        let state = setup_test_state().await;
        let app = crate::server::create_app(state);

        let response = app
            .oneshot(authorized_request(
                "POST",
                "/api/sync/trigger",
                Some("{}".to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trigger_maps_dispatch_failure_to_502() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = setup_test_state_with_worker(&server.uri()).await;
        seed_app(&state, "crm").await;
        let app = crate::server::create_app(state);

        let response = app
            .oneshot(authorized_request(
                "POST",
                "/api/sync/trigger",
                Some(serde_json::json!({ "app_name": "crm" }).to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["code"], "DISPATCH_FAILED");
    }

    async fn running_job(state: &AppState, name: &str) -> Uuid {
        let app = seed_app(state, name).await;
        let repo = SyncJobRepository::new(state.db.clone());
        let job = repo.admit(&app, TriggeredBy::Manual, true).await.unwrap();
        repo.mark_running(job.id).await.unwrap();
        job.id
    }

    fn callback_body(job_id: Uuid, status: &str) -> String {
        serde_json::json!({
            "job_id": job_id.to_string(),
            "status": status,
            "completed_at": Utc::now().to_rfc3339(),
            "duration_seconds": 12,
            "tables_processed": 2,
            "rows_imported": 450
        })
        .to_string()
    }

    #[tokio::test]
    async fn callback_finalizes_running_job() {
        let state = setup_test_state().await;
        let job_id = running_job(&state, "crm").await;
        let app = crate::server::create_app(state);

        let response = app
            .oneshot(callback_request(callback_body(job_id, "success")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["job"]["status"], "success");
        assert_eq!(body["job"]["rows_imported"], 450);
        assert_eq!(body["already_finalized"], false);
    }

    #[tokio::test]
    async fn callback_is_idempotent_for_same_status() {
        let state = setup_test_state().await;
        let job_id = running_job(&state, "crm").await;
        let app = crate::server::create_app(state);

        let first = app
            .clone()
            .oneshot(callback_request(callback_body(job_id, "success")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(callback_request(callback_body(job_id, "success")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let body = json_body(second).await;
        assert_eq!(body["already_finalized"], true);
    }

    #[tokio::test]
    async fn callback_rejects_conflicting_terminal_status() {
        let state = setup_test_state().await;
        let job_id = running_job(&state, "crm").await;
        let app = crate::server::create_app(state);

        let first = app
            .clone()
            .oneshot(callback_request(callback_body(job_id, "success")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(callback_request(callback_body(job_id, "failed")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = json_body(second).await;
        assert_eq!(body["code"], "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn callback_validates_payload() {
        let state = setup_test_state().await;
        let job_id = running_job(&state, "crm").await;
        let app = crate::server::create_app(state);

        let cases = [
            serde_json::json!({
                "job_id": "not-a-uuid",
                "status": "success",
                "completed_at": Utc::now().to_rfc3339()
            }),
            serde_json::json!({
                "job_id": job_id.to_string(),
                "status": "running",
                "completed_at": Utc::now().to_rfc3339()
            }),
            serde_json::json!({
                "job_id": job_id.to_string(),
                "status": "success",
                "completed_at": "yesterday"
            }),
        ];

        for case in cases {
            let response = app
                .clone()
                .oneshot(callback_request(case.to_string()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "case: {case}");
            let body = json_body(response).await;
            assert_eq!(body["code"], "VALIDATION_FAILED");
        }
    }

    #[tokio::test]
    async fn callback_requires_secret_when_configured() {
        let state = setup_test_state().await;
        let job_id = running_job(&state, "crm").await;
        let app = crate::server::create_app(state);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/sync/callback")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(callback_body(job_id, "success")))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn callback_unknown_job_is_404() {
        let state = setup_test_state().await;
        let app = crate::server::create_app(state);

        let response = app
            .oneshot(callback_request(callback_body(Uuid::new_v4(), "failed")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
