//! # Cron API Handlers
//!
//! External tick endpoint for platforms that drive scheduling with an HTTP
//! cron (both GET and POST are routed here). Authenticates with the dedicated
//! cron secret rather than operator tokens.

use axum::{extract::State, http::HeaderMap, response::Json};

use crate::auth::require_shared_secret;
use crate::error::ApiError;
use crate::scheduler::TickSummary;
use crate::server::AppState;

/// Evaluate all cron-enabled apps and trigger the ones that are due
#[utoipa::path(
    post,
    path = "/api/cron/tick",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tick summary", body = TickSummary),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "cron"
)]
pub async fn tick(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TickSummary>, ApiError> {
    require_shared_secret(&headers, state.config.cron_secret.as_deref())?;

    let summary = state.scheduler.tick().await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::SyncAppRepository;
    use crate::repositories::sync_app::NewSyncApp;
    use crate::server::tests::{cron_request, setup_test_state_with_worker};
    use axum::http::StatusCode;
    use tower::ServiceExt;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn tick_requires_cron_secret() {
        let state = setup_test_state_with_worker("http://localhost:9").await;
        let app = crate::server::create_app(state);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/cron/tick")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tick_evaluates_enabled_apps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let state = setup_test_state_with_worker(&server.uri()).await;
        SyncAppRepository::new(state.db.clone())
            .create(NewSyncApp {
                name: "crm".to_string(),
                description: None,
                deploy_key: "key".to_string(),
                tables: vec!["users".to_string()],
                table_mapping: None,
                cron_schedule: Some("* * * * *".to_string()),
                cron_enabled: true,
            })
            .await
            .unwrap();
        let app = crate::server::create_app(state);

        // POST and GET both drive the evaluator.
        let response = app
            .clone()
            .oneshot(cron_request("POST"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["apps_checked"], 1);
        assert_eq!(body["triggered"], 1);

        let response = app.oneshot(cron_request("GET")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["results"][0]["status"], "skipped");
        assert_eq!(body["results"][0]["reason"], "already_running");
    }
}
