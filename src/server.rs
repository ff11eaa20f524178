//! # Server Configuration
//!
//! Router setup, shared application state and the server entry point for the
//! Syncboard API. Operator routes are guarded by bearer middleware; the cron
//! tick and worker callback authenticate with their own shared secrets inside
//! the handlers.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::invoker::SyncInvoker;
use crate::scheduler::CronScheduler;
use crate::sweeper::StuckJobSweeper;
use crate::telemetry::trace_context_middleware;
use crate::worker::WorkerClient;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub invoker: Arc<SyncInvoker>,
    pub scheduler: Arc<CronScheduler>,
    pub sweeper: Arc<StuckJobSweeper>,
}

impl AppState {
    /// Build application state and the background services it carries.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
    ) -> Result<Self, crate::worker::WorkerError> {
        let worker = Arc::new(WorkerClient::new(&config.worker)?);
        let invoker = Arc::new(SyncInvoker::new(
            db.clone(),
            worker,
            config.scheduler.admission_block_pending,
        ));
        let scheduler = Arc::new(CronScheduler::new(
            Arc::clone(&config),
            db.clone(),
            Arc::clone(&invoker),
        ));
        let sweeper = Arc::new(StuckJobSweeper::new(Arc::clone(&config), db.clone()));

        Ok(Self {
            config,
            db,
            invoker,
            scheduler,
            sweeper,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route(
            "/api/apps",
            post(handlers::apps::create_app).get(handlers::apps::list_apps),
        )
        .route(
            "/api/apps/{id}",
            get(handlers::apps::get_app)
                .put(handlers::apps::update_app)
                .delete(handlers::apps::delete_app),
        )
        .route("/api/sync/trigger", post(handlers::sync::trigger_sync))
        .route("/api/jobs", get(handlers::jobs::list_jobs))
        .route("/api/jobs/sweep", post(handlers::jobs::sweep_jobs))
        .route("/api/jobs/{id}", get(handlers::jobs::get_job))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    let open_routes = Router::new()
        .route("/", get(handlers::root))
        .route(
            "/api/cron/tick",
            post(handlers::cron::tick).get(handlers::cron::tick),
        )
        .route("/api/sync/callback", post(handlers::sync::sync_callback));

    Router::new()
        .merge(operator_routes)
        .merge(open_routes)
        // Outermost so every handler and error path sees the trace id.
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config), db)?;

    let shutdown = CancellationToken::new();
    let scheduler_task = tokio::spawn(Arc::clone(&state.scheduler).run(shutdown.clone()));
    let sweeper_task = tokio::spawn(Arc::clone(&state.sweeper).run(shutdown.clone()));

    let app = create_app(state);

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = scheduler_task.await;
    let _ = sweeper_task.await;

    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("opaque")
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::apps::create_app,
        crate::handlers::apps::list_apps,
        crate::handlers::apps::get_app,
        crate::handlers::apps::update_app,
        crate::handlers::apps::delete_app,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::sweep_jobs,
        crate::handlers::sync::trigger_sync,
        crate::handlers::sync::sync_callback,
        crate::handlers::cron::tick,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::sync_job::JobStatus,
            crate::models::sync_job::TriggeredBy,
            crate::error::ApiError,
            crate::handlers::apps::CreateAppRequest,
            crate::handlers::apps::UpdateAppRequest,
            crate::handlers::apps::AppInfo,
            crate::handlers::apps::AppsResponse,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::sync::TriggerRequest,
            crate::handlers::sync::TriggerResponse,
            crate::handlers::sync::CallbackRequest,
            crate::handlers::sync::CallbackResponse,
            crate::scheduler::TickStatus,
            crate::scheduler::AppTickResult,
            crate::scheduler::TickSummary,
            crate::sweeper::SweepReport,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Syncboard API",
        description = "API for orchestrating app data syncs",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use tower::ServiceExt;

    pub(crate) const TEST_OPERATOR_TOKEN: &str = "test-token-123";
    pub(crate) const TEST_CRON_SECRET: &str = "test-cron-secret";
    pub(crate) const TEST_CALLBACK_SECRET: &str = "test-callback-secret";

    /// State backed by an in-memory database and a worker URL nothing
    /// listens on; tests that exercise dispatch pass a mock server URL.
    pub(crate) async fn setup_test_state() -> AppState {
        setup_test_state_with_worker("http://127.0.0.1:9").await
    }

    pub(crate) async fn setup_test_state_with_worker(worker_base_url: &str) -> AppState {
        let mut config = AppConfig {
            profile: "test".to_string(),
            operator_tokens: vec![TEST_OPERATOR_TOKEN.to_string()],
            cron_secret: Some(TEST_CRON_SECRET.to_string()),
            callback_secret: Some(TEST_CALLBACK_SECRET.to_string()),
            ..Default::default()
        };
        config.worker.base_url = worker_base_url.to_string();
        config.worker.dispatch_timeout_seconds = 5;
        config.scheduler.timezone = "UTC".to_string();

        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        AppState::new(Arc::new(config), db).expect("build test state")
    }

    pub(crate) fn authorized_request(method: &str, uri: &str, body: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TEST_OPERATOR_TOKEN}"));

        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }

        builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap()
    }

    pub(crate) fn callback_request(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/sync/callback")
            .header(header::AUTHORIZATION, format!("Bearer {TEST_CALLBACK_SECRET}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    pub(crate) fn cron_request(method: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri("/api/cron/tick")
            .header(header::AUTHORIZATION, format!("Bearer {TEST_CRON_SECRET}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn root_is_open_and_returns_service_info() {
        let state = setup_test_state().await;
        let app = create_app(state);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["name"], "syncboard");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let state = setup_test_state().await;
        let app = create_app(state);

        let request = Request::builder()
            .uri("/openapi.json")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["paths"]["/api/apps"].is_object());
        assert!(doc["paths"]["/api/sync/trigger"].is_object());
        assert!(doc["paths"]["/api/cron/tick"].is_object());
    }

    #[tokio::test]
    async fn operator_routes_reject_missing_token() {
        let state = setup_test_state().await;
        let app = create_app(state);

        for uri in ["/api/apps", "/api/jobs"] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "uri: {uri}");
        }
    }

    #[tokio::test]
    async fn error_responses_carry_request_trace_id() {
        let state = setup_test_state().await;
        let app = create_app(state);

        let request = Request::builder()
            .uri("/api/apps")
            .header(crate::telemetry::REQUEST_ID_HEADER, "upstream-7")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .headers()
                .get(crate::telemetry::REQUEST_ID_HEADER)
                .unwrap(),
            "upstream-7"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["trace_id"], "upstream-7");
    }
}
