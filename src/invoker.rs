//! # Sync Invoker
//!
//! Orchestrates the start of a sync: admit a job for the app, mark it
//! running, and dispatch it to the worker service. A dispatch failure
//! immediately finalizes the job as failed so the app does not stay blocked
//! behind a job the worker never received.

use metrics::counter;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{ApiError, dispatch_failed};
use crate::models::sync_app;
use crate::models::sync_job::{self, TriggeredBy};
use crate::repositories::{JobOutcome, SyncJobRepository};
use crate::worker::WorkerClient;

/// Coordinates job admission and worker dispatch for one sync attempt
pub struct SyncInvoker {
    jobs: SyncJobRepository,
    worker: Arc<WorkerClient>,
    block_pending: bool,
}

impl SyncInvoker {
    /// Create a new invoker over the given database and worker client
    pub fn new(db: DatabaseConnection, worker: Arc<WorkerClient>, block_pending: bool) -> Self {
        Self {
            jobs: SyncJobRepository::new(db),
            worker,
            block_pending,
        }
    }

    /// Start a sync for the app.
    ///
    /// Returns the running job on success. Fails with a conflict when a job
    /// for the app is already in flight, and with a dispatch error when the
    /// worker cannot be reached; in the latter case the job is finalized as
    /// failed before returning.
    pub async fn trigger(
        &self,
        app: &sync_app::Model,
        triggered_by: TriggeredBy,
    ) -> Result<sync_job::Model, ApiError> {
        let admitted = self
            .jobs
            .admit(app, triggered_by, self.block_pending)
            .await?;
        let job = self.jobs.mark_running(admitted.id).await?;

        counter!(
            "syncboard_jobs_triggered_total",
            "triggered_by" => triggered_by.as_str()
        )
        .increment(1);

        if let Err(dispatch_err) = self.worker.dispatch(app, &job).await {
            counter!("syncboard_dispatch_failures_total").increment(1);
            error!(
                job_id = %job.id,
                app_name = %app.name,
                "Failing job after dispatch error: {}",
                dispatch_err
            );

            let outcome = JobOutcome::Failure {
                error_message: format!("Worker dispatch failed: {}", dispatch_err),
                log_content: None,
            };
            if let Err(finalize_err) = self
                .jobs
                .finalize(job.id, outcome, chrono::Utc::now())
                .await
            {
                error!(
                    job_id = %job.id,
                    "Failed to finalize job after dispatch error: {}",
                    finalize_err.message
                );
            }

            // The job id lets callers tell "created but dispatch failed"
            // apart from "never started".
            return Err(dispatch_failed(
                "Worker service did not accept the sync job",
            )
            .with_details(serde_json::json!({ "job_id": job.id.to_string() })));
        }

        info!(
            job_id = %job.id,
            app_name = %app.name,
            triggered_by = %triggered_by,
            "Sync started"
        );

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::repositories::sync_app::{NewSyncApp, SyncAppRepository};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        db
    }

    async fn create_app(db: &DatabaseConnection, name: &str) -> sync_app::Model {
        SyncAppRepository::new(db.clone())
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
            .expect("create app")
    }

    fn worker_client(base_url: &str) -> Arc<WorkerClient> {
        Arc::new(
            WorkerClient::new(&WorkerConfig {
                base_url: base_url.to_string(),
                auth_token: None,
                dispatch_timeout_seconds: 5,
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn trigger_admits_dispatches_and_returns_running_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/crm"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let db = test_db().await;
        let app = create_app(&db, "crm").await;
        let invoker = SyncInvoker::new(db, worker_client(&server.uri()), true);

        let job = invoker.trigger(&app, TriggeredBy::Manual).await.unwrap();
        assert_eq!(job.status, "running");
        assert_eq!(job.triggered_by, "manual");
    }

    #[tokio::test]
    async fn trigger_conflicts_while_job_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let db = test_db().await;
        let app = create_app(&db, "crm").await;
        let invoker = SyncInvoker::new(db, worker_client(&server.uri()), true);

        invoker.trigger(&app, TriggeredBy::Manual).await.unwrap();
        let err = invoker.trigger(&app, TriggeredBy::Cron).await.unwrap_err();
        assert_eq!(err.code, Box::from("CONFLICT"));
    }

    #[tokio::test]
    async fn dispatch_failure_fails_job_and_unblocks_app() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let db = test_db().await;
        let app = create_app(&db, "crm").await;
        let invoker = SyncInvoker::new(db.clone(), worker_client(&server.uri()), true);

        let err = invoker.trigger(&app, TriggeredBy::Manual).await.unwrap_err();
        assert_eq!(err.code, Box::from("DISPATCH_FAILED"));

        let jobs = SyncJobRepository::new(db);
        let latest = jobs.latest_for_app(app.id).await.unwrap().unwrap();
        assert_eq!(latest.status, "failed");
        assert!(
            latest
                .error_message
                .as_deref()
                .unwrap()
                .contains("dispatch failed")
        );

        // The failed job no longer blocks admission.
        server.reset().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        invoker.trigger(&app, TriggeredBy::Manual).await.unwrap();
    }
}
