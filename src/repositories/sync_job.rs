//! # SyncJob Repository
//!
//! Repository operations for the sync_jobs table, including the admission
//! check that guarantees at most one in-flight job per app and the
//! finalization rules for the job lifecycle.
//!
//! Admission is a check-then-insert inside a transaction; the partial
//! unique index `idx_sync_jobs_active` on (app_id) backstops any race
//! between concurrent triggers, surfacing as a unique violation which is
//! reported as the same conflict.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::error::{ApiError, conflict, invalid_transition, is_unique_violation, not_found};
use crate::models::sync_app;
use crate::models::sync_job::{ActiveModel, Column, Entity, JobStatus, Model, TriggeredBy};

/// Terminal outcome reported for a job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success {
        duration_seconds: Option<i64>,
        tables_processed: Option<i32>,
        rows_imported: Option<i64>,
        log_content: Option<String>,
    },
    Failure {
        error_message: String,
        log_content: Option<String>,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Success { .. } => JobStatus::Success,
            JobOutcome::Failure { .. } => JobStatus::Failed,
        }
    }
}

/// Result of a finalize call.
#[derive(Debug)]
pub enum FinalizeResult {
    /// The job transitioned from running to the terminal status.
    Finalized(Model),
    /// The job was already terminal with the same status; nothing changed.
    AlreadyFinalized(Model),
}

impl FinalizeResult {
    pub fn into_model(self) -> Model {
        match self {
            FinalizeResult::Finalized(model) | FinalizeResult::AlreadyFinalized(model) => model,
        }
    }
}

/// Query filters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct ListJobsFilter {
    pub app_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Repository for sync job database operations
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Admit a new job for the app, creating it in pending status.
    ///
    /// Fails with a conflict when another job for the same app is still in
    /// flight. `block_pending` controls whether pending jobs count as in
    /// flight alongside running ones.
    pub async fn admit(
        &self,
        app: &sync_app::Model,
        triggered_by: TriggeredBy,
        block_pending: bool,
    ) -> Result<Model, ApiError> {
        let txn = self.db.begin().await?;

        let blocking_statuses: Vec<&str> = if block_pending {
            vec![JobStatus::Pending.as_str(), JobStatus::Running.as_str()]
        } else {
            vec![JobStatus::Running.as_str()]
        };

        let in_flight = Entity::find()
            .filter(Column::AppId.eq(app.id))
            .filter(Column::Status.is_in(blocking_statuses))
            .count(&txn)
            .await?;

        if in_flight > 0 {
            txn.rollback().await?;
            tracing::info!(
                app_id = %app.id,
                app_name = %app.name,
                "Admission refused; sync already in flight"
            );
            return Err(conflict("A sync is already running for this app"));
        }

        let now = Utc::now().fixed_offset();
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            app_id: Set(app.id),
            app_name: Set(app.name.clone()),
            status: Set(JobStatus::Pending.as_str().to_string()),
            started_at: Set(now),
            completed_at: Set(None),
            duration_seconds: Set(None),
            tables_processed: Set(None),
            rows_imported: Set(None),
            error_message: Set(None),
            log_content: Set(None),
            triggered_by: Set(triggered_by.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = match job.insert(&txn).await {
            Ok(model) => model,
            Err(err) if is_unique_violation(&err) => {
                // Lost the race against a concurrent trigger.
                txn.rollback().await?;
                return Err(conflict("A sync is already running for this app"));
            }
            Err(err) => {
                txn.rollback().await?;
                return Err(err.into());
            }
        };

        txn.commit().await?;

        tracing::info!(
            app_id = %app.id,
            app_name = %app.name,
            job_id = %inserted.id,
            triggered_by = %triggered_by,
            "Sync job admitted"
        );

        Ok(inserted)
    }

    /// Transition a pending job to running.
    pub async fn mark_running(&self, job_id: Uuid) -> Result<Model, ApiError> {
        let job = self.require(job_id).await?;

        let status = parse_status(&job)?;
        if status != JobStatus::Pending {
            return Err(invalid_transition(
                "Only pending jobs can start running",
                serde_json::json!({
                    "job_id": job_id.to_string(),
                    "current_status": status.as_str(),
                    "requested_status": JobStatus::Running.as_str(),
                }),
            ));
        }

        let mut active: ActiveModel = job.into();
        active.status = Set(JobStatus::Running.as_str().to_string());
        active.updated_at = Set(Utc::now().fixed_offset());

        let updated = active.update(&self.db).await?;
        Ok(updated)
    }

    /// Finalize a running job with a terminal outcome.
    ///
    /// Finalizing a job that already carries the same terminal status is an
    /// idempotent no-op; any other starting status is an invalid transition.
    pub async fn finalize(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<FinalizeResult, ApiError> {
        let job = self.require(job_id).await?;

        let current = parse_status(&job)?;
        let target = outcome.status();

        if current.is_terminal() {
            if current == target {
                tracing::debug!(job_id = %job_id, status = %current, "Job already finalized");
                return Ok(FinalizeResult::AlreadyFinalized(job));
            }
            return Err(invalid_transition(
                "Job already reached a different terminal status",
                serde_json::json!({
                    "job_id": job_id.to_string(),
                    "current_status": current.as_str(),
                    "requested_status": target.as_str(),
                }),
            ));
        }

        if current != JobStatus::Running {
            return Err(invalid_transition(
                "Only running jobs can be finalized",
                serde_json::json!({
                    "job_id": job_id.to_string(),
                    "current_status": current.as_str(),
                    "requested_status": target.as_str(),
                }),
            ));
        }

        // Workers report completion on their own clock; never record a
        // completion earlier than the job's admission.
        let completed_at = completed_at.fixed_offset().max(job.started_at);

        let mut active: ActiveModel = job.into();
        active.status = Set(target.as_str().to_string());
        active.completed_at = Set(Some(completed_at));
        active.updated_at = Set(Utc::now().fixed_offset());

        match outcome {
            JobOutcome::Success {
                duration_seconds,
                tables_processed,
                rows_imported,
                log_content,
            } => {
                active.duration_seconds = Set(duration_seconds);
                active.tables_processed = Set(tables_processed);
                active.rows_imported = Set(rows_imported);
                active.log_content = Set(log_content);
            }
            JobOutcome::Failure {
                error_message,
                log_content,
            } => {
                active.error_message = Set(Some(error_message));
                active.log_content = Set(log_content);
            }
        }

        let updated = active.update(&self.db).await?;

        tracing::info!(
            job_id = %job_id,
            status = %target,
            "Sync job finalized"
        );

        Ok(FinalizeResult::Finalized(updated))
    }

    /// Find a sync job by ID
    pub async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Model>, ApiError> {
        let job = Entity::find_by_id(job_id).one(&self.db).await.map_err(|e| {
            tracing::error!("Failed to find sync job: {}", e);
            ApiError::from(e)
        })?;

        Ok(job)
    }

    /// List jobs, newest first, with optional filters
    pub async fn list(&self, filter: ListJobsFilter) -> Result<Vec<Model>, ApiError> {
        let mut query = Entity::find().order_by_desc(Column::StartedAt);

        if let Some(app_id) = filter.app_id {
            query = query.filter(Column::AppId.eq(app_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }

        let results = query
            .offset(filter.offset.unwrap_or(0))
            .limit(filter.limit.unwrap_or(50))
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list sync jobs: {}", e);
                ApiError::from(e)
            })?;

        Ok(results)
    }

    /// Most recent job for an app, if any
    pub async fn latest_for_app(&self, app_id: Uuid) -> Result<Option<Model>, ApiError> {
        let job = Entity::find()
            .filter(Column::AppId.eq(app_id))
            .order_by_desc(Column::StartedAt)
            .limit(1)
            .one(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to load latest sync job: {}", e);
                ApiError::from(e)
            })?;

        Ok(job)
    }

    /// Fail all in-flight jobs that started before the cutoff.
    ///
    /// Pending jobs are included: a pending row whose trigger crashed
    /// between admit and dispatch would otherwise block the app forever.
    /// Returns the number of jobs swept.
    pub async fn sweep_stale(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64, ApiError> {
        let now = Utc::now().fixed_offset();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::ErrorMessage, Expr::value(error_message))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(
                Column::Status
                    .is_in([JobStatus::Pending.as_str(), JobStatus::Running.as_str()]),
            )
            .filter(Column::StartedAt.lt(cutoff.fixed_offset()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to sweep stale sync jobs: {}", e);
                ApiError::from(e)
            })?;

        if result.rows_affected > 0 {
            tracing::warn!(swept = result.rows_affected, "Swept stale in-flight jobs");
        }

        Ok(result.rows_affected)
    }

    async fn require(&self, job_id: Uuid) -> Result<Model, ApiError> {
        self.find_by_id(job_id)
            .await?
            .ok_or_else(|| not_found("Sync job not found"))
    }
}

fn parse_status(job: &Model) -> Result<JobStatus, ApiError> {
    JobStatus::parse(&job.status).ok_or_else(|| {
        tracing::error!(job_id = %job.id, status = %job.status, "Job row carries unknown status");
        ApiError::from(crate::error::ErrorType::InternalServerError)
    })
}
