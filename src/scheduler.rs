//! # Cron Scheduler
//!
//! Background task that evaluates cron-enabled apps and triggers syncs that
//! are due. Each app is evaluated independently: a bad descriptor or a
//! trigger failure for one app never stops the others, and every tick
//! produces a summary of what happened per app.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{AppConfig, POLICY_DEBOUNCE};
use crate::error::ApiError;
use crate::invoker::SyncInvoker;
use crate::models::sync_app;
use crate::models::sync_job::TriggeredBy;
use crate::repositories::{SyncAppRepository, SyncJobRepository};
use crate::schedule::{CronSchedule, due_debounce, due_wall_clock};

/// Outcome of one app during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TickStatus {
    Triggered,
    Skipped,
    Error,
}

/// Why an app was skipped during a tick.
pub const REASON_ALREADY_RUNNING: &str = "already_running";
pub const REASON_INVALID_SCHEDULE: &str = "invalid_schedule";
pub const REASON_NOT_DUE: &str = "not_due";

/// Per-app result within a tick summary.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AppTickResult {
    pub app_name: String,
    pub status: TickStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Summary of one evaluation pass over all cron-enabled apps.
///
/// The summary itself always reports success; individual app failures are
/// carried in `results`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TickSummary {
    pub success: bool,
    pub checked_at: DateTime<Utc>,
    pub apps_checked: usize,
    pub triggered: usize,
    pub results: Vec<AppTickResult>,
}

/// Background cron evaluation service.
pub struct CronScheduler {
    config: Arc<AppConfig>,
    apps: SyncAppRepository,
    jobs: SyncJobRepository,
    invoker: Arc<SyncInvoker>,
}

impl CronScheduler {
    /// Create a new scheduler instance.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection, invoker: Arc<SyncInvoker>) -> Self {
        Self {
            config,
            apps: SyncAppRepository::new(db.clone()),
            jobs: SyncJobRepository::new(db),
            invoker,
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), ApiError> {
        info!(
            policy = %self.config.scheduler.policy,
            timezone = %self.config.scheduler.timezone,
            "Starting cron scheduler"
        );
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Cron scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    match self.tick().await {
                        Ok(summary) => {
                            debug!(
                                apps_checked = summary.apps_checked,
                                triggered = summary.triggered,
                                "Scheduler tick completed"
                            );
                        }
                        Err(err) => {
                            error!(error = ?err, "Scheduler tick failed");
                        }
                    }
                    let elapsed = tick_started.elapsed();
                    histogram!("syncboard_scheduler_tick_duration_ms")
                        .record(elapsed.as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Cron scheduler stopped");
        Ok(())
    }

    /// Evaluate all cron-enabled apps at the current instant.
    pub async fn tick(&self) -> Result<TickSummary, ApiError> {
        self.tick_at(Utc::now()).await
    }

    /// Evaluate all cron-enabled apps as of `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, ApiError> {
        let apps = self.apps.list_cron_enabled().await?;
        let mut results = Vec::with_capacity(apps.len());
        let mut triggered = 0;

        for app in &apps {
            let result = self.evaluate_app(app, now).await;
            if result.status == TickStatus::Triggered {
                triggered += 1;
            }
            results.push(result);
        }

        gauge!("syncboard_scheduler_apps_gauge").set(apps.len() as f64);
        counter!("syncboard_scheduler_triggered_total").increment(triggered as u64);

        Ok(TickSummary {
            success: true,
            checked_at: now,
            apps_checked: apps.len(),
            triggered,
            results,
        })
    }

    async fn evaluate_app(&self, app: &sync_app::Model, now: DateTime<Utc>) -> AppTickResult {
        let schedule = match app.cron_schedule.as_deref().map(CronSchedule::parse) {
            Some(Ok(schedule)) => schedule,
            Some(Err(err)) => {
                debug!(app_name = %app.name, "Skipping app with invalid descriptor: {}", err);
                return skipped(app, REASON_INVALID_SCHEDULE, Some(err.to_string()));
            }
            None => {
                return skipped(
                    app,
                    REASON_INVALID_SCHEDULE,
                    Some("cron is enabled but no schedule is set".to_string()),
                );
            }
        };

        let last_started = match self.jobs.latest_for_app(app.id).await {
            Ok(job) => job,
            Err(err) => {
                error!(app_name = %app.name, "Failed to load last job: {}", err.message);
                return errored(app, err.message.to_string());
            }
        };

        if let Some(last) = &last_started {
            if crate::models::sync_job::JobStatus::parse(&last.status)
                .is_some_and(|s| s.is_in_flight())
            {
                return skipped(app, REASON_ALREADY_RUNNING, None);
            }
        }

        let last_started_utc = last_started.map(|job| job.started_at.with_timezone(&Utc));
        if !self.is_due(&schedule, now, last_started_utc.as_ref()) {
            return skipped(app, REASON_NOT_DUE, None);
        }

        match self.invoker.trigger(app, TriggeredBy::Cron).await {
            Ok(job) => {
                info!(app_name = %app.name, job_id = %job.id, "Cron trigger fired");
                AppTickResult {
                    app_name: app.name.clone(),
                    status: TickStatus::Triggered,
                    job_id: Some(job.id),
                    reason: None,
                    message: None,
                }
            }
            // A manual trigger can slip in between the in-flight check and
            // admission; report that as a skip, not an error.
            Err(err) if err.code.as_ref() == "CONFLICT" => {
                skipped(app, REASON_ALREADY_RUNNING, None)
            }
            Err(err) => {
                error!(app_name = %app.name, "Cron trigger failed: {}", err.message);
                errored(app, err.message.to_string())
            }
        }
    }

    fn is_due(
        &self,
        schedule: &CronSchedule,
        now: DateTime<Utc>,
        last_started: Option<&DateTime<Utc>>,
    ) -> bool {
        let scheduler = &self.config.scheduler;

        if scheduler.policy == POLICY_DEBOUNCE {
            return due_debounce(&now, last_started, scheduler.debounce_seconds)
                && schedule
                    .last_fire_within(&now.with_timezone(&scheduler.tz()), scheduler.tolerance_minutes)
                    .is_some();
        }

        // Descriptors are evaluated in the configured timezone.
        let tz = scheduler.tz();
        let local_now = now.with_timezone(&tz);
        let local_last = last_started.map(|t| t.with_timezone(&tz));
        due_wall_clock(
            schedule,
            &local_now,
            local_last.as_ref(),
            scheduler.tolerance_minutes,
        )
    }
}

fn skipped(app: &sync_app::Model, reason: &'static str, message: Option<String>) -> AppTickResult {
    AppTickResult {
        app_name: app.name.clone(),
        status: TickStatus::Skipped,
        job_id: None,
        reason: Some(reason),
        message,
    }
}

fn errored(app: &sync_app::Model, message: String) -> AppTickResult {
    AppTickResult {
        app_name: app.name.clone(),
        status: TickStatus::Error,
        job_id: None,
        reason: None,
        message: Some(message),
    }
}
