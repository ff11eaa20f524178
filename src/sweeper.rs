//! # Stuck-Job Sweeper
//!
//! Background task that fails in-flight jobs older than the configured
//! maximum run time. A stuck running or pending job would otherwise block
//! admission for its app forever if the worker died without reporting back
//! or the trigger crashed before dispatch.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::repositories::SyncJobRepository;

/// Result of one sweep pass.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SweepReport {
    pub swept: u64,
    pub cutoff: DateTime<Utc>,
}

/// Background sweeper service.
pub struct StuckJobSweeper {
    config: Arc<AppConfig>,
    jobs: SyncJobRepository,
}

impl StuckJobSweeper {
    /// Create a new sweeper instance.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        Self {
            config,
            jobs: SyncJobRepository::new(db),
        }
    }

    /// Run the sweeper loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), ApiError> {
        info!(
            max_run_seconds = self.config.sweeper.max_run_seconds,
            "Starting stuck-job sweeper"
        );
        let tick_interval = TokioDuration::from_secs(self.config.sweeper.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stuck-job sweeper shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    match self.sweep().await {
                        Ok(report) => {
                            if report.swept > 0 {
                                info!(swept = report.swept, "Sweeper failed stuck jobs");
                            } else {
                                debug!("Sweeper found no stuck jobs");
                            }
                        }
                        Err(err) => {
                            error!(error = ?err, "Sweeper pass failed");
                        }
                    }
                }
            }
        }

        info!("Stuck-job sweeper stopped");
        Ok(())
    }

    /// Fail all in-flight jobs older than the configured maximum run time.
    pub async fn sweep(&self) -> Result<SweepReport, ApiError> {
        self.sweep_at(Utc::now()).await
    }

    /// Fail all in-flight jobs older than the maximum, as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, ApiError> {
        let max_run = Duration::seconds(self.config.sweeper.max_run_seconds as i64);
        let cutoff = now - max_run;

        let message = format!(
            "Sync timed out after running longer than {} seconds",
            self.config.sweeper.max_run_seconds
        );
        let swept = self.jobs.sweep_stale(cutoff, &message).await?;

        counter!("syncboard_jobs_swept_total").increment(swept);

        Ok(SweepReport { swept, cutoff })
    }
}
