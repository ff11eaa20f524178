//! # Worker Client
//!
//! HTTP client for dispatching sync work to the external worker service.
//! A dispatch is fire-and-acknowledge: the worker accepts the job and later
//! reports the outcome through the completion callback.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::models::{sync_app, sync_job};

/// Errors surfaced while dispatching to the worker service.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker base URL is invalid: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("Failed to reach worker service: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Worker rejected dispatch with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Payload sent to the worker when a job starts.
#[derive(Debug, Serialize)]
pub struct DispatchRequest {
    pub job_id: Uuid,
    pub app_name: String,
    pub deploy_key: String,
    pub tables: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_mapping: Option<JsonValue>,
}

/// Client for the worker service's sync endpoint
#[derive(Debug)]
pub struct WorkerClient {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl WorkerClient {
    /// Create a new worker client from configuration
    pub fn new(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.dispatch_timeout_seconds))
            .build()?;
        let mut base_url = Url::parse(&config.base_url)?;
        // Url::join treats a path without a trailing slash as a file and
        // would drop any prefix the operator configured.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    /// Dispatch a sync job to the worker.
    ///
    /// Any non-2xx response or transport failure is an error; the caller is
    /// responsible for failing the job when dispatch does not succeed.
    pub async fn dispatch(
        &self,
        app: &sync_app::Model,
        job: &sync_job::Model,
    ) -> Result<(), WorkerError> {
        let endpoint = self
            .base_url
            .join(&format!("api/sync/{}", app.name))
            .map_err(WorkerError::InvalidBaseUrl)?;

        let payload = DispatchRequest {
            job_id: job.id,
            app_name: app.name.clone(),
            deploy_key: app.deploy_key.clone(),
            tables: app.tables.clone(),
            table_mapping: app.table_mapping.clone(),
        };

        let mut request = self.client.post(endpoint.clone()).json(&payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!(
                job_id = %job.id,
                app_name = %app.name,
                target = %redacted_target(&endpoint),
                "Worker dispatch failed: {}",
                e
            );
            WorkerError::Transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            // The snippet ends up in the job's error_message; keep it short.
            if body.len() > 200 {
                let mut cut = 200;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            error!(
                job_id = %job.id,
                app_name = %app.name,
                status = status.as_u16(),
                "Worker rejected dispatch"
            );
            return Err(WorkerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            job_id = %job.id,
            app_name = %app.name,
            target = %redacted_target(&endpoint),
            "Sync job dispatched to worker"
        );

        Ok(())
    }
}

fn redacted_target(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    format!("{}://{}", url.scheme(), host)
}
