// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{http, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::IntakeError;
use crate::http_utils::{
    create_error_response, log_and_create_http_response, verify_request_content_length, Body,
    HttpRequest, HttpResponse,
};
use crate::log_store::LogStore;
use crate::metrics::IntakeMetrics;
use crate::record::LogRecord;

#[async_trait]
pub trait LogProcessor {
    /// Turns one authenticated intake request into a stored log record and answers the caller.
    async fn process_log(
        &self,
        config: Arc<Config>,
        req: HttpRequest,
    ) -> http::Result<HttpResponse>;
}

/// Request body sent by clients.
#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(default)]
    encrypted_data: Option<String>,
}

pub struct EncryptedLogProcessor {
    store: Arc<dyn LogStore + Send + Sync>,
    metrics: Arc<IntakeMetrics>,
}

impl EncryptedLogProcessor {
    pub fn new(store: Arc<dyn LogStore + Send + Sync>, metrics: Arc<IntakeMetrics>) -> Self {
        EncryptedLogProcessor { store, metrics }
    }

    async fn ingest(&self, config: &Config, body: Body) -> Result<PathBuf, IntakeError> {
        let bytes = read_body(
            body,
            config.max_request_content_length,
            config.request_timeout,
        )
        .await?;

        let entry: LogEntry =
            serde_json::from_slice(&bytes).map_err(|e| IntakeError::InvalidJson(e.to_string()))?;
        let encrypted_data = entry
            .encrypted_data
            .filter(|data| !data.is_empty())
            .ok_or(IntakeError::MissingEncryptedData)?;

        let plaintext = config
            .envelope_mode
            .open(&encrypted_data, &config.passphrase)?;
        let record = LogRecord::parse(&plaintext)?;
        debug!("Decrypted log record for device {}", record.device_id);

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save(&record))
            .await
            .map_err(|e| IntakeError::StorageUnavailable(format!("save task failed: {e}")))?
    }
}

#[async_trait]
impl LogProcessor for EncryptedLogProcessor {
    async fn process_log(
        &self,
        config: Arc<Config>,
        req: HttpRequest,
    ) -> http::Result<HttpResponse> {
        debug!("Received log entry to process");
        let (parts, body) = req.into_parts();

        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing log entry",
        ) {
            self.metrics.record_failed_request();
            return response;
        }

        match self.ingest(&config, body).await {
            Ok(path) => {
                self.metrics.record_successful_log();
                debug!("Log entry written to {}", path.display());
                log_and_create_http_response("Log entry saved successfully", StatusCode::OK)
            }
            Err(err) => {
                if err.is_storage_failure() {
                    self.metrics.record_failed_log();
                } else {
                    self.metrics.record_failed_request();
                }
                create_error_response(&err)
            }
        }
    }
}

/// Collects the body, failing once it exceeds `limit` bytes or takes longer than `deadline`.
async fn read_body(body: Body, limit: usize, deadline: Duration) -> Result<Bytes, IntakeError> {
    match tokio::time::timeout(deadline, Limited::new(body, limit).collect()).await {
        Err(_) => Err(IntakeError::BodyRead(format!(
            "timed out after {}ms",
            deadline.as_millis()
        ))),
        Ok(Err(e)) if e.is::<LengthLimitError>() => Err(IntakeError::PayloadTooLarge(limit)),
        Ok(Err(e)) => Err(IntakeError::BodyRead(e.to_string())),
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
    }
}
