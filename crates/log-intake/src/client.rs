// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sender side of the intake: encrypts a [`LogRecord`] and posts it with Basic auth.

use core::time::Duration;

use serde_json::json;
use tracing::{debug, error, warn};

use crate::envelope::EnvelopeMode;
use crate::error::IntakeError;
use crate::record::LogRecord;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(reqwest::Error),

    #[error("Failed to serialize log record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to encrypt log record: {0}")]
    Encryption(#[from] IntakeError),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Intake rejected the log with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Clone)]
pub struct ClientConfig {
    /// full intake URL, e.g. `https://logs.example.com/`
    pub url: String,
    pub username: String,
    pub password: String,
    pub passphrase: String,
    pub envelope_mode: EnvelopeMode,
    /// total attempts for network failures, at least 1
    pub max_retries: u32,
    pub retry_backoff_base: Duration,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        ClientConfig {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            passphrase: passphrase.into(),
            envelope_mode: EnvelopeMode::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("envelope_mode", &self.envelope_mode)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_base", &self.retry_backoff_base)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub struct LogClient {
    config: ClientConfig,
    client: reqwest::Client,
}

impl LogClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(LogClient { config, client })
    }

    /// Encrypts and sends one record, returning the server's message on success.
    ///
    /// Network failures are retried with exponential backoff. A response with a non-success status
    /// is returned as [`ClientError::Rejected`] without retrying.
    pub async fn send_log(&self, record: &LogRecord) -> Result<String, ClientError> {
        let plaintext = serde_json::to_vec(record)?;
        let envelope = self
            .config
            .envelope_mode
            .seal(&plaintext, &self.config.passphrase)?;
        let body = json!({ "encrypted_data": envelope });

        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&self.config.url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .json(&body)
                .send()
                .await;

            match response {
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await?;
                    if status.is_success() {
                        debug!("Log for device {} accepted", record.device_id);
                        return Ok(response_message(&text));
                    }
                    error!("Log intake rejected request with status {status}: {text}");
                    return Err(ClientError::Rejected {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                Err(e) => {
                    warn!("Network error (attempt {attempts}): {e}");
                    if attempts >= max_attempts {
                        error!("Failed to send log after {attempts} attempts: {e}");
                        return Err(e.into());
                    }
                }
            }
            // Exponential backoff
            let backoff = self.config.retry_backoff_base * 2_u32.pow(attempts - 1);
            tokio::time::sleep(backoff).await;
        }
    }
}

fn response_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
