// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::StatusCode;

/// Errors that can occur while ingesting a log entry.
///
/// The `Display` output carries internal detail and is only meant for our own logs. Clients
/// receive [`IntakeError::client_message`], which never echoes that detail.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Missing or invalid credentials: {0}")]
    AuthFailure(String),

    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Invalid request JSON: {0}")]
    InvalidJson(String),

    #[error("Request is missing encrypted data")]
    MissingEncryptedData,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Failed to initialize cipher: {0}")]
    CipherInitError(String),

    #[error("Envelope failed authentication")]
    DecryptionFailed,

    #[error("Invalid log record: {0}")]
    InvalidRecordFormat(String),

    #[error("Log storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Failed to compress {path}: {reason}")]
    CompressionFailure { path: String, reason: String },
}

impl IntakeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IntakeError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            IntakeError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            IntakeError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            IntakeError::BodyRead(_)
            | IntakeError::InvalidJson(_)
            | IntakeError::MissingEncryptedData
            | IntakeError::InvalidRecordFormat(_) => StatusCode::BAD_REQUEST,
            IntakeError::MalformedEnvelope(_)
            | IntakeError::CipherInitError(_)
            | IntakeError::DecryptionFailed
            | IntakeError::StorageUnavailable(_)
            | IntakeError::CompressionFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fixed message returned to the caller.
    pub fn client_message(&self) -> &'static str {
        match self {
            IntakeError::AuthFailure(_) => "Unauthorized",
            IntakeError::RateLimited(_) => "Rate limit exceeded",
            IntakeError::PayloadTooLarge(_) => "Payload too large",
            IntakeError::BodyRead(_) => "Failed to read request body",
            IntakeError::InvalidJson(_) => "Invalid JSON format",
            IntakeError::MissingEncryptedData => "Missing encrypted data",
            IntakeError::MalformedEnvelope(_)
            | IntakeError::CipherInitError(_)
            | IntakeError::DecryptionFailed => "Decryption failed",
            IntakeError::InvalidRecordFormat(_) => "Invalid log data format",
            IntakeError::StorageUnavailable(_) => "Failed to save log",
            IntakeError::CompressionFailure { .. } => "Failed to compress log",
        }
    }

    /// True for failures that happened while persisting an otherwise valid record.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, IntakeError::StorageUnavailable(_))
    }
}
