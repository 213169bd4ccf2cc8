// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::IntakeError;

const MAX_DEVICE_ID_LEN: usize = 255;

/// One decrypted log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "imel")]
    pub device_id: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Client-reported event time. Older clients send it as `timestamp`.
    #[serde(default, alias = "timestamp", skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl LogRecord {
    pub fn new(device_id: impl Into<String>, error: impl Into<String>) -> Self {
        LogRecord {
            device_id: device_id.into(),
            error: error.into(),
            level: None,
            source: None,
            time: None,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    /// Parses a decrypted payload. `imel` and `error` are required, and the device id must be
    /// usable as a single directory name.
    pub fn parse(plaintext: &[u8]) -> Result<Self, IntakeError> {
        let record: LogRecord = serde_json::from_slice(plaintext)
            .map_err(|e| IntakeError::InvalidRecordFormat(e.to_string()))?;
        validate_device_id(&record.device_id)?;
        Ok(record)
    }

    /// Renders the on-disk text form of this record, stamped with the server-side `timestamp`.
    pub fn render(&self, timestamp: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "IMEL: {}", self.device_id);
        let _ = writeln!(out, "Time: {timestamp}");
        let _ = writeln!(out, "Error: {}", self.error);
        if let Some(level) = &self.level {
            let _ = writeln!(out, "Level: {level}");
        }
        if let Some(source) = &self.source {
            let _ = writeln!(out, "Source: {source}");
        }
        if let Some(time) = &self.time {
            let _ = writeln!(out, "Reported-Time: {time}");
        }
        out
    }
}

fn validate_device_id(device_id: &str) -> Result<(), IntakeError> {
    if device_id.is_empty() {
        return Err(IntakeError::InvalidRecordFormat(
            "device id is empty".to_string(),
        ));
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(IntakeError::InvalidRecordFormat(format!(
            "device id is longer than {MAX_DEVICE_ID_LEN} bytes"
        )));
    }
    if device_id == "." || device_id == ".." || device_id.contains(['/', '\\', '\0']) {
        return Err(IntakeError::InvalidRecordFormat(format!(
            "device id {device_id:?} is not a valid directory name"
        )));
    }
    Ok(())
}
