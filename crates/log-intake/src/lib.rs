// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encrypted log intake.
//!
//! Devices post AES-encrypted log records over HTTP Basic auth. The server decrypts each record,
//! writes it to a per-device folder and compresses old or oversized files as new ones arrive.

pub mod auth;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http_utils;
pub mod intake_server;
pub mod log_processor;
pub mod log_store;
pub mod metrics;
pub mod rate_limiter;
pub mod record;
pub mod rotation;

pub use client::{ClientConfig, ClientError, LogClient};
pub use config::{Config, Credentials};
pub use envelope::EnvelopeMode;
pub use error::IntakeError;
pub use intake_server::IntakeServer;
pub use log_processor::{EncryptedLogProcessor, LogProcessor};
pub use log_store::{FsLogStore, LogStore};
pub use metrics::{IntakeMetrics, MetricsSnapshot};
pub use record::LogRecord;
pub use rotation::{RotationPolicy, RotationSummary};
