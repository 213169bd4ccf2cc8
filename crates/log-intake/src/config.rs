// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::envelope::EnvelopeMode;
use crate::rotation::RotationPolicy;

const DEFAULT_PORT: u16 = 80;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const DEFAULT_MAX_LOG_AGE_SECS: u64 = 7 * 24 * 60 * 60; // 7 days
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 1024 * 1024; // 1MB
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// The single username/password pair accepted by the intake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub credentials: Credentials,
    /// shared passphrase the per-message envelope keys are derived from
    pub passphrase: String,
    pub envelope_mode: EnvelopeMode,
    pub host: IpAddr,
    pub port: u16,
    /// root of the per-device log folders
    pub log_dir: PathBuf,
    /// size in bytes past which a log file is compressed
    pub max_log_size: u64,
    pub max_log_age: Duration,
    /// requests per minute per credential, 0 disables rate limiting
    pub rate_limit_per_minute: u32,
    pub max_request_content_length: usize,
    /// deadline for reading request headers and body
    pub request_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("credentials", &self.credentials)
            .field("passphrase", &"<redacted>")
            .field("envelope_mode", &self.envelope_mode)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_dir", &self.log_dir)
            .field("max_log_size", &self.max_log_size)
            .field("max_log_age", &self.max_log_age)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("max_request_content_length", &self.max_request_content_length)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let username = required_env("API_USERNAME")?;
        let password = required_env("API_PASSWORD")?;
        let passphrase = required_env("API_ENCRYPTION_KEY")?;

        let envelope_mode = match env::var("API_ENVELOPE_MODE") {
            Ok(mode) => mode
                .parse::<EnvelopeMode>()
                .map_err(|err| anyhow::anyhow!("Invalid API_ENVELOPE_MODE: {err}"))?,
            Err(_) => EnvelopeMode::default(),
        };

        let host = env::var("API_HOST")
            .ok()
            .and_then(|host| host.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = env::var("PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let log_dir = env::var("LOG_DIR")
            .ok()
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());

        Ok(Config {
            credentials: Credentials::new(username, password),
            passphrase,
            envelope_mode,
            host,
            port,
            log_dir: PathBuf::from(log_dir),
            max_log_size: parsed_env("API_MAX_LOG_SIZE").unwrap_or(DEFAULT_MAX_LOG_SIZE),
            max_log_age: Duration::from_secs(
                parsed_env("API_MAX_LOG_AGE_SECS").unwrap_or(DEFAULT_MAX_LOG_AGE_SECS),
            ),
            rate_limit_per_minute: parsed_env("API_RATE_LIMIT")
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
            max_request_content_length: parsed_env("API_MAX_REQUEST_BYTES")
                .unwrap_or(DEFAULT_MAX_REQUEST_CONTENT_LENGTH),
            request_timeout: Duration::from_secs(
                parsed_env("API_REQUEST_TIMEOUT_SECS").unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        })
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy::new(self.max_log_size, self.max_log_age)
    }
}

#[cfg(test)]
pub(crate) fn test_config(log_dir: impl Into<PathBuf>) -> Config {
    Config {
        credentials: Credentials::new("myuser", "mypassword"),
        passphrase: "your32bytekeyhere!".to_string(),
        envelope_mode: EnvelopeMode::Cfb,
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        log_dir: log_dir.into(),
        max_log_size: DEFAULT_MAX_LOG_SIZE,
        max_log_age: Duration::from_secs(DEFAULT_MAX_LOG_AGE_SECS),
        rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        max_request_content_length: DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
        request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
    }
}

fn required_env(key: &str) -> Result<String, anyhow::Error> {
    env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{key} environment variable is not set"))
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}
