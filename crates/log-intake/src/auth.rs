// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hyper::{header, HeaderMap};
use subtle::ConstantTimeEq;

use crate::config::Credentials;
use crate::error::IntakeError;

pub const BASIC_REALM: &str = r#"Basic realm="Restricted""#;

/// Checks an `Authorization: Basic ...` header against the configured credentials and returns the
/// authenticated username.
pub fn verify_basic_auth(headers: &HeaderMap, credentials: &Credentials) -> Result<String, IntakeError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| IntakeError::AuthFailure("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| IntakeError::AuthFailure("Authorization header is not ASCII".to_string()))?;

    let encoded = value
        .strip_prefix("Basic ")
        .ok_or_else(|| IntakeError::AuthFailure("unsupported authorization scheme".to_string()))?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| IntakeError::AuthFailure("invalid base64 credentials".to_string()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| IntakeError::AuthFailure("credentials are not UTF-8".to_string()))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| IntakeError::AuthFailure("credentials lack a ':' separator".to_string()))?;

    let username_ok = username.as_bytes().ct_eq(credentials.username.as_bytes());
    let password_ok = password.as_bytes().ct_eq(credentials.password.as_bytes());
    if (username_ok & password_ok).unwrap_u8() == 0 {
        return Err(IntakeError::AuthFailure(format!(
            "wrong credentials for user {username:?}"
        )));
    }

    Ok(username.to_string())
}

/// Builds the header value a client sends for `username:password`.
pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
