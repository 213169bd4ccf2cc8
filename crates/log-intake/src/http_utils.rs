// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::{
    header,
    http::{self, HeaderMap},
    Request, Response, StatusCode,
};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::auth::BASIC_REALM;
use crate::error::IntakeError;

pub type Body = BoxBody<Bytes, hyper::Error>;
pub type HttpRequest = Request<Body>;
pub type HttpResponse = Response<Body>;

pub fn full<T: Into<Bytes>>(chunk: T) -> Body {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to be
///    written, a client error (400-499) a warning, anything else an error.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "success": bool,
///     "message": message
/// }
pub fn log_and_create_http_response(message: &str, status: StatusCode) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else if status.is_client_error() {
        warn!("{message}");
    } else {
        error!("{message}");
    }
    json_response(
        status,
        json!({ "success": status.is_success(), "message": message }),
    )
}

/// Logs the detailed error and answers with its fixed client message, so internal detail such as
/// paths or cipher errors never reaches the caller.
pub fn create_error_response(err: &IntakeError) -> http::Result<HttpResponse> {
    let status = err.status_code();
    if status.is_server_error() {
        error!("{err}");
    } else {
        warn!("{err}");
    }
    if let IntakeError::AuthFailure(_) = err {
        return unauthorized_response();
    }
    json_response(
        status,
        json!({ "success": false, "message": err.client_message() }),
    )
}

/// Response body format:
/// {
///     "success": bool,
///     "message": message,
///     "data": data
/// }
pub fn create_data_response(
    status: StatusCode,
    message: &str,
    data: serde_json::Value,
) -> http::Result<HttpResponse> {
    json_response(
        status,
        json!({ "success": status.is_success(), "message": message, "data": data }),
    )
}

pub fn unauthorized_response() -> http::Result<HttpResponse> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::WWW_AUTHENTICATE, BASIC_REALM)
        .body(full(
            json!({ "success": false, "message": "Unauthorized" }).to_string(),
        ))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> http::Result<HttpResponse> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full(body.to_string()))
}

/// Takes a request's header map, and verifies that a "content-length" header, when present, is
/// valid and not above the given max_content_length. Requests without one (chunked or empty
/// bodies) pass through; the body reader enforces the limit for those.
///
/// Will return None if no issues are found. Otherwise logs a warning (with the given prefix) and
/// returns and HTTP Response with the appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let content_length_header = match header_map.get(header::CONTENT_LENGTH) {
        Some(res) => res,
        None => {
            match header_map.get(header::TRANSFER_ENCODING) {
                Some(transfer_encoding_header) => debug!(
                    "Transfer-Encoding header is present: {:?}",
                    transfer_encoding_header
                ),
                None => debug!("No Content-Length or Transfer-Encoding header present"),
            }
            return None;
        }
    };
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(res) => res,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}
