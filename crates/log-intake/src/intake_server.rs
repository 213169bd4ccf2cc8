// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http_body_util::BodyExt;
use hyper::header::{HeaderValue, RETRY_AFTER};
use hyper::service::service_fn;
use hyper::{http, Method, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::verify_basic_auth;
use crate::config::Config;
use crate::error::IntakeError;
use crate::http_utils::{
    create_data_response, create_error_response, log_and_create_http_response, HttpRequest,
    HttpResponse,
};
use crate::log_processor::LogProcessor;
use crate::metrics::IntakeMetrics;
use crate::rate_limiter::RateLimiter;

const LOG_ENDPOINT_PATH: &str = "/";
const HEALTH_ENDPOINT_PATH: &str = "/health";
const METRICS_ENDPOINT_PATH: &str = "/metrics";

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone)]
pub struct IntakeServer {
    pub config: Arc<Config>,
    pub log_processor: Arc<dyn LogProcessor + Send + Sync>,
    pub metrics: Arc<IntakeMetrics>,
    pub rate_limiter: Arc<RateLimiter>,
    started_at: Instant,
}

impl IntakeServer {
    pub fn new(
        config: Arc<Config>,
        log_processor: Arc<dyn LogProcessor + Send + Sync>,
        metrics: Arc<IntakeMetrics>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        IntakeServer {
            config,
            log_processor,
            metrics,
            rate_limiter,
            started_at: Instant::now(),
        }
    }

    /// Binds `host:port` from the config and serves until `shutdown` is cancelled.
    pub async fn start_intake_server(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            "Log intake started: listening on {} (envelope mode {})",
            listener.local_addr()?,
            self.config.envelope_mode
        );
        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already bound listener until `shutdown` is cancelled.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let server = Arc::new(self.clone());
        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
            // called for each http request
            let server = Arc::clone(&server);
            async move { server.endpoint_handler(req.map(|body| body.boxed())).await }
        });

        let mut builder = hyper::server::conn::http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.request_timeout);
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                () = shutdown.cancelled() => break,
            };
            let conn = TokioIo::new(conn);
            let builder = builder.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = builder.serve_connection(conn, service).await {
                    debug!("Connection error: {e}");
                }
            });
        }

        info!("Log intake shutting down, draining {} connection(s)", joinset.len());
        let drained = tokio::time::timeout(self.config.request_timeout, async {
            while joinset.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} connection(s) still open at shutdown", joinset.len());
            joinset.shutdown().await;
        }
        Ok(())
    }

    async fn endpoint_handler(&self, req: HttpRequest) -> http::Result<HttpResponse> {
        if req.uri().path() == HEALTH_ENDPOINT_PATH {
            return self.health_handler();
        }

        let started = Instant::now();
        self.metrics.record_request();
        let response = self.authenticated_handler(req).await;
        self.metrics.record_response_time(started.elapsed());
        response
    }

    async fn authenticated_handler(&self, req: HttpRequest) -> http::Result<HttpResponse> {
        let username = match verify_basic_auth(req.headers(), &self.config.credentials) {
            Ok(username) => username,
            Err(err) => {
                self.metrics.record_rejected_request();
                return create_error_response(&err);
            }
        };

        match (req.method(), req.uri().path()) {
            (&Method::POST, LOG_ENDPOINT_PATH) => self.log_handler(&username, req).await,
            (&Method::GET, METRICS_ENDPOINT_PATH) => create_data_response(
                StatusCode::OK,
                "Metrics retrieved",
                json!(self.metrics.snapshot()),
            ),
            (_, LOG_ENDPOINT_PATH | METRICS_ENDPOINT_PATH) => {
                log_and_create_http_response("Method not allowed", StatusCode::METHOD_NOT_ALLOWED)
            }
            _ => log_and_create_http_response("Not found", StatusCode::NOT_FOUND),
        }
    }

    async fn log_handler(&self, username: &str, req: HttpRequest) -> http::Result<HttpResponse> {
        if !self.rate_limiter.check(username) {
            self.metrics.record_rejected_request();
            let mut response = create_error_response(&IntakeError::RateLimited(username.to_string()))?;
            if let Some(retry_after) = self.rate_limiter.retry_after(username) {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
            }
            return Ok(response);
        }

        match self
            .log_processor
            .process_log(Arc::clone(&self.config), req)
            .await
        {
            Ok(res) => Ok(res),
            Err(err) => log_and_create_http_response(
                &format!("Error processing log entry: {err}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    fn health_handler(&self) -> http::Result<HttpResponse> {
        create_data_response(
            StatusCode::OK,
            "Service is healthy",
            json!({
                "status": "healthy",
                "time": chrono::Local::now().to_rfc3339(),
                "uptime_secs": self.started_at.elapsed().as_secs(),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        )
    }
}
