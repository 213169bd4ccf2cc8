// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::{header, Request, Response};
use hyper_util::rt::TokioIo;
use log_intake::config::{Config, Credentials};
use log_intake::envelope::EnvelopeMode;
use log_intake::http_utils::{empty, full};
use log_intake::{EncryptedLogProcessor, FsLogStore, IntakeMetrics, IntakeServer};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const USERNAME: &str = "myuser";
pub const PASSWORD: &str = "mypassword";
pub const PASSPHRASE: &str = "your32bytekeyhere!";

pub fn create_test_config(log_dir: &Path) -> Config {
    Config {
        credentials: Credentials::new(USERNAME, PASSWORD),
        passphrase: PASSPHRASE.to_string(),
        envelope_mode: EnvelopeMode::Cfb,
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        log_dir: log_dir.to_path_buf(),
        max_log_size: 10 * 1024 * 1024,
        max_log_age: Duration::from_secs(7 * 24 * 60 * 60),
        rate_limit_per_minute: 100,
        max_request_content_length: 1024 * 1024,
        request_timeout: Duration::from_secs(2),
    }
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub store: Arc<FsLogStore>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl RunningServer {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Starts an intake on an ephemeral localhost port.
pub async fn start_server(config: Config) -> RunningServer {
    let config = Arc::new(config);
    let store = Arc::new(
        FsLogStore::new(&config.log_dir, config.rotation_policy()).expect("log dir should be creatable"),
    );
    let metrics = Arc::new(IntakeMetrics::new());
    let processor = Arc::new(EncryptedLogProcessor::new(store.clone(), metrics.clone()));
    let server = IntakeServer::new(config, processor, metrics);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move {
        server.serve(listener, token).await.expect("server failed");
    });

    RunningServer {
        addr,
        store,
        shutdown,
        handle,
    }
}

/// Send an HTTP request over TCP and return the response
pub async fn send_tcp_request(
    addr: SocketAddr,
    uri: &str,
    method: &str,
    auth: Option<(&str, &str)>,
    body: Option<Vec<u8>>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(Duration::from_secs(2), tokio::net::TcpStream::connect(addr)).await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header(header::HOST, addr.to_string())
        .header(header::CONTENT_TYPE, "application/json");
    if let Some((user, pass)) = auth {
        request_builder = request_builder.header(
            header::AUTHORIZATION,
            log_intake::auth::basic_auth_header(user, pass),
        );
    }

    let response = if let Some(body_data) = body {
        let body_len = body_data.len();
        request_builder = request_builder.header(header::CONTENT_LENGTH, body_len.to_string());
        let request = request_builder.body(full(body_data))?;
        timeout(Duration::from_secs(5), sender.send_request(request)).await??
    } else {
        let request = request_builder.body(empty())?;
        timeout(Duration::from_secs(5), sender.send_request(request)).await??
    };

    Ok(response)
}

pub async fn response_json(response: Response<hyper::body::Incoming>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("readable body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Body of an intake request carrying `plaintext` sealed with `mode`.
pub fn encrypted_entry(plaintext: &str, mode: EnvelopeMode) -> Vec<u8> {
    let envelope = mode
        .seal(plaintext.as_bytes(), PASSPHRASE)
        .expect("sealing should succeed");
    serde_json::json!({ "encrypted_data": envelope })
        .to_string()
        .into_bytes()
}

/// Sorted paths of the files in a folder, empty if it does not exist.
pub fn files_in(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(folder) {
        Ok(entries) => entries.map(|entry| entry.expect("dir entry").path()).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}
