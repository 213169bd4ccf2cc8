// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_intake::{
    config::Config, EncryptedLogProcessor, FsLogStore, IntakeMetrics, IntakeServer,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("API_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on log intake startup: {e}");
            process::exit(1);
        }
    };
    debug!("Loaded config: {config:?}");

    let store = match FsLogStore::new(&config.log_dir, config.rotation_policy()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Error preparing log directory: {e}");
            process::exit(1);
        }
    };

    let metrics = Arc::new(IntakeMetrics::new());
    let log_processor = Arc::new(EncryptedLogProcessor::new(store, metrics.clone()));
    let server = IntakeServer::new(config, log_processor, metrics);

    let cancel_token = CancellationToken::new();
    let server_token = cancel_token.clone();
    let mut server_handle = tokio::spawn(async move {
        server.start_intake_server(server_token).await
    });

    tokio::select! {
        res = &mut server_handle => {
            match res {
                Ok(Ok(())) => error!("Log intake stopped unexpectedly"),
                Ok(Err(e)) => error!("Error when running log intake: {e}"),
                Err(e) => error!("Log intake task failed: {e}"),
            }
            process::exit(1);
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Unable to listen for shutdown signal: {e}");
            }
            info!("Shutdown signal received, stopping log intake");
            cancel_token.cancel();
        }
    }

    match server_handle.await {
        Ok(Ok(())) => info!("Log intake stopped"),
        Ok(Err(e)) => error!("Error while stopping log intake: {e}"),
        Err(e) => error!("Log intake task failed: {e}"),
    }
}
