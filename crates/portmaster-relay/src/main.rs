// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// portmaster-relay <config.json> <file>
//
// Stages one file under a fresh session id and delivers it over the
// configured transport.  The delivery report is printed as JSON on success.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use portmaster_cache::TempDataManager;
use portmaster_core::error::Result;
use portmaster_relay::{DeliveryReport, Relay, RelayConfig, spawn_expiry_sweeper};
use portmaster_transport::TransportFactory;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [config_path, file_path] = args.as_slice() else {
        eprintln!("usage: portmaster-relay <config.json> <file>");
        return ExitCode::from(2);
    };

    match run(Path::new(config_path), Path::new(file_path)).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(error = %e, "could not render the delivery report"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "relay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path, file_path: &Path) -> Result<DeliveryReport> {
    let config = RelayConfig::load(config_path)?;
    let kind = config.kind()?;
    info!(transport = %kind, "PortMaster relay starting");

    let payload = tokio::fs::read(file_path).await?;
    let filename = file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_owned());

    let cache = Arc::new(TempDataManager::new(config.cache.clone()));
    let relay = Relay::new(Arc::clone(&cache));
    let (sweeper, stop) = spawn_expiry_sweeper(
        Arc::clone(&cache),
        Duration::from_millis(config.sweep_interval_ms),
        Duration::from_millis(config.max_age_ms),
    );

    let session_id = Uuid::new_v4().to_string();
    let metadata = relay.stage(&session_id, &payload, &filename)?;
    info!(%session_id, checksum = %metadata.checksum, size = metadata.size, "file staged");

    let mut transport = TransportFactory::create(kind);
    let result = relay
        .deliver_with_retry(&session_id, transport.as_mut(), &config.transport, &config.retry)
        .await;
    transport.close().await;

    stop.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "expiry sweeper ended abnormally");
    }
    result
}
