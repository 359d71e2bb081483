// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Staging dispatcher: payloads are cached under a session id, checked
// against their stored CRC-32 and written out through a transport.  A
// session is only cleared once every byte has been accepted by the medium.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use portmaster_cache::{TempDataManager, verify_checksum_hex};
use portmaster_core::config::TransportConfig;
use portmaster_core::error::{PortmasterError, Result, TransportError};
use portmaster_core::types::FileMetadata;
use portmaster_transport::Transport;

use crate::retry::{RetryConfig, RetryDecision, should_retry};

/// Outcome of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub session_id: String,
    pub filename: String,
    /// CRC-32 the payload was verified against.
    pub checksum: String,
    pub bytes_written: u64,
    /// Transport writes needed, more than one when the medium accepted
    /// partial writes.
    pub writes: u32,
    /// Delivery attempts, including the successful one.
    pub attempts: u32,
    pub port_name: String,
    pub delivered_at: DateTime<Utc>,
}

/// Moves staged payloads from the cache onto transports.
#[derive(Debug, Clone)]
pub struct Relay {
    cache: Arc<TempDataManager>,
}

impl Relay {
    pub fn new(cache: Arc<TempDataManager>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<TempDataManager> {
        &self.cache
    }

    /// Cache `payload` under `session_id` and return the stored metadata,
    /// checksum included.
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub fn stage(&self, session_id: &str, payload: &[u8], filename: &str) -> Result<FileMetadata> {
        if session_id.is_empty() {
            return Err(PortmasterError::Parameter("session id is empty".into()));
        }
        let metadata = FileMetadata::new(filename, payload.len() as u64);
        self.cache.cache_received_data(session_id, payload, metadata)?;
        self.cache.cached_metadata(session_id).ok_or_else(|| {
            PortmasterError::State(format!("session {session_id} vanished while staging"))
        })
    }

    /// Write the payload staged under `session_id` to `transport`.
    ///
    /// The transport must already be open.  On success the session is
    /// removed from the cache; on any failure it stays cached.
    #[instrument(skip(self, transport), fields(kind = %transport.kind()))]
    pub async fn deliver(
        &self,
        session_id: &str,
        transport: &mut dyn Transport,
    ) -> Result<DeliveryReport> {
        let entry = self.cache.get_cached_data(session_id).ok_or_else(|| {
            PortmasterError::State(format!("no readable payload staged for session {session_id}"))
        })?;
        let metadata = entry.metadata();
        verify_checksum_hex(entry.data(), &metadata.checksum).inspect_err(|e| {
            error!(error = %e, "staged payload failed verification");
        })?;

        if !transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }

        let data = entry.data();
        let mut written = 0usize;
        let mut writes = 0u32;
        while written < data.len() {
            let accepted = transport.write(&data[written..]).await?;
            if accepted == 0 {
                return Err(TransportError::IoFailure("medium accepted no bytes".into()).into());
            }
            written += accepted;
            writes += 1;
            debug!(written, total = data.len(), "payload progress");
        }

        let report = DeliveryReport {
            session_id: session_id.to_owned(),
            filename: metadata.filename.clone(),
            checksum: metadata.checksum.clone(),
            bytes_written: written as u64,
            writes,
            attempts: 1,
            port_name: transport.port_name(),
            delivered_at: Utc::now(),
        };
        self.cache.clear_cache(session_id);
        info!(
            bytes = report.bytes_written,
            writes,
            port = %report.port_name,
            "payload delivered"
        );
        Ok(report)
    }

    /// [`deliver`](Self::deliver) with reopen and backoff.
    ///
    /// Before every attempt a transport that is not open is (re)opened with
    /// `config`.  A retried attempt starts again from the first byte.
    pub async fn deliver_with_retry(
        &self,
        session_id: &str,
        transport: &mut dyn Transport,
        config: &TransportConfig,
        retry: &RetryConfig,
    ) -> Result<DeliveryReport> {
        let mut attempt = 0u32;
        loop {
            let err = match self.attempt(session_id, transport, config).await {
                Ok(mut report) => {
                    report.attempts = attempt + 1;
                    return Ok(report);
                }
                Err(err) => err,
            };

            match should_retry(&err, attempt, retry) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp(class) => {
                    error!(session_id, ?class, error = %err, "delivery abandoned");
                    return Err(err);
                }
                RetryDecision::Exhausted => {
                    error!(session_id, attempts = attempt + 1, error = %err, "delivery failed");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(
        &self,
        session_id: &str,
        transport: &mut dyn Transport,
        config: &TransportConfig,
    ) -> Result<DeliveryReport> {
        if !transport.is_open() {
            transport.open(config).await?;
        }
        self.deliver(session_id, transport).await
    }
}

/// Periodically drop cache entries older than `max_age`.
///
/// Cancel the returned token to stop the task; the handle resolves once it
/// has exited.
pub fn spawn_expiry_sweeper(
    cache: Arc<TempDataManager>,
    interval: Duration,
    max_age: Duration,
) -> (JoinHandle<()>, CancellationToken) {
    let token = CancellationToken::new();
    let stop = token.clone();
    let period = interval.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_ms = period.as_millis() as u64, "expiry sweeper started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    cache.clear_expired_cache(max_age);
                }
            }
        }
        debug!("expiry sweeper stopped");
    });

    (handle, token)
}
