// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The transport contract shared by every medium.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use portmaster_core::config::TransportConfig;
use portmaster_core::error::TransportError;
use portmaster_core::types::{TransportKind, TransportState, TransportStats};

/// Receiver side of the background read loop.  Each message is one chunk as
/// it came off the medium.
pub type DataSink = mpsc::Sender<Vec<u8>>;

/// A byte pipe to a print device.
///
/// Every operation returns `Ok` on success and records its outcome as the
/// sticky [`last_error`](Transport::last_error).  Writes, reads and async
/// operations require the `Open` state and fail with
/// [`TransportError::NotOpen`] otherwise; a medium failure while open moves
/// the transport to `Error`, from which only `close` (or a fresh `open`)
/// leaves.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Which medium this transport drives.
    fn kind(&self) -> TransportKind;

    /// Acquire the medium described by `config`.
    ///
    /// An already open transport is closed first.  On failure the transport
    /// stays `Closed`.
    async fn open(&mut self, config: &TransportConfig) -> Result<(), TransportError>;

    /// Release the medium.  Stops the read loop, drains queued writes and
    /// finishes any protocol framing.  Safe to call in any state.
    async fn close(&mut self);

    /// One write to the medium.  Returns the number of payload bytes
    /// accepted, which may be less than `data.len()`.
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// One read from the medium into `buf`.  Returns `Ok(0)` at end of
    /// stream.  LPR and IPP jobs answer `NotSupported`: their reply is read
    /// by `close`.  Parallel and USB devices are write-only and always at
    /// end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Queue `data` behind any earlier writes and return immediately.
    /// Completion shows up in [`stats`](Transport::stats); a failure moves
    /// the transport to `Error`.
    async fn write_async(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Start delivering incoming chunks to `sink`.  Starting twice is a
    /// no-op.  Refused like [`read`](Transport::read) for LPR and IPP jobs.
    async fn start_async_read(&mut self, sink: DataSink) -> Result<(), TransportError>;

    /// Stop the read loop and wait for it to exit.  Always succeeds.
    async fn stop_async_read(&mut self) -> Result<(), TransportError>;

    fn state(&self) -> TransportState;

    fn stats(&self) -> TransportStats;

    fn reset_stats(&self);

    /// Resolved device path or peer address of the most recently opened
    /// medium; empty before the first open.
    fn port_name(&self) -> String;

    fn last_error(&self) -> Option<TransportError>;

    fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }
}
