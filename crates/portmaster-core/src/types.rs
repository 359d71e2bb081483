// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for PortMaster transports and the staging cache.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a transport.
///
/// `Error` is only reachable from `Open` when the medium fails; `close`
/// always returns to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Closed,
    Open,
    Error,
}

/// Byte counters since construction or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes as u64);
    }

    pub fn record_bytes_received(&mut self, bytes: usize) {
        self.bytes_received = self.bytes_received.saturating_add(bytes as u64);
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// The closed set of transport media known to the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Serial,
    Parallel,
    NetworkPrint,
    UsbPrint,
    Loopback,
}

impl TransportKind {
    /// Every kind, in factory registration order.
    pub fn all() -> &'static [TransportKind] {
        &[
            TransportKind::Serial,
            TransportKind::Parallel,
            TransportKind::NetworkPrint,
            TransportKind::UsbPrint,
            TransportKind::Loopback,
        ]
    }

    /// Identifier used by the factory and in configuration files.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Serial => "SerialTransport",
            Self::Parallel => "ParallelTransport",
            Self::NetworkPrint => "NetworkPrintTransport",
            Self::UsbPrint => "UsbPrintTransport",
            Self::Loopback => "LoopbackTransport",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Returned when a type identifier is not one of the known transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTransportKind(pub String);

impl fmt::Display for UnknownTransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown transport type: {}", self.0)
    }
}

impl std::error::Error for UnknownTransportKind {}

impl FromStr for TransportKind {
    type Err = UnknownTransportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportKind::all()
            .iter()
            .copied()
            .find(|kind| kind.type_name() == s)
            .ok_or_else(|| UnknownTransportKind(s.to_owned()))
    }
}

/// Wire protocol spoken by the network print transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkProtocol {
    /// Raw TCP socket (JetDirect).
    #[default]
    Raw,
    /// LPR/LPD (RFC 1179).
    Lpr,
    /// IPP over HTTP (RFC 8010/8011).
    Ipp,
}

impl NetworkProtocol {
    /// Default port for this protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Raw => 9100,
            Self::Lpr => 515,
            Self::Ipp => 631,
        }
    }

    /// Human-readable name for log lines.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Lpr => "LPR/LPD",
            Self::Ipp => "IPP",
        }
    }
}

/// Metadata describing one cached payload.
///
/// The checksum and session id are filled in by the cache at insertion time;
/// callers normally build this with [`FileMetadata::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    /// Declared payload size in bytes.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Lowercase 8-hex-digit CRC-32 of the payload.
    pub checksum: String,
    pub session_id: String,
}

impl FileMetadata {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
            created_at: Utc::now(),
            checksum: String::new(),
            session_id: String::new(),
        }
    }

    /// File extension of `filename`, without the dot, if there is one.
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
    }
}

/// Classification of errors for caller-side retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout, refused connection, busy device.  Safe to retry.
    Transient,
    /// Somebody must intervene (missing device, permissions).
    UserAction,
    /// Bad parameters or a corrupted payload.
    Permanent,
}
