// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for PortMaster.

use thiserror::Error;

/// Error codes returned by every transport operation.
///
/// Success is `Ok(..)`; the sticky last error of a transport is `None` after
/// a successful operation.  The enum is `Clone` so a transport can hand out
/// copies of the most recent failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),
}

impl TransportError {
    /// Whether this error came from the medium itself (as opposed to a
    /// rejected precondition).  Only medium failures move an open transport
    /// into the `Error` state.
    pub fn is_medium_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::IoFailure(_) | Self::Capacity(_)
        )
    }

    /// Map an I/O error like `From` does, prefixing the message with what
    /// was being attempted.
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        let kind = err.kind();
        let message = format!("{context}: {err}");
        Self::from(std::io::Error::new(kind, message))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout(err.to_string()),
            ErrorKind::InvalidInput => Self::InvalidParameter(err.to_string()),
            ErrorKind::Unsupported => Self::NotSupported(err.to_string()),
            _ => Self::IoFailure(err.to_string()),
        }
    }
}

/// Top-level error type for all PortMaster operations.
#[derive(Debug, Error)]
pub enum PortmasterError {
    // -- Taxonomy --
    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("resource failure: {0}")]
    Resource(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("capacity exceeded: {size} bytes exceeds the {limit} byte limit")]
    Capacity { size: usize, limit: usize },

    // -- Wrapped --
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PortmasterError>;
