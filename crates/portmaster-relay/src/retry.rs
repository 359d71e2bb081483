// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy for deliveries: exponential backoff with jitter.
//
// Errors are sorted into Transient (retry automatically), UserAction (someone
// has to plug in, power on or grant access) and Permanent (give up).  Only
// transient errors are retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use portmaster_core::error::{PortmasterError, TransportError};
use portmaster_core::types::ErrorClass;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles with every attempt.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 120_000,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry: the error is permanent or needs a person.
    GiveUp(ErrorClass),
    /// Maximum retries exhausted.
    Exhausted,
}

/// Classify a `PortmasterError` for retry decisions.
pub fn classify_error(err: &PortmasterError) -> ErrorClass {
    match err {
        PortmasterError::Transport(transport) => classify_transport(transport),
        PortmasterError::Timeout(_) | PortmasterError::Resource(_) => ErrorClass::Transient,

        // The payload or the request itself is wrong
        PortmasterError::Parameter(_)
        | PortmasterError::State(_)
        | PortmasterError::ChecksumMismatch { .. }
        | PortmasterError::Capacity { .. }
        | PortmasterError::Config(_)
        | PortmasterError::Serialization(_) => ErrorClass::Permanent,

        PortmasterError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorClass::UserAction
            }
            _ => ErrorClass::Transient,
        },
    }
}

/// Classify a transport failure.
pub fn classify_transport(err: &TransportError) -> ErrorClass {
    match err {
        // A closed or failed transport is reopened before the next attempt
        TransportError::NotOpen => ErrorClass::Transient,
        TransportError::Timeout(_) | TransportError::Capacity(_) => ErrorClass::Transient,
        TransportError::InvalidParameter(_) | TransportError::NotSupported(_) => {
            ErrorClass::Permanent
        }
        TransportError::IoFailure(detail) => classify_io_detail(detail),
    }
}

/// Classify the message of an I/O failure.
fn classify_io_detail(detail: &str) -> ErrorClass {
    let lower = detail.to_ascii_lowercase();

    // Device missing or not accessible
    if lower.contains("does not exist")
        || lower.contains("no such file")
        || lower.contains("not found")
        || lower.contains("permission denied")
        || lower.contains("access is denied")
    {
        return ErrorClass::UserAction;
    }

    // The printer saw the job and said no
    if lower.contains("rejected") {
        return ErrorClass::Permanent;
    }

    ErrorClass::Transient
}

/// Decide whether to retry after the failed attempt number `attempt`
/// (counting from 0).
pub fn should_retry(err: &PortmasterError, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Permanent => {
            info!(error = %err, "permanent error, not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::UserAction => {
            info!(error = %err, "user action required, not retrying");
            RetryDecision::GiveUp(ErrorClass::UserAction)
        }
        ErrorClass::Transient => {
            if attempt >= config.max_retries {
                warn!(attempt, max = config.max_retries, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempt, config);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// `min(base * 2^attempt + jitter, max_delay)` with jitter in `[0, base)`.
pub(crate) fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay_ms;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(config.max_delay_ms))
}

/// Deterministic spread across `[0, base)`.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = u64::from(attempt).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}
