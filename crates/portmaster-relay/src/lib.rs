// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PortMaster Relay: stage print payloads in the cache, then deliver them over
// a transport with integrity checks, retries and background expiry.

pub mod config;
pub mod relay;
pub mod retry;

pub use config::RelayConfig;
pub use relay::{DeliveryReport, Relay, spawn_expiry_sweeper};
pub use retry::{RetryConfig, RetryDecision, classify_error, should_retry};
