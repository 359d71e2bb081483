// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Relay configuration file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use portmaster_core::config::{CacheConfig, TransportConfig};
use portmaster_core::error::{PortmasterError, Result};
use portmaster_core::types::TransportKind;

use crate::retry::RetryConfig;

/// Everything the relay binary needs, loaded from one JSON document.
///
/// Missing fields take their defaults, so `{}` is a loopback relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Factory identifier, e.g. `"NetworkPrintTransport"`.
    pub transport_type: String,
    pub transport: TransportConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    /// How often the expiry sweeper runs.
    pub sweep_interval_ms: u64,
    /// Entries older than this are dropped by the sweeper.
    pub max_age_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transport_type: TransportKind::Loopback.type_name().into(),
            transport: TransportConfig::loopback(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            sweep_interval_ms: 60_000,
            max_age_ms: portmaster_cache::DEFAULT_MAX_AGE.as_millis() as u64,
        }
    }
}

impl RelayConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PortmasterError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), transport = %config.transport_type, "relay config loaded");
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.kind()?;
        Ok(config)
    }

    /// The transport kind named by `transport_type`.
    pub fn kind(&self) -> Result<TransportKind> {
        self.transport_type
            .parse()
            .map_err(|e| PortmasterError::Config(format!("{e}")))
    }
}
