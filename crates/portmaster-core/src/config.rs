// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Configuration values exchanged with transports, the staging cache and the
// settings editor.  Pure data: nothing here opens a device or touches disk.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::NetworkProtocol;

/// Parity setting for a serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Flow control setting for a serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// 5, 6, 7 or 8.
    pub data_bits: u8,
    pub parity: Parity,
    /// 1 or 2.
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

/// Knobs for the in-process loopback transport.
///
/// The fault switches exist so callers can exercise the error paths of the
/// transport contract without hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackSettings {
    /// Capacity of the in-process pipe in bytes.
    pub buffer_size: usize,
    /// Make `open` fail as if the peer were unreachable.
    pub refuse_open: bool,
    /// Make every write fail with a broken pipe.
    pub fail_writes: bool,
    /// Make every read fail with a broken pipe.
    pub fail_reads: bool,
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            refuse_open: false,
            fail_writes: false,
            fail_reads: false,
        }
    }
}

/// Medium-specific configuration handed to `Transport::open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Device path or port alias for serial, parallel and USB media
    /// (e.g. `/dev/ttyUSB0`, `COM1`, `LPT1`, `/dev/usb/lp0`).
    pub port_name: String,
    /// Printer host name or address for the network medium.
    pub host: String,
    /// TCP port; 0 selects the default port of `protocol`.
    pub port: u16,
    /// Network sub-protocol.
    pub protocol: NetworkProtocol,
    pub serial: SerialSettings,
    /// LPD queue name.
    pub lpr_queue: String,
    /// Resource path of the IPP printer object.
    pub ipp_path: String,
    /// Job name announced to LPD and IPP printers.
    pub job_name: String,
    /// Requesting user announced to LPD and IPP printers.
    pub user_name: String,
    pub connect_timeout_ms: u64,
    /// Upper bound on a single write to the medium.
    pub io_timeout_ms: u64,
    /// Optional upper bound on a single read; `None` blocks until data.
    pub read_timeout_ms: Option<u64>,
    /// Buffer size used by the background read loop.
    pub read_chunk_size: usize,
    pub loopback: LoopbackSettings,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            host: String::new(),
            port: 0,
            protocol: NetworkProtocol::Raw,
            serial: SerialSettings::default(),
            lpr_queue: "lp".into(),
            ipp_path: "/ipp/print".into(),
            job_name: "PortMaster job".into(),
            user_name: "portmaster".into(),
            connect_timeout_ms: 10_000,
            io_timeout_ms: 60_000,
            read_timeout_ms: None,
            read_chunk_size: 4096,
            loopback: LoopbackSettings::default(),
        }
    }
}

impl TransportConfig {
    /// Configuration for a device-backed medium (serial, parallel, USB).
    pub fn device(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Configuration for a serial line with an explicit baud rate.
    pub fn serial(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            serial: SerialSettings {
                baud_rate,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Configuration for a network printer.  `port` 0 selects the protocol
    /// default.
    pub fn network(host: impl Into<String>, port: u16, protocol: NetworkProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            ..Default::default()
        }
    }

    /// Configuration for the in-process loopback.
    pub fn loopback() -> Self {
        Self {
            port_name: "loopback".into(),
            ..Default::default()
        }
    }

    /// The TCP port actually used by the network medium.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.protocol.default_port()
        } else {
            self.port
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

/// Default size above which payloads are spilled to disk (10 MiB).
pub const DEFAULT_SPILL_THRESHOLD: usize = 10 * 1024 * 1024;

/// Default insert-time rejection limit (100 MiB).
pub const DEFAULT_MAX_CACHE_SIZE: usize = 100 * 1024 * 1024;

/// Settings for the staging cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Payloads strictly larger than this go to a spill file.
    pub spill_threshold: usize,
    /// Payloads strictly larger than this are rejected.
    pub max_cache_size: usize,
    /// Directory for spill files.  `None` uses `<system temp>/PortMaster_Cache`.
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_port_falls_back_to_protocol_default() {
        let config = TransportConfig::network("printer.local", 0, NetworkProtocol::Lpr);
        assert_eq!(config.effective_port(), 515);

        let config = TransportConfig::network("printer.local", 9101, NetworkProtocol::Raw);
        assert_eq!(config.effective_port(), 9101);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: TransportConfig =
            serde_json::from_str(r#"{ "host": "10.0.0.5", "protocol": "Ipp" }"#).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.protocol, NetworkProtocol::Ipp);
        assert_eq!(config.ipp_path, "/ipp/print");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn cache_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.spill_threshold, 10 * 1024 * 1024);
        assert!(config.max_cache_size > config.spill_threshold);
        assert!(config.cache_dir.is_none());
    }
}
