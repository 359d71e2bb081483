// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network printer medium: one TCP connection per open.
//
// RAW (JetDirect, port 9100) sends bytes as they are.  LPR (port 515) and
// IPP (port 631) perform their job preamble during open, so by the time the
// transport reports `Open` the printer is waiting for document data.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info};

use portmaster_core::config::TransportConfig;
use portmaster_core::error::TransportError;
use portmaster_core::types::{NetworkProtocol, TransportKind};

use crate::framing::Framing;
use crate::port::{Attachment, Medium, PortTransport};
use crate::{ipp, lpr};

/// Largest synchronous write to a socket.
pub const NETWORK_MAX_TRANSFER: usize = 64 * 1024;

async fn connect(addr: &str, limit: Duration) -> Result<TcpStream, TransportError> {
    tokio::time::timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            TransportError::Timeout(format!(
                "connection to {addr} timed out after {} ms",
                limit.as_millis()
            ))
        })?
        .map_err(|e| TransportError::io(format!("connect to {addr}"), e))
}

/// Run a job preamble under the I/O timeout.
async fn handshake<T>(
    limit: Duration,
    what: &str,
    step: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, step).await.map_err(|_| {
        TransportError::Timeout(format!("{what} handshake not completed within {} ms", limit.as_millis()))
    })?
}

/// Network printer reached over TCP.
#[derive(Debug, Default)]
pub struct NetworkPrintMedium;

#[async_trait]
impl Medium for NetworkPrintMedium {
    const KIND: TransportKind = TransportKind::NetworkPrint;

    async fn attach(&mut self, config: &TransportConfig) -> Result<Attachment, TransportError> {
        let host = config.host.trim();
        if host.is_empty() {
            return Err(TransportError::InvalidParameter("printer host is empty".into()));
        }
        let port = config.effective_port();
        let addr = format!("{host}:{port}");

        info!(addr = %addr, protocol = config.protocol.display_name(), "connecting to network printer");
        let stream = connect(&addr, config.connect_timeout()).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle");
        }
        let (mut reader, mut writer) = stream.into_split();

        let framing = match config.protocol {
            NetworkProtocol::Raw => Framing::Passthrough,
            NetworkProtocol::Lpr => {
                handshake(
                    config.io_timeout(),
                    "LPR",
                    lpr::begin_job(&mut reader, &mut writer, config),
                )
                .await?;
                Framing::Lpr
            }
            NetworkProtocol::Ipp => {
                handshake(
                    config.io_timeout(),
                    "IPP",
                    ipp::begin_print_job(&mut writer, host, port, config),
                )
                .await?;
                Framing::IppChunked
            }
        };

        let scheme = match config.protocol {
            NetworkProtocol::Raw => "raw",
            NetworkProtocol::Lpr => "lpd",
            NetworkProtocol::Ipp => "ipp",
        };

        Ok(Attachment {
            reader: Box::new(reader),
            writer: Box::new(writer),
            framing,
            port_name: format!("{scheme}://{addr}"),
            max_transfer: NETWORK_MAX_TRANSFER,
        })
    }
}

pub type NetworkPrintTransport = PortTransport<NetworkPrintMedium>;
