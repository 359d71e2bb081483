// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport factory: type identifier in, boxed transport out.

use tracing::debug;

use portmaster_core::types::TransportKind;

use crate::device::{ParallelTransport, UsbPrintTransport};
use crate::loopback::LoopbackTransport;
use crate::network::NetworkPrintTransport;
use crate::serial::SerialTransport;
use crate::traits::Transport;

/// Creates transports by name or kind.  The returned transport is `Closed`.
pub struct TransportFactory;

impl TransportFactory {
    /// Create the transport registered under `type_name`
    /// (e.g. `"NetworkPrintTransport"`).  Unknown names yield `None`.
    pub fn create_transport(type_name: &str) -> Option<Box<dyn Transport>> {
        match type_name.parse::<TransportKind>() {
            Ok(kind) => Some(Self::create(kind)),
            Err(e) => {
                debug!(error = %e, "no transport registered under this name");
                None
            }
        }
    }

    pub fn create(kind: TransportKind) -> Box<dyn Transport> {
        debug!(%kind, "creating transport");
        match kind {
            TransportKind::Serial => Box::new(SerialTransport::new()),
            TransportKind::Parallel => Box::new(ParallelTransport::new()),
            TransportKind::NetworkPrint => Box::new(NetworkPrintTransport::new()),
            TransportKind::UsbPrint => Box::new(UsbPrintTransport::new()),
            TransportKind::Loopback => Box::new(LoopbackTransport::new()),
        }
    }

    /// Every identifier `create_transport` accepts.
    pub fn supported_types() -> Vec<&'static str> {
        TransportKind::all().iter().map(|k| k.type_name()).collect()
    }
}
