// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Character-device media: parallel ports and USB printer-class devices.
//
// Both are plain device nodes opened write-only through `tokio::fs`.  The
// read side is always at end of stream: a `tokio::fs::File` read runs on a
// blocking thread that cannot be cancelled, so a status read on an idle
// printer would keep the node open after `close`.

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tracing::debug;

use portmaster_core::config::TransportConfig;
use portmaster_core::error::TransportError;
use portmaster_core::types::TransportKind;

use crate::framing::Framing;
use crate::port::{Attachment, BoxedReader, BoxedWriter, Medium, PortTransport};

/// Largest synchronous write to a parallel port.
pub const PARALLEL_MAX_TRANSFER: usize = 4 * 1024;

/// Largest synchronous write to a USB printer.
pub const USB_MAX_TRANSFER: usize = 16 * 1024;

/// Map `<PREFIX><n>` (case-insensitive, `n >= 1`) to a device node.
///
/// On Unix `LPT1` becomes `/dev/lp0` and `USB001` becomes `/dev/usb/lp0`; on
/// Windows the alias is opened through the `\\.\` device namespace.  Anything
/// else is taken as a path.
fn resolve_alias(name: &str, prefix: &str, unix_base: &str) -> String {
    let upper = name.to_ascii_uppercase();
    let index = upper
        .strip_prefix(prefix)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u32>().ok())
        .filter(|n| *n >= 1);

    match index {
        Some(_) if cfg!(windows) => format!(r"\\.\{upper}"),
        Some(n) => format!("{unix_base}{}", n - 1),
        None => name.to_owned(),
    }
}

pub(crate) fn resolve_parallel_path(name: &str) -> String {
    resolve_alias(name, "LPT", "/dev/lp")
}

pub(crate) fn resolve_usb_path(name: &str) -> String {
    resolve_alias(name, "USB", "/dev/usb/lp")
}

/// Open `path` for writing.
async fn open_device(path: &str) -> Result<BoxedWriter, TransportError> {
    let writer = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                TransportError::IoFailure(format!("device {path} does not exist"))
            }
            _ => TransportError::io(format!("open {path}"), e),
        })?;
    Ok(Box::new(writer))
}

async fn attach_device(
    config: &TransportConfig,
    resolve: fn(&str) -> String,
    max_transfer: usize,
) -> Result<Attachment, TransportError> {
    let name = config.port_name.trim();
    if name.is_empty() {
        return Err(TransportError::InvalidParameter("device path is empty".into()));
    }
    let path = resolve(name);
    let writer = open_device(&path).await?;
    let reader: BoxedReader = Box::new(tokio::io::empty());
    debug!(path = %path, max_transfer, "device node opened write-only");
    Ok(Attachment {
        reader,
        writer,
        framing: Framing::Passthrough,
        port_name: path,
        max_transfer,
    })
}

/// Parallel port (`/dev/lpN`, `LPTn`).
#[derive(Debug, Default)]
pub struct ParallelMedium;

#[async_trait]
impl Medium for ParallelMedium {
    const KIND: TransportKind = TransportKind::Parallel;

    async fn attach(&mut self, config: &TransportConfig) -> Result<Attachment, TransportError> {
        attach_device(config, resolve_parallel_path, PARALLEL_MAX_TRANSFER).await
    }
}

/// USB printer-class device (`/dev/usb/lpN`, `USBnnn`).
#[derive(Debug, Default)]
pub struct UsbPrintMedium;

#[async_trait]
impl Medium for UsbPrintMedium {
    const KIND: TransportKind = TransportKind::UsbPrint;

    async fn attach(&mut self, config: &TransportConfig) -> Result<Attachment, TransportError> {
        attach_device(config, resolve_usb_path, USB_MAX_TRANSFER).await
    }
}

pub type ParallelTransport = PortTransport<ParallelMedium>;
pub type UsbPrintTransport = PortTransport<UsbPrintMedium>;
