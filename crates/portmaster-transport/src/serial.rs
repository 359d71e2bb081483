// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Serial line medium over `tokio_serial`.

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use portmaster_core::config::{FlowControl, Parity, SerialSettings, TransportConfig};
use portmaster_core::error::TransportError;
use portmaster_core::types::TransportKind;

use crate::framing::Framing;
use crate::port::{Attachment, Medium, PortTransport};

/// Largest synchronous write to a serial line.
pub const SERIAL_MAX_TRANSFER: usize = 4 * 1024;

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits, TransportError> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(TransportError::InvalidParameter(format!(
            "data bits must be 5 to 8, got {other}"
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits, TransportError> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(TransportError::InvalidParameter(format!(
            "stop bits must be 1 or 2, got {other}"
        ))),
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

fn flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

fn validate(port: &str, settings: &SerialSettings) -> Result<(), TransportError> {
    if port.is_empty() {
        return Err(TransportError::InvalidParameter("serial port name is empty".into()));
    }
    if settings.baud_rate == 0 {
        return Err(TransportError::InvalidParameter("baud rate must be positive".into()));
    }
    data_bits(settings.data_bits)?;
    stop_bits(settings.stop_bits)?;
    Ok(())
}

fn map_serial_error(port: &str, err: tokio_serial::Error) -> TransportError {
    let message = format!("open serial port {port}: {}", err.description);
    match err.kind {
        tokio_serial::ErrorKind::InvalidInput => TransportError::InvalidParameter(message),
        tokio_serial::ErrorKind::Io(kind) => {
            TransportError::from(std::io::Error::new(kind, message))
        }
        _ => TransportError::IoFailure(message),
    }
}

/// RS-232 line (`/dev/ttyS0`, `/dev/ttyUSB0`, `COM1`).
#[derive(Debug, Default)]
pub struct SerialMedium;

#[async_trait]
impl Medium for SerialMedium {
    const KIND: TransportKind = TransportKind::Serial;

    async fn attach(&mut self, config: &TransportConfig) -> Result<Attachment, TransportError> {
        let port = config.port_name.trim();
        let settings = &config.serial;
        validate(port, settings)?;

        debug!(port, baud = settings.baud_rate, "opening serial port");
        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(port, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits)?)
            .parity(parity(settings.parity))
            .stop_bits(stop_bits(settings.stop_bits)?)
            .flow_control(flow_control(settings.flow_control))
            .timeout(config.io_timeout())
            .open_native_async()
            .map_err(|e| map_serial_error(port, e))?;

        #[cfg(unix)]
        stream
            .set_exclusive(false)
            .map_err(|e| map_serial_error(port, e))?;

        let (reader, writer) = tokio::io::split(stream);
        Ok(Attachment {
            reader: Box::new(reader),
            writer: Box::new(writer),
            framing: Framing::Passthrough,
            port_name: port.to_owned(),
            max_transfer: SERIAL_MAX_TRANSFER,
        })
    }
}

pub type SerialTransport = PortTransport<SerialMedium>;

#[cfg(test)]
mod tests {
    use portmaster_core::types::TransportState;

    use super::*;
    use crate::traits::Transport;

    #[test]
    fn line_settings_are_validated() {
        let ok = SerialSettings::default();
        assert!(validate("/dev/ttyS0", &ok).is_ok());
        assert!(validate("", &ok).is_err());

        let bad_bits = SerialSettings { data_bits: 9, ..Default::default() };
        assert!(matches!(
            validate("/dev/ttyS0", &bad_bits),
            Err(TransportError::InvalidParameter(_))
        ));

        let bad_stop = SerialSettings { stop_bits: 3, ..Default::default() };
        assert!(validate("/dev/ttyS0", &bad_stop).is_err());

        let no_baud = SerialSettings { baud_rate: 0, ..Default::default() };
        assert!(validate("/dev/ttyS0", &no_baud).is_err());
    }

    #[test]
    fn settings_translate_to_line_parameters() {
        assert_eq!(parity(Parity::Even), tokio_serial::Parity::Even);
        assert_eq!(flow_control(FlowControl::Hardware), tokio_serial::FlowControl::Hardware);
        assert_eq!(data_bits(7).unwrap(), tokio_serial::DataBits::Seven);
        assert_eq!(stop_bits(2).unwrap(), tokio_serial::StopBits::Two);
    }

    #[test]
    fn serial_errors_map_to_transport_errors() {
        let err = map_serial_error(
            "COM9",
            tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone"),
        );
        assert!(matches!(err, TransportError::IoFailure(msg) if msg.contains("COM9")));

        let err = map_serial_error(
            "COM9",
            tokio_serial::Error::new(tokio_serial::ErrorKind::InvalidInput, "bad baud"),
        );
        assert!(matches!(err, TransportError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn invalid_settings_fail_open_without_touching_hardware() {
        let mut transport = SerialTransport::new();
        let mut config = TransportConfig::serial("/dev/ttyS0", 9600);
        config.serial.data_bits = 4;

        let err = transport.open(&config).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameter(_)));
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn missing_port_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyNOPE");
        let mut transport = SerialTransport::new();

        let err = transport
            .open(&TransportConfig::serial(path.to_string_lossy(), 115_200))
            .await
            .unwrap_err();
        assert!(err.is_medium_failure() || matches!(err, TransportError::InvalidParameter(_)));
        assert_eq!(transport.state(), TransportState::Closed);
    }
}
