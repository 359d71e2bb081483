// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process loopback medium.
//
// Whatever is written comes back out of `read` and the async read loop, in
// order.  Fault switches in `LoopbackSettings` turn open, writes or reads
// into failures so the error paths of the transport contract can be driven
// without hardware.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use portmaster_core::config::TransportConfig;
use portmaster_core::error::TransportError;
use portmaster_core::types::TransportKind;

use crate::framing::Framing;
use crate::port::{Attachment, BoxedReader, BoxedWriter, Medium, PortTransport};

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "injected loopback fault")
}

/// Read half that always fails.
#[derive(Debug)]
struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(injected()))
    }
}

/// Write half that refuses every write.
#[derive(Debug)]
struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(injected()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Loopback through a `tokio::io::duplex` pipe.
#[derive(Debug, Default)]
pub struct LoopbackMedium;

#[async_trait]
impl Medium for LoopbackMedium {
    const KIND: TransportKind = TransportKind::Loopback;

    async fn attach(&mut self, config: &TransportConfig) -> Result<Attachment, TransportError> {
        let settings = &config.loopback;
        if settings.refuse_open {
            return Err(TransportError::IoFailure("loopback peer refused the connection".into()));
        }
        if settings.buffer_size == 0 {
            return Err(TransportError::InvalidParameter(
                "loopback buffer size must be at least 1".into(),
            ));
        }

        // Bytes written into `near` come out of `far`.
        let (near, far) = tokio::io::duplex(settings.buffer_size);
        let (_, near_writer) = tokio::io::split(near);
        let (far_reader, _) = tokio::io::split(far);

        let reader: BoxedReader = if settings.fail_reads {
            Box::new(FailingReader)
        } else {
            Box::new(far_reader)
        };
        let writer: BoxedWriter = if settings.fail_writes {
            Box::new(FailingWriter)
        } else {
            Box::new(near_writer)
        };

        let port_name = if config.port_name.is_empty() {
            "loopback".to_owned()
        } else {
            config.port_name.clone()
        };
        debug!(port = %port_name, buffer = settings.buffer_size, "loopback pipe created");

        Ok(Attachment {
            reader,
            writer,
            framing: Framing::Passthrough,
            port_name,
            max_transfer: settings.buffer_size,
        })
    }
}

pub type LoopbackTransport = PortTransport<LoopbackMedium>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use portmaster_core::config::LoopbackSettings;
    use portmaster_core::types::TransportState;
    use tokio::sync::mpsc;

    use super::*;
    use crate::traits::Transport;

    fn config_with(loopback: LoopbackSettings) -> TransportConfig {
        TransportConfig {
            loopback,
            ..TransportConfig::loopback()
        }
    }

    async fn open_loopback() -> LoopbackTransport {
        let mut transport = LoopbackTransport::new();
        transport.open(&TransportConfig::loopback()).await.unwrap();
        transport
    }

    #[tokio::test]
    async fn sync_echo() {
        let mut transport = open_loopback().await;
        assert_eq!(transport.state(), TransportState::Open);
        assert_eq!(transport.port_name(), "loopback");

        assert_eq!(transport.write(b"ping").await.unwrap(), 4);
        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        let stats = transport.stats();
        assert_eq!((stats.bytes_sent, stats.bytes_received), (4, 4));
        assert_eq!(transport.last_error(), None);

        transport.reset_stats();
        assert_eq!(transport.stats().bytes_sent, 0);
    }

    #[tokio::test]
    async fn async_echo_through_the_read_loop() {
        let mut transport = open_loopback().await;
        let (tx, mut rx) = mpsc::channel(16);
        transport.start_async_read(tx).await.unwrap();

        transport.write_async(b"hello ").await.unwrap();
        transport.write_async(b"world").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 11 {
            let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"hello world");
        assert_eq!(transport.stats().bytes_sent, 11);
        assert_eq!(transport.stats().bytes_received, 11);

        transport.stop_async_read().await.unwrap();
        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn full_pipe_accepts_a_partial_write() {
        let mut transport = LoopbackTransport::new();
        transport
            .open(&config_with(LoopbackSettings {
                buffer_size: 8,
                ..Default::default()
            }))
            .await
            .unwrap();

        assert_eq!(transport.write(b"0123456789abcdef").await.unwrap(), 8);
        let mut buf = [0u8; 8];
        transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"01234567");
    }

    #[tokio::test]
    async fn refused_open_stays_closed() {
        let mut transport = LoopbackTransport::new();
        let err = transport
            .open(&config_with(LoopbackSettings {
                refuse_open: true,
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::IoFailure(_)));
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(transport.last_error(), Some(err));
    }

    #[tokio::test]
    async fn failing_write_moves_to_error() {
        let mut transport = LoopbackTransport::new();
        transport
            .open(&config_with(LoopbackSettings {
                fail_writes: true,
                ..Default::default()
            }))
            .await
            .unwrap();

        let err = transport.write(b"data").await.unwrap_err();
        assert!(matches!(err, TransportError::IoFailure(_)));
        assert_eq!(transport.state(), TransportState::Error);
        assert_eq!(transport.last_error(), Some(err));
        assert_eq!(transport.stats().bytes_sent, 0);

        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn failing_async_write_surfaces_later() {
        let mut transport = LoopbackTransport::new();
        transport
            .open(&config_with(LoopbackSettings {
                fail_writes: true,
                ..Default::default()
            }))
            .await
            .unwrap();

        // Queuing succeeds; the failure arrives from the writer task.
        transport.write_async(b"data").await.unwrap();
        for _ in 0..100 {
            if transport.state() == TransportState::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.state(), TransportState::Error);
        assert!(matches!(transport.last_error(), Some(TransportError::IoFailure(_))));
        assert_eq!(transport.write_async(b"more").await, Err(TransportError::NotOpen));
    }

    #[tokio::test]
    async fn failing_read_loop_moves_to_error() {
        let mut transport = LoopbackTransport::new();
        transport
            .open(&config_with(LoopbackSettings {
                fail_reads: true,
                ..Default::default()
            }))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        transport.start_async_read(tx).await.unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(transport.state(), TransportState::Error);

        // Stopping an already finished loop is still fine.
        transport.stop_async_read().await.unwrap();
        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn reopen_replaces_the_pipe() {
        let mut transport = open_loopback().await;
        transport.write(b"stale").await.unwrap();

        transport.open(&TransportConfig::loopback()).await.unwrap();
        assert_eq!(transport.state(), TransportState::Open);

        transport.write(b"fresh").await.unwrap();
        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"fresh");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut transport = open_loopback().await;
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);

        let mut never_opened = LoopbackTransport::new();
        never_opened.close().await;
        assert_eq!(never_opened.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn zero_buffer_is_invalid() {
        let mut transport = LoopbackTransport::new();
        let err = transport
            .open(&config_with(LoopbackSettings {
                buffer_size: 0,
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameter(_)));
    }
}
