// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The transport state machine, written once and shared by every medium.
//
// A medium only knows how to acquire its resource and which framing the wire
// needs.  Everything else lives here: state transitions, the sticky last
// error, byte counters, the writer task that serialises sync and async
// writes, and the cancellable background read loop.
//
//   Closed --open ok--> Open --medium failure--> Error
//     ^                  |                         |
//     +------close-------+-----------close---------+

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portmaster_core::config::TransportConfig;
use portmaster_core::error::TransportError;
use portmaster_core::types::{TransportKind, TransportState, TransportStats};

use crate::framing::{Framing, Outgoing};
use crate::traits::{DataSink, Transport};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on how long `close` waits for a printer to confirm a job.
const ACK_WAIT: Duration = Duration::from_secs(5);

/// What a medium hands over after a successful attach.
pub struct Attachment {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub framing: Framing,
    /// Resolved device path or peer address.
    pub port_name: String,
    /// Largest single write a synchronous `write` issues.
    pub max_transfer: usize,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("framing", &self.framing)
            .field("port_name", &self.port_name)
            .field("max_transfer", &self.max_transfer)
            .finish_non_exhaustive()
    }
}

/// A physical or virtual medium a [`PortTransport`] can drive.
#[async_trait]
pub trait Medium: Send + Sync + Default + fmt::Debug + 'static {
    const KIND: TransportKind;

    /// Acquire the resource described by `config`.
    async fn attach(&mut self, config: &TransportConfig) -> Result<Attachment, TransportError>;
}

// ---------------------------------------------------------------------------
// Shared status
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LinkStatus {
    state: TransportState,
    stats: TransportStats,
    last_error: Option<TransportError>,
}

/// State, counters and last error, shared with the writer and reader tasks.
#[derive(Debug, Clone)]
struct SharedStatus(Arc<Mutex<LinkStatus>>);

impl SharedStatus {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(LinkStatus {
            state: TransportState::Closed,
            stats: TransportStats::new(),
            last_error: None,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, LinkStatus> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> TransportState {
        self.lock().state
    }

    fn succeed(&self) {
        self.lock().last_error = None;
    }

    fn fail(&self, err: &TransportError) {
        let mut status = self.lock();
        status.last_error = Some(err.clone());
        if err.is_medium_failure() && status.state == TransportState::Open {
            status.state = TransportState::Error;
            warn!(error = %err, "medium failure, transport entered error state");
        }
    }

    fn record_sent(&self, bytes: usize) {
        self.lock().stats.record_bytes_sent(bytes);
    }

    fn record_received(&self, bytes: usize) {
        self.lock().stats.record_bytes_received(bytes);
    }
}

// ---------------------------------------------------------------------------
// Open link
// ---------------------------------------------------------------------------

enum WriteRequest {
    /// A synchronous `write`; the caller waits on `reply`.
    Now {
        out: Outgoing,
        reply: oneshot::Sender<Result<usize, TransportError>>,
    },
    /// A `write_async`; the outcome lands in the shared status.
    Queued { out: Outgoing },
    /// Emit the framing trailer, flush and shut the write side down.
    Finish {
        trailer: Option<&'static [u8]>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
}

struct ReadLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything that exists only while the medium is attached.
struct Link {
    framing: Framing,
    max_transfer: usize,
    io_timeout: Duration,
    read_timeout: Option<Duration>,
    read_chunk_size: usize,
    reader: Arc<AsyncMutex<BoxedReader>>,
    writer: mpsc::UnboundedSender<WriteRequest>,
    writer_task: JoinHandle<()>,
    read_loop: Option<ReadLoop>,
}

impl Link {
    fn is_reading(&self) -> bool {
        self.read_loop
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    async fn stop_reading(&mut self) {
        if let Some(read_loop) = self.read_loop.take() {
            read_loop.cancel.cancel();
            if let Err(e) = read_loop.handle.await {
                warn!(error = %e, "read loop ended abnormally");
            }
        }
    }

    /// Stop reading, drain the writer, then give the printer a chance to
    /// confirm the job.
    async fn shutdown(mut self) {
        self.stop_reading().await;

        let (reply, finished) = oneshot::channel();
        let request = WriteRequest::Finish {
            trailer: self.framing.trailer(),
            reply,
        };
        let flushed = match self.writer.send(request) {
            Ok(()) => match finished.await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(error = %e, "final flush failed");
                    false
                }
                Err(_) => false,
            },
            Err(_) => false,
        };

        drop(self.writer);
        if let Err(e) = self.writer_task.await {
            warn!(error = %e, "writer task ended abnormally");
        }

        if flushed {
            let wait = self.io_timeout.min(ACK_WAIT);
            let mut reader = self.reader.lock().await;
            if let Err(e) = self.framing.acknowledge(&mut *reader, wait).await {
                warn!(error = %e, "printer did not confirm the job");
            }
        }
    }
}

fn refuse_reserved_reader(framing: Framing) -> Result<(), TransportError> {
    if framing.reserves_reader() {
        return Err(TransportError::NotSupported(format!(
            "{framing:?} framing reads the printer's reply itself at close"
        )));
    }
    Ok(())
}

fn writer_gone() -> TransportError {
    TransportError::IoFailure("writer task is no longer running".into())
}

// ---------------------------------------------------------------------------
// PortTransport
// ---------------------------------------------------------------------------

/// [`Transport`] implementation over any [`Medium`].
pub struct PortTransport<M: Medium> {
    medium: M,
    status: SharedStatus,
    port_name: String,
    link: Option<Link>,
}

impl<M: Medium> Default for PortTransport<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Medium> fmt::Debug for PortTransport<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortTransport")
            .field("kind", &M::KIND)
            .field("medium", &self.medium)
            .field("port_name", &self.port_name)
            .field("state", &self.status.state())
            .finish_non_exhaustive()
    }
}

impl<M: Medium> PortTransport<M> {
    pub fn new() -> Self {
        Self::with_medium(M::default())
    }

    pub fn with_medium(medium: M) -> Self {
        Self {
            medium,
            status: SharedStatus::new(),
            port_name: String::new(),
            link: None,
        }
    }

    /// Record the outcome of an operation as the sticky last error.
    fn conclude<T>(&self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        match &result {
            Ok(_) => self.status.succeed(),
            Err(e) => self.status.fail(e),
        }
        result
    }

    fn ready_link(&self) -> Result<&Link, TransportError> {
        if self.status.state() != TransportState::Open {
            return Err(TransportError::NotOpen);
        }
        self.link.as_ref().ok_or(TransportError::NotOpen)
    }

    async fn attach(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        if config.read_chunk_size == 0 {
            return Err(TransportError::InvalidParameter(
                "read_chunk_size must be at least 1".into(),
            ));
        }

        let Attachment {
            reader,
            writer,
            framing,
            port_name,
            max_transfer,
        } = self.medium.attach(config).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(run_writer(
            writer,
            rx,
            self.status.clone(),
            config.io_timeout(),
        ));

        self.link = Some(Link {
            framing,
            max_transfer: max_transfer.max(1),
            io_timeout: config.io_timeout(),
            read_timeout: config.read_timeout(),
            read_chunk_size: config.read_chunk_size,
            reader: Arc::new(AsyncMutex::new(reader)),
            writer: tx,
            writer_task,
            read_loop: None,
        });
        self.port_name = port_name;
        self.status.lock().state = TransportState::Open;

        info!(kind = %M::KIND, port = %self.port_name, ?framing, "transport open");
        Ok(())
    }

    async fn submit_write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if data.is_empty() {
            return Err(TransportError::InvalidParameter("write buffer is empty".into()));
        }
        let link = self.ready_link()?;
        let out = link.framing.outgoing(data, link.max_transfer, false);

        let (reply, response) = oneshot::channel();
        link.writer
            .send(WriteRequest::Now { out, reply })
            .map_err(|_| writer_gone())?;
        response.await.map_err(|_| writer_gone())?
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Err(TransportError::InvalidParameter("read buffer is empty".into()));
        }
        let link = self.ready_link()?;
        refuse_reserved_reader(link.framing)?;
        if link.is_reading() {
            return Err(TransportError::NotSupported(
                "the background read loop owns the medium".into(),
            ));
        }

        let reader = Arc::clone(&link.reader);
        let read_timeout = link.read_timeout;
        let mut reader = reader.lock().await;

        let n = match read_timeout {
            Some(limit) => tokio::time::timeout(limit, reader.read(buf))
                .await
                .map_err(|_| {
                    TransportError::Timeout(format!("no data within {} ms", limit.as_millis()))
                })?,
            None => reader.read(buf).await,
        }
        .map_err(|e| TransportError::io("read", e))?;

        self.status.record_received(n);
        debug!(bytes = n, "read");
        Ok(n)
    }

    fn enqueue_write(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.is_empty() {
            return Err(TransportError::InvalidParameter("write buffer is empty".into()));
        }
        let link = self.ready_link()?;
        let out = link.framing.outgoing(data, link.max_transfer, true);
        link.writer
            .send(WriteRequest::Queued { out })
            .map_err(|_| writer_gone())
    }

    fn begin_reading(&mut self, sink: DataSink) -> Result<(), TransportError> {
        if self.status.state() != TransportState::Open {
            return Err(TransportError::NotOpen);
        }
        let status = self.status.clone();
        let link = self.link.as_mut().ok_or(TransportError::NotOpen)?;
        refuse_reserved_reader(link.framing)?;
        if link.is_reading() {
            debug!("read loop already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            Arc::clone(&link.reader),
            sink,
            status,
            cancel.clone(),
            link.read_chunk_size,
        ));
        link.read_loop = Some(ReadLoop { cancel, handle });
        debug!("read loop started");
        Ok(())
    }
}

#[async_trait]
impl<M: Medium> Transport for PortTransport<M> {
    fn kind(&self) -> TransportKind {
        M::KIND
    }

    async fn open(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        if self.link.is_some() {
            debug!(kind = %M::KIND, "reopening, closing the current link first");
            self.close().await;
        }
        let result = self.attach(config).await;
        if let Err(e) = &result {
            warn!(kind = %M::KIND, error = %e, "open failed");
        }
        self.conclude(result)
    }

    async fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.shutdown().await;
            info!(kind = %M::KIND, port = %self.port_name, "transport closed");
        }
        let mut status = self.status.lock();
        status.state = TransportState::Closed;
        status.last_error = None;
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let result = self.submit_write(data).await;
        self.conclude(result)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let result = self.receive(buf).await;
        self.conclude(result)
    }

    async fn write_async(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = self.enqueue_write(data);
        self.conclude(result)
    }

    async fn start_async_read(&mut self, sink: DataSink) -> Result<(), TransportError> {
        let result = self.begin_reading(sink);
        self.conclude(result)
    }

    async fn stop_async_read(&mut self) -> Result<(), TransportError> {
        if let Some(link) = self.link.as_mut() {
            link.stop_reading().await;
        }
        self.conclude(Ok(()))
    }

    fn state(&self) -> TransportState {
        self.status.state()
    }

    fn stats(&self) -> TransportStats {
        self.status.lock().stats
    }

    fn reset_stats(&self) {
        self.status.lock().stats.reset();
    }

    fn port_name(&self) -> String {
        self.port_name.clone()
    }

    fn last_error(&self) -> Option<TransportError> {
        self.status.lock().last_error.clone()
    }
}

impl<M: Medium> Drop for PortTransport<M> {
    fn drop(&mut self) {
        if let Some(read_loop) = self.link.as_ref().and_then(|l| l.read_loop.as_ref()) {
            read_loop.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Owns the write half for the lifetime of the link.  Requests are served
/// strictly in arrival order; after the first failure every further request
/// is refused.
async fn run_writer(
    mut writer: BoxedWriter,
    mut requests: mpsc::UnboundedReceiver<WriteRequest>,
    status: SharedStatus,
    io_timeout: Duration,
) {
    let mut failed: Option<TransportError> = None;

    while let Some(request) = requests.recv().await {
        match request {
            WriteRequest::Now { out, reply } => {
                let result = match &failed {
                    Some(err) => Err(err.clone()),
                    None => send_bounded(&mut writer, &out, io_timeout).await,
                };
                match &result {
                    Ok(n) => {
                        status.record_sent(*n);
                        debug!(bytes = n, requested = out.payload_len, "write");
                    }
                    Err(e) => failed = Some(e.clone()),
                }
                let _ = reply.send(result);
            }
            WriteRequest::Queued { out } => {
                if let Some(err) = &failed {
                    debug!(bytes = out.payload_len, error = %err, "dropping queued write after earlier failure");
                    continue;
                }
                match send_bounded(&mut writer, &out, io_timeout).await {
                    Ok(n) => {
                        status.record_sent(n);
                        status.succeed();
                        debug!(bytes = n, "queued write completed");
                    }
                    Err(e) => {
                        warn!(error = %e, "queued write failed");
                        status.fail(&e);
                        failed = Some(e);
                    }
                }
            }
            WriteRequest::Finish { trailer, reply } => {
                let result = match failed.take() {
                    Some(err) => Err(err),
                    None => finish_stream(&mut writer, trailer, io_timeout).await,
                };
                let _ = reply.send(result);
                break;
            }
        }
    }

    debug!("writer task stopped");
}

async fn send_bounded(
    writer: &mut BoxedWriter,
    out: &Outgoing,
    limit: Duration,
) -> Result<usize, TransportError> {
    let attempt = async {
        let accepted = if out.whole {
            writer.write_all(&out.bytes).await?;
            out.payload_len
        } else {
            let n = writer.write(&out.bytes).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "medium accepted no bytes",
                ));
            }
            n
        };
        writer.flush().await?;
        Ok::<usize, io::Error>(accepted)
    };

    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result.map_err(|e| TransportError::io("write", e)),
        Err(_) => Err(TransportError::Timeout(format!(
            "write not completed within {} ms",
            limit.as_millis()
        ))),
    }
}

async fn finish_stream(
    writer: &mut BoxedWriter,
    trailer: Option<&'static [u8]>,
    limit: Duration,
) -> Result<(), TransportError> {
    let attempt = async {
        if let Some(trailer) = trailer {
            writer.write_all(trailer).await?;
        }
        writer.flush().await?;
        writer.shutdown().await
    };

    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result.map_err(|e| TransportError::io("finish", e)),
        Err(_) => Err(TransportError::Timeout(format!(
            "final flush not completed within {} ms",
            limit.as_millis()
        ))),
    }
}

/// Forward chunks from the medium to `sink` until cancelled, end of stream,
/// a closed sink or a read error.
async fn read_loop(
    reader: Arc<AsyncMutex<BoxedReader>>,
    sink: DataSink,
    status: SharedStatus,
    cancel: CancellationToken,
    chunk_size: usize,
) {
    let mut buf = vec![0u8; chunk_size];

    loop {
        let result = {
            let mut reader = tokio::select! {
                _ = cancel.cancelled() => break,
                guard = reader.lock() => guard,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = reader.read(&mut buf) => result,
            }
        };

        match result {
            Ok(0) => {
                debug!("end of stream, read loop exiting");
                break;
            }
            Ok(n) => {
                status.record_received(n);
                let delivered = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = sink.send(buf[..n].to_vec()) => sent.is_ok(),
                };
                if !delivered {
                    debug!("sink dropped, read loop exiting");
                    break;
                }
            }
            Err(e) => {
                let err = TransportError::io("background read", e);
                warn!(error = %err, "read loop failed");
                status.fail(&err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::io::{DuplexStream, duplex};

    use super::*;
    use crate::framing::IPP_TRAILER;

    /// Medium whose far end is handed to the test.
    #[derive(Debug, Default)]
    struct PipeMedium {
        framing: Framing,
        max_transfer: usize,
        far: Arc<StdMutex<Option<DuplexStream>>>,
    }

    #[async_trait]
    impl Medium for PipeMedium {
        const KIND: TransportKind = TransportKind::Loopback;

        async fn attach(&mut self, _config: &TransportConfig) -> Result<Attachment, TransportError> {
            let (near, far) = duplex(1024);
            *self.far.lock().unwrap() = Some(far);
            let (reader, writer) = tokio::io::split(near);
            Ok(Attachment {
                reader: Box::new(reader),
                writer: Box::new(writer),
                framing: self.framing,
                port_name: "pipe".into(),
                max_transfer: self.max_transfer.max(1),
            })
        }
    }

    async fn open_pipe(framing: Framing, max_transfer: usize) -> (PortTransport<PipeMedium>, DuplexStream) {
        let far = Arc::new(StdMutex::new(None));
        let mut transport = PortTransport::with_medium(PipeMedium {
            framing,
            max_transfer,
            far: Arc::clone(&far),
        });
        transport.open(&TransportConfig::loopback()).await.unwrap();
        let far = far.lock().unwrap().take().unwrap();
        (transport, far)
    }

    #[tokio::test]
    async fn sync_and_async_writes_keep_their_order() {
        let (mut transport, mut far) = open_pipe(Framing::Passthrough, 1024).await;

        transport.write_async(b"one ").await.unwrap();
        transport.write(b"two ").await.unwrap();
        transport.write_async(b"three").await.unwrap();
        transport.close().await;

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"one two three");
        assert_eq!(transport.stats().bytes_sent, 13);
    }

    #[tokio::test]
    async fn sync_write_is_capped_at_max_transfer() {
        let (mut transport, _far) = open_pipe(Framing::Passthrough, 4).await;
        assert_eq!(transport.write(b"abcdefgh").await.unwrap(), 4);
        assert_eq!(transport.stats().bytes_sent, 4);
    }

    #[tokio::test]
    async fn chunked_framing_wraps_each_write() {
        let (mut transport, mut far) = open_pipe(Framing::IppChunked, 1024).await;

        assert_eq!(transport.write(b"hello").await.unwrap(), 5);
        transport.write_async(&[0xAB; 20]).await.unwrap();

        // No response is ever sent, so close gives up after the ack wait.
        let closer = tokio::spawn(async move {
            transport.close().await;
            transport
        });

        let mut expected = b"5\r\nhello\r\n14\r\n".to_vec();
        expected.extend_from_slice(&[0xAB; 20]);
        expected.extend_from_slice(b"\r\n");
        expected.extend_from_slice(IPP_TRAILER);

        let mut received = vec![0u8; expected.len()];
        far.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(far);
        let transport = closer.await.unwrap();
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(transport.stats().bytes_sent, 25);
    }

    #[tokio::test]
    async fn read_loop_delivers_chunks_and_stops() {
        let (mut transport, mut far) = open_pipe(Framing::Passthrough, 1024).await;
        let (tx, mut rx) = mpsc::channel(8);

        transport.start_async_read(tx.clone()).await.unwrap();
        // Second start is a no-op.
        transport.start_async_read(tx).await.unwrap();

        far.write_all(b"status: ready").await.unwrap();
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk, b"status: ready");
        assert_eq!(transport.stats().bytes_received, 13);

        // Sync reads are refused while the loop owns the medium.
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.read(&mut buf).await,
            Err(TransportError::NotSupported(_))
        ));

        transport.stop_async_read().await.unwrap();
        transport.stop_async_read().await.unwrap();
        assert_eq!(transport.last_error(), None);

        far.write_all(b"late").await.unwrap();
        assert_eq!(transport.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"late");
    }

    #[tokio::test]
    async fn read_timeout_surfaces_as_timeout_and_error_state() {
        let far = Arc::new(StdMutex::new(None));
        let mut transport = PortTransport::with_medium(PipeMedium {
            framing: Framing::Passthrough,
            max_transfer: 64,
            far: Arc::clone(&far),
        });
        let config = TransportConfig {
            read_timeout_ms: Some(20),
            ..TransportConfig::loopback()
        };
        transport.open(&config).await.unwrap();

        let mut buf = [0u8; 4];
        let err = transport.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert_eq!(transport.state(), TransportState::Error);
        assert_eq!(transport.last_error(), Some(err));

        // Everything but close is refused from the error state.
        assert_eq!(transport.write(b"x").await, Err(TransportError::NotOpen));

        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(transport.last_error(), None);
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected_at_open() {
        let mut transport = PortTransport::<PipeMedium>::new();
        let config = TransportConfig {
            read_chunk_size: 0,
            ..TransportConfig::loopback()
        };
        let err = transport.open(&config).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameter(_)));
        assert_eq!(transport.state(), TransportState::Closed);
    }
}
