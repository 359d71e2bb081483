// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Wire framing applied by the writer task.
//
// Most media pass payload bytes through untouched.  LPR sends its job
// preamble at open and needs nothing per write; IPP wraps every write in one
// HTTP/1.1 chunk and terminates the body at close.

use std::time::Duration;

use tokio::io::AsyncRead;

use portmaster_core::error::TransportError;

use crate::{ipp, lpr};

/// Terminating chunk of a chunked HTTP body.
pub(crate) const IPP_TRAILER: &[u8] = b"0\r\n\r\n";

/// How payload bytes are put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// Bytes go out as given.
    #[default]
    Passthrough,
    /// RFC 1179 data file streamed after the handshake; final ack at close.
    Lpr,
    /// IPP Print-Job document data as HTTP/1.1 chunks.
    IppChunked,
}

/// One framed write ready for the writer task.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub bytes: Vec<u8>,
    /// Payload bytes represented by `bytes`, before framing.
    pub payload_len: usize,
    /// Write everything (`write_all`) instead of a single partial write.
    pub whole: bool,
}

impl Framing {
    /// Frame `data` for the wire.
    ///
    /// A synchronous write (`whole == false`) is a single medium write of at
    /// most `max_transfer` bytes and may be partial.  Chunked framing always
    /// sends the complete chunk since a partial chunk cannot be resumed.
    pub(crate) fn outgoing(&self, data: &[u8], max_transfer: usize, whole: bool) -> Outgoing {
        match self {
            Self::IppChunked => Outgoing {
                bytes: ipp::encode_chunk(data),
                payload_len: data.len(),
                whole: true,
            },
            Self::Passthrough | Self::Lpr => {
                let bytes = if whole {
                    data.to_vec()
                } else {
                    data[..data.len().min(max_transfer)].to_vec()
                };
                Outgoing {
                    payload_len: bytes.len(),
                    bytes,
                    whole,
                }
            }
        }
    }

    /// Bytes written after the last payload write.
    pub(crate) fn trailer(&self) -> Option<&'static [u8]> {
        match self {
            Self::IppChunked => Some(IPP_TRAILER),
            Self::Passthrough | Self::Lpr => None,
        }
    }

    /// Whether the printer's reply belongs to [`acknowledge`](Self::acknowledge).
    /// Caller reads would swallow the LPR ack or the IPP response.
    pub(crate) fn reserves_reader(&self) -> bool {
        matches!(self, Self::Lpr | Self::IppChunked)
    }

    /// Wait for the printer's verdict on the finished job.
    pub(crate) async fn acknowledge<R>(&self, reader: &mut R, wait: Duration) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
    {
        match self {
            Self::Passthrough => Ok(()),
            Self::Lpr => lpr::read_final_ack(reader, wait).await,
            Self::IppChunked => ipp::read_print_job_response(reader, wait).await,
        }
    }
}
