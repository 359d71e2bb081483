// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// LPR/LPD job framing (RFC 1179).
//
// The job preamble is sent when the network transport opens: "receive a
// printer job", the control file, then a data-file header.  The header
// announces a length of zero, which LPD servers (LPRng, CUPS-lpd) treat as
// "read until the connection is half-closed", so the payload can be
// streamed through ordinary writes without knowing its size in advance.
// Close shuts the write side down and waits for the final ack.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use portmaster_core::config::TransportConfig;
use portmaster_core::error::TransportError;

/// Host name announced in the control file.
pub(crate) const CLIENT_HOST: &str = "portmaster";

static NEXT_JOB: AtomicU32 = AtomicU32::new(1);

/// Three-digit LPD job number, wrapping at 1000.
fn next_job_number() -> u32 {
    NEXT_JOB.fetch_add(1, Ordering::Relaxed) % 1000
}

/// Control-file lines may not contain line breaks or other control bytes.
fn line_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn validate_queue(queue: &str) -> Result<(), TransportError> {
    if queue.is_empty() {
        return Err(TransportError::InvalidParameter("LPR queue name is empty".into()));
    }
    if queue.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(TransportError::InvalidParameter(format!(
            "LPR queue name {queue:?} contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// Control file for job `job`: host, user, job name, and a single
/// binary-mode (`l`) print of data file `dfA<job><host>`.
pub(crate) fn control_file(job: u32, config: &TransportConfig) -> String {
    let user = line_value(&config.user_name);
    let name = line_value(&config.job_name);
    format!(
        "H{CLIENT_HOST}\nP{user}\nJ{name}\nldfA{job:03}{CLIENT_HOST}\nUdfA{job:03}{CLIENT_HOST}\nN{name}\n"
    )
}

async fn expect_ack<R>(reader: &mut R, step: &str) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut ack = [0u8; 1];
    reader
        .read_exact(&mut ack)
        .await
        .map_err(|e| TransportError::io(format!("LPR {step} ack"), e))?;
    if ack[0] != 0 {
        return Err(TransportError::IoFailure(format!(
            "LPR printer rejected {step} (code {})",
            ack[0]
        )));
    }
    Ok(())
}

async fn send<W>(writer: &mut W, bytes: &[u8], step: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(bytes)
        .await
        .map_err(|e| TransportError::io(format!("LPR {step}"), e))
}

/// Announce a job on `queue` and leave the connection ready for streamed
/// document data.  Returns the job number used.
pub(crate) async fn begin_job<R, W>(
    reader: &mut R,
    writer: &mut W,
    config: &TransportConfig,
) -> Result<u32, TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    validate_queue(&config.lpr_queue)?;
    let job = next_job_number();

    // 0x02 queue LF: receive a printer job
    send(writer, format!("\x02{}\n", config.lpr_queue).as_bytes(), "receive-job").await?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::io("LPR receive-job", e))?;
    expect_ack(reader, "receive-job").await?;

    let control = control_file(job, config);
    let header = format!("\x02{} cfA{job:03}{CLIENT_HOST}\n", control.len());
    send(writer, header.as_bytes(), "control header").await?;
    expect_ack(reader, "control header").await?;

    let mut body = control.into_bytes();
    body.push(0);
    send(writer, &body, "control file").await?;
    expect_ack(reader, "control file").await?;

    // Length 0: data runs until the write side is shut down.
    let header = format!("\x030 dfA{job:03}{CLIENT_HOST}\n");
    send(writer, header.as_bytes(), "data header").await?;
    expect_ack(reader, "data header").await?;

    info!(job, queue = %config.lpr_queue, "LPR job announced");
    Ok(job)
}

/// Read the ack that follows the end of the data file.
pub(crate) async fn read_final_ack<R>(reader: &mut R, wait: Duration) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut ack = [0u8; 1];
    match tokio::time::timeout(wait, reader.read_exact(&mut ack)).await {
        Ok(Ok(_)) if ack[0] == 0 => {
            debug!("LPR printer accepted the job");
            Ok(())
        }
        Ok(Ok(_)) => {
            warn!(code = ack[0], "LPR printer returned non-zero ack after data transfer");
            Err(TransportError::IoFailure(format!(
                "LPR printer rejected the data file (code {})",
                ack[0]
            )))
        }
        Ok(Err(e)) => Err(TransportError::io("LPR final ack", e)),
        Err(_) => Err(TransportError::Timeout(format!(
            "no LPR final ack within {} ms",
            wait.as_millis()
        ))),
    }
}
