// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP Print-Job framing (RFC 8010 / RFC 8011) over HTTP/1.1.
//
// Opening the network transport in IPP mode sends the HTTP request head with
// `Transfer-Encoding: chunked` and the binary Print-Job operation as the
// first chunk.  Each payload write afterwards becomes one chunk of document
// data; close sends the terminating chunk and reads the printer's response.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use portmaster_core::config::TransportConfig;
use portmaster_core::error::TransportError;

// -- Encoding constants (RFC 8010) --

pub(crate) const IPP_VERSION_MAJOR: u8 = 0x01;
pub(crate) const IPP_VERSION_MINOR: u8 = 0x01;

pub(crate) const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;
pub(crate) const TAG_END_OF_ATTRIBUTES: u8 = 0x03;

const VALUE_TAG_NAME: u8 = 0x42;
const VALUE_TAG_URI: u8 = 0x45;
const VALUE_TAG_CHARSET: u8 = 0x47;
const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;
const VALUE_TAG_MIME_MEDIA_TYPE: u8 = 0x49;

pub(crate) const OP_PRINT_JOB: u16 = 0x0002;

/// First client-error status code; everything before it counts as accepted.
const STATUS_CLIENT_ERROR_FIRST: u16 = 0x0400;

/// Give up looking for a response head after this many bytes.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

static NEXT_REQUEST_ID: AtomicU32 = AtomicU32::new(1);

// ---------------------------------------------------------------------------
// Request builder
// ---------------------------------------------------------------------------

/// Builder for binary IPP operation requests.
pub(crate) struct IppRequestBuilder {
    buf: Vec<u8>,
}

impl IppRequestBuilder {
    pub(crate) fn new(operation_id: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(IPP_VERSION_MAJOR);
        buf.push(IPP_VERSION_MINOR);
        buf.extend_from_slice(&operation_id.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        Self { buf }
    }

    pub(crate) fn begin_group(&mut self, delimiter: u8) -> &mut Self {
        self.buf.push(delimiter);
        self
    }

    pub(crate) fn charset(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_CHARSET, name, value.as_bytes())
    }

    pub(crate) fn natural_language(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NATURAL_LANGUAGE, name, value.as_bytes())
    }

    pub(crate) fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_URI, name, value.as_bytes())
    }

    pub(crate) fn name_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NAME, name, value.as_bytes())
    }

    pub(crate) fn mime_type(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_MIME_MEDIA_TYPE, name, value.as_bytes())
    }

    /// value-tag, name-length, name, value-length, value.  Lengths are
    /// 16-bit on the wire; longer values are truncated.
    fn write_attr(&mut self, value_tag: u8, name: &str, value: &[u8]) -> &mut Self {
        let name = &name.as_bytes()[..name.len().min(u16::MAX as usize)];
        let value = &value[..value.len().min(u16::MAX as usize)];
        self.buf.push(value_tag);
        self.buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(name);
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        self.buf.push(TAG_END_OF_ATTRIBUTES);
        self.buf
    }
}

/// The Print-Job operation sent ahead of the document data.
pub(crate) fn print_job_request(request_id: u32, printer_uri: &str, config: &TransportConfig) -> Vec<u8> {
    let mut builder = IppRequestBuilder::new(OP_PRINT_JOB, request_id);
    builder
        .begin_group(TAG_OPERATION_ATTRIBUTES)
        .charset("attributes-charset", "utf-8")
        .natural_language("attributes-natural-language", "en")
        .uri("printer-uri", printer_uri)
        .name_attr("requesting-user-name", &config.user_name)
        .name_attr("job-name", &config.job_name)
        .mime_type("document-format", "application/octet-stream");
    builder.build()
}

/// `ipp://host:port/path` for the configured printer.
pub(crate) fn printer_uri(host: &str, port: u16, path: &str) -> String {
    format!("ipp://{host}:{port}{path}")
}

pub(crate) fn http_head(host: &str, port: u16, path: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Content-Type: application/ipp\r\n\
         Transfer-Encoding: chunked\r\n\
         User-Agent: portmaster\r\n\
         Connection: close\r\n\r\n"
    )
}

/// One HTTP/1.1 chunk: hex length, CRLF, data, CRLF.
pub(crate) fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(data.len() + 12);
    chunk.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    chunk.extend_from_slice(data);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// Send the HTTP head and the Print-Job operation.  Returns the request id.
pub(crate) async fn begin_print_job<W>(
    writer: &mut W,
    host: &str,
    port: u16,
    config: &TransportConfig,
) -> Result<u32, TransportError>
where
    W: AsyncWrite + Unpin,
{
    if !config.ipp_path.starts_with('/') {
        return Err(TransportError::InvalidParameter(format!(
            "IPP resource path {:?} must start with '/'",
            config.ipp_path
        )));
    }

    let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let uri = printer_uri(host, port, &config.ipp_path);
    let operation = print_job_request(request_id, &uri, config);

    let mut preamble = http_head(host, port, &config.ipp_path).into_bytes();
    preamble.extend_from_slice(&encode_chunk(&operation));

    writer
        .write_all(&preamble)
        .await
        .map_err(|e| TransportError::io("IPP request head", e))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::io("IPP request head", e))?;

    info!(request_id, printer = %uri, "IPP Print-Job started");
    Ok(request_id)
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResponseStatus {
    pub http: u16,
    pub ipp: Option<u16>,
}

/// Parse as much of an HTTP response carrying IPP as `data` allows.
///
/// Returns `None` while more bytes are needed.  With `complete` set (the
/// peer stopped sending) whatever was found is returned.
pub(crate) fn parse_response(data: &[u8], complete: bool) -> Option<ResponseStatus> {
    let header_end = find_subsequence(data, b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&data[..header_end]);
    let http = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())?;

    let chunked = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("transfer-encoding:") && line.contains("chunked")
    });

    let mut body = &data[header_end + 4..];
    if chunked {
        match find_subsequence(body, b"\r\n") {
            Some(size_end) => body = &body[size_end + 2..],
            None if complete => return Some(ResponseStatus { http, ipp: None }),
            None => return None,
        }
    }

    if body.len() >= 4 {
        let ipp = u16::from_be_bytes([body[2], body[3]]);
        Some(ResponseStatus { http, ipp: Some(ipp) })
    } else if complete {
        Some(ResponseStatus { http, ipp: None })
    } else {
        None
    }
}

async fn read_response_head<R>(reader: &mut R) -> std::io::Result<Option<ResponseStatus>>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(status) = parse_response(&data, false) {
            return Ok(Some(status));
        }
        if data.len() >= MAX_RESPONSE_HEAD {
            return Ok(parse_response(&data, true));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(parse_response(&data, true));
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

/// Read the printer's response to the Print-Job request.
pub(crate) async fn read_print_job_response<R>(reader: &mut R, wait: Duration) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let status = match tokio::time::timeout(wait, read_response_head(reader)).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(TransportError::io("IPP response", e)),
        Err(_) => {
            return Err(TransportError::Timeout(format!(
                "no IPP response within {} ms",
                wait.as_millis()
            )));
        }
    };

    let Some(status) = status else {
        return Err(TransportError::IoFailure(
            "connection closed before an IPP response arrived".into(),
        ));
    };

    if !(200..300).contains(&status.http) {
        warn!(http = status.http, "IPP printer refused the request");
        return Err(TransportError::IoFailure(format!(
            "IPP printer answered HTTP {}",
            status.http
        )));
    }
    match status.ipp {
        Some(code) if code >= STATUS_CLIENT_ERROR_FIRST => {
            warn!(status = %format!("0x{code:04x}"), "IPP printer rejected the job");
            Err(TransportError::IoFailure(format!(
                "IPP printer rejected the job (status 0x{code:04x})"
            )))
        }
        _ => {
            debug!(http = status.http, ipp = ?status.ipp, "IPP printer accepted the job");
            Ok(())
        }
    }
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
