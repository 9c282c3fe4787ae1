//! ADB smart-socket framing.
//!
//! Requests are a 4-digit lowercase hex length followed by the payload.
//! Replies open with a 4-byte status, `OKAY` or `FAIL`; a `FAIL` carries a
//! length-prefixed message. Host commands that return data add another
//! length-prefixed body after `OKAY`. Once a device service (`shell:`,
//! `exec-out:`) has been accepted, the socket carries raw unframed output until
//! the server closes it.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Status token for an accepted request.
pub const OKAY: &[u8; 4] = b"OKAY";

/// Status token for a rejected request.
pub const FAIL: &[u8; 4] = b"FAIL";

/// Largest payload a 4-hex-digit header can describe.
pub const MAX_PAYLOAD_LEN: usize = 0xffff;

const READ_CHUNK: usize = 4096;

/// ADB protocol and transport errors.
#[derive(Error, Debug)]
pub enum AdbError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ADB server rejected request: {0}")]
    Rejected(String),
    #[error("Unexpected response status: {0:?}")]
    UnexpectedStatus(String),
    #[error("Invalid length header: {0:?}")]
    InvalidLength(String),
    #[error("Request payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Service produced no output")]
    EmptyOutput,
}

/// Frame a request: `{len:04x}{payload}`.
pub fn encode_request(payload: &str) -> Result<Vec<u8>, AdbError> {
    let len = payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(AdbError::PayloadTooLarge(len));
    }

    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(format!("{:04x}", len).as_bytes());
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// Write one framed request.
pub async fn send_request<W>(writer: &mut W, payload: &str) -> Result<(), AdbError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_request(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a 4-digit hex length header.
pub async fn read_length<R>(reader: &mut R) -> Result<usize, AdbError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    let text = String::from_utf8_lossy(&header).into_owned();
    usize::from_str_radix(&text, 16).map_err(|_| AdbError::InvalidLength(text))
}

/// Read a length-prefixed body.
pub async fn read_length_prefixed<R>(reader: &mut R) -> Result<Vec<u8>, AdbError>
where
    R: AsyncRead + Unpin,
{
    let len = read_length(reader).await?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Read the status token and turn `FAIL` into [`AdbError::Rejected`].
pub async fn read_status<R>(reader: &mut R) -> Result<(), AdbError>
where
    R: AsyncRead + Unpin,
{
    let mut status = [0u8; 4];
    reader.read_exact(&mut status).await?;

    if &status == OKAY {
        return Ok(());
    }

    if &status == FAIL {
        let message = match read_length_prefixed(reader).await {
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(e) => format!("<unreadable failure message: {}>", e),
        };
        return Err(AdbError::Rejected(message));
    }

    Err(AdbError::UnexpectedStatus(
        String::from_utf8_lossy(&status).into_owned(),
    ))
}

/// Drain the raw service stream until the peer closes the connection.
///
/// A read error after some output has arrived ends the stream with what was
/// collected so far; an error before any output is returned.
pub async fn read_until_eof<R>(reader: &mut R) -> Result<Vec<u8>, AdbError>
where
    R: AsyncRead + Unpin,
{
    let mut output = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&chunk[..n]),
            Err(e) if output.is_empty() => return Err(e.into()),
            Err(e) => {
                tracing::debug!("Service stream ended with error after {} bytes: {}", output.len(), e);
                break;
            }
        }
    }

    Ok(output)
}
