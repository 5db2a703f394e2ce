//! TCP connection to the line-based backend server.

use super::telnet::{escape_iac, TelnetDecoder};
use super::{LineSink, LineSource, TransportError};
use crate::session::SessionError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const READ_CHUNK: usize = 1024;

/// Longest backend line accepted before the connection is treated as broken.
pub const MAX_LINE: usize = 64 * 1024;

/// Connect to `addr`, giving up after `timeout`.
pub async fn dial(
    addr: &str,
    timeout: Duration,
) -> Result<(BackendReader, BackendWriter), SessionError> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(SessionError::Dial {
                addr: addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(SessionError::DialTimeout {
                addr: addr.to_string(),
                timeout,
            })
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("backend {}: set_nodelay failed: {}", addr, e);
    }
    let (read, write) = stream.into_split();
    Ok((BackendReader::new(read), BackendWriter::new(write)))
}

/// Reads telnet-decoded lines from the backend.
pub struct BackendReader {
    half: OwnedReadHalf,
    decoder: TelnetDecoder,
    /// Decoded bytes not yet returned as a line.
    pending: Vec<u8>,
}

impl BackendReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            decoder: TelnetDecoder::new(),
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        Some(line)
    }
}

#[async_trait]
impl LineSource for BackendReader {
    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            if self.pending.len() > MAX_LINE {
                return Err(TransportError::LineTooLong(MAX_LINE));
            }
            let n = self.half.read(&mut chunk).await?;
            if n == 0 {
                if !self.pending.is_empty() {
                    log::trace!("backend closed with {} undelimited bytes", self.pending.len());
                }
                return Err(TransportError::Closed);
            }
            self.decoder.feed(&chunk[..n], &mut self.pending);
        }
    }
}

/// Writes raw bytes to the backend, escaping telnet IAC.
pub struct BackendWriter {
    half: OwnedWriteHalf,
}

impl BackendWriter {
    fn new(half: OwnedWriteHalf) -> Self {
        Self { half }
    }
}

#[async_trait]
impl LineSink for BackendWriter {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.half.write_all(&escape_iac(bytes)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.half.shutdown().await?;
        Ok(())
    }
}
