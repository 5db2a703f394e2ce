//! Transport adapters used by a bridge session.
//!
//! The session only talks to these traits: a browser side split into a frame
//! source and a frame sink, and a backend side split into a line reader and a
//! byte writer. Real adapters wrap an axum `WebSocket` and a telnet-style TCP
//! stream; tests plug in in-memory fakes.

mod backend;
mod browser;
mod telnet;

pub use backend::{dial, BackendReader, BackendWriter};
pub use browser::{split_websocket, WsSink, WsSource};
pub use telnet::{escape_iac, TelnetDecoder};

use async_trait::async_trait;
use std::sync::Arc;

/// Error from either transport. Every variant is fatal for the session that sees it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("line exceeds {0} bytes without a delimiter")]
    LineTooLong(usize),
    #[error("connection closed")]
    Closed,
}

/// Frame written to the browser. The bridge never emits binary frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Close,
}

/// Callback fired whenever the browser acknowledges a ping.
pub type PongHook = Arc<dyn Fn() + Send + Sync>;

/// Read half of the browser transport.
#[async_trait]
pub trait BrowserSource: Send {
    /// Install the pong acknowledgment hook. Called once, before any read.
    fn on_pong(&mut self, hook: PongHook);

    /// Next data payload (text or binary, byte-for-byte). Control frames are
    /// handled inside the adapter; a close frame or end of stream is `Closed`.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Write half of the browser transport.
#[async_trait]
pub trait BrowserSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of the backend transport.
#[async_trait]
pub trait LineSource: Send {
    /// Next line with the `\n` delimiter stripped.
    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Write half of the backend transport.
#[async_trait]
pub trait LineSink: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}
