//! linebridge core library: relays browser WebSocket sessions to a line-based
//! telnet game server, plus the gateway and configuration used by the CLI.

pub mod config;
pub mod gateway;
pub mod init;
pub mod session;
pub mod transport;

pub use session::{DialedBackend, Session, SessionError, SessionHandle, SessionSettings};
