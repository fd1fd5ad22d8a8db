//! # Client Errors
//!
//! Purpose: One error type for everything a command or connection can fail
//! with, keeping server-reported errors distinct from transport failures.

use pkv_common::{DecodeError, Value};
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client, its commands and the facade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server answered with an error reply; the connection stays usable.
    #[error("server error: {0}")]
    Server(String),
    /// Connection closed (end of stream, I/O failure or shutdown) before a
    /// reply arrived.
    #[error("connection lost")]
    ConnectionLost,
    /// Reply bytes could not be decoded; the stream is out of sync.
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),
    /// Reply bytes arrived while no command was awaiting one.
    #[error("protocol error: reply received with no command outstanding")]
    UnsolicitedReply,
    /// Network or IO failure while connecting.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Connect attempt did not finish within the configured timeout.
    #[error("connect timed out")]
    ConnectTimeout,
    /// Reply shape did not match what the command returns.
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(Value),
    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true when the error means the connection went away.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::ConnectionLost)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
