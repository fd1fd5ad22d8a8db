//! # Outstanding Commands
//!
//! Purpose: Carry one request from submission to resolution: its marshalled
//! bytes, its blocking classification, a decoder dedicated to its reply, and
//! the single-assignment slot the caller awaits.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──▶ queued ──▶ sent ──▶ resolved (value | server error | protocol error)
//!            │          │
//!            └──────────┴──▶ cancelled (connection lost)
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::{Buf, Bytes};
use pkv_common::{marshal, Arg, DecodeResult, Decoder, Value};
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::{ClientError, ClientResult};

/// Commands that may hold their reply back server-side until data arrives.
///
/// While one of these is the oldest unanswered command, nothing else may be
/// written to the connection.
pub const BLOCKING_COMMANDS: &[&str] = &[
    "BLPOP",
    "BRPOP",
    "BRPOPLPUSH",
    "BLMOVE",
    "BLMPOP",
    "BZPOPMIN",
    "BZPOPMAX",
    "BZMPOP",
    "WAIT",
    "WAITAOF",
];

/// Returns true when `name` is one of [`BLOCKING_COMMANDS`], ignoring case.
pub fn is_blocking_command(name: &str) -> bool {
    BLOCKING_COMMANDS
        .iter()
        .any(|blocking| blocking.eq_ignore_ascii_case(name))
}

/// Progress reported after feeding reply bytes to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// The reply needs more bytes.
    Incomplete,
    /// A value reply arrived and the handle resolved with it.
    Reply,
    /// An error reply arrived and the handle resolved with its text.
    ErrorReply,
}

impl Received {
    pub fn is_complete(self) -> bool {
        self != Received::Incomplete
    }
}

/// One request awaiting transmission or reply.
pub struct Command {
    name: String,
    bytes: Bytes,
    blocking: bool,
    decoder: Decoder,
    reply: Option<oneshot::Sender<ClientResult<Value>>>,
    sent_at: Option<Instant>,
}

impl Command {
    /// Marshals a command and creates the handle its caller awaits.
    pub fn new<I, A>(name: &str, args: I) -> (Command, Reply)
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args: Vec<Arg> = args.into_iter().map(Into::into).collect();
        let (tx, rx) = oneshot::channel();
        let command = Command {
            name: name.to_string(),
            bytes: marshal(name, &args),
            blocking: is_blocking_command(name),
            decoder: Decoder::new(),
            reply: Some(tx),
            sent_at: None,
        };
        (command, Reply { rx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marshalled request bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Returns true once the handle has been resolved or cancelled.
    pub fn is_resolved(&self) -> bool {
        self.reply.is_none()
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent_at = Some(Instant::now());
    }

    pub(crate) fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    /// Feeds reply bytes to this command's decoder.
    ///
    /// Consumes only the bytes of this command's reply. When the reply is
    /// complete the handle resolves: error replies become
    /// [`ClientError::Server`], everything else is passed through. A decode
    /// error resolves the handle with [`ClientError::Protocol`] and is
    /// returned so the connection can shut down.
    pub fn on_bytes<B: Buf>(&mut self, buf: &mut B) -> DecodeResult<Received> {
        match self.decoder.decode(buf) {
            Ok(None) => Ok(Received::Incomplete),
            Ok(Some(Value::Error(message))) => {
                self.resolve(Err(ClientError::Server(message)));
                Ok(Received::ErrorReply)
            }
            Ok(Some(value)) => {
                self.resolve(Ok(value));
                Ok(Received::Reply)
            }
            Err(err) => {
                self.resolve(Err(ClientError::Protocol(err.clone())));
                Err(err)
            }
        }
    }

    /// Cancels the command. Returns false if it had already resolved.
    pub fn on_connection_lost(&mut self) -> bool {
        self.resolve(Err(ClientError::ConnectionLost))
    }

    fn resolve(&mut self, result: ClientResult<Value>) -> bool {
        match self.reply.take() {
            Some(tx) => {
                // The caller may have dropped its handle; that is not an error.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("blocking", &self.blocking)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Completion handle for a submitted command.
///
/// Resolves with the decoded reply. A command dropped without resolution
/// (its connection task died) resolves with [`ClientError::ConnectionLost`].
/// Dropping the handle does not cancel the command.
#[derive(Debug)]
pub struct Reply {
    rx: oneshot::Receiver<ClientResult<Value>>,
}

impl Reply {
    /// Takes the result if it is already available.
    pub fn try_take(&mut self) -> Option<ClientResult<Value>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(ClientError::ConnectionLost)),
        }
    }
}

impl Future for Reply {
    type Output = ClientResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::ConnectionLost)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, args: &[&str]) -> (Command, Reply) {
        Command::new(name, args.iter().copied())
    }

    #[test]
    fn marshals_at_construction() {
        let (cmd, _reply) = command("SET", &["a", "b"]);
        assert_eq!(&cmd.bytes()[..], b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nb\r\n");
        assert!(!cmd.is_blocking());
    }

    #[test]
    fn classifies_blocking_by_name() {
        assert!(command("BRPOPLPUSH", &["a", "b", "1"]).0.is_blocking());
        assert!(command("blpop", &["a", "0"]).0.is_blocking());
        // A leading 'B' alone does not make a command blocking.
        assert!(!command("BITCOUNT", &["a"]).0.is_blocking());
        assert!(!command("GET", &["a"]).0.is_blocking());
    }

    #[test]
    fn resolves_with_value() {
        let (mut cmd, mut reply) = command("GET", &["k"]);
        let mut first: &[u8] = b"$3\r\nfo";
        assert_eq!(cmd.on_bytes(&mut first).unwrap(), Received::Incomplete);
        assert!(reply.try_take().is_none());

        let mut rest: &[u8] = b"o\r\n:1\r\n";
        assert_eq!(cmd.on_bytes(&mut rest).unwrap(), Received::Reply);
        assert_eq!(rest, b":1\r\n");
        assert_eq!(reply.try_take().unwrap().unwrap(), Value::bulk("foo"));
    }

    #[test]
    fn error_reply_resolves_with_server_error() {
        let (mut cmd, mut reply) = command("GET", &["k"]);
        let mut input: &[u8] = b"-ERR no such key\r\n";
        assert_eq!(cmd.on_bytes(&mut input).unwrap(), Received::ErrorReply);
        match reply.try_take().unwrap() {
            Err(ClientError::Server(message)) => assert_eq!(message, "ERR no such key"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_failure_resolves_with_protocol_error() {
        let (mut cmd, mut reply) = command("GET", &["k"]);
        let mut input: &[u8] = b"?";
        assert!(cmd.on_bytes(&mut input).is_err());
        assert!(matches!(reply.try_take(), Some(Err(ClientError::Protocol(_)))));
    }

    #[test]
    fn connection_loss_resolves_once() {
        let (mut cmd, mut reply) = command("GET", &["k"]);
        assert!(cmd.on_connection_lost());
        assert!(!cmd.on_connection_lost());
        assert!(matches!(reply.try_take(), Some(Err(ClientError::ConnectionLost))));
    }

    #[test]
    fn late_reply_after_cancel_is_ignored() {
        let (mut cmd, mut reply) = command("GET", &["k"]);
        cmd.on_connection_lost();
        let mut input: &[u8] = b"+OK\r\n";
        assert_eq!(cmd.on_bytes(&mut input).unwrap(), Received::Reply);
        assert!(matches!(reply.try_take(), Some(Err(ClientError::ConnectionLost))));
    }

    #[tokio::test]
    async fn dropped_command_reports_connection_lost() {
        let (cmd, reply) = command("PING", &[]);
        drop(cmd);
        assert!(matches!(reply.await, Err(ClientError::ConnectionLost)));
    }
}
