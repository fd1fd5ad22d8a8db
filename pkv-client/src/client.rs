//! # Async Client
//!
//! Purpose: Own the connection lifecycle. Commands submitted before any
//! connection is ready wait in a client-level FIFO and are flushed, in order,
//! the moment a connection becomes ready.
//!
//! ## Design Principles
//! 1. **Single Ready Connection**: At most one connection receives new
//!    commands; a dead one is swapped out by the next `connect`.
//! 2. **Order Preservation**: Flushing the pre-connection queue and
//!    publishing the ready connection happen under one lock, so a command
//!    submitted concurrently can never overtake a queued one.
//! 3. **No Silent Drops**: A command rejected by a connection that just shut
//!    down goes back to the client queue instead of disappearing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

use crate::command::Command;
use crate::commands::Commands;
use crate::config::ClientConfig;
use crate::connection::{self, ConnectionHandle};
use crate::error::{ClientError, ClientResult};
use crate::metrics::{Metrics, MetricsSnapshot};

/// Async client. Cloning shares the same connection and queue.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    metrics: Arc<Metrics>,
    state: Mutex<ClientState>,
}

#[derive(Debug, Default)]
struct ClientState {
    ready: Option<ConnectionHandle>,
    pending: VecDeque<Command>,
}

impl Client {
    /// Creates a client with no connection; commands queue until `connect`.
    pub fn new(config: ClientConfig) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                config,
                metrics: Arc::new(Metrics::new()),
                state: Mutex::new(ClientState::default()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Opens a TCP connection to the configured server and makes it ready.
    ///
    /// Honors `connect_timeout_ms` and `nodelay`. Any commands queued so far
    /// are flushed to the new connection in submission order.
    pub async fn connect(&self) -> ClientResult<ConnectionHandle> {
        let config = &self.inner.config;
        let address = config.address();
        debug!(%address, "connecting");

        let connect = TcpStream::connect((config.host.as_str(), config.port));
        let result = match config.connect_timeout() {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result.map_err(ClientError::from),
                Err(_) => Err(ClientError::ConnectTimeout),
            },
            None => connect.await.map_err(ClientError::from),
        };
        let stream = match result {
            Ok(stream) => stream,
            Err(err) => {
                error!(%address, %err, "connection failed");
                return Err(err);
            }
        };
        stream.set_nodelay(config.nodelay)?;

        info!(%address, "connected");
        Ok(self.attach(stream))
    }

    /// Adopts an established stream as the ready connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach<T>(&self, io: T) -> ConnectionHandle
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let handle = connection::spawn(
            io,
            self.inner.config.read_buffer_size,
            self.inner.metrics.clone(),
            move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner.connection_invalid(id);
                }
            },
        );
        self.inner.connection_ready(handle.clone());
        handle
    }

    /// Closes the ready connection and cancels commands still queued on the
    /// client. Commands already handed to the connection are cancelled by it.
    pub fn close(&self) {
        let (ready, pending) = {
            let mut state = self.inner.lock();
            (state.ready.take(), std::mem::take(&mut state.pending))
        };
        if let Some(connection) = ready {
            info!(connection = connection.id(), "closing connection");
            connection.close();
        }
        for mut command in pending {
            if command.on_connection_lost() {
                self.inner.metrics.record_cancelled(false);
            }
        }
    }

    /// Returns true while a live connection is ready.
    ///
    /// A peer hang-up is noticed when the connection task next polls the
    /// socket, so this can stay true for a moment after the peer closes.
    /// A command dispatched in that window fails with `ConnectionLost`.
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .ready
            .as_ref()
            .map_or(false, |connection| !connection.is_closed())
    }

    /// Commands waiting for a connection.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl Commands for Client {
    fn dispatch(&self, command: Command) {
        self.inner.metrics.record_submitted();
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let command = match state.ready.as_ref() {
            Some(connection) => match connection.enqueue(command) {
                Ok(()) => return,
                Err(command) => {
                    warn!(connection = connection.id(), "connection no longer valid, queueing on client");
                    state.ready = None;
                    command
                }
            },
            None => command,
        };
        trace!(command = command.name(), "waiting for a connection");
        state.pending.push_back(command);
    }
}

impl ClientInner {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().expect("client mutex poisoned")
    }

    fn connection_ready(&self, connection: ConnectionHandle) {
        let mut state = self.lock();
        debug!(
            connection = connection.id(),
            pending = state.pending.len(),
            "connection ready"
        );
        while let Some(command) = state.pending.pop_front() {
            if let Err(command) = connection.enqueue(command) {
                warn!(connection = connection.id(), "connection closed while flushing pending commands");
                state.pending.push_front(command);
                return;
            }
        }
        state.ready = Some(connection);
    }

    fn connection_invalid(&self, id: u64) {
        let mut state = self.lock();
        if state.ready.as_ref().map(ConnectionHandle::id) == Some(id) {
            debug!(connection = id, "connection invalidated");
            state.ready = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_queue_until_connected() {
        let client = Client::new(ClientConfig::default());
        let first = client.command("PING", std::iter::empty::<&str>());
        let second = client.command("ECHO", ["hi"]);
        assert_eq!(client.pending_len(), 2);
        assert!(!client.is_connected());

        client.close();
        assert!(matches!(first.await, Err(ClientError::ConnectionLost)));
        assert!(matches!(second.await, Err(ClientError::ConnectionLost)));
        assert_eq!(client.metrics().cancelled, 2);
    }

    #[tokio::test]
    async fn connect_refused_reports_io_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = Client::new(ClientConfig::new("127.0.0.1", port));
        assert!(matches!(client.connect().await, Err(ClientError::Io(_))));
        assert!(!client.is_connected());
    }
}
