//! # Blocking Facade
//!
//! Purpose: Expose the async client through plain blocking calls for
//! callers that do not run an async runtime themselves.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `BlockingClient` hides the runtime, the connection
//!    task and the protocol behind one struct.
//! 2. **Owned Runtime**: The facade owns a small multi-threaded runtime; the
//!    connection task keeps running between calls so pipelined replies are
//!    read even while the caller is busy.
//! 3. **Queue Semantics**: A blocking pop interrupted by connection loss
//!    reports "nothing popped" instead of failing.

use std::time::Duration;

use bytes::Bytes;
use pkv_common::{Arg, Value};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::client::Client;
use crate::commands::Commands;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::MetricsSnapshot;

/// Synchronous client backed by the async pipelined client.
///
/// Each call submits one command and waits for its reply. Calls from several
/// threads share the connection and are pipelined on it.
pub struct BlockingClient {
    runtime: Runtime,
    client: Client,
}

impl BlockingClient {
    /// Connects to `host:port` with default configuration.
    pub fn connect(host: impl Into<String>, port: u16) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(host, port))
    }

    /// Builds the runtime and connects with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads.max(1))
            .thread_name("pkv-io")
            .enable_all()
            .build()?;
        let client = Client::new(config);
        runtime.block_on(client.connect())?;
        Ok(BlockingClient { runtime, client })
    }

    /// The underlying async client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Opens a fresh connection, e.g. after the previous one was lost.
    pub fn reconnect(&self) -> ClientResult<()> {
        self.runtime.block_on(self.client.connect()).map(|_| ())
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Issues an arbitrary command and returns the raw reply.
    pub fn command<I, A>(&self, name: &str, args: I) -> ClientResult<Value>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.runtime.block_on(self.client.command(name, args))
    }

    pub fn lpush(&self, key: impl Into<Arg>, value: impl Into<Arg>) -> ClientResult<i64> {
        self.runtime.block_on(self.client.lpush(key, value))
    }

    pub fn rpush(&self, key: impl Into<Arg>, value: impl Into<Arg>) -> ClientResult<i64> {
        self.runtime.block_on(self.client.rpush(key, value))
    }

    pub fn lrem(&self, key: impl Into<Arg>, count: i64, value: impl Into<Arg>) -> ClientResult<i64> {
        self.runtime.block_on(self.client.lrem(key, count, value))
    }

    /// Pops from `source` onto `destination`, waiting up to `timeout`
    /// (whole seconds, zero waits forever).
    ///
    /// Returns `Ok(None)` on timeout and also when the connection is lost
    /// while waiting. Nothing reconnects on its own: after a loss,
    /// `is_connected()` is false and later calls wait in the client queue
    /// until `reconnect()` succeeds. Consumer loops should check
    /// `is_connected()` after a `None` and reconnect before popping again.
    pub fn brpoplpush(
        &self,
        source: impl Into<Arg>,
        destination: impl Into<Arg>,
        timeout: Duration,
    ) -> ClientResult<Option<Bytes>> {
        match self
            .runtime
            .block_on(self.client.brpoplpush(source, destination, timeout))
        {
            Err(ClientError::ConnectionLost) => {
                debug!("connection lost during blocking pop");
                Ok(None)
            }
            other => other,
        }
    }

    /// Fetches a value by key. Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: impl Into<Arg>) -> ClientResult<Option<Bytes>> {
        self.runtime.block_on(self.client.get(key))
    }

    pub fn set(&self, key: impl Into<Arg>, value: impl Into<Arg>) -> ClientResult<()> {
        self.runtime.block_on(self.client.set(key, value))
    }

    /// Deletes a key. Returns the number of keys removed.
    pub fn del(&self, key: impl Into<Arg>) -> ClientResult<i64> {
        self.runtime.block_on(self.client.del(key))
    }

    pub fn ping(&self) -> ClientResult<String> {
        self.runtime.block_on(self.client.ping())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.client.metrics()
    }

    /// Closes the connection; outstanding commands fail with
    /// [`ClientError::ConnectionLost`].
    pub fn close(&self) {
        self.client.close();
    }
}

impl Drop for BlockingClient {
    fn drop(&mut self) {
        self.client.close();
    }
}
