//! # PipeKV Client
//!
//! Purpose: Provide an asynchronous, pipelined client for Redis-compatible
//! servers speaking RESP2, plus a blocking facade over it.
//!
//! ## Design Principles
//! 1. **Pipelining**: Commands are written back-to-back without waiting for
//!    replies; replies are matched to commands in send order.
//! 2. **Blocking Awareness**: A blocking command stops the send queue until
//!    its reply arrives so no later command waits behind it server-side.
//! 3. **Incremental Parsing**: Replies are decoded as bytes arrive, across
//!    arbitrary read boundaries.
//! 4. **Explicit Failure**: Every submitted command resolves exactly once,
//!    with a value, a server error, or a connection failure.
//!
//! ```text
//! caller ──▶ Client ──(pending FIFO)──▶ ConnectionHandle ──▶ connection task
//!                                                              │  ▲
//!                                                   requests   ▼  │  replies
//!                                                               socket
//! ```

pub mod client;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod facade;
pub mod metrics;

pub use client::Client;
pub use command::{is_blocking_command, Command, Received, Reply, BLOCKING_COMMANDS};
pub use commands::Commands;
pub use config::ClientConfig;
pub use connection::{ConnectionHandle, ConnectionState, ReceiveState, SendState};
pub use error::{ClientError, ClientResult};
pub use facade::BlockingClient;
pub use metrics::{LatencySnapshot, Metrics, MetricsSnapshot};
pub use pkv_common::{Arg, Value};
