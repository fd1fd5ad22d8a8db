//! # PipeKV Server Simulator
//!
//! Purpose: A small in-memory server speaking enough RESP2 to exercise the
//! client end to end: strings, lists, and the blocking list move a reliable
//! work queue is built on.
//!
//! ## Design Principles
//! 1. **Task per Connection**: Each client gets its own task; the store is
//!    shared behind an `Arc`.
//! 2. **Shared Codec**: Requests are decoded and replies encoded with the
//!    same `pkv-common` codec the client uses.
//! 3. **Ordered Replies**: A connection answers strictly in request order.

pub mod server;
pub mod store;

pub use server::{handle_connection, serve};
pub use store::{Store, StoreError, StoreResult};

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:6379";
