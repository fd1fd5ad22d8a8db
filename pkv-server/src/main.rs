//! # Server Entry Point
//!
//! Usage: `pkv-server [ADDR]` (default `127.0.0.1:6379`).
//! Log verbosity follows `RUST_LOG` and defaults to `info`.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use pkv_server::{serve, Store, DEFAULT_BIND};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = env::args().nth(1).unwrap_or_else(|| DEFAULT_BIND.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let store = Arc::new(Store::new());
    tokio::select! {
        result = serve(listener, store) => result.context("accept loop failed")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}
