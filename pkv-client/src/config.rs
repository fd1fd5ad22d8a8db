//! # Client Configuration
//!
//! Purpose: Describe where the client connects and how its I/O is tuned.
//! Every field has a default so partial JSON files are accepted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Default size of the per-connection read window.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Configuration for the async client and the blocking facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Optional TCP connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Disable Nagle on the socket.
    pub nodelay: bool,
    /// Initial capacity of the read window.
    pub read_buffer_size: usize,
    /// Worker threads of the facade's runtime.
    pub io_threads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout_ms: None,
            nodelay: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            io_threads: 1,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        }
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_json_str(&text)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// `host:port` for logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> ClientResult<()> {
        if self.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if self.io_threads == 0 {
            return Err(ClientError::Config("io_threads must be at least 1".to_string()));
        }
        if self.read_buffer_size == 0 {
            return Err(ClientError::Config("read_buffer_size must be positive".to_string()));
        }
        Ok(())
    }
}
