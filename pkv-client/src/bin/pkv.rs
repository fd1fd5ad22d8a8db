//! # PipeKV Command Line
//!
//! Purpose: Issue a single command through the blocking client and print the
//! reply, in the spirit of `redis-cli`.
//!
//! Usage: `pkv [--config FILE] [--host HOST] [--port PORT] COMMAND [ARGS...]`
//!
//! Logging is quiet by default; set `RUST_LOG=debug` to trace the connection.

use std::env;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use pkv_client::{BlockingClient, ClientConfig, ClientError, Value};
use tracing::Level;
use tracing_subscriber::EnvFilter;

struct CliArgs {
    config: ClientConfig,
    command: String,
    args: Vec<String>,
}

impl CliArgs {
    fn from_args() -> Result<Self> {
        let mut args = env::args().skip(1);
        let mut config_path = None;
        let mut host = None;
        let mut port = None;
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config_path = Some(args.next().context("--config needs a path")?),
                "--host" => host = Some(args.next().context("--host needs a value")?),
                "--port" => {
                    let raw = args.next().context("--port needs a value")?;
                    port = Some(raw.parse::<u16>().with_context(|| format!("invalid port {raw}"))?);
                }
                "-h" | "--help" => bail!(usage()),
                _ => {
                    positional.push(arg);
                    positional.extend(args.by_ref());
                }
            }
        }

        let mut config = match config_path {
            Some(path) => ClientConfig::from_json_file(&path)?,
            None => ClientConfig::default(),
        };
        if let Some(host) = host {
            config.host = host;
        }
        if let Some(port) = port {
            config.port = port;
        }

        let mut positional = positional.into_iter();
        let command = positional.next().ok_or_else(|| anyhow!(usage()))?;
        Ok(CliArgs {
            config,
            command,
            args: positional.collect(),
        })
    }
}

fn usage() -> &'static str {
    "usage: pkv [--config FILE] [--host HOST] [--port PORT] COMMAND [ARGS...]"
}

/// Renders a reply the way `redis-cli` does.
fn render(value: &Value, indent: usize, out: &mut String) {
    match value {
        Value::Integer(n) => out.push_str(&format!("(integer) {n}")),
        Value::SimpleString(text) => out.push_str(text),
        Value::Error(message) => out.push_str(&format!("(error) {message}")),
        Value::BulkString(None) | Value::Array(None) => out.push_str("(nil)"),
        Value::BulkString(Some(data)) => {
            out.push_str(&format!("\"{}\"", String::from_utf8_lossy(data).escape_debug()))
        }
        Value::Array(Some(items)) if items.is_empty() => out.push_str("(empty array)"),
        Value::Array(Some(items)) => {
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let label = format!("{}) ", idx + 1);
                out.push_str(&label);
                render(item, indent + label.len(), out);
            }
        }
    }
}

fn run() -> Result<()> {
    let cli = CliArgs::from_args()?;
    let address = cli.config.address();
    let client = BlockingClient::with_config(cli.config)
        .with_context(|| format!("could not connect to {address}"))?;

    let mut out = String::new();
    match client.command(&cli.command, cli.args.iter().map(String::as_str)) {
        Ok(value) => render(&value, 0, &mut out),
        Err(ClientError::Server(message)) => render(&Value::Error(message), 0, &mut out),
        Err(err) => return Err(err.into()),
    }
    println!("{out}");
    client.close();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(value: Value) -> String {
        let mut out = String::new();
        render(&value, 0, &mut out);
        out
    }

    #[test]
    fn renders_scalars() {
        assert_eq!(rendered(Value::Integer(3)), "(integer) 3");
        assert_eq!(rendered(Value::simple("OK")), "OK");
        assert_eq!(rendered(Value::BulkString(None)), "(nil)");
        assert_eq!(rendered(Value::bulk("a\nb")), "\"a\\nb\"");
    }

    #[test]
    fn renders_nested_arrays() {
        let value = Value::Array(Some(vec![
            Value::bulk("a"),
            Value::Array(Some(vec![Value::Integer(1), Value::Integer(2)])),
        ]));
        assert_eq!(rendered(value), "1) \"a\"\n2) 1) (integer) 1\n   2) (integer) 2");
    }
}
