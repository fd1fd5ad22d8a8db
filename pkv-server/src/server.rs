//! # TCP Server
//!
//! Accept RESP2 connections, decode request arrays, and dispatch them to the
//! shared store. Replies are written in request order; a blocking pop holds
//! back the replies of everything pipelined behind it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pkv_common::{Decoder, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};

use crate::store::{Store, StoreError};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Accepts connections forever, one task per connection.
pub async fn serve(listener: TcpListener, store: Arc<Store>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let store = store.clone();
        tokio::spawn(async move {
            debug!(%peer, "client connected");
            match handle_connection(stream, store).await {
                Ok(()) => debug!(%peer, "client disconnected"),
                Err(err) => warn!(%peer, %err, "connection error"),
            }
        });
    }
}

/// What a request resolves to once dispatched.
enum Action {
    Reply(Value),
    /// Wait for an element to move, then reply with it.
    BlockingPop {
        source: Bytes,
        destination: Bytes,
        timeout: Option<Duration>,
    },
}

/// Handles a single client connection until it closes.
pub async fn handle_connection<S>(mut stream: S, store: Arc<Store>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut decoder = Decoder::new();
    let mut out = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }

        loop {
            let request = match decoder.decode(&mut buffer) {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "malformed request");
                    out.clear();
                    Value::error(format!("ERR Protocol error: {}", err)).encode_into(&mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            };

            let reply = match request_args(request) {
                Ok(args) => match dispatch(&args, &store) {
                    Action::Reply(reply) => reply,
                    Action::BlockingPop {
                        source,
                        destination,
                        timeout,
                    } => {
                        let pop = store.brpoplpush(&source, &destination, timeout);
                        match wait_or_hangup(&mut stream, &mut buffer, pop).await? {
                            Some(result) => pop_reply(result),
                            None => return Ok(()),
                        }
                    }
                },
                Err(reply) => reply,
            };

            out.clear();
            reply.encode_into(&mut out);
            stream.write_all(&out).await?;
        }
    }
}

/// Awaits `pop` while still reading the socket, so a client that hangs up
/// during a blocking pop is noticed and no element is moved on its behalf.
/// Bytes pipelined meanwhile are kept in `buffer`.
async fn wait_or_hangup<S, F, T>(stream: &mut S, buffer: &mut BytesMut, pop: F) -> io::Result<Option<T>>
where
    S: AsyncRead + Unpin,
    F: std::future::Future<Output = T>,
{
    tokio::pin!(pop);
    loop {
        tokio::select! {
            result = &mut pop => return Ok(Some(result)),
            read = stream.read_buf(buffer) => {
                if read? == 0 {
                    debug!("client closed during blocking pop");
                    return Ok(None);
                }
            }
        }
    }
}

fn request_args(request: Value) -> Result<Vec<Bytes>, Value> {
    let items = match request {
        Value::Array(Some(items)) if !items.is_empty() => items,
        _ => return Err(Value::error("ERR Protocol error: expected a command array")),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::BulkString(Some(data)) => Ok(data),
            _ => Err(Value::error("ERR Protocol error: expected bulk string arguments")),
        })
        .collect()
}

fn dispatch(args: &[Bytes], store: &Store) -> Action {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    trace!(command = %name, args = args.len() - 1, "dispatch");

    let reply = match name.as_str() {
        "PING" => handle_ping(args),
        "ECHO" => arity(args, 2, |args| Value::BulkString(Some(args[1].clone()))),
        "GET" => arity(args, 2, |args| match store.get(&args[1]) {
            Ok(value) => Value::BulkString(value),
            Err(err) => store_error(err),
        }),
        "SET" => arity(args, 3, |args| {
            store.set(args[1].clone(), args[2].clone());
            Value::simple("OK")
        }),
        "DEL" if args.len() >= 2 => Value::Integer(store.del(&args[1..])),
        "LPUSH" if args.len() >= 3 => integer(store.lpush(args[1].clone(), &args[2..])),
        "RPUSH" if args.len() >= 3 => integer(store.rpush(args[1].clone(), &args[2..])),
        "LREM" => arity(args, 4, |args| match parse_i64(&args[2]) {
            Ok(count) => integer(store.lrem(&args[1], count, &args[3])),
            Err(reply) => reply,
        }),
        "LLEN" => arity(args, 2, |args| integer(store.llen(&args[1]))),
        "LRANGE" => arity(args, 4, |args| match (parse_i64(&args[2]), parse_i64(&args[3])) {
            (Ok(start), Ok(stop)) => match store.lrange(&args[1], start, stop) {
                Ok(items) => Value::Array(Some(
                    items.into_iter().map(|item| Value::BulkString(Some(item))).collect(),
                )),
                Err(err) => store_error(err),
            },
            (Err(reply), _) | (_, Err(reply)) => reply,
        }),
        "RPOPLPUSH" => arity(args, 3, |args| pop_reply(store.rpoplpush(&args[1], &args[2]))),
        "BRPOPLPUSH" => {
            if args.len() != 4 {
                return Action::Reply(wrong_arity(&args[0]));
            }
            return match parse_timeout(&args[3]) {
                Ok(timeout) => Action::BlockingPop {
                    source: args[1].clone(),
                    destination: args[2].clone(),
                    timeout,
                },
                Err(reply) => Action::Reply(reply),
            };
        }
        "DEL" | "LPUSH" | "RPUSH" => wrong_arity(&args[0]),
        _ => Value::error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    };
    Action::Reply(reply)
}

fn handle_ping(args: &[Bytes]) -> Value {
    match args.len() {
        1 => Value::simple("PONG"),
        2 => Value::BulkString(Some(args[1].clone())),
        _ => wrong_arity(&args[0]),
    }
}

fn arity(args: &[Bytes], expected: usize, handler: impl FnOnce(&[Bytes]) -> Value) -> Value {
    if args.len() != expected {
        return wrong_arity(&args[0]);
    }
    handler(args)
}

fn wrong_arity(name: &[u8]) -> Value {
    Value::error(format!(
        "ERR wrong number of arguments for '{}' command",
        String::from_utf8_lossy(name).to_ascii_lowercase()
    ))
}

fn integer(result: Result<i64, StoreError>) -> Value {
    match result {
        Ok(n) => Value::Integer(n),
        Err(err) => store_error(err),
    }
}

/// Moved element, or the null array the blocking pop answers on timeout.
fn pop_reply(result: Result<Option<Bytes>, StoreError>) -> Value {
    match result {
        Ok(Some(value)) => Value::BulkString(Some(value)),
        Ok(None) => Value::Array(None),
        Err(err) => store_error(err),
    }
}

fn store_error(err: StoreError) -> Value {
    Value::error(err.to_string())
}

fn parse_i64(arg: &[u8]) -> Result<i64, Value> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Value::error("ERR value is not an integer or out of range"))
}

/// Whole seconds; zero waits forever.
fn parse_timeout(arg: &[u8]) -> Result<Option<Duration>, Value> {
    let seconds = parse_i64(arg)
        .map_err(|_| Value::error("ERR timeout is not a float or out of range"))?;
    if seconds < 0 {
        return Err(Value::error("ERR timeout is negative"));
    }
    Ok((seconds > 0).then(|| Duration::from_secs(seconds as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(store: &Store, parts: &[&str]) -> Value {
        let args: Vec<Bytes> = parts.iter().map(|part| Bytes::copy_from_slice(part.as_bytes())).collect();
        match dispatch(&args, store) {
            Action::Reply(reply) => reply,
            Action::BlockingPop { .. } => panic!("unexpected blocking pop"),
        }
    }

    #[test]
    fn dispatch_is_case_insensitive() {
        let store = Store::new();
        assert_eq!(run(&store, &["ping"]), Value::simple("PONG"));
        assert_eq!(run(&store, &["Set", "k", "v"]), Value::simple("OK"));
        assert_eq!(run(&store, &["get", "k"]), Value::bulk("v"));
    }

    #[test]
    fn reports_unknown_commands_and_arity() {
        let store = Store::new();
        assert_eq!(run(&store, &["NOPE"]), Value::error("ERR unknown command 'NOPE'"));
        assert_eq!(
            run(&store, &["GET"]),
            Value::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            run(&store, &["LPUSH", "q"]),
            Value::error("ERR wrong number of arguments for 'lpush' command")
        );
    }

    #[test]
    fn list_commands_and_type_errors() {
        let store = Store::new();
        assert_eq!(run(&store, &["RPUSH", "q", "a", "b"]), Value::Integer(2));
        assert_eq!(run(&store, &["RPOPLPUSH", "q", "w"]), Value::bulk("b"));
        assert_eq!(run(&store, &["LREM", "w", "-1", "b"]), Value::Integer(1));
        assert_eq!(run(&store, &["LRANGE", "q", "0", "-1"]), Value::Array(Some(vec![Value::bulk("a")])));
        assert_eq!(run(&store, &["LREM", "w", "x", "b"]), Value::error("ERR value is not an integer or out of range"));

        run(&store, &["SET", "s", "v"]);
        match run(&store, &["LPUSH", "s", "x"]) {
            Value::Error(message) => assert!(message.starts_with("WRONGTYPE")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn blocking_pop_parses_timeout() {
        let store = Store::new();
        let args: Vec<Bytes> = ["BRPOPLPUSH", "q", "w", "0"].iter().map(|part| Bytes::from(*part)).collect();
        match dispatch(&args, &store) {
            Action::BlockingPop { timeout, .. } => assert_eq!(timeout, None),
            Action::Reply(reply) => panic!("unexpected {:?}", reply),
        }
        assert_eq!(
            run(&store, &["BRPOPLPUSH", "q", "w", "-1"]),
            Value::error("ERR timeout is negative")
        );
    }
}
