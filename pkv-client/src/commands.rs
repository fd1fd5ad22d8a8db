//! # Typed Commands
//!
//! Purpose: Typed wrappers over `dispatch` for the commands a work queue
//! needs, shared by the client and by individual connections.
//!
//! Every wrapper submits its command synchronously, at call time, and returns
//! a future for the typed reply. Submission order is therefore call order,
//! even if the futures are awaited in a different order.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use pkv_common::{Arg, Value};

use crate::command::{Command, Reply};
use crate::error::{ClientError, ClientResult};

/// Anything that accepts commands for transmission.
pub trait Commands {
    /// Submits a command. Its reply handle resolves exactly once.
    fn dispatch(&self, command: Command);

    /// Submits an arbitrary command and returns its raw reply handle.
    fn command<I, A>(&self, name: &str, args: I) -> Reply
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let (command, reply) = Command::new(name, args);
        self.dispatch(command);
        reply
    }

    /// `LPUSH key value`; resolves with the new list length.
    fn lpush<K, V>(&self, key: K, value: V) -> impl Future<Output = ClientResult<i64>> + Send
    where
        K: Into<Arg>,
        V: Into<Arg>,
    {
        let args: [Arg; 2] = [key.into(), value.into()];
        let reply = self.command("LPUSH", args);
        async move { expect_integer(reply.await?) }
    }

    /// `RPUSH key value`; resolves with the new list length.
    fn rpush<K, V>(&self, key: K, value: V) -> impl Future<Output = ClientResult<i64>> + Send
    where
        K: Into<Arg>,
        V: Into<Arg>,
    {
        let args: [Arg; 2] = [key.into(), value.into()];
        let reply = self.command("RPUSH", args);
        async move { expect_integer(reply.await?) }
    }

    /// `LREM key count value`; resolves with the number of removed elements.
    fn lrem<K, V>(&self, key: K, count: i64, value: V) -> impl Future<Output = ClientResult<i64>> + Send
    where
        K: Into<Arg>,
        V: Into<Arg>,
    {
        let reply = self.command("LREM", [key.into(), Arg::Int(count), value.into()]);
        async move { expect_integer(reply.await?) }
    }

    /// `BRPOPLPUSH source destination timeout`.
    ///
    /// The timeout is sent in whole seconds; zero waits forever. Resolves
    /// with `None` when the server-side timeout expires.
    fn brpoplpush<S, D>(
        &self,
        source: S,
        destination: D,
        timeout: Duration,
    ) -> impl Future<Output = ClientResult<Option<Bytes>>> + Send
    where
        S: Into<Arg>,
        D: Into<Arg>,
    {
        let reply = self.command(
            "BRPOPLPUSH",
            [source.into(), destination.into(), Arg::from(timeout.as_secs())],
        );
        async move { expect_optional_bulk(reply.await?) }
    }

    /// `GET key`; `None` when the key is missing.
    fn get<K: Into<Arg>>(&self, key: K) -> impl Future<Output = ClientResult<Option<Bytes>>> + Send {
        let args: [Arg; 1] = [key.into()];
        let reply = self.command("GET", args);
        async move { expect_optional_bulk(reply.await?) }
    }

    /// `SET key value`.
    fn set<K, V>(&self, key: K, value: V) -> impl Future<Output = ClientResult<()>> + Send
    where
        K: Into<Arg>,
        V: Into<Arg>,
    {
        let args: [Arg; 2] = [key.into(), value.into()];
        let reply = self.command("SET", args);
        async move { expect_status(reply.await?) }
    }

    /// `DEL key`; resolves with the number of removed keys.
    fn del<K: Into<Arg>>(&self, key: K) -> impl Future<Output = ClientResult<i64>> + Send {
        let args: [Arg; 1] = [key.into()];
        let reply = self.command("DEL", args);
        async move { expect_integer(reply.await?) }
    }

    /// `PING`; resolves with the status text.
    fn ping(&self) -> impl Future<Output = ClientResult<String>> + Send {
        let reply = self.command("PING", std::iter::empty::<Arg>());
        async move {
            match reply.await? {
                Value::SimpleString(text) => Ok(text),
                Value::BulkString(Some(data)) => Ok(String::from_utf8_lossy(&data).into_owned()),
                other => Err(ClientError::UnexpectedResponse(other)),
            }
        }
    }
}

/// Integer reply or `UnexpectedResponse`.
pub fn expect_integer(value: Value) -> ClientResult<i64> {
    match value {
        Value::Integer(n) => Ok(n),
        other => Err(ClientError::UnexpectedResponse(other)),
    }
}

/// Bulk reply, with both null forms mapped to `None`.
pub fn expect_optional_bulk(value: Value) -> ClientResult<Option<Bytes>> {
    match value {
        Value::BulkString(data) => Ok(data),
        Value::Array(None) => Ok(None),
        other => Err(ClientError::UnexpectedResponse(other)),
    }
}

/// Any status reply.
pub fn expect_status(value: Value) -> ClientResult<()> {
    match value {
        Value::SimpleString(_) => Ok(()),
        other => Err(ClientError::UnexpectedResponse(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records submitted commands and answers them from a script.
    struct Scripted {
        replies: Mutex<Vec<&'static [u8]>>,
        seen: Mutex<Vec<Bytes>>,
    }

    impl Scripted {
        fn new(replies: Vec<&'static [u8]>) -> Self {
            Scripted {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Commands for Scripted {
        fn dispatch(&self, mut command: Command) {
            self.seen.lock().unwrap().push(command.bytes().clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                command.on_connection_lost();
                return;
            }
            let mut reply = replies.remove(0);
            command.on_bytes(&mut reply).unwrap();
        }
    }

    #[tokio::test]
    async fn queue_operations_marshal_and_convert() {
        let client = Scripted::new(vec![b":1\r\n", b":2\r\n", b":1\r\n", b"$4\r\njob1\r\n"]);
        assert_eq!(client.lpush("q", "job1").await.unwrap(), 1);
        assert_eq!(client.rpush("q", "job2").await.unwrap(), 2);
        assert_eq!(client.lrem("q.working", -1, "job1").await.unwrap(), 1);
        let popped = client
            .brpoplpush("q", "q.working", Duration::from_millis(2_500))
            .await
            .unwrap();
        assert_eq!(popped.as_deref(), Some(&b"job1"[..]));

        let seen = client.seen.lock().unwrap();
        assert_eq!(&seen[0][..], b"*3\r\n$5\r\nLPUSH\r\n$1\r\nq\r\n$4\r\njob1\r\n");
        assert_eq!(&seen[2][..], b"*4\r\n$4\r\nLREM\r\n$9\r\nq.working\r\n$2\r\n-1\r\n$4\r\njob1\r\n");
        // Fractional seconds are truncated.
        assert_eq!(
            &seen[3][..],
            b"*4\r\n$10\r\nBRPOPLPUSH\r\n$1\r\nq\r\n$9\r\nq.working\r\n$1\r\n2\r\n"
        );
    }

    #[tokio::test]
    async fn timeout_and_missing_values_are_none() {
        let client = Scripted::new(vec![b"*-1\r\n", b"$-1\r\n"]);
        assert_eq!(client.brpoplpush("a", "b", Duration::ZERO).await.unwrap(), None);
        assert_eq!(client.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mismatched_reply_shape_is_reported() {
        let client = Scripted::new(vec![b"+OK\r\n", b"-WRONGTYPE bad\r\n"]);
        assert!(matches!(
            client.lpush("q", "v").await,
            Err(ClientError::UnexpectedResponse(Value::SimpleString(_)))
        ));
        assert!(matches!(client.get("q").await, Err(ClientError::Server(_))));
    }

    #[tokio::test]
    async fn unanswered_command_reports_connection_lost() {
        let client = Scripted::new(Vec::new());
        assert!(client.ping().await.unwrap_err().is_connection_lost());
    }
}
