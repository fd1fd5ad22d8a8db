use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use pkv_common::{marshal, Arg, Decoder, Value};
use pkv_server::{serve, Store};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(serve(listener, Arc::new(Store::new())));
    addr
}

struct Conn {
    stream: TcpStream,
    buffer: BytesMut,
    decoder: Decoder,
}

impl Conn {
    async fn open(addr: &str) -> Self {
        Conn {
            stream: TcpStream::connect(addr).await.expect("connect"),
            buffer: BytesMut::new(),
            decoder: Decoder::new(),
        }
    }

    async fn send(&mut self, name: &str, args: &[&str]) {
        let args: Vec<Arg> = args.iter().map(|arg| Arg::from(*arg)).collect();
        self.stream.write_all(&marshal(name, &args)).await.expect("write");
    }

    async fn reply(&mut self) -> Value {
        loop {
            if let Some(value) = self.decoder.decode(&mut self.buffer).expect("decode") {
                return value;
            }
            let read = self.stream.read_buf(&mut self.buffer).await.expect("read");
            assert!(read > 0, "server closed the connection");
        }
    }
}

#[tokio::test]
async fn answers_pipelined_requests_in_order() {
    let addr = spawn_server().await;
    let mut conn = Conn::open(&addr).await;

    conn.send("SET", &["k", "v"]).await;
    conn.send("GET", &["k"]).await;
    conn.send("ECHO", &["bin\r\nary"]).await;
    conn.send("GET", &["missing"]).await;

    assert_eq!(conn.reply().await, Value::simple("OK"));
    assert_eq!(conn.reply().await, Value::bulk("v"));
    assert_eq!(conn.reply().await, Value::bulk("bin\r\nary"));
    assert_eq!(conn.reply().await, Value::BulkString(None));
}

#[tokio::test]
async fn blocking_pop_is_released_by_another_connection() {
    let addr = spawn_server().await;
    let mut waiter = Conn::open(&addr).await;
    let mut producer = Conn::open(&addr).await;

    waiter.send("BRPOPLPUSH", &["jobs", "jobs.working", "0"]).await;
    waiter.send("PING", &[]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    producer.send("LPUSH", &["jobs", "job-1"]).await;
    assert_eq!(producer.reply().await, Value::Integer(1));

    assert_eq!(waiter.reply().await, Value::bulk("job-1"));
    assert_eq!(waiter.reply().await, Value::simple("PONG"));

    producer.send("LRANGE", &["jobs.working", "0", "-1"]).await;
    assert_eq!(producer.reply().await, Value::Array(Some(vec![Value::bulk("job-1")])));
}

#[tokio::test]
async fn blocking_pop_times_out_with_null() {
    let addr = spawn_server().await;
    let mut conn = Conn::open(&addr).await;
    conn.send("BRPOPLPUSH", &["empty", "dst", "1"]).await;
    assert_eq!(conn.reply().await, Value::Array(None));
}

#[tokio::test]
async fn malformed_request_gets_error_then_close() {
    let addr = spawn_server().await;
    let mut conn = Conn::open(&addr).await;
    conn.stream.write_all(b"*1\r\n$x\r\n").await.expect("write");

    match conn.reply().await {
        Value::Error(message) => assert!(message.starts_with("ERR Protocol error")),
        other => panic!("unexpected {:?}", other),
    }
    let mut rest = Vec::new();
    conn.stream.read_to_end(&mut rest).await.expect("read to end");
    assert!(rest.is_empty());
}
