use std::io::{Read, Write};
use std::net::TcpListener as StdListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pkv_client::{BlockingClient, ClientConfig, ClientError};
use pkv_server::{serve, Store};
use tokio::runtime::Runtime;

/// Runs a server on its own runtime; keep the runtime alive for the test.
fn spawn_server() -> (Runtime, ClientConfig) {
    let runtime = Runtime::new().expect("runtime");
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    runtime.spawn(serve(listener, Arc::new(Store::new())));
    (runtime, ClientConfig::new("127.0.0.1", port))
}

#[test]
fn blocking_calls_against_the_server() {
    let (_server, config) = spawn_server();
    let client = BlockingClient::with_config(config).expect("connect");

    assert_eq!(client.ping().unwrap(), "PONG");
    client.set("k", "v").unwrap();
    assert_eq!(client.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    assert_eq!(client.del("k").unwrap(), 1);

    assert_eq!(client.rpush("jobs", "a").unwrap(), 1);
    assert_eq!(client.lpush("jobs", "b").unwrap(), 2);
    let job = client
        .brpoplpush("jobs", "jobs.working", Duration::from_secs(1))
        .unwrap();
    assert_eq!(job.as_deref(), Some(&b"a"[..]));
    assert_eq!(client.lrem("jobs.working", 0, "a").unwrap(), 1);

    let metrics = client.metrics();
    assert_eq!(metrics.connections_opened, 1);
    assert_eq!(metrics.replies, metrics.commands_sent);
}

#[test]
fn threads_share_one_connection() {
    let (_server, config) = spawn_server();
    let client = Arc::new(BlockingClient::with_config(config).expect("connect"));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let client = client.clone();
            thread::spawn(move || {
                for idx in 0..50 {
                    client.rpush("shared", format!("{}-{}", worker, idx)).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let len = client.command("LLEN", ["shared"]).unwrap();
    assert_eq!(len.as_integer(), Some(200));
}

#[test]
fn blocking_pop_reports_none_when_the_connection_drops() {
    let listener = StdListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        // Read the request, then hang up without answering.
        let mut buf = [0u8; 256];
        let _ = stream.read(&mut buf);
    });

    let client = BlockingClient::with_config(ClientConfig::new("127.0.0.1", port)).expect("connect");
    let popped = client
        .brpoplpush("jobs", "jobs.working", Duration::ZERO)
        .unwrap();
    assert_eq!(popped, None);
    server.join().unwrap();

    assert!(!client.is_connected());
}

#[test]
fn consumer_reconnects_after_a_dropped_pop() {
    let listener = StdListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = thread::spawn(move || {
        let mut buf = [0u8; 256];
        let (mut first, _) = listener.accept().expect("accept");
        let _ = first.read(&mut buf);
        drop(first);

        let (mut second, _) = listener.accept().expect("accept");
        let _ = second.read(&mut buf);
        second.write_all(b"$5\r\njob-1\r\n").expect("write");
        let _ = second.read(&mut buf);
    });

    let client = BlockingClient::with_config(ClientConfig::new("127.0.0.1", port)).expect("connect");
    let mut jobs = Vec::new();
    while jobs.is_empty() {
        match client.brpoplpush("jobs", "jobs.working", Duration::ZERO).unwrap() {
            Some(job) => jobs.push(job),
            None => {
                assert!(!client.is_connected());
                client.reconnect().expect("reconnect");
            }
        }
    }
    assert_eq!(jobs.len(), 1);
    assert_eq!(&jobs[0][..], b"job-1");
    assert_eq!(client.metrics().connections_opened, 2);

    client.close();
    server.join().unwrap();
}

#[test]
fn connect_failure_is_an_error() {
    let listener = StdListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    assert!(matches!(
        BlockingClient::connect("127.0.0.1", port),
        Err(ClientError::Io(_))
    ));
}
