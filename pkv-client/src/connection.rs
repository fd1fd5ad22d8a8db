//! # Pipelined Connection
//!
//! Purpose: Drive one socket: write queued commands back-to-back, match
//! replies to commands strictly in send order, and hold the send side still
//! while a blocking command waits for its reply.
//!
//! ## Design Principles
//! 1. **Actor Ownership**: A single driver task owns `ConnectionState`;
//!    callers hand it commands through a channel, so the send/receive state
//!    machines and both queues have exactly one writer.
//! 2. **Sans-IO Core**: `ConnectionState` never touches a socket. The driver
//!    feeds it write completions and read windows, which keeps the state
//!    machine testable without a network.
//! 3. **FIFO Matching**: The protocol has no request ids; the oldest sent
//!    command always owns the next reply bytes.
//!
//! ## State Machines
//!
//! ```text
//! send:    Connecting ─▶ Idle ─▶ Sending ─┬─▶ Idle              (regular command)
//!                                         └─▶ Blocking ─▶ Idle  (blocking reply arrived)
//! receive: Connecting ─▶ Idle ─▶ Listening ─▶ Reading ─┬─▶ Listening (replies still due)
//!                                                      └─▶ Idle
//! ```
//!
//! The driver also polls the socket while receive is `Idle`, only to notice
//! a peer hang-up between commands.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};

use crate::command::{Command, Received};
use crate::commands::Commands;
use crate::error::{ClientError, ClientResult};
use crate::metrics::Metrics;

/// Send-side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Connecting,
    Idle,
    /// A command's bytes are being written.
    Sending,
    /// A blocking command was written and its reply is still due.
    Blocking,
}

/// Receive-side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Connecting,
    Idle,
    /// Waiting for the socket to become readable.
    Listening,
    /// Feeding freshly read bytes to sent commands.
    Reading,
}

/// The command whose bytes are on their way to the socket.
#[derive(Debug, Clone, Copy)]
struct Writing {
    blocking: bool,
    /// Its reply arrived before the write finished.
    answered: bool,
}

/// Queues and state machines of one connection.
///
/// `pending` holds commands not yet written; `sent` holds commands written
/// (or being written) whose replies have not arrived, oldest first. While
/// `writing` is set and unanswered, the command it tracks is `sent.back()`.
#[derive(Debug)]
pub struct ConnectionState {
    send: SendState,
    recv: ReceiveState,
    pending: VecDeque<Command>,
    sent: VecDeque<Command>,
    writing: Option<Writing>,
    metrics: Arc<Metrics>,
}

impl ConnectionState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        ConnectionState {
            send: SendState::Connecting,
            recv: ReceiveState::Connecting,
            pending: VecDeque::new(),
            sent: VecDeque::new(),
            writing: None,
            metrics,
        }
    }

    /// Marks the socket as established.
    pub fn open(&mut self) {
        self.send = SendState::Idle;
        self.recv = ReceiveState::Idle;
    }

    pub fn send_state(&self) -> SendState {
        self.send
    }

    pub fn receive_state(&self) -> ReceiveState {
        self.recv
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    /// Appends a command to the send queue.
    pub fn enqueue(&mut self, command: Command) {
        trace!(command = command.name(), queued = self.pending.len(), "enqueue");
        self.pending.push_back(command);
    }

    /// Starts transmitting the next queued command, if the sender is idle.
    ///
    /// The command moves to the sent queue immediately and its bytes are
    /// returned for writing; `write_complete` must follow once they are out.
    pub fn next_to_send(&mut self) -> Option<Bytes> {
        if self.send != SendState::Idle {
            return None;
        }
        let command = self.pending.pop_front()?;
        trace!(command = command.name(), "sending");
        let bytes = command.bytes().clone();
        self.send = SendState::Sending;
        self.writing = Some(Writing {
            blocking: command.is_blocking(),
            answered: false,
        });
        self.sent.push_back(command);
        Some(bytes)
    }

    /// Records that the command being sent is fully written.
    ///
    /// A command answered before its write finished is already accounted
    /// for and does not hold the sender.
    pub fn write_complete(&mut self) {
        let writing = match self.writing.take() {
            Some(writing) => writing,
            None => return,
        };
        let blocking = if writing.answered {
            debug!("reply arrived before the write finished");
            false
        } else {
            if let Some(command) = self.sent.back_mut() {
                command.mark_sent();
            }
            self.metrics.record_sent();
            writing.blocking
        };
        if blocking {
            debug!("finished flushing command -> BLOCKING");
            self.send = SendState::Blocking;
        } else {
            trace!("finished flushing command -> IDLE");
            self.send = SendState::Idle;
        }
        if self.recv == ReceiveState::Idle && !self.sent.is_empty() {
            self.recv = ReceiveState::Listening;
        }
    }

    /// Returns true when read interest is armed.
    pub fn wants_read(&self) -> bool {
        self.recv == ReceiveState::Listening
    }

    /// Returns true when no reply is due but the socket should still be
    /// polled, so a peer hanging up on an idle connection is seen at once.
    /// Any bytes read in this state with nothing sent are unsolicited.
    pub fn watches_close(&self) -> bool {
        self.recv == ReceiveState::Idle
    }

    pub fn begin_read(&mut self) {
        self.recv = ReceiveState::Reading;
    }

    /// Feeds a read window to the sent commands, oldest first.
    ///
    /// Completed commands leave the sent queue; a completed blocking command
    /// releases the sender. Stops when the window is exhausted or the oldest
    /// command needs more bytes. Bytes with no command to own them, and
    /// undecodable bytes, are protocol failures.
    pub fn receive(&mut self, window: &mut BytesMut) -> ClientResult<()> {
        while window.has_remaining() {
            let command = match self.sent.front_mut() {
                Some(command) => command,
                None => return Err(ClientError::UnsolicitedReply),
            };
            let received = command.on_bytes(window)?;
            if !received.is_complete() {
                break;
            }
            let in_flight = self.sent.len() == 1;
            if let Some(command) = self.sent.pop_front() {
                if in_flight {
                    if let Some(writing) = self.writing.as_mut() {
                        // Counted here; write_complete skips it.
                        writing.answered = true;
                        self.metrics.record_sent();
                    }
                }
                let latency = command.sent_at().map(|sent_at| sent_at.elapsed());
                self.metrics
                    .record_reply(latency, received == Received::ErrorReply);
                if command.is_blocking() && self.send == SendState::Blocking {
                    debug!(command = command.name(), "blocking command answered, reactivating send queue");
                    self.send = SendState::Idle;
                }
            }
        }
        Ok(())
    }

    /// Ends a read pass. Returns true when read interest stays armed.
    pub fn finish_read(&mut self) -> bool {
        self.recv = if self.sent.is_empty() {
            ReceiveState::Idle
        } else {
            ReceiveState::Listening
        };
        self.recv == ReceiveState::Listening
    }

    /// Cancels every outstanding command: queued ones first, then sent ones,
    /// each in queue order. Returns how many handles were resolved.
    pub fn fail_all(&mut self) -> usize {
        self.writing = None;
        let mut cancelled = 0;
        for mut command in self.pending.drain(..) {
            if command.on_connection_lost() {
                self.metrics.record_cancelled(false);
                cancelled += 1;
            }
        }
        for mut command in self.sent.drain(..) {
            if command.on_connection_lost() {
                self.metrics.record_cancelled(command.sent_at().is_some());
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Cloneable handle to a running connection task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    inbox: mpsc::UnboundedSender<Command>,
    shutdown: Arc<Notify>,
    metrics: Arc<Metrics>,
}

impl ConnectionHandle {
    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hands a command to the connection task.
    ///
    /// Gives the command back if the task has already shut down.
    pub fn enqueue(&self, command: Command) -> Result<(), Command> {
        self.inbox.send(command).map_err(|err| err.0)
    }

    /// Asks the task to close the socket and cancel outstanding commands.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Returns true once the task no longer accepts commands.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

impl Commands for ConnectionHandle {
    fn dispatch(&self, command: Command) {
        self.metrics.record_submitted();
        if let Err(mut command) = self.enqueue(command) {
            debug!(connection = self.id, command = command.name(), "connection closed, cancelling");
            if command.on_connection_lost() {
                self.metrics.record_cancelled(false);
            }
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Spawns the driver task for an established stream.
///
/// `on_close` runs once, after every outstanding command has been cancelled.
/// Must be called from within a Tokio runtime.
pub fn spawn<T, F>(io: T, read_buffer_size: usize, metrics: Arc<Metrics>, on_close: F) -> ConnectionHandle
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    F: FnOnce(u64) + Send + 'static,
{
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(Notify::new());
    let (reader, writer) = tokio::io::split(io);

    let driver = Driver {
        id,
        reader,
        writer,
        inbox: rx,
        shutdown: shutdown.clone(),
        window: BytesMut::with_capacity(read_buffer_size),
        state: ConnectionState::new(metrics.clone()),
        metrics: metrics.clone(),
    };
    tokio::spawn(driver.run(on_close));

    ConnectionHandle {
        id,
        inbox: tx,
        shutdown,
        metrics,
    }
}

struct Driver<T> {
    id: u64,
    reader: ReadHalf<T>,
    writer: WriteHalf<T>,
    inbox: mpsc::UnboundedReceiver<Command>,
    shutdown: Arc<Notify>,
    window: BytesMut,
    state: ConnectionState,
    metrics: Arc<Metrics>,
}

impl<T> Driver<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run<F: FnOnce(u64)>(mut self, on_close: F) {
        self.state.open();
        self.metrics.record_connection_opened();
        debug!(connection = self.id, "connection open");

        match self.drive().await {
            Ok(()) => info!(connection = self.id, "connection closed"),
            Err(ClientError::ConnectionLost) => warn!(connection = self.id, "EOF on input"),
            Err(err) => error!(connection = self.id, %err, "connection failed"),
        }

        // Commands still in the channel count as queued.
        self.inbox.close();
        while let Ok(command) = self.inbox.try_recv() {
            self.state.enqueue(command);
        }
        let cancelled = self.state.fail_all();
        if cancelled > 0 {
            debug!(connection = self.id, cancelled, "cancelled outstanding commands");
        }
        let _ = self.writer.shutdown().await;
        self.metrics.record_connection_closed();
        on_close(self.id);
    }

    async fn drive(&mut self) -> ClientResult<()> {
        let mut outgoing: Option<Bytes> = None;
        loop {
            if outgoing.is_none() {
                outgoing = self.state.next_to_send();
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!(connection = self.id, "close requested");
                    return Ok(());
                }
                command = self.inbox.recv() => match command {
                    Some(command) => self.state.enqueue(command),
                    None => {
                        debug!(connection = self.id, "all handles dropped");
                        return Ok(());
                    }
                },
                written = self.writer.write(outgoing.as_deref().unwrap_or(&[])), if outgoing.is_some() => {
                    let written = written?;
                    if written == 0 {
                        return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                    }
                    let finished = match outgoing.as_mut() {
                        Some(bytes) => {
                            bytes.advance(written);
                            bytes.is_empty()
                        }
                        None => false,
                    };
                    if finished {
                        self.writer.flush().await?;
                        outgoing = None;
                        self.state.write_complete();
                    }
                }
                read = self.reader.read_buf(&mut self.window), if self.state.wants_read() || self.state.watches_close() => {
                    if read? == 0 {
                        return Err(ClientError::ConnectionLost);
                    }
                    self.state.begin_read();
                    trace!(connection = self.id, buffered = self.window.len(), "filled");
                    self.state.receive(&mut self.window)?;
                    self.state.finish_read();
                }
            }
        }
    }
}
