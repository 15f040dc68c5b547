//! Transport lifecycle for one client connection.
//!
//! [`Connection::establish`] dials, performs the hello/welcome handshake,
//! and spawns the read and write pumps. There is no automatic retry: every
//! failure lands the connection in [`ConnectionState::Closed`] and the
//! caller decides what to do next.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use skirmish_proto::codec::{read_frame, write_frame};
use skirmish_proto::{ClientHello, PushBody, RequestBody, ServerWelcome, WireMessage};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;
use crate::error::{ConnectError, RequestError};

const CHANNEL_DEPTH: usize = 64;

/// Where a connection is in its life. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No dial attempted yet.
    Disconnected,
    /// TCP connect in flight.
    Connecting,
    /// Socket up, hello sent, waiting for the welcome.
    Handshaking,
    /// Handshake accepted; traffic flows.
    Established,
    /// Gone for good, deliberately or not.
    Closed,
}

/// Traffic the read pump cannot answer by itself.
pub(crate) enum Inbound {
    Push(PushBody),
    /// A request relayed by the server, answered by the hosting side.
    Relayed { seq: u64, body: RequestBody },
    /// The socket died outside a deliberate close.
    Disconnected,
}

pub(crate) struct Connection {
    state: Arc<Mutex<ConnectionState>>,
    dispatcher: Arc<Dispatcher>,
    outbound: mpsc::Sender<WireMessage>,
    pings: Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>,
    next_nonce: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Dial the relay, run the handshake, and start the pumps.
    ///
    /// The returned receiver carries pushes and relayed requests; the
    /// session layer drains it. Responses never appear there, the read
    /// pump hands them straight to the dispatcher.
    pub async fn establish(
        addr: &str,
        hello: ClientHello,
        timeout: Duration,
        max_frame: usize,
    ) -> Result<(Self, ServerWelcome, mpsc::Receiver<Inbound>), ConnectError> {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        tracing::debug!(addr, "Dialing relay");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectError::Timeout)??;
        let _ = stream.set_nodelay(true);
        let (mut read_half, mut write_half) = stream.into_split();

        *state.lock() = ConnectionState::Handshaking;
        tokio::time::timeout(
            timeout,
            write_frame(&mut write_half, &WireMessage::Hello(hello), max_frame),
        )
        .await
        .map_err(|_| ConnectError::Timeout)??;
        let first: WireMessage = tokio::time::timeout(timeout, read_frame(&mut read_half, max_frame))
            .await
            .map_err(|_| ConnectError::Timeout)??;
        let welcome = match first {
            WireMessage::Welcome(welcome) => welcome,
            WireMessage::Reject { reason } => {
                *state.lock() = ConnectionState::Closed;
                return Err(ConnectError::Rejected(reason));
            }
            other => {
                tracing::warn!(?other, "Handshake answered with a non-handshake frame");
                *state.lock() = ConnectionState::Closed;
                return Err(ConnectError::UnexpectedReply);
            }
        };
        *state.lock() = ConnectionState::Established;

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let dispatcher = Arc::new(Dispatcher::new(outbound_tx.clone(), timeout));
        let pings: Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>> = Arc::default();

        let writer = tokio::spawn(write_pump(write_half, outbound_rx, max_frame));
        let reader = tokio::spawn(read_pump(ReadPump {
            read_half,
            max_frame,
            state: Arc::clone(&state),
            dispatcher: Arc::clone(&dispatcher),
            inbound: inbound_tx,
            outbound: outbound_tx.clone(),
            pings: Arc::clone(&pings),
        }));

        let connection = Self {
            state,
            dispatcher,
            outbound: outbound_tx,
            pings,
            next_nonce: AtomicU64::new(1),
            timeout,
            reader,
            writer,
        };
        Ok((connection, welcome, inbound_rx))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Round-trip a liveness probe.
    pub async fn ping(&self) -> Result<Duration, RequestError> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pings.lock().insert(nonce, tx);

        let started = tokio::time::Instant::now();
        if self
            .outbound
            .send(WireMessage::Ping { nonce })
            .await
            .is_err()
        {
            self.pings.lock().remove(&nonce);
            return Err(RequestError::ConnectionClosed);
        }
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(_)) => Err(RequestError::ConnectionClosed),
            Err(_) => {
                self.pings.lock().remove(&nonce);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Tear the connection down. Idempotent; pending requests fail with
    /// [`RequestError::ConnectionClosed`].
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.reader.abort();
        self.writer.abort();
        self.dispatcher.fail_all();
        self.pings.lock().clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_pump(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<WireMessage>,
    max_frame: usize,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(err) = write_frame(&mut write_half, &message, max_frame).await {
            tracing::debug!(error = %err, "Outbound write failed");
            break;
        }
    }
}

struct ReadPump {
    read_half: OwnedReadHalf,
    max_frame: usize,
    state: Arc<Mutex<ConnectionState>>,
    dispatcher: Arc<Dispatcher>,
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::Sender<WireMessage>,
    pings: Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>,
}

async fn read_pump(mut pump: ReadPump) {
    loop {
        let message: WireMessage = match read_frame(&mut pump.read_half, pump.max_frame).await {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "Connection lost");
                break;
            }
        };
        match message {
            WireMessage::Response { seq, body } => pump.dispatcher.complete(seq, body),
            WireMessage::Push(body) => {
                if pump.inbound.send(Inbound::Push(body)).await.is_err() {
                    break;
                }
            }
            WireMessage::Request { seq, body } => {
                if pump
                    .inbound
                    .send(Inbound::Relayed { seq, body })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            WireMessage::Ping { nonce } => {
                if pump
                    .outbound
                    .send(WireMessage::Pong { nonce })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            WireMessage::Pong { nonce } => {
                if let Some(waiter) = pump.pings.lock().remove(&nonce) {
                    let _ = waiter.send(());
                }
            }
            other => tracing::warn!(?other, "Unexpected frame after handshake"),
        }
    }
    *pump.state.lock() = ConnectionState::Closed;
    pump.dispatcher.fail_all();
    pump.pings.lock().clear();
    let _ = pump.inbound.send(Inbound::Disconnected).await;
}
