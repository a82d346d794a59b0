//! Single multiplexed connection to a database node.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tarantool_core::protocol::SYNC_ID_NONE;
use tarantool_core::{Packet, PacketCodec, Result, TarantoolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::tracker::{RequestTracker, ResponseFuture, TrackerStats};

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Callback invoked once when a connection fails.
pub type FailureListener = Box<dyn Fn(&Connection, &TarantoolError) + Send + Sync>;

/// A connection to a single node.
///
/// Requests are written by a background writer task and responses are
/// dispatched to their callers by a background reader task, so any number of
/// requests may be in flight at once. A connection starts alive and turns
/// dead exactly once, either on transport failure or on [`close`](Self::close);
/// it never comes back.
pub struct Connection {
    id: ConnectionId,
    address: SocketAddr,
    alive: AtomicBool,
    next_sync_id: AtomicU64,
    request_timeout: Duration,
    max_packet_size: usize,
    tracker: Arc<RequestTracker>,
    outbound: mpsc::UnboundedSender<Packet>,
    closed: watch::Sender<bool>,
    listeners: Mutex<Vec<FailureListener>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("alive", &self.is_alive())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Connection {
    /// Establishes a new TCP connection to the given address.
    pub async fn connect(
        address: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
        tcp_nodelay: bool,
    ) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                TarantoolError::Connection(format!(
                    "connection to {} timed out after {:?}",
                    address, connect_timeout
                ))
            })?
            .map_err(|e| {
                TarantoolError::Connection(format!("failed to connect to {}: {}", address, e))
            })?;

        stream.set_nodelay(tcp_nodelay).map_err(|e| {
            TarantoolError::Connection(format!("failed to set TCP_NODELAY: {}", e))
        })?;

        let connection = Self::spawn(stream, address, request_timeout);
        tracing::debug!(id = %connection.id, address = %address, "established connection");
        Ok(connection)
    }

    /// Wraps an established byte stream and starts its reader and writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(stream: S, address: SocketAddr, request_timeout: Duration) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let codec = PacketCodec::new();

        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            address,
            alive: AtomicBool::new(true),
            next_sync_id: AtomicU64::new(SYNC_ID_NONE + 1),
            request_timeout,
            max_packet_size: codec.max_packet_size(),
            tracker: RequestTracker::new(),
            outbound,
            closed,
            listeners: Mutex::new(Vec::new()),
        });

        tokio::spawn(read_loop(
            FramedRead::new(read_half, codec),
            Arc::downgrade(&connection),
            Arc::clone(&connection.tracker),
            connection.closed.subscribe(),
        ));
        tokio::spawn(write_loop(
            FramedWrite::new(write_half, codec),
            outbound_rx,
            Arc::downgrade(&connection),
            connection.closed.subscribe(),
        ));

        connection
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address of this connection.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns `true` until the connection fails or is closed.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Returns the number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Returns how this connection's requests were resolved so far.
    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    /// Registers a callback invoked when this connection fails.
    ///
    /// If the connection has already failed the callback runs immediately.
    /// Closing a connection deliberately does not invoke listeners.
    pub fn add_failure_listener(&self, listener: FailureListener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_alive() {
            listeners.push(listener);
            return;
        }
        drop(listeners);
        listener(
            self,
            &TarantoolError::ConnectionLost(format!("connection to {} is closed", self.address)),
        );
    }

    /// Sends a request and returns a handle to its decoded response.
    ///
    /// A fresh sync id is assigned to the packet. The handle resolves with a
    /// [`TarantoolError::RequestTimeout`] if no response arrives within
    /// `timeout`, or within the connection's default request timeout when
    /// `timeout` is `None`.
    ///
    /// A request too large to encode fails with [`TarantoolError::Protocol`]
    /// and leaves the connection and its other requests untouched.
    pub fn send<T, D>(&self, mut request: Packet, decoder: D, timeout: Option<Duration>) -> Result<ResponseFuture<T>>
    where
        T: Send + 'static,
        D: FnOnce(Packet) -> Result<T> + Send + Sync + 'static,
    {
        if !self.is_alive() {
            return Err(self.lost_error());
        }
        if request.encoded_len() > self.max_packet_size {
            return Err(TarantoolError::Protocol(format!(
                "request of {} bytes exceeds limit of {} bytes",
                request.encoded_len(),
                self.max_packet_size
            )));
        }

        let sync_id = self.next_sync_id.fetch_add(1, Ordering::Relaxed);
        request.set_sync_id(sync_id);

        let response = self
            .tracker
            .submit(sync_id, decoder, timeout.unwrap_or(self.request_timeout));

        if self.outbound.send(request).is_err() || !self.is_alive() {
            self.tracker.fail(sync_id, self.lost_error());
        }

        tracing::trace!(id = %self.id, sync_id, "request sent");
        Ok(response)
    }

    /// Sends a request and waits for its decoded response.
    pub async fn send_request<T, D>(&self, request: Packet, decoder: D, timeout: Option<Duration>) -> Result<T>
    where
        T: Send + 'static,
        D: FnOnce(Packet) -> Result<T> + Send + Sync + 'static,
    {
        self.send(request, decoder, timeout)?.await
    }

    /// Closes this connection.
    ///
    /// New requests are rejected immediately; requests already in flight are
    /// allowed to complete or time out before the transport is shut down.
    pub async fn close(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        self.tracker.drain().await;
        self.closed.send_replace(true);
        tracing::debug!(id = %self.id, address = %self.address, "connection closed");
    }

    /// Waits until this connection is no longer alive.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        if !self.is_alive() {
            return;
        }
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn fail(&self, error: TarantoolError) {
        let was_alive = self.alive.swap(false, Ordering::AcqRel);

        // A transport failure while closing still fails whatever close() is draining.
        let failed = self.tracker.fail_all(|| self.lost_error());
        self.closed.send_replace(true);
        if !was_alive {
            return;
        }

        tracing::warn!(
            id = %self.id,
            address = %self.address,
            error = %error,
            failed_requests = failed,
            "connection failed"
        );

        let listeners = std::mem::take(
            &mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            listener(self, &error);
        }
    }

    fn lost_error(&self) -> TarantoolError {
        TarantoolError::ConnectionLost(format!("connection to {} is closed", self.address))
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, PacketCodec>,
    connection: Weak<Connection>,
    tracker: Arc<RequestTracker>,
    mut closed: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let error = loop {
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    return;
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(packet)) => {
                    tracker.complete(packet);
                }
                Some(Err(e)) => break e,
                None => break TarantoolError::ConnectionLost("connection closed by peer".to_string()),
            }
        }
    };

    match connection.upgrade() {
        Some(connection) => connection.fail(error),
        None => {
            tracker.fail_all(|| TarantoolError::ConnectionLost("connection dropped".to_string()));
        }
    }
}

async fn write_loop<W>(
    mut frames: FramedWrite<W, PacketCodec>,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    connection: Weak<Connection>,
    mut closed: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let error = loop {
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    break None;
                }
            }
            packet = outbound.recv() => match packet {
                Some(packet) => {
                    if let Err(e) = frames.send(packet).await {
                        break Some(e);
                    }
                }
                None => break None,
            }
        }
    };

    let _ = frames.close().await;
    if let (Some(error), Some(connection)) = (error, connection.upgrade()) {
        connection.fail(error);
    }
}
