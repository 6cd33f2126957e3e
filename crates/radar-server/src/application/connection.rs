//! Handle to one accepted device connection.
//!
//! A [`Connection`] is the part of a socket that the rest of the server is
//! allowed to touch: an identifier, the peer address, an outbound frame queue
//! and a shutdown signal.  The socket itself stays inside the acceptor's
//! per-connection task, which drains the queue and watches the signal.
//!
//! The session registry and the correlator hold `Arc<Connection>` references;
//! the acceptor owns the lifetime and tears everything down when the
//! transport closes.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use radar_core::{DeviceMessage, Frame};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque identifier, stable for the lifetime of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is plenty to tell connections apart in logs.
        let hyphenated = self.0.hyphenated().to_string();
        f.write_str(hyphenated.split('-').next().unwrap_or(&hyphenated))
    }
}

/// Errors returned when writing to a connection.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Shared handle to a live device connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    local: SocketAddr,
    outbound: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
    opened_at: Instant,
    /// Milliseconds after `opened_at` of the most recent inbound frame.
    last_read_ms: AtomicU64,
}

impl Connection {
    /// Creates a handle and the receiving end of its outbound queue.
    ///
    /// `shutdown` is cancelled when the connection closes; pass a child token
    /// of a server-wide token so a server shutdown closes every connection.
    pub fn open(
        peer: SocketAddr,
        local: SocketAddr,
        queue_depth: usize,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(queue_depth.max(1));
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            peer,
            local,
            outbound,
            shutdown,
            opened_at: Instant::now(),
            last_read_ms: AtomicU64::new(0),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Remote IP address of the device.
    pub fn ip(&self) -> IpAddr {
        self.peer.ip()
    }

    /// Address of the server socket that accepted this connection.
    pub fn local(&self) -> SocketAddr {
        self.local
    }

    /// Queues a raw frame for the writer task.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] once the connection has been closed.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed(self.id));
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ConnectionError::Closed(self.id)),
            sent = self.outbound.send(frame) => sent.map_err(|_| ConnectionError::Closed(self.id)),
        }
    }

    /// Encodes and queues a message.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] once the connection has been closed.
    pub async fn send(&self, msg: &DeviceMessage) -> Result<(), ConnectionError> {
        self.send_frame(msg.to_frame()).await
    }

    /// Asks the owning task to close the transport.  Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Token the pipeline tasks watch to learn about a close.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Records that a frame was just read.
    pub fn mark_read(&self) {
        let elapsed = self.opened_at.elapsed().as_millis() as u64;
        self.last_read_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time of the most recent inbound frame (or the open time if none).
    pub fn last_read(&self) -> Instant {
        self.opened_at + Duration::from_millis(self.last_read_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_connection() -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        Connection::open(
            "10.0.0.5:40000".parse().unwrap(),
            "10.0.0.1:1060".parse().unwrap(),
            4,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_send_queues_encoded_frame() {
        // Arrange
        let (conn, mut rx) = open_test_connection();

        // Act
        conn.send(&DeviceMessage::heartbeat_ack()).await.expect("send");

        // Assert
        let frame = rx.recv().await.expect("queued frame");
        assert_eq!(frame.tag, 8);
        assert_eq!(&frame.payload[..], &[0x08, 0x08]);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (conn, _rx) = open_test_connection();

        conn.close();

        assert!(conn.is_closed());
        assert_eq!(
            conn.send(&DeviceMessage::restart()).await,
            Err(ConnectionError::Closed(conn.id()))
        );
    }

    #[tokio::test]
    async fn test_parent_token_cancellation_closes_connection() {
        // Arrange
        let root = CancellationToken::new();
        let (conn, _rx) = Connection::open(
            "10.0.0.5:40000".parse().unwrap(),
            "10.0.0.1:1060".parse().unwrap(),
            1,
            root.child_token(),
        );

        // Act
        root.cancel();

        // Assert
        conn.closed().await;
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_read_advances_last_read() {
        let (conn, _rx) = open_test_connection();
        let opened = conn.last_read();

        tokio::time::advance(Duration::from_secs(5)).await;
        conn.mark_read();

        assert_eq!(conn.last_read() - opened, Duration::from_secs(5));
    }

    #[test]
    fn test_ip_comes_from_peer_address() {
        let (conn, _rx) = open_test_connection();
        assert_eq!(conn.ip().to_string(), "10.0.0.5");
        assert_eq!(conn.local().port(), 1060);
    }
}
