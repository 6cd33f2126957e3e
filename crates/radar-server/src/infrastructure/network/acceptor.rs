//! TCP acceptor and per-connection pipeline.
//!
//! # Pipeline
//!
//! ```text
//!            ┌──────────── connection task ─────────────┐
//! socket ──► │ FrameCodec ─► idle reset ─► Dispatcher    │
//!            │                                │          │
//!            │         outbound mpsc ◄────────┘          │
//!            └───────────────┬──────────────────────────┘
//!                            ▼
//!                      writer task ──► socket
//! ```
//!
//! One task per accepted socket reads frames in arrival order and dispatches
//! them inline, so frames from one device are handled strictly in order.  A
//! second task owns the write half and drains the connection's outbound
//! queue.  Anything that needs to wait on a device (the device command
//! service) does so on its own task and never on the read loop.
//!
//! The connection ends on peer close, I/O error, a corrupt frame header, the
//! idle deadline, or an explicit [`Connection::close`] (eviction, operator
//! disconnect, server shutdown).  Whatever the cause, teardown releases the
//! connection's pending requests, unregisters the device and clears its
//! property snapshot.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use radar_core::protocol::frame::DEFAULT_MAX_FRAME_LEN;
use radar_core::{Corruption, DecodeError, FrameCodec, FrameError};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::connection::Connection;
use crate::application::context::ServerContext;
use crate::application::dispatch::{DispatchError, Dispatcher};
use crate::application::events::ServerEvent;
use crate::infrastructure::network::idle::{IdleSupervisor, DEFAULT_IDLE_TIMEOUT};

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Errors raised by the listener itself.  Per-connection failures never
/// surface here.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Per-connection transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Read-inactivity window before the connection is closed.
    pub idle_timeout: Duration,
    /// Largest accepted value of the frame length prefix.
    pub max_frame_len: usize,
    /// Frames that may wait for the writer before senders are suspended.
    pub outbound_queue: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_queue: 64,
        }
    }
}

/// Why a connection task finished.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    IdleTimeout(Duration),
    Requested,
    Corrupt(Corruption),
    Io(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::IdleTimeout(window) => write!(f, "no frame for {}s", window.as_secs()),
            Self::Requested => f.write_str("closed by server"),
            Self::Corrupt(c) => write!(f, "protocol corruption: {c}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the device listener.
///
/// # Errors
///
/// [`NetworkError::Bind`] if the address is in use or not permitted.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NetworkError::Bind { addr, source })
}

/// Accepts device connections until `running` is cleared.
///
/// On exit every open connection is closed and its teardown awaited, so by
/// the time this returns all devices have been unregistered.
///
/// # Errors
///
/// [`NetworkError::Io`] if the listener's local address cannot be read.
/// Accept errors are logged and the loop continues.
pub async fn run_server(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    options: ConnectionOptions,
    running: Arc<AtomicBool>,
) -> Result<(), NetworkError> {
    let local = listener.local_addr()?;
    info!("radar server listening on {local}");
    ctx.events
        .publish(ServerEvent::system(format!("Server started on port {}", local.port())));

    let dispatcher = Dispatcher::new(Arc::clone(&ctx));
    let root = CancellationToken::new();
    let mut connections = JoinSet::new();

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Reap finished connection tasks so the set does not grow unbounded.
        while connections.try_join_next().is_some() {}

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("accepted connection from {peer}");
                let ctx = Arc::clone(&ctx);
                let dispatcher = dispatcher.clone();
                let options = options.clone();
                let shutdown = root.child_token();
                connections.spawn(async move {
                    serve_connection(stream, peer, ctx, dispatcher, options, shutdown).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of descriptors).  Keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    root.cancel();
    while connections.join_next().await.is_some() {}

    ctx.events.publish(ServerEvent::system("Server stopped"));
    info!("radar server stopped");
    Ok(())
}

// ── Per-connection pipeline ───────────────────────────────────────────────────

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    dispatcher: Dispatcher,
    options: ConnectionOptions,
    shutdown: CancellationToken,
) {
    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("dropping connection from {peer}: {e}");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {peer}: {e}");
    }

    let (conn, mut outbound) = Connection::open(peer, local, options.outbound_queue, shutdown);
    info!(conn = %conn.id(), "connection opened from {peer}");

    let (mut sink, mut frames) =
        Framed::new(stream, FrameCodec::new(options.max_frame_len)).split();

    // ── Writer ────────────────────────────────────────────────────────────────
    let writer_token = conn.shutdown_token();
    let writer_id = conn.id();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_token.cancelled() => break,
                next = outbound.recv() => {
                    let Some(frame) = next else { break };
                    if let Err(e) = sink.send(frame).await {
                        debug!(conn = %writer_id, "write failed: {e}");
                        writer_token.cancel();
                        break;
                    }
                }
            }
        }
        if let Err(e) = sink.close().await {
            debug!(conn = %writer_id, "close failed: {e}");
        }
    });

    // ── Reader ────────────────────────────────────────────────────────────────
    let mut idle = IdleSupervisor::new(options.idle_timeout);
    let reason = loop {
        let deadline = idle.deadline();
        tokio::select! {
            _ = conn.closed() => break CloseReason::Requested,
            _ = sleep_until(deadline) => break CloseReason::IdleTimeout(idle.window()),
            next = frames.next() => match next {
                None => break CloseReason::PeerClosed,
                Some(Err(FrameError::ProtocolCorruption(c))) => break CloseReason::Corrupt(c),
                Some(Err(FrameError::Io(e))) => break CloseReason::Io(e),
                Some(Ok(frame)) => {
                    idle.reset();
                    conn.mark_read();
                    if let Err(e) = dispatcher.dispatch(&conn, frame).await {
                        log_dispatch_error(&conn, &e);
                    }
                }
            },
        }
    };

    // ── Teardown ──────────────────────────────────────────────────────────────
    conn.close();
    if let Err(e) = writer.await {
        warn!(conn = %conn.id(), "writer task failed: {e}");
    }

    let released = ctx.correlator.release_connection(conn.id());
    let device = ctx.sessions.unregister(conn.id());
    if let Some(device_id) = &device {
        ctx.properties.clear(device_id);
    }

    match (&reason, &device) {
        (CloseReason::Corrupt(_) | CloseReason::Io(_), Some(device_id)) => {
            warn!(conn = %conn.id(), device_id = %device_id, released, "connection closed: {reason}");
        }
        (CloseReason::Corrupt(_) | CloseReason::Io(_), None) => {
            warn!(conn = %conn.id(), released, "connection from {peer} closed: {reason}");
        }
        (_, Some(device_id)) => {
            info!(conn = %conn.id(), device_id = %device_id, released, "connection closed: {reason}");
        }
        (_, None) => {
            info!(conn = %conn.id(), released, "connection from {peer} closed: {reason}");
        }
    }
}

fn log_dispatch_error(conn: &Connection, err: &DispatchError) {
    match err {
        DispatchError::Decode(DecodeError::UnknownMessageType(tag)) => {
            warn!(conn = %conn.id(), "dropping frame with unknown type tag {tag}");
        }
        DispatchError::Decode(e) => warn!(conn = %conn.id(), "dropping frame: {e}"),
        DispatchError::Unroutable(_) => warn!(conn = %conn.id(), "dropping frame: {err}"),
        DispatchError::HandlerFailure { .. } => error!(conn = %conn.id(), "{err}"),
    }
}
