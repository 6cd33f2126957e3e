//! Request/response correlator: synchronous calls over an async connection.
//!
//! Flow:
//! 1. The caller builds a [`CorrelationKey`] from the *response* message type
//!    and the target connection.
//! 2. [`Correlator::begin_wait`] reserves a single-slot rendezvous for that
//!    key and hands back a [`Waiter`].
//! 3. The caller writes the request frame.
//! 4. The inbound handler that decodes the matching response calls
//!    [`Correlator::fulfil`].
//! 5. [`Waiter::wait`] returns the payload, or times out.
//!
//! Each slot is a `oneshot` channel, so there is never more than one value in
//! flight per key.  A slot disappears when it is fulfilled, when its waiter is
//! dropped, when its connection is released, or when the sweeper finds it
//! past its expiry.
//!
//! The table holds at most `max_pending` slots.  A caller reserves room on an
//! atomic counter before touching the map and gives it back whenever a slot
//! is removed, so concurrent callers cannot overshoot the cap.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use radar_core::MessageType;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::application::connection::ConnectionId;

/// Default wait bound and slot expiry.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(4);

/// Default cap on outstanding slots.
pub const DEFAULT_MAX_PENDING: usize = 50_000;

/// Identifies the one response a waiter is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub response: MessageType,
    pub connection: ConnectionId,
}

impl CorrelationKey {
    pub fn new(response: MessageType, connection: ConnectionId) -> Self {
        Self {
            response,
            connection,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.response, self.connection)
    }
}

/// Why a wait ended without a payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// The device did not answer within the bound.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The connection went away while the wait was outstanding.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// Another caller is already waiting on the same key.
    #[error("a request is already pending for {0}")]
    AlreadyPending(CorrelationKey),

    /// The slot table is full.
    #[error("pending request table is full ({0} entries)")]
    CapacityExceeded(usize),
}

struct Slot<T> {
    ticket: u64,
    sender: oneshot::Sender<T>,
    expires_at: Instant,
}

impl<T> Slot<T> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at && !self.sender.is_closed()
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    pub registered: AtomicU64,
    pub fulfilled: AtomicU64,
    pub unsolicited: AtomicU64,
    pub expired: AtomicU64,
    pub released: AtomicU64,
}

/// Slot map plus the number of slots reserved in it.
///
/// `reserved` is never below `slots.len()`: room is reserved before an
/// insert and returned after a removal.
struct SlotTable<T> {
    slots: DashMap<CorrelationKey, Slot<T>>,
    reserved: AtomicUsize,
}

impl<T> SlotTable<T> {
    fn try_reserve(&self, max: usize) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    fn give_back(&self, n: usize) {
        if n > 0 {
            self.reserved.fetch_sub(n, Ordering::AcqRel);
        }
    }

    fn remove(&self, key: &CorrelationKey) -> Option<Slot<T>> {
        let (_, slot) = self.slots.remove(key)?;
        self.give_back(1);
        Some(slot)
    }
}

/// Table of outstanding waits keyed by [`CorrelationKey`].
pub struct Correlator<T> {
    table: Arc<SlotTable<T>>,
    expiry: Duration,
    max_pending: usize,
    next_ticket: AtomicU64,
    stats: CorrelatorStats,
}

impl<T: Send + 'static> Correlator<T> {
    /// `expiry` is how long an unfulfilled slot may live; `max_pending` caps
    /// the table size.
    pub fn new(expiry: Duration, max_pending: usize) -> Self {
        Self {
            table: Arc::new(SlotTable {
                slots: DashMap::new(),
                reserved: AtomicUsize::new(0),
            }),
            expiry,
            max_pending,
            next_ticket: AtomicU64::new(1),
            stats: CorrelatorStats::default(),
        }
    }

    /// Reserves the slot for `key`.
    ///
    /// An expired or abandoned slot for the same key is replaced.
    ///
    /// # Errors
    ///
    /// - [`CorrelationError::AlreadyPending`] if a live waiter holds `key`.
    /// - [`CorrelationError::CapacityExceeded`] if the table is full even
    ///   after purging expired slots.
    pub fn begin_wait(&self, key: CorrelationKey) -> Result<Waiter<T>, CorrelationError> {
        if !self.table.try_reserve(self.max_pending) {
            self.purge_expired();
            if !self.table.try_reserve(self.max_pending) {
                warn!(max = self.max_pending, "pending request table full");
                return Err(CorrelationError::CapacityExceeded(self.max_pending));
            }
        }

        let now = Instant::now();
        let (sender, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let slot = Slot {
            ticket,
            sender,
            expires_at: now + self.expiry,
        };

        match self.table.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                // Either way the table does not grow.
                self.table.give_back(1);
                if occupied.get().is_live(now) {
                    return Err(CorrelationError::AlreadyPending(key));
                }
                debug!(key = %key, "replacing stale pending request");
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ticket, "registered pending request");

        Ok(Waiter {
            key,
            ticket,
            rx,
            table: Arc::downgrade(&self.table),
        })
    }

    /// Hands `payload` to the waiter on `key`.
    ///
    /// Returns `false` when nobody is waiting (late or unsolicited response).
    pub fn fulfil(&self, key: &CorrelationKey, payload: T) -> bool {
        let Some(slot) = self.table.remove(key) else {
            self.stats.unsolicited.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "response with no pending request");
            return false;
        };

        let elapsed_ms = self
            .expiry
            .saturating_sub(slot.expires_at.saturating_duration_since(Instant::now()))
            .as_millis();
        match slot.sender.send(payload) {
            Ok(()) => {
                self.stats.fulfilled.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, elapsed_ms, "fulfilled pending request");
                true
            }
            Err(_) => {
                self.stats.unsolicited.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "waiter gone before response arrived");
                false
            }
        }
    }

    /// Drops every slot belonging to `connection`.
    ///
    /// Their waiters wake immediately with
    /// [`CorrelationError::ConnectionClosed`].
    pub fn release_connection(&self, connection: ConnectionId) -> usize {
        let mut released = 0;
        self.table.slots.retain(|key, _| {
            if key.connection == connection {
                released += 1;
                false
            } else {
                true
            }
        });
        self.table.give_back(released);
        if released > 0 {
            self.stats
                .released
                .fetch_add(released as u64, Ordering::Relaxed);
            debug!(conn = %connection, released, "released pending requests");
        }
        released
    }

    /// Removes slots past their expiry.  Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.table.slots.retain(|key, slot| {
            if slot.is_live(now) {
                true
            } else {
                debug!(key = %key, "removing expired pending request");
                removed += 1;
                false
            }
        });
        self.table.give_back(removed);
        if removed > 0 {
            self.stats
                .expired
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.table.slots.len()
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.table.slots.contains_key(key)
    }

    pub fn stats(&self) -> &CorrelatorStats {
        &self.stats
    }

    /// Spawns a task that purges expired slots every `period`.
    ///
    /// The task stops on its own once the correlator is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let correlator: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(correlator) = correlator.upgrade() else {
                    break;
                };
                let removed = correlator.purge_expired();
                if removed > 0 {
                    debug!(removed, "sweeper purged expired pending requests");
                }
            }
        })
    }
}

/// The caller's side of one reserved slot.
///
/// Dropping a waiter without calling [`Waiter::wait`] frees its slot.
pub struct Waiter<T> {
    key: CorrelationKey,
    ticket: u64,
    rx: oneshot::Receiver<T>,
    table: Weak<SlotTable<T>>,
}

impl<T> Waiter<T> {
    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    /// Suspends until the response arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`CorrelationError::Timeout`] when the bound elapses first.
    /// - [`CorrelationError::ConnectionClosed`] when the slot was released.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, CorrelationError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(CorrelationError::ConnectionClosed),
            Err(_) => {
                debug!(key = %self.key, "pending request timed out");
                Err(CorrelationError::Timeout(timeout))
            }
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            let ticket = self.ticket;
            if table
                .slots
                .remove_if(&self.key, |_, slot| slot.ticket == ticket)
                .is_some()
            {
                table.give_back(1);
            }
        }
    }
}
