//! Device session registry: device id ↔ live connection.
//!
//! The registry keeps two indexes:
//!
//! ```text
//! devices:      "DEV1" ──► Arc<Connection>   (forward)
//! connections:  conn-id ──► "DEV1"           (reverse)
//! ```
//!
//! A device has at most one live connection.  Registering a device that is
//! already bound closes the old connection and rebinds the id, so a sensor
//! that reconnects after a network blip replaces its stale session instead of
//! being refused.
//!
//! # Locking
//!
//! Both maps are `DashMap`s.  Every mutation for a device runs while holding
//! that device's forward entry, so concurrent registrations for the same id
//! serialise and the reverse index is updated under the same guard.  The
//! forward entry is always taken before the reverse one.
//!
//! Unregistering takes the forward entry too and only unbinds the device if
//! the entry still points at the unregistering connection.  A connection
//! that lost its binding to a newer registration reports nothing.
//!
//! `DeviceConnected` and `DeviceDisconnected` are queued on the broadcast
//! channel while the forward entry is held, so observers see them in the
//! order the binding changed.  Queuing never waits on a subscriber; listener
//! code runs on its own task.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::application::connection::{Connection, ConnectionId};
use crate::application::events::{EventNotifier, ServerEvent};

/// Snapshot row describing one registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device_id: String,
    pub ip: IpAddr,
    pub connection: ConnectionId,
}

/// Forward and reverse session indexes.
pub struct SessionRegistry {
    devices: DashMap<String, Arc<Connection>>,
    connections: DashMap<ConnectionId, String>,
    events: EventNotifier,
}

impl SessionRegistry {
    pub fn new(events: EventNotifier) -> Self {
        Self {
            devices: DashMap::new(),
            connections: DashMap::new(),
            events,
        }
    }

    /// Binds `device_id` to `conn`, evicting any other connection bound to it.
    ///
    /// Returns the evicted connection, already closed.
    pub fn register(&self, conn: &Arc<Connection>, device_id: &str) -> Option<Arc<Connection>> {
        // The same connection re-registering under a new id drops its old binding.
        if let Some(previous) = self.connections.get(&conn.id()).map(|e| e.value().clone()) {
            if previous != device_id {
                self.devices
                    .remove_if(&previous, |_, bound| bound.id() == conn.id());
            }
        }

        let evicted = match self.devices.entry(device_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let old = occupied.insert(Arc::clone(conn));
                self.connections.insert(conn.id(), device_id.to_string());
                let evicted = if old.id() == conn.id() {
                    None
                } else {
                    self.connections.remove(&old.id());
                    Some(old)
                };
                self.publish_connected(conn, device_id);
                evicted
            }
            Entry::Vacant(vacant) => {
                let _bound = vacant.insert(Arc::clone(conn));
                self.connections.insert(conn.id(), device_id.to_string());
                self.publish_connected(conn, device_id);
                None
            }
        };

        if let Some(old) = &evicted {
            info!(
                device_id,
                old_conn = %old.id(),
                new_conn = %conn.id(),
                "device re-registered; closing previous connection"
            );
            old.close();
        }
        info!(device_id, conn = %conn.id(), ip = %conn.ip(), "device registered");
        evicted
    }

    fn publish_connected(&self, conn: &Connection, device_id: &str) {
        self.events.publish(ServerEvent::DeviceConnected {
            device_id: device_id.to_string(),
            ip_address: conn.ip().to_string(),
        });
    }

    /// Live connection for `device_id`, if any.
    pub fn resolve(&self, device_id: &str) -> Option<Arc<Connection>> {
        self.devices.get(device_id).map(|e| Arc::clone(e.value()))
    }

    /// Device id bound to `conn_id`, if any.
    pub fn resolve_device_id(&self, conn_id: ConnectionId) -> Option<String> {
        self.connections.get(&conn_id).map(|e| e.value().clone())
    }

    /// Drops whatever binding `conn_id` has.  Unknown ids are a no-op.
    ///
    /// Returns the device id that was unbound, or `None` when `conn_id` had
    /// no binding or had already been replaced by a newer registration.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<String> {
        let device_id = self.resolve_device_id(conn_id)?;

        match self.devices.entry(device_id.clone()) {
            Entry::Occupied(bound) if bound.get().id() == conn_id => {
                self.connections.remove(&conn_id);
                self.events.publish(ServerEvent::DeviceDisconnected {
                    device_id: device_id.clone(),
                });
                bound.remove();
            }
            _ => {
                // Replaced between the lookup and the lock.
                self.connections.remove_if(&conn_id, |_, id| *id == device_id);
                debug!(device_id = %device_id, conn = %conn_id, "stale session already replaced");
                return None;
            }
        }

        info!(device_id = %device_id, conn = %conn_id, "device unregistered");
        Some(device_id)
    }

    /// Closes the connection bound to `device_id`.
    ///
    /// The binding itself is removed when the connection's task finishes.
    pub fn disconnect(&self, device_id: &str) -> bool {
        match self.resolve(device_id) {
            Some(conn) => {
                debug!(device_id, conn = %conn.id(), "closing device connection on request");
                conn.close();
                true
            }
            None => false,
        }
    }

    /// All registered devices, sorted by id.
    pub fn devices(&self) -> Vec<DeviceSummary> {
        let mut rows: Vec<DeviceSummary> = self
            .devices
            .iter()
            .map(|entry| DeviceSummary {
                device_id: entry.key().clone(),
                ip: entry.value().ip(),
                connection: entry.value().id(),
            })
            .collect();
        rows.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        rows
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{EventFilter, EventKind};
    use std::sync::Barrier;
    use std::thread;
    use tokio_util::sync::CancellationToken;

    fn connection(ip: &str) -> Arc<Connection> {
        let (conn, _rx) = Connection::open(
            format!("{ip}:50000").parse().unwrap(),
            "0.0.0.0:1060".parse().unwrap(),
            4,
            CancellationToken::new(),
        );
        conn
    }

    fn registry() -> (SessionRegistry, EventNotifier) {
        let events = EventNotifier::new(32);
        (SessionRegistry::new(events.clone()), events)
    }

    #[tokio::test]
    async fn test_register_binds_both_indexes_and_emits_connected() {
        // Arrange
        let (registry, events) = registry();
        let mut sub = events.subscribe(EventFilter::ALL);
        let conn = connection("10.0.0.5");

        // Act
        let evicted = registry.register(&conn, "DEV1");

        // Assert
        assert!(evicted.is_none());
        assert_eq!(registry.resolve("DEV1").map(|c| c.id()), Some(conn.id()));
        assert_eq!(registry.resolve_device_id(conn.id()).as_deref(), Some("DEV1"));
        assert_eq!(
            sub.recv().await,
            Some(ServerEvent::DeviceConnected {
                device_id: "DEV1".to_string(),
                ip_address: "10.0.0.5".to_string(),
            })
        );
    }

    #[test]
    fn test_second_registration_evicts_and_closes_first() {
        // Arrange
        let (registry, _events) = registry();
        let c1 = connection("10.0.0.5");
        let c2 = connection("10.0.0.6");
        registry.register(&c1, "DEV1");

        // Act
        let evicted = registry.register(&c2, "DEV1");

        // Assert
        assert_eq!(evicted.map(|c| c.id()), Some(c1.id()));
        assert!(c1.is_closed(), "evicted connection must be closed");
        assert!(!c2.is_closed());
        assert_eq!(registry.resolve("DEV1").map(|c| c.id()), Some(c2.id()));
        assert_eq!(registry.resolve_device_id(c1.id()), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_of_evicted_connection_leaves_new_binding() {
        // Arrange
        let (registry, events) = registry();
        let mut sub = events.subscribe(EventFilter::only(&[EventKind::DeviceDisconnected]));
        let c1 = connection("10.0.0.5");
        let c2 = connection("10.0.0.6");
        registry.register(&c1, "DEV1");
        registry.register(&c2, "DEV1");

        // Act: the old connection's task finishes and unregisters
        let unbound = registry.unregister(c1.id());

        // Assert
        assert_eq!(unbound, None);
        assert_eq!(registry.resolve("DEV1").map(|c| c.id()), Some(c2.id()));
        assert!(sub.try_recv().is_none(), "no disconnect for an evicted session");
    }

    #[test]
    fn test_unregister_racing_reregistration_keeps_new_binding() {
        for _ in 0..500 {
            // Arrange
            let (registry, events) = registry();
            let c1 = connection("10.0.0.5");
            let c2 = connection("10.0.0.6");
            registry.register(&c1, "DEV1");
            let mut sub = events.subscribe(EventFilter::only(&[
                EventKind::DeviceConnected,
                EventKind::DeviceDisconnected,
            ]));
            let barrier = Barrier::new(2);

            // Act: the old socket drops while the device reconnects
            let unbound = thread::scope(|s| {
                s.spawn(|| {
                    barrier.wait();
                    registry.register(&c2, "DEV1");
                });
                let teardown = s.spawn(|| {
                    barrier.wait();
                    registry.unregister(c1.id())
                });
                teardown.join().unwrap()
            });

            // Assert
            assert_eq!(registry.resolve("DEV1").map(|c| c.id()), Some(c2.id()));
            assert_eq!(registry.resolve_device_id(c2.id()).as_deref(), Some("DEV1"));
            assert_eq!(registry.resolve_device_id(c1.id()), None);
            let kinds: Vec<EventKind> = std::iter::from_fn(|| sub.try_recv())
                .map(|event| event.kind())
                .collect();
            let expected = match unbound {
                Some(_) => vec![EventKind::DeviceDisconnected, EventKind::DeviceConnected],
                None => vec![EventKind::DeviceConnected],
            };
            assert_eq!(kinds, expected, "events must follow the final binding");
        }
    }

    #[test]
    fn test_concurrent_registrations_leave_exactly_one_live_binding() {
        const CONTENDERS: usize = 8;

        for _ in 0..100 {
            // Arrange
            let (registry, events) = registry();
            let mut disconnects =
                events.subscribe(EventFilter::only(&[EventKind::DeviceDisconnected]));
            let conns: Vec<Arc<Connection>> = (1..=CONTENDERS)
                .map(|i| connection(&format!("10.0.1.{i}")))
                .collect();
            let barrier = Barrier::new(CONTENDERS);

            // Act: evicted contenders tear down the way their tasks would
            thread::scope(|s| {
                for conn in &conns {
                    let (registry, barrier) = (&registry, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        registry.register(conn, "DEV1");
                        if conn.is_closed() {
                            registry.unregister(conn.id());
                        }
                    });
                }
            });

            // Assert
            let winner = registry.resolve("DEV1").expect("one binding survives");
            assert_eq!(registry.len(), 1);
            assert!(!winner.is_closed());
            for conn in &conns {
                if conn.id() == winner.id() {
                    assert_eq!(registry.resolve_device_id(conn.id()).as_deref(), Some("DEV1"));
                } else {
                    assert!(conn.is_closed(), "every replaced contender is closed");
                    assert_eq!(registry.resolve_device_id(conn.id()), None);
                }
            }
            assert!(disconnects.try_recv().is_none(), "the device never went away");
        }
    }

    #[tokio::test]
    async fn test_unregister_removes_binding_and_emits_disconnected() {
        let (registry, events) = registry();
        let mut sub = events.subscribe(EventFilter::only(&[EventKind::DeviceDisconnected]));
        let conn = connection("10.0.0.5");
        registry.register(&conn, "DEV1");

        let unbound = registry.unregister(conn.id());

        assert_eq!(unbound.as_deref(), Some("DEV1"));
        assert!(registry.resolve("DEV1").is_none());
        assert!(registry.is_empty());
        assert_eq!(
            sub.recv().await,
            Some(ServerEvent::DeviceDisconnected {
                device_id: "DEV1".to_string()
            })
        );
    }

    #[test]
    fn test_unregister_unknown_connection_is_noop() {
        let (registry, _events) = registry();
        let stranger = connection("10.0.0.9");

        assert_eq!(registry.unregister(stranger.id()), None);
        assert_eq!(registry.unregister(stranger.id()), None);
    }

    #[test]
    fn test_reregister_same_connection_under_new_id_moves_binding() {
        let (registry, _events) = registry();
        let conn = connection("10.0.0.5");
        registry.register(&conn, "OLD");

        let evicted = registry.register(&conn, "NEW");

        assert!(evicted.is_none());
        assert!(!conn.is_closed());
        assert!(registry.resolve("OLD").is_none());
        assert_eq!(registry.resolve_device_id(conn.id()).as_deref(), Some("NEW"));
    }

    #[test]
    fn test_reregister_same_connection_same_id_keeps_it_open() {
        let (registry, _events) = registry();
        let conn = connection("10.0.0.5");
        registry.register(&conn, "DEV1");

        let evicted = registry.register(&conn, "DEV1");

        assert!(evicted.is_none());
        assert!(!conn.is_closed());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_disconnect_closes_bound_connection() {
        let (registry, _events) = registry();
        let conn = connection("10.0.0.5");
        registry.register(&conn, "DEV1");

        assert!(registry.disconnect("DEV1"));
        assert!(conn.is_closed());
        assert!(!registry.disconnect("NOPE"));
    }

    #[test]
    fn test_devices_lists_sorted_summaries() {
        let (registry, _events) = registry();
        registry.register(&connection("10.0.0.2"), "B");
        registry.register(&connection("10.0.0.1"), "A");

        let ids: Vec<String> = registry.devices().into_iter().map(|d| d.device_id).collect();

        assert_eq!(ids, vec!["A".to_string(), "B".to_string()]);
    }
}
