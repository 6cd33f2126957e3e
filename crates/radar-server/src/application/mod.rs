//! Application layer of the radar gateway.
//!
//! Everything in here works on [`Connection`](connection::Connection)
//! handles and decoded [`DeviceMessage`](radar_core::DeviceMessage)s.  No
//! sockets are opened and no bytes are read here, so every use case can be
//! driven from a unit test with an in-memory outbound queue.
//!
//! # Sub-modules
//!
//! - **`connection`**       – Handle to one accepted transport link: identity,
//!   peer address, outbound frame queue and close signal.
//!
//! - **`session_registry`** – Device id ↔ connection binding with eviction of
//!   duplicate registrations.
//!
//! - **`correlator`**       – Single-slot rendezvous that turns an outbound
//!   request plus a later inbound response into one awaited call.
//!
//! - **`property_cache`**   – Last-known property snapshot per device.
//!
//! - **`events`**           – Broadcast fan-out of connect, disconnect,
//!   heartbeat and message events to observers.
//!
//! - **`dispatch`**         – Routes each inbound message to its handler.
//!
//! - **`device_commands`**  – Operator-facing calls: set/query properties,
//!   restart, firmware push, breath-rate subscription.
//!
//! - **`context`**          – The shared state above, bundled per engine.

pub mod connection;
pub mod context;
pub mod correlator;
pub mod device_commands;
pub mod dispatch;
pub mod events;
pub mod property_cache;
pub mod session_registry;
