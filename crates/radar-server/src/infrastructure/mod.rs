//! Infrastructure layer of the radar gateway.
//!
//! Contains the OS-facing adapters: the TCP listener and per-connection
//! pipeline, TOML configuration on disk, and the JSON event log sink.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `radar_core`, but MUST NOT be imported by the `application` layer.

pub mod event_log;
pub mod network;
pub mod storage;

pub use network::run_server;
