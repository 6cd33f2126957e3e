//! Network infrastructure.
//!
//! # Sub-modules
//!
//! - **`acceptor`** – Binds the listening socket, runs the accept loop and
//!   drives one read/write pipeline per device connection.
//!
//! - **`idle`**     – Read-inactivity deadline for a single connection.

pub mod acceptor;
pub mod idle;

pub use acceptor::{bind, run_server, ConnectionOptions, NetworkError};
