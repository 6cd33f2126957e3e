//! Read-inactivity supervision for one connection.
//!
//! The supervisor holds a deadline that moves forward every time a frame is
//! decoded.  The connection's read loop races `sleep_until(deadline)` against
//! the next frame; if the sleep wins, the connection is closed.

use std::time::Duration;

use tokio::time::Instant;

/// Default read-inactivity window.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct IdleSupervisor {
    window: Duration,
    deadline: Instant,
}

impl IdleSupervisor {
    /// Starts the window now.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Instant::now() + window,
        }
    }

    /// Pushes the deadline to one full window from now.
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.window;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl Default for IdleSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}
