//! JSON-lines event sink.
//!
//! Writes each [`ServerEvent`] as one JSON object per line, e.g.
//!
//! ```text
//! {"event":"device_connected","device_id":"DEV1","ip_address":"10.1.0.7"}
//! {"event":"heartbeat","device_id":"DEV1"}
//! ```
//!
//! Used by `--print-events` to stream events to stdout for other tools.

use std::io::Write;
use std::sync::Mutex;

use tracing::warn;

use crate::application::events::{EventListener, ServerEvent};

pub struct JsonLinesListener<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesListener<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventListener for JsonLinesListener<W> {
    fn on_event(&self, event: &ServerEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("could not serialise event: {e}");
                return;
            }
        };
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!("could not write event: {e}");
        }
    }
}
