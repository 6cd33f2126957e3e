//! Shared engine state handed to every connection task.
//!
//! One [`ServerContext`] is built at startup and passed by `Arc` into the
//! acceptor, the dispatcher and the device command service.  There are no
//! process-wide statics, so tests can run several independent engines side
//! by side.

use std::sync::Arc;
use std::time::Duration;

use radar_core::DeviceMessage;

use crate::application::correlator::{Correlator, DEFAULT_MAX_PENDING, DEFAULT_RESPONSE_TIMEOUT};
use crate::application::events::EventNotifier;
use crate::application::property_cache::PropertyCache;
use crate::application::session_registry::SessionRegistry;

/// Protocol-level knobs for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Bound on every request/response exchange and expiry of its slot.
    pub response_timeout: Duration,
    /// Cap on outstanding correlator slots.
    pub max_pending_requests: usize,
    /// Events a slow subscriber may lag behind before losing some.
    pub event_buffer: usize,
    /// Host returned to `GetServerReq`; `None` uses the accepting socket.
    pub advertised_host: Option<String>,
    /// Port returned to `GetServerReq`; `None` uses the accepting socket.
    pub advertised_port: Option<u16>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING,
            event_buffer: 1024,
            advertised_host: None,
            advertised_port: None,
        }
    }
}

/// Registries, correlator, cache and notifier for one engine instance.
pub struct ServerContext {
    pub settings: EngineSettings,
    pub events: EventNotifier,
    pub sessions: SessionRegistry,
    pub correlator: Arc<Correlator<DeviceMessage>>,
    pub properties: PropertyCache,
}

impl ServerContext {
    pub fn new(settings: EngineSettings) -> Arc<Self> {
        let events = EventNotifier::new(settings.event_buffer);
        let correlator = Arc::new(Correlator::new(
            settings.response_timeout,
            settings.max_pending_requests,
        ));
        Arc::new(Self {
            sessions: SessionRegistry::new(events.clone()),
            events,
            correlator,
            properties: PropertyCache::new(),
            settings,
        })
    }
}
