//! Message dispatcher: frame → typed message → handler.
//!
//! The tag → payload-shape half of the table lives in
//! [`radar_core::DeviceMessage::decode`]; the message → handler half is the
//! `match` in [`Dispatcher::route`].  Together they form the dispatch table:
//!
//! | Inbound message | Handler behaviour |
//! |---|---|
//! | GetServerReq | reply GetServerResponse with the advertised address |
//! | RegisterReq | bind device id to the connection, reply RegisterResponse |
//! | HeartbeatReq | emit `Heartbeat` if registered, reply HeartbeatResp(seq=8) |
//! | SetDevicePropertyResp | fulfil the pending set-property call |
//! | GetDevicePropertyResp | merge into the property cache, fulfil the query |
//! | OTAPushResp, SubscribeBreathRateResp | fulfil the pending call, if any |
//! | Start/StopVoiceCall | reply with result 0 |
//! | telemetry, DebugInfo, other responses | observed only |
//!
//! Every inbound frame except heartbeats is also published as a
//! `MessageReceived` event before its handler runs.
//!
//! Errors returned from [`Dispatcher::dispatch`] are per-frame.  None of them
//! should close the connection; that is reserved for codec failures.

use std::collections::HashMap;
use std::sync::Arc;

use radar_core::protocol::payloads::{
    CommonResponse, GetServerRequest, GetServerResponse, PropertyItems, RegisterRequest,
    RegisterResponse,
};
use radar_core::{DecodeError, DeviceMessage, Direction, Frame, MessageType};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::connection::{Connection, ConnectionError};
use crate::application::context::ServerContext;
use crate::application::correlator::CorrelationKey;
use crate::application::events::ServerEvent;

/// Registration result codes.
pub const REGISTER_OK: i32 = 0;
pub const REGISTER_INVALID_ID: i32 = 1;

/// Per-frame dispatch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Unknown tag or undecodable payload.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A server-to-device message type arrived from a device.
    #[error("{0} is only sent by the server")]
    Unroutable(MessageType),

    /// The handler ran but could not complete.
    #[error("{message_type} handler failed: {source}")]
    HandlerFailure {
        message_type: MessageType,
        #[source]
        source: ConnectionError,
    },
}

/// Routes decoded frames from one or more connections to their handlers.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Decodes `frame` and runs its handler.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].  The caller logs and carries on.
    pub async fn dispatch(&self, conn: &Arc<Connection>, frame: Frame) -> Result<(), DispatchError> {
        let source = self.source_label(conn);
        debug!(
            conn = %conn.id(),
            source = %source,
            "{} (size: {} bytes)",
            MessageType::describe(frame.tag),
            frame.payload.len()
        );

        let msg = match DeviceMessage::from_frame(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                self.ctx.events.publish(ServerEvent::MessageReceived {
                    device_id: source,
                    kind: MessageType::describe(frame.tag),
                    text: format!(
                        "{} (size: {} bytes)",
                        MessageType::describe(frame.tag),
                        frame.payload.len()
                    ),
                });
                return Err(e.into());
            }
        };

        let message_type = msg.message_type();
        if message_type.direction() == Direction::ServerToDevice {
            return Err(DispatchError::Unroutable(message_type));
        }

        if !matches!(msg, DeviceMessage::HeartbeatRequest(_)) {
            self.ctx.events.publish(ServerEvent::MessageReceived {
                device_id: source.clone(),
                kind: message_type.name().to_string(),
                text: msg.to_string(),
            });
        }

        self.route(conn, &source, msg)
            .await
            .map_err(|e| DispatchError::HandlerFailure {
                message_type,
                source: e,
            })
    }

    async fn route(
        &self,
        conn: &Arc<Connection>,
        source: &str,
        msg: DeviceMessage,
    ) -> Result<(), ConnectionError> {
        match msg {
            DeviceMessage::GetServerRequest(req) => self.on_get_server(conn, req).await,
            DeviceMessage::RegisterRequest(req) => self.on_register(conn, req).await,
            DeviceMessage::HeartbeatRequest(_) => self.on_heartbeat(conn).await,
            DeviceMessage::Properties(items) => {
                self.on_properties(conn, items);
                Ok(())
            }
            response @ (DeviceMessage::SetPropertyResponse(_)
            | DeviceMessage::OtaPushResponse(_)
            | DeviceMessage::SubscribeBreathRateResponse(_)) => {
                self.fulfil(conn, response);
                Ok(())
            }
            DeviceMessage::StartVoiceCall(call) => {
                info!(source, call_id = %call.call_id, "voice call started");
                self.reply(conn, source, DeviceMessage::StartVoiceCallResponse(CommonResponse::default()))
                    .await
            }
            DeviceMessage::StopVoiceCall(call) => {
                info!(source, call_id = %call.call_id, "voice call stopped");
                self.reply(conn, source, DeviceMessage::StopVoiceCallResponse(CommonResponse::default()))
                    .await
            }
            DeviceMessage::FallDown(event) => {
                warn!(source, target_id = event.target_id, state = event.state, "fall event");
                Ok(())
            }
            DeviceMessage::DebugInfo(notify) => {
                info!(source, "device notify: {}", notify.message);
                Ok(())
            }
            DeviceMessage::RestartResponse(_)
            | DeviceMessage::ServerHeartbeatResponse(_)
            | DeviceMessage::Trajectory(_)
            | DeviceMessage::BreathHeartRate(_)
            | DeviceMessage::Position(_)
            | DeviceMessage::PeopleCount(_)
            | DeviceMessage::TrajectoryStats(_) => Ok(()),
            other => {
                // Server-originated types are filtered out before routing.
                debug!(source, "no handler for {}", other.message_type());
                Ok(())
            }
        }
    }

    // ── Handlers ──────────────────────────────────────────────────────────────

    async fn on_get_server(
        &self,
        conn: &Arc<Connection>,
        req: GetServerRequest,
    ) -> Result<(), ConnectionError> {
        let settings = &self.ctx.settings;
        let host = settings
            .advertised_host
            .clone()
            .unwrap_or_else(|| conn.local().ip().to_string());
        let port = settings.advertised_port.unwrap_or_else(|| conn.local().port());
        debug!(uid = %req.uid, %host, port, "answering server lookup");

        let reply = DeviceMessage::GetServerResponse(GetServerResponse {
            host,
            port: i32::from(port),
        });
        let label = if req.uid.is_empty() {
            conn.ip().to_string()
        } else {
            req.uid
        };
        self.reply(conn, &label, reply).await
    }

    async fn on_register(
        &self,
        conn: &Arc<Connection>,
        req: RegisterRequest,
    ) -> Result<(), ConnectionError> {
        let device_id = req.uid.trim();
        if device_id.is_empty() {
            warn!(conn = %conn.id(), ip = %conn.ip(), "registration without a device id");
            let reply = DeviceMessage::RegisterResponse(RegisterResponse {
                result: REGISTER_INVALID_ID,
            });
            return self.reply(conn, &conn.ip().to_string(), reply).await;
        }

        self.ctx.sessions.register(conn, device_id);
        if !req.firmware_version.is_empty() {
            debug!(device_id, firmware = %req.firmware_version, "device firmware");
        }
        let reply = DeviceMessage::RegisterResponse(RegisterResponse {
            result: REGISTER_OK,
        });
        self.reply(conn, device_id, reply).await
    }

    /// Unregistered connections still get the ack, but no `Heartbeat`
    /// event: observers only track registered devices.
    async fn on_heartbeat(&self, conn: &Arc<Connection>) -> Result<(), ConnectionError> {
        if let Some(device_id) = self.ctx.sessions.resolve_device_id(conn.id()) {
            self.ctx.events.publish(ServerEvent::Heartbeat { device_id });
        }
        conn.send(&DeviceMessage::heartbeat_ack()).await
    }

    fn on_properties(&self, conn: &Arc<Connection>, items: PropertyItems) {
        match self.ctx.sessions.resolve_device_id(conn.id()) {
            Some(device_id) => {
                let values: HashMap<String, String> = items
                    .properties
                    .iter()
                    .map(|item| (item.key.clone(), item.value.clone()))
                    .collect();
                self.ctx.properties.update(&device_id, values);
            }
            None => warn!(conn = %conn.id(), "property report from unregistered connection"),
        }
        self.fulfil(conn, DeviceMessage::Properties(items));
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn fulfil(&self, conn: &Arc<Connection>, response: DeviceMessage) {
        let key = CorrelationKey::new(response.message_type(), conn.id());
        if !self.ctx.correlator.fulfil(&key, response) {
            debug!(key = %key, "response arrived with nobody waiting");
        }
    }

    async fn reply(
        &self,
        conn: &Arc<Connection>,
        device_id: &str,
        msg: DeviceMessage,
    ) -> Result<(), ConnectionError> {
        conn.send(&msg).await?;
        self.ctx.events.publish(ServerEvent::MessageSent {
            device_id: device_id.to_string(),
            kind: msg.message_type().name().to_string(),
            text: msg.to_string(),
        });
        Ok(())
    }

    /// Device id if registered, otherwise the remote IP.
    fn source_label(&self, conn: &Connection) -> String {
        self.ctx
            .sessions
            .resolve_device_id(conn.id())
            .unwrap_or_else(|| conn.ip().to_string())
    }
}
