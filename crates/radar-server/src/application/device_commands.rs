//! Device commands: the synchronous operations offered to operators and
//! configuration tooling.
//!
//! Each correlated command follows the same shape:
//!
//! ```text
//! resolve device ─► begin_wait(response type, connection) ─► send request
//!                                                    │
//!                  ◄── payload / Timeout / ConnectionClosed
//! ```
//!
//! The wait is bounded by [`EngineSettings::response_timeout`] and also ends
//! as soon as the device's connection closes.  A timeout is reported to the
//! caller, never retried here.
//!
//! [`EngineSettings::response_timeout`]: crate::application::context::EngineSettings

use std::collections::HashMap;
use std::sync::Arc;

use radar_core::protocol::messages::describe_result;
use radar_core::protocol::payloads::{OtaPush, OtaPushResponse, SubscribeBreathRate};
use radar_core::{DeviceMessage, MessageType};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::connection::{Connection, ConnectionError};
use crate::application::context::ServerContext;
use crate::application::correlator::{CorrelationError, CorrelationKey};
use crate::application::events::ServerEvent;
use crate::application::session_registry::DeviceSummary;

/// Why a device command did not succeed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("device {0} is not connected")]
    NotConnected(String),

    /// The device answered with a non-zero result code.
    #[error("device {device_id} rejected the request: {reason}")]
    Rejected {
        device_id: String,
        result: i32,
        reason: String,
    },

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("device {device_id} answered with unexpected {message_type}")]
    UnexpectedResponse {
        device_id: String,
        message_type: MessageType,
    },
}

/// Operator-facing command service over a [`ServerContext`].
#[derive(Clone)]
pub struct DeviceCommands {
    ctx: Arc<ServerContext>,
}

impl DeviceCommands {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Sets one property and waits for the device to confirm it.
    ///
    /// On success the property cache is updated with the new value.
    ///
    /// # Errors
    ///
    /// [`CommandError::Rejected`] for a non-zero result code, otherwise the
    /// resolution, send or correlation failure.
    pub async fn set_property(&self, device_id: &str, key: &str, value: &str) -> Result<(), CommandError> {
        let request = DeviceMessage::set_property(key, value);
        let response = self
            .request(device_id, request, MessageType::SetDevicePropertyResp)
            .await?;

        let DeviceMessage::SetPropertyResponse(result) = response else {
            return Err(self.unexpected(device_id, &response));
        };
        if !result.is_success() {
            let mut reason = describe_result(result.result);
            if !result.errmsg.is_empty() {
                reason = format!("{reason} ({})", result.errmsg);
            }
            warn!(device_id, key, value, %reason, "set property rejected");
            return Err(CommandError::Rejected {
                device_id: device_id.to_string(),
                result: result.result,
                reason,
            });
        }

        info!(device_id, key, value, "property set");
        self.ctx
            .properties
            .update(device_id, [(key.to_string(), value.to_string())]);
        Ok(())
    }

    /// Reads every property from the device.
    ///
    /// The device's cached snapshot is replaced with the answer.
    ///
    /// # Errors
    ///
    /// Resolution, send or correlation failure.
    pub async fn query_properties(&self, device_id: &str) -> Result<HashMap<String, String>, CommandError> {
        let response = self
            .request(device_id, DeviceMessage::GetProperties, MessageType::GetDevicePropertyResp)
            .await?;

        let DeviceMessage::Properties(items) = response else {
            return Err(self.unexpected(device_id, &response));
        };
        let values: HashMap<String, String> = items
            .properties
            .into_iter()
            .map(|item| (item.key, item.value))
            .collect();
        self.ctx.properties.replace(device_id, values.clone());
        Ok(values)
    }

    /// Sends a restart command.  Does not wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// [`CommandError::NotConnected`] or a send failure.
    pub async fn restart_device(&self, device_id: &str) -> Result<(), CommandError> {
        let conn = self.resolve(device_id)?;
        self.send(&conn, device_id, &DeviceMessage::restart()).await?;
        info!(device_id, "restart command sent");
        Ok(())
    }

    /// Offers a firmware image and waits for the device to accept it.
    ///
    /// Progress reports that follow the acceptance are published as events.
    ///
    /// # Errors
    ///
    /// [`CommandError::Rejected`] if the device refuses the update.
    pub async fn push_firmware(&self, device_id: &str, push: OtaPush) -> Result<OtaPushResponse, CommandError> {
        let response = self
            .request(device_id, DeviceMessage::OtaPush(push), MessageType::OtaPushResp)
            .await?;

        let DeviceMessage::OtaPushResponse(ack) = response else {
            return Err(self.unexpected(device_id, &response));
        };
        if ack.result != 0 {
            return Err(CommandError::Rejected {
                device_id: device_id.to_string(),
                result: ack.result,
                reason: if ack.errmsg.is_empty() {
                    describe_result(ack.result)
                } else {
                    ack.errmsg
                },
            });
        }
        Ok(ack)
    }

    /// Turns the device's periodic breathing/heart-rate reports on or off.
    ///
    /// # Errors
    ///
    /// [`CommandError::Rejected`] if the device refuses.
    pub async fn subscribe_breath_rate(
        &self,
        device_id: &str,
        enable: bool,
        interval_secs: i32,
    ) -> Result<(), CommandError> {
        let request = DeviceMessage::SubscribeBreathRate(SubscribeBreathRate {
            enable,
            interval_secs,
        });
        let response = self
            .request(device_id, request, MessageType::SubscribeBreathRateResp)
            .await?;

        let DeviceMessage::SubscribeBreathRateResponse(ack) = response else {
            return Err(self.unexpected(device_id, &response));
        };
        if ack.result != 0 {
            return Err(CommandError::Rejected {
                device_id: device_id.to_string(),
                result: ack.result,
                reason: describe_result(ack.result),
            });
        }
        Ok(())
    }

    /// Closes the device's connection.  Returns `false` if it is not connected.
    pub fn disconnect_device(&self, device_id: &str) -> bool {
        self.ctx.sessions.disconnect(device_id)
    }

    pub fn connected_devices(&self) -> Vec<DeviceSummary> {
        self.ctx.sessions.devices()
    }

    pub fn cached_properties(&self, device_id: &str) -> HashMap<String, String> {
        self.ctx.properties.get(device_id)
    }

    pub fn cached_property(&self, device_id: &str, key: &str) -> Option<String> {
        self.ctx.properties.get_value(device_id, key)
    }

    pub fn clear_cached_properties(&self, device_id: &str) {
        self.ctx.properties.clear(device_id);
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn request(
        &self,
        device_id: &str,
        request: DeviceMessage,
        response: MessageType,
    ) -> Result<DeviceMessage, CommandError> {
        let conn = self.resolve(device_id)?;
        let waiter = self
            .ctx
            .correlator
            .begin_wait(CorrelationKey::new(response, conn.id()))?;

        self.send(&conn, device_id, &request).await?;

        let timeout = self.ctx.settings.response_timeout;
        let outcome = tokio::select! {
            result = waiter.wait(timeout) => result,
            _ = conn.closed() => Err(CorrelationError::ConnectionClosed),
        };
        if let Err(e) = &outcome {
            warn!(device_id, request = %request.message_type(), "no answer: {e}");
        }
        Ok(outcome?)
    }

    async fn send(&self, conn: &Connection, device_id: &str, msg: &DeviceMessage) -> Result<(), CommandError> {
        conn.send(msg).await?;
        self.ctx.events.publish(ServerEvent::MessageSent {
            device_id: device_id.to_string(),
            kind: msg.message_type().name().to_string(),
            text: msg.to_string(),
        });
        Ok(())
    }

    fn resolve(&self, device_id: &str) -> Result<Arc<Connection>, CommandError> {
        self.ctx
            .sessions
            .resolve(device_id)
            .ok_or_else(|| CommandError::NotConnected(device_id.to_string()))
    }

    fn unexpected(&self, device_id: &str, response: &DeviceMessage) -> CommandError {
        CommandError::UnexpectedResponse {
            device_id: device_id.to_string(),
            message_type: response.message_type(),
        }
    }
}
