//! Decoded protocol messages.
//!
//! [`DeviceMessage`] is the typed form of a [`Frame`]: the tag selects the
//! payload shape, the payload is parsed with `prost`.  The reverse direction
//! produces the payload bytes and the frame to write.

use std::fmt;

use prost::Message as ProstMessage;
use thiserror::Error;

use crate::protocol::frame::Frame;
use crate::protocol::message_type::MessageType;
use crate::protocol::payloads::{
    BreathHeartRate, CommonMessage, CommonResponse, FallDownEvent, GetServerRequest,
    GetServerResponse, NotifyMessage, OtaPush, OtaPushResponse, PeopleCount, PositionEvent,
    PropertyItems, RegisterRequest, RegisterResponse, SetDeviceProperty, SetPropertyResponse,
    SubscribeBreathRate, TrajectoryFrame, TrajectoryStats, VoiceCall,
};

/// Sequence value carried by every heartbeat acknowledgement.
pub const HEARTBEAT_ACK_SEQ: i32 = 8;

/// Sequence value carried by every set-property request.
pub const SET_PROPERTY_SEQ: i32 = 9;

/// Sequence value carried by every restart request.
pub const RESTART_SEQ: i32 = 24;

/// Errors that can occur while turning a frame into a [`DeviceMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The tag is not in the message table.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The tag is known but its payload is not valid protobuf for that shape.
    #[error("malformed {message_type} payload: {source}")]
    MalformedPayload {
        message_type: MessageType,
        #[source]
        source: prost::DecodeError,
    },
}

/// A decoded frame, one variant per message type.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    GetServerRequest(GetServerRequest),
    GetServerResponse(GetServerResponse),
    RegisterRequest(RegisterRequest),
    RegisterResponse(RegisterResponse),
    FallDown(FallDownEvent),
    HeartbeatRequest(CommonMessage),
    HeartbeatResponse(CommonMessage),
    SetProperty(SetDeviceProperty),
    SetPropertyResponse(SetPropertyResponse),
    /// Property query; always an empty payload.
    GetProperties,
    Properties(PropertyItems),
    Trajectory(TrajectoryFrame),
    BreathHeartRate(BreathHeartRate),
    Position(PositionEvent),
    PeopleCount(PeopleCount),
    OtaPush(OtaPush),
    OtaPushResponse(OtaPushResponse),
    TrajectoryStats(TrajectoryStats),
    Restart(CommonMessage),
    RestartResponse(CommonResponse),
    SubscribeBreathRate(SubscribeBreathRate),
    SubscribeBreathRateResponse(CommonResponse),
    ServerHeartbeat(CommonMessage),
    ServerHeartbeatResponse(CommonMessage),
    DebugInfo(NotifyMessage),
    StartVoiceCall(VoiceCall),
    StartVoiceCallResponse(CommonResponse),
    StopVoiceCall(VoiceCall),
    StopVoiceCallResponse(CommonResponse),
}

impl DeviceMessage {
    /// Decodes a tag and its raw payload.
    ///
    /// An empty payload decodes to the all-default structure, so heartbeats
    /// and other bodiless frames are accepted for every shape.
    ///
    /// # Errors
    ///
    /// [`DecodeError::UnknownMessageType`] for tags outside the table and
    /// [`DecodeError::MalformedPayload`] for undecodable bodies.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use radar_core::DeviceMessage;
    ///
    /// let msg = DeviceMessage::decode(7, &[]).unwrap();
    /// assert!(matches!(msg, DeviceMessage::HeartbeatRequest(_)));
    /// ```
    pub fn decode(tag: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let message_type = MessageType::try_from(tag).map_err(DecodeError::UnknownMessageType)?;
        Self::decode_as(message_type, payload)
    }

    /// Decodes a [`Frame`] read off the wire.
    ///
    /// # Errors
    ///
    /// See [`DeviceMessage::decode`].
    pub fn from_frame(frame: &Frame) -> Result<Self, DecodeError> {
        Self::decode(frame.tag, &frame.payload)
    }

    /// Decodes `payload` as the shape registered for `message_type`.
    ///
    /// # Errors
    ///
    /// [`DecodeError::MalformedPayload`] when `payload` is not valid protobuf.
    pub fn decode_as(message_type: MessageType, payload: &[u8]) -> Result<Self, DecodeError> {
        let msg = match message_type {
            MessageType::GetServerReq => Self::GetServerRequest(body(message_type, payload)?),
            MessageType::GetServerResponse => Self::GetServerResponse(body(message_type, payload)?),
            MessageType::RegisterReq => Self::RegisterRequest(body(message_type, payload)?),
            MessageType::RegisterResponse => Self::RegisterResponse(body(message_type, payload)?),
            MessageType::ObjectFallDown => Self::FallDown(body(message_type, payload)?),
            MessageType::HeartbeatReq => Self::HeartbeatRequest(body(message_type, payload)?),
            MessageType::HeartbeatResp => Self::HeartbeatResponse(body(message_type, payload)?),
            MessageType::SetDeviceProperty => Self::SetProperty(body(message_type, payload)?),
            MessageType::SetDevicePropertyResp => {
                Self::SetPropertyResponse(body(message_type, payload)?)
            }
            MessageType::GetDeviceProperty => Self::GetProperties,
            MessageType::GetDevicePropertyResp => Self::Properties(body(message_type, payload)?),
            MessageType::RealTimeTrajectory => Self::Trajectory(body(message_type, payload)?),
            MessageType::BreathingHeartRate => Self::BreathHeartRate(body(message_type, payload)?),
            MessageType::PositionEvent => Self::Position(body(message_type, payload)?),
            MessageType::PeopleCount => Self::PeopleCount(body(message_type, payload)?),
            MessageType::OtaPush => Self::OtaPush(body(message_type, payload)?),
            MessageType::OtaPushResp => Self::OtaPushResponse(body(message_type, payload)?),
            MessageType::TrajectoryStats => Self::TrajectoryStats(body(message_type, payload)?),
            MessageType::RestartDevice => Self::Restart(body(message_type, payload)?),
            MessageType::RestartDeviceResp => Self::RestartResponse(body(message_type, payload)?),
            MessageType::SubscribeBreathRate => {
                Self::SubscribeBreathRate(body(message_type, payload)?)
            }
            MessageType::SubscribeBreathRateResp => {
                Self::SubscribeBreathRateResponse(body(message_type, payload)?)
            }
            MessageType::ServerHeartbeat => Self::ServerHeartbeat(body(message_type, payload)?),
            MessageType::ServerHeartbeatResp => {
                Self::ServerHeartbeatResponse(body(message_type, payload)?)
            }
            MessageType::DebugInfo => Self::DebugInfo(body(message_type, payload)?),
            MessageType::StartVoiceCall => Self::StartVoiceCall(body(message_type, payload)?),
            MessageType::StartVoiceCallResp => {
                Self::StartVoiceCallResponse(body(message_type, payload)?)
            }
            MessageType::StopVoiceCall => Self::StopVoiceCall(body(message_type, payload)?),
            MessageType::StopVoiceCallResp => {
                Self::StopVoiceCallResponse(body(message_type, payload)?)
            }
        };
        Ok(msg)
    }

    /// The tag this message is sent under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::GetServerRequest(_) => MessageType::GetServerReq,
            Self::GetServerResponse(_) => MessageType::GetServerResponse,
            Self::RegisterRequest(_) => MessageType::RegisterReq,
            Self::RegisterResponse(_) => MessageType::RegisterResponse,
            Self::FallDown(_) => MessageType::ObjectFallDown,
            Self::HeartbeatRequest(_) => MessageType::HeartbeatReq,
            Self::HeartbeatResponse(_) => MessageType::HeartbeatResp,
            Self::SetProperty(_) => MessageType::SetDeviceProperty,
            Self::SetPropertyResponse(_) => MessageType::SetDevicePropertyResp,
            Self::GetProperties => MessageType::GetDeviceProperty,
            Self::Properties(_) => MessageType::GetDevicePropertyResp,
            Self::Trajectory(_) => MessageType::RealTimeTrajectory,
            Self::BreathHeartRate(_) => MessageType::BreathingHeartRate,
            Self::Position(_) => MessageType::PositionEvent,
            Self::PeopleCount(_) => MessageType::PeopleCount,
            Self::OtaPush(_) => MessageType::OtaPush,
            Self::OtaPushResponse(_) => MessageType::OtaPushResp,
            Self::TrajectoryStats(_) => MessageType::TrajectoryStats,
            Self::Restart(_) => MessageType::RestartDevice,
            Self::RestartResponse(_) => MessageType::RestartDeviceResp,
            Self::SubscribeBreathRate(_) => MessageType::SubscribeBreathRate,
            Self::SubscribeBreathRateResponse(_) => MessageType::SubscribeBreathRateResp,
            Self::ServerHeartbeat(_) => MessageType::ServerHeartbeat,
            Self::ServerHeartbeatResponse(_) => MessageType::ServerHeartbeatResp,
            Self::DebugInfo(_) => MessageType::DebugInfo,
            Self::StartVoiceCall(_) => MessageType::StartVoiceCall,
            Self::StartVoiceCallResponse(_) => MessageType::StartVoiceCallResp,
            Self::StopVoiceCall(_) => MessageType::StopVoiceCall,
            Self::StopVoiceCallResponse(_) => MessageType::StopVoiceCallResp,
        }
    }

    /// Serialises the payload (without tag or length prefix).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::GetServerRequest(m) => m.encode_to_vec(),
            Self::GetServerResponse(m) => m.encode_to_vec(),
            Self::RegisterRequest(m) => m.encode_to_vec(),
            Self::RegisterResponse(m) => m.encode_to_vec(),
            Self::FallDown(m) => m.encode_to_vec(),
            Self::HeartbeatRequest(m)
            | Self::HeartbeatResponse(m)
            | Self::Restart(m)
            | Self::ServerHeartbeat(m)
            | Self::ServerHeartbeatResponse(m) => m.encode_to_vec(),
            Self::SetProperty(m) => m.encode_to_vec(),
            Self::SetPropertyResponse(m) => m.encode_to_vec(),
            Self::GetProperties => Vec::new(),
            Self::Properties(m) => m.encode_to_vec(),
            Self::Trajectory(m) => m.encode_to_vec(),
            Self::BreathHeartRate(m) => m.encode_to_vec(),
            Self::Position(m) => m.encode_to_vec(),
            Self::PeopleCount(m) => m.encode_to_vec(),
            Self::OtaPush(m) => m.encode_to_vec(),
            Self::OtaPushResponse(m) => m.encode_to_vec(),
            Self::TrajectoryStats(m) => m.encode_to_vec(),
            Self::RestartResponse(m)
            | Self::SubscribeBreathRateResponse(m)
            | Self::StartVoiceCallResponse(m)
            | Self::StopVoiceCallResponse(m) => m.encode_to_vec(),
            Self::SubscribeBreathRate(m) => m.encode_to_vec(),
            Self::DebugInfo(m) => m.encode_to_vec(),
            Self::StartVoiceCall(m) | Self::StopVoiceCall(m) => m.encode_to_vec(),
        }
    }

    /// Builds the frame that carries this message.
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.message_type().tag(), self.encode_payload())
    }

    // ── Fixed server messages ─────────────────────────────────────────────────

    pub fn heartbeat_ack() -> Self {
        Self::HeartbeatResponse(CommonMessage {
            seq: HEARTBEAT_ACK_SEQ,
        })
    }

    pub fn restart() -> Self {
        Self::Restart(CommonMessage { seq: RESTART_SEQ })
    }

    pub fn set_property(key: &str, value: &str) -> Self {
        Self::SetProperty(SetDeviceProperty {
            seq: SET_PROPERTY_SEQ,
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn body<T>(message_type: MessageType, payload: &[u8]) -> Result<T, DecodeError>
where
    T: ProstMessage + Default,
{
    T::decode(payload).map_err(|source| DecodeError::MalformedPayload {
        message_type,
        source,
    })
}

// ── Result codes ──────────────────────────────────────────────────────────────

/// Text for a device result code as reported in set-property responses.
pub fn describe_result(code: i32) -> String {
    match code {
        0 => "Success".to_string(),
        -1 => "Internal Error".to_string(),
        1 => "Invalid Parameter".to_string(),
        2 => "Permission Denied".to_string(),
        3 => "Device Busy".to_string(),
        other => format!("Unknown Error({other})"),
    }
}

impl SetPropertyResponse {
    pub fn is_success(&self) -> bool {
        self.result == 0
    }
}

// ── Presentation ──────────────────────────────────────────────────────────────

impl fmt::Display for DeviceMessage {
    /// One-line summary used for observer events and debug logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetServerRequest(m) => write!(f, "Get server request from {}", m.uid),
            Self::GetServerResponse(m) => write!(f, "Server address {}:{}", m.host, m.port),
            Self::RegisterRequest(m) => {
                write!(f, "Register {} (firmware {})", m.uid, m.firmware_version)
            }
            Self::RegisterResponse(m) => write!(f, "Register result={}", m.result),
            Self::FallDown(m) => {
                let state = if m.state == 0 { "detected" } else { "recovered" };
                write!(f, "Fall {state}: target {}", m.target_id)
            }
            Self::HeartbeatRequest(m) => write!(f, "Heartbeat seq={}", m.seq),
            Self::HeartbeatResponse(m) => write!(f, "Heartbeat ack seq={}", m.seq),
            Self::SetProperty(m) => write!(f, "Set Property: {}={}", m.key, m.value),
            Self::SetPropertyResponse(m) => {
                if m.is_success() {
                    write!(f, "Set Property result: Success")
                } else {
                    write!(f, "Set Property result: {}", describe_result(m.result))?;
                    if !m.errmsg.is_empty() {
                        write!(f, " ({})", m.errmsg)?;
                    }
                    Ok(())
                }
            }
            Self::GetProperties => write!(f, "Get device properties"),
            Self::Properties(m) => {
                write!(f, "Device Properties: ")?;
                for (i, item) in m.properties.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", item.key, item.value)?;
                }
                Ok(())
            }
            Self::Trajectory(m) => write!(f, "Trajectory: {} targets", m.targets.len()),
            Self::BreathHeartRate(m) => write!(
                f,
                "Breath {:.1}/min, heart {:.1}/min",
                m.breath_rate, m.heart_rate
            ),
            Self::Position(m) => {
                let verb = if m.event == 0 { "entered" } else { "left" };
                write!(f, "Target {} {verb} area {}", m.target_id, m.area_id)
            }
            Self::PeopleCount(m) => write!(f, "People count: {}", m.count),
            Self::OtaPush(m) => write!(f, "OTA push {} from {}", m.version, m.url),
            Self::OtaPushResponse(m) => {
                write!(f, "OTA result={} progress={}%", m.result, m.progress)
            }
            Self::TrajectoryStats(m) => write!(f, "Trajectory stats for {} areas", m.areas.len()),
            Self::Restart(_) => write!(f, "Restart device command"),
            Self::SubscribeBreathRate(m) => write!(
                f,
                "Subscribe breath rate enable={} interval={}s",
                m.enable, m.interval_secs
            ),
            Self::ServerHeartbeat(m) => write!(f, "Server heartbeat seq={}", m.seq),
            Self::ServerHeartbeatResponse(m) => write!(f, "Server heartbeat ack seq={}", m.seq),
            Self::DebugInfo(m) => f.write_str(&m.message),
            Self::StartVoiceCall(m) => write!(f, "Start voice call {} to {}", m.call_id, m.number),
            Self::StopVoiceCall(m) => write!(f, "Stop voice call {}", m.call_id),
            Self::RestartResponse(m)
            | Self::SubscribeBreathRateResponse(m)
            | Self::StartVoiceCallResponse(m)
            | Self::StopVoiceCallResponse(m) => {
                write!(f, "{} result={}", self.message_type(), m.result)?;
                if !m.errmsg.is_empty() {
                    write!(f, " ({})", m.errmsg)?;
                }
                Ok(())
            }
        }
    }
}
