//! Message type tags.
//!
//! Every frame starts with a one-byte tag naming the payload shape.  Tags not
//! listed here are legal on the wire (the protocol is forward compatible) but
//! carry no meaning for this server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the link sends a given message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    DeviceToServer,
    ServerToDevice,
}

/// All message type tags known to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    GetServerReq = 1,
    GetServerResponse = 2,
    RegisterReq = 3,
    RegisterResponse = 4,
    ObjectFallDown = 5,
    HeartbeatReq = 7,
    HeartbeatResp = 8,
    SetDeviceProperty = 9,
    SetDevicePropertyResp = 10,
    GetDeviceProperty = 11,
    GetDevicePropertyResp = 12,
    RealTimeTrajectory = 13,
    BreathingHeartRate = 14,
    PositionEvent = 15,
    PeopleCount = 16,
    OtaPush = 17,
    OtaPushResp = 18,
    TrajectoryStats = 19,
    RestartDevice = 24,
    RestartDeviceResp = 25,
    SubscribeBreathRate = 26,
    SubscribeBreathRateResp = 27,
    ServerHeartbeat = 28,
    ServerHeartbeatResp = 29,
    DebugInfo = 35,
    StartVoiceCall = 50,
    StartVoiceCallResp = 51,
    StopVoiceCall = 52,
    StopVoiceCallResp = 53,
}

impl MessageType {
    /// Every known tag in ascending order.
    pub const ALL: [MessageType; 29] = [
        MessageType::GetServerReq,
        MessageType::GetServerResponse,
        MessageType::RegisterReq,
        MessageType::RegisterResponse,
        MessageType::ObjectFallDown,
        MessageType::HeartbeatReq,
        MessageType::HeartbeatResp,
        MessageType::SetDeviceProperty,
        MessageType::SetDevicePropertyResp,
        MessageType::GetDeviceProperty,
        MessageType::GetDevicePropertyResp,
        MessageType::RealTimeTrajectory,
        MessageType::BreathingHeartRate,
        MessageType::PositionEvent,
        MessageType::PeopleCount,
        MessageType::OtaPush,
        MessageType::OtaPushResp,
        MessageType::TrajectoryStats,
        MessageType::RestartDevice,
        MessageType::RestartDeviceResp,
        MessageType::SubscribeBreathRate,
        MessageType::SubscribeBreathRateResp,
        MessageType::ServerHeartbeat,
        MessageType::ServerHeartbeatResp,
        MessageType::DebugInfo,
        MessageType::StartVoiceCall,
        MessageType::StartVoiceCallResp,
        MessageType::StopVoiceCall,
        MessageType::StopVoiceCallResp,
    ];

    /// Wire value of this tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Presentation name used in logs and observer events.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::GetServerReq => "GetServerReq",
            MessageType::GetServerResponse => "GetServerResponse",
            MessageType::RegisterReq => "RegisterReq",
            MessageType::RegisterResponse => "RegisterResponse",
            MessageType::ObjectFallDown => "ObjectFallDown",
            MessageType::HeartbeatReq => "HeartbeatReq",
            MessageType::HeartbeatResp => "HeartbeatResp",
            MessageType::SetDeviceProperty => "SetDeviceProperty",
            MessageType::SetDevicePropertyResp => "SetDevicePropertyResp",
            MessageType::GetDeviceProperty => "GetDeviceProperty",
            MessageType::GetDevicePropertyResp => "GetDevicePropertyResp",
            MessageType::RealTimeTrajectory => "RealTimeTrajectory",
            MessageType::BreathingHeartRate => "BreathingHeartRate",
            MessageType::PositionEvent => "PositionEvent",
            MessageType::PeopleCount => "PeopleCount",
            MessageType::OtaPush => "OTAPush",
            MessageType::OtaPushResp => "OTAPushResp",
            MessageType::TrajectoryStats => "TrajectoryStats",
            MessageType::RestartDevice => "RestartDevice",
            MessageType::RestartDeviceResp => "RestartDeviceResp",
            MessageType::SubscribeBreathRate => "SubscribeBreathRate",
            MessageType::SubscribeBreathRateResp => "SubscribeBreathRateResp",
            MessageType::ServerHeartbeat => "ServerHeartbeat",
            MessageType::ServerHeartbeatResp => "ServerHeartbeatResp",
            MessageType::DebugInfo => "DebugInfo",
            MessageType::StartVoiceCall => "StartVoiceCall",
            MessageType::StartVoiceCallResp => "StartVoiceCallResp",
            MessageType::StopVoiceCall => "StopVoiceCall",
            MessageType::StopVoiceCallResp => "StopVoiceCallResp",
        }
    }

    /// Which peer originates this message type.
    pub fn direction(self) -> Direction {
        match self {
            MessageType::GetServerResponse
            | MessageType::RegisterResponse
            | MessageType::HeartbeatResp
            | MessageType::SetDeviceProperty
            | MessageType::GetDeviceProperty
            | MessageType::OtaPush
            | MessageType::RestartDevice
            | MessageType::SubscribeBreathRate
            | MessageType::ServerHeartbeat
            | MessageType::StartVoiceCallResp
            | MessageType::StopVoiceCallResp => Direction::ServerToDevice,
            _ => Direction::DeviceToServer,
        }
    }

    /// Human-readable name for any tag, known or not.
    pub fn describe(tag: u8) -> String {
        match MessageType::try_from(tag) {
            Ok(message_type) => message_type.name().to_string(),
            Err(_) => format!("Unknown({tag})"),
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(MessageType::GetServerReq),
            2 => Ok(MessageType::GetServerResponse),
            3 => Ok(MessageType::RegisterReq),
            4 => Ok(MessageType::RegisterResponse),
            5 => Ok(MessageType::ObjectFallDown),
            7 => Ok(MessageType::HeartbeatReq),
            8 => Ok(MessageType::HeartbeatResp),
            9 => Ok(MessageType::SetDeviceProperty),
            10 => Ok(MessageType::SetDevicePropertyResp),
            11 => Ok(MessageType::GetDeviceProperty),
            12 => Ok(MessageType::GetDevicePropertyResp),
            13 => Ok(MessageType::RealTimeTrajectory),
            14 => Ok(MessageType::BreathingHeartRate),
            15 => Ok(MessageType::PositionEvent),
            16 => Ok(MessageType::PeopleCount),
            17 => Ok(MessageType::OtaPush),
            18 => Ok(MessageType::OtaPushResp),
            19 => Ok(MessageType::TrajectoryStats),
            24 => Ok(MessageType::RestartDevice),
            25 => Ok(MessageType::RestartDeviceResp),
            26 => Ok(MessageType::SubscribeBreathRate),
            27 => Ok(MessageType::SubscribeBreathRateResp),
            28 => Ok(MessageType::ServerHeartbeat),
            29 => Ok(MessageType::ServerHeartbeatResp),
            35 => Ok(MessageType::DebugInfo),
            50 => Ok(MessageType::StartVoiceCall),
            51 => Ok(MessageType::StartVoiceCallResp),
            52 => Ok(MessageType::StopVoiceCall),
            53 => Ok(MessageType::StopVoiceCallResp),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
