//! Protobuf payload structures carried inside frames.
//!
//! These are proto3 messages declared directly with `prost` derives.  The
//! field numbers are the wire contract; renaming a Rust field is harmless,
//! renumbering a tag is not.

/// Sequence-only body shared by heartbeats, server heartbeats and restart.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommonMessage {
    #[prost(int32, tag = "1")]
    pub seq: i32,
}

/// Result/error pair used by the simpler acknowledgements
/// (restart, subscription, voice call).
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommonResponse {
    #[prost(int32, tag = "1")]
    pub result: i32,
    #[prost(string, tag = "2")]
    pub errmsg: String,
}

// ── Session setup ─────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetServerRequest {
    #[prost(string, tag = "1")]
    pub uid: String,
}

/// Address a device should use for its long-lived connection.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetServerResponse {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
}

/// Sent by a device right after connecting; `uid` becomes its device id.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterRequest {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub firmware_version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterResponse {
    #[prost(int32, tag = "1")]
    pub result: i32,
}

// ── Properties ────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetDeviceProperty {
    #[prost(int32, tag = "1")]
    pub seq: i32,
    #[prost(string, tag = "2")]
    pub key: String,
    #[prost(string, tag = "3")]
    pub value: String,
}

/// Device answer to [`SetDeviceProperty`]. `result == 0` means applied.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SetPropertyResponse {
    #[prost(int32, tag = "1")]
    pub seq: i32,
    #[prost(int32, tag = "2")]
    pub result: i32,
    #[prost(string, tag = "3")]
    pub errmsg: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PropertyItem {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PropertyItems {
    #[prost(message, repeated, tag = "1")]
    pub properties: Vec<PropertyItem>,
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, prost::Message)]
pub struct FallDownEvent {
    #[prost(int32, tag = "1")]
    pub target_id: i32,
    /// 0 = fall detected, 1 = target recovered.
    #[prost(int32, tag = "2")]
    pub state: i32,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TargetPosition {
    #[prost(int32, tag = "1")]
    pub id: i32,
    #[prost(float, tag = "2")]
    pub x: f32,
    #[prost(float, tag = "3")]
    pub y: f32,
    #[prost(float, tag = "4")]
    pub z: f32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TrajectoryFrame {
    #[prost(message, repeated, tag = "1")]
    pub targets: Vec<TargetPosition>,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BreathHeartRate {
    #[prost(float, tag = "1")]
    pub breath_rate: f32,
    #[prost(float, tag = "2")]
    pub heart_rate: f32,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

/// A target entering (`event == 0`) or leaving (`event == 1`) a declared area.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PositionEvent {
    #[prost(int32, tag = "1")]
    pub target_id: i32,
    #[prost(int32, tag = "2")]
    pub area_id: i32,
    #[prost(int32, tag = "3")]
    pub event: i32,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PeopleCount {
    #[prost(int32, tag = "1")]
    pub count: i32,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AreaStat {
    #[prost(int32, tag = "1")]
    pub area_id: i32,
    #[prost(int32, tag = "2")]
    pub people: i32,
    #[prost(int32, tag = "3")]
    pub stay_seconds: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TrajectoryStats {
    #[prost(message, repeated, tag = "1")]
    pub areas: Vec<AreaStat>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NotifyMessage {
    #[prost(string, tag = "1")]
    pub message: String,
}

// ── Firmware, subscriptions, voice ────────────────────────────────────────────

#[derive(Clone, PartialEq, prost::Message)]
pub struct OtaPush {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(string, tag = "2")]
    pub url: String,
    #[prost(string, tag = "3")]
    pub md5: String,
    #[prost(int64, tag = "4")]
    pub size: i64,
}

/// Acknowledgement and progress report for an [`OtaPush`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct OtaPushResponse {
    #[prost(int32, tag = "1")]
    pub result: i32,
    /// Download/flash progress in percent.
    #[prost(int32, tag = "2")]
    pub progress: i32,
    #[prost(string, tag = "3")]
    pub errmsg: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeBreathRate {
    #[prost(bool, tag = "1")]
    pub enable: bool,
    #[prost(int32, tag = "2")]
    pub interval_secs: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VoiceCall {
    #[prost(string, tag = "1")]
    pub call_id: String,
    #[prost(string, tag = "2")]
    pub number: String,
}
