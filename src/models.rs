//! Shared wire and domain models
//!
//! WebSocket frame shapes exchanged with devices and viewers, plus the
//! persistent rows the store returns. Transport is JSON text frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds a device streams raw windows for one training repetition.
pub const TRAINING_STREAM_SECS: i64 = 10;

/// Maximum repetitions per training session.
pub const MAX_REPETITIONS: i32 = 5;

/// Every event that can appear in a frame, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    // Device -> core
    Handshake,
    RawStreamBegin,
    RawStreamInProcess,
    RawStreamFinish,

    // Core -> device
    HandshakeOk,
    StartRawStream,
    StopRawStream,

    // Viewer -> core
    StartTraining,
    StartStreaming,
    StopTraining,
    Stop,

    // Core -> viewer
    TrainingStarted,
    TrainingRawData,
    StreamingData,
    TrainingCompleted,

    Error,
}

/// Frame read from a device connection.
///
/// `handshake` carries `device_name`; the raw-stream events carry a window of
/// integer readings and a decimal nanoseconds-since-epoch timestamp string.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceFrame {
    pub event: Event,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub raw: Vec<i64>,
}

/// Command sent to a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCommand {
    pub event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<i64>,
}

impl DeviceCommand {
    /// Start command carrying a stream duration and the server clock (ms).
    pub fn start_raw_stream(duration_secs: i64) -> Self {
        Self {
            event: Event::StartRawStream,
            duration: Some(duration_secs),
            server_time: Some(Utc::now().timestamp_millis()),
        }
    }

    pub fn stop_raw_stream() -> Self {
        Self {
            event: Event::StopRawStream,
            duration: None,
            server_time: None,
        }
    }
}

/// Command read from a viewer connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewerCommand {
    pub event: Event,
    pub device_id: i32,
    #[serde(default)]
    pub movement_id: Option<i32>,
    #[serde(default)]
    pub rep: Option<i32>,
}

/// Event relayed to the viewers of a device.
///
/// Training events carry movement/rep; live classification events carry the
/// class fields instead. Absent fields are omitted on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerEvent {
    pub event: Event,
    pub device_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rep: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<RawSample>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prob: Option<Vec<f64>>,
}

/// One timestamped window of integer readings, as relayed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: String,
    pub raw: Vec<i64>,
}

/// Device lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Idle,
    Reserved,
    Streaming,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Idle => "idle",
            DeviceStatus::Reserved => "reserved",
            DeviceStatus::Streaming => "streaming",
        }
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(DeviceStatus::Idle),
            "reserved" => Ok(DeviceStatus::Reserved),
            "streaming" => Ok(DeviceStatus::Streaming),
            other => Err(crate::Error::Validation(format!(
                "unknown device status: {other}"
            ))),
        }
    }
}

/// A registered sensing device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i32,
    pub name: String,
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
}

/// Movement catalog entry (read-only from this service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub movement_id: i32,
    pub name: String,
    pub description: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub classifier_connected: bool,
    pub db_connected: bool,
}

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Error frame written back to the offending connection.
pub fn error_payload(message: &str) -> String {
    serde_json::json!({ "event": "error", "error": message }).to_string()
}
