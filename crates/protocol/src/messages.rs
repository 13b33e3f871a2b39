//! Request and response message definitions
//!
//! Every endpoint answers with an [`Envelope`]: a `status` sentinel, an
//! optional error `code`, an optional `message`, and endpoint-specific data
//! flattened into the same JSON object (e.g. `devices`).

use crate::error::ErrorCode;
use crate::types::{CameraInfo, Device, DeviceClass};
use serde::{Deserialize, Serialize};

/// Response status sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Free-form or structured `message` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Camera(CameraInfo),
}

impl From<String> for MessageBody {
    fn from(s: String) -> Self {
        MessageBody::Text(s)
    }
}

impl From<&str> for MessageBody {
    fn from(s: &str) -> Self {
        MessageBody::Text(s.to_string())
    }
}

impl From<CameraInfo> for MessageBody {
    fn from(info: CameraInfo) -> Self {
        MessageBody::Camera(info)
    }
}

/// Uniform response envelope
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T = ()> {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Finer-grained reason for `state_violation` (`already_recording`, `not_recording`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl Envelope<()> {
    /// Success with a message and no data
    pub fn message(message: impl Into<MessageBody>) -> Self {
        Self {
            status: Status::Success,
            code: None,
            reason: None,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T> Envelope<T> {
    /// Success carrying data
    pub fn data(data: T) -> Self {
        Self {
            status: Status::Success,
            code: None,
            reason: None,
            message: None,
            data: Some(data),
        }
    }

    /// Failure with a typed code
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            code: Some(code),
            reason: None,
            message: Some(MessageBody::Text(message.into())),
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<MessageBody>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(str::to_string);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// `devices` payload of the list endpoints
#[derive(Debug, Clone, Serialize)]
pub struct DeviceList {
    pub devices: Vec<Device>,
    /// Classes whose enumeration failed; their (empty or carried-over) entries
    /// must not be read as "no devices"
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DeviceClass>,
}

/// Body of `/disableUsbDevice`, `/enableUsbDevice`, `/toggleAudioMute`
///
/// Older clients send the id under `deviceID`, `id` or `name`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRequest {
    #[serde(alias = "deviceID", alias = "id", alias = "name")]
    pub device_id: String,
}

/// Body of `/ejectUsbDrive` and `/forceEjectUsbDrive`
#[derive(Debug, Clone, Deserialize)]
pub struct DriveRequest {
    #[serde(alias = "driveLetter")]
    pub drive: String,
}

/// Requested radio state for `/toggleBluetooth`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioState {
    #[serde(alias = "enable", alias = "enabled")]
    On,
    #[serde(alias = "disable", alias = "disabled")]
    Off,
    Toggle,
}

/// Body of `/toggleBluetooth`
#[derive(Debug, Clone, Deserialize)]
pub struct RadioRequest {
    pub state: RadioState,
}

/// Query parameters of `/startRecording` and `/oneSecondCovertRecording`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingParams {
    pub filename: Option<String>,
    pub fps: Option<u32>,
}

/// Query parameters of `/takeFrame`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameParams {
    pub filename: Option<String>,
}

/// Body of `/openCamera`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraRequest {
    pub index: Option<u32>,
}

/// Body of `/disableAllUsbDevices`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassRequest {
    pub class: Option<DeviceClass>,
}

/// Body of `/setAudioVolume`
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeRequest {
    #[serde(alias = "deviceID", alias = "id", alias = "device_name")]
    pub device_id: String,
    pub volume: u8,
}
