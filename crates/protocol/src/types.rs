//! Device model type definitions
//!
//! This module defines the normalized device model shared by every layer:
//! device classes, connection/enablement state, operation kinds, and the
//! camera and audio information records returned by the platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device class
///
/// Every enumerated device belongs to exactly one class. Device ids are only
/// unique within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    /// USB human interface devices (mice, keyboards)
    UsbHid,
    /// USB mass-storage devices (flash drives, card readers)
    UsbStorage,
    /// Bluetooth peers known to the local adapter
    Bluetooth,
    /// Audio cards and endpoints
    Audio,
    /// Video capture devices
    Camera,
}

impl DeviceClass {
    /// All classes, in enumeration order
    pub const ALL: [DeviceClass; 5] = [
        DeviceClass::UsbHid,
        DeviceClass::UsbStorage,
        DeviceClass::Bluetooth,
        DeviceClass::Audio,
        DeviceClass::Camera,
    ];

    /// Stable lowercase name used in config files, URLs and target keys
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::UsbHid => "usb-hid",
            DeviceClass::UsbStorage => "usb-storage",
            DeviceClass::Bluetooth => "bluetooth",
            DeviceClass::Audio => "audio",
            DeviceClass::Camera => "camera",
        }
    }

    /// Whether the class is reached through the USB endpoints
    /// (`/listUsbDevices`, `/disableUsbDevice`, ...)
    pub fn is_usb(&self) -> bool {
        matches!(self, DeviceClass::UsbHid | DeviceClass::UsbStorage)
    }

    /// Whether devices of this class can be enabled/disabled
    pub fn supports_enable(&self) -> bool {
        matches!(
            self,
            DeviceClass::UsbHid | DeviceClass::UsbStorage | DeviceClass::Camera
        )
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "usb-hid" | "hid" => Ok(DeviceClass::UsbHid),
            "usb-storage" | "storage" => Ok(DeviceClass::UsbStorage),
            "bluetooth" => Ok(DeviceClass::Bluetooth),
            "audio" => Ok(DeviceClass::Audio),
            "camera" => Ok(DeviceClass::Camera),
            other => Err(format!("unknown device class: {}", other)),
        }
    }
}

/// Physical connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connected,
    /// An eject is in flight; the device is still reported until it completes
    Ejecting,
    Disconnected,
}

/// Enablement state (not every class supports it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnabledState {
    Enabled,
    Disabled,
    Unknown,
}

/// A normalized device record
///
/// `id` uniquely identifies the device within its `class` for the lifetime of
/// one physical attachment. `path` is the platform handle the backend uses to
/// act on the device (sysfs port, block device, MAC address, video node) and
/// is independent of the identity scheme that produced `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub class: DeviceClass,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_letter: Option<String>,
    pub connection_state: ConnectionState,
    pub enabled_state: EnabledState,
    pub path: String,
}

impl Device {
    /// Create a connected device whose id and platform path are the same
    pub fn new(class: DeviceClass, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            path: id.clone(),
            id,
            class,
            display_name: display_name.into(),
            vendor_id: None,
            product_id: None,
            serial_number: None,
            mount_point: None,
            drive_letter: None,
            connection_state: ConnectionState::Connected,
            enabled_state: if class.supports_enable() {
                EnabledState::Enabled
            } else {
                EnabledState::Unknown
            },
        }
    }

    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(format!("{:04x}", vendor_id));
        self.product_id = Some(format!("{:04x}", product_id));
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn with_drive(mut self, drive_letter: impl Into<String>, mount_point: Option<String>) -> Self {
        self.drive_letter = Some(drive_letter.into());
        self.mount_point = mount_point;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_enabled(mut self, state: EnabledState) -> Self {
        self.enabled_state = state;
        self
    }

    /// Key identifying this device across classes (`class/id`)
    pub fn key(&self) -> String {
        target_key(self.class, &self.id)
    }

    /// Whether `drive` names this storage device
    ///
    /// Accepts the drive letter (with or without a trailing `:`), the mount
    /// point, the device id, or the platform path.
    pub fn matches_drive(&self, drive: &str) -> bool {
        if self.class != DeviceClass::UsbStorage {
            return false;
        }
        let wanted = drive.trim().trim_end_matches(['\\', '/']).trim_end_matches(':');
        if wanted.is_empty() {
            return false;
        }
        self.drive_letter
            .as_deref()
            .is_some_and(|letter| letter.trim_end_matches(':').eq_ignore_ascii_case(wanted))
            || self.mount_point.as_deref() == Some(drive.trim())
            || self.id == wanted
            || self.path == wanted
    }
}

/// Key for a device-scoped target: `class/id`
pub fn target_key(class: DeviceClass, id: &str) -> String {
    format!("{}/{}", class.as_str(), id)
}

/// Kind of a mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Enable,
    Disable,
    Eject,
    ForceEject,
    ToggleRadio,
    OpenCamera,
    StartRecording,
    StopRecording,
    CaptureFrame,
    SetVolume,
    ToggleMute,
}

impl OperationKind {
    /// Whether the operation detaches the target from the host
    pub fn is_eject(&self) -> bool {
        matches!(self, OperationKind::Eject | OperationKind::ForceEject)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Enable => "enable",
            OperationKind::Disable => "disable",
            OperationKind::Eject => "eject",
            OperationKind::ForceEject => "force-eject",
            OperationKind::ToggleRadio => "toggle-radio",
            OperationKind::OpenCamera => "open-camera",
            OperationKind::StartRecording => "start-recording",
            OperationKind::StopRecording => "stop-recording",
            OperationKind::CaptureFrame => "capture-frame",
            OperationKind::SetVolume => "set-volume",
            OperationKind::ToggleMute => "toggle-mute",
        };
        f.write_str(name)
    }
}

/// Eject strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EjectMode {
    /// Refuse if the volume is in use
    Safe,
    /// Detach regardless of open handles (possible data loss)
    Force,
}

/// Outcome of a toggle-style platform call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
    /// The platform state was changed
    Changed,
    /// The platform was already in the requested state
    Unchanged,
}

/// Camera properties, as reported by `/getCameraInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub name: String,
}

/// Parameters of a recording started on a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSpec {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub output_path: std::path::PathBuf,
}

/// Audio subsystem summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub driver: String,
    pub total_devices: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_output: Option<String>,
}
