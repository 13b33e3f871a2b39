//! Device model and message types for devctl
//!
//! This crate defines the vocabulary shared by the platform backends, the
//! device-state core and the HTTP surface: the normalized [`Device`] record,
//! device classes and states, operation kinds, the platform error type, and
//! the uniform response [`Envelope`].
//!
//! # Example
//!
//! ```
//! use protocol::{Device, DeviceClass, DeviceList, Envelope};
//!
//! let mouse = Device::new(DeviceClass::UsbHid, "1-4", "USB Mouse").with_usb_ids(0x046d, 0xc52b);
//! let envelope = Envelope::data(DeviceList { devices: vec![mouse], degraded: vec![] });
//! assert!(envelope.is_success());
//! ```

pub mod error;
pub mod messages;
pub mod types;

pub use error::{ErrorCode, PlatformError};
pub use messages::{
    CameraRequest, ClassRequest, DeviceList, DeviceRequest, DriveRequest, Envelope, FrameParams,
    MessageBody, RadioRequest, RadioState, RecordingParams, Status, VolumeRequest,
};
pub use types::{
    AudioInfo, CameraInfo, ConnectionState, Device, DeviceClass, EjectMode, EnabledState,
    OperationKind, RecordingSpec, Transition, target_key,
};
