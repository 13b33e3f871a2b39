//! Test utilities for devctl
//!
//! Provides mock device builders and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_storage_device;
//!
//! let drive = create_mock_storage_device("USB001", "E");
//! assert_eq!(drive.drive_letter.as_deref(), Some("E"));
//! ```

use protocol::{Device, DeviceClass};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock HID device (mouse/keyboard)
pub fn create_mock_hid_device(id: &str) -> Device {
    Device::new(DeviceClass::UsbHid, id, format!("USB Mouse {}", id)).with_usb_ids(0x046d, 0xc52b)
}

/// Create a mock mass-storage device with a drive letter
pub fn create_mock_storage_device(id: &str, drive_letter: &str) -> Device {
    Device::new(DeviceClass::UsbStorage, id, "USB Flash Drive")
        .with_usb_ids(0x0781, 0x5567)
        .with_drive(drive_letter, Some(format!("/media/{}", drive_letter.to_lowercase())))
}

/// Create a mock Bluetooth peer
pub fn create_mock_bluetooth_device(address: &str, name: &str) -> Device {
    Device::new(DeviceClass::Bluetooth, address, name)
}

/// Create a mock audio endpoint
pub fn create_mock_audio_device(id: &str, name: &str) -> Device {
    Device::new(DeviceClass::Audio, id, name)
}

/// Create a mock camera
pub fn create_mock_camera(index: u32) -> Device {
    Device::new(DeviceClass::Camera, format!("video{}", index), "USB Webcam")
        .with_usb_ids(0x046d, 0x082d)
}

/// Create `count` HID devices with ids `HID1..=HIDn`
pub fn create_mock_device_list(count: u32) -> Vec<Device> {
    (1..=count)
        .map(|i| create_mock_hid_device(&format!("HID{}", i)))
        .collect()
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(result, 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
