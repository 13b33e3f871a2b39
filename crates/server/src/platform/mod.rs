//! Platform backends
//!
//! A [`DeviceBackend`] is the capability contract between the device-state
//! core and the host OS. Backends are synchronous and may block; they are
//! only ever called from the platform worker threads (see [`worker`]).

#[cfg(target_os = "linux")]
pub mod linux;
pub mod simulated;
pub mod worker;

use crate::config::{BackendKind, ServerConfig};
use protocol::{
    AudioInfo, CameraInfo, Device, DeviceClass, EjectMode, PlatformError, RecordingSpec,
    Transition,
};
use std::sync::Arc;

#[cfg(target_os = "linux")]
pub use linux::LinuxBackend;
pub use simulated::SimulatedBackend;
pub use worker::{WorkerPool, spawn_platform_workers};

pub type PlatformResult<T> = Result<T, PlatformError>;

pub trait DeviceBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Devices of `class` currently attached
    ///
    /// Returns [`PlatformError::Unsupported`] for a class this backend never
    /// handles and [`PlatformError::Unavailable`] when the OS facility needed
    /// to enumerate it is missing.
    fn enumerate(&self, class: DeviceClass) -> PlatformResult<Vec<Device>>;

    fn set_enabled(&self, device: &Device, enabled: bool) -> PlatformResult<Transition>;

    fn eject(&self, device: &Device, mode: EjectMode) -> PlatformResult<()>;

    fn radio_powered(&self) -> PlatformResult<bool>;

    fn set_radio_power(&self, on: bool) -> PlatformResult<Transition>;

    fn open_camera(&self, index: u32) -> PlatformResult<CameraInfo>;

    fn close_camera(&self, index: u32) -> PlatformResult<()>;

    fn start_recording(&self, spec: &RecordingSpec) -> PlatformResult<()>;

    fn stop_recording(&self, index: u32) -> PlatformResult<()>;

    /// Save one frame from camera `spec.index` as an image at `spec.output_path`
    fn capture_frame(&self, spec: &RecordingSpec) -> PlatformResult<()>;

    fn audio_info(&self) -> PlatformResult<AudioInfo> {
        Err(PlatformError::Unsupported("audio information".into()))
    }

    fn set_volume(&self, _device: &Device, _level: u8) -> PlatformResult<()> {
        Err(PlatformError::Unsupported("volume control".into()))
    }

    fn toggle_mute(&self, _device: &Device) -> PlatformResult<bool> {
        Err(PlatformError::Unsupported("mute control".into()))
    }
}

/// Build the backend selected in the configuration
pub fn create_backend(config: &ServerConfig) -> Arc<dyn DeviceBackend> {
    match config.platform.backend {
        #[cfg(target_os = "linux")]
        BackendKind::Linux => Arc::new(LinuxBackend::new()),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Linux => {
            tracing::warn!("Host backend only exists on Linux, using the simulated backend");
            Arc::new(SimulatedBackend::with_fixtures())
        }
        BackendKind::Simulated => Arc::new(SimulatedBackend::with_fixtures()),
    }
}
