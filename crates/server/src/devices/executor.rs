//! Command executor
//!
//! Performs mutating operations against the platform. Each operation:
//!
//! 1. registers itself in the [`PendingTable`] for its target, failing fast
//!    with [`OperationError::Conflict`] if another operation is in flight,
//! 2. runs in its own Tokio task that owns the pending guard, sends the
//!    platform command and applies the confirmed result to the reconciler,
//! 3. is awaited by the caller for at most the configured timeout.
//!
//! A caller that times out gets [`OperationError::Timeout`]; the task keeps
//! running and its eventual outcome still lands in the state and history.

use crate::config::CameraSettings;
use crate::devices::camera::{CameraController, CameraSession, RecordingState};
use crate::devices::error::OperationError;
use crate::devices::pending::{PendingGuard, PendingTable};
use crate::devices::reconciler::StateReconciler;
use common::{PlatformBridge, PlatformCommand};
use protocol::{
    CameraInfo, ConnectionState, Device, DeviceClass, EjectMode, EnabledState, OperationKind,
    RadioState, RecordingSpec, Transition, target_key,
};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Target key of the (single) Bluetooth radio
pub const RADIO_TARGET: &str = "bluetooth/radio";

/// Successful outcome of a mutating operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub id: u64,
    pub message: String,
}

/// Optional parameters of a recording request
#[derive(Debug, Clone, Default)]
pub struct RecordingRequest {
    pub filename: Option<String>,
    pub fps: Option<u32>,
}

#[derive(Clone)]
pub struct CommandExecutor {
    bridge: PlatformBridge,
    reconciler: Arc<StateReconciler>,
    pending: PendingTable,
    camera: CameraController,
    camera_settings: CameraSettings,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(
        bridge: PlatformBridge,
        reconciler: Arc<StateReconciler>,
        pending: PendingTable,
        camera_settings: CameraSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            reconciler,
            pending,
            camera: CameraController::new(),
            camera_settings,
            timeout,
        }
    }

    pub fn camera(&self) -> &CameraController {
        &self.camera
    }

    /// Run a device-scoped operation
    ///
    /// Supports enable, disable, eject, force eject and mute toggling; the
    /// remaining kinds need parameters and have their own entry points.
    pub async fn execute(
        &self,
        device: &Device,
        kind: OperationKind,
    ) -> Result<OperationResult, OperationError> {
        match kind {
            OperationKind::Enable => self.set_enabled(device, true).await,
            OperationKind::Disable => self.set_enabled(device, false).await,
            OperationKind::Eject => self.eject(device, EjectMode::Safe).await,
            OperationKind::ForceEject => self.eject(device, EjectMode::Force).await,
            OperationKind::ToggleMute => self.toggle_mute(device).await,
            other => Err(OperationError::InvalidRequest(format!(
                "{} cannot be executed against a single device",
                other
            ))),
        }
    }

    /// Enable or disable a device
    ///
    /// Requesting the state the device is already in succeeds with an
    /// "already" message rather than failing.
    pub async fn set_enabled(
        &self,
        device: &Device,
        enabled: bool,
    ) -> Result<OperationResult, OperationError> {
        if !device.class.supports_enable() {
            return Err(OperationError::Unsupported(format!(
                "{} devices cannot be enabled or disabled",
                device.class
            )));
        }

        let kind = if enabled {
            OperationKind::Enable
        } else {
            OperationKind::Disable
        };
        let guard = self.begin(&device.key(), kind, None)?;

        let bridge = self.bridge.clone();
        let reconciler = self.reconciler.clone();
        let device = device.clone();
        self.dispatch(guard, async move {
            let transition = bridge
                .request(|response| PlatformCommand::SetEnabled {
                    device: device.clone(),
                    enabled,
                    response,
                })
                .await?;

            let state = if enabled {
                EnabledState::Enabled
            } else {
                EnabledState::Disabled
            };
            reconciler.amend(device.class, &device.id, |d| d.enabled_state = state);

            let verb = if enabled { "enabled" } else { "disabled" };
            Ok(match transition {
                Transition::Changed => {
                    info!("Device {} {}", device.key(), verb);
                    format!("Device {} {}", device.id, verb)
                }
                Transition::Unchanged => format!("Device {} already {}", device.id, verb),
            })
        })
        .await
    }

    /// Detach a storage device
    ///
    /// A safe eject refuses busy volumes. A force eject skips that check and
    /// may lose unflushed data, but still reports what the OS call returned.
    pub async fn eject(
        &self,
        device: &Device,
        mode: EjectMode,
    ) -> Result<OperationResult, OperationError> {
        if device.class != DeviceClass::UsbStorage {
            return Err(OperationError::Unsupported(format!(
                "{} is not a storage device",
                device.id
            )));
        }

        let kind = match mode {
            EjectMode::Safe => OperationKind::Eject,
            EjectMode::Force => OperationKind::ForceEject,
        };
        let guard = self.begin(&device.key(), kind, Some(device.clone()))?;

        let bridge = self.bridge.clone();
        let reconciler = self.reconciler.clone();
        let device = device.clone();
        self.dispatch(guard, async move {
            let label = drive_label(&device);
            bridge
                .request(|response| PlatformCommand::Eject {
                    device: device.clone(),
                    mode,
                    response,
                })
                .await?;

            reconciler.amend(device.class, &device.id, |d| {
                d.connection_state = ConnectionState::Disconnected
            });
            reconciler.mark_stale();

            info!("Drive {} ejected ({:?})", label, mode);
            Ok(match mode {
                EjectMode::Safe => format!("Drive {} ejected safely", label),
                EjectMode::Force => format!(
                    "Drive {} force-ejected; unflushed data may have been lost",
                    label
                ),
            })
        })
        .await
    }

    /// Switch the Bluetooth radio on, off, or to the opposite of its current state
    pub async fn set_radio(&self, state: RadioState) -> Result<OperationResult, OperationError> {
        let guard = self.begin(RADIO_TARGET, OperationKind::ToggleRadio, None)?;

        let bridge = self.bridge.clone();
        self.dispatch(guard, async move {
            let on = match state {
                RadioState::On => true,
                RadioState::Off => false,
                RadioState::Toggle => {
                    let powered = bridge
                        .request(|response| PlatformCommand::RadioPowered { response })
                        .await?;
                    !powered
                }
            };

            let transition = bridge
                .request(|response| PlatformCommand::SetRadioPower { on, response })
                .await?;

            let word = if on { "on" } else { "off" };
            Ok(match transition {
                Transition::Changed => {
                    info!("Bluetooth radio switched {}", word);
                    format!("Bluetooth turned {}", word)
                }
                Transition::Unchanged => format!("Bluetooth already {}", word),
            })
        })
        .await
    }

    pub async fn set_volume(
        &self,
        device: &Device,
        level: u8,
    ) -> Result<OperationResult, OperationError> {
        if device.class != DeviceClass::Audio {
            return Err(OperationError::Unsupported(format!(
                "{} has no volume control",
                device.id
            )));
        }
        if level > 100 {
            return Err(OperationError::InvalidRequest(format!(
                "volume {} is outside 0-100",
                level
            )));
        }

        let guard = self.begin(&device.key(), OperationKind::SetVolume, None)?;
        let bridge = self.bridge.clone();
        let device = device.clone();
        self.dispatch(guard, async move {
            bridge
                .request(|response| PlatformCommand::SetVolume {
                    device: device.clone(),
                    level,
                    response,
                })
                .await?;
            Ok(format!("Volume of {} set to {}%", device.display_name, level))
        })
        .await
    }

    pub async fn toggle_mute(&self, device: &Device) -> Result<OperationResult, OperationError> {
        if device.class != DeviceClass::Audio {
            return Err(OperationError::Unsupported(format!(
                "{} cannot be muted",
                device.id
            )));
        }

        let guard = self.begin(&device.key(), OperationKind::ToggleMute, None)?;
        let bridge = self.bridge.clone();
        let device = device.clone();
        self.dispatch(guard, async move {
            let muted = bridge
                .request(|response| PlatformCommand::ToggleMute {
                    device: device.clone(),
                    response,
                })
                .await?;
            let word = if muted { "muted" } else { "unmuted" };
            Ok(format!("{} {}", device.display_name, word))
        })
        .await
    }

    /// Open the camera at `index` (default camera when `None`)
    ///
    /// Opening the camera that is already open returns its session info.
    pub async fn open_camera(&self, index: Option<u32>) -> Result<CameraInfo, OperationError> {
        let index = index.unwrap_or(self.camera_settings.default_index);

        if let Some(session) = self.camera.session() {
            if session.camera_index == index {
                return Ok(session.info());
            }
            self.close_camera().await?;
        }

        let mut guard = self.begin(&camera_target(index), OperationKind::OpenCamera, None)?;
        let opened = open_session(&self.bridge, &self.camera_settings, index).await;
        settle(&mut guard, &opened, |s| format!("Camera {} opened", s.camera_index));
        let session = self.camera.install(opened?);
        info!("Camera {} opened ({})", session.camera_index, session.name);
        Ok(session.info())
    }

    /// Close the open camera, stopping an active recording first
    pub async fn close_camera(&self) -> Result<String, OperationError> {
        if self.camera.session().is_some_and(|s| s.is_recording) {
            match self.stop_recording().await {
                Ok(_) | Err(OperationError::NotRecording) => {}
                Err(e) => return Err(e),
            }
        }

        let Some(session) = self.camera.take_idle_session()? else {
            return Ok("Camera already closed".to_string());
        };

        let index = session.camera_index;
        self.bridge
            .request(|response| PlatformCommand::CloseCamera { index, response })
            .await?;
        info!("Camera {} closed", index);
        Ok(format!("Camera {} closed", index))
    }

    /// Properties of the open camera, or of the default camera if none is open
    pub async fn camera_info(&self) -> Result<CameraInfo, OperationError> {
        if let Some(session) = self.camera.session() {
            return Ok(session.info());
        }

        let index = self.camera_settings.default_index;
        let mut guard = self.begin(&camera_target(index), OperationKind::OpenCamera, None)?;
        // A recording may have opened the camera before the guard was taken
        if let Some(session) = self.camera.session() {
            guard.complete(true, "Camera already open");
            return Ok(session.info());
        }
        let opened = open_session(&self.bridge, &self.camera_settings, index).await;
        settle(&mut guard, &opened, |s| format!("Camera {} queried", s.camera_index));
        let session = opened?;
        if let Err(e) = self
            .bridge
            .request(|response| PlatformCommand::CloseCamera { index, response })
            .await
        {
            debug!("Closing camera {} after info query failed: {}", index, e);
        }
        Ok(session.info())
    }

    /// Save a single frame as a JPEG, opening the default camera briefly if
    /// no session is open
    ///
    /// Refused while a recording is active or in transition, since the
    /// recorder owns the capture device.
    pub async fn take_frame(
        &self,
        filename: Option<&str>,
    ) -> Result<OperationResult, OperationError> {
        let output_path = self.output_path(filename, "frame", "jpg")?;
        if self.camera.state() != RecordingState::Idle {
            return Err(OperationError::AlreadyRecording);
        }

        let index = self
            .camera
            .session()
            .map(|s| s.camera_index)
            .unwrap_or(self.camera_settings.default_index);
        let target = camera_target(index);
        let mut guard = self.begin(&target, OperationKind::CaptureFrame, None)?;

        // Re-read under the guard; a recording may have started meanwhile
        if self.camera.state() != RecordingState::Idle {
            let refused = OperationError::AlreadyRecording;
            guard.complete(false, refused.to_string());
            return Err(refused);
        }
        let session = self.camera.session();
        if let Some(other) = session.as_ref().filter(|s| s.camera_index != index) {
            let refused = OperationError::Conflict {
                target,
                running: OperationKind::OpenCamera,
            };
            debug!("Camera switched to {} during capture", other.camera_index);
            guard.complete(false, refused.to_string());
            return Err(refused);
        }

        let bridge = self.bridge.clone();
        let settings = self.camera_settings.clone();
        self.dispatch(guard, async move {
            let (capture, transient) = match session {
                Some(session) => (session, false),
                None => (open_session(&bridge, &settings, index).await?, true),
            };

            let spec = RecordingSpec {
                index,
                width: capture.resolution.0,
                height: capture.resolution.1,
                fps: capture.fps,
                output_path: output_path.clone(),
            };
            let captured = bridge
                .request(|response| PlatformCommand::CaptureFrame { spec, response })
                .await;

            if transient {
                if let Err(e) = bridge
                    .request(|response| PlatformCommand::CloseCamera { index, response })
                    .await
                {
                    debug!("Closing camera {} after capture failed: {}", index, e);
                }
            }
            captured?;

            info!("Frame from camera {} saved to {}", index, output_path.display());
            Ok(output_path.display().to_string())
        })
        .await
    }

    /// Start recording, opening the default camera if no session is open
    pub async fn start_recording(
        &self,
        request: RecordingRequest,
    ) -> Result<OperationResult, OperationError> {
        let output_path = self.output_path(request.filename.as_deref(), "recording", "avi")?;
        if request.fps == Some(0) {
            return Err(OperationError::InvalidRequest("fps must be positive".into()));
        }

        let mut claim = self.camera.claim_start()?;
        claim.set_output_path(output_path.clone());

        let index = self
            .camera
            .session()
            .map(|s| s.camera_index)
            .unwrap_or(self.camera_settings.default_index);
        let guard = self.begin(
            &camera_target(index),
            OperationKind::StartRecording,
            None,
        )?;

        let bridge = self.bridge.clone();
        let camera = self.camera.clone();
        let settings = self.camera_settings.clone();
        self.dispatch(guard, async move {
            let session = match camera.session() {
                Some(session) => session,
                None => camera.install(open_session(&bridge, &settings, index).await?),
            };

            let spec = RecordingSpec {
                index: session.camera_index,
                width: session.resolution.0,
                height: session.resolution.1,
                fps: request.fps.unwrap_or(session.fps),
                output_path: output_path.clone(),
            };
            bridge
                .request(|response| PlatformCommand::StartRecording { spec, response })
                .await?;

            claim.commit();
            info!(
                "Recording started on camera {} to {}",
                session.camera_index,
                output_path.display()
            );
            Ok(format!("Recording started: {}", output_path.display()))
        })
        .await
    }

    pub async fn stop_recording(&self) -> Result<OperationResult, OperationError> {
        let (claim, index) = self.camera.claim_stop()?;
        let guard = self.begin(&camera_target(index), OperationKind::StopRecording, None)?;

        let bridge = self.bridge.clone();
        self.dispatch(guard, async move {
            bridge
                .request(|response| PlatformCommand::StopRecording { index, response })
                .await?;

            let saved = claim
                .output_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            claim.commit();
            info!("Recording on camera {} stopped, saved {}", index, saved);
            Ok(format!("Recording saved: {}", saved))
        })
        .await
    }

    /// Record for the configured short duration
    ///
    /// The stop is scheduled server-side. If a manual stop gets there first
    /// the scheduled one observes `NotRecording` and does nothing.
    pub async fn timed_recording(
        &self,
        request: RecordingRequest,
    ) -> Result<OperationResult, OperationError> {
        let started = self.start_recording(request).await?;
        let duration = self.camera_settings.timed_recording();

        let executor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            match executor.stop_recording().await {
                Ok(result) => debug!("Timed recording finished: {}", result.message),
                Err(OperationError::NotRecording) => {
                    debug!("Timed recording already stopped")
                }
                Err(e) => warn!("Scheduled stop of timed recording failed: {}", e),
            }
        });

        Ok(OperationResult {
            id: started.id,
            message: format!(
                "Recording for {} ms: {}",
                duration.as_millis(),
                started.message
            ),
        })
    }

    /// Release the camera at process teardown
    pub async fn shutdown(&self) {
        if !self.camera.is_open() {
            return;
        }
        match self.close_camera().await {
            Ok(msg) => info!("{}", msg),
            Err(e) => warn!("Failed to close camera during shutdown: {}", e),
        }
    }

    fn begin(
        &self,
        target: &str,
        kind: OperationKind,
        subject: Option<Device>,
    ) -> Result<PendingGuard, OperationError> {
        self.pending
            .try_begin(target, kind, subject)
            .map_err(|running| {
                warn!(
                    "Rejecting {} on {}: {} (operation {}) still running",
                    kind, target, running.kind, running.id
                );
                OperationError::Conflict {
                    target: target.to_string(),
                    running: running.kind,
                }
            })
    }

    /// Run `work` in a task owning `guard`, waiting at most the configured timeout
    async fn dispatch<F>(
        &self,
        mut guard: PendingGuard,
        work: F,
    ) -> Result<OperationResult, OperationError>
    where
        F: Future<Output = Result<String, OperationError>> + Send + 'static,
    {
        let id = guard.id();
        let target = guard.target().to_string();

        let task = tokio::spawn(async move {
            let result = work.await;
            match &result {
                Ok(message) => guard.complete(true, message.clone()),
                Err(e) => {
                    warn!("Operation {} on {} failed: {}", guard.id(), guard.target(), e);
                    guard.complete(false, e.to_string());
                }
            }
            result.map(|message| OperationResult { id, message })
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(OperationError::Unknown(format!(
                "operation {} aborted: {}",
                id, join_error
            ))),
            Err(_) => {
                warn!(
                    "Operation {} on {} exceeded {:?}; it keeps running",
                    id, target, self.timeout
                );
                Err(OperationError::Timeout {
                    id,
                    target,
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    /// Path inside the output directory for a capture
    ///
    /// Only the file name of `filename` is used; without one the name is
    /// `<prefix>_<unix secs>.<extension>`.
    fn output_path(
        &self,
        filename: Option<&str>,
        prefix: &str,
        extension: &str,
    ) -> Result<PathBuf, OperationError> {
        let name = match filename.map(str::trim).filter(|f| !f.is_empty()) {
            Some(requested) => Path::new(requested)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    OperationError::InvalidRequest(format!("invalid file name '{}'", requested))
                })?,
            None => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                format!("{}_{}.{}", prefix, secs, extension)
            }
        };

        let mut path = self.camera_settings.resolved_output_dir().join(name);
        if path.extension().is_none() {
            path.set_extension(extension);
        }
        Ok(path)
    }
}

async fn open_session(
    bridge: &PlatformBridge,
    settings: &CameraSettings,
    index: u32,
) -> Result<CameraSession, OperationError> {
    let mut info = bridge
        .request(|response| PlatformCommand::OpenCamera { index, response })
        .await?;

    // Backends that cannot report a mode leave it zeroed
    if info.width == 0 || info.height == 0 {
        info.width = settings.width;
        info.height = settings.height;
    }
    if info.fps == 0 {
        info.fps = settings.fps;
    }
    Ok(CameraSession::from_info(info))
}

/// Record the outcome of an operation run inline rather than through `dispatch`
fn settle<T>(
    guard: &mut PendingGuard,
    result: &Result<T, OperationError>,
    message: impl FnOnce(&T) -> String,
) {
    match result {
        Ok(value) => guard.complete(true, message(value)),
        Err(e) => guard.complete(false, e.to_string()),
    }
}

fn camera_target(index: u32) -> String {
    target_key(DeviceClass::Camera, &format!("video{}", index))
}

fn drive_label(device: &Device) -> String {
    device
        .drive_letter
        .clone()
        .or_else(|| device.mount_point.clone())
        .unwrap_or_else(|| device.id.clone())
}
