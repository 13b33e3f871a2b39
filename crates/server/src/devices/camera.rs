//! Camera session and recording state machine
//!
//! The recording lifecycle is `Idle -> Starting -> Recording -> Stopping -> Idle`.
//! Transitions are claimed atomically before any platform call is made, so of
//! two racing stops exactly one observes `Recording`; the other sees the
//! transition already taken and gets [`OperationError::NotRecording`].

use crate::devices::error::OperationError;
use protocol::CameraInfo;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// An open camera handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSession {
    pub camera_index: u32,
    pub name: String,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub is_recording: bool,
    pub output_path: Option<PathBuf>,
}

impl CameraSession {
    pub fn from_info(info: CameraInfo) -> Self {
        Self {
            camera_index: info.index,
            name: info.name,
            resolution: (info.width, info.height),
            fps: info.fps,
            is_recording: false,
            output_path: None,
        }
    }

    pub fn info(&self) -> CameraInfo {
        CameraInfo {
            index: self.camera_index,
            width: self.resolution.0,
            height: self.resolution.1,
            fps: self.fps,
            name: self.name.clone(),
        }
    }
}

struct CameraInner {
    state: RecordingState,
    session: Option<CameraSession>,
}

/// Owner of the single camera session
#[derive(Clone)]
pub struct CameraController {
    inner: Arc<Mutex<CameraInner>>,
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CameraInner {
                state: RecordingState::Idle,
                session: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CameraInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> RecordingState {
        self.lock().state
    }

    pub fn session(&self) -> Option<CameraSession> {
        self.lock().session.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Install a freshly opened session, unless one already exists
    ///
    /// Returns the session in effect afterwards.
    pub fn install(&self, session: CameraSession) -> CameraSession {
        let mut inner = self.lock();
        inner.session.get_or_insert(session).clone()
    }

    /// Remove the session if no recording is active or in transition
    pub fn take_idle_session(&self) -> Result<Option<CameraSession>, OperationError> {
        let mut inner = self.lock();
        match inner.state {
            RecordingState::Idle => Ok(inner.session.take()),
            _ => Err(OperationError::AlreadyRecording),
        }
    }

    /// Claim `Idle -> Starting`
    pub fn claim_start(&self) -> Result<RecordingClaim, OperationError> {
        let mut inner = self.lock();
        if inner.state != RecordingState::Idle {
            return Err(OperationError::AlreadyRecording);
        }
        inner.state = RecordingState::Starting;
        debug!("Camera recording state: idle -> starting");

        Ok(RecordingClaim {
            camera: self.clone(),
            on_commit: RecordingState::Recording,
            on_abort: RecordingState::Idle,
            output_path: None,
            settled: false,
        })
    }

    /// Claim `Recording -> Stopping`
    ///
    /// Returns the camera index being recorded alongside the claim.
    pub fn claim_stop(&self) -> Result<(RecordingClaim, u32), OperationError> {
        let mut inner = self.lock();
        if inner.state != RecordingState::Recording {
            return Err(OperationError::NotRecording);
        }
        let index = inner
            .session
            .as_ref()
            .map(|s| s.camera_index)
            .ok_or(OperationError::NotRecording)?;
        inner.state = RecordingState::Stopping;
        debug!("Camera recording state: recording -> stopping");

        let output_path = inner.session.as_ref().and_then(|s| s.output_path.clone());
        Ok((
            RecordingClaim {
                camera: self.clone(),
                on_commit: RecordingState::Idle,
                on_abort: RecordingState::Recording,
                output_path,
                settled: false,
            },
            index,
        ))
    }

    fn settle(&self, state: RecordingState, output_path: Option<PathBuf>) {
        let mut inner = self.lock();
        debug!("Camera recording state: {:?} -> {:?}", inner.state, state);
        inner.state = state;
        if let Some(session) = inner.session.as_mut() {
            session.is_recording = state == RecordingState::Recording;
            if state == RecordingState::Recording {
                session.output_path = output_path;
            }
        }
    }
}

/// A claimed recording transition
///
/// Dropping the claim without committing rolls the state back, so a failed
/// or abandoned platform call never leaves the camera stuck mid-transition.
pub struct RecordingClaim {
    camera: CameraController,
    on_commit: RecordingState,
    on_abort: RecordingState,
    output_path: Option<PathBuf>,
    settled: bool,
}

impl RecordingClaim {
    /// File being recorded (start) or finished (stop)
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output_path.as_ref()
    }

    pub fn set_output_path(&mut self, path: PathBuf) {
        self.output_path = Some(path);
    }

    pub fn commit(mut self) {
        self.settled = true;
        self.camera.settle(self.on_commit, self.output_path.take());
    }
}

impl Drop for RecordingClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.camera.settle(self.on_abort, self.output_path.take());
        }
    }
}
