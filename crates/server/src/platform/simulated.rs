//! In-memory backend
//!
//! Serves a device table instead of the host OS. Used by `--simulate` and by
//! the test suites, which steer it through the knobs below: call latency
//! (global, per operation, or per enumerated class), busy drives,
//! unavailable classes, and one-shot failure or panic injection.

use crate::platform::{DeviceBackend, PlatformResult};
use protocol::{
    AudioInfo, CameraInfo, Device, DeviceClass, EjectMode, EnabledState, OperationKind,
    PlatformError, RecordingSpec, Transition,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct SimState {
    devices: BTreeMap<(DeviceClass, String), Device>,
    busy: HashSet<String>,
    unavailable: HashSet<DeviceClass>,
    failures: HashMap<OperationKind, PlatformError>,
    panics: HashSet<OperationKind>,
    latency: Duration,
    operation_latency: HashMap<OperationKind, Duration>,
    enumerate_latency: HashMap<DeviceClass, Duration>,
    radio_on: bool,
    cameras: BTreeMap<u32, CameraInfo>,
    open_cameras: BTreeSet<u32>,
    recordings: HashMap<u32, RecordingSpec>,
    finished: Vec<PathBuf>,
    frames: Vec<PathBuf>,
    volumes: HashMap<String, u8>,
    muted: HashSet<String>,
}

pub struct SimulatedBackend {
    state: Mutex<SimState>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl SimulatedBackend {
    /// No devices, radio on, no cameras
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(SimState {
                radio_on: true,
                ..SimState::default()
            }),
        }
    }

    /// A small desk setup: flash drive, mouse, keyboard, two Bluetooth
    /// peers, two sound cards, and a webcam
    pub fn with_fixtures() -> Self {
        let backend = Self::empty();

        backend.add_device(
            Device::new(DeviceClass::UsbStorage, "USB001", "SanDisk Cruzer Blade")
                .with_usb_ids(0x0781, 0x5567)
                .with_serial("4C530001230817105173")
                .with_drive("E", Some("/media/usb-e".to_string()))
                .with_path("/dev/sdb"),
        );
        backend.add_device(
            Device::new(DeviceClass::UsbHid, "HID42", "Logitech USB Receiver")
                .with_usb_ids(0x046d, 0xc52b)
                .with_path("1-2"),
        );
        backend.add_device(
            Device::new(DeviceClass::UsbHid, "HID43", "Dell USB Keyboard")
                .with_usb_ids(0x413c, 0x2113)
                .with_path("1-3"),
        );
        backend.add_device(Device::new(
            DeviceClass::Bluetooth,
            "AC:80:0A:12:34:56",
            "WH-1000XM4",
        ));
        backend.add_device(Device::new(
            DeviceClass::Bluetooth,
            "D4:3B:04:AA:BB:CC",
            "MX Keys",
        ));
        backend.add_device(Device::new(DeviceClass::Audio, "card0", "HDA Intel PCH"));
        backend.add_device(
            Device::new(DeviceClass::Audio, "card1", "USB Headphones")
                .with_usb_ids(0x0d8c, 0x0014),
        );
        backend.add_device(
            Device::new(DeviceClass::Camera, "video0", "Integrated Webcam")
                .with_usb_ids(0x0c45, 0x6713)
                .with_path("/dev/video0"),
        );
        backend.add_camera(CameraInfo {
            index: 0,
            width: 1280,
            height: 720,
            fps: 30,
            name: "Integrated Webcam".to_string(),
        });

        backend
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Delay operations of `kind` instead of using the global latency
    pub fn set_operation_latency(&self, kind: OperationKind, latency: Duration) {
        self.lock().operation_latency.insert(kind, latency);
    }

    /// Delay the reply to enumerations of `class`
    ///
    /// The device table is read before the delay, so the reply describes
    /// the state at the start of the call.
    pub fn set_enumerate_latency(&self, class: DeviceClass, latency: Duration) {
        self.lock().enumerate_latency.insert(class, latency);
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plug a device in (replaces one with the same class and id)
    pub fn add_device(&self, device: Device) {
        self.lock()
            .devices
            .insert((device.class, device.id.clone()), device);
    }

    /// Unplug a device; returns whether it was present
    pub fn remove_device(&self, class: DeviceClass, id: &str) -> bool {
        self.lock()
            .devices
            .remove(&(class, id.to_string()))
            .is_some()
    }

    pub fn device(&self, class: DeviceClass, id: &str) -> Option<Device> {
        self.lock().devices.get(&(class, id.to_string())).cloned()
    }

    pub fn add_camera(&self, info: CameraInfo) {
        self.lock().cameras.insert(info.index, info);
    }

    /// Mark a drive as having open files
    pub fn set_busy(&self, id: &str, busy: bool) {
        let mut state = self.lock();
        if busy {
            state.busy.insert(id.to_string());
        } else {
            state.busy.remove(id);
        }
    }

    /// Make enumeration of `class` fail as if its OS facility were missing
    pub fn set_unavailable(&self, class: DeviceClass, unavailable: bool) {
        let mut state = self.lock();
        if unavailable {
            state.unavailable.insert(class);
        } else {
            state.unavailable.remove(&class);
        }
    }

    /// Fail the next operation of `kind` with `error`
    pub fn fail_next(&self, kind: OperationKind, error: PlatformError) {
        self.lock().failures.insert(kind, error);
    }

    /// Panic inside the next operation of `kind`
    pub fn panic_next(&self, kind: OperationKind) {
        self.lock().panics.insert(kind);
    }

    pub fn radio_on(&self) -> bool {
        self.lock().radio_on
    }

    pub fn is_recording(&self, index: u32) -> bool {
        self.lock().recordings.contains_key(&index)
    }

    /// Files of completed recordings, in completion order
    pub fn finished_recordings(&self) -> Vec<PathBuf> {
        self.lock().finished.clone()
    }

    /// Files of captured frames, in capture order
    pub fn captured_frames(&self) -> Vec<PathBuf> {
        self.lock().frames.clone()
    }

    pub fn volume(&self, id: &str) -> Option<u8> {
        self.lock().volumes.get(id).copied()
    }

    /// Apply latency and any injected fault for an operation of `kind`
    fn inject(&self, kind: OperationKind) -> PlatformResult<()> {
        let latency = {
            let state = self.lock();
            state
                .operation_latency
                .get(&kind)
                .copied()
                .unwrap_or(state.latency)
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = self.lock();
        if state.panics.remove(&kind) {
            drop(state);
            panic!("injected panic during {}", kind);
        }
        match state.failures.remove(&kind) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn not_found(device: &Device) -> PlatformError {
    PlatformError::NotFound(device.key())
}

impl DeviceBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn enumerate(&self, class: DeviceClass) -> PlatformResult<Vec<Device>> {
        let (devices, latency) = {
            let state = self.lock();
            if state.unavailable.contains(&class) {
                return Err(PlatformError::Unavailable(format!("{} enumeration", class)));
            }
            let devices: Vec<Device> = state
                .devices
                .values()
                .filter(|d| d.class == class)
                .cloned()
                .collect();
            (devices, state.enumerate_latency.get(&class).copied())
        };

        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        Ok(devices)
    }

    fn set_enabled(&self, device: &Device, enabled: bool) -> PlatformResult<Transition> {
        let kind = if enabled {
            OperationKind::Enable
        } else {
            OperationKind::Disable
        };
        self.inject(kind)?;

        let mut state = self.lock();
        let entry = state
            .devices
            .get_mut(&(device.class, device.id.clone()))
            .ok_or_else(|| not_found(device))?;

        let wanted = if enabled {
            EnabledState::Enabled
        } else {
            EnabledState::Disabled
        };
        if entry.enabled_state == wanted {
            return Ok(Transition::Unchanged);
        }
        entry.enabled_state = wanted;
        debug!("Simulated {} -> {:?}", device.key(), wanted);
        Ok(Transition::Changed)
    }

    fn eject(&self, device: &Device, mode: EjectMode) -> PlatformResult<()> {
        let kind = match mode {
            EjectMode::Safe => OperationKind::Eject,
            EjectMode::Force => OperationKind::ForceEject,
        };
        self.inject(kind)?;

        let mut state = self.lock();
        let key = (device.class, device.id.clone());
        if !state.devices.contains_key(&key) {
            return Err(not_found(device));
        }
        if mode == EjectMode::Safe && state.busy.contains(&device.id) {
            return Err(PlatformError::Busy(device.id.clone()));
        }

        state.devices.remove(&key);
        state.busy.remove(&device.id);
        Ok(())
    }

    fn radio_powered(&self) -> PlatformResult<bool> {
        let state = self.lock();
        if state.unavailable.contains(&DeviceClass::Bluetooth) {
            return Err(PlatformError::Unavailable("bluetooth radio".into()));
        }
        Ok(state.radio_on)
    }

    fn set_radio_power(&self, on: bool) -> PlatformResult<Transition> {
        self.inject(OperationKind::ToggleRadio)?;

        let mut state = self.lock();
        if state.unavailable.contains(&DeviceClass::Bluetooth) {
            return Err(PlatformError::Unavailable("bluetooth radio".into()));
        }
        if state.radio_on == on {
            return Ok(Transition::Unchanged);
        }
        state.radio_on = on;
        Ok(Transition::Changed)
    }

    fn open_camera(&self, index: u32) -> PlatformResult<CameraInfo> {
        self.inject(OperationKind::OpenCamera)?;

        let mut state = self.lock();
        let info = state
            .cameras
            .get(&index)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("camera {}", index)))?;
        state.open_cameras.insert(index);
        Ok(info)
    }

    fn close_camera(&self, index: u32) -> PlatformResult<()> {
        let mut state = self.lock();
        state.recordings.remove(&index);
        state.open_cameras.remove(&index);
        Ok(())
    }

    fn start_recording(&self, spec: &RecordingSpec) -> PlatformResult<()> {
        self.inject(OperationKind::StartRecording)?;

        let mut state = self.lock();
        if !state.cameras.contains_key(&spec.index) {
            return Err(PlatformError::NotFound(format!("camera {}", spec.index)));
        }
        if state.recordings.contains_key(&spec.index) {
            return Err(PlatformError::Os(format!(
                "camera {} is already capturing",
                spec.index
            )));
        }

        std::fs::File::create(&spec.output_path)?;
        state.recordings.insert(spec.index, spec.clone());
        Ok(())
    }

    fn stop_recording(&self, index: u32) -> PlatformResult<()> {
        self.inject(OperationKind::StopRecording)?;

        let mut state = self.lock();
        let spec = state
            .recordings
            .remove(&index)
            .ok_or_else(|| PlatformError::NotFound(format!("recording on camera {}", index)))?;

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&spec.output_path)?;
        writeln!(
            file,
            "simulated capture {}x{}@{}",
            spec.width, spec.height, spec.fps
        )?;
        state.finished.push(spec.output_path);
        Ok(())
    }

    fn capture_frame(&self, spec: &RecordingSpec) -> PlatformResult<()> {
        self.inject(OperationKind::CaptureFrame)?;

        let mut state = self.lock();
        if !state.cameras.contains_key(&spec.index) {
            return Err(PlatformError::NotFound(format!("camera {}", spec.index)));
        }
        if state.recordings.contains_key(&spec.index) {
            return Err(PlatformError::Busy(format!(
                "camera {} is recording",
                spec.index
            )));
        }

        std::fs::write(
            &spec.output_path,
            format!("simulated frame {}x{}\n", spec.width, spec.height),
        )?;
        state.frames.push(spec.output_path.clone());
        Ok(())
    }

    fn audio_info(&self) -> PlatformResult<AudioInfo> {
        let state = self.lock();
        if state.unavailable.contains(&DeviceClass::Audio) {
            return Err(PlatformError::Unavailable("audio subsystem".into()));
        }
        let cards: Vec<&Device> = state
            .devices
            .values()
            .filter(|d| d.class == DeviceClass::Audio)
            .collect();

        Ok(AudioInfo {
            driver: "simulated".to_string(),
            total_devices: cards.len(),
            sample_rate: Some("48000 Hz".to_string()),
            active_input: cards.first().map(|d| d.display_name.clone()),
            active_output: cards.last().map(|d| d.display_name.clone()),
        })
    }

    fn set_volume(&self, device: &Device, level: u8) -> PlatformResult<()> {
        self.inject(OperationKind::SetVolume)?;

        let mut state = self.lock();
        if !state
            .devices
            .contains_key(&(device.class, device.id.clone()))
        {
            return Err(not_found(device));
        }
        state.volumes.insert(device.id.clone(), level);
        Ok(())
    }

    fn toggle_mute(&self, device: &Device) -> PlatformResult<bool> {
        self.inject(OperationKind::ToggleMute)?;

        let mut state = self.lock();
        if !state
            .devices
            .contains_key(&(device.class, device.id.clone()))
        {
            return Err(not_found(device));
        }
        if state.muted.remove(&device.id) {
            Ok(false)
        } else {
            state.muted.insert(device.id.clone());
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive() -> Device {
        Device::new(DeviceClass::UsbStorage, "USB001", "Flash Drive").with_drive("E", None)
    }

    #[test]
    fn test_safe_eject_refuses_busy_drive() {
        let backend = SimulatedBackend::empty();
        backend.add_device(drive());
        backend.set_busy("USB001", true);

        assert!(matches!(
            backend.eject(&drive(), EjectMode::Safe),
            Err(PlatformError::Busy(_))
        ));
        assert!(backend.eject(&drive(), EjectMode::Force).is_ok());
        assert!(backend.device(DeviceClass::UsbStorage, "USB001").is_none());
    }

    #[test]
    fn test_set_enabled_reports_transition() {
        let backend = SimulatedBackend::with_fixtures();
        let mouse = backend.device(DeviceClass::UsbHid, "HID42").unwrap();

        assert_eq!(
            backend.set_enabled(&mouse, false).unwrap(),
            Transition::Changed
        );
        assert_eq!(
            backend.set_enabled(&mouse, false).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_unavailable_class() {
        let backend = SimulatedBackend::with_fixtures();
        backend.set_unavailable(DeviceClass::Bluetooth, true);
        assert!(matches!(
            backend.enumerate(DeviceClass::Bluetooth),
            Err(PlatformError::Unavailable(_))
        ));
        assert!(!backend.enumerate(DeviceClass::Audio).unwrap().is_empty());
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let backend = SimulatedBackend::with_fixtures();
        backend.fail_next(OperationKind::ToggleRadio, PlatformError::Os("rfkill".into()));

        assert!(backend.set_radio_power(false).is_err());
        assert_eq!(backend.set_radio_power(false).unwrap(), Transition::Changed);
        assert!(!backend.radio_on());
    }

    #[test]
    fn test_recording_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::with_fixtures();
        let spec = RecordingSpec {
            index: 0,
            width: 640,
            height: 480,
            fps: 15,
            output_path: dir.path().join("clip.avi"),
        };

        backend.start_recording(&spec).unwrap();
        assert!(backend.is_recording(0));
        assert!(backend.start_recording(&spec).is_err());

        backend.stop_recording(0).unwrap();
        let written = std::fs::read_to_string(&spec.output_path).unwrap();
        assert!(written.contains("640x480@15"));
        assert_eq!(backend.finished_recordings(), vec![spec.output_path]);
    }

    #[test]
    fn test_capture_frame_refuses_recording_camera() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::with_fixtures();
        let frame = RecordingSpec {
            index: 0,
            width: 1280,
            height: 720,
            fps: 30,
            output_path: dir.path().join("frame.jpg"),
        };

        backend.capture_frame(&frame).unwrap();
        assert!(
            std::fs::read_to_string(&frame.output_path)
                .unwrap()
                .contains("1280x720")
        );

        let recording = RecordingSpec {
            output_path: dir.path().join("clip.avi"),
            ..frame.clone()
        };
        backend.start_recording(&recording).unwrap();
        assert!(matches!(
            backend.capture_frame(&frame),
            Err(PlatformError::Busy(_))
        ));
        assert_eq!(backend.captured_frames(), vec![frame.output_path]);
    }

    #[test]
    fn test_operation_latency_overrides_global() {
        let backend = SimulatedBackend::with_fixtures().with_latency(Duration::from_secs(5));
        backend.set_operation_latency(OperationKind::ToggleRadio, Duration::ZERO);

        let started = std::time::Instant::now();
        backend.set_radio_power(false).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
