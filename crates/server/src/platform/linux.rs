//! Linux backend
//!
//! - USB HID: libusb enumeration, enabled state via sysfs `authorized`
//! - USB storage: removable block devices under `/sys/block`, mounts from
//!   `/proc/mounts`, eject by unmount plus SCSI `delete`
//! - Bluetooth: radio via rfkill, peers via `bluetoothctl`
//! - Audio: cards from `/proc/asound/cards`
//! - Camera: video4linux nodes, recording through an `ffmpeg` child

use crate::platform::{DeviceBackend, PlatformResult};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use protocol::{
    AudioInfo, CameraInfo, Device, DeviceClass, EjectMode, EnabledState, PlatformError,
    RecordingSpec, Transition,
};
use rusb::UsbContext;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// USB interface class code of HID devices
const USB_CLASS_HID: u8 = 0x03;

/// How long ffmpeg gets to finalize a file after being asked to quit
const RECORDER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LinuxBackend {
    sys: PathBuf,
    proc: PathBuf,
    dev: PathBuf,
    recorders: Mutex<HashMap<u32, Child>>,
}

impl Default for LinuxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxBackend {
    pub fn new() -> Self {
        Self::with_roots("/sys", "/proc", "/dev")
    }

    /// Backend reading sysfs, procfs and device nodes from other roots
    pub fn with_roots(
        sys: impl Into<PathBuf>,
        proc: impl Into<PathBuf>,
        dev: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sys: sys.into(),
            proc: proc.into(),
            dev: dev.into(),
            recorders: Mutex::new(HashMap::new()),
        }
    }

    fn recorders(&self) -> MutexGuard<'_, HashMap<u32, Child>> {
        self.recorders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn usb_device_dir(&self, port: &str) -> PathBuf {
        self.sys.join("bus/usb/devices").join(port)
    }

    fn enumerate_hid(&self) -> PlatformResult<Vec<Device>> {
        let context = rusb::Context::new()
            .map_err(|e| PlatformError::Unavailable(format!("libusb: {}", e)))?;
        let list = context
            .devices()
            .map_err(|e| PlatformError::Unavailable(format!("libusb: {}", e)))?;

        let mut devices = Vec::new();
        for device in list.iter() {
            let ports = match device.port_numbers() {
                Ok(ports) if !ports.is_empty() => ports,
                // Root hubs have no port path
                _ => continue,
            };
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!("Skipping USB device without descriptor: {}", e);
                    continue;
                }
            };
            if !is_hid(&device, descriptor.class_code()) {
                continue;
            }

            let port = usb_port_name(device.bus_number(), &ports);
            let dir = self.usb_device_dir(&port);
            let name = read_attr(&dir, "product").unwrap_or_else(|| {
                format!(
                    "USB device {:04x}:{:04x}",
                    descriptor.vendor_id(),
                    descriptor.product_id()
                )
            });

            let mut record = Device::new(DeviceClass::UsbHid, port.clone(), name)
                .with_usb_ids(descriptor.vendor_id(), descriptor.product_id())
                .with_enabled(authorized_state(&dir));
            if let Some(serial) = read_attr(&dir, "serial") {
                record = record.with_serial(serial);
            }
            devices.push(record);
        }

        Ok(devices)
    }

    fn enumerate_storage(&self) -> PlatformResult<Vec<Device>> {
        let block = self.sys.join("block");
        let entries = fs::read_dir(&block)
            .map_err(|e| PlatformError::Unavailable(format!("{}: {}", block.display(), e)))?;
        let mounts = self.mounts();

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let dir = entry.path();
            if read_attr(&dir, "removable").as_deref() != Some("1") {
                continue;
            }
            let Some(usb_dir) = usb_ancestor(&dir.join("device")) else {
                continue;
            };

            let dev_path = self.dev.join(&name).to_string_lossy().into_owned();
            let display = match (read_attr(&usb_dir, "manufacturer"), read_attr(&usb_dir, "product")) {
                (Some(vendor), Some(product)) => format!("{} {}", vendor, product),
                (None, Some(product)) => product,
                _ => format!("USB drive {}", name),
            };

            let mut record = Device::new(DeviceClass::UsbStorage, name.clone(), display)
                .with_path(dev_path.clone())
                .with_enabled(authorized_state(&usb_dir));
            if let (Some(vid), Some(pid)) = (
                read_hex_attr(&usb_dir, "idVendor"),
                read_hex_attr(&usb_dir, "idProduct"),
            ) {
                record = record.with_usb_ids(vid, pid);
            }
            if let Some(serial) = read_attr(&usb_dir, "serial") {
                record = record.with_serial(serial);
            }
            if let Some(entry) = mounts_of(&mounts, &dev_path).into_iter().next() {
                record.mount_point = Some(entry.target);
            }
            devices.push(record);
        }

        Ok(devices)
    }

    fn enumerate_bluetooth(&self) -> PlatformResult<Vec<Device>> {
        let output = Command::new("bluetoothctl")
            .arg("devices")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => PlatformError::Unavailable("bluetoothctl".into()),
                _ => PlatformError::Os(format!("bluetoothctl: {}", e)),
            })?;

        if !output.status.success() {
            return Err(PlatformError::Unavailable(format!(
                "bluetoothctl exited with {}",
                output.status
            )));
        }

        Ok(parse_bluetoothctl_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    fn enumerate_audio(&self) -> PlatformResult<Vec<Device>> {
        let path = self.proc.join("asound/cards");
        let cards = fs::read_to_string(&path)
            .map_err(|e| PlatformError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Ok(parse_asound_cards(&cards))
    }

    fn enumerate_cameras(&self) -> PlatformResult<Vec<Device>> {
        let class_dir = self.sys.join("class/video4linux");
        let entries = match fs::read_dir(&class_dir) {
            Ok(entries) => entries,
            // No video4linux class at all means no capture devices
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PlatformError::Unavailable(format!(
                    "{}: {}",
                    class_dir.display(),
                    e
                )));
            }
        };

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let node = entry.file_name().to_string_lossy().into_owned();
            if video_index(&node).is_none() {
                continue;
            }
            let dir = entry.path();
            let name = read_attr(&dir, "name").unwrap_or_else(|| node.clone());
            let usb_dir = usb_ancestor(&dir.join("device"));

            let mut record = Device::new(DeviceClass::Camera, node.clone(), name)
                .with_path(self.dev.join(&node).to_string_lossy().into_owned());
            match &usb_dir {
                Some(usb_dir) => {
                    record = record.with_enabled(authorized_state(usb_dir));
                    if let (Some(vid), Some(pid)) = (
                        read_hex_attr(usb_dir, "idVendor"),
                        read_hex_attr(usb_dir, "idProduct"),
                    ) {
                        record = record.with_usb_ids(vid, pid);
                    }
                }
                None => record = record.with_enabled(EnabledState::Unknown),
            }
            devices.push(record);
        }

        Ok(devices)
    }

    /// sysfs directory of the USB device behind `device`
    fn usb_dir_of(&self, device: &Device) -> PlatformResult<PathBuf> {
        let dir = match device.class {
            DeviceClass::UsbHid => Some(self.usb_device_dir(&device.path)),
            DeviceClass::UsbStorage => {
                usb_ancestor(&self.sys.join("block").join(block_name(device)).join("device"))
            }
            DeviceClass::Camera => usb_ancestor(
                &self
                    .sys
                    .join("class/video4linux")
                    .join(node_name(&device.path))
                    .join("device"),
            ),
            _ => None,
        };

        match dir {
            Some(dir) if dir.exists() => Ok(dir),
            Some(_) => Err(PlatformError::NotFound(device.key())),
            None => Err(PlatformError::Unsupported(format!(
                "{} is not attached over USB",
                device.key()
            ))),
        }
    }

    fn mounts(&self) -> Vec<MountEntry> {
        fs::read_to_string(self.proc.join("mounts"))
            .map(|text| parse_mounts(&text))
            .unwrap_or_default()
    }

    /// First process found holding a file, cwd or root under one of `mounts`
    ///
    /// Processes whose `/proc` entries cannot be read are skipped.
    fn open_handle_under(&self, mounts: &[MountEntry]) -> Option<(u32, String)> {
        let entries = fs::read_dir(&self.proc).ok()?;
        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            let dir = entry.path();

            let mut links: Vec<PathBuf> = ["cwd", "root", "exe"]
                .iter()
                .map(|name| dir.join(name))
                .collect();
            if let Ok(fds) = fs::read_dir(dir.join("fd")) {
                links.extend(fds.flatten().map(|fd| fd.path()));
            }

            for link in links {
                let Ok(target) = fs::read_link(&link) else {
                    continue;
                };
                if let Some(entry) = mounts.iter().find(|m| target.starts_with(&m.target)) {
                    return Some((pid, entry.target.clone()));
                }
            }
        }
        None
    }

    fn rfkill_bluetooth(&self) -> PlatformResult<Vec<PathBuf>> {
        let class_dir = self.sys.join("class/rfkill");
        let entries = fs::read_dir(&class_dir)
            .map_err(|_| PlatformError::Unavailable("rfkill".into()))?;

        let radios: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|dir| read_attr(dir, "type").as_deref() == Some("bluetooth"))
            .collect();

        if radios.is_empty() {
            return Err(PlatformError::Unavailable("bluetooth adapter".into()));
        }
        Ok(radios)
    }
}

impl DeviceBackend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn enumerate(&self, class: DeviceClass) -> PlatformResult<Vec<Device>> {
        match class {
            DeviceClass::UsbHid => self.enumerate_hid(),
            DeviceClass::UsbStorage => self.enumerate_storage(),
            DeviceClass::Bluetooth => self.enumerate_bluetooth(),
            DeviceClass::Audio => self.enumerate_audio(),
            DeviceClass::Camera => self.enumerate_cameras(),
        }
    }

    fn set_enabled(&self, device: &Device, enabled: bool) -> PlatformResult<Transition> {
        let dir = self.usb_dir_of(device)?;
        let wanted = if enabled { "1" } else { "0" };

        if read_attr(&dir, "authorized").as_deref() == Some(wanted) {
            return Ok(Transition::Unchanged);
        }

        write_attr(&dir, "authorized", wanted)?;
        info!(
            "USB port {} authorized={}",
            dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            wanted
        );
        Ok(Transition::Changed)
    }

    fn eject(&self, device: &Device, mode: EjectMode) -> PlatformResult<()> {
        let name = block_name(device);
        let block_dir = self.sys.join("block").join(&name);
        if !block_dir.exists() {
            return Err(PlatformError::NotFound(device.key()));
        }

        let dev_path = self.dev.join(&name).to_string_lossy().into_owned();
        let mounts = mounts_of(&self.mounts(), &dev_path);

        match mode {
            EjectMode::Safe => {
                if let Some((pid, target)) = self.open_handle_under(&mounts) {
                    return Err(PlatformError::Busy(format!(
                        "{} has files open by pid {}",
                        target, pid
                    )));
                }
                nix::unistd::sync();
                unmount_all(&mounts)?;
            }
            EjectMode::Force => {
                for entry in &mounts {
                    umount2(
                        entry.target.as_str(),
                        MntFlags::MNT_FORCE | MntFlags::MNT_DETACH,
                    )
                    .map_err(|errno| {
                        PlatformError::Os(format!("forced umount {}: {}", entry.target, errno))
                    })?;
                    warn!("Force-unmounted {}", entry.target);
                }
            }
        }

        write_attr(&block_dir.join("device"), "delete", "1")?;
        info!("Detached block device {}", name);
        Ok(())
    }

    fn radio_powered(&self) -> PlatformResult<bool> {
        let radios = self.rfkill_bluetooth()?;
        Ok(radios
            .iter()
            .any(|dir| read_attr(dir, "soft").as_deref() == Some("0")))
    }

    fn set_radio_power(&self, on: bool) -> PlatformResult<Transition> {
        let radios = self.rfkill_bluetooth()?;
        let soft = if on { "0" } else { "1" };

        let mut transition = Transition::Unchanged;
        for dir in radios {
            if read_attr(&dir, "soft").as_deref() != Some(soft) {
                write_attr(&dir, "soft", soft)?;
                transition = Transition::Changed;
            }
        }
        Ok(transition)
    }

    fn open_camera(&self, index: u32) -> PlatformResult<CameraInfo> {
        let node = format!("video{}", index);
        if !self.dev.join(&node).exists() {
            return Err(PlatformError::NotFound(format!("camera {}", index)));
        }
        let name = read_attr(&self.sys.join("class/video4linux").join(&node), "name")
            .unwrap_or(node);

        // Mode is not queried; the caller fills in its configured defaults
        Ok(CameraInfo {
            index,
            width: 0,
            height: 0,
            fps: 0,
            name,
        })
    }

    fn close_camera(&self, index: u32) -> PlatformResult<()> {
        if self.recorders().contains_key(&index) {
            self.stop_recording(index)?;
        }
        Ok(())
    }

    fn start_recording(&self, spec: &RecordingSpec) -> PlatformResult<()> {
        let mut recorders = self.recorders();
        if recorders.contains_key(&spec.index) {
            return Err(PlatformError::Os(format!(
                "camera {} is already capturing",
                spec.index
            )));
        }

        if let Some(parent) = spec.output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let input = self.dev.join(format!("video{}", spec.index));
        let child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "v4l2"])
            .arg("-framerate")
            .arg(spec.fps.to_string())
            .arg("-video_size")
            .arg(format!("{}x{}", spec.width, spec.height))
            .arg("-i")
            .arg(&input)
            .args(["-c:v", "mjpeg"])
            .arg(&spec.output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => PlatformError::Unsupported("recording needs ffmpeg".into()),
                _ => PlatformError::Os(format!("ffmpeg: {}", e)),
            })?;

        debug!("ffmpeg pid {} recording {}", child.id(), input.display());
        recorders.insert(spec.index, child);
        Ok(())
    }

    fn stop_recording(&self, index: u32) -> PlatformResult<()> {
        let mut child = self
            .recorders()
            .remove(&index)
            .ok_or_else(|| PlatformError::NotFound(format!("recording on camera {}", index)))?;

        // `q` on stdin makes ffmpeg finish the container cleanly
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"q");
        }

        if !wait_for_ffmpeg(&mut child, index)? {
            return Err(PlatformError::Os(
                "recorder had to be killed; output may be truncated".into(),
            ));
        }
        Ok(())
    }

    fn capture_frame(&self, spec: &RecordingSpec) -> PlatformResult<()> {
        if self.recorders().contains_key(&spec.index) {
            return Err(PlatformError::Busy(format!(
                "camera {} is recording",
                spec.index
            )));
        }
        if let Some(parent) = spec.output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let input = self.dev.join(format!("video{}", spec.index));
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "v4l2"])
            .arg("-video_size")
            .arg(format!("{}x{}", spec.width, spec.height))
            .arg("-i")
            .arg(&input)
            .args(["-frames:v", "1"])
            .arg(&spec.output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    PlatformError::Unsupported("frame capture needs ffmpeg".into())
                }
                _ => PlatformError::Os(format!("ffmpeg: {}", e)),
            })?;

        if !wait_for_ffmpeg(&mut child, spec.index)? {
            return Err(PlatformError::Os(format!(
                "no frame from camera {}",
                spec.index
            )));
        }
        Ok(())
    }

    fn audio_info(&self) -> PlatformResult<AudioInfo> {
        let cards = self.enumerate_audio()?;
        let version = fs::read_to_string(self.proc.join("asound/version"))
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| "ALSA".to_string());

        Ok(AudioInfo {
            driver: version,
            total_devices: cards.len(),
            sample_rate: None,
            active_input: None,
            active_output: cards.first().map(|c| c.display_name.clone()),
        })
    }
}

fn is_hid(device: &rusb::Device<rusb::Context>, class_code: u8) -> bool {
    if class_code == USB_CLASS_HID {
        return true;
    }
    // Class 0 defers to the interfaces
    device.active_config_descriptor().is_ok_and(|config| {
        config.interfaces().any(|interface| {
            interface
                .descriptors()
                .any(|d| d.class_code() == USB_CLASS_HID)
        })
    })
}

/// sysfs name of a USB device: `<bus>-<port>[.<port>...]`
fn usb_port_name(bus: u8, ports: &[u8]) -> String {
    let path: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
    format!("{}-{}", bus, path.join("."))
}

/// Whether a sysfs path component names a USB device (not an interface)
fn is_usb_port_component(component: &str) -> bool {
    let Some((bus, ports)) = component.split_once('-') else {
        return false;
    };
    !bus.is_empty()
        && bus.chars().all(|c| c.is_ascii_digit())
        && !ports.is_empty()
        && ports.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Nearest USB device directory above `path` in the resolved sysfs tree
fn usb_ancestor(path: &Path) -> Option<PathBuf> {
    let resolved = fs::canonicalize(path).ok()?;
    resolved
        .ancestors()
        .find(|dir| {
            dir.file_name()
                .is_some_and(|name| is_usb_port_component(&name.to_string_lossy()))
        })
        .map(Path::to_path_buf)
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_hex_attr(dir: &Path, name: &str) -> Option<u16> {
    read_attr(dir, name).and_then(|s| u16::from_str_radix(&s, 16).ok())
}

fn write_attr(dir: &Path, name: &str, value: &str) -> PlatformResult<()> {
    fs::write(dir.join(name), value).map_err(|e| match e.kind() {
        ErrorKind::NotFound => PlatformError::NotFound(dir.display().to_string()),
        ErrorKind::PermissionDenied => {
            PlatformError::Os(format!("writing {}: permission denied", dir.join(name).display()))
        }
        _ => PlatformError::Os(format!("writing {}: {}", dir.join(name).display(), e)),
    })
}

fn authorized_state(dir: &Path) -> EnabledState {
    match read_attr(dir, "authorized").as_deref() {
        Some("1") => EnabledState::Enabled,
        Some("0") => EnabledState::Disabled,
        _ => EnabledState::Unknown,
    }
}

fn block_name(device: &Device) -> String {
    node_name(&device.path)
}

fn node_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Wait for an ffmpeg child to exit; `Ok(false)` if it had to be killed
fn wait_for_ffmpeg(child: &mut Child, index: u32) -> PlatformResult<bool> {
    let deadline = Instant::now() + RECORDER_EXIT_TIMEOUT;
    loop {
        match child.try_wait()? {
            Some(status) if status.success() => return Ok(true),
            Some(status) => {
                return Err(PlatformError::Os(format!("ffmpeg exited with {}", status)));
            }
            None if Instant::now() >= deadline => {
                warn!("ffmpeg for camera {} did not exit, killing it", index);
                child.kill()?;
                child.wait()?;
                return Ok(false);
            }
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    }
}

fn video_index(node: &str) -> Option<u32> {
    node.strip_prefix("video")?.parse().ok()
}

/// One line of `/proc/mounts`
#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    source: String,
    target: String,
    fstype: String,
}

fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next().unwrap_or("auto");
            Some(MountEntry {
                source: source.to_string(),
                target: unescape_mount(target),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Unmount every entry, or none of them
///
/// If one unmount fails the entries already unmounted are mounted again
/// before the error is returned.
fn unmount_all(mounts: &[MountEntry]) -> PlatformResult<()> {
    for (done, entry) in mounts.iter().enumerate() {
        if let Err(errno) = umount2(entry.target.as_str(), MntFlags::empty()) {
            for previous in mounts[..done].iter().rev() {
                match remount(previous) {
                    Ok(()) => info!("Remounted {} after failed eject", previous.target),
                    Err(e) => warn!("Could not remount {}: {}", previous.target, e),
                }
            }
            return Err(match errno {
                Errno::EBUSY => PlatformError::Busy(entry.target.clone()),
                other => PlatformError::Os(format!("umount {}: {}", entry.target, other)),
            });
        }
        debug!("Unmounted {}", entry.target);
    }
    Ok(())
}

fn remount(entry: &MountEntry) -> nix::Result<()> {
    mount(
        Some(entry.source.as_str()),
        entry.target.as_str(),
        Some(entry.fstype.as_str()),
        MsFlags::empty(),
        None::<&str>,
    )
}

/// `/proc/mounts` escapes whitespace as octal (`\040`)
fn unescape_mount(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Mounts of a disk and its partitions (`/dev/sdb`, `/dev/sdb1`, ...)
fn mounts_of(mounts: &[MountEntry], dev_path: &str) -> Vec<MountEntry> {
    mounts
        .iter()
        .filter(|entry| {
            entry
                .source
                .strip_prefix(dev_path)
                .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
        })
        .cloned()
        .collect()
}

/// Cards from `/proc/asound/cards`:
///
/// ```text
///  0 [PCH            ]: HDA-Intel - HDA Intel PCH
///                       HDA Intel PCH at 0xf7f10000 irq 32
/// ```
fn parse_asound_cards(text: &str) -> Vec<Device> {
    text.lines()
        .filter_map(|line| {
            let (number, rest) = line.trim_start().split_once(' ')?;
            let number: u32 = number.parse().ok()?;
            let (_, description) = rest.split_once("]:")?;
            let name = description
                .split_once(" - ")
                .map(|(_, name)| name)
                .unwrap_or(description)
                .trim();
            Some(Device::new(
                DeviceClass::Audio,
                format!("card{}", number),
                name,
            ))
        })
        .collect()
}

/// Peers from `bluetoothctl devices` (`Device AA:BB:CC:DD:EE:FF Name`)
fn parse_bluetoothctl_devices(text: &str) -> Vec<Device> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (address, name) = rest.split_once(' ').unwrap_or((rest, rest));
            if address.len() != 17 {
                return None;
            }
            Some(Device::new(DeviceClass::Bluetooth, address, name.trim()))
        })
        .collect()
}
