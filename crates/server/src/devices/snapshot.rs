//! Device snapshots and deltas

use protocol::{Device, DeviceClass};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic source of snapshot sequence numbers
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Immutable set of devices captured at one enumeration instant
///
/// Devices are ordered by `(class, id)` so that deltas are deterministic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub sequence: u64,
    /// Wall-clock capture time, milliseconds since the Unix epoch
    pub captured_at_ms: u64,
    #[serde(skip)]
    taken: Instant,
    devices: Vec<Device>,
    /// Classes whose enumeration failed for this snapshot
    degraded: BTreeSet<DeviceClass>,
}

impl Snapshot {
    pub fn new(sequence: u64, mut devices: Vec<Device>, degraded: BTreeSet<DeviceClass>) -> Self {
        devices.sort_by(|a, b| (a.class, &a.id).cmp(&(b.class, &b.id)));
        let captured_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            sequence,
            captured_at_ms,
            taken: Instant::now(),
            devices,
            degraded,
        }
    }

    /// Derive a superseding snapshot with a new device list, keeping the
    /// capture time of this one
    pub fn supersede(&self, sequence: u64, devices: Vec<Device>) -> Self {
        let mut next = Self::new(sequence, devices, self.degraded.clone());
        next.captured_at_ms = self.captured_at_ms;
        next.taken = self.taken;
        next
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn devices_of(&self, class: DeviceClass) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(move |d| d.class == class)
    }

    pub fn find(&self, class: DeviceClass, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.class == class && d.id == id)
    }

    /// Find a device by id in any of the given classes
    pub fn find_in(&self, classes: &[DeviceClass], id: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.id == id && classes.contains(&d.class))
    }

    /// Find a storage device by drive letter, mount point or id
    pub fn find_drive(&self, drive: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.matches_drive(drive))
    }

    pub fn degraded(&self) -> &BTreeSet<DeviceClass> {
        &self.degraded
    }

    pub fn is_degraded(&self, class: DeviceClass) -> bool {
        self.degraded.contains(&class)
    }

    pub fn age(&self) -> Duration {
        self.taken.elapsed()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Difference between two consecutive snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDelta {
    /// Sequence of the snapshot the delta starts from (none on first reconcile)
    pub from_sequence: Option<u64>,
    pub to_sequence: u64,
    pub arrived: Vec<Device>,
    pub departed: Vec<Device>,
    /// Same id, different attributes (e.g. remounted under a new letter)
    pub changed: Vec<Device>,
}

impl DeviceDelta {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.departed.is_empty() && self.changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        create_mock_audio_device, create_mock_bluetooth_device, create_mock_camera,
        create_mock_device_list, create_mock_hid_device, create_mock_storage_device,
    };

    #[test]
    fn test_devices_are_sorted_by_class_then_id() {
        let snapshot = Snapshot::new(
            1,
            vec![
                create_mock_storage_device("USB002", "F"),
                create_mock_hid_device("HID9"),
                create_mock_hid_device("HID1"),
            ],
            BTreeSet::new(),
        );

        let ids: Vec<_> = snapshot.devices().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["HID1", "HID9", "USB002"]);
    }

    #[test]
    fn test_find_drive() {
        let snapshot = Snapshot::new(
            1,
            vec![create_mock_storage_device("USB001", "E")],
            BTreeSet::new(),
        );
        assert_eq!(snapshot.find_drive("E").unwrap().id, "USB001");
        assert!(snapshot.find_drive("Z").is_none());
    }

    #[test]
    fn test_lookup_is_scoped_to_class() {
        let mut devices = create_mock_device_list(3);
        devices.push(create_mock_bluetooth_device("AC:80:0A:12:34:56", "Headphones"));
        devices.push(create_mock_audio_device("card0", "HDA Intel PCH"));
        devices.push(create_mock_camera(0));
        let snapshot = Snapshot::new(4, devices, BTreeSet::new());

        assert_eq!(snapshot.len(), 6);
        assert_eq!(snapshot.devices_of(DeviceClass::UsbHid).count(), 3);
        assert!(snapshot.find(DeviceClass::Camera, "video0").is_some());
        assert!(snapshot.find(DeviceClass::UsbHid, "video0").is_none());
        assert_eq!(
            snapshot
                .find_in(&[DeviceClass::Audio, DeviceClass::Bluetooth], "card0")
                .unwrap()
                .display_name,
            "HDA Intel PCH"
        );
        assert!(snapshot.find_drive("card0").is_none());
    }

    #[test]
    fn test_sequence_counter_is_monotonic() {
        let counter = SequenceCounter::default();
        let a = counter.next();
        let b = counter.clone().next();
        assert!(b > a);
    }
}
