//! Device identity resolution
//!
//! How a device id is derived is platform- and class-dependent: a drive may
//! come back on another port, a mouse may be re-plugged with the same VID/PID.
//! Each class gets a configurable scheme; ids are always unique within a
//! class for a single enumeration.

use protocol::{Device, DeviceClass};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Identity scheme for one device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityScheme {
    /// Id as reported by the backend (port path, MAC, block name)
    #[default]
    Native,
    /// `vvvv:pppp`, duplicates suffixed `#2`, `#3`, ... in path order
    VidPid,
    /// Serial number when present, otherwise native
    Serial,
}

impl IdentityScheme {
    fn candidate(&self, device: &Device) -> String {
        match self {
            IdentityScheme::Native => device.id.clone(),
            IdentityScheme::VidPid => match (&device.vendor_id, &device.product_id) {
                (Some(vid), Some(pid)) => format!("{}:{}", vid, pid),
                _ => device.id.clone(),
            },
            IdentityScheme::Serial => device
                .serial_number
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| device.id.clone()),
        }
    }
}

/// Assigns ids to freshly enumerated devices
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    schemes: BTreeMap<DeviceClass, IdentityScheme>,
}

impl IdentityResolver {
    pub fn new(schemes: BTreeMap<DeviceClass, IdentityScheme>) -> Self {
        Self { schemes }
    }

    pub fn scheme(&self, class: DeviceClass) -> IdentityScheme {
        self.schemes.get(&class).copied().unwrap_or_default()
    }

    /// Rewrite `id` of every device of `class` according to its scheme
    pub fn resolve(&self, class: DeviceClass, mut devices: Vec<Device>) -> Vec<Device> {
        let scheme = self.scheme(class);

        // Stable order so duplicate suffixes do not move between enumerations
        devices.sort_by(|a, b| a.path.cmp(&b.path));

        let mut seen: HashMap<String, u32> = HashMap::new();
        for device in &mut devices {
            let base = scheme.candidate(device);
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            device.id = if *count == 1 {
                base
            } else {
                format!("{}#{}", base, count)
            };
        }

        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mouse(path: &str) -> Device {
        Device::new(DeviceClass::UsbHid, path, "Mouse").with_usb_ids(0x046d, 0xc52b)
    }

    #[test]
    fn test_native_ignores_platform_path() {
        let resolver = IdentityResolver::default();
        let drive = Device::new(DeviceClass::UsbStorage, "USB001", "Drive").with_path("/dev/sdb");
        let devices = resolver.resolve(DeviceClass::UsbStorage, vec![drive]);
        assert_eq!(devices[0].id, "USB001");
    }

    #[test]
    fn test_native_keeps_platform_id() {
        let resolver = IdentityResolver::default();
        let devices = resolver.resolve(DeviceClass::UsbHid, vec![mouse("1-4"), mouse("1-2")]);
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1-2", "1-4"]);
    }

    #[test]
    fn test_vid_pid_disambiguates_duplicates() {
        let resolver = IdentityResolver::new(BTreeMap::from([(
            DeviceClass::UsbHid,
            IdentityScheme::VidPid,
        )]));
        let devices = resolver.resolve(DeviceClass::UsbHid, vec![mouse("1-6"), mouse("1-4")]);

        assert_eq!(devices[0].id, "046d:c52b");
        assert_eq!(devices[0].path, "1-4");
        assert_eq!(devices[1].id, "046d:c52b#2");
    }

    #[test]
    fn test_serial_falls_back_to_native() {
        let resolver = IdentityResolver::new(BTreeMap::from([(
            DeviceClass::UsbStorage,
            IdentityScheme::Serial,
        )]));
        let with_serial = Device::new(DeviceClass::UsbStorage, "sdb", "Drive").with_serial("AA11");
        let without = Device::new(DeviceClass::UsbStorage, "sdc", "Drive");

        let devices = resolver.resolve(DeviceClass::UsbStorage, vec![with_serial, without]);
        assert_eq!(devices[0].id, "AA11");
        assert_eq!(devices[1].id, "sdc");
    }
}
