use serde::Serialize;
use tracing::{debug, info};

use crate::capture::{CaptureBackend, DeviceControl};

pub const DEFAULT_MAX_DEVICES: u32 = 10;

/// Control values read back from a device. `None` means the device does
/// not expose the control; zero is a real reading and is kept as `0.0`
/// (many cameras legitimately report 0 for brightness or exposure).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceControls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    pub index: u32,
    pub opened: bool,
    pub width: u32,
    pub height: u32,
    pub controls: DeviceControls,
}

/// Enumerate candidate camera devices.
///
/// Visible device nodes are tried first (up to `max_devices`). When none
/// are visible and `probe_when_empty` is set, indices `0..max_devices` are
/// probed directly; the bound prevents an open storm on systems without
/// device nodes. Probed indices that fail to open are not reported.
pub fn discover(
    backend: &dyn CaptureBackend,
    max_devices: u32,
    probe_when_empty: bool,
) -> Vec<DiscoveredDevice> {
    let mut visible = backend.visible_indices();
    visible.sort_unstable();
    visible.truncate(max_devices as usize);

    let (indices, probing): (Vec<u32>, bool) = if !visible.is_empty() {
        (visible, false)
    } else if probe_when_empty {
        debug!("No visible devices, probing indices 0..{}", max_devices);
        ((0..max_devices).collect(), true)
    } else {
        return Vec::new();
    };

    let mut devices = Vec::new();
    for index in indices {
        match backend.open(index, None) {
            Ok(device) => {
                let (width, height) = device.resolution();
                let controls = DeviceControls {
                    brightness: device.control(DeviceControl::Brightness),
                    exposure: device.control(DeviceControl::Exposure),
                    white_balance: device.control(DeviceControl::WhiteBalance),
                };
                info!("Discovered camera at index {} ({}x{})", index, width, height);
                devices.push(DiscoveredDevice {
                    index,
                    opened: true,
                    width,
                    height,
                    controls,
                });
            }
            Err(e) => {
                debug!("Device index {} did not open: {}", index, e);
                if !probing {
                    // Visible but unusable: still worth reporting.
                    devices.push(DiscoveredDevice {
                        index,
                        opened: false,
                        width: 0,
                        height: 0,
                        controls: DeviceControls::default(),
                    });
                }
            }
        }
    }
    devices
}

/// Device indices visible as `/dev/video*` nodes.
pub fn visible_video_indices() -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut indices: Vec<u32> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let name = name.to_str()?;
            name.strip_prefix("video")?.parse().ok()
        })
        .collect();
    indices.sort_unstable();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{FakeBackend, FakeDeviceSpec};
    use std::collections::HashMap;

    #[test]
    fn no_visible_devices_and_no_probing_yields_empty() {
        let backend = FakeBackend::default();
        assert!(discover(&backend, 2, false).is_empty());
    }

    #[test]
    fn probing_honors_the_limit() {
        let backend = FakeBackend::default();
        backend.insert(
            0,
            FakeDeviceSpec {
                frame_count: 1,
                ..Default::default()
            },
        );
        // Index 5 would open too, but the bound of 1 keeps it out of reach.
        backend.insert(5, FakeDeviceSpec::default());

        let devices = discover(&backend, 1, true);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, 0);
        assert!(devices[0].opened);
    }

    #[test]
    fn probed_indices_that_fail_to_open_are_omitted() {
        let backend = FakeBackend::default();
        backend.insert(
            1,
            FakeDeviceSpec {
                opens: true,
                ..Default::default()
            },
        );
        let devices = discover(&backend, 4, true);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, 1);
    }

    #[test]
    fn visible_device_that_fails_to_open_is_reported_closed() {
        let backend = FakeBackend::default();
        backend.insert(
            0,
            FakeDeviceSpec {
                opens: false,
                ..Default::default()
            },
        );
        *backend.visible.lock().unwrap() = vec![0];

        let devices = discover(&backend, 4, false);
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].opened);
    }

    #[test]
    fn zero_valued_controls_are_preserved() {
        let mut controls = HashMap::new();
        controls.insert("brightness", 0.0);
        controls.insert("exposure", 0.0);
        controls.insert("white_balance", 0.0);

        let backend = FakeBackend::default();
        backend.insert(
            0,
            FakeDeviceSpec {
                controls,
                ..Default::default()
            },
        );
        *backend.visible.lock().unwrap() = vec![0];

        let devices = discover(&backend, 4, false);
        assert_eq!(devices[0].controls.brightness, Some(0.0));
        assert_eq!(devices[0].controls.exposure, Some(0.0));
        assert_eq!(devices[0].controls.white_balance, Some(0.0));

        let json = serde_json::to_value(&devices[0]).unwrap();
        assert_eq!(json["controls"]["brightness"], 0.0);
    }

    #[test]
    fn unsupported_controls_are_omitted_from_json() {
        let backend = FakeBackend::default();
        backend.insert(0, FakeDeviceSpec::default());
        *backend.visible.lock().unwrap() = vec![0];

        let devices = discover(&backend, 4, false);
        let json = serde_json::to_value(&devices[0]).unwrap();
        assert!(json["controls"].get("brightness").is_none());
    }
}
