//! Overlay layout primitives consumed by the external drawing layer.
//!
//! Everything here is pure geometry over a snapshot: which devices land on
//! the heading bar, how near-coincident bearings stack, what the compass
//! ring shows, and which slice of the device list is visible this frame.

use std::time::{Duration, Instant};

use crate::palette::Rgb;
use crate::rf_model::DeviceClass;
use crate::state::{RfDevice, Snapshot};

/// Placeholder strings the drawing layer emits for absent data families.
pub const GPS_PLACEHOLDER: &str = "GPS: N/A";
pub const WIFI_PLACEHOLDER: &str = "Wi-Fi: N/A";
pub const TEMPERATURE_PLACEHOLDER: &str = "N/A";

/// Half-width of the heading bar's visible arc.
pub const BAR_VISIBLE_HALF_DEG: f64 = 60.0;
/// Bearings closer than this stack on the heading bar.
pub const BAR_GROUP_DEG: f64 = 5.0;
/// Bearings closer than this stack on the compass ring.
pub const COMPASS_GROUP_DEG: f64 = 15.0;
/// Direction estimates below this confidence are not drawn.
pub const MIN_DIRECTION_CONFIDENCE: f64 = 0.3;

pub const MAX_VISIBLE_DEVICES: usize = 8;
pub const ROTATE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadingSource {
    Imu,
    Gps,
    /// No heading available anywhere; the drawing layer marks this visually.
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadingResolution {
    pub heading_deg: f64,
    pub source: HeadingSource,
}

/// IMU heading first, GPS course second, 0 degrees with an indicator last.
pub fn resolve_heading(snapshot: &Snapshot) -> HeadingResolution {
    if let Some(sample) = snapshot.imu {
        return HeadingResolution {
            heading_deg: sample.heading,
            source: HeadingSource::Imu,
        };
    }
    if let Some(heading) = snapshot.gps.heading {
        return HeadingResolution {
            heading_deg: heading,
            source: HeadingSource::Gps,
        };
    }
    HeadingResolution {
        heading_deg: 0.0,
        source: HeadingSource::Fallback,
    }
}

/// An RF device joined with its direction estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectedDevice {
    pub ssid: String,
    pub class: DeviceClass,
    pub colour: Rgb,
    pub distance_m: f64,
    pub signal_dbm: i32,
    pub bearing_deg: f64,
    pub confidence: f64,
}

/// Join the device list with the direction map, keeping estimates above the
/// draw threshold.
pub fn directed_devices(snapshot: &Snapshot) -> Vec<DirectedDevice> {
    snapshot
        .networks
        .iter()
        .filter_map(|device| {
            let direction = snapshot.directions.get(&device.ssid)?;
            if direction.confidence <= MIN_DIRECTION_CONFIDENCE {
                return None;
            }
            Some(DirectedDevice {
                ssid: device.ssid.clone(),
                class: device.class,
                colour: device.colour,
                distance_m: device.distance_m,
                signal_dbm: device.signal_dbm,
                bearing_deg: direction.bearing_deg,
                confidence: direction.confidence,
            })
        })
        .collect()
}

/// Signed offset of a bearing relative to the current heading, in
/// [-180, 180).
pub fn relative_offset_deg(bearing_deg: f64, heading_deg: f64) -> f64 {
    (bearing_deg - heading_deg + 540.0).rem_euclid(360.0) - 180.0
}

/// One icon slot inside a stack. `lane` counts outward from the track:
/// lane 0 sits on the bar or ring, higher lanes offset perpendicular.
#[derive(Clone, Debug, PartialEq)]
pub struct Slot {
    pub ssid: String,
    pub class: DeviceClass,
    pub colour: Rgb,
    pub distance_m: f64,
    pub signal_dbm: i32,
    /// The device's true offset; the leader line runs from the slot back to
    /// this position on the track.
    pub offset_deg: f64,
    pub lane: usize,
}

/// A group of devices too close in bearing to draw on top of each other.
/// The stack is anchored at the group's mean offset, strongest signal first.
#[derive(Clone, Debug, PartialEq)]
pub struct Stack {
    pub anchor_deg: f64,
    pub slots: Vec<Slot>,
}

fn group_stacks(devices: &[DirectedDevice], heading_deg: f64, threshold_deg: f64) -> Vec<Stack> {
    let mut items: Vec<(f64, &DirectedDevice)> = devices
        .iter()
        .map(|d| (relative_offset_deg(d.bearing_deg, heading_deg), d))
        .collect();
    items.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut groups: Vec<Vec<(f64, &DirectedDevice)>> = Vec::new();
    for item in items {
        match groups.last_mut() {
            Some(group) if (item.0 - group.last().unwrap().0).abs() <= threshold_deg => {
                group.push(item);
            }
            _ => groups.push(vec![item]),
        }
    }

    groups
        .into_iter()
        .map(|mut group| {
            let anchor_deg = group.iter().map(|(offset, _)| offset).sum::<f64>() / group.len() as f64;
            group.sort_by(|a, b| b.1.signal_dbm.cmp(&a.1.signal_dbm));
            let slots = group
                .into_iter()
                .enumerate()
                .map(|(lane, (offset_deg, device))| Slot {
                    ssid: device.ssid.clone(),
                    class: device.class,
                    colour: device.colour,
                    distance_m: device.distance_m,
                    signal_dbm: device.signal_dbm,
                    offset_deg,
                    lane,
                })
                .collect();
            Stack { anchor_deg, slots }
        })
        .collect()
}

/// Heading-bar layout: devices within the visible arc, stacked at the 5
/// degree threshold.
pub fn heading_bar_layout(heading_deg: f64, devices: &[DirectedDevice]) -> Vec<Stack> {
    let visible: Vec<DirectedDevice> = devices
        .iter()
        .filter(|d| relative_offset_deg(d.bearing_deg, heading_deg).abs() <= BAR_VISIBLE_HALF_DEG)
        .cloned()
        .collect();
    group_stacks(&visible, heading_deg, BAR_GROUP_DEG)
}

/// Compass-ring layout: the same stacking at the 15 degree threshold with no
/// visibility cut. Offsets are still heading-relative; the drawing layer
/// projects them onto the ring.
pub fn compass_layout(heading_deg: f64, devices: &[DirectedDevice]) -> Vec<Stack> {
    group_stacks(devices, heading_deg, COMPASS_GROUP_DEG)
}

/// Human distance readout: metres below 1 km, tenths of a kilometre above.
pub fn format_distance(distance_m: f64) -> String {
    if distance_m < 1000.0 {
        format!("~{}m", distance_m as i64)
    } else {
        format!("~{:.1}km", distance_m / 1000.0)
    }
}

/// Map dBm onto a 0-100 bar width over the usual receive range.
pub fn signal_percent(signal_dbm: i32) -> f64 {
    ((signal_dbm as f64 + 100.0) / 70.0 * 100.0).clamp(0.0, 100.0)
}

/// Rotating window over the device list when it outgrows the panel. Owned
/// by the render thread; the store knows nothing about it.
#[derive(Debug)]
pub struct RotationState {
    index: usize,
    last_advance: Option<Instant>,
}

impl RotationState {
    pub fn new() -> Self {
        Self {
            index: 0,
            last_advance: None,
        }
    }

    /// The slice of `devices` visible right now, advancing one entry every
    /// rotation interval once the list exceeds the panel size.
    pub fn visible<'a>(&mut self, devices: &'a [RfDevice], now: Instant) -> Vec<&'a RfDevice> {
        if devices.len() <= MAX_VISIBLE_DEVICES {
            self.index = 0;
            self.last_advance = None;
            return devices.iter().collect();
        }

        match self.last_advance {
            None => self.last_advance = Some(now),
            Some(last) if now.duration_since(last) >= ROTATE_INTERVAL => {
                self.index = (self.index + 1) % devices.len();
                self.last_advance = Some(now);
            }
            Some(_) => {}
        }

        (0..MAX_VISIBLE_DEVICES)
            .map(|i| &devices[(self.index + i) % devices.len()])
            .collect()
    }
}

impl Default for RotationState {
    fn default() -> Self {
        Self::new()
    }
}
