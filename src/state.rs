//! Thread-safe central store for every HUD data family.
//!
//! Producers write through typed setters; the render loop reads one
//! deep-copied snapshot per frame. Everything funnels through a single
//! exclusive lock whose critical sections are in-memory copies only, so no
//! producer ever stalls the renderer for longer than a memcpy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::HudError;
use crate::palette::Rgb;
use crate::rf_model::{Band, DeviceClass, Security};

/// Samples per audio frame handed to the visualizer.
pub const AUDIO_FRAME_SAMPLES: usize = 1024;
pub const AUDIO_SAMPLE_RATE_HZ: u32 = 48_000;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Metres per second.
    pub speed: Option<f64>,
    /// Degrees, [0, 360). A fix without a course reports no heading.
    pub heading: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Degrees, [0, 360).
    pub heading: f64,
    /// Degrees, [-90, 90].
    pub pitch: f64,
    /// Degrees, (-180, 180].
    pub roll: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Temperature {
    Celsius(f64),
    Unavailable,
}

impl Temperature {
    pub fn is_available(self) -> bool {
        matches!(self, Temperature::Celsius(_))
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temperature::Celsius(c) => write!(f, "{c:.1}"),
            Temperature::Unavailable => write!(f, "N/A"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub temperature: Temperature,
    /// Cumulative since boot; never decreases while the producer lives.
    pub net_tx_kib: f64,
    pub net_rx_kib: f64,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            ram_percent: 0.0,
            temperature: Temperature::Unavailable,
            net_tx_kib: 0.0,
            net_rx_kib: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RfDevice {
    pub ssid: String,
    pub signal_dbm: i32,
    pub channel: u32,
    pub security: Security,
    pub band: Band,
    pub class: DeviceClass,
    pub distance_m: f64,
    pub colour: Rgb,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RfDirection {
    /// Absolute bearing, [0, 360).
    pub bearing_deg: f64,
    /// [0, 1].
    pub confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

/// A self-consistent copy of every data family at one instant. Holding a
/// snapshot never blocks writers.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub gps: GpsFix,
    pub imu: Option<ImuSample>,
    pub metrics: SystemMetrics,
    pub networks: Vec<RfDevice>,
    pub networks_by_interface: HashMap<String, Vec<RfDevice>>,
    pub directions: HashMap<String, RfDirection>,
    pub audio: Option<AudioFrame>,
}

impl Snapshot {
    /// Best available heading: the IMU supersedes GPS whenever present.
    pub fn heading(&self) -> Option<f64> {
        self.imu.map(|s| s.heading).or(self.gps.heading)
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), HudError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(HudError::InvalidRange { field, value })
    }
}

fn check_heading(field: &'static str, value: f64) -> Result<(), HudError> {
    if value.is_finite() && (0.0..360.0).contains(&value) {
        Ok(())
    } else {
        Err(HudError::InvalidRange { field, value })
    }
}

fn check_device(device: &RfDevice) -> Result<(), HudError> {
    if !device.distance_m.is_finite() || device.distance_m < 0.0 {
        return Err(HudError::InvalidRange {
            field: "distance_m",
            value: device.distance_m,
        });
    }
    Ok(())
}

#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<Snapshot>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    // Writers never panic while holding the lock, but if one somehow did the
    // data inside is still a complete record; recover it instead of wedging
    // every producer.
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whole-fix replacement; per-field nulls are preserved as written.
    pub fn set_gps(&self, fix: GpsFix) -> Result<(), HudError> {
        if let Some(lat) = fix.latitude {
            check_range("latitude", lat, -90.0, 90.0)?;
        }
        if let Some(lon) = fix.longitude {
            check_range("longitude", lon, -180.0, 180.0)?;
        }
        if let Some(speed) = fix.speed {
            check_range("speed", speed, 0.0, f64::MAX)?;
        }
        if let Some(heading) = fix.heading {
            check_heading("gps_heading", heading)?;
        }
        self.lock().gps = fix;
        Ok(())
    }

    pub fn set_imu(&self, sample: ImuSample) -> Result<(), HudError> {
        check_heading("imu_heading", sample.heading)?;
        check_range("pitch", sample.pitch, -90.0, 90.0)?;
        if !sample.roll.is_finite() || sample.roll <= -180.0 || sample.roll > 180.0 {
            return Err(HudError::InvalidRange {
                field: "roll",
                value: sample.roll,
            });
        }
        self.lock().imu = Some(sample);
        Ok(())
    }

    pub fn set_system_metrics(&self, metrics: SystemMetrics) -> Result<(), HudError> {
        check_range("cpu_percent", metrics.cpu_percent, 0.0, 100.0)?;
        check_range("ram_percent", metrics.ram_percent, 0.0, 100.0)?;
        check_range("net_tx_kib", metrics.net_tx_kib, 0.0, f64::MAX)?;
        check_range("net_rx_kib", metrics.net_rx_kib, 0.0, f64::MAX)?;
        self.lock().metrics = metrics;
        Ok(())
    }

    /// Replace the primary device list wholesale. Direction entries for
    /// SSIDs that vanished from the scan are dropped with them.
    pub fn set_networks(&self, devices: Vec<RfDevice>) -> Result<(), HudError> {
        for device in &devices {
            check_device(device)?;
        }
        let mut state = self.lock();
        state
            .directions
            .retain(|ssid, _| devices.iter().any(|d| &d.ssid == ssid));
        state.networks = devices;
        Ok(())
    }

    pub fn set_networks_for_interface(
        &self,
        interface: &str,
        devices: Vec<RfDevice>,
    ) -> Result<(), HudError> {
        for device in &devices {
            check_device(device)?;
        }
        self.lock()
            .networks_by_interface
            .insert(interface.to_string(), devices);
        Ok(())
    }

    pub fn set_direction(&self, ssid: &str, direction: RfDirection) -> Result<(), HudError> {
        check_heading("bearing_deg", direction.bearing_deg)?;
        check_range("confidence", direction.confidence, 0.0, 1.0)?;
        self.lock().directions.insert(ssid.to_string(), direction);
        Ok(())
    }

    /// Fold a fused dual-receiver distance back into the primary list so the
    /// visible entry carries the best available estimate.
    pub fn set_triangulated_distance(&self, ssid: &str, distance_m: f64) -> Result<(), HudError> {
        if !distance_m.is_finite() || distance_m < 0.0 {
            return Err(HudError::InvalidRange {
                field: "distance_m",
                value: distance_m,
            });
        }
        let mut state = self.lock();
        for device in state.networks.iter_mut().filter(|d| d.ssid == ssid) {
            device.distance_m = distance_m;
        }
        Ok(())
    }

    pub fn set_audio_frame(&self, frame: AudioFrame) -> Result<(), HudError> {
        if frame.samples.len() != AUDIO_FRAME_SAMPLES {
            return Err(HudError::InvalidRange {
                field: "audio_frame_len",
                value: frame.samples.len() as f64,
            });
        }
        self.lock().audio = Some(frame);
        Ok(())
    }

    /// Whether an IMU sample has been written; the GPS producer consults
    /// this before publishing a course so it never shadows the IMU heading.
    pub fn imu_present(&self) -> bool {
        self.lock().imu.is_some()
    }

    /// Point-in-time consistent copy of everything, taken under one lock
    /// acquisition.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }
}
