//! Service configuration record consumed by the service manager.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::calibration::is_onboard_interface;
use crate::error::HudError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HudConfig {
    pub enable_system_metrics: bool,
    pub enable_gps: bool,
    pub enable_imu: bool,
    pub enable_wifi_scanner: bool,
    pub enable_wifi_locator: bool,
    pub enable_audio: bool,

    /// Primary interface for the scan producer. Use a USB adapter; onboard
    /// wireless stays reserved for system connectivity.
    pub wifi_scan_interface: String,
    pub wifi_left_interface: String,
    pub wifi_right_interface: String,

    /// Physical separation between the two receivers, in metres.
    pub adapter_separation_m: f64,

    /// gpsd daemon address.
    pub gpsd_address: String,
}

impl Default for HudConfig {
    fn default() -> Self {
        Self {
            enable_system_metrics: true,
            enable_gps: false,
            enable_imu: false,
            enable_wifi_scanner: true,
            enable_wifi_locator: false,
            enable_audio: true,
            wifi_scan_interface: "wlan1".to_string(),
            wifi_left_interface: "wlan1".to_string(),
            wifi_right_interface: "wlan2".to_string(),
            adapter_separation_m: 0.15,
            gpsd_address: "127.0.0.1:2947".to_string(),
        }
    }
}

impl HudConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Validate the record. Misconfigurations that make a producer
    /// unrunnable are fatal; everything else comes back as warnings for the
    /// log.
    pub fn validate(&self) -> Result<Vec<String>, HudError> {
        let mut warnings = Vec::new();

        if self.enable_wifi_scanner && self.wifi_scan_interface.is_empty() {
            return Err(HudError::Fatal(
                "wifi scanner enabled but wifi_scan_interface is empty".to_string(),
            ));
        }

        if self.enable_wifi_locator {
            if self.wifi_left_interface.is_empty() || self.wifi_right_interface.is_empty() {
                return Err(HudError::Fatal(
                    "wifi locator enabled but left/right interfaces are not configured".to_string(),
                ));
            }
            if self.wifi_left_interface == self.wifi_right_interface {
                return Err(HudError::Fatal(format!(
                    "wifi locator needs two different interfaces, both are '{}'",
                    self.wifi_left_interface
                )));
            }
            if !self.enable_gps && !self.enable_imu {
                warnings.push(
                    "wifi locator needs a heading source; enable GPS or the IMU".to_string(),
                );
            }
            if !(0.05..=0.5).contains(&self.adapter_separation_m) {
                warnings.push(format!(
                    "adapter separation {}m is outside the typical 0.05-0.5m range",
                    self.adapter_separation_m
                ));
            }
            for (side, interface) in [
                ("left", &self.wifi_left_interface),
                ("right", &self.wifi_right_interface),
            ] {
                if is_onboard_interface(interface) {
                    warnings.push(format!(
                        "{side} receiver '{interface}' looks like onboard wireless; use a USB adapter"
                    ));
                }
            }
        }

        if self.enable_wifi_scanner && is_onboard_interface(&self.wifi_scan_interface) {
            warnings.push(format!(
                "scan interface '{}' looks like onboard wireless; use a USB adapter",
                self.wifi_scan_interface
            ));
        }

        Ok(warnings)
    }
}
