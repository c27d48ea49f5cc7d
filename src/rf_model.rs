//! RF environment model: device classification, path-loss ranging and
//! dual-receiver fusion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Router,
    Drone,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "2.4GHz")]
    Ghz24,
    #[serde(rename = "5.8GHz")]
    Ghz58,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Band::Ghz24 => "2.4GHz",
            Band::Ghz58 => "5.8GHz",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    Open,
    Secured,
}

/// Assumed transmit power behind the free-space path-loss inversion. The
/// value is calibrated for consumer access points; change it and every
/// distance readout shifts together.
pub const TX_REFERENCE_DBM: f64 = 27.55;

/// Extra attenuation applied to 5.8 GHz signals.
pub const BAND_OFFSET_58_DB: f64 = 7.6;

/// Bearing bias slope. Reaches the clamp at a 20 dB differential, the same
/// differential that saturates confidence.
pub const DEG_PER_DB: f64 = 3.0;

pub const MAX_BEARING_OFFSET_DEG: f64 = 60.0;

const CONFIDENCE_FULL_SCALE_DB: f64 = 20.0;
const EQUAL_SIGNAL_DB: f64 = 1.0;
const STABLE_DRIFT_DB: i32 = 5;

const DRONE_TOKENS: [&str; 5] = ["dji", "mavic", "phantom", "parrot", "autel"];

const RESIDENTIAL_TOKENS: [&str; 16] = [
    "netgear", "linksys", "tp-link", "tplink", "asus", "dlink", "d-link", "xfinity", "spectrum",
    "fios", "orbi", "eero", "home", "house", "family", "guest",
];

const ROUTER_CHANNELS_24: [u32; 3] = [1, 6, 11];

pub fn band_for_channel(channel: u32) -> Band {
    if channel <= 14 {
        Band::Ghz24
    } else {
        Band::Ghz58
    }
}

/// Free-space path-loss inversion: RSSI in dBm to estimated metres.
pub fn path_loss_distance(rssi_dbm: f64, band: Band) -> f64 {
    let offset = match band {
        Band::Ghz24 => 0.0,
        Band::Ghz58 => BAND_OFFSET_58_DB,
    };
    10f64.powf((TX_REFERENCE_DBM - rssi_dbm - offset) / 20.0)
}

/// Inverse of [`path_loss_distance`]: recovers the RSSI that produced a
/// given distance estimate.
pub fn rssi_for_distance(distance_m: f64, band: Band) -> f64 {
    let offset = match band {
        Band::Ghz24 => 0.0,
        Band::Ghz58 => BAND_OFFSET_58_DB,
    };
    TX_REFERENCE_DBM - offset - 20.0 * distance_m.log10()
}

/// Hidden networks and scanner placeholders carry no naming evidence, so
/// rule 2 below never fires for them.
fn is_placeholder_ssid(ssid: &str) -> bool {
    ssid.is_empty()
        || ssid.eq_ignore_ascii_case("unknown")
        || ssid.eq_ignore_ascii_case("unnamed")
        || ssid.eq_ignore_ascii_case("hidden")
}

fn looks_residential(ssid_lower: &str) -> bool {
    RESIDENTIAL_TOKENS.iter().any(|t| ssid_lower.contains(t))
}

/// Classify a scanned access point. Rules are evaluated in order; first
/// match wins:
///
/// 1. drone manufacturer token in the SSID
/// 2. 5.8 GHz with a named, non-residential SSID
/// 3. standard 2.4 GHz channel (1/6/11) with a stable signal
/// 4. unknown
pub fn classify(ssid: &str, band: Band, channel: u32, signal_stable: bool) -> DeviceClass {
    let lower = ssid.to_lowercase();
    if DRONE_TOKENS.iter().any(|t| lower.contains(t)) {
        return DeviceClass::Drone;
    }
    if band == Band::Ghz58 && !is_placeholder_ssid(ssid) && !looks_residential(&lower) {
        return DeviceClass::Drone;
    }
    if band == Band::Ghz24 && ROUTER_CHANNELS_24.contains(&channel) && signal_stable {
        return DeviceClass::Router;
    }
    DeviceClass::Unknown
}

/// Per-SSID signal drift tracker feeding the router-stability rule. A
/// reading within 5 dB of the previous scan counts as stable; the first
/// sighting of an SSID has nothing to drift from and also counts as stable.
#[derive(Debug, Default)]
pub struct SignalHistory {
    last_seen: HashMap<String, i32>,
}

impl SignalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading and report whether it is stable relative to the
    /// previous scan.
    pub fn observe(&mut self, ssid: &str, signal_dbm: i32) -> bool {
        let stable = match self.last_seen.get(ssid) {
            Some(prev) => (prev - signal_dbm).abs() <= STABLE_DRIFT_DB,
            None => true,
        };
        self.last_seen.insert(ssid.to_string(), signal_dbm);
        stable
    }

    /// Drop history for SSIDs that vanished from the latest scan.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.last_seen.retain(|ssid, _| keep(ssid));
    }
}

/// Result of fusing one SSID's readings from both receivers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fusion {
    pub distance_m: f64,
    /// Relative to the current heading; negative bears left, positive right.
    pub offset_deg: f64,
    pub confidence: f64,
}

/// Fuse left/right receiver readings of the same SSID into one
/// distance-and-bearing estimate.
///
/// Distance is the signal-weighted mean of the per-receiver path-loss
/// distances. Bearing is biased toward the stronger side, proportional to
/// the differential and clamped; differentials under 1 dB read as straight
/// ahead.
pub fn fuse_receivers(left_dbm: f64, right_dbm: f64, band: Band) -> Fusion {
    let d_left = path_loss_distance(left_dbm, band);
    let d_right = path_loss_distance(right_dbm, band);

    let w_left = left_dbm.abs();
    let w_right = right_dbm.abs();
    let distance_m = if w_left + w_right > 0.0 {
        (d_left * w_right + d_right * w_left) / (w_left + w_right)
    } else {
        (d_left + d_right) / 2.0
    };

    // Positive differential means the left receiver hears it louder.
    let diff_db = left_dbm - right_dbm;
    let offset_deg = if diff_db.abs() < EQUAL_SIGNAL_DB {
        0.0
    } else {
        (-diff_db * DEG_PER_DB).clamp(-MAX_BEARING_OFFSET_DEG, MAX_BEARING_OFFSET_DEG)
    };
    let confidence = (diff_db.abs() / CONFIDENCE_FULL_SCALE_DB).min(1.0);

    Fusion {
        distance_m,
        offset_deg,
        confidence,
    }
}

/// Convert a heading-relative offset into an absolute bearing.
pub fn absolute_bearing(heading_deg: f64, offset_deg: f64) -> f64 {
    (heading_deg + offset_deg).rem_euclid(360.0)
}
