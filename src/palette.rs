//! Device colour and icon policy.
//!
//! Every RF device gets a colour derived from its SSID alone, so the same
//! network keeps the same colour across scans, reboots and reinstalls. The
//! hash is FNV-1a; anything seeded per-process would break that guarantee.

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

use crate::rf_model::DeviceClass;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Twelve visually distinct neon colours, in palette order.
pub const DEVICE_PALETTE: [Rgb; 12] = [
    Rgb(0, 255, 255),   // cyan
    Rgb(255, 0, 255),   // magenta
    Rgb(0, 255, 0),     // green
    Rgb(255, 255, 0),   // yellow
    Rgb(255, 165, 0),   // orange
    Rgb(128, 0, 128),   // purple
    Rgb(191, 255, 0),   // lime
    Rgb(255, 191, 0),   // amber
    Rgb(0, 191, 255),   // sky blue
    Rgb(255, 20, 147),  // pink
    Rgb(62, 180, 137),  // mint
    Rgb(154, 205, 50),  // yellow-green
];

fn stable_hash(ssid: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(ssid.as_bytes());
    hasher.finish()
}

/// Deterministic SSID -> colour mapping.
pub fn colour_for(ssid: &str) -> Rgb {
    DEVICE_PALETTE[(stable_hash(ssid) % DEVICE_PALETTE.len() as u64) as usize]
}

/// Icon atoms referenced by the drawing layer; rasterisation lives there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Icon {
    Router,
    Drone,
    Unknown,
}

pub fn icon_for(class: DeviceClass) -> Icon {
    match class {
        DeviceClass::Router => Icon::Router,
        DeviceClass::Drone => Icon::Drone,
        DeviceClass::Unknown => Icon::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colour_is_deterministic() {
        let ssids = ["HomeNet", "DJI-Mavic-Air", "", "café-wifi", "wlx00c0ca123456"];
        for ssid in ssids {
            let first = colour_for(ssid);
            for _ in 0..10 {
                assert_eq!(colour_for(ssid), first, "colour drifted for {ssid:?}");
            }
        }
    }

    #[test]
    fn test_colour_comes_from_palette() {
        for i in 0..200 {
            let colour = colour_for(&format!("Device{i}"));
            assert!(DEVICE_PALETTE.contains(&colour));
        }
    }

    #[test]
    fn test_palette_colours_are_distinct() {
        for (i, a) in DEVICE_PALETTE.iter().enumerate() {
            for b in &DEVICE_PALETTE[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_icon_per_class() {
        assert_eq!(icon_for(DeviceClass::Router), Icon::Router);
        assert_eq!(icon_for(DeviceClass::Drone), Icon::Drone);
        assert_eq!(icon_for(DeviceClass::Unknown), Icon::Unknown);
    }
}
