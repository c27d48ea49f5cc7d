//! Wi-Fi locator producer: dual-receiver direction finding.
//!
//! Every cycle it scans the calibrated left and right interfaces
//! concurrently and publishes both per-interface lists to the store. The
//! fusion pass then reads those per-interface views back out of the store
//! (the same channel the scan producer publishes on) and, for every SSID
//! heard on both sides, writes a bearing and a triangulated distance.
//! Needs a heading reference; cycles without one skip the fusion pass.

use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::calibration::Calibration;
use crate::error::ProducerError;
use crate::producers::wifi_scanner::{enrich, ScanError, ScanGate};
use crate::producers::{absorb, LoopControl, ShutdownSignal};
use crate::rf_model::{absolute_bearing, fuse_receivers, SignalHistory};
use crate::state::{RfDevice, RfDirection, SharedState};

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run(
    state: SharedState,
    shutdown: ShutdownSignal,
    gate: Arc<ScanGate>,
    calibration: Calibration,
) {
    info!(
        "[locator] producer started (left: {}, right: {}, separation: {}m)",
        calibration.left_interface, calibration.right_interface, calibration.separation_m
    );

    let mut left_history = SignalHistory::new();
    let mut right_history = SignalHistory::new();

    while !shutdown.is_set() {
        let result = locate_once(
            &state,
            &gate,
            &calibration,
            &mut left_history,
            &mut right_history,
        )
        .await;
        if absorb("locator", result) == LoopControl::Exit {
            break;
        }
        if shutdown.sleep_interruptible(UPDATE_INTERVAL).await {
            break;
        }
    }

    info!("[locator] producer stopped");
}

async fn locate_once(
    state: &SharedState,
    gate: &ScanGate,
    calibration: &Calibration,
    left_history: &mut SignalHistory,
    right_history: &mut SignalHistory,
) -> Result<(), ProducerError> {
    // Different interfaces, so the gate lets these run concurrently.
    let (left_scan, right_scan) = tokio::join!(
        gate.scan(&calibration.left_interface),
        gate.scan(&calibration.right_interface),
    );
    let left_cells = left_scan.map_err(receiver_error)?;
    let right_cells = right_scan.map_err(receiver_error)?;

    // Publish per-receiver views; single-sided SSIDs keep their per-receiver
    // path-loss distance and simply never get a bearing.
    state
        .set_networks_for_interface(&calibration.left_interface, enrich(left_cells, left_history))
        .map_err(|e| ProducerError::Transient(anyhow::anyhow!(e)))?;
    state
        .set_networks_for_interface(
            &calibration.right_interface,
            enrich(right_cells, right_history),
        )
        .map_err(|e| ProducerError::Transient(anyhow::anyhow!(e)))?;

    fuse_from_store(state, calibration)
}

/// The fusion pass: read both per-interface views back out of the store and
/// fold every SSID visible on both sides into a direction and a fused
/// distance.
fn fuse_from_store(state: &SharedState, calibration: &Calibration) -> Result<(), ProducerError> {
    let snapshot = state.snapshot();
    let Some(heading) = snapshot.heading() else {
        debug!("[locator] no heading available, skipping fusion pass");
        return Ok(());
    };

    let left_map = by_ssid(interface_devices(
        &snapshot.networks_by_interface,
        &calibration.left_interface,
    ));
    let right_map = by_ssid(interface_devices(
        &snapshot.networks_by_interface,
        &calibration.right_interface,
    ));

    for (ssid, left) in &left_map {
        let Some(right) = right_map.get(ssid) else { continue };
        let fusion = fuse_receivers(left.signal_dbm as f64, right.signal_dbm as f64, left.band);
        let bearing_deg = absolute_bearing(heading, fusion.offset_deg);

        state
            .set_direction(
                ssid,
                RfDirection {
                    bearing_deg,
                    confidence: fusion.confidence,
                },
            )
            .map_err(|e| ProducerError::Transient(anyhow::anyhow!(e)))?;
        state
            .set_triangulated_distance(ssid, fusion.distance_m)
            .map_err(|e| ProducerError::Transient(anyhow::anyhow!(e)))?;
        debug!(
            "[locator] {ssid}: bearing {bearing_deg:.1} deg, distance {:.0}m, confidence {:.2}",
            fusion.distance_m, fusion.confidence
        );
    }

    Ok(())
}

/// A receiver that cannot scan is a receiver we cannot locate with.
fn receiver_error(e: ScanError) -> ProducerError {
    match e {
        ScanError::InterfaceMissing(_) | ScanError::UtilityMissing => {
            ProducerError::Terminal(anyhow::anyhow!(e))
        }
        other => ProducerError::Transient(anyhow::anyhow!(other)),
    }
}

fn interface_devices<'a>(
    by_interface: &'a HashMap<String, Vec<RfDevice>>,
    interface: &str,
) -> &'a [RfDevice] {
    by_interface.get(interface).map(Vec::as_slice).unwrap_or(&[])
}

fn by_ssid(devices: &[RfDevice]) -> HashMap<String, &RfDevice> {
    devices
        .iter()
        .filter(|device| !device.ssid.is_empty())
        .map(|device| (device.ssid.clone(), device))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producers::wifi_scanner::ScannedCell;
    use crate::rf_model::{Band, Security};

    fn cell(ssid: &str, signal_dbm: i32) -> ScannedCell {
        ScannedCell {
            ssid: ssid.to_string(),
            signal_dbm,
            channel: 6,
            security: Security::Secured,
            band: Band::Ghz24,
        }
    }

    #[test]
    fn test_by_ssid_skips_hidden_networks() {
        let mut history = SignalHistory::new();
        let devices = enrich(vec![cell("A", -50), cell("", -60)], &mut history);
        let map = by_ssid(&devices);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("A"));
    }

    #[test]
    fn test_receiver_errors_classified() {
        assert!(matches!(
            receiver_error(ScanError::InterfaceMissing("wlan2".to_string())),
            ProducerError::Terminal(_)
        ));
        assert!(matches!(
            receiver_error(ScanError::UtilityMissing),
            ProducerError::Terminal(_)
        ));
        assert!(matches!(
            receiver_error(ScanError::Failed("busy".to_string())),
            ProducerError::Transient(_)
        ));
    }

    #[test]
    fn test_fusion_reads_per_interface_views_from_store() {
        // Everything downstream of the scans: per-interface lists published,
        // then the fusion pass reads them back out of the store.
        let state = SharedState::new();
        state
            .set_imu(crate::state::ImuSample { heading: 90.0, pitch: 0.0, roll: 0.0 })
            .unwrap();

        let mut left_history = SignalHistory::new();
        let mut right_history = SignalHistory::new();
        let left_devices = enrich(
            vec![cell("Shared", -50), cell("LeftOnly", -55)],
            &mut left_history,
        );
        let right_devices = enrich(vec![cell("Shared", -53)], &mut right_history);

        state.set_networks(left_devices.clone()).unwrap();
        state
            .set_networks_for_interface("wlan1", left_devices)
            .unwrap();
        state
            .set_networks_for_interface("wlan2", right_devices)
            .unwrap();

        let calibration = Calibration {
            left_interface: "wlan1".to_string(),
            right_interface: "wlan2".to_string(),
            scan_interface: "wlan1".to_string(),
            separation_m: 0.15,
        };
        fuse_from_store(&state, &calibration).unwrap();

        let snap = state.snapshot();
        // Only the SSID seen by both receivers has a direction.
        assert_eq!(snap.directions.len(), 1);
        let direction = snap.directions.get("Shared").unwrap();
        // Left stronger by 3 dB: bearing biased 9 degrees left of heading 90.
        assert!((direction.bearing_deg - 81.0).abs() < 1e-9);
        assert!((direction.confidence - 0.15).abs() < 1e-9);

        // The fused estimate replaced the single-receiver distance.
        let shared = snap.networks.iter().find(|d| d.ssid == "Shared").unwrap();
        assert!((9050.0..9056.0).contains(&shared.distance_m));

        // The single-sided SSID kept its per-receiver path-loss distance.
        let left_only = snap.networks.iter().find(|d| d.ssid == "LeftOnly").unwrap();
        assert!(!snap.directions.contains_key("LeftOnly"));
        assert!(left_only.distance_m > 0.0);
    }

    #[test]
    fn test_fusion_without_heading_is_a_no_op() {
        let state = SharedState::new();
        let mut history = SignalHistory::new();
        let devices = enrich(vec![cell("Shared", -50)], &mut history);
        state.set_networks_for_interface("wlan1", devices.clone()).unwrap();
        state.set_networks_for_interface("wlan2", devices).unwrap();

        let calibration = Calibration {
            left_interface: "wlan1".to_string(),
            right_interface: "wlan2".to_string(),
            scan_interface: "wlan1".to_string(),
            separation_m: 0.15,
        };
        fuse_from_store(&state, &calibration).unwrap();
        assert!(state.snapshot().directions.is_empty());
    }
}
