//! Wi-Fi scan producer: runs the system scan utility every 15 seconds,
//! parses its cell list and publishes enriched RF devices (band, class,
//! path-loss distance, colour) to the store.

use log::info;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ProducerError;
use crate::palette::colour_for;
use crate::producers::{absorb, LoopControl, ShutdownSignal};
use crate::rf_model::{band_for_channel, classify, path_loss_distance, Band, Security, SignalHistory};
use crate::state::{RfDevice, SharedState};

pub const SCAN_INTERVAL: Duration = Duration::from_secs(15);
const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan utility not installed")]
    UtilityMissing,
    #[error("interface '{0}' is absent")]
    InterfaceMissing(String),
    #[error("scan failed: {0}")]
    Failed(String),
}

/// Serialises scan-utility invocations per interface. The utility tolerates
/// concurrent scans on different interfaces but not on the same one.
#[derive(Default)]
pub struct ScanGate {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ScanGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_for(&self, interface: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(interface.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run one scan on `interface` and parse the result.
    pub async fn scan(&self, interface: &str) -> Result<Vec<ScannedCell>, ScanError> {
        let gate = self.lock_for(interface);
        let _guard = gate.lock().await;

        let mut command = Command::new("iwlist");
        command.arg(interface).arg("scan").kill_on_drop(true);
        let output = match timeout(SCAN_TIMEOUT, command.output()).await {
            Err(_) => return Err(ScanError::Failed("scan timed out".to_string())),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ScanError::UtilityMissing)
            }
            Ok(Err(e)) => return Err(ScanError::Failed(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such device") || stderr.contains("Device not found") {
                return Err(ScanError::InterfaceMissing(interface.to_string()));
            }
            return Err(ScanError::Failed(stderr.trim().to_string()));
        }

        Ok(parse_iwlist(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// One access point as reported by the scan utility.
#[derive(Clone, Debug, PartialEq)]
pub struct ScannedCell {
    pub ssid: String,
    pub signal_dbm: i32,
    pub channel: u32,
    pub security: Security,
    pub band: Band,
}

/// Parse the scan utility's text output. Cells without a signal reading are
/// useless downstream and get dropped here.
pub fn parse_iwlist(output: &str) -> Vec<ScannedCell> {
    let mut cells = Vec::new();
    for block in output.split("Cell ").skip(1) {
        let mut ssid = String::new();
        let mut signal_dbm: Option<i32> = None;
        let mut channel: u32 = 0;
        let mut security = Security::Open;
        let mut band: Option<Band> = None;

        for line in block.lines() {
            let line = line.trim();
            if let Some(rest) = line.split("ESSID:").nth(1) {
                ssid = rest.trim().trim_matches('"').to_string();
            } else if let Some(rest) = line.split("Signal level=").nth(1) {
                signal_dbm = parse_leading_int(rest);
            } else if let Some(rest) = line.split("Channel:").nth(1) {
                channel = rest.trim().parse().unwrap_or(0);
            } else if let Some(rest) = line.split("Frequency:").nth(1) {
                band = parse_frequency_band(rest);
            } else if let Some(rest) = line.split("Encryption key:").nth(1) {
                if rest.trim().starts_with("on") {
                    security = Security::Secured;
                }
            }
        }

        let Some(signal_dbm) = signal_dbm else { continue };
        cells.push(ScannedCell {
            ssid,
            signal_dbm,
            channel,
            security,
            band: band.unwrap_or_else(|| band_for_channel(channel)),
        });
    }
    cells
}

/// Accepts "-45 dBm", "-45/100" and bare "-45".
fn parse_leading_int(text: &str) -> Option<i32> {
    let text = text.trim();
    let end = text
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    text[..end].parse().ok()
}

fn parse_frequency_band(text: &str) -> Option<Band> {
    let ghz: f64 = text.trim().split_whitespace().next()?.parse().ok()?;
    if ghz < 3.0 {
        Some(Band::Ghz24)
    } else {
        Some(Band::Ghz58)
    }
}

/// Turn raw cells into store-ready devices: classification against the scan
/// history, path-loss range and the stable per-SSID colour.
pub fn enrich(cells: Vec<ScannedCell>, history: &mut SignalHistory) -> Vec<RfDevice> {
    let observed: HashSet<String> = cells.iter().map(|c| c.ssid.clone()).collect();
    let devices = cells
        .into_iter()
        .map(|cell| {
            let stable = history.observe(&cell.ssid, cell.signal_dbm);
            RfDevice {
                class: classify(&cell.ssid, cell.band, cell.channel, stable),
                distance_m: path_loss_distance(cell.signal_dbm as f64, cell.band),
                colour: colour_for(&cell.ssid),
                ssid: cell.ssid,
                signal_dbm: cell.signal_dbm,
                channel: cell.channel,
                security: cell.security,
                band: cell.band,
            }
        })
        .collect();
    history.retain(|ssid| observed.contains(ssid));
    devices
}

pub async fn run(
    state: SharedState,
    shutdown: ShutdownSignal,
    gate: Arc<ScanGate>,
    interface: String,
) {
    info!("[wifi] producer started on {interface}");
    let mut history = SignalHistory::new();

    while !shutdown.is_set() {
        let result = scan_once(&state, &gate, &interface, &mut history).await;
        if absorb("wifi", result) == LoopControl::Exit {
            break;
        }
        if shutdown.sleep_interruptible(SCAN_INTERVAL).await {
            break;
        }
    }

    info!("[wifi] producer stopped");
}

async fn scan_once(
    state: &SharedState,
    gate: &ScanGate,
    interface: &str,
    history: &mut SignalHistory,
) -> Result<(), ProducerError> {
    let cells = gate.scan(interface).await.map_err(|e| match e {
        ScanError::UtilityMissing => ProducerError::Terminal(anyhow::anyhow!(e)),
        other => ProducerError::Transient(anyhow::anyhow!(other)),
    })?;

    let devices = enrich(cells, history);
    state
        .set_networks_for_interface(interface, devices.clone())
        .map_err(|e| ProducerError::Transient(anyhow::anyhow!(e)))?;
    state
        .set_networks(devices)
        .map_err(|e| ProducerError::Transient(anyhow::anyhow!(e)))?;
    Ok(())
}
