//! Receiver calibration: binds the logical "left" and "right" receivers to
//! whatever interface names the kernel enumerated this boot.
//!
//! USB enumeration order is not stable across reboots, so the operator
//! powers the receivers one at a time and we watch for the interface that
//! appears. Enumeration is polled rather than slept through; the first
//! unambiguous delta wins.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::HudError;

pub const DEFAULT_CALIBRATION_FILE: &str = "hud_calibration.json";

/// How long each powering step may take before it counts as "no interface
/// appeared", and how often enumeration is re-checked inside that window.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_POLL: Duration = Duration::from_millis(200);

/// How long the first interactive prompt waits before falling back to the
/// stored calibration.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_SEPARATION_CM: f64 = 15.0;

/// Persisted receiver binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub left_interface: String,
    pub right_interface: String,
    /// Interface the scan producer uses; the left receiver by default.
    pub scan_interface: String,
    pub separation_m: f64,
}

impl Calibration {
    pub fn load(path: &Path) -> Result<Self, HudError> {
        let text = fs::read_to_string(path).map_err(|e| {
            HudError::NoCalibration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            HudError::NoCalibration(format!("cannot parse {}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Interfaces that belong to the host itself and never take part in
/// calibration or scanning.
pub fn is_onboard_interface(name: &str) -> bool {
    name == "wlan0" || name.starts_with("wlp")
}

/// Source of the current wireless interface set. Production uses `iw dev`;
/// tests script the sequence.
pub trait InterfaceEnumerator {
    fn wireless_interfaces(&mut self) -> anyhow::Result<BTreeSet<String>>;
}

pub struct IwEnumerator;

impl InterfaceEnumerator for IwEnumerator {
    fn wireless_interfaces(&mut self) -> anyhow::Result<BTreeSet<String>> {
        let output = Command::new("iw").arg("dev").output()?;
        if !output.status.success() {
            anyhow::bail!("iw dev exited with {}", output.status);
        }
        Ok(parse_iw_dev(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn parse_iw_dev(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Interface "))
        .map(|name| name.trim().to_string())
        .collect()
}

fn external_interfaces<E: InterfaceEnumerator>(
    enumerator: &mut E,
) -> anyhow::Result<BTreeSet<String>> {
    Ok(enumerator
        .wireless_interfaces()?
        .into_iter()
        .filter(|name| !is_onboard_interface(name))
        .collect())
}

/// Poll enumeration until exactly one new external interface shows up
/// relative to `baseline`. More than one new interface fails immediately;
/// none within the window fails with a count of zero.
pub async fn wait_for_new_interface<E: InterfaceEnumerator>(
    enumerator: &mut E,
    baseline: &BTreeSet<String>,
    timeout: Duration,
    poll: Duration,
) -> Result<String, HudError> {
    let deadline = Instant::now() + timeout;
    loop {
        let current = match external_interfaces(enumerator) {
            Ok(current) => current,
            Err(e) => {
                warn!("[calib] interface enumeration failed, retrying: {e}");
                BTreeSet::new()
            }
        };
        let mut new: Vec<&String> = current.difference(baseline).collect();
        match new.len() {
            1 => return Ok(new.remove(0).clone()),
            0 => {}
            found => return Err(HudError::CalibrationAmbiguous { found }),
        }
        if Instant::now() >= deadline {
            return Err(HudError::CalibrationAmbiguous { found: 0 });
        }
        tokio::time::sleep(poll).await;
    }
}

/// Operator terminal. `None` means the operator never answered.
#[allow(async_fn_in_trait)]
pub trait CalibrationIo {
    async fn prompt(&mut self, message: &str) -> Option<String>;
}

/// Parse the operator's separation answer (centimetres) into metres. Empty
/// input takes the default; values outside the typical mounting range are
/// warned about but accepted.
pub fn parse_separation_cm(input: &str) -> Result<f64, HudError> {
    let trimmed = input.trim();
    let cm = if trimmed.is_empty() {
        DEFAULT_SEPARATION_CM
    } else {
        trimmed.parse::<f64>().map_err(|_| {
            HudError::NoCalibration(format!("separation '{trimmed}' is not a number"))
        })?
    };
    if !cm.is_finite() || cm <= 0.0 {
        return Err(HudError::NoCalibration(format!(
            "separation {cm}cm is not usable"
        )));
    }
    if !(5.0..=50.0).contains(&cm) {
        warn!("[calib] separation {cm}cm is outside the typical 5-50cm range");
    }
    Ok(cm / 100.0)
}

/// Run the full interactive protocol and return the binding to persist.
pub async fn calibrate<E, IO>(enumerator: &mut E, io: &mut IO) -> Result<Calibration, HudError>
where
    E: InterfaceEnumerator,
    IO: CalibrationIo,
{
    let baseline = external_interfaces(enumerator)
        .map_err(|e| HudError::NoCalibration(format!("interface enumeration failed: {e}")))?;
    if !baseline.is_empty() {
        warn!(
            "[calib] receivers appear already powered: {:?}; results may be ambiguous",
            baseline
        );
    }

    if io
        .prompt("Power ON the RIGHT receiver only, then press Enter")
        .await
        .is_none()
    {
        return Err(HudError::NoCalibration("operator did not respond".to_string()));
    }
    let right = wait_for_new_interface(enumerator, &baseline, SETTLE_TIMEOUT, SETTLE_POLL).await?;
    info!("[calib] right receiver bound to {right}");

    let mut with_right = baseline.clone();
    with_right.insert(right.clone());

    if io
        .prompt("Power ON the LEFT receiver, then press Enter")
        .await
        .is_none()
    {
        return Err(HudError::NoCalibration("operator did not respond".to_string()));
    }
    let left = wait_for_new_interface(enumerator, &with_right, SETTLE_TIMEOUT, SETTLE_POLL).await?;
    info!("[calib] left receiver bound to {left}");

    let answer = io
        .prompt("Adapter separation in centimetres [15]")
        .await
        .unwrap_or_default();
    let separation_m = parse_separation_cm(&answer)?;

    Ok(Calibration {
        scan_interface: left.clone(),
        left_interface: left,
        right_interface: right,
        separation_m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedEnumerator {
        script: VecDeque<BTreeSet<String>>,
        last: BTreeSet<String>,
    }

    impl ScriptedEnumerator {
        fn new(steps: Vec<Vec<&str>>) -> Self {
            let script: VecDeque<BTreeSet<String>> = steps
                .into_iter()
                .map(|step| step.into_iter().map(String::from).collect())
                .collect();
            Self {
                script,
                last: BTreeSet::new(),
            }
        }
    }

    impl InterfaceEnumerator for ScriptedEnumerator {
        fn wireless_interfaces(&mut self) -> anyhow::Result<BTreeSet<String>> {
            if let Some(step) = self.script.pop_front() {
                self.last = step;
            }
            Ok(self.last.clone())
        }
    }

    struct ScriptedIo {
        answers: VecDeque<Option<String>>,
    }

    impl ScriptedIo {
        fn new(answers: Vec<Option<&str>>) -> Self {
            Self {
                answers: answers
                    .into_iter()
                    .map(|a| a.map(String::from))
                    .collect(),
            }
        }
    }

    impl CalibrationIo for ScriptedIo {
        async fn prompt(&mut self, _message: &str) -> Option<String> {
            self.answers.pop_front().flatten()
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_parse_iw_dev() {
        let output = "phy#0\n\tInterface wlan0\n\t\tifindex 3\nphy#1\n\tInterface wlan1\n";
        assert_eq!(parse_iw_dev(output), set(&["wlan0", "wlan1"]));
        assert!(parse_iw_dev("").is_empty());
    }

    #[test]
    fn test_onboard_patterns() {
        assert!(is_onboard_interface("wlan0"));
        assert!(is_onboard_interface("wlp1s0"));
        assert!(is_onboard_interface("wlp2s0f0"));
        assert!(!is_onboard_interface("wlan1"));
        assert!(!is_onboard_interface("wlx00c0ca123456"));
    }

    #[tokio::test]
    async fn test_new_interface_detected() {
        // Baseline holds only onboard wireless; wlan1 appears after power-on.
        let mut enumerator =
            ScriptedEnumerator::new(vec![vec!["wlan0"], vec!["wlan0", "wlan1"]]);
        let baseline = external_interfaces(&mut enumerator).unwrap();
        assert!(baseline.is_empty());

        let found = wait_for_new_interface(
            &mut enumerator,
            &baseline,
            Duration::from_millis(200),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(found, "wlan1");
    }

    #[tokio::test]
    async fn test_no_new_interface_is_ambiguous() {
        let mut enumerator = ScriptedEnumerator::new(vec![vec!["wlan0"]]);
        let baseline = external_interfaces(&mut enumerator).unwrap();
        let err = wait_for_new_interface(
            &mut enumerator,
            &baseline,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HudError::CalibrationAmbiguous { found: 0 }));
    }

    #[tokio::test]
    async fn test_two_new_interfaces_are_ambiguous() {
        let mut enumerator =
            ScriptedEnumerator::new(vec![vec![], vec!["wlan1", "wlan2"]]);
        let baseline = external_interfaces(&mut enumerator).unwrap();
        let err = wait_for_new_interface(
            &mut enumerator,
            &baseline,
            Duration::from_millis(200),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HudError::CalibrationAmbiguous { found: 2 }));
    }

    #[tokio::test]
    async fn test_slow_enumeration_is_polled_not_failed() {
        // The interface only shows up on the third poll.
        let mut enumerator = ScriptedEnumerator::new(vec![
            vec!["wlan0"],
            vec!["wlan0"],
            vec!["wlan0"],
            vec!["wlan0", "wlx1"],
        ]);
        let baseline = external_interfaces(&mut enumerator).unwrap();
        let found = wait_for_new_interface(
            &mut enumerator,
            &baseline,
            Duration::from_millis(500),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(found, "wlx1");
    }

    #[tokio::test]
    async fn test_full_calibration_protocol() {
        let mut enumerator = ScriptedEnumerator::new(vec![
            vec!["wlan0"],          // baseline
            vec!["wlan0", "wlan2"], // right powered
            vec!["wlan0", "wlan2", "wlan1"], // left powered
        ]);
        let mut io = ScriptedIo::new(vec![Some(""), Some(""), Some("20")]);

        let calibration = calibrate(&mut enumerator, &mut io).await.unwrap();
        assert_eq!(calibration.right_interface, "wlan2");
        assert_eq!(calibration.left_interface, "wlan1");
        assert_eq!(calibration.scan_interface, "wlan1");
        assert!((calibration.separation_m - 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_operator_timeout_yields_no_calibration() {
        let mut enumerator = ScriptedEnumerator::new(vec![vec!["wlan0"]]);
        let mut io = ScriptedIo::new(vec![None]);
        let err = calibrate(&mut enumerator, &mut io).await.unwrap_err();
        assert!(matches!(err, HudError::NoCalibration(_)));
    }

    #[test]
    fn test_separation_parsing() {
        assert!((parse_separation_cm("20").unwrap() - 0.2).abs() < 1e-12);
        assert!((parse_separation_cm("").unwrap() - 0.15).abs() < 1e-12);
        // Outside the typical range: warned, still accepted.
        assert!((parse_separation_cm("60").unwrap() - 0.6).abs() < 1e-12);
        assert!(parse_separation_cm("wide").is_err());
        assert!(parse_separation_cm("-3").is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let calibration = Calibration {
            left_interface: "wlan1".to_string(),
            right_interface: "wlan2".to_string(),
            scan_interface: "wlan1".to_string(),
            separation_m: 0.15,
        };
        calibration.save(&path).unwrap();
        assert_eq!(Calibration::load(&path).unwrap(), calibration);
    }

    #[test]
    fn test_missing_file_is_no_calibration() {
        let err = Calibration::load(Path::new("/nonexistent/calibration.json")).unwrap_err();
        assert!(matches!(err, HudError::NoCalibration(_)));
    }

    #[test]
    fn test_corrupt_file_is_no_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, "not json {").unwrap();
        assert!(matches!(
            Calibration::load(&path).unwrap_err(),
            HudError::NoCalibration(_)
        ));
    }
}
