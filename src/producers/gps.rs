//! GPS producer: a gpsd watch-mode client.
//!
//! Connects to the daemon's TCP socket, enables JSON reporting and streams
//! TPV reports into the store. Connection losses retry with a bounded
//! budget; a daemon that never answers is treated as absent hardware.

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ProducerError;
use crate::producers::{absorb, LoopControl, ShutdownSignal};
use crate::state::{GpsFix, SharedState};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Deserialize)]
struct TpvReport {
    class: String,
    #[serde(default)]
    mode: i32,
    lat: Option<f64>,
    lon: Option<f64>,
    speed: Option<f64>,
    track: Option<f64>,
}

pub async fn run(state: SharedState, shutdown: ShutdownSignal, address: String) {
    info!("[gps] producer started, daemon at {address}");

    let mut failed_connects = 0u32;
    while !shutdown.is_set() {
        let result = watch_session(&state, &shutdown, &address, &mut failed_connects).await;
        if absorb("gps", result) == LoopControl::Exit {
            break;
        }
        if shutdown.sleep_interruptible(RECONNECT_DELAY).await {
            break;
        }
    }

    info!("[gps] producer stopped");
}

/// One connect-and-stream session. Returns when the stream drops (transient,
/// the caller reconnects) or the retry budget is spent (terminal).
async fn watch_session(
    state: &SharedState,
    shutdown: &ShutdownSignal,
    address: &str,
    failed_connects: &mut u32,
) -> Result<(), ProducerError> {
    let mut stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(connect_failure(failed_connects, anyhow!(e), address)),
        Err(_) => {
            return Err(connect_failure(
                failed_connects,
                anyhow!("connect timed out"),
                address,
            ))
        }
    };
    *failed_connects = 0;

    stream
        .write_all(WATCH_COMMAND)
        .await
        .context("sending WATCH command")?;
    info!("[gps] watching {address}");

    let mut lines = BufReader::new(stream).lines();
    loop {
        if shutdown.is_set() {
            return Ok(());
        }
        match timeout(READ_TIMEOUT, lines.next_line()).await {
            // Quiet socket; come back around and re-check shutdown.
            Err(_) => continue,
            Ok(Ok(Some(line))) => handle_report(state, &line),
            Ok(Ok(None)) => return Err(anyhow!("gpsd closed the stream").into()),
            Ok(Err(e)) => return Err(anyhow!("gpsd read failed: {e}").into()),
        }
    }
}

fn connect_failure(failed_connects: &mut u32, cause: anyhow::Error, address: &str) -> ProducerError {
    *failed_connects += 1;
    if *failed_connects >= MAX_CONNECT_ATTEMPTS {
        ProducerError::Terminal(anyhow!(
            "gpsd at {address} unreachable after {failed_connects} attempts: {cause}"
        ))
    } else {
        ProducerError::Transient(anyhow!(
            "gpsd connect failed (attempt {failed_connects}/{MAX_CONNECT_ATTEMPTS}): {cause}"
        ))
    }
}

fn handle_report(state: &SharedState, line: &str) {
    let Some(fix) = parse_tpv(line) else { return };

    // An active IMU owns the heading; the daemon's course must not shadow it.
    let fix = if state.imu_present() {
        GpsFix {
            heading: None,
            ..fix
        }
    } else {
        fix
    };

    if let Err(e) = state.set_gps(fix) {
        warn!("[gps] rejected fix: {e}");
    }
}

/// Parse one gpsd JSON line into a fix. Non-TPV classes and reports without
/// a 2D fix yield nothing.
fn parse_tpv(line: &str) -> Option<GpsFix> {
    let report: TpvReport = match serde_json::from_str(line) {
        Ok(report) => report,
        Err(e) => {
            debug!("[gps] unparseable report: {e}");
            return None;
        }
    };
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    Some(GpsFix {
        latitude: report.lat,
        longitude: report.lon,
        speed: report.speed.map(|s| s.max(0.0)),
        heading: report.track.map(|t| t.rem_euclid(360.0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ImuSample;

    #[test]
    fn test_parse_tpv_full_fix() {
        let line = r#"{"class":"TPV","mode":3,"lat":37.7749,"lon":-122.4194,"speed":5.5,"track":123.4}"#;
        let fix = parse_tpv(line).unwrap();
        assert_eq!(fix.latitude, Some(37.7749));
        assert_eq!(fix.longitude, Some(-122.4194));
        assert_eq!(fix.speed, Some(5.5));
        assert_eq!(fix.heading, Some(123.4));
    }

    #[test]
    fn test_parse_tpv_without_course_keeps_heading_null() {
        let line = r#"{"class":"TPV","mode":2,"lat":1.0,"lon":2.0}"#;
        let fix = parse_tpv(line).unwrap();
        assert_eq!(fix.latitude, Some(1.0));
        assert!(fix.heading.is_none());
        assert!(fix.speed.is_none());
    }

    #[test]
    fn test_parse_tpv_skips_non_fixes() {
        assert!(parse_tpv(r#"{"class":"TPV","mode":1}"#).is_none());
        assert!(parse_tpv(r#"{"class":"SKY","mode":3}"#).is_none());
        assert!(parse_tpv("not json").is_none());
    }

    #[test]
    fn test_parse_tpv_normalises_course() {
        let line = r#"{"class":"TPV","mode":2,"track":360.0}"#;
        assert_eq!(parse_tpv(line).unwrap().heading, Some(0.0));
    }

    #[test]
    fn test_report_heading_deferred_to_imu() {
        let state = SharedState::new();
        state
            .set_imu(ImuSample { heading: 90.0, pitch: 0.0, roll: 0.0 })
            .unwrap();

        handle_report(
            &state,
            r#"{"class":"TPV","mode":3,"lat":1.0,"lon":2.0,"track":180.0}"#,
        );

        let snap = state.snapshot();
        assert_eq!(snap.gps.latitude, Some(1.0));
        // The daemon's course was dropped, not written over the IMU.
        assert!(snap.gps.heading.is_none());
        assert_eq!(snap.heading(), Some(90.0));
    }

    #[test]
    fn test_connect_failure_budget() {
        let mut attempts = 0;
        for _ in 0..MAX_CONNECT_ATTEMPTS - 1 {
            assert!(matches!(
                connect_failure(&mut attempts, anyhow!("refused"), "127.0.0.1:2947"),
                ProducerError::Transient(_)
            ));
        }
        assert!(matches!(
            connect_failure(&mut attempts, anyhow!("refused"), "127.0.0.1:2947"),
            ProducerError::Terminal(_)
        ));
    }
}
