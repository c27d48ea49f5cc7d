//! IMU producer: 50 Hz rotation-vector reads over the Linux IIO sysfs
//! interface, converted to heading/pitch/roll.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProducerError;
use crate::producers::{absorb, LoopControl, ShutdownSignal};
use crate::state::{ImuSample, SharedState};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const IIO_DEVICES: &str = "/sys/bus/iio/devices";
/// Rotation vector channels are Q14 fixed point.
const QUAT_SCALE: f64 = 1.0 / 16384.0;

pub async fn run(state: SharedState, shutdown: ShutdownSignal) {
    info!("[imu] producer started");

    // Missing hardware surfaces here, before the loop ever spins.
    let device = match find_rotation_device() {
        Ok(device) => {
            info!("[imu] rotation vector device at {}", device.display());
            device
        }
        Err(e) => {
            absorb("imu", Err(ProducerError::Terminal(e)));
            info!("[imu] producer stopped");
            return;
        }
    };

    while !shutdown.is_set() {
        let result = read_and_publish(&state, &device);
        if absorb("imu", result) == LoopControl::Exit {
            break;
        }
        if shutdown.sleep_interruptible(POLL_INTERVAL).await {
            break;
        }
    }

    info!("[imu] producer stopped");
}

fn read_and_publish(state: &SharedState, device: &Path) -> Result<(), ProducerError> {
    let [w, x, y, z] = read_quaternion(device)?;
    let (heading, pitch, roll) = quaternion_to_euler(w, x, y, z);
    if let Err(e) = state.set_imu(ImuSample { heading, pitch, roll }) {
        warn!("[imu] rejected sample: {e}");
    }
    Ok(())
}

/// Find the first IIO device exposing rotation-vector quaternion channels.
fn find_rotation_device() -> Result<PathBuf> {
    let entries = fs::read_dir(IIO_DEVICES)
        .with_context(|| format!("no IIO bus at {IIO_DEVICES}"))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.join("in_rot_quaternion_w_raw").exists() {
            return Ok(path);
        }
    }
    Err(anyhow!("no IIO rotation-vector device enumerated"))
}

fn read_quaternion(device: &Path) -> Result<[f64; 4]> {
    let mut quat = [0.0f64; 4];
    for (slot, channel) in quat.iter_mut().zip(["w", "x", "y", "z"]) {
        let path = device.join(format!("in_rot_quaternion_{channel}_raw"));
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let value: i64 = raw
            .trim()
            .parse()
            .with_context(|| format!("parsing {}", path.display()))?;
        *slot = value as f64 * QUAT_SCALE;
    }
    Ok(quat)
}

/// Quaternion to Euler angles in degrees: heading in [0, 360), pitch in
/// [-90, 90] (clamped at gimbal lock), roll in (-180, 180].
pub fn quaternion_to_euler(qw: f64, qx: f64, qy: f64, qz: f64) -> (f64, f64, f64) {
    let sinr_cosp = 2.0 * (qw * qx + qy * qz);
    let cosr_cosp = 1.0 - 2.0 * (qx * qx + qy * qy);
    let roll = sinr_cosp.atan2(cosr_cosp);

    let sinp = 2.0 * (qw * qy - qz * qx);
    let pitch = if sinp.abs() >= 1.0 {
        (std::f64::consts::FRAC_PI_2).copysign(sinp)
    } else {
        sinp.asin()
    };

    let siny_cosp = 2.0 * (qw * qz + qx * qy);
    let cosy_cosp = 1.0 - 2.0 * (qy * qy + qz * qz);
    let yaw = siny_cosp.atan2(cosy_cosp);

    let heading = (yaw.to_degrees() + 360.0) % 360.0;
    // atan2 can land exactly on -180; fold it onto the closed end.
    let mut roll_deg = roll.to_degrees();
    if roll_deg <= -180.0 {
        roll_deg += 360.0;
    }
    (heading, pitch.to_degrees(), roll_deg)
}
