//! Audio producer: continuous mono PCM capture.
//!
//! Streams raw S16LE from a persistent `arecord` process and publishes the
//! latest fixed-size window to the store. A missing utility or a capture
//! device that refuses to open is terminal; a stream that dies mid-flight
//! is respawned on the next iteration.

use anyhow::anyhow;
use log::info;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;

use crate::error::ProducerError;
use crate::producers::{absorb, LoopControl, ShutdownSignal};
use crate::state::{AudioFrame, SharedState, AUDIO_FRAME_SAMPLES, AUDIO_SAMPLE_RATE_HZ};

const FRAME_BYTES: usize = AUDIO_FRAME_SAMPLES * 2;
const READ_TIMEOUT: Duration = Duration::from_millis(200);

struct Capture {
    _child: Child,
    stdout: ChildStdout,
    frames_read: u64,
}

pub async fn run(state: SharedState, shutdown: ShutdownSignal) {
    info!("[audio] producer started");

    let mut capture: Option<Capture> = None;
    while !shutdown.is_set() {
        let result = capture_frame(&state, &shutdown, &mut capture).await;
        if absorb("audio", result) == LoopControl::Exit {
            break;
        }
        // No idle sleep: pacing comes from the device itself. The flag is
        // still re-checked between frames.
        if shutdown.sleep_interruptible(Duration::ZERO).await {
            break;
        }
    }

    info!("[audio] producer stopped");
}

fn spawn_capture() -> Result<Capture, ProducerError> {
    let mut child = Command::new("arecord")
        .args(["-q", "-f", "S16_LE", "-c", "1", "-t", "raw"])
        .arg("-r")
        .arg(AUDIO_SAMPLE_RATE_HZ.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ProducerError::Terminal(anyhow!("arecord not installed"))
            } else {
                ProducerError::Terminal(anyhow!("cannot start capture: {e}"))
            }
        })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProducerError::Terminal(anyhow!("capture process has no stdout")))?;
    info!("[audio] capture stream opened");
    Ok(Capture {
        _child: child,
        stdout,
        frames_read: 0,
    })
}

async fn capture_frame(
    state: &SharedState,
    shutdown: &ShutdownSignal,
    capture: &mut Option<Capture>,
) -> Result<(), ProducerError> {
    if capture.is_none() {
        *capture = Some(spawn_capture()?);
    }
    let active = capture.as_mut().unwrap();

    let mut buffer = vec![0u8; FRAME_BYTES];
    let mut filled = 0;
    while filled < FRAME_BYTES {
        if shutdown.is_set() {
            return Ok(());
        }
        // Plain read() is cancel-safe, so the timeout costs at most one
        // partial chunk of latency, never misaligned samples.
        match timeout(READ_TIMEOUT, active.stdout.read(&mut buffer[filled..])).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                let starved = active.frames_read == 0;
                *capture = None;
                return if starved {
                    Err(ProducerError::Terminal(anyhow!(
                        "capture device produced no audio; device unavailable"
                    )))
                } else {
                    Err(ProducerError::Transient(anyhow!(
                        "capture stream ended, respawning"
                    )))
                };
            }
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => {
                *capture = None;
                return Err(ProducerError::Transient(anyhow!("capture read failed: {e}")));
            }
        }
    }

    active.frames_read += 1;
    let frame = decode_frame(&buffer);
    state
        .set_audio_frame(frame)
        .map_err(|e| ProducerError::Transient(anyhow!(e)))?;
    Ok(())
}

/// Little-endian S16 bytes to samples.
fn decode_frame(buffer: &[u8]) -> AudioFrame {
    let samples = buffer
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    AudioFrame { samples }
}
