//! Producer lifecycle contract.
//!
//! A producer is a spawned task holding a handle to the shared store and a
//! [`ShutdownSignal`]. Its loop runs behind an error barrier: a transient
//! failure is logged and the next iteration retries; a terminal failure
//! (the backing hardware is gone) ends the task cleanly without touching
//! the rest of the process. The signal is observed between work units and
//! inside every sleep, so stop requests land well inside the grace window.

pub mod audio;
pub mod gps;
pub mod imu;
pub mod system_metrics;
pub mod wifi_locator;
pub mod wifi_scanner;

use log::{error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProducerError;

/// Granularity at which sleeps re-check the shutdown flag.
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Cooperative stop flag shared between the service manager and one
/// producer task.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleep for `total`, waking early if shutdown fires. Returns true when
    /// it did.
    pub async fn sleep_interruptible(&self, total: Duration) -> bool {
        let mut remaining = total;
        loop {
            if self.is_set() {
                return true;
            }
            if remaining.is_zero() {
                return false;
            }
            let slice = remaining.min(SHUTDOWN_POLL);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }
}

/// What the producer loop should do after one iteration has passed through
/// the error barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// The error barrier itself: transient errors are logged and swallowed,
/// terminal errors end the loop.
pub fn absorb(name: &str, result: Result<(), ProducerError>) -> LoopControl {
    match result {
        Ok(()) => LoopControl::Continue,
        Err(ProducerError::Transient(e)) => {
            warn!("[{name}] iteration failed: {e:#}");
            LoopControl::Continue
        }
        Err(ProducerError::Terminal(e)) => {
            error!("[{name}] hardware unavailable, producer exiting: {e:#}");
            LoopControl::Exit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::Instant;

    #[test]
    fn test_absorb_transient_continues() {
        let result = absorb("test", Err(ProducerError::Transient(anyhow!("blip"))));
        assert_eq!(result, LoopControl::Continue);
        assert_eq!(absorb("test", Ok(())), LoopControl::Continue);
    }

    #[test]
    fn test_absorb_terminal_exits() {
        let result = absorb("test", Err(ProducerError::Terminal(anyhow!("gone"))));
        assert_eq!(result, LoopControl::Exit);
    }

    #[tokio::test]
    async fn test_sleep_interruptible_wakes_on_shutdown() {
        let signal = ShutdownSignal::new();
        let waker = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waker.set();
        });

        let start = Instant::now();
        let interrupted = signal.sleep_interruptible(Duration::from_secs(30)).await;
        assert!(interrupted);
        // Woke within one poll slice of the signal, nowhere near 30s.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_sleep_interruptible_runs_to_completion() {
        let signal = ShutdownSignal::new();
        let interrupted = signal.sleep_interruptible(Duration::from_millis(20)).await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn test_barrier_loop_shape() {
        // A loop in the canonical producer shape: two transient failures,
        // then a terminal one. The barrier must swallow exactly two.
        let signal = ShutdownSignal::new();
        let mut failures = 0;
        let mut iterations = 0;
        while !signal.is_set() {
            iterations += 1;
            let result: Result<(), ProducerError> = if iterations <= 2 {
                failures += 1;
                Err(ProducerError::Transient(anyhow!("blip {iterations}")))
            } else {
                Err(ProducerError::Terminal(anyhow!("dead")))
            };
            if absorb("test", result) == LoopControl::Exit {
                break;
            }
            if signal.sleep_interruptible(Duration::ZERO).await {
                break;
            }
        }
        assert_eq!(failures, 2);
        assert_eq!(iterations, 3);
    }
}
