//! Starts and stops the producer fleet according to configuration.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::calibration::Calibration;
use crate::config::HudConfig;
use crate::producers::wifi_scanner::ScanGate;
use crate::producers::{self, ShutdownSignal};
use crate::state::SharedState;

/// Total budget for a graceful stop. Producers still running afterwards are
/// abandoned to the runtime.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

struct ServiceHandle {
    name: &'static str,
    shutdown: ShutdownSignal,
    handle: JoinHandle<()>,
}

pub struct ServiceManager {
    state: SharedState,
    config: HudConfig,
    scan_gate: Arc<ScanGate>,
    services: Vec<ServiceHandle>,
}

impl ServiceManager {
    pub fn new(state: SharedState, config: HudConfig) -> Self {
        Self {
            state,
            config,
            scan_gate: ScanGate::new(),
            services: Vec::new(),
        }
    }

    /// Launch every enabled producer. A producer that later hits terminal
    /// hardware failure ends its own task; nothing here aborts startup of
    /// the others.
    pub fn start_all(&mut self, calibration: Option<&Calibration>) {
        info!("[services] starting enabled producers");

        if self.config.enable_system_metrics {
            let shutdown = ShutdownSignal::new();
            let handle = tokio::spawn(producers::system_metrics::run(
                self.state.clone(),
                shutdown.clone(),
            ));
            self.track("metrics", shutdown, handle);
        } else {
            info!("[services] 'metrics' disabled in configuration");
        }

        if self.config.enable_gps {
            let shutdown = ShutdownSignal::new();
            let handle = tokio::spawn(producers::gps::run(
                self.state.clone(),
                shutdown.clone(),
                self.config.gpsd_address.clone(),
            ));
            self.track("gps", shutdown, handle);
        } else {
            info!("[services] 'gps' disabled in configuration");
        }

        if self.config.enable_imu {
            let shutdown = ShutdownSignal::new();
            let handle = tokio::spawn(producers::imu::run(self.state.clone(), shutdown.clone()));
            self.track("imu", shutdown, handle);
        } else {
            info!("[services] 'imu' disabled in configuration");
        }

        if self.config.enable_wifi_scanner {
            let shutdown = ShutdownSignal::new();
            let handle = tokio::spawn(producers::wifi_scanner::run(
                self.state.clone(),
                shutdown.clone(),
                self.scan_gate.clone(),
                self.config.wifi_scan_interface.clone(),
            ));
            self.track("wifi", shutdown, handle);
        } else {
            info!("[services] 'wifi' disabled in configuration");
        }

        if self.config.enable_wifi_locator {
            match calibration {
                Some(calibration) => {
                    let shutdown = ShutdownSignal::new();
                    let handle = tokio::spawn(producers::wifi_locator::run(
                        self.state.clone(),
                        shutdown.clone(),
                        self.scan_gate.clone(),
                        calibration.clone(),
                    ));
                    self.track("locator", shutdown, handle);
                }
                None => warn!("[services] 'locator' enabled but no calibration; disabled"),
            }
        } else {
            info!("[services] 'locator' disabled in configuration");
        }

        if self.config.enable_audio {
            let shutdown = ShutdownSignal::new();
            let handle = tokio::spawn(producers::audio::run(self.state.clone(), shutdown.clone()));
            self.track("audio", shutdown, handle);
        } else {
            info!("[services] 'audio' disabled in configuration");
        }

        info!("[services] {} producer(s) running", self.services.len());
    }

    fn track(&mut self, name: &'static str, shutdown: ShutdownSignal, handle: JoinHandle<()>) {
        info!("[services] '{name}' started");
        self.services.push(ServiceHandle {
            name,
            shutdown,
            handle,
        });
    }

    pub fn running(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.name).collect()
    }

    /// Fire every shutdown signal, then join all handles against one shared
    /// deadline. Whatever has not exited by then is abandoned.
    pub async fn stop_all(&mut self) {
        if self.services.is_empty() {
            info!("[services] nothing to stop");
            return;
        }
        info!("[services] stopping {} producer(s)", self.services.len());

        for service in &self.services {
            service.shutdown.set();
        }

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        for mut service in self.services.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut service.handle).await {
                Ok(Ok(())) => info!("[services] '{}' stopped", service.name),
                Ok(Err(e)) => warn!("[services] '{}' task failed: {e}", service.name),
                Err(_) => {
                    warn!(
                        "[services] '{}' did not stop within {STOP_GRACE:?}, abandoning",
                        service.name
                    );
                    service.handle.abort();
                }
            }
        }

        info!("[services] all producers stopped");
    }
}
