use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use protogen_hud::calibration::{self, Calibration, CalibrationIo, IwEnumerator};
use protogen_hud::config::HudConfig;
use protogen_hud::layout::{
    compass_layout, directed_devices, heading_bar_layout, resolve_heading, HeadingResolution,
    HeadingSource, RotationState, GPS_PLACEHOLDER, WIFI_PLACEHOLDER,
};
use protogen_hud::service_manager::ServiceManager;
use protogen_hud::state::{SharedState, Snapshot};

#[derive(Parser, Debug)]
#[command(name = "protogen-hud")]
#[command(version, about = "Wearable HUD engine: sensor fusion and RF overlay core")]
struct Args {
    /// Skip interactive calibration and use the persisted file
    #[arg(long)]
    skip_calibration: bool,

    /// JSON config file overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where the receiver calibration is persisted
    #[arg(long, default_value = calibration::DEFAULT_CALIBRATION_FILE)]
    calibration_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("[{}] Protogen HUD starting", ts_now());

    let config = match &args.config {
        Some(path) => HudConfig::load(path)?,
        None => HudConfig::default(),
    };
    for warning in config.validate()? {
        warn!("[config] {warning}");
    }

    let calibration = resolve_calibration(&args, &config).await;

    let state = SharedState::new();
    let mut manager = ServiceManager::new(state.clone(), config);
    manager.start_all(calibration.as_ref());

    render_loop(&state).await;

    manager.stop_all().await;
    println!("[{}] Protogen HUD stopped", ts_now());
    Ok(())
}

/// Work out which calibration (if any) the locator runs with. Every failure
/// path lands on "locator disabled"; nothing here can take the process down.
async fn resolve_calibration(args: &Args, config: &HudConfig) -> Option<Calibration> {
    if !config.enable_wifi_locator {
        return None;
    }

    if args.skip_calibration {
        return match Calibration::load(&args.calibration_file) {
            Ok(calibration) => {
                info!(
                    "[calib] using stored calibration (left: {}, right: {})",
                    calibration.left_interface, calibration.right_interface
                );
                Some(calibration)
            }
            Err(e) => {
                warn!("[calib] {e}; locator disabled");
                None
            }
        };
    }

    let mut enumerator = IwEnumerator;
    let mut io = StdinPrompt;
    match calibration::calibrate(&mut enumerator, &mut io).await {
        Ok(calibration) => {
            if let Err(e) = calibration.save(&args.calibration_file) {
                warn!("[calib] could not persist calibration: {e:#}");
            }
            Some(calibration)
        }
        Err(e) => {
            warn!("[calib] interactive calibration failed: {e}");
            match Calibration::load(&args.calibration_file) {
                Ok(stored) => {
                    info!("[calib] falling back to stored calibration");
                    Some(stored)
                }
                Err(load_err) => {
                    warn!("[calib] {load_err}; locator disabled");
                    None
                }
            }
        }
    }
}

/// Operator terminal backed by stdin, with the no-input timeout that lets an
/// unattended boot proceed on the stored calibration.
struct StdinPrompt;

impl CalibrationIo for StdinPrompt {
    async fn prompt(&mut self, message: &str) -> Option<String> {
        println!("{message}");
        print!("> ");
        let _ = std::io::stdout().flush();

        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok().map(|_| line)
        });
        match tokio::time::timeout(calibration::PROMPT_TIMEOUT, read).await {
            Ok(Ok(Some(line))) => Some(line.trim().to_string()),
            _ => None,
        }
    }
}

/// The renderer's side of the system: one snapshot per frame, layout math,
/// and the rotation window. The drawing layer takes the computed package
/// from here; until one is attached the periodic status line is the sink.
async fn render_loop(state: &SharedState) {
    let mut ticker = tokio::time::interval(Duration::from_millis(33));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rotation = RotationState::new();
    let mut last_status = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("entering render loop");
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = state.snapshot();
                let heading = resolve_heading(&snapshot);
                let directed = directed_devices(&snapshot);
                let bar = heading_bar_layout(heading.heading_deg, &directed);
                let ring = compass_layout(heading.heading_deg, &directed);
                let visible = rotation.visible(&snapshot.networks, Instant::now());

                if last_status.elapsed() >= Duration::from_secs(2) {
                    info!("{}", status_line(&snapshot, heading, bar.len(), ring.len(), visible.len()));
                    last_status = Instant::now();
                }
            }
        }
    }
}

fn status_line(
    snapshot: &Snapshot,
    heading: HeadingResolution,
    bar_stacks: usize,
    ring_stacks: usize,
    visible: usize,
) -> String {
    let source = match heading.source {
        HeadingSource::Imu => "imu",
        HeadingSource::Gps => "gps",
        HeadingSource::Fallback => "fallback",
    };
    let gps = match (snapshot.gps.latitude, snapshot.gps.longitude) {
        (Some(lat), Some(lon)) => format!("{lat:.5},{lon:.5}"),
        _ => GPS_PLACEHOLDER.to_string(),
    };
    let wifi = if snapshot.networks.is_empty() {
        WIFI_PLACEHOLDER.to_string()
    } else {
        format!(
            "{} APs ({} directed)",
            snapshot.networks.len(),
            snapshot.directions.len()
        )
    };
    format!(
        "heading {:.1}deg [{source}] | {gps} | {wifi} | cpu {:.0}% ram {:.0}% temp {} | bar:{bar_stacks} ring:{ring_stacks} visible:{visible}",
        heading.heading_deg,
        snapshot.metrics.cpu_percent,
        snapshot.metrics.ram_percent,
        snapshot.metrics.temperature,
    )
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
