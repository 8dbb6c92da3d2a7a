//! Goose sentry: detect, confirm, aim and deter.
//!
//! Connects to the motion stage and laser driver, loads a calibration session,
//! listens for the classifier's detection stream and runs the control loop
//! until `q`, Ctrl+C or SIGTERM. Every exit path runs the teardown sequence.

use std::any::Any;
use std::io::BufReader;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use futures::FutureExt;
use hardware::{HttpLaserGate, MoonrakerClient, MoonrakerMotion, MotionStreamer};
use sentry::controller::HardwareController;
use sentry::{HardwareCommand, Orchestrator};
use shared::config_storage::{CalibrationSession, CalibrationStore};
use shared::LatestDetection;
use station::acquisition::spawn_tcp_acquisition;
use station::operator::spawn_operator_input;
use station::{init_tracing, ControlLoop, SettingsArgs, StationSettings};
use tracing::{error, info, warn};

/// How long the acquisition thread blocks on a read before checking for shutdown
const ACQUISITION_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Laser goose deterrent",
    long_about = "Tracks geese reported by an external classifier and sweeps a low-power \
        laser pattern on the ground near them.\n\n\
        The classifier connects to --detection-listen and sends one JSON object per \
        frame. Console commands: p (pause), r (resume), q (quit), c <session> \
        (load calibration).\n\n\
        The laser is never enabled while a person is in view."
)]
struct Args {
    #[command(flatten)]
    settings: SettingsArgs,
}

fn load_calibration(
    store: &CalibrationStore,
    settings: &StationSettings,
) -> anyhow::Result<CalibrationSession> {
    let session = match &settings.calibration_session {
        Some(name) => store
            .load_session(name)
            .with_context(|| format!("Failed to load calibration session '{name}'"))?,
        None => store
            .latest_session()
            .context("Failed to read calibration store")?
            .ok_or_else(|| {
                anyhow!(
                    "No calibration sessions in {}; import one with calibration_tool",
                    store.root_path().display()
                )
            })?,
    };
    info!(
        "Using calibration '{}' ({} samples)",
        session.name,
        session.samples.len()
    );
    Ok(session)
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let args = Args::parse();
    let settings = args.settings.resolve().context("Invalid settings")?;
    let config = settings.sentry.clone();
    let store = settings
        .store()
        .context("Failed to open calibration storage")?;

    info!("Connecting to Moonraker at {}...", settings.moonraker_url);
    let client = MoonrakerClient::connect(&settings.moonraker_url)
        .await
        .context("Failed to connect to Moonraker")?;
    let mut motion = MoonrakerMotion::new(client, config.motion_settings());

    info!("Homing stage...");
    if let Err(e) = motion.home().await {
        let _ = motion.close().await;
        return Err(e).context("Homing failed");
    }

    let laser = HttpLaserGate::new(
        &settings.laser_url,
        config.laser_policy(),
        config.laser_reassert_interval(),
    )
    .context("Failed to create laser client")?;
    let mut controller = HardwareController::new(laser, motion, config.teardown_deadline())
        .with_command_budget(settings.control_period());

    let report = controller.apply(&[HardwareCommand::SetLaser(false)]).await;
    if report.laser_failures > 0 {
        controller.teardown(|| {}).await;
        return Err(anyhow!(
            "Laser driver at {} did not acknowledge OFF",
            settings.laser_url
        ));
    }
    info!("Laser confirmed OFF");

    let orchestrator = match load_calibration(&store, &settings)
        .and_then(|session| Ok(Orchestrator::from_session(config.clone(), &session)?))
    {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            controller.teardown(|| {}).await;
            return Err(e);
        }
    };
    let (near, far) = orchestrator.calibration().distance_range();
    info!("Calibrated range {:.1}..{:.1} ft", near, far);

    let slot = std::sync::Arc::new(LatestDetection::new());
    let detection_addr = settings.detection_addr()?;
    let mut acquisition = match spawn_tcp_acquisition(
        detection_addr,
        slot.clone(),
        config.confidence_thresholds(),
        ACQUISITION_POLL,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            controller.teardown(|| {}).await;
            return Err(e).with_context(|| format!("Failed to listen on {detection_addr}"));
        }
    };

    let (operator_tx, operator_rx) = tokio::sync::mpsc::unbounded_channel();
    if let Err(e) = spawn_operator_input(BufReader::new(std::io::stdin()), operator_tx) {
        warn!("Operator console unavailable: {}", e);
    }

    orchestrator.register_callback(|event| info!("Sentry event: {:?}", event));

    let mut control = ControlLoop::new(
        orchestrator,
        controller,
        slot,
        store,
        operator_rx,
        settings.control_period(),
        settings.staleness(),
    );

    let outcome = AssertUnwindSafe(control.run(shutdown_signal()))
        .catch_unwind()
        .await;

    let panicked = match &outcome {
        Ok(exit) => {
            info!("Control loop exited: {:?}", exit);
            None
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref()).to_string();
            error!("Control loop panicked: {}", message);
            Some(message)
        }
    };

    let report = control.shutdown(|| acquisition.stop()).await;

    if let Some(message) = panicked {
        return Err(anyhow!("Control loop panicked: {message}"));
    }
    if !report.laser_off_confirmed {
        return Err(anyhow!("Shut down without laser OFF confirmation"));
    }
    info!("Shut down complete");
    Ok(())
}
