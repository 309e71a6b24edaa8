use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use visionair_ble::domain::models::CoordinatorEvent;
use visionair_ble::domain::settings::{Settings, SettingsService, UPDATE_INTERVAL_CHOICES};

/// How often `watch` re-reads the settings file for interval changes.
const SETTINGS_RELOAD_PERIOD: Duration = Duration::from_secs(5);
use visionair_ble::infrastructure::logging::init_logger;
use visionair_ble::presentation::cli::{parse_command, render_scan, render_status, Cli, CliCommand};
use visionair_ble::{BleAdapter, Connector, DeviceAddress, PollingCoordinator};

#[cfg(windows)]
fn platform_adapter(
    settings: &Settings,
) -> Result<visionair_ble::infrastructure::bluetooth::winrt::WinRtAdapter> {
    visionair_ble::infrastructure::bluetooth::winrt::WinRtAdapter::new(settings)
        .context("invalid BLE UUIDs in settings")
}

#[cfg(not(windows))]
fn platform_adapter(
    _settings: &Settings,
) -> Result<visionair_ble::infrastructure::bluetooth::UnsupportedAdapter> {
    warn!("No BLE backend on this platform, every device will be unreachable");
    Ok(visionair_ble::infrastructure::bluetooth::UnsupportedAdapter)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => SettingsService::open(path.clone()),
        None => SettingsService::new()?,
    };

    let mut log_settings = settings.get().log_settings.clone();
    match cli.verbose {
        0 => {}
        1 => log_settings.level = "debug".to_string(),
        _ => log_settings.level = "trace".to_string(),
    }
    let _log_guard = init_logger(&log_settings)?;
    info!(path = %settings.path().display(), "Starting VisionAir client");

    let adapter = platform_adapter(settings.get())?;
    run(cli, settings, adapter).await
}

async fn run<A: BleAdapter>(cli: Cli, mut settings: SettingsService, adapter: A) -> Result<()> {
    let connector = Arc::new(Connector::new(adapter, settings.get().timeouts));

    match cli.command {
        CliCommand::Scan { seconds } => {
            let devices = connector
                .adapter()
                .discover(Duration::from_secs(seconds))
                .await
                .context("scan failed")?;
            print!("{}", render_scan(&devices));
        }
        CliCommand::Interval { secs: None } => {
            println!("{} s", settings.get().update_interval().as_secs());
        }
        CliCommand::Interval { secs: Some(secs) } => {
            if !UPDATE_INTERVAL_CHOICES.contains(&secs) {
                warn!(
                    secs,
                    choices = ?UPDATE_INTERVAL_CHOICES,
                    "Non-standard polling interval"
                );
            }
            settings.set_update_interval(secs)?;
            println!("Polling interval set to {} s", secs);
        }
        CliCommand::Status { json } => {
            let coordinator = build_coordinator(&cli.address, &mut settings, connector, None)?;
            let status = coordinator.refresh().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&*status)?);
            } else {
                print!("{}", render_status(&status));
            }
        }
        CliCommand::Set { field, value } => {
            let command = parse_command(field, &value).map_err(anyhow::Error::msg)?;
            let coordinator = build_coordinator(&cli.address, &mut settings, connector, None)?;
            let status = coordinator
                .execute(command)
                .await
                .with_context(|| format!("{} failed", command.action()))?;
            print!("{}", render_status(&status));
        }
        CliCommand::Watch => {
            let (tx, rx) = mpsc::unbounded_channel();
            let coordinator = build_coordinator(&cli.address, &mut settings, connector, Some(tx))?;
            watch(coordinator, settings, rx).await;
        }
    }

    Ok(())
}

fn build_coordinator<A: BleAdapter>(
    cli_address: &Option<DeviceAddress>,
    settings: &mut SettingsService,
    connector: Arc<Connector<A>>,
    events: Option<mpsc::UnboundedSender<CoordinatorEvent>>,
) -> Result<PollingCoordinator<A>> {
    let address = match cli_address {
        Some(address) => {
            if settings.get().device_address.is_none() {
                settings.set_device_address(&address.to_string())?;
                info!(%address, "Remembered device address");
            }
            *address
        }
        None => settings
            .get()
            .device_address
            .as_deref()
            .context("no device address configured; pass --address or run `visionair scan`")?
            .parse::<DeviceAddress>()
            .map_err(anyhow::Error::msg)
            .context("configured device address is invalid")?,
    };

    Ok(PollingCoordinator::new(
        address,
        connector,
        settings.get().update_interval(),
        events,
    ))
}

async fn watch<A: BleAdapter>(
    coordinator: PollingCoordinator<A>,
    mut settings: SettingsService,
    mut events: mpsc::UnboundedReceiver<CoordinatorEvent>,
) {
    // First snapshot right away; the scheduler takes over from there
    let _ = coordinator.refresh().await;
    coordinator.start();

    let mut reload = tokio::time::interval(SETTINGS_RELOAD_PERIOD);
    reload.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = reload.tick() => match settings.reload() {
                Ok(()) => {
                    if coordinator.apply_settings(settings.get()) {
                        println!(
                            "Polling interval now {} s",
                            coordinator.poll_interval().as_secs()
                        );
                    }
                }
                Err(e) => debug!(error = %e, "Settings reload failed"),
            },
            event = events.recv() => match event {
                Some(CoordinatorEvent::StatusUpdated(status)) => {
                    println!("--- {}", coordinator.address());
                    print!("{}", render_status(&status));
                }
                Some(CoordinatorEvent::FetchFailed(e)) => {
                    eprintln!("poll failed: {}", e);
                }
                Some(CoordinatorEvent::StateChanged(_)) => {}
                None => break,
            },
        }
    }

    coordinator.shutdown().await;
}
