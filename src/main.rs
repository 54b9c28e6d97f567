//! Command line client for the spectral calibrator
//!
//! Connects to the device selected in the settings file, runs one command,
//! and disconnects again.

use anyhow::Context;
use clap::{Parser, Subcommand};
use spectral_calibrator::domain::models::{DeviceRecord, DiscoveryEvent};
use spectral_calibrator::domain::settings::SettingsService;
use spectral_calibrator::domain::switch::{SwitchDevice, ACTION_SET_DUTY_CYCLE};
use spectral_calibrator::infrastructure::bluetooth::scanner::DeviceDirectory;
use spectral_calibrator::infrastructure::bluetooth::transport::{DiscoveryBackend, GattBackend};
use spectral_calibrator::infrastructure::logging;
use spectral_calibrator::SpectralCalibrator;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "spectral-calibrator")]
#[command(about = "Control a BLE spectral calibration lamp", version)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby BLE devices
    Scan {
        /// Give up after this many seconds
        #[arg(short, long)]
        timeout_secs: Option<u64>,
        /// Remember the device with this name
        #[arg(short, long)]
        select: Option<String>,
    },
    /// Remember a device by its platform identifier
    Select {
        id: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Turn the lamp on
    On,
    /// Turn the lamp off
    Off,
    /// Start an on-off cycle
    Dutycycle {
        /// Duty cycle ratio, 0 to 100
        ratio: i64,
    },
    /// Report whether the lamp is lit
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => SettingsService::open(path),
        None => SettingsService::new()?,
    };
    let _log_guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Using settings at {}", settings.path().display());
    let settings = Arc::new(Mutex::new(settings));

    match cli.command {
        Commands::Select { id, name } => {
            let device = DeviceRecord {
                name: name.unwrap_or_else(|| id.clone()),
                id,
            };
            lock(&settings)?.select_device(&device)?;
            println!("Selected {} ({})", device.name, device.id);
            Ok(())
        }
        Commands::Scan {
            timeout_secs,
            select,
        } => {
            let (_, discovery) = backends()?;
            let timeout = match timeout_secs {
                Some(secs) => Duration::from_secs(secs),
                None => lock(&settings)?.get().discovery_timeout(),
            };
            let devices = scan(discovery, timeout)?;
            if devices.is_empty() {
                println!("No devices found.");
            }
            for device in &devices {
                println!("  {}  {}", device.name, device.id);
            }

            if let Some(name) = select {
                let device = devices
                    .iter()
                    .find(|device| device.name == name)
                    .with_context(|| format!("No device named '{}' was found", name))?;
                lock(&settings)?.select_device(device)?;
                println!("Selected {} ({})", device.name, device.id);
            }
            Ok(())
        }
        command => {
            let (gatt, _) = backends()?;
            let driver = SpectralCalibrator::new(gatt, settings)?;
            run(&driver, command)
        }
    }
}

fn run(driver: &SpectralCalibrator, command: Commands) -> anyhow::Result<()> {
    let device = driver.selected_device().context(
        "No device selected. Run `scan --select <NAME>` or `select <ID>` first.",
    )?;

    println!("Connecting to {}...", device.name);
    driver.set_connected(true).with_context(|| {
        format!(
            "Failed to connect to {}. Is the device powered up and in range?",
            device.name
        )
    })?;
    println!("Connected!");

    let result = match command {
        Commands::On => {
            println!("Turning on");
            driver.set_switch(0, true)
        }
        Commands::Off => {
            println!("Turning off");
            driver.set_switch(0, false)
        }
        Commands::Dutycycle { ratio } => {
            println!("Starting on-off cycle");
            driver
                .action(ACTION_SET_DUTY_CYCLE, &ratio.to_string())
                .map(drop)
        }
        Commands::Status => driver.get_switch(0).map(|lit| {
            println!("{}", if lit { "on" } else { "off" });
        }),
        Commands::Scan { .. } | Commands::Select { .. } => Ok(()),
    };

    println!("Disconnecting...");
    driver.set_connected(false)?;
    println!("Disconnected!");

    Ok(result?)
}

/// Run one discovery pass, bounded by `timeout`
fn scan(
    discovery: Arc<dyn DiscoveryBackend>,
    timeout: Duration,
) -> anyhow::Result<Vec<DeviceRecord>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    println!("Scanning for BLE devices ({} seconds)...", timeout.as_secs());
    let devices = runtime.block_on(async {
        let directory = DeviceDirectory::new(discovery);
        let mut session = directory.start_discovery();

        let completed = tokio::time::timeout(timeout, async {
            while let Some(event) = session.next_event().await {
                match event {
                    DiscoveryEvent::DeviceFound(device) => {
                        info!("Found {} ({})", device.name, device.id)
                    }
                    DiscoveryEvent::DeviceLost(id) => info!("Lost {}", id),
                    DiscoveryEvent::EnumerationComplete | DiscoveryEvent::Stopped => break,
                }
            }
        })
        .await;
        if completed.is_err() {
            warn!("Discovery did not complete within {:?}", timeout);
        }

        session.stop();
        session.devices()
    });
    Ok(devices)
}

fn lock(
    settings: &Arc<Mutex<SettingsService>>,
) -> anyhow::Result<std::sync::MutexGuard<'_, SettingsService>> {
    settings.lock().map_err(|_| anyhow::anyhow!("Lock error"))
}

#[cfg(windows)]
fn backends() -> anyhow::Result<(Arc<dyn GattBackend>, Arc<dyn DiscoveryBackend>)> {
    use spectral_calibrator::infrastructure::bluetooth::winrt::WinRtBluetooth;
    Ok(WinRtBluetooth::backends())
}

#[cfg(not(windows))]
fn backends() -> anyhow::Result<(Arc<dyn GattBackend>, Arc<dyn DiscoveryBackend>)> {
    anyhow::bail!("no BLE backend is available on this platform")
}
