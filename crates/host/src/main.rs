//! gps-usb-host
//!
//! Watches the USB bus for a supported mobile device and streams location
//! packets to it.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{DispatchQueue, setup_logging};
use host::usb::APPLE_VENDOR_ID;
use host::{
    BackendKind, DeviceService, HostConfig, Route, RusbBackend, ServiceOptions, SimulatedBackend,
    SimulatedDevice, UsbBackend,
};
use protocol::{DeviceDescriptor, LocationSample};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gps-usb-host")]
#[command(author, version, about = "Stream GPS locations to a USB-attached mobile device")]
#[command(long_about = "
Detects a supported mobile device on the USB bus and writes location
packets to it over a bulk OUT endpoint.

EXAMPLES:
    # Watch connection state until Ctrl-C
    gps-usb-host

    # List USB devices and whether each one is supported
    gps-usb-host --list-devices

    # Send one location
    gps-usb-host --send 37.7749,-122.4194,10

    # Play a route file at cycling speed
    gps-usb-host --route ride.toml --speed 6

    # Try everything without hardware
    gps-usb-host --simulate --send 37.7749,-122.4194,10

CONFIGURATION:
    1. Path specified with --config
    2. ~/.config/gps-usb-host/host.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Use a simulated bus with one attached phone
    #[arg(long)]
    simulate: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Send one location and exit
    #[arg(long, value_name = "LAT,LON,ALT", value_parser = parse_location)]
    send: Option<(f64, f64, f64)>,

    /// Play a TOML route file
    #[arg(long, value_name = "PATH", conflicts_with = "send")]
    route: Option<PathBuf>,

    /// Route playback speed in m/s
    #[arg(long, value_name = "MPS", requires = "route")]
    speed: Option<f64>,
}

fn parse_location(value: &str) -> Result<(f64, f64, f64), String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [lat, lon, alt] = parts.as_slice() else {
        return Err(format!("expected LAT,LON,ALT, got '{}'", value));
    };

    let parse = |s: &str| s.parse::<f64>().map_err(|e| format!("'{}': {}", s, e));
    Ok((parse(*lat)?, parse(*lon)?, parse(*alt)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        HostConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("gps-usb-host v{}", env!("CARGO_PKG_VERSION"));

    let backend: Box<dyn UsbBackend> = if args.simulate || config.host.backend == BackendKind::Simulated {
        info!("Using simulated USB backend");
        let phone = DeviceDescriptor::new(APPLE_VENDOR_ID, 0x12a8)
            .with_name("Simulated iPhone")
            .at(1, 1);
        Box::new(SimulatedBackend::with_devices([SimulatedDevice::phone(phone)]))
    } else {
        Box::new(RusbBackend::new().context("Failed to initialize libusb")?)
    };

    let (dispatch, _dispatch_thread) =
        DispatchQueue::spawn("state-dispatch").context("Failed to start dispatch queue")?;
    let mut service = DeviceService::start(backend, dispatch, ServiceOptions::from(&config))
        .context("Failed to start device service")?;

    let result = if args.list_devices {
        list_devices_mode(&service).await
    } else if let Some((lat, lon, alt)) = args.send {
        send_mode(&service, LocationSample::now(lat, lon, alt)).await
    } else if let Some(ref path) = args.route {
        route_mode(&service, path, args.speed, config.route.default_speed_mps).await
    } else {
        watch_mode(&service).await
    };

    info!("Shutting down device service...");
    service.shutdown();

    result
}

/// Scan once and print every device with its match result
async fn list_devices_mode(service: &DeviceService) -> Result<()> {
    let devices = service.list_devices().await;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {} {}",
            if device.supported { "*" } else { " " },
            device.descriptor
        );
    }
    println!("\n  * supported");
    Ok(())
}

async fn send_mode(service: &DeviceService, sample: LocationSample) -> Result<()> {
    sample.validate()?;

    if !service.connect().await {
        return Err(anyhow!("{}", service.state().status_message()));
    }

    if service.send_location(sample).await {
        println!(
            "Sent {:.6}, {:.6}, {:.1}",
            sample.latitude, sample.longitude, sample.altitude
        );
        Ok(())
    } else {
        Err(anyhow!(
            "Failed to send location: {}",
            service.state().status_message()
        ))
    }
}

async fn route_mode(
    service: &DeviceService,
    path: &std::path::Path,
    speed: Option<f64>,
    default_speed: f64,
) -> Result<()> {
    let route = Route::load(path).with_context(|| format!("Failed to load route {}", path.display()))?;
    let speed = speed.unwrap_or_else(|| route.speed_mps(default_speed));

    info!(
        "Route '{}': {} waypoints, {:.0} m",
        route.name,
        route.waypoints.len(),
        route.total_distance_m()
    );

    if !service.connect().await {
        info!("No device yet: {}", service.state().status_message());
    }

    service.follow_route(route, speed).await?;
    info!("Press Ctrl+C to stop");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
                service.stop_following_route();
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if !service.is_following_route() {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Print state changes until Ctrl-C
async fn watch_mode(service: &DeviceService) -> Result<()> {
    let mut states = service.watch();
    info!("Press Ctrl+C to stop");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
                break;
            }
            state = states.recv() => match state {
                Some(state) => println!("{}", state.status_message()),
                None => break,
            },
        }
    }

    Ok(())
}
