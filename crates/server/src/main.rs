//! usb-serial-bridge
//!
//! Serves USB-serial device access over length-prefixed JSON frames on
//! stdin/stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use common::{create_broadcast_channel, setup_logging};
use server::config::BridgeConfig;
use server::directory::DeviceDirectory;
use server::usb::{RusbSubsystem, spawn_usb_event_thread};
use server::{BridgeService, ServiceOptions, bridge};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-serial-bridge")]
#[command(
    author,
    version,
    about = "USB serial bridge - open USB-serial devices on behalf of a caller"
)]
#[command(long_about = "
Exposes USB-serial devices to a caller over stdin/stdout. The caller sends
length-prefixed JSON frames (create, listDevices, close, listen, cancel) and
receives replies and hot-plug events the same way.

EXAMPLES:
    # Serve on stdin/stdout with default config
    usb-serial-bridge

    # Run with custom config
    usb-serial-bridge --config /path/to/bridge.toml

    # List USB devices without serving
    usb-serial-bridge --list-devices

    # Run with debug logging
    usb-serial-bridge --log-level debug

CONFIGURATION:
    The bridge looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-serial-bridge/bridge.toml
    3. /etc/usb-serial-bridge/bridge.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        eprintln!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-serial-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let (broadcast_tx, broadcast_rx) = create_broadcast_channel();
    let subsystem = Arc::new(
        RusbSubsystem::new(
            broadcast_tx.clone(),
            config.usb.filters.clone(),
            config.permission.policy(),
        )
        .context("Failed to initialize USB subsystem")?,
    );

    if args.list_devices {
        return list_devices_mode(subsystem);
    }

    let event_thread = spawn_usb_event_thread(
        subsystem.context().clone(),
        broadcast_tx,
        config.usb.filters.clone(),
        config.usb.event_poll_interval(),
    )
    .context("Failed to spawn USB event thread")?;

    let service = BridgeService::new(
        subsystem,
        broadcast_rx,
        ServiceOptions {
            base_session_id: config.sessions.base_id,
        },
    );
    service.attach_event_thread(event_thread);
    service.start();

    let result = tokio::select! {
        served = bridge::serve(&service, tokio::io::stdin(), tokio::io::stdout()) => {
            served.context("Bridge transport failed")
        }
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
            Ok(())
        }
    };

    service.shutdown();
    result
}

/// List USB devices and exit
fn list_devices_mode(subsystem: Arc<RusbSubsystem>) -> Result<()> {
    info!("Listing USB devices...");

    let directory = DeviceDirectory::new(subsystem);
    let devices = directory
        .list_devices()
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            println!(
                "  [{}] {:04x}:{:04x} - {} {}",
                device.device_id,
                device.vendor_id,
                device.product_id,
                device
                    .manufacturer
                    .as_deref()
                    .unwrap_or("Unknown Manufacturer"),
                device.product.as_deref().unwrap_or("Unknown Product")
            );
            println!(
                "      {} ({} interface(s))",
                device.device_name,
                device.interface_count()
            );
            if let Some(serial) = &device.serial_number {
                println!("      Serial: {}", serial);
            }
            println!();
        }
    }

    Ok(())
}
