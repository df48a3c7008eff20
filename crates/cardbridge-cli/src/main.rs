use anyhow::{Context, Result, bail};
use cardbridge_core::{DeviceFilter, DeviceKey, PluginConfig, TransportKind, bytes_to_hex, hex_to_bytes};
use cardbridge_reader::mock::{MockTransport, MockTransportHandle, TransportCall};
use cardbridge_reader::{DeviceHandle, PluginFacade};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reader simulated when no device filter is configured.
const DEMO_READER: DeviceKey = DeviceKey::new(0x04E6, 0x5173);

#[derive(Parser, Debug)]
#[command(author, version, about = "Smartcard reader bridge over a simulated driver", long_about = None)]
struct Args {
    /// Plugin configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device filter file (TOML list of [[device]] entries)
    #[arg(long)]
    filter: Option<PathBuf>,

    /// Allowed reader, as VID=XXXX&PID=YYYY (repeatable)
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Simulate a BLE reader instead of USB
    #[arg(long)]
    ble: bool,

    /// Scan window in seconds (defaults to the configured value)
    #[arg(long)]
    scan_secs: Option<u64>,

    /// APDU to send, as hex
    #[arg(long, default_value = "00A4040000")]
    apdu: String,

    /// Response the simulated card returns, as hex
    #[arg(long, default_value = "9000")]
    response: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<PluginConfig> {
    let mut config = match &args.config {
        Some(path) => PluginConfig::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PluginConfig::default(),
    };

    if let Some(path) = &args.filter {
        config.filter = DeviceFilter::load_from_file(path)
            .with_context(|| format!("loading device filter from {}", path.display()))?;
    }

    let extra = DeviceFilter::parse_keys(args.devices.iter().map(String::as_str))
        .context("parsing --device")?;
    for key in extra.iter() {
        config.filter.allow(*key);
    }

    if config.filter.is_empty() {
        warn!("No device filter configured, allowing {}", DEMO_READER);
        config.filter.allow(DEMO_READER);
    }

    if let Some(secs) = args.scan_secs {
        if secs == 0 {
            bail!("--scan-secs must be positive");
        }
        config.scan_timeout = Duration::from_secs(secs);
    }

    Ok(config)
}

/// Play the user and the reader hardware on the simulated driver.
fn simulate_hardware(driver: MockTransportHandle, device: DeviceHandle, atr: Vec<u8>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        info!("Simulated reader {} plugged in", device.identifier);
        driver.attach(device.clone());

        let prompt = TransportCall::RequestAuthorization(device.identifier.clone());
        while !driver.calls().contains(&prompt) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        info!("Simulated user grants access to {}", device.identifier);
        driver.grant(&device.identifier);

        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Simulated card inserted in {}", device.identifier);
        driver.insert_card(&device.identifier, atr);
    });
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let command = hex_to_bytes(&args.apdu).context("parsing --apdu")?;
    let response = hex_to_bytes(&args.response).context("parsing --response")?;

    let kind = if args.ble {
        TransportKind::Ble
    } else {
        TransportKind::Usb
    };
    let key = config.filter.iter().min().copied().unwrap_or(DEMO_READER);
    let identifier = match kind {
        TransportKind::Usb => "usb-001-004",
        TransportKind::Ble => "C4:7F:51:00:12:34",
    };

    let (transport, driver, events) = MockTransport::with_kind(kind);
    let scan_timeout = config.scan_timeout;
    let plugin = Arc::new(PluginFacade::new(config, Arc::new(transport)));
    let event_loop = plugin.clone().spawn_event_loop(events);

    simulate_hardware(
        driver.clone(),
        DeviceHandle::new(identifier, "Simulated Reader", key, kind),
        vec![0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0],
    );

    info!("Scanning for readers ({}s)...", scan_timeout.as_secs());
    let devices = plugin.scan(scan_timeout, true).await?;
    let Some(device) = devices.first() else {
        bail!("no matching reader found");
    };
    info!("Found {}", device);

    let reader = plugin.connect_to_device(device.identifier()).await?;
    reader.set_contactless(kind == TransportKind::Ble).on_start_detection();

    reader.wait_for_card_insertion().await?;
    info!("ATR: {}", reader.power_on_data()?);

    reader.open_physical_channel().await?;
    driver.queue_response(response);

    let reply = reader.transmit_apdu(&command).await?;
    println!("{} -> {}", bytes_to_hex(&command), bytes_to_hex(&reply));

    reader.close_physical_channel()?;
    reader.on_stop_detection();
    plugin.shutdown();
    event_loop.abort();
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    if let Err(e) = run(args).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
