use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use log::{LevelFilter, debug, error, info, warn};
use tokio::sync::broadcast;

use lancol_monitor::mqtt::DryRunBroker;
use lancol_monitor::radio;
use lancol_monitor::{
    AppConfig, Broker, BtleRadio, DeviceFilter, MqttBroker, ScanSession, SessionConfig,
    SessionEvent, SessionOutcome, TelemetryPublisher,
};

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_TIMEOUT: i32 = 2;

/// Progress is logged at info level this often; every tick goes to debug.
const PROGRESS_LOG_EVERY: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, about = "Publish a Lancol battery monitor's voltage to MQTT", version)]
struct Options {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Scan budget in seconds, overriding `[scan] duration_seconds`
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    duration: Option<u64>,

    /// Index of the Bluetooth adapter to scan with
    #[arg(long, default_value_t = 0)]
    adapter: usize,

    /// Decode and report the reading without publishing it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    let options = Options::parse();

    let code = match run(options).await {
        Ok(SessionOutcome::Completed { .. }) => EXIT_SUCCESS,
        Ok(SessionOutcome::TimedOut { .. }) => EXIT_TIMEOUT,
        Err(err) => {
            error!("{:#}", err);
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(options: Options) -> anyhow::Result<SessionOutcome> {
    let config = AppConfig::from_file(&options.config)
        .with_context(|| format!("Loading {}", options.config.display()))?;

    let filter = config.sensor.device_filter()?;
    let mut session_config = config.session_config()?;
    if let Some(seconds) = options.duration {
        session_config.budget = Duration::from_secs(seconds);
    }

    let adapter = radio::adapter(options.adapter)
        .await
        .context("Opening Bluetooth adapter")?;
    let radio = BtleRadio::new(adapter);

    if options.dry_run {
        let publisher = TelemetryPublisher::new(DryRunBroker, config.topic());
        run_session(session_config, filter, radio, publisher).await
    } else {
        let publisher = TelemetryPublisher::new(MqttBroker::new(&config.mqtt), config.topic());
        run_session(session_config, filter, radio, publisher).await
    }
}

async fn run_session<B: Broker>(
    config: SessionConfig,
    filter: DeviceFilter,
    radio: BtleRadio,
    publisher: TelemetryPublisher<B>,
) -> anyhow::Result<SessionOutcome> {
    let mut session = ScanSession::new(config, filter, radio, publisher);
    let presenter = tokio::spawn(present(session.subscribe()));

    let outcome = session.run().await;
    drop(session);
    if let Err(err) = presenter.await {
        debug!("Presenter ended abnormally: {:?}", err);
    }

    let outcome = outcome?;
    if let SessionOutcome::Completed { reading, publish } = &outcome {
        println!("Lancol BLE Sensor Telemetry");
        println!("  {:<16}{}", "Name", reading.name);
        println!("  {:<16}{}", "Device Address", reading.address);
        println!("  {:<16}{:.2} V", "Voltage", reading.voltage);
        println!("  {:<16}{} dBm", "Signal", reading.signal);
        println!(
            "  {:<16}{} (rc {})",
            "Published",
            publish.acknowledged,
            publish.result_code
        );
    }
    Ok(outcome)
}

async fn present(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Started { budget }) => {
                info!("Scanning for Lancol BLE devices, {}s budget", budget.as_secs());
            }
            Ok(SessionEvent::Progress { elapsed, remaining }) => {
                if elapsed.as_secs() % PROGRESS_LOG_EVERY.as_secs() == 0 {
                    info!("{} sec left", remaining.as_secs());
                } else {
                    debug!("{} sec left", remaining.as_secs());
                }
            }
            Ok(SessionEvent::DecodeFailed { address, error }) => {
                warn!("Matched {} but could not decode: {}", address, error);
            }
            Ok(SessionEvent::Matched(reading)) => {
                debug!("Matched {:?}", reading);
            }
            Ok(SessionEvent::Published(outcome)) => {
                debug!("Published {:?}", outcome);
            }
            Ok(SessionEvent::TimedOut { elapsed }) => {
                warn!("No matching device after {}s", elapsed.as_secs());
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Presenter lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
