use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kevinbot_mc::config::DriverConfig;
use kevinbot_mc::runtime::{self, DriveMode, RuntimeResult};

/// KevinbotMC motor controller tool
#[derive(Debug, Parser)]
#[command(name = "kevinbot-mc", version)]
struct Cli {
    /// Serial port of the motor controller
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// JSON driver config (port, baud, signals, settings, flash_save)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the in-memory simulator instead of a serial port
    #[arg(long)]
    sim: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the handshake and print the motor identity
    Info,
    /// Enable telemetry signals and print snapshots as JSON lines
    Monitor {
        /// Signal ids; defaults to the config file's list
        #[arg(long, value_delimiter = ',')]
        signals: Vec<u16>,
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
    },
    /// Hold a drive command, then return to neutral and disable
    Drive {
        #[arg(value_enum)]
        mode: DriveMode,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        target: f32,
        #[arg(long, default_value_t = 2.0)]
        seconds: f64,
    },
    /// Apply the config file's settings
    Configure,
}

fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> RuntimeResult<()> {
    let mut config = match &cli.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(baud) = cli.baud {
        config.baud = baud;
    }

    let motor = runtime::connect(&config, cli.sim)?;

    let result = match cli.command {
        Command::Info => {
            let info = runtime::info(&motor);
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Monitor { signals, seconds } => {
            let signals = if signals.is_empty() {
                config.signals.clone()
            } else {
                signals
            };
            runtime::monitor(
                &motor,
                &signals,
                Duration::from_secs_f64(seconds),
                |sample| match serde_json::to_string(sample) {
                    Ok(line) => println!("{}", line),
                    Err(e) => eprintln!("Failed to serialize sample: {}", e),
                },
            )
        }
        Command::Drive {
            mode,
            target,
            seconds,
        } => runtime::drive(&motor, mode.control(target), Duration::from_secs_f64(seconds)),
        Command::Configure => {
            let applied = runtime::configure(&motor, &config)?;
            println!("Applied {} setting(s)", applied);
            Ok(())
        }
    };

    motor.stop();
    result
}
