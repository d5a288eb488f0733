//! MQTT-SN filter configuration tool
//!
//! Validates and normalises the settings file a filter instance is started
//! with.

use clap::{Parser, Subcommand};
use mqttsn_filter::config::{FilterSettings, SessionConfig};
use mqttsn_filter::observability::init_default_logging;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};

/// MQTT-SN client filter settings tool
#[derive(Parser)]
#[command(name = "mqttsn-filter")]
#[command(about = "Check and normalise MQTT-SN client filter settings")]
#[command(version)]
struct Cli {
    /// Settings file path
    #[arg(short, long, value_name = "FILE", env = "MQTTSN_FILTER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the settings file
    Check,
    /// Print the settings as the filter would persist them
    Show {
        /// Engine retry period used when the file sets none
        #[arg(long, default_value_t = 15_000)]
        engine_retry_period_ms: u64,
        /// Engine retry count used when the file sets none
        #[arg(long, default_value_t = 3)]
        engine_retry_count: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Loading settings from: {}", cli.config.display());
    let settings = match FilterSettings::load_from_file(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Check => {
            info!(
                subscriptions = settings.subscribes.len(),
                "Settings are valid"
            );
            println!("{}: ok", cli.config.display());
            Ok(())
        }
        Commands::Show {
            engine_retry_period_ms,
            engine_retry_count,
        } => show(
            &settings,
            Duration::from_millis(engine_retry_period_ms),
            engine_retry_count,
        ),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn show(
    settings: &FilterSettings,
    engine_retry_period: Duration,
    engine_retry_count: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig::from_settings(settings, engine_retry_period, engine_retry_count)?;
    print!("{}", config.to_settings().to_toml_string()?);
    Ok(())
}
