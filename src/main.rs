use std::path::PathBuf;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use motion_sentinel::config::Config;
use motion_sentinel::detector::DetectorHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ultrasonic motion detector with indicator LED
#[derive(Parser, Debug)]
#[command(name = "motion-sentinel", version, about)]
struct Args {
    /// Config file (defaults to ~/.config/motion-sentinel/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// GPIO TRIG pin
    #[arg(long)]
    trig: Option<u8>,

    /// GPIO ECHO pin
    #[arg(long)]
    echo: Option<u8>,

    /// GPIO LED pin
    #[arg(long)]
    led: Option<u8>,

    /// Detection distance threshold in cm
    #[arg(long)]
    threshold: Option<f64>,

    /// Use the simulated sensor instead of GPIO
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let args = Args::parse();

    let config = load_config(&args).await?;
    info!("Detection threshold: {}cm", config.distance_threshold_cm);
    info!("Release timeout: {}s", config.release_timeout_seconds);

    let cancel = CancellationToken::new();
    let detector = DetectorHandle::spawn(&config, cancel.clone())
        .map_err(|e| eyre!("Failed to start motion detector: {}", e))?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutdown requested");

    detector.stop();
    let stats = detector
        .join()
        .await
        .map_err(|e| eyre!("Motion detector did not shut down cleanly: {}", e))?;
    info!(
        "Exiting after {} samples and {} activations",
        stats.samples, stats.activations
    );

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path).await?,
        None => Config::load_default().await?,
    };
    config.apply_env();

    if let Some(trig) = args.trig {
        config.trig_channel = trig;
    }
    if let Some(echo) = args.echo {
        config.echo_channel = echo;
    }
    if let Some(led) = args.led {
        config.indicator_channel = led;
    }
    if let Some(threshold) = args.threshold {
        config.distance_threshold_cm = threshold;
    }
    config.simulate |= args.simulate;

    // Flags are applied after the file was validated
    config.validate()?;
    Ok(config)
}
