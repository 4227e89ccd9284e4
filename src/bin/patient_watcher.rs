//! Patient page watcher
//!
//! Usage:
//!   patient_watcher                     - use ./config.yml
//!   patient_watcher --config ward.yml   - use another config
//!   patient_watcher --once              - check every patient once and exit

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use patient_notifier::commands::watch::{load_config, Watcher};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patient_watcher")]
#[command(about = "Watch patient pages and send WhatsApp alerts on change", long_about = None)]
struct Cli {
    /// Path to the configuration file (YAML)
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Run a single pass over all patients instead of looping
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("patient_notifier=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        patients = config.patient_ids.len(),
        notify = config.notify.enabled,
        "watcher configured"
    );

    let watcher = Watcher::new(config).context("building HTTP client")?;

    if cli.once {
        watcher.check_all().await;
        return Ok(());
    }

    watcher.run().await?;
    Ok(())
}
