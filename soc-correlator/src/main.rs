/*!
Security event correlator
*/

use std::path::PathBuf;

use clap::{Arg, Command};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use soc_correlator::{Correlator, CorrelatorConfig, load_config, source};

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("soc-correlator").join("config.toml"))
}

async fn resolve_config(
    explicit: Option<&String>,
) -> Result<CorrelatorConfig, Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        return load_config(path).await;
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config(path).await,
        _ => {
            info!("No config file found, using defaults");
            Ok(CorrelatorConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("SOC Correlator")
        .version(clap::crate_version!())
        .about("Correlates security events into enriched alerts in real time")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to a TOML configuration file")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("alerts")
                .short('a')
                .long("alerts")
                .help("Alert ledger file (overrides the config)")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("events")
                .short('e')
                .long("events")
                .help("JSON-lines event file; reads stdin when omitted")
                .value_name("PATH"),
        )
        .get_matches();

    let mut config = resolve_config(matches.get_one::<String>("config")).await?;
    if let Some(alerts) = matches.get_one::<String>("alerts") {
        config.store.alerts_path = PathBuf::from(alerts);
    }

    info!("🛡️ Starting SOC correlator");

    let correlator = Correlator::new(config).await?;
    info!("💾 Alert ledger: {:?}", correlator.store().alerts_path());
    let dispatcher = correlator.start_dispatch()?;

    let feed = async {
        let summary = match matches.get_one::<String>("events") {
            Some(path) => source::ingest_file(&correlator, path).await,
            None => source::ingest_stdin(&correlator).await,
        };
        match summary {
            Ok(summary) => info!(
                "📈 Input finished: {} accepted, {} detections, {} rejected",
                summary.accepted, summary.detected, summary.rejected
            ),
            Err(e) => warn!("Event input failed: {}", e),
        }
        // Keep dispatching queued signals until interrupted.
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = feed => {}
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown");
        }
    }

    dispatcher.shutdown().await;
    info!("🏁 Correlator stopped");
    Ok(())
}
