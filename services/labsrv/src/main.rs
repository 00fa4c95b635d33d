//! Laboratory Instrument Communication Service (`labsrv`)
//!
//! Reads the instrument configuration, starts one connection supervisor
//! per analyzer, and drains the merged event stream into structured logs
//! until shutdown.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use labsrv::config::LabsrvConfig;
use labsrv::runtime::LinkRegistry;

#[derive(Debug, Parser)]
#[command(name = "labsrv", about = "Laboratory instrument communication service")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "labsrv.yaml", env = "LABSRV_CONFIG")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = LabsrvConfig::load(&args.config)?;
    if args.validate {
        println!(
            "Configuration OK: {} instrument(s)",
            config.instruments.len()
        );
        return Ok(());
    }

    // Guard must outlive the event loop or file logging loses its tail
    let _log_guard = labsrv::logging::init(&config.log)?;
    info!("Starting labsrv: {} instrument(s)", config.instruments.len());

    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(config.event_channel_capacity);
    let mut registry = LinkRegistry::new();
    for instrument in &config.instruments {
        registry.start(instrument, event_tx.clone());
    }
    // Supervisors hold their own clones
    drop(event_tx);

    if registry.is_empty() {
        warn!("No instruments configured, nothing to do");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            },
            event = event_rx.recv() => {
                let Some(event) = event else {
                    info!("All links ended");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "labsrv::events", "{}", json),
                    Err(e) => error!("Event serialization failed: {}", e),
                }
            },
        }
    }

    registry.shutdown().await;
    info!("labsrv stopped");
    Ok(())
}
