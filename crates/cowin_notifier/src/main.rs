//! Main entry point for the CoWin slot notifier.
//! Polls the CoWin API for the requested area and emails recipients when slots open up.

use clap::Parser;

mod cli;
mod scan_manager;

use cli::Cli;
use scan_manager::ScanManager;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(cli.log_level()));

    log::info!("🚀 Starting CoWin slot notifier...");

    let manager = match ScanManager::start(&cli).await {
        Ok(manager) => manager,
        Err(e) => {
            log::error!("❌ Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = manager.run().await {
        log::error!("❌ Scan stopped with an error: {:#}", e);
        std::process::exit(1);
    }

    log::info!("👋 Goodbye");
}
