//! capsheetd - cap-table assistant daemon.
//!
//! Listens on localhost TCP, speaks JSONL, and turns chat into spreadsheet
//! edit plans via a generative oracle.

mod dialog;
mod dispatch;
mod jobs;
mod server;
mod session;
mod settings;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use capsheet_oracle::{HttpOracle, Oracle};
use clap::Parser;

use crate::dispatch::AppState;
use crate::server::Daemon;
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "capsheetd", version, about = "Cap-table assistant daemon")]
struct Args {
    /// TCP port to listen on (overrides settings.toml)
    #[arg(long, env = "CAPSHEET_PORT")]
    port: Option<u16>,

    /// Alternate settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let port = args.port.unwrap_or(settings.port);

    let oracle_config = settings.oracle_config();
    log::info!("oracle endpoint: {} (model {})", oracle_config.endpoint, oracle_config.model);
    let oracle: Arc<dyn Oracle> = match HttpOracle::new(oracle_config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("oracle configuration invalid: {}", e);
            std::process::exit(1);
        }
    };

    let mut daemon = Daemon::new();
    if let Err(e) = daemon.start(port, AppState::new(oracle)) {
        log::error!("failed to bind 127.0.0.1:{}: {}", port, e);
        std::process::exit(1);
    }

    daemon.join();
}
