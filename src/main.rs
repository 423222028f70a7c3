//! tcp-echo: A concurrent TCP echo server
//!
//! Each client's bytes are accumulated until it closes its write side and
//! are then sent back unmodified, after which the connection is closed.
//!
//! Features:
//! - One task per connection; slow clients never block new ones
//! - Listens on all IPv4 interfaces by default
//! - Configuration via CLI arguments or TOML file

mod config;
mod handler;
mod listener;
mod server;

use clap::error::ErrorKind;
use clap::CommandFactory;
use config::{CliArgs, Config, ConfigError};
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::MissingPort) => CliArgs::command()
            .error(ErrorKind::MissingRequiredArgument, ConfigError::MissingPort)
            .exit(),
        Err(e) => return Err(e.into()),
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = ?config.workers,
        backlog = config.backlog,
        chunk_size = config.chunk_size,
        "Starting tcp-echo server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    // 0 falls back to the runtime default
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    // Listener failures are fatal
    let server = Server::new(config);
    if let Err(e) = runtime.block_on(server.run()) {
        error!(error = %e, "Listener failed");
        std::process::exit(1);
    }

    Ok(())
}
