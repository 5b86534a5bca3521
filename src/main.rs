//! linelog: a newline-delimited record log server
//!
//! Clients send arbitrary bytes over TCP; every newline-terminated record is
//! durably appended to a shared on-disk log, and the full accumulated log is
//! echoed back after each commit. SIGINT/SIGTERM stop the server cleanly and
//! remove the log file.
//!
//! Features:
//! - Newline framing across arbitrary receive chunk boundaries
//! - Synced appends (a reported commit is on stable storage)
//! - One connection serviced at a time, so commit order equals receive order
//! - Optional daemon mode (-d)
//! - Configuration via CLI arguments or TOML file

mod config;
mod daemon;
mod framer;
mod server;
mod shutdown;
mod store;

use config::Config;
use server::Server;
use shutdown::ShutdownController;
use store::RecordStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        data_file = %config.data_file.display(),
        daemon = config.daemon,
        "Starting linelog server"
    );

    // Detach before the runtime exists so the child owns the event loop.
    if config.daemon {
        daemon::daemonize()?;
    }

    // All network and file I/O runs on a single logical thread; the only
    // asynchrony is signal delivery, observed through the shutdown channel.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let controller = ShutdownController::new();
        controller.listen_for_signals()?;

        let store = RecordStore::create(&config.data_file).await?;
        let server = Server::bind(&config, store, controller.subscribe()).await?;
        server.run().await?;

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    info!("Server exited cleanly");
    Ok(())
}
