use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use taskwire::cli::ServerOpts;
use taskwire::config::ServerConfig;
use taskwire::{logging, server};

fn main() -> Result<()> {
    let opts = ServerOpts::parse();
    logging::init(logging::SERVER_DEFAULT_FILTER);

    let config = ServerConfig::load(opts.config.as_deref())
        .context("Failed to load server configuration")?
        .with_overrides(opts.bind, opts.storage_dir);

    std::fs::create_dir_all(&config.storage_dir).with_context(|| {
        format!(
            "Failed to create storage directory: {}",
            config.storage_dir.display()
        )
    })?;

    if config.bind.starts_with("0.0.0.0") {
        warn!("binding to all interfaces; the protocol has no authentication or encryption");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(server::serve(&config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received");
    }))
    .with_context(|| format!("Server on {} failed", config.bind))
}
