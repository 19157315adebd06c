use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pmoconfig::{init_config, load_sources};
use pmoserver::{
    ProxyOptions, ServerBuilder, build_proxy_router,
    logs::{LoggingOptions, init_logging},
};
use tracing::info;

/// PMOIcyProxy - relays audio streams and adds ICY stream titles
///
/// Each source of the SOURCES file is served at `/<source id>`.
#[derive(Parser, Debug)]
#[command(name = "PMOIcyProxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sources file (JSON, or YAML for .yaml/.yml)
    sources: PathBuf,

    /// HTTP listen address, `host:port` or `:port`
    #[arg(short, long)]
    listen: Option<String>,

    /// Configuration file (defaults to $PMOICY_CONFIG or .pmoicy/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = init_config(args.config.as_deref())?;
    if let Some(listen) = &args.listen {
        config.set_listen(listen)?;
    }

    if let Err(e) = init_logging(LoggingOptions::from_config(&config)) {
        eprintln!("⚠️ Logging already initialised: {}", e);
    }

    info!("📻 Loading sources from {}", args.sources.display());
    let sources = load_sources(&args.sources).context("Error parsing sources")?;

    let mut server = ServerBuilder::new_configured()?.build();
    let options = ProxyOptions::from_config(&config)?;
    let router = build_proxy_router(&sources, options, server.shutdown_token())
        .context("Error setting up proxy handlers")?;
    server.add_router("/", router);

    let addr = server.start().await.context("Error starting HTTP server")?;
    info!("✅ {} source(s) relayed on http://{}", sources.len(), addr);

    server.wait().await?;
    info!("👋 PMOIcyProxy stopped");
    Ok(())
}
