//! relaygl viewer — entry point.
//!
//! ```text
//! relaygl-viewer                  Run in the foreground
//! relaygl-viewer --config <path>  Load a custom config TOML
//! relaygl-viewer --gen-config     Write default config to stdout
//! relaygl-viewer --ssl --port N   Override the network section
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relaygl_viewer::config::ViewerConfig;
use relaygl_viewer::service::ViewerService;
use relaygl_viewer::sink::StatsSink;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "relaygl-viewer", about = "relaygl frame session receiver")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "relaygl-viewer.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Listen on this port instead of the configured one.
    #[arg(short, long)]
    port: Option<u16>,

    /// Require TLS on every session.
    #[arg(long)]
    ssl: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if cli.port.is_some() {
        config.network.port = cli.port;
    }
    config.network.ssl |= cli.ssl;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("relaygl-viewer v{}", env!("CARGO_PKG_VERSION"));
    info!("port: {}", config.port());
    info!("ssl: {}", config.network.ssl);

    let interval = Duration::from_secs(config.stats.report_interval_secs.max(1));
    let service = ViewerService::new(config, Arc::new(StatsSink::new(interval)));

    let stop = service.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;
    Ok(())
}
