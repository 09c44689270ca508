//! Havoc - an HTTP chaos proxy.
//!
//! Starts one listener serving three surfaces:
//! - `/proxy/*` - the chaos proxy path, forwarded to the configured upstream
//! - the management API (`/config`, `/rules`, `/logs`, `/health`, `/metrics`)
//! - `/ws` - real-time log stream
//!
//! # Examples
//!
//! ```bash
//! havoc                                      # listen on port 3001
//! havoc --port 8080                          # custom port
//! havoc --target-url http://localhost:4000   # seed the upstream target
//! PORT=9000 havoc                            # port via environment
//! ```

use clap::Parser;
use havoc_proxy::engine::{Engine, ProxyConfig};
use havoc_proxy::server::ProxyServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Havoc - an HTTP chaos proxy for exercising clients against adverse
/// network and server conditions.
#[derive(Parser, Debug)]
#[command(name = "havoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port serving the proxy, management, and WebSocket surfaces
    #[arg(long, default_value = "3001", env = "PORT")]
    port: u16,

    /// Hostname to bind
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Upstream base URL requests on /proxy/* are forwarded to
    #[arg(long, env = "TARGET_URL")]
    target_url: Option<String>,

    /// Start with the chaos pipeline disabled (toggle via PUT /config)
    #[arg(long)]
    disabled: bool,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    loglevel: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Install default cryptographic provider for rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let log_level = match cli.loglevel.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let target_url = cli.target_url.unwrap_or_default();
        if target_url.is_empty() {
            info!("No target URL configured; set one via PUT /config before proxying");
        } else {
            info!("Proxying to {}", target_url);
        }

        let engine = Arc::new(Engine::new(ProxyConfig {
            target_url,
            enabled: !cli.disabled,
        }));

        let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
        let server = ProxyServer::bind(addr, engine).await?;
        server.run().await
    })
}
