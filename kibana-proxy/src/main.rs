use anyhow::{Context, Result};
use clap::Parser;
use kibana_proxy::proxy::IdentityExtractor;
use kibana_proxy::{
    ConfigLoader, ConfigValidator, HyperTransport, ProxyController, ProxyServer,
    ProxyServerConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kibana-proxy")]
#[command(about = "Multi-tenant reverse proxy that scopes Kibana to a user's projects")]
struct Args {
    /// Config file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Address to listen on (overrides server.listen)
    #[arg(long, short = 'l')]
    listen: Option<String>,

    /// Upstream Kibana URL (overrides upstream.url)
    #[arg(long, short = 'u')]
    upstream: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut config = ConfigLoader::load_or_default(args.config)?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.url = upstream;
    }
    ConfigValidator::validate(&config)?;

    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.listen))?;

    let membership = config.static_membership();
    let principals = membership.principals();
    let controller = ProxyController::new(
        HyperTransport::new(config.upstream.timeout()),
        membership,
        &config,
    )?;
    let server = ProxyServer::new(
        ProxyServerConfig {
            listen,
            identity: IdentityExtractor::from_config(&config.identity)?,
        },
        controller,
    );

    info!(
        upstream = %config.upstream.url,
        mount_path = %config.server.mount_path,
        default_index = %config.tenancy.default_index,
        principals,
        "Starting kibana-proxy"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    server.start(shutdown).await?;
    Ok(())
}
