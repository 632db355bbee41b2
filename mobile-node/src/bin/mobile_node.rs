//! Mobile node binary entry point.
//!
//! Opens (or initializes) a repository, starts a node on it and serves the
//! configured API and gateway addresses until Ctrl-C.

use anyhow::{bail, Context, Result};
use clap::Parser;
use mobile_node::application_service::config_patch::ConfigPatch;
use mobile_node::{init_repo, open_repo, repo_is_initialized, Config, Node, NodeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Mobile node CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "mobile-node")]
#[command(about = "P2P node with mobile-friendly networking defaults")]
struct Args {
    /// Repository directory.
    #[arg(short, long, default_value = ".mobile-node")]
    repo: PathBuf,

    /// Initialize the repository if it does not exist.
    #[arg(long)]
    init: bool,

    /// Serve the API on 127.0.0.1 at this port instead of the configured addresses.
    #[arg(long)]
    api_port: Option<u16>,

    /// Serve the gateway on 127.0.0.1 at this port instead of the configured addresses.
    #[arg(long)]
    gateway_port: Option<u16>,

    /// Accept writes on the gateway.
    #[arg(long)]
    writable: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn loopback(port: u16) -> String {
    format!("/ip4/127.0.0.1/tcp/{}", port)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    tracing::info!("Starting mobile node");
    tracing::info!("Repository: {:?}", args.repo);

    if !repo_is_initialized(&args.repo) {
        if !args.init {
            bail!(
                "no repository at {}, run with --init to create one",
                args.repo.display()
            );
        }
        let config = Config::default_config().context("Failed to generate config")?;
        init_repo(&args.repo, &config).context("Failed to initialize repository")?;
    }
    let repo = open_repo(&args.repo).context("Failed to open repository")?;

    let api_port = args.api_port;
    let gateway_port = args.gateway_port;
    let ports: ConfigPatch = Arc::new(move |config: &mut Config| {
        if let Some(port) = api_port {
            config.addresses.api = vec![loopback(port)].into();
        }
        if let Some(port) = gateway_port {
            config.addresses.gateway = vec![loopback(port)].into();
        }
        Ok(())
    });
    let override_ports = api_port.is_some() || gateway_port.is_some();
    repo.apply_patches([override_ports.then_some(ports)])
        .context("Failed to apply address overrides")?;

    let node = Node::new(repo.clone(), NodeConfig::default())
        .await
        .context("Failed to create node")?;
    tracing::info!("Peer ID: {}", node.peer_id());

    if args.writable {
        let config = repo.config()?;
        for addr in config.addresses.api.iter() {
            node.serve_api_multiaddr(addr).await?;
        }
        for addr in config.addresses.gateway.iter() {
            node.serve_gateway_multiaddr(addr, true).await?;
        }
    } else {
        node.serve_config().await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    node.close().await?;
    repo.repo().close().context("Failed to close repository")?;
    Ok(())
}
