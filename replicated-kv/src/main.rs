use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use replicated_kv::{
    cli::{Cli, ClusterArgs, Command, NodeArgs},
    config::ClusterConfig,
    node::Node,
    server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Node(args) => run_node(args).await,
        Command::Cluster(args) => run_cluster(args).await,
    }
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let config = args.cluster_config()?;
    let addr = args.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let node = Node::start(config, args.timing()?).await?;
    server::serve_until_ctrl_c(listener, node).await
}

/// Starts every member on its own port, then waits for ctrl-c.
async fn run_cluster(args: ClusterArgs) -> Result<()> {
    let ports = args.ports()?;
    let timing = args.timing()?;

    for (index, port) in ports.iter().enumerate() {
        let listener = TcpListener::bind((args.host.as_str(), *port))
            .await
            .with_context(|| format!("failed to bind {}:{port}", args.host))?;
        let config = ClusterConfig::from_ports(index, &args.host, &ports)?;
        let node = Node::start(config, timing).await?;

        tokio::spawn(async move {
            if let Err(err) = server::serve_until(listener, node, std::future::pending()).await {
                warn!(index, error = ?err, "node server exited with error");
            }
        });
    }

    info!(nodes = ports.len(), "cluster running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("cluster shutting down");
    Ok(())
}
