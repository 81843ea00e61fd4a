use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{ClusterConfig, Timing};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single cluster member.
    Node(NodeArgs),
    /// Run every member of a local cluster inside this process.
    Cluster(ClusterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Position of this node in PORTS. Node 0 starts as leader.
    pub index: usize,

    /// Ports of every cluster member, in cluster order.
    #[arg(required = true)]
    pub ports: Vec<u16>,

    /// Host name peers use to reach cluster members.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Address the HTTP listener binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Multiplier for election, voting and heartbeat timers.
    #[arg(long, default_value_t = 1.0)]
    pub time_scale: f64,
}

impl NodeArgs {
    pub fn cluster_config(&self) -> Result<ClusterConfig> {
        ClusterConfig::from_ports(self.index, &self.host, &self.ports)
    }

    pub fn timing(&self) -> Result<Timing> {
        Timing::scaled(self.time_scale)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let port = self
            .ports
            .get(self.index)
            .copied()
            .with_context(|| format!("no port for node index {}", self.index))?;
        Ok(SocketAddr::new(self.bind, port))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Port of node 0; node i listens on start_port + i.
    #[arg(long, default_value_t = 50020)]
    pub start_port: u16,

    /// Number of cluster members.
    #[arg(long, default_value_t = 3)]
    pub nodes: u16,

    /// Host every member listens on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Multiplier for election, voting and heartbeat timers.
    #[arg(long, default_value_t = 1.0)]
    pub time_scale: f64,
}

impl ClusterArgs {
    pub fn ports(&self) -> Result<Vec<u16>> {
        (0..self.nodes)
            .map(|offset| {
                self.start_port
                    .checked_add(offset)
                    .context("cluster ports overflow the port range")
            })
            .collect()
    }

    pub fn timing(&self) -> Result<Timing> {
        Timing::scaled(self.time_scale)
    }
}
