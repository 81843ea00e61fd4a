//! Test harness running a real cluster on localhost.
//!
//! Every node gets an ephemeral port and an axum server in a background task.
//! Timers are scaled down so elections finish in well under a second.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use replicated_kv::config::{ClusterConfig, Timing};
use replicated_kv::election::Role;
use replicated_kv::message::NodeStatus;
use replicated_kv::node::Node;
use replicated_kv::server;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub fn fast_timing() -> Timing {
    Timing {
        leader_timeout_min: Duration::from_millis(400),
        leader_timeout_max: Duration::from_millis(900),
        voting_timeout: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(100),
        request_timeout: Duration::from_millis(250),
    }
}

pub struct TestCluster {
    nodes: Vec<Arc<Node>>,
    servers: Vec<JoinHandle<()>>,
    pub http: reqwest::Client,
}

impl TestCluster {
    /// Binds every listener first so each node knows the real peer ports.
    pub async fn spawn(n: usize) -> Result<Self> {
        let mut listeners = Vec::with_capacity(n);
        let mut ports = Vec::with_capacity(n);
        for _ in 0..n {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            ports.push(listener.local_addr()?.port());
            listeners.push(listener);
        }

        let mut nodes = Vec::with_capacity(n);
        let mut servers = Vec::with_capacity(n);
        for (index, listener) in listeners.into_iter().enumerate() {
            let config = ClusterConfig::from_ports(index, "127.0.0.1", &ports)?;
            let node = Node::start(config, fast_timing()).await?;
            let served = node.clone();
            servers.push(tokio::spawn(async move {
                let _ = server::serve_until(listener, served, std::future::pending()).await;
            }));
            nodes.push(node);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            nodes,
            servers,
            http,
        })
    }

    pub fn node(&self, index: usize) -> &Arc<Node> {
        &self.nodes[index]
    }

    pub fn host(&self, index: usize) -> &str {
        self.nodes[index].config().own_host()
    }

    pub async fn statuses(&self) -> Vec<NodeStatus> {
        let mut statuses = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            statuses.push(node.status().await);
        }
        statuses
    }

    /// Waits until exactly one enabled node in `candidates` is leader at a
    /// term above `min_term`. Returns its index.
    pub async fn wait_for_new_leader(
        &self,
        candidates: &[usize],
        min_term: u64,
        timeout: Duration,
    ) -> Result<usize> {
        let start = Instant::now();
        loop {
            let mut leaders = Vec::new();
            for &index in candidates {
                let status = self.nodes[index].status().await;
                if status.role == Role::Leader && !status.disabled && status.term > min_term {
                    leaders.push(index);
                }
            }
            if leaders.len() == 1 {
                return Ok(leaders[0]);
            }
            if start.elapsed() > timeout {
                bail!("timeout waiting for a new leader, saw {leaders:?}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until node `index` holds `len` log entries.
    pub async fn wait_for_log_len(&self, index: usize, len: usize, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            let status = self.nodes[index].status().await;
            if status.log_size == len {
                return Ok(());
            }
            if start.elapsed() > timeout {
                bail!(
                    "timeout waiting for node {index} to hold {len} entries, has {}",
                    status.log_size
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until node `index` follows the node at `leader`.
    pub async fn wait_for_follower_of(
        &self,
        index: usize,
        leader: usize,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        let leader_host = self.host(leader).to_string();
        loop {
            let status = self.nodes[index].status().await;
            if status.role == Role::Follower && status.leader == leader_host {
                return Ok(());
            }
            if start.elapsed() > timeout {
                bail!("timeout waiting for node {index} to follow node {leader}: {status:?}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.disable().await;
        }
        for server in self.servers {
            server.abort();
        }
    }
}
