//! Static cluster membership and protocol timing.
//!
//! Membership never changes at runtime: every node is started with the same
//! ordered list of hosts plus its own index into that list. The host at
//! index 0 starts out as leader.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Result, ensure};
use rand::Rng;

/// Ordered cluster membership as seen by one node.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    index: usize,
    hosts: Vec<String>,
}

impl ClusterConfig {
    /// Builds a config from full host URLs such as `http://127.0.0.1:50020`.
    ///
    /// Trailing slashes are stripped so paths can be appended with `format!`.
    pub fn new(index: usize, hosts: Vec<String>) -> Result<Self> {
        let hosts: Vec<String> = hosts
            .into_iter()
            .map(|host| host.trim_end_matches('/').to_string())
            .collect();

        ensure!(!hosts.is_empty(), "cluster requires at least one host");
        ensure!(
            index < hosts.len(),
            "node index {index} out of range for {} hosts",
            hosts.len()
        );

        let unique: HashSet<&String> = hosts.iter().collect();
        ensure!(unique.len() == hosts.len(), "cluster hosts must be unique");

        Ok(Self { index, hosts })
    }

    /// Builds a config for a cluster where every node listens on `host`.
    pub fn from_ports(index: usize, host: &str, ports: &[u16]) -> Result<Self> {
        let hosts = ports
            .iter()
            .map(|port| format!("http://{host}:{port}"))
            .collect();
        Self::new(index, hosts)
    }

    pub fn own_host(&self) -> &str {
        &self.hosts[self.index]
    }

    /// Every host except this one, in configuration order.
    pub fn other_hosts(&self) -> Vec<String> {
        self.hosts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.index)
            .map(|(_, host)| host.clone())
            .collect()
    }

    pub fn initial_leader(&self) -> &str {
        &self.hosts[0]
    }

    pub fn is_initial_leader(&self) -> bool {
        self.index == 0
    }

    pub fn cluster_size(&self) -> usize {
        self.hosts.len()
    }

    /// Votes needed to win an election: a strict majority of all members.
    pub fn majority(&self) -> usize {
        majority(self.cluster_size())
    }
}

pub fn majority(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// Timer and request durations driving elections and heartbeats.
///
/// Heartbeats must arrive well inside `leader_timeout_min`, and the request
/// timeout must stay small so one dead peer cannot stall an election round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub leader_timeout_min: Duration,
    pub leader_timeout_max: Duration,
    pub voting_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            leader_timeout_min: Duration::from_secs(3),
            leader_timeout_max: Duration::from_secs(5),
            voting_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(1),
            request_timeout: Duration::from_millis(100),
        }
    }
}

impl Timing {
    /// Multiplies every protocol timer by `factor`.
    ///
    /// The per-request timeout is left alone: it bounds network calls, not
    /// protocol pacing.
    pub fn scaled(factor: f64) -> Result<Self> {
        ensure!(
            factor.is_finite() && factor > 0.0,
            "time scale must be a positive number, got {factor}"
        );
        let base = Self::default();
        Ok(Self {
            leader_timeout_min: base.leader_timeout_min.mul_f64(factor),
            leader_timeout_max: base.leader_timeout_max.mul_f64(factor),
            voting_timeout: base.voting_timeout.mul_f64(factor),
            heartbeat_interval: base.heartbeat_interval.mul_f64(factor),
            request_timeout: base.request_timeout,
        })
    }

    /// Draws a fresh election timeout, uniform in the leader timeout range.
    pub fn election_timeout(&self) -> Duration {
        if self.leader_timeout_max <= self.leader_timeout_min {
            return self.leader_timeout_min;
        }
        rand::thread_rng().gen_range(self.leader_timeout_min..=self.leader_timeout_max)
    }
}
