//! Outbound calls to other cluster members.
//!
//! Every call is bounded by the client's request timeout. A peer that does
//! not answer in time, answers with an error status, or sends a body we
//! cannot parse counts as "no answer": the failure is logged at debug level
//! and the caller moves on.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::message::{
    AppendEntries, ModificationsRequest, ModificationsResponse, VoteRequest, VoteResponse,
};
use crate::modification::Modification;

#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build peer http client")?;
        Ok(Self { http })
    }

    /// Asks `host` for its vote. Any failure is a refusal.
    pub async fn request_vote(&self, host: &str, request: &VoteRequest) -> bool {
        let result = async {
            self.http
                .post(format!("{host}/request_vote"))
                .json(request)
                .send()
                .await?
                .error_for_status()?
                .json::<VoteResponse>()
                .await
        }
        .await;

        match result {
            Ok(response) => response.vote_granted,
            Err(err) => {
                debug!(%host, error = %err, "vote request failed");
                false
            }
        }
    }

    /// Counts granted votes across `hosts`, asking all of them concurrently.
    pub async fn collect_votes(&self, hosts: &[String], request: &VoteRequest) -> usize {
        let answers = join_all(hosts.iter().map(|host| self.request_vote(host, request))).await;
        answers.into_iter().filter(|granted| *granted).count()
    }

    /// Sends entries (or a heartbeat) to `host`. Returns whether it was accepted.
    pub async fn append_entries(&self, host: &str, request: &AppendEntries) -> bool {
        let result = async {
            self.http
                .post(format!("{host}/append_entries"))
                .json(request)
                .send()
                .await?
                .error_for_status()
        }
        .await;

        match result {
            Ok(_) => true,
            Err(err) => {
                debug!(%host, error = %err, "append_entries skipped");
                false
            }
        }
    }

    pub async fn broadcast(&self, hosts: &[String], request: &AppendEntries) {
        join_all(hosts.iter().map(|host| self.append_entries(host, request))).await;
    }

    /// Fetches every entry from `sn_from` onward from the believed leader.
    ///
    /// A node that is no longer leader answers with a redirect, which the
    /// client follows.
    pub async fn request_modifications(
        &self,
        leader: &str,
        sn_from: u64,
    ) -> Result<Vec<Modification>, reqwest::Error> {
        let response = self
            .http
            .post(format!("{leader}/request_modifications"))
            .json(&ModificationsRequest { sn_from })
            .send()
            .await?
            .error_for_status()?
            .json::<ModificationsResponse>()
            .await?;
        Ok(response.modifications)
    }
}

/// Entries that may wait for one peer before new ones are dropped.
pub const OUTBOX_CAPACITY: usize = 32;

/// Leader-side fan-out of new log entries.
///
/// Each peer gets its own bounded queue drained by one task, so entries reach
/// a peer in log order while a slow peer never holds up the others or the
/// client. An entry that fails to send, or that finds the queue full, is
/// dropped; the follower repairs the hole through catch-up the next time it
/// hears from the leader.
#[derive(Debug)]
pub struct Replicator {
    outboxes: Vec<(String, mpsc::Sender<AppendEntries>)>,
}

impl Replicator {
    pub fn spawn(client: &PeerClient, hosts: Vec<String>) -> Self {
        let outboxes = hosts
            .into_iter()
            .map(|host| {
                let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
                tokio::spawn(drain_outbox(client.clone(), host.clone(), rx));
                (host, tx)
            })
            .collect();
        Self { outboxes }
    }

    pub fn replicate(&self, request: AppendEntries) {
        for (host, outbox) in &self.outboxes {
            match outbox.try_send(request.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(%host, "replication outbox full, entry skipped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%host, "replication outbox closed");
                }
            }
        }
    }

    /// Largest number of entries waiting for any single peer.
    #[cfg(test)]
    fn backlog(&self) -> usize {
        self.outboxes
            .iter()
            .map(|(_, outbox)| outbox.max_capacity() - outbox.capacity())
            .max()
            .unwrap_or(0)
    }
}

async fn drain_outbox(
    client: PeerClient,
    host: String,
    mut rx: mpsc::Receiver<AppendEntries>,
) {
    while let Some(request) = rx.recv().await {
        client.append_entries(&host, &request).await;
    }
}
