//! A single cluster member: election machine, log and replication.
//!
//! [`Node`] owns two locks. `state` guards role, term, votes, believed leader,
//! the disabled flag and the three role timers. `log` guards the replicated
//! log. When both are needed `state` is taken first. Neither lock is held
//! while waiting on a peer.
//!
//! Timers hold a `Weak` reference back to the node, so dropping the last
//! `Arc<Node>` stops every timer.

use std::sync::{Arc, Weak};

use anyhow::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, Timing};
use crate::election::{ElectionState, Role};
use crate::error::{NodeError, StorageError};
use crate::message::{AppendEntries, ModificationsResponse, NodeStatus, VoteRequest, VoteResponse};
use crate::modification::Modification;
use crate::peer::{PeerClient, Replicator};
use crate::storage::ReplicatedLog;

/// How many catch-up rounds a replicated append may go through before the
/// request is abandoned.
pub const MAX_CATCH_UP_ATTEMPTS: usize = 8;

pub struct Node {
    config: ClusterConfig,
    timing: Timing,
    other_hosts: Vec<String>,
    peers: PeerClient,
    replicator: Replicator,
    state: Mutex<ElectionState>,
    log: Mutex<ReplicatedLog>,
    catch_up: Mutex<()>,
}

impl Node {
    /// Creates the node and arms its initial timer.
    ///
    /// The first configured host starts as leader without an immediate
    /// heartbeat; everyone else starts as follower with a randomized election
    /// timer. Must be called from within a Tokio runtime.
    pub async fn start(config: ClusterConfig, timing: Timing) -> Result<Arc<Self>> {
        let peers = PeerClient::new(timing.request_timeout)?;
        let other_hosts = config.other_hosts();
        let replicator = Replicator::spawn(&peers, other_hosts.clone());
        let role = if config.is_initial_leader() {
            Role::Leader
        } else {
            Role::Follower
        };
        let state = ElectionState::new(role, config.initial_leader().to_string());

        let node = Arc::new(Self {
            config,
            timing,
            other_hosts,
            peers,
            replicator,
            state: Mutex::new(state),
            log: Mutex::new(ReplicatedLog::new()),
            catch_up: Mutex::new(()),
        });

        {
            let mut state = node.state.lock().await;
            let role = state.role;
            match role {
                Role::Leader => node.become_leader(&mut state),
                _ => node.become_follower(&mut state),
            }
        }

        info!(
            host = %node.own_host(),
            peers = node.other_hosts.len(),
            "node started"
        );
        Ok(node)
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn own_host(&self) -> &str {
        self.config.own_host()
    }

    pub async fn status(&self) -> NodeStatus {
        let log_size = self.log.lock().await.len();
        let state = self.state.lock().await;
        NodeStatus {
            host: self.own_host().to_string(),
            role: state.role,
            term: state.term,
            leader: state.leader_host.clone(),
            log_size,
            disabled: state.disabled,
        }
    }

    /// Host this node voted for in `term`.
    pub async fn vote_for(&self, term: u64) -> Option<String> {
        self.state.lock().await.vote_for(term).map(str::to_string)
    }

    pub async fn log_entries(&self) -> Vec<Modification> {
        self.log.lock().await.entries().to_vec()
    }

    // --- Role transitions ---------------------------------------------------

    fn become_leader(self: &Arc<Self>, state: &mut ElectionState) {
        if state.role != Role::Leader {
            info!(host = %self.own_host(), term = state.term, "became leader");
        }
        state.role = Role::Leader;
        state.leader_host = self.own_host().to_string();
        state.election_timer.cancel();
        state.voting_timer.cancel();
        self.arm_heartbeat(state);
    }

    fn become_follower(self: &Arc<Self>, state: &mut ElectionState) {
        if state.role != Role::Follower {
            info!(
                host = %self.own_host(),
                term = state.term,
                leader = %state.leader_host,
                "became follower"
            );
        }
        state.role = Role::Follower;
        state.heartbeat_timer.cancel();
        state.voting_timer.cancel();
        self.restart_election_timer(state);
    }

    /// Pushes the election deadline back. Only followers run this timer.
    fn restart_election_timer(self: &Arc<Self>, state: &mut ElectionState) {
        if state.role != Role::Follower {
            return;
        }
        let timeout = self.timing.election_timeout();
        let (node, term) = (Arc::downgrade(self), state.term);
        state.election_timer.arm(timeout, |generation| {
            election_task(node, term, ElectionTrigger::LeaderTimeout(generation))
        });
    }

    fn arm_heartbeat(self: &Arc<Self>, state: &mut ElectionState) {
        let node = Arc::downgrade(self);
        state
            .heartbeat_timer
            .arm(self.timing.heartbeat_interval, |_| heartbeat_task(node));
    }

    // --- Elections and heartbeats -------------------------------------------

    /// Runs (or re-runs) an election for `term`.
    ///
    /// Does nothing if the node became leader, moved to another term, or was
    /// disabled since the election was scheduled, or if the timer behind
    /// `trigger` was re-armed or cancelled after it fired. The term only
    /// advances once the election is won.
    async fn run_election(self: &Arc<Self>, term: u64, trigger: ElectionTrigger) {
        let log_size = self.log.lock().await.len();

        let (request, own_vote) = {
            let mut state = self.state.lock().await;
            if state.role == Role::Leader || state.term != term || state.disabled {
                return;
            }
            if !trigger.is_current(&state) {
                debug!(host = %self.own_host(), term, ?trigger, "stale election timer");
                return;
            }
            if state.role == Role::Candidate {
                info!(host = %self.own_host(), term, "repeating election");
            } else {
                info!(host = %self.own_host(), term, "starting election");
            }
            state.role = Role::Candidate;
            let node = Arc::downgrade(self);
            state.voting_timer.arm(self.timing.voting_timeout, |generation| {
                election_task(node, term, ElectionTrigger::VotingTimeout(generation))
            });

            let own_vote = state.grant_vote(term, self.own_host(), log_size, log_size);
            let request = VoteRequest {
                term,
                log_size,
                src: self.own_host().to_string(),
            };
            (request, own_vote)
        };

        let granted = self.peers.collect_votes(&self.other_hosts, &request).await;
        let votes = usize::from(own_vote) + granted;

        let heartbeat = {
            let mut state = self.state.lock().await;
            if state.role != Role::Candidate || state.term != term || state.disabled {
                debug!(host = %self.own_host(), term, "election outcome no longer relevant");
                return;
            }
            if votes < self.config.majority() {
                info!(
                    host = %self.own_host(),
                    term,
                    votes,
                    needed = self.config.majority(),
                    "election undecided"
                );
                return;
            }

            state.voting_timer.cancel();
            state.term += 1;
            self.become_leader(&mut state);
            AppendEntries::heartbeat(state.term, self.own_host().to_string())
        };

        self.peers.broadcast(&self.other_hosts, &heartbeat).await;
    }

    /// Heartbeat timer tick: re-arms itself, then pings every peer.
    async fn send_heartbeat(self: &Arc<Self>) {
        let heartbeat = {
            let mut state = self.state.lock().await;
            if state.role != Role::Leader || state.disabled {
                return;
            }
            self.arm_heartbeat(&mut state);
            AppendEntries::heartbeat(state.term, self.own_host().to_string())
        };
        self.peers.broadcast(&self.other_hosts, &heartbeat).await;
    }

    // --- Inbound RPCs -------------------------------------------------------

    pub async fn request_vote(self: &Arc<Self>, request: VoteRequest) -> Result<VoteResponse, NodeError> {
        let own_log_size = self.log.lock().await.len();

        let mut state = self.state.lock().await;
        if state.disabled {
            return Err(NodeError::Disabled);
        }
        if state.observe_term(request.term, &request.src)? {
            self.become_follower(&mut state);
        }

        let vote_granted =
            state.grant_vote(request.term, &request.src, request.log_size, own_log_size);
        if vote_granted {
            info!(
                host = %self.own_host(),
                term = request.term,
                candidate = %request.src,
                "granted vote"
            );
        }
        Ok(VoteResponse { vote_granted })
    }

    /// Accepts a heartbeat or replicated entries from the leader.
    pub async fn append_entries(self: &Arc<Self>, request: AppendEntries) -> Result<(), NodeError> {
        {
            let mut state = self.state.lock().await;
            if state.disabled {
                return Err(NodeError::Disabled);
            }
            if state.observe_term(request.term, &request.src)? {
                self.become_follower(&mut state);
            } else {
                self.restart_election_timer(&mut state);
            }
        }

        for modification in request.modifications {
            self.append_replicated(modification).await?;
        }
        Ok(())
    }

    /// Serves the log suffix starting at `sn_from`. Leader only.
    pub async fn request_modifications(&self, sn_from: u64) -> Result<ModificationsResponse, NodeError> {
        {
            let state = self.state.lock().await;
            ensure_leader(&state)?;
        }
        let modifications = self.log.lock().await.entries_from(sn_from);
        Ok(ModificationsResponse { modifications })
    }

    // --- Replication and catch-up -------------------------------------------

    /// Appends an entry received from the leader, catching up first whenever
    /// the entry lies past the end of the local log.
    async fn append_replicated(&self, modification: Modification) -> Result<(), NodeError> {
        let mut missing_from = modification.sn;

        for attempt in 1..=MAX_CATCH_UP_ATTEMPTS {
            let result = self.log.lock().await.add_modification(modification.clone());
            match result {
                Ok(()) => return Ok(()),
                Err(StorageError::GapDetected { from }) => {
                    missing_from = from;
                    info!(
                        host = %self.own_host(),
                        from,
                        sn = modification.sn,
                        attempt,
                        "gap in log, catching up"
                    );
                    if let Err(err) = self.catch_up(from, modification.sn).await {
                        warn!(host = %self.own_host(), from, error = %err, "catch-up failed");
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(NodeError::CatchUpExhausted {
            from: missing_from,
            attempts: MAX_CATCH_UP_ATTEMPTS,
        })
    }

    /// Fetches the entries in `[from, until)` from the believed leader and
    /// applies them in order.
    ///
    /// Catch-ups are serialized; entries that a concurrent catch-up already
    /// appended are skipped. Entries from `until` onward are left to the
    /// caller's retry.
    async fn catch_up(&self, from: u64, until: u64) -> Result<(), reqwest::Error> {
        let _guard = self.catch_up.lock().await;

        let leader = self.state.lock().await.leader_host.clone();
        let start = from.max(self.log.lock().await.generate_sn());
        let modifications = self.peers.request_modifications(&leader, start).await?;

        let mut log = self.log.lock().await;
        let mut applied = 0usize;
        for modification in modifications {
            if modification.sn >= until {
                break;
            }
            if modification.sn < log.generate_sn() {
                continue;
            }
            let sn = modification.sn;
            if let Err(err) = log.add_modification(modification) {
                warn!(host = %self.own_host(), sn, error = %err, "fetched entry rejected");
                break;
            }
            applied += 1;
        }
        debug!(host = %self.own_host(), %leader, start, until, applied, "caught up");
        Ok(())
    }

    // --- Client operations --------------------------------------------------

    /// Appends a new entry built from the next sequence number and queues it
    /// for replication.
    ///
    /// The election lock is held throughout, so concurrent writes get
    /// consecutive sequence numbers and reach every peer's queue in log order.
    async fn write<F>(&self, build: F) -> Result<Modification, NodeError>
    where
        F: FnOnce(u64) -> Modification,
    {
        let state = self.state.lock().await;
        ensure_leader(&state)?;

        let mut log = self.log.lock().await;
        let modification = build(log.generate_sn());
        log.add_modification(modification.clone())?;
        debug!(
            host = %self.own_host(),
            sn = modification.sn,
            id = modification.id,
            kind = ?modification.kind,
            "appended locally"
        );

        self.replicator.replicate(AppendEntries {
            term: state.term,
            modifications: vec![modification.clone()],
            src: self.own_host().to_string(),
        });
        Ok(modification)
    }

    /// Creates a key holding `value`. The key id is the entry's sequence number.
    pub async fn create(&self, value: String) -> Result<u64, NodeError> {
        let modification = self.write(|sn| Modification::create(sn, sn, value)).await?;
        Ok(modification.id)
    }

    pub async fn read(&self, id: u64) -> Result<Option<String>, NodeError> {
        if self.state.lock().await.disabled {
            return Err(NodeError::Disabled);
        }
        Ok(self.log.lock().await.get_value(id)?)
    }

    pub async fn update(&self, id: u64, value: String) -> Result<(), NodeError> {
        self.write(|sn| Modification::update(sn, id, value)).await?;
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<(), NodeError> {
        self.write(|sn| Modification::delete(sn, id)).await?;
        Ok(())
    }

    pub async fn compare_and_swap(
        &self,
        id: u64,
        old_value: String,
        value: String,
    ) -> Result<(), NodeError> {
        self.write(|sn| Modification::cas(sn, id, old_value, value))
            .await?;
        Ok(())
    }

    // --- Administration -----------------------------------------------------

    /// Simulates a crash: stops all timers and rejects every request.
    pub async fn disable(&self) {
        let mut state = self.state.lock().await;
        state.disabled = true;
        state.cancel_timers();
        info!(host = %self.own_host(), "disabled");
    }

    /// Brings the node back: a leader resumes heartbeats, anything else
    /// rejoins as a follower waiting for a leader.
    pub async fn enable(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if !state.disabled {
            return;
        }
        state.disabled = false;
        let role = state.role;
        match role {
            Role::Leader => self.arm_heartbeat(&mut state),
            _ => self.become_follower(&mut state),
        }
        info!(host = %self.own_host(), role = %state.role, term = state.term, "enabled");
    }
}

fn ensure_leader(state: &ElectionState) -> Result<(), NodeError> {
    if state.disabled {
        return Err(NodeError::Disabled);
    }
    if !state.is_leader() {
        return Err(NodeError::NotLeader {
            leader: state.leader_host.clone(),
        });
    }
    Ok(())
}

// Timer callbacks are plain functions returning boxed futures: the node's
// async methods arm timers that call back into those same methods.

/// The timer that scheduled an election run, with the generation it was
/// armed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElectionTrigger {
    LeaderTimeout(u64),
    VotingTimeout(u64),
}

impl ElectionTrigger {
    fn is_current(self, state: &ElectionState) -> bool {
        match self {
            Self::LeaderTimeout(generation) => state.election_timer.is_current(generation),
            Self::VotingTimeout(generation) => state.voting_timer.is_current(generation),
        }
    }
}

fn election_task(node: Weak<Node>, term: u64, trigger: ElectionTrigger) -> BoxFuture<'static, ()> {
    async move {
        if let Some(node) = node.upgrade() {
            node.run_election(term, trigger).await;
        }
    }
    .boxed()
}

fn heartbeat_task(node: Weak<Node>) -> BoxFuture<'static, ()> {
    async move {
        if let Some(node) = node.upgrade() {
            node.send_heartbeat().await;
        }
    }
    .boxed()
}
