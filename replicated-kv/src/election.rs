//! Role, term and vote bookkeeping for one node.
//!
//! [`ElectionState`] is plain data guarded by a single lock inside
//! [`crate::node::Node`]. It decides what a message means for the local role
//! and term; the node turns those decisions into timer changes and network
//! calls once the lock is released.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::timer::TimerSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Leader,
    Follower,
    Candidate,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Leader => "leader",
            Role::Follower => "follower",
            Role::Candidate => "candidate",
        };
        f.write_str(name)
    }
}

/// Everything the election machine mutates, plus the timers tied to roles.
///
/// Keeping the timer slots next to the role means a role change and the
/// matching timer cancellation happen under the same lock.
#[derive(Debug)]
pub struct ElectionState {
    pub role: Role,
    pub term: u64,
    pub leader_host: String,
    pub disabled: bool,
    votes_history: HashMap<u64, String>,
    pub(crate) election_timer: TimerSlot,
    pub(crate) heartbeat_timer: TimerSlot,
    pub(crate) voting_timer: TimerSlot,
}

impl ElectionState {
    pub fn new(role: Role, leader_host: String) -> Self {
        Self {
            role,
            term: 0,
            leader_host,
            disabled: false,
            votes_history: HashMap::new(),
            election_timer: TimerSlot::default(),
            heartbeat_timer: TimerSlot::default(),
            voting_timer: TimerSlot::default(),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Host this node voted for in `term`, if any.
    pub fn vote_for(&self, term: u64) -> Option<&str> {
        self.votes_history.get(&term).map(String::as_str)
    }

    /// Rejects messages from an older term and adopts a newer one.
    ///
    /// Returns `true` when `term` was newer: the caller must then step down to
    /// follower. The claimed leader `src` is recorded in that case only.
    pub fn observe_term(&mut self, term: u64, src: &str) -> Result<bool, NodeError> {
        if term < self.term {
            return Err(NodeError::StaleTerm {
                received: term,
                current: self.term,
            });
        }
        if term > self.term {
            self.term = term;
            self.leader_host = src.to_string();
            return Ok(true);
        }
        Ok(false)
    }

    /// Records a vote for `candidate` in `term` unless one is already on
    /// record, and only when the candidate's log is at least as long as ours.
    ///
    /// The vote is granted iff the record for `term` names `candidate`, so a
    /// candidate asking twice gets the same answer.
    pub fn grant_vote(
        &mut self,
        term: u64,
        candidate: &str,
        candidate_log_size: usize,
        own_log_size: usize,
    ) -> bool {
        if candidate_log_size >= own_log_size {
            self.votes_history
                .entry(term)
                .or_insert_with(|| candidate.to_string());
        }
        self.vote_for(term) == Some(candidate)
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.election_timer.cancel();
        self.heartbeat_timer.cancel();
        self.voting_timer.cancel();
    }
}
