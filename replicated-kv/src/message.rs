//! JSON bodies exchanged between nodes and with clients.

use serde::{Deserialize, Serialize};

use crate::election::Role;
use crate::modification::Modification;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub log_size: usize,
    pub src: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub vote_granted: bool,
}

/// Replicates entries to a follower; an empty list is a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: u64,
    pub modifications: Vec<Modification>,
    pub src: String,
}

impl AppendEntries {
    pub fn heartbeat(term: u64, src: String) -> Self {
        Self {
            term,
            modifications: Vec::new(),
            src,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationsRequest {
    pub sn_from: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationsResponse {
    pub modifications: Vec<Modification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueBody {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasBody {
    pub value: String,
    pub old_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBody {
    pub id: u64,
}

/// Point-in-time view of a node, served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub host: String,
    pub role: Role,
    pub term: u64,
    pub leader: String,
    pub log_size: usize,
    pub disabled: bool,
}
