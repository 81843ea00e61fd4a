//! Leader-based replicated key-value store.
//!
//! A fixed set of nodes elects a leader with a simplified Raft-style
//! protocol. The leader appends every client write to its own log and then
//! pushes the entry to its peers on a best-effort basis. A follower that
//! receives an entry past the end of its log fetches the missing suffix from
//! the leader before appending. Key values are never stored: they are derived
//! by replaying the log.
//!
//! # Modules
//!
//! - [`config`]: static membership and protocol timing
//! - [`modification`]: log entry type and its wire shape
//! - [`storage`]: the append-only log and per-key replay
//! - [`election`]: role, term and vote bookkeeping
//! - [`node`]: timers, elections, replication and catch-up for one member
//! - [`peer`]: outbound HTTP calls and the leader's replication queues
//! - [`server`]: axum routes for peers, clients and administration
//! - [`message`]: JSON request and response bodies
//! - [`cli`]: command-line interface of the binary

pub mod cli;
pub mod config;
pub mod election;
pub mod error;
pub mod message;
pub mod modification;
pub mod node;
pub mod peer;
pub mod server;
pub mod storage;
pub mod timer;
