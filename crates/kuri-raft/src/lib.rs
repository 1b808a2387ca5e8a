//! kuri-raft: a Raft consensus core.
//!
//! A single replica is one passive [`Raft`] object driven by three event
//! sources:
//! - `tick(elapsed_ms)` — advances election and heartbeat timers
//! - `receive(from, bytes)` — decodes and dispatches peer RPCs
//! - the local client API — propose, read, transfer, add/remove node
//!
//! Features:
//! - Leader election with randomized timeouts and optional PreVote
//! - Log replication with consistency check and conflict truncation
//! - Majority commit with the current-term restriction
//! - Durable term/vote/log/snapshot via kuri-store, with crash recovery
//! - Snapshot install and automatic log compaction
//! - Single-step membership changes
//! - Linearizable reads via ReadIndex
//! - Graceful leadership transfer with TimeoutNow
//!
//! Based on the Raft paper (Ongaro & Ousterhout, 2014).
//!
//! There are no internal threads: durability and I/O run inline on the
//! calling thread, and all entry points serialize through `&mut self`. A
//! process may drive many independent nodes, each with its own single-writer
//! discipline.

pub mod config;
pub mod election;
pub mod error;
pub mod log;
pub mod membership;
pub mod raft;
pub mod read_index;
pub mod recovery;
pub mod replication;
pub mod rpc;
pub mod snapshot;
pub mod timer;
pub mod transfer;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testutil;

pub use config::RaftConfig;
pub use error::{RaftError, Result};
pub use membership::{ConfigOp, PendingChange};
pub use raft::Raft;
pub use read_index::ReadCallback;
pub use recovery::RecoveryReport;
pub use rpc::Message;
pub use transport::{FrameQueue, QueueTransport, QueuedFrame, StateMachine, Transport};
pub use types::*;
