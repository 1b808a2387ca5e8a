//! Raft error types.

use crate::types::NodeId;
use thiserror::Error;

/// Raft errors.
#[derive(Error, Debug)]
pub enum RaftError {
    /// Leader-only operation attempted on a non-leader. Expected and common;
    /// carries the last known leader for redirection.
    #[error("not leader (known leader: {leader:?})")]
    NotLeader { leader: Option<NodeId> },

    /// Operation after `stop()`.
    #[error("node is stopped")]
    Stopped,

    /// Absent file, snapshot, or entry.
    #[error("not found")]
    NotFound,

    /// Caller contract violation (bad id, empty batch, missing transport).
    #[error("invalid argument: {reason}")]
    InvalidArg { reason: String },

    /// An inbound message failed to decode; the frame is dropped.
    #[error("malformed message: {reason}")]
    InvalidMessage { reason: &'static str },

    /// Recovered state is internally inconsistent.
    #[error("corruption: {reason}")]
    Corruption { reason: String },

    /// Snapshot could not be produced or installed.
    #[error("snapshot failed: {reason}")]
    SnapshotFailed { reason: String },

    /// Invalid node configuration.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Durable storage failure; no state observed through a reply may depend
    /// on the failed write.
    #[error("storage error: {source}")]
    Store {
        #[from]
        source: kuri_store::StoreError,
    },

    /// Direct I/O failure outside the store.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl RaftError {
    pub(crate) fn invalid_arg(reason: impl Into<String>) -> Self {
        RaftError::InvalidArg {
            reason: reason.into(),
        }
    }
}

/// Raft result type.
pub type Result<T> = std::result::Result<T, RaftError>;
