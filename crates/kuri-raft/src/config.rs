//! Node configuration (timeouts, limits, tuning parameters).

use crate::types::NodeId;
use std::path::PathBuf;

/// Raft node configuration.
///
/// Timeouts are in virtual milliseconds, advanced only by `tick`; nothing in
/// the core reads a wall clock.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This node's id. Must be `< num_nodes` at bootstrap.
    pub node_id: NodeId,

    /// Bootstrap cluster size; voters are numbered `0..num_nodes`.
    /// Membership changes may grow or shrink the set afterwards.
    pub num_nodes: u32,

    /// Data directory for durable state. `None` disables persistence.
    pub data_dir: Option<PathBuf>,

    /// Election timeout range `[min, max)` in ms, drawn uniformly per reset.
    ///
    /// Randomization desynchronizes competing candidates and eliminates
    /// repeated split votes.
    ///
    /// Default: (150, 300)
    pub election_timeout_ms: (u64, u64),

    /// Leader heartbeat interval in ms. Must be well below the election
    /// timeout minimum.
    ///
    /// Default: 50
    pub heartbeat_interval_ms: u64,

    /// Maximum entries shipped in one AppendEntries.
    ///
    /// Default: 100
    pub max_entries_per_append: usize,

    /// Take a snapshot and compact once this many entries accumulate past
    /// the last snapshot. Requires a state machine and a data dir.
    ///
    /// Default: 10_000
    pub auto_compaction_threshold: u64,

    /// Run PreVote rounds before real elections. A partitioned node then
    /// cannot disrupt a healthy leader by inflating terms.
    ///
    /// Default: false
    pub prevote_enabled: bool,

    /// fsync state and log writes before replying.
    ///
    /// Default: true
    pub sync_writes: bool,

    /// Seed for the election-timeout RNG. Deterministic tests set this;
    /// production leaves it `None` for entropy.
    pub timer_seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(0),
            num_nodes: 1,
            data_dir: None,
            election_timeout_ms: (150, 300),
            heartbeat_interval_ms: 50,
            max_entries_per_append: 100,
            auto_compaction_threshold: 10_000,
            prevote_enabled: false,
            sync_writes: true,
            timer_seed: None,
        }
    }
}

impl RaftConfig {
    /// Validate the configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_nodes == 0 {
            return Err("num_nodes must be >= 1".to_string());
        }
        if self.node_id.as_u32() >= self.num_nodes {
            return Err(format!(
                "node_id {} out of range for {} nodes",
                self.node_id, self.num_nodes
            ));
        }
        let (min, max) = self.election_timeout_ms;
        if min == 0 || min >= max {
            return Err(format!(
                "election timeout range ({min}, {max}) must satisfy 0 < min < max"
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_interval_ms >= min {
            return Err(format!(
                "heartbeat_interval_ms ({}) must be > 0 and < election timeout min ({min})",
                self.heartbeat_interval_ms
            ));
        }
        if self.max_entries_per_append == 0 {
            return Err("max_entries_per_append must be > 0".to_string());
        }
        Ok(())
    }
}
