//! Virtual-clock timers.
//!
//! Nothing in the core reads a wall clock; `tick(elapsed_ms)` is the only
//! source of time. The election timeout is redrawn uniformly from the
//! configured range on every reset, which desynchronizes competing
//! candidates and prevents repeated split votes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Election and heartbeat timers for one node.
#[derive(Debug)]
pub struct Timers {
    range_ms: (u64, u64),
    heartbeat_interval_ms: u64,
    election_elapsed_ms: u64,
    election_timeout_ms: u64,
    heartbeat_elapsed_ms: u64,
    rng: StdRng,
}

impl Timers {
    /// `seed` makes the timeout sequence deterministic for tests.
    pub fn new(range_ms: (u64, u64), heartbeat_interval_ms: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut timers = Timers {
            range_ms,
            heartbeat_interval_ms,
            election_elapsed_ms: 0,
            election_timeout_ms: 0,
            heartbeat_elapsed_ms: 0,
            rng,
        };
        timers.reset_election();
        timers
    }

    /// Redraw the timeout and restart the election clock.
    pub fn reset_election(&mut self) {
        self.election_elapsed_ms = 0;
        self.election_timeout_ms = self.rng.gen_range(self.range_ms.0..=self.range_ms.1);
    }

    pub fn reset_heartbeat(&mut self) {
        self.heartbeat_elapsed_ms = 0;
    }

    /// Advance the election clock; true when the timeout fired.
    pub fn advance_election(&mut self, elapsed_ms: u64) -> bool {
        self.election_elapsed_ms += elapsed_ms;
        self.election_elapsed_ms >= self.election_timeout_ms
    }

    /// Advance the heartbeat clock; true (and reset) when a pulse is due.
    pub fn advance_heartbeat(&mut self, elapsed_ms: u64) -> bool {
        self.heartbeat_elapsed_ms += elapsed_ms;
        if self.heartbeat_elapsed_ms >= self.heartbeat_interval_ms {
            self.heartbeat_elapsed_ms = 0;
            return true;
        }
        false
    }

    /// The election clock has passed its deadline without a reset.
    ///
    /// Used by the PreVote grant rule: a node whose own timer has expired
    /// would itself stand for election, so it may grant a pre-vote even if
    /// it still remembers a leader.
    pub fn election_expired(&self) -> bool {
        self.election_elapsed_ms >= self.election_timeout_ms
    }

    /// Current (randomized) election timeout; also bounds transfer patience.
    pub fn election_timeout_ms(&self) -> u64 {
        self.election_timeout_ms
    }
}
