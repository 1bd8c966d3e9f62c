//! Node configuration and its validation.

use crate::error::{Error, Result};
use crate::message::INVALID_ID;
use crate::storage::NO_LIMIT;

/// Everything a `Raft` needs to know at construction.
#[derive(Clone, Debug)]
pub struct Config {
    /// This node's id. Must be nonzero (0 means "no node").
    pub id: u64,
    /// Ids of every voter in the cluster, this node included.
    pub peers: Vec<u64>,
    /// Election timeout in ticks. The effective timeout is randomized in
    /// `[election_tick, 2 * election_tick)` on every reset to break
    /// repeated split votes.
    pub election_tick: u32,
    /// Heartbeat interval in ticks. Must be shorter than the election
    /// timeout or followers will keep campaigning against a live leader.
    pub heartbeat_tick: u32,
    /// Index of the last entry already applied by the embedder, when
    /// restarting from existing state.
    pub applied: u64,
    /// Run a pre-vote round before real elections, so a partitioned node
    /// rejoining cannot disrupt a stable leader with an inflated term.
    pub pre_vote: bool,
    /// Leader lease: reject campaigns while a current leader is known to
    /// be live within the last election timeout.
    pub check_quorum: bool,
    /// Payload byte budget per AppendEntries message.
    pub max_size_per_msg: u64,
    /// Seed for the election jitter. Fixing it makes a node's behavior a
    /// pure function of its inputs; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            id: INVALID_ID,
            peers: Vec::new(),
            election_tick: 10,
            heartbeat_tick: 1,
            applied: 0,
            pre_vote: false,
            check_quorum: false,
            max_size_per_msg: NO_LIMIT,
            seed: None,
        }
    }
}

impl Config {
    pub fn new(id: u64, peers: Vec<u64>) -> Config {
        Config {
            id,
            peers,
            ..Config::default()
        }
    }

    /// Check every constraint, naming the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.id == INVALID_ID {
            return Err(Error::InvalidConfig("id must not be zero".into()));
        }
        if self.peers.is_empty() {
            return Err(Error::InvalidConfig("peers must not be empty".into()));
        }
        if !self.peers.contains(&self.id) {
            return Err(Error::InvalidConfig(format!(
                "peers must contain this node's id {}",
                self.id
            )));
        }
        if self.peers.contains(&INVALID_ID) {
            return Err(Error::InvalidConfig("peer id 0 is reserved".into()));
        }
        if self.election_tick == 0 {
            return Err(Error::InvalidConfig(
                "election tick must be at least one tick".into(),
            ));
        }
        if self.heartbeat_tick == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat tick must be at least one tick".into(),
            ));
        }
        if self.heartbeat_tick >= self.election_tick {
            return Err(Error::InvalidConfig(
                "election tick must be greater than heartbeat tick".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ticks_are_valid() {
        let config = Config::new(1, vec![1, 2, 3]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(Config::new(0, vec![1]).validate().is_err());
        assert!(Config::new(1, vec![]).validate().is_err());
        assert!(Config::new(1, vec![2, 3]).validate().is_err());
        assert!(Config::new(1, vec![0, 1]).validate().is_err());

        let mut config = Config::new(1, vec![1]);
        config.election_tick = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new(1, vec![1]);
        config.heartbeat_tick = config.election_tick;
        assert!(config.validate().is_err());
    }
}
