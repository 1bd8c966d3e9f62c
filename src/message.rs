//! Wire model shared by every node: log entries, persisted hard state,
//! snapshots, and the single message record all RPCs travel in.
//!
//! Only the semantic shape matters to the core; byte encoding is the
//! transport's concern. Everything derives serde so embedders can pick any
//! codec.

use serde::{Deserialize, Serialize};

/// Identifies "no node": no leader is known, no vote has been cast.
pub const INVALID_ID: u64 = 0;

/// Identifies "no entry". Valid log indices start at 1.
pub const INVALID_INDEX: u64 = 0;

/// Kind of payload an entry carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Opaque command for the user state machine.
    #[default]
    Normal,
    /// Cluster membership change.
    ConfChange,
}

/// A single entry in the replicated log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_type: EntryType,
    pub term: u64,
    pub index: u64,
    pub data: Vec<u8>,
}

impl Entry {
    /// An empty entry at the given position, as appended by a new leader.
    pub fn new(index: u64, term: u64) -> Entry {
        Entry {
            index,
            term,
            ..Entry::default()
        }
    }

    /// The byte size this entry contributes to a message's size budget.
    pub fn payload_size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// State that must be persisted before any message referencing it is sent.
///
/// `term` only grows. `vote` names at most one peer per term and is cleared
/// whenever the term advances. `commit` only grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

impl HardState {
    pub fn is_empty(&self) -> bool {
        *self == HardState::default()
    }
}

/// Cluster membership as recorded in a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfState {
    pub voters: Vec<u64>,
}

/// Position and membership captured by a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub conf_state: ConfState,
    pub index: u64,
    pub term: u64,
}

/// A point-in-time image of the user state machine, replacing the log
/// prefix up to and including `metadata.index`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// A snapshot with no position is the "no snapshot available" sentinel.
    pub fn is_empty(&self) -> bool {
        self.metadata.index == INVALID_INDEX
    }
}

/// Every RPC the protocol speaks.
///
/// Hup, Beat, Prop and SnapStatus are node-local triggers and never travel
/// between peers; they are stepped with `term == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Local: start an election.
    Hup,
    /// Local: broadcast a heartbeat round.
    Beat,
    /// Local: client proposal.
    Prop,
    /// AppendEntries request.
    App,
    /// AppendEntries response.
    AppResp,
    /// RequestVote request.
    Vote,
    /// RequestVote response.
    VoteResp,
    /// Pre-vote request; probes electability without bumping terms.
    PreVote,
    /// Pre-vote response.
    PreVoteResp,
    /// Leader liveness probe carrying the follower's commit index.
    Heartbeat,
    /// Heartbeat response.
    HeartbeatResp,
    /// Snapshot transfer, sent when the needed log prefix is compacted.
    Snap,
    /// Local: report of a snapshot transfer's outcome.
    SnapStatus,
}

impl MessageType {
    /// Whether this kind is a node-local trigger rather than a peer RPC.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            MessageType::Hup | MessageType::Beat | MessageType::Prop | MessageType::SnapStatus
        )
    }

    /// The response kind paired with a vote request kind.
    pub fn vote_response(self) -> MessageType {
        match self {
            MessageType::Vote => MessageType::VoteResp,
            MessageType::PreVote => MessageType::PreVoteResp,
            _ => panic!("not a vote request: {:?}", self),
        }
    }
}

/// The one record every RPC travels in. Which fields are meaningful depends
/// on `msg_type`; unused fields stay at their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub to: u64,
    pub from: u64,
    /// Sender's term. Zero marks a node-local message.
    pub term: u64,
    /// Term of the entry at `index` (App: the entry preceding `entries`;
    /// Vote/PreVote: the candidate's last entry).
    pub log_term: u64,
    pub index: u64,
    pub entries: Vec<Entry>,
    pub commit: u64,
    pub snapshot: Option<Snapshot>,
    pub reject: bool,
    /// On a rejected App: the receiver's last index, hinting where to retry.
    pub reject_hint: u64,
}

impl Default for Message {
    fn default() -> Message {
        Message {
            msg_type: MessageType::Hup,
            to: INVALID_ID,
            from: INVALID_ID,
            term: 0,
            log_term: 0,
            index: 0,
            entries: Vec::new(),
            commit: 0,
            snapshot: None,
            reject: false,
            reject_hint: 0,
        }
    }
}

impl Message {
    /// A message of the given kind with every other field defaulted.
    pub fn new(msg_type: MessageType) -> Message {
        Message {
            msg_type,
            ..Message::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_kinds() {
        assert!(MessageType::Hup.is_local());
        assert!(MessageType::Beat.is_local());
        assert!(MessageType::Prop.is_local());
        assert!(MessageType::SnapStatus.is_local());
        assert!(!MessageType::App.is_local());
        assert!(!MessageType::Vote.is_local());
        assert!(!MessageType::PreVoteResp.is_local());
    }

    #[test]
    fn vote_response_pairing() {
        assert_eq!(MessageType::Vote.vote_response(), MessageType::VoteResp);
        assert_eq!(
            MessageType::PreVote.vote_response(),
            MessageType::PreVoteResp
        );
    }

    #[test]
    #[should_panic]
    fn vote_response_rejects_non_vote() {
        MessageType::App.vote_response();
    }

    #[test]
    fn empty_snapshot_sentinel() {
        assert!(Snapshot::default().is_empty());

        let mut snap = Snapshot::default();
        snap.metadata.index = 5;
        snap.metadata.term = 2;
        assert!(!snap.is_empty());
    }
}
