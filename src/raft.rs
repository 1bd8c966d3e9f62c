//! The Raft state machine: one node's deterministic core.
//!
//! Two inputs drive it: `tick` (one unit of logical time) and `step` (one
//! inbound message). Everything it wants done in the world comes back out
//! through the `Ready` bundle: messages to send, entries to persist, a
//! changed hard state, committed entries to apply.

use std::cmp;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::log::RaftLog;
use crate::message::{Entry, HardState, Message, MessageType, Snapshot, INVALID_ID};
use crate::progress::Progress;
use crate::storage::{Storage, NO_LIMIT};

/// The four roles a node moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleKind {
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

/// Election state carried while campaigning (both the pre-vote round and
/// the real one).
#[derive(Debug, Default)]
pub struct Candidate {
    /// Responses recorded this round; `true` is a grant.
    pub votes: HashMap<u64, bool>,
}

/// Replication state carried while leading.
#[derive(Debug, Default)]
pub struct Leader {
    /// Per-peer progress, this node included.
    pub progress: HashMap<u64, Progress>,
}

/// Role plus the state only that role owns.
#[derive(Debug)]
pub enum Role {
    Follower,
    PreCandidate(Candidate),
    Candidate(Candidate),
    Leader(Leader),
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Follower => RoleKind::Follower,
            Role::PreCandidate(_) => RoleKind::PreCandidate,
            Role::Candidate(_) => RoleKind::Candidate,
            Role::Leader(_) => RoleKind::Leader,
        }
    }
}

/// Which round a campaign is running.
#[derive(Clone, Copy)]
enum CampaignType {
    /// Probe electability without touching the term.
    PreElection,
    /// The real thing.
    Election,
}

/// Everything the embedder must act on after a batch of tick/step calls:
/// persist `entries` and `hard_state` (and `snapshot`), send `messages`,
/// apply `committed_entries`, then call [`Raft::advance`].
#[derive(Debug, Default)]
pub struct Ready {
    /// Changed hard state to persist, if it changed.
    pub hard_state: Option<HardState>,
    /// Unstable entries to persist.
    pub entries: Vec<Entry>,
    /// Committed entries to hand to the state machine, in log order.
    pub committed_entries: Vec<Entry>,
    /// Outbound messages, in the order the core produced them.
    pub messages: Vec<Message>,
    /// A received snapshot to install into storage.
    pub snapshot: Option<Snapshot>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.hard_state.is_none()
            && self.entries.is_empty()
            && self.committed_entries.is_empty()
            && self.messages.is_empty()
            && self.snapshot.is_none()
    }
}

/// A single Raft node.
pub struct Raft<T: Storage> {
    pub id: u64,
    /// Every voter, this node included.
    pub peers: Vec<u64>,
    pub term: u64,
    /// Who we voted for this term; 0 when we haven't.
    pub vote: u64,
    pub role: Role,
    /// The leader we currently follow; 0 when unknown.
    pub leader_id: u64,
    pub log: RaftLog<T>,
    /// Outbound messages, FIFO, drained through `ready`.
    pub mailbox: Vec<Message>,

    election_elapsed: u32,
    heartbeat_elapsed: u32,
    election_tick: u32,
    heartbeat_tick: u32,
    /// Redrawn from `[election_tick, 2 * election_tick)` on every reset.
    randomized_election_tick: u32,
    pre_vote: bool,
    check_quorum: bool,
    max_size_per_msg: u64,
    rng: StdRng,
    prev_hard_state: HardState,
}

impl<T: Storage> Raft<T> {
    pub fn new(config: &Config, storage: T) -> Result<Raft<T>> {
        config.validate()?;
        let (hard_state, _conf_state) = storage.initial_state();
        if config.applied > hard_state.commit {
            return Err(Error::InvalidConfig(format!(
                "applied {} is ahead of commit {}",
                config.applied, hard_state.commit
            )));
        }

        let mut log = RaftLog::new(storage);
        log.committed = hard_state.commit;
        log.applied_to(config.applied);

        let mut peers = config.peers.clone();
        peers.sort_unstable();
        peers.dedup();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut raft = Raft {
            id: config.id,
            peers,
            term: hard_state.term,
            vote: hard_state.vote,
            role: Role::Follower,
            leader_id: INVALID_ID,
            log,
            mailbox: Vec::new(),
            election_elapsed: 0,
            heartbeat_elapsed: 0,
            election_tick: config.election_tick,
            heartbeat_tick: config.heartbeat_tick,
            randomized_election_tick: config.election_tick,
            pre_vote: config.pre_vote,
            check_quorum: config.check_quorum,
            max_size_per_msg: config.max_size_per_msg,
            rng,
            prev_hard_state: hard_state,
        };
        raft.become_follower(hard_state.term, INVALID_ID);
        info!(
            id = raft.id,
            term = raft.term,
            commit = raft.log.committed,
            last_index = raft.log.last_index(),
            "node started"
        );
        Ok(raft)
    }

    /// Majority of the voting set (the progress map when leading, so the
    /// commit quorum always matches the set being counted).
    pub fn quorum(&self) -> usize {
        let n = match &self.role {
            Role::Leader(leader) => leader.progress.len(),
            _ => self.peers.len(),
        };
        n / 2 + 1
    }

    /// The hard state as it stands right now.
    pub fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            vote: self.vote,
            commit: self.log.committed,
        }
    }

    // ---- time ----

    /// Advance logical time by one tick. Followers and candidates count
    /// toward an election; the leader counts toward the next heartbeat
    /// round. Either way the node just steps a local trigger to itself.
    pub fn tick(&mut self) {
        if let Role::Leader(_) = self.role {
            self.heartbeat_elapsed += 1;
            if self.heartbeat_elapsed >= self.heartbeat_tick {
                self.heartbeat_elapsed = 0;
                let mut beat = Message::new(MessageType::Beat);
                beat.to = self.id;
                beat.from = self.id;
                let _ = self.step(beat);
            }
        } else {
            self.election_elapsed += 1;
            if self.election_elapsed >= self.randomized_election_tick {
                self.election_elapsed = 0;
                let mut hup = Message::new(MessageType::Hup);
                hup.to = self.id;
                hup.from = self.id;
                let _ = self.step(hup);
            }
        }
    }

    // ---- role transitions ----

    fn reset(&mut self, term: u64) {
        if term != self.term {
            self.term = term;
            self.vote = INVALID_ID;
        }
        self.leader_id = INVALID_ID;
        self.election_elapsed = 0;
        self.heartbeat_elapsed = 0;
        self.randomized_election_tick = self
            .rng
            .random_range(self.election_tick..2 * self.election_tick);
    }

    pub fn become_follower(&mut self, term: u64, leader_id: u64) {
        assert!(
            term >= self.term,
            "term can only go forward: {} -> {}",
            self.term,
            term
        );
        self.reset(term);
        self.leader_id = leader_id;
        self.role = Role::Follower;
        debug!(id = self.id, term, leader_id, "became follower");
    }

    /// Enter the pre-vote round: no term bump, no vote recorded.
    pub fn become_pre_candidate(&mut self) {
        assert!(
            !matches!(self.role, Role::Leader(_)),
            "invalid transition [leader -> pre-candidate]"
        );
        self.leader_id = INVALID_ID;
        self.role = Role::PreCandidate(Candidate::default());
        debug!(id = self.id, term = self.term, "became pre-candidate");
    }

    pub fn become_candidate(&mut self) {
        assert!(
            !matches!(self.role, Role::Leader(_)),
            "invalid transition [leader -> candidate]"
        );
        self.reset(self.term + 1);
        self.vote = self.id;
        self.role = Role::Candidate(Candidate::default());
        debug!(id = self.id, term = self.term, "became candidate");
    }

    /// Promote a winning candidate. Re-entering leadership is a no-op;
    /// any other starting role is a bug.
    pub fn become_leader(&mut self) {
        match self.role {
            Role::Candidate(_) => {}
            Role::Leader(_) => {
                self.leader_id = self.id;
                return;
            }
            _ => panic!("invalid transition [{:?} -> leader]", self.role.kind()),
        }
        self.reset(self.term);
        self.leader_id = self.id;

        let next_idx = self.log.last_index() + 1;
        let mut progress = HashMap::new();
        for &peer in &self.peers {
            let mut pr = Progress::new(next_idx);
            if peer == self.id {
                pr.matched = self.log.last_index();
                pr.recent_active = true;
            }
            progress.insert(peer, pr);
        }
        self.role = Role::Leader(Leader { progress });
        info!(id = self.id, term = self.term, "became leader");

        // Claim the new term with an empty entry; nothing from older terms
        // can be committed until it is.
        self.append_entries_as_leader(vec![Entry::default()]);
    }

    // ---- step ----

    /// Deliver one inbound message. Protocol-legal rejections answer
    /// through the mailbox and return `Ok`; an error means the message
    /// itself was unusable.
    pub fn step(&mut self, m: Message) -> Result<()> {
        if m.term == 0 {
            // Local trigger; a network message without a term is malformed.
            if !m.msg_type.is_local() {
                debug!(id = self.id, kind = ?m.msg_type, from = m.from, "dropping termless network message");
                return Err(Error::OutOfBound);
            }
        } else if m.term > self.term {
            if matches!(m.msg_type, MessageType::Vote | MessageType::PreVote) {
                // Inside the leader lease a challenger is ignored; it is
                // partitioned, not legitimate.
                let in_lease = self.check_quorum
                    && self.leader_id != INVALID_ID
                    && self.election_elapsed < self.election_tick;
                if in_lease {
                    debug!(
                        id = self.id,
                        from = m.from,
                        term = m.term,
                        "ignoring vote request inside leader lease"
                    );
                    return Ok(());
                }
            }
            match m.msg_type {
                // A pre-vote probe never moves our term.
                MessageType::PreVote => {}
                // A pre-vote grant echoes the future term we asked about.
                MessageType::PreVoteResp if !m.reject => {}
                _ => {
                    let leader_id = match m.msg_type {
                        MessageType::App | MessageType::Heartbeat | MessageType::Snap => m.from,
                        _ => INVALID_ID,
                    };
                    debug!(
                        id = self.id,
                        term = self.term,
                        new_term = m.term,
                        kind = ?m.msg_type,
                        "stepping down to newer term"
                    );
                    self.become_follower(m.term, leader_id);
                }
            }
        } else if m.term < self.term {
            // A stale leader only learns about the new term if someone
            // answers; that matters once lease-based elections are on.
            if (self.check_quorum || self.pre_vote)
                && matches!(m.msg_type, MessageType::App | MessageType::Heartbeat)
            {
                let mut resp = Message::new(MessageType::AppResp);
                resp.to = m.from;
                self.send(resp);
            } else {
                debug!(
                    id = self.id,
                    term = self.term,
                    stale_term = m.term,
                    kind = ?m.msg_type,
                    "dropping message from old term"
                );
            }
            return Ok(());
        }

        match m.msg_type {
            MessageType::Hup => self.handle_hup(),
            MessageType::Vote | MessageType::PreVote => {
                if matches!(self.role, Role::Leader(_)) && m.term == self.term {
                    // An established leader doesn't dignify same-term
                    // challengers with a response.
                    debug!(id = self.id, from = m.from, "leader ignoring same-term vote request");
                } else {
                    self.handle_vote_request(&m);
                }
            }
            _ => match self.role {
                Role::Leader(_) => self.step_leader(m),
                Role::Candidate(_) | Role::PreCandidate(_) => self.step_candidate(m),
                Role::Follower => self.step_follower(m),
            },
        }
        Ok(())
    }

    /// Propose `data` for replication. Sugar over stepping a local `Prop`.
    pub fn propose(&mut self, data: Vec<u8>) -> Result<()> {
        let mut m = Message::new(MessageType::Prop);
        m.to = self.id;
        m.from = self.id;
        m.entries = vec![Entry {
            data,
            ..Entry::default()
        }];
        self.step(m)
    }

    // ---- elections ----

    fn handle_hup(&mut self) {
        if let Role::Leader(_) = self.role {
            debug!(id = self.id, "ignoring election trigger, already leader");
            return;
        }
        info!(id = self.id, term = self.term, "starting a new election");
        if self.pre_vote {
            self.campaign(CampaignType::PreElection);
        } else {
            self.campaign(CampaignType::Election);
        }
    }

    fn campaign(&mut self, campaign_type: CampaignType) {
        let (vote_type, term) = match campaign_type {
            CampaignType::PreElection => {
                self.become_pre_candidate();
                // Asking about the term we would campaign at.
                (MessageType::PreVote, self.term + 1)
            }
            CampaignType::Election => {
                self.become_candidate();
                (MessageType::Vote, self.term)
            }
        };

        // Our own vote may already be the whole quorum.
        let (granted, _) = self.record_vote(self.id, true);
        if granted >= self.quorum() {
            match campaign_type {
                CampaignType::PreElection => self.campaign(CampaignType::Election),
                CampaignType::Election => self.become_leader(),
            }
            return;
        }

        let last_index = self.log.last_index();
        let last_term = self.log.last_term();
        let peers: Vec<u64> = self.peers.iter().copied().filter(|&p| p != self.id).collect();
        for peer in peers {
            let mut m = Message::new(vote_type);
            m.to = peer;
            m.term = term;
            m.index = last_index;
            m.log_term = last_term;
            self.send(m);
        }
    }

    /// Record one response in the current round; returns (grants, rejects).
    fn record_vote(&mut self, from: u64, granted: bool) -> (usize, usize) {
        let votes = match &mut self.role {
            Role::PreCandidate(c) | Role::Candidate(c) => &mut c.votes,
            _ => return (0, 0),
        };
        votes.entry(from).or_insert(granted);
        let grants = votes.values().filter(|&&g| g).count();
        (grants, votes.len() - grants)
    }

    fn handle_vote_request(&mut self, m: &Message) {
        // A repeat of the vote we cast, a clean slate, or a pre-vote probe
        // for a future term.
        let can_vote = self.vote == m.from
            || self.vote == INVALID_ID
            || (m.msg_type == MessageType::PreVote && m.term > self.term);

        if can_vote && self.log.is_up_to_date(m.index, m.log_term) {
            info!(
                id = self.id,
                from = m.from,
                term = m.term,
                kind = ?m.msg_type,
                "granting vote"
            );
            let mut resp = Message::new(m.msg_type.vote_response());
            resp.to = m.from;
            resp.term = m.term;
            self.send(resp);
            if m.msg_type == MessageType::Vote {
                self.election_elapsed = 0;
                self.vote = m.from;
            }
        } else {
            debug!(
                id = self.id,
                from = m.from,
                term = m.term,
                vote = self.vote,
                kind = ?m.msg_type,
                "rejecting vote request"
            );
            let mut resp = Message::new(m.msg_type.vote_response());
            resp.to = m.from;
            resp.term = self.term;
            resp.reject = true;
            self.send(resp);
        }
    }

    // ---- candidate ----

    fn step_candidate(&mut self, m: Message) {
        match m.msg_type {
            MessageType::Prop => {
                debug!(id = self.id, "no leader, dropping proposal");
            }
            MessageType::App => {
                self.become_follower(self.term, m.from);
                self.handle_append_entries(&m);
            }
            MessageType::Heartbeat => {
                self.become_follower(self.term, m.from);
                self.handle_heartbeat(&m);
            }
            MessageType::Snap => {
                self.become_follower(self.term, m.from);
                self.handle_snapshot(m);
            }
            MessageType::VoteResp | MessageType::PreVoteResp => {
                // Only the response kind matching our round counts.
                let counts = match (&self.role, m.msg_type) {
                    (Role::Candidate(_), MessageType::VoteResp) => true,
                    (Role::PreCandidate(_), MessageType::PreVoteResp) => true,
                    _ => false,
                };
                if !counts {
                    return;
                }
                let (granted, rejected) = self.record_vote(m.from, !m.reject);
                let quorum = self.quorum();
                debug!(
                    id = self.id,
                    term = self.term,
                    granted,
                    rejected,
                    quorum,
                    "vote tallied"
                );
                if granted >= quorum {
                    if let Role::PreCandidate(_) = self.role {
                        self.campaign(CampaignType::Election);
                    } else {
                        self.become_leader();
                        self.bcast_append();
                    }
                } else if rejected >= quorum {
                    // The cluster said no; wait for a leader to emerge.
                    self.become_follower(self.term, INVALID_ID);
                }
            }
            _ => {}
        }
    }

    // ---- follower ----

    fn step_follower(&mut self, m: Message) {
        match m.msg_type {
            MessageType::Prop => {
                if self.leader_id == INVALID_ID {
                    debug!(id = self.id, "no leader known, dropping proposal");
                    return;
                }
                // Re-address to the leader; the term stays zero so the
                // leader steps it as the local trigger it is.
                let mut forward = m;
                forward.to = self.leader_id;
                self.send(forward);
            }
            MessageType::App => {
                self.election_elapsed = 0;
                self.leader_id = m.from;
                self.handle_append_entries(&m);
            }
            MessageType::Heartbeat => {
                self.election_elapsed = 0;
                self.leader_id = m.from;
                self.handle_heartbeat(&m);
            }
            MessageType::Snap => {
                self.election_elapsed = 0;
                self.leader_id = m.from;
                self.handle_snapshot(m);
            }
            _ => {}
        }
    }

    fn handle_append_entries(&mut self, m: &Message) {
        let mut resp = Message::new(MessageType::AppResp);
        resp.to = m.from;

        // Everything through `committed` is settled; answer with where we
        // are so a lagging leader catches up its bookkeeping.
        if m.index < self.log.committed {
            resp.index = self.log.committed;
            self.send(resp);
            return;
        }

        match self
            .log
            .maybe_append(m.index, m.log_term, m.commit, &m.entries)
        {
            Some(last_new) => {
                resp.index = last_new;
            }
            None => {
                debug!(
                    id = self.id,
                    index = m.index,
                    log_term = m.log_term,
                    from = m.from,
                    "rejecting append, log mismatch"
                );
                resp.index = m.index;
                resp.reject = true;
                resp.reject_hint = self.log.last_index();
            }
        }
        self.send(resp);
    }

    fn handle_heartbeat(&mut self, m: &Message) {
        self.log
            .commit_to(cmp::min(m.commit, self.log.last_index()));
        let mut resp = Message::new(MessageType::HeartbeatResp);
        resp.to = m.from;
        self.send(resp);
    }

    fn handle_snapshot(&mut self, m: Message) {
        let Some(snapshot) = m.snapshot else {
            debug!(id = self.id, from = m.from, "dropping empty snapshot message");
            return;
        };
        let index = snapshot.metadata.index;
        let mut resp = Message::new(MessageType::AppResp);
        resp.to = m.from;
        resp.index = if self.restore(snapshot) {
            self.log.last_index()
        } else {
            self.log.committed
        };
        debug!(
            id = self.id,
            from = m.from,
            snapshot_index = index,
            ack = resp.index,
            "handled snapshot"
        );
        self.send(resp);
    }

    /// Adopt a snapshot's view of the log. Returns false when the snapshot
    /// brings nothing we don't already have.
    fn restore(&mut self, snapshot: Snapshot) -> bool {
        let meta = &snapshot.metadata;
        if meta.index <= self.log.committed {
            return false;
        }
        if self.log.match_term(meta.index, meta.term) {
            // We already hold that entry; the snapshot only certifies it
            // as committed.
            self.log.commit_to(meta.index);
            return false;
        }
        self.log.restore(snapshot);
        true
    }

    // ---- leader ----

    fn step_leader(&mut self, m: Message) {
        match m.msg_type {
            MessageType::Beat => self.bcast_heartbeat(),
            MessageType::Prop => {
                assert!(!m.entries.is_empty(), "proposal without entries");
                self.append_entries_as_leader(m.entries);
                self.bcast_append();
            }
            MessageType::AppResp => self.handle_append_response(&m),
            MessageType::HeartbeatResp => {
                let behind = {
                    let Role::Leader(leader) = &mut self.role else {
                        unreachable!()
                    };
                    let Some(pr) = leader.progress.get_mut(&m.from) else {
                        return;
                    };
                    pr.recent_active = true;
                    pr.matched < self.log.last_index()
                };
                if behind {
                    self.send_append(m.from);
                }
            }
            MessageType::SnapStatus => {
                let Role::Leader(leader) = &mut self.role else {
                    unreachable!()
                };
                if let Some(pr) = leader.progress.get_mut(&m.from) {
                    // A failed transfer: wait for the next heartbeat
                    // response before probing again.
                    if m.reject {
                        pr.recent_active = false;
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_append_response(&mut self, m: &Message) {
        enum Outcome {
            Nothing,
            Retry,
            Advanced,
        }
        let outcome = {
            let Role::Leader(leader) = &mut self.role else {
                unreachable!()
            };
            let Some(pr) = leader.progress.get_mut(&m.from) else {
                return;
            };
            pr.recent_active = true;
            if m.reject {
                debug!(
                    id = self.id,
                    from = m.from,
                    rejected = m.index,
                    hint = m.reject_hint,
                    "append rejected, rewinding"
                );
                if pr.maybe_decr_to(m.index, m.reject_hint) {
                    Outcome::Retry
                } else {
                    Outcome::Nothing
                }
            } else if pr.maybe_update(m.index) {
                Outcome::Advanced
            } else {
                Outcome::Nothing
            }
        };
        match outcome {
            Outcome::Retry => self.send_append(m.from),
            Outcome::Advanced => {
                if self.advance_commit_index() {
                    // Followers learn the new commit index right away
                    // rather than on the next heartbeat.
                    self.bcast_append();
                }
            }
            Outcome::Nothing => {}
        }
    }

    /// Stamp and append proposed entries at the head of the log, then
    /// account our own acknowledgement.
    fn append_entries_as_leader(&mut self, mut entries: Vec<Entry>) {
        let last_index = self.log.last_index();
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.term = self.term;
            entry.index = last_index + 1 + i as u64;
        }
        self.log.append(&entries);

        let new_last = self.log.last_index();
        if let Role::Leader(leader) = &mut self.role {
            if let Some(pr) = leader.progress.get_mut(&self.id) {
                pr.maybe_update(new_last);
            }
        }
        // A single-node cluster commits on its own acknowledgement.
        self.advance_commit_index();
    }

    /// Commit the highest index replicated on a quorum, provided the entry
    /// there is from our own term. Counting replicas can never commit an
    /// older leader's entry directly.
    fn advance_commit_index(&mut self) -> bool {
        let quorum = self.quorum();
        let quorum_index = {
            let Role::Leader(leader) = &self.role else {
                panic!("only a leader advances the commit index");
            };
            let mut matches: Vec<u64> = leader.progress.values().map(|pr| pr.matched).collect();
            matches.sort_unstable_by(|a, b| b.cmp(a));
            matches[quorum - 1]
        };
        if quorum_index > self.log.committed
            && self.log.match_term(quorum_index, self.term)
        {
            self.log.commit_to(quorum_index);
            info!(
                id = self.id,
                term = self.term,
                commit = quorum_index,
                "commit index advanced"
            );
            return true;
        }
        false
    }

    /// Replicate to `to`, starting from its `next_idx`. When the needed
    /// prefix is compacted the peer gets the snapshot instead.
    fn send_append(&mut self, to: u64) {
        let next_idx = {
            let Role::Leader(leader) = &self.role else { return };
            let Some(pr) = leader.progress.get(&to) else {
                return;
            };
            pr.next_idx
        };
        let prev_index = next_idx - 1;
        let prev_term = self.log.term(prev_index);
        let entries = self
            .log
            .slice(next_idx, self.log.last_index() + 1, self.max_size_per_msg);

        match (prev_term, entries) {
            (Ok(log_term), Ok(entries)) => {
                let mut m = Message::new(MessageType::App);
                m.to = to;
                m.index = prev_index;
                m.log_term = log_term;
                m.entries = entries;
                m.commit = self.log.committed;
                self.send(m);
            }
            _ => {
                // The prefix this peer needs is gone; ship the snapshot.
                let snapshot = self.log.storage.snapshot();
                if snapshot.is_empty() {
                    debug!(id = self.id, to, "snapshot not ready, skipping peer");
                    return;
                }
                info!(
                    id = self.id,
                    to,
                    snapshot_index = snapshot.metadata.index,
                    "log compacted past peer, sending snapshot"
                );
                let mut m = Message::new(MessageType::Snap);
                m.to = to;
                m.snapshot = Some(snapshot);
                self.send(m);
            }
        }
    }

    fn bcast_append(&mut self) {
        let peers: Vec<u64> = self.peers.iter().copied().filter(|&p| p != self.id).collect();
        for peer in peers {
            self.send_append(peer);
        }
    }

    /// Heartbeat every peer. The carried commit index is clamped to what
    /// the peer is known to hold, so it never commits past its own log.
    fn bcast_heartbeat(&mut self) {
        let peers: Vec<(u64, u64)> = {
            let Role::Leader(leader) = &self.role else { return };
            self.peers
                .iter()
                .copied()
                .filter(|&p| p != self.id)
                .map(|p| {
                    let matched = leader.progress.get(&p).map_or(0, |pr| pr.matched);
                    (p, cmp::min(self.log.committed, matched))
                })
                .collect()
        };
        for (peer, commit) in peers {
            let mut m = Message::new(MessageType::Heartbeat);
            m.to = peer;
            m.commit = commit;
            self.send(m);
        }
    }

    // ---- output ----

    fn send(&mut self, mut m: Message) {
        m.from = self.id;
        match m.msg_type {
            MessageType::Vote | MessageType::PreVote => {
                // Vote requests can run ahead of our term (pre-vote) so the
                // campaign code stamps them explicitly.
                assert!(m.term != 0, "vote requests must carry an explicit term");
            }
            // Vote responses echo the request's term, already set.
            MessageType::VoteResp | MessageType::PreVoteResp => {}
            // A forwarded proposal stays a local-shaped message.
            MessageType::Prop => {}
            _ => m.term = self.term,
        }
        self.mailbox.push(m);
    }

    /// Collect everything the embedder must persist, send, and apply.
    pub fn ready(&mut self) -> Ready {
        let hard_state = self.hard_state();
        let changed = (hard_state != self.prev_hard_state).then_some(hard_state);
        self.prev_hard_state = hard_state;

        Ready {
            hard_state: changed,
            entries: self.log.unstable_entries().to_vec(),
            committed_entries: self.log.next_committed_entries(NO_LIMIT),
            messages: std::mem::take(&mut self.mailbox),
            snapshot: self.log.pending_snapshot().cloned(),
        }
    }

    /// The embedder finished acting on a `Ready`: promote what it
    /// persisted and record what it applied.
    pub fn advance(&mut self, ready: Ready) {
        if let Some(snapshot) = &ready.snapshot {
            self.log.stable_snap_to(snapshot.metadata.index);
            self.log.applied_to(snapshot.metadata.index);
        }
        if let Some(last) = ready.entries.last() {
            self.log.stable_to(last.index, last.term);
        }
        if let Some(last) = ready.committed_entries.last() {
            self.log.applied_to(last.index);
        }
    }
}
