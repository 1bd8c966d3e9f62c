//! Simulated cluster for testing.
//!
//! Drives N nodes through the same ready/advance cycle a real embedder
//! would run, with an in-memory message queue in between. Links can be cut
//! and whole nodes taken down to stage partitions.

use std::collections::{HashSet, VecDeque};

use crate::config::Config;
use crate::message::{Message, MessageType};
use crate::raft::{Raft, RoleKind};
use crate::storage::MemoryStorage;

/// Simulated cluster of `Raft` nodes with ids `1..=n`.
pub struct Cluster {
    nodes: Vec<Raft<MemoryStorage>>,
    storages: Vec<MemoryStorage>,
    inflight: VecDeque<Message>,
    cut_links: HashSet<(u64, u64)>,
    down: HashSet<u64>,
}

impl Cluster {
    /// A healthy cluster of `n` nodes with deterministic election jitter.
    pub fn new(n: u64) -> Cluster {
        Cluster::new_with(n, |_| {})
    }

    /// Like `new`, but lets the caller adjust each node's config first.
    pub fn new_with(n: u64, tweak: impl Fn(&mut Config)) -> Cluster {
        let ids: Vec<u64> = (1..=n).collect();
        let mut nodes = Vec::new();
        let mut storages = Vec::new();
        for &id in &ids {
            let mut config = Config::new(id, ids.clone());
            config.seed = Some(id);
            tweak(&mut config);
            let storage = MemoryStorage::new();
            nodes.push(Raft::new(&config, storage.clone()).expect("valid test config"));
            storages.push(storage);
        }
        Cluster {
            nodes,
            storages,
            inflight: VecDeque::new(),
            cut_links: HashSet::new(),
            down: HashSet::new(),
        }
    }

    pub fn peer(&self, id: u64) -> &Raft<MemoryStorage> {
        &self.nodes[(id - 1) as usize]
    }

    pub fn peer_mut(&mut self, id: u64) -> &mut Raft<MemoryStorage> {
        &mut self.nodes[(id - 1) as usize]
    }

    /// Drop all traffic between `a` and `b`.
    pub fn cut(&mut self, a: u64, b: u64) {
        self.cut_links.insert((a, b));
        self.cut_links.insert((b, a));
    }

    /// Restore the link between `a` and `b`.
    pub fn restore(&mut self, a: u64, b: u64) {
        self.cut_links.remove(&(a, b));
        self.cut_links.remove(&(b, a));
    }

    /// Take a node off the network entirely.
    pub fn down(&mut self, id: u64) {
        self.down.insert(id);
    }

    /// Trigger an election on `id` and run the cluster until it settles.
    pub fn campaign(&mut self, id: u64) {
        let mut hup = Message::new(MessageType::Hup);
        hup.from = id;
        hup.to = id;
        let _ = self.peer_mut(id).step(hup);
        self.settle();
    }

    /// Submit a proposal on `id` and run the cluster until it settles.
    pub fn propose(&mut self, id: u64, data: Vec<u8>) {
        self.peer_mut(id)
            .propose(data)
            .expect("proposal stepped");
        self.settle();
    }

    /// Run ready/advance cycles and deliver messages until nothing moves.
    pub fn settle(&mut self) {
        loop {
            self.flush_ready();
            let Some(m) = self.inflight.pop_front() else {
                break;
            };
            if self.dropped(&m) {
                continue;
            }
            let _ = self.peer_mut(m.to).step(m);
        }
    }

    /// The embedder side of the loop: persist, queue sends, apply, advance.
    fn flush_ready(&mut self) {
        for i in 0..self.nodes.len() {
            loop {
                let ready = self.nodes[i].ready();
                if ready.is_empty() {
                    break;
                }
                if let Some(snapshot) = &ready.snapshot {
                    self.storages[i]
                        .apply_snapshot(snapshot.clone())
                        .expect("snapshot applies");
                }
                if !ready.entries.is_empty() {
                    self.storages[i].append(&ready.entries);
                }
                if let Some(hard_state) = ready.hard_state {
                    self.storages[i].set_hard_state(hard_state);
                }
                self.inflight.extend(ready.messages.iter().cloned());
                self.nodes[i].advance(ready);
            }
        }
    }

    fn dropped(&self, m: &Message) -> bool {
        self.down.contains(&m.from)
            || self.down.contains(&m.to)
            || self.cut_links.contains(&(m.from, m.to))
    }

    /// The current leader's id, when there is exactly one.
    pub fn leader(&self) -> Option<u64> {
        let mut leaders = self
            .nodes
            .iter()
            .filter(|n| n.role.kind() == RoleKind::Leader)
            .map(|n| n.id);
        match (leaders.next(), leaders.next()) {
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    /// (followers, pre-candidates, candidates, leaders).
    pub fn role_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for node in &self.nodes {
            match node.role.kind() {
                RoleKind::Follower => counts.0 += 1,
                RoleKind::PreCandidate => counts.1 += 1,
                RoleKind::Candidate => counts.2 += 1,
                RoleKind::Leader => counts.3 += 1,
            }
        }
        counts
    }
}
