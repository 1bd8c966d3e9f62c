//! Leader-side view of one follower's log.

/// Replication bookkeeping the leader keeps per peer.
///
/// `matched` is the highest index known replicated on the peer; `next_idx`
/// is where the next AppendEntries will start. `matched < next_idx` always.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub matched: u64,
    pub next_idx: u64,
    /// Whether the peer has responded since the last heartbeat round; a
    /// failed snapshot transfer clears it so the peer gets re-probed.
    pub recent_active: bool,
}

impl Progress {
    /// A fresh view of a peer: nothing known matched, probing from the
    /// leader's end of log.
    pub fn new(next_idx: u64) -> Progress {
        Progress {
            matched: 0,
            next_idx,
            recent_active: false,
        }
    }

    /// The peer acknowledged entries through `n`. Returns whether `matched`
    /// moved (stale acknowledgements change nothing).
    pub fn maybe_update(&mut self, n: u64) -> bool {
        let updated = n > self.matched;
        if updated {
            self.matched = n;
        }
        if n + 1 > self.next_idx {
            self.next_idx = n + 1;
        }
        updated
    }

    /// The peer rejected an append at `rejected`, telling us its last
    /// index as `hint`. Returns whether `next_idx` moved; a rejection for
    /// anything other than the in-flight probe is stale and ignored.
    pub fn maybe_decr_to(&mut self, rejected: u64, hint: u64) -> bool {
        if self.matched != 0 {
            // We already matched past this point; the rejection is old news.
            if rejected <= self.matched {
                return false;
            }
            self.next_idx = self.matched + 1;
            return true;
        }
        if self.next_idx != rejected + 1 {
            return false;
        }
        self.next_idx = std::cmp::max(1, std::cmp::min(rejected, hint + 1));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maybe_update_moves_forward_only() {
        let mut pr = Progress::new(3);
        assert!(pr.maybe_update(2));
        assert_eq!(pr.matched, 2);
        assert_eq!(pr.next_idx, 3);

        assert!(pr.maybe_update(5));
        assert_eq!(pr.matched, 5);
        assert_eq!(pr.next_idx, 6);

        assert!(!pr.maybe_update(4));
        assert_eq!(pr.matched, 5);
        assert_eq!(pr.next_idx, 6);
    }

    #[test]
    fn maybe_decr_follows_the_hint() {
        let mut pr = Progress::new(10);
        // Rejection of the probe at prev=9: retry from the hint.
        assert!(pr.maybe_decr_to(9, 3));
        assert_eq!(pr.next_idx, 4);

        // A rejection that doesn't match the in-flight probe is stale.
        assert!(!pr.maybe_decr_to(9, 2));
        assert_eq!(pr.next_idx, 4);
    }

    #[test]
    fn maybe_decr_never_below_one() {
        let mut pr = Progress::new(1);
        assert!(pr.maybe_decr_to(0, 0));
        assert_eq!(pr.next_idx, 1);
    }

    #[test]
    fn maybe_decr_with_match_resets_to_match() {
        let mut pr = Progress::new(10);
        pr.maybe_update(5);
        // Stale rejection below the match point.
        assert!(!pr.maybe_decr_to(4, 1));
        assert_eq!(pr.next_idx, 6);

        // A real rejection above the match point falls back to matched + 1.
        pr.next_idx = 10;
        assert!(pr.maybe_decr_to(9, 7));
        assert_eq!(pr.next_idx, 6);
    }
}
