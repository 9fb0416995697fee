// lag_manager.rs — lag-screen transitions and checksum desync detection.
//
// Grounded on mattx86-myq2-rust's sv_main.rs `sv_check_timeouts`: a
// rayon-style phase-one scan of every user computing a per-user verdict,
// phase-two sequentially applying side effects (logging, state change).
// The two-phase shape — compute transitions for everyone, then apply — is
// kept so the caller broadcasts once after this pass, never once per user.

use std::collections::VecDeque;

use rayon::prelude::*;

use crate::user::LagState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagTransition {
    None,
    EnteredLagging,
    ExitedLagging { duration_ticks: u64 },
}

pub struct LagManager {
    sync_limit: u32,
    sync_limit_safe: u32,
    desync_ring_capacity: usize,
    /// checksum_ring[uid][position] — ring buffer of each user's
    /// OUTGOING_KEEPALIVE checksums, indexed by keep-alive sequence.
    checksum_rings: std::collections::HashMap<u8, VecDeque<u32>>,
    next_compare_position: usize,
}

impl LagManager {
    pub fn new(sync_limit: u32, sync_limit_safe: u32, desync_ring_capacity: usize) -> Self {
        LagManager {
            sync_limit,
            sync_limit_safe,
            desync_ring_capacity,
            checksum_rings: std::collections::HashMap::new(),
            next_compare_position: 0,
        }
    }

    /// Evaluate one user's Normal/Lagging transition for this tick.
    pub fn evaluate(
        &self,
        broadcast_counter: u32,
        normal_sync_counter: u32,
        current_state: LagState,
    ) -> (LagState, LagTransition) {
        let behind = broadcast_counter.saturating_sub(normal_sync_counter);
        match current_state {
            LagState::Normal if behind > self.sync_limit => {
                (LagState::Lagging, LagTransition::EnteredLagging)
            }
            LagState::Lagging if behind <= self.sync_limit_safe => {
                (LagState::Normal, LagTransition::ExitedLagging { duration_ticks: 0 })
            }
            other => (other, LagTransition::None),
        }
    }

    /// Record one user's keep-alive checksum at the next compare position.
    pub fn record_checksum(&mut self, uid: u8, checksum: u32) {
        let ring = self.checksum_rings.entry(uid).or_default();
        if ring.len() == self.desync_ring_capacity {
            ring.pop_front();
        }
        ring.push_back(checksum);
    }

    /// Once every tracked user has a checksum at `position`, compare them
    /// all; returns the uids whose checksum disagrees with the majority, or
    /// an empty vec if everyone agrees or not everyone has reported yet.
    pub fn check_desync(&self, position: usize) -> Vec<u8> {
        let mut at_position: Vec<(u8, u32)> = Vec::new();
        for (&uid, ring) in &self.checksum_rings {
            match ring.get(position) {
                Some(&checksum) => at_position.push((uid, checksum)),
                None => return Vec::new(), // not everyone has reported yet
            }
        }
        if at_position.is_empty() {
            return Vec::new();
        }
        // Phase one: tally every user's checksum concurrently, mirroring the
        // teacher's parallel per-client timeout scan before any state changes.
        let majority_checksum = at_position
            .par_iter()
            .fold(
                std::collections::HashMap::<u32, usize>::new,
                |mut counts, (_, checksum)| {
                    *counts.entry(*checksum).or_insert(0) += 1;
                    counts
                },
            )
            .reduce(std::collections::HashMap::new, |mut a, b| {
                for (checksum, count) in b {
                    *a.entry(checksum).or_insert(0) += count;
                }
                a
            })
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(checksum, _)| checksum)
            .unwrap();
        // Phase two: apply — collect the minority.
        at_position
            .into_iter()
            .filter(|(_, checksum)| *checksum != majority_checksum)
            .map(|(uid, _)| uid)
            .collect()
    }

    /// Whether `uid` has a recorded checksum at `position` yet — used by the
    /// caller to know when every tracked user has reported and a compare is
    /// actually due, rather than guessing from `check_desync`'s empty return
    /// (which also means "still waiting").
    pub fn has_checksum_at(&self, uid: u8, position: usize) -> bool {
        self.checksum_rings
            .get(&uid)
            .map(|ring| ring.len() > position)
            .unwrap_or(false)
    }

    pub fn advance_compare_position(&mut self) -> usize {
        let position = self.next_compare_position;
        self.next_compare_position += 1;
        position
    }

    /// The compare position a caller should be recording/checking against
    /// right now — the same value `advance_compare_position` is about to
    /// consume.
    pub fn current_position(&self) -> usize {
        self.next_compare_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enters_lagging_past_sync_limit() {
        let lm = LagManager::new(32, 16, 20);
        let (state, transition) = lm.evaluate(100, 50, LagState::Normal);
        assert_eq!(state, LagState::Lagging);
        assert_eq!(transition, LagTransition::EnteredLagging);
    }

    #[test]
    fn stays_normal_within_sync_limit() {
        let lm = LagManager::new(32, 16, 20);
        let (state, transition) = lm.evaluate(100, 80, LagState::Normal);
        assert_eq!(state, LagState::Normal);
        assert_eq!(transition, LagTransition::None);
    }

    #[test]
    fn exits_lagging_once_caught_up_to_safe_limit() {
        let lm = LagManager::new(32, 16, 20);
        let (state, transition) = lm.evaluate(100, 90, LagState::Lagging);
        assert_eq!(state, LagState::Normal);
        assert!(matches!(transition, LagTransition::ExitedLagging { .. }));
    }

    #[test]
    fn stays_lagging_between_safe_and_full_limit() {
        let lm = LagManager::new(32, 16, 20);
        let (state, transition) = lm.evaluate(100, 70, LagState::Lagging);
        assert_eq!(state, LagState::Lagging);
        assert_eq!(transition, LagTransition::None);
    }

    #[test]
    fn desync_detects_minority_mismatch() {
        let mut lm = LagManager::new(32, 16, 20);
        lm.record_checksum(1, 0xAA);
        lm.record_checksum(2, 0xAA);
        lm.record_checksum(3, 0xBB);
        let mismatched = lm.check_desync(0);
        assert_eq!(mismatched, vec![3]);
    }

    #[test]
    fn desync_waits_for_every_user_to_report() {
        let mut lm = LagManager::new(32, 16, 20);
        lm.record_checksum(1, 0xAA);
        lm.checksum_rings.entry(2).or_default();
        assert!(lm.check_desync(0).is_empty());
    }

    #[test]
    fn desync_empty_when_all_agree() {
        let mut lm = LagManager::new(32, 16, 20);
        lm.record_checksum(1, 0xAA);
        lm.record_checksum(2, 0xAA);
        assert!(lm.check_desync(0).is_empty());
    }

    #[test]
    fn has_checksum_at_reflects_ring_depth() {
        let mut lm = LagManager::new(32, 16, 20);
        lm.record_checksum(1, 0xAA);
        assert!(lm.has_checksum_at(1, 0));
        assert!(!lm.has_checksum_at(1, 1));
        assert!(!lm.has_checksum_at(2, 0));
    }

    #[test]
    fn current_position_tracks_advancement() {
        let mut lm = LagManager::new(32, 16, 20);
        assert_eq!(lm.current_position(), 0);
        lm.advance_compare_position();
        assert_eq!(lm.current_position(), 1);
    }

    #[test]
    fn checksum_ring_evicts_oldest_past_capacity() {
        let mut lm = LagManager::new(32, 16, 2);
        lm.record_checksum(1, 1);
        lm.record_checksum(1, 2);
        lm.record_checksum(1, 3);
        let ring = &lm.checksum_rings[&1];
        assert_eq!(ring.len(), 2);
        assert_eq!(ring[0], 2);
    }
}
