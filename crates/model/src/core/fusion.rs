//! Instruction fusion overlay.
//!
//! Matches contiguous windows of the decoded batch against registered fusion
//! groups. Candidate windows are keyed by a Jenkins one-at-a-time hash of the
//! window's mnemonic sequence; a hash hit is confirmed by comparing the
//! mnemonics before anything is marked. On a confirmed match the first
//! instruction becomes the fused head and the rest become ghosts, which are
//! eliminated from the batch before rename. Matching repeats until no window
//! matches or the watchdog bound trips.

use std::collections::HashMap;

use tracing::debug;

use crate::inst::{InstPtr, Status};

/// A registered fusion group: a named mnemonic sequence.
#[derive(Clone, Debug)]
pub struct FusionGroup {
    /// Group name (reporting only).
    pub name: String,
    /// The mnemonic sequence that triggers the fusion.
    pub mnemonics: Vec<String>,
}

/// Result of one fusion pass over a decode batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FusionOutcome {
    /// Heads marked fused this pass.
    pub fused: u64,
    /// Ghosts eliminated this pass.
    pub ghosts: u64,
    /// Predicted cycles saved (one per ghost).
    pub cycles_saved: u64,
}

/// The fusion matcher.
pub struct Fuser {
    groups: HashMap<u32, FusionGroup>,
    max_group_size: usize,
    match_max_tries: u32,
    groups_utilized: u64,
}

impl std::fmt::Debug for Fuser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fuser({} groups)", self.groups.len())
    }
}

/// Jenkins one-at-a-time hash over a mnemonic sequence.
///
/// Mnemonics are fed byte-wise with a zero separator so that sequence
/// boundaries participate in the hash.
pub fn jenkins_one_at_a_time(mnemonics: &[&str]) -> u32 {
    let mut hash: u32 = 0;
    for mnemonic in mnemonics {
        for byte in mnemonic.bytes().chain(std::iter::once(0)) {
            hash = hash.wrapping_add(u32::from(byte));
            hash = hash.wrapping_add(hash << 10);
            hash ^= hash >> 6;
        }
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

impl Fuser {
    /// Builds the matcher from group definitions.
    ///
    /// # Panics
    ///
    /// Panics if two groups hash to the same key with different sequences —
    /// group sets are small enough that a real collision means a bad
    /// definition file.
    pub fn new(definitions: Vec<FusionGroup>, match_max_tries: u32) -> Self {
        let mut groups = HashMap::new();
        let mut max_group_size = 0;
        for group in definitions {
            assert!(
                group.mnemonics.len() >= 2,
                "fusion group '{}' needs at least two instructions",
                group.name
            );
            max_group_size = max_group_size.max(group.mnemonics.len());
            let refs: Vec<&str> = group.mnemonics.iter().map(String::as_str).collect();
            let key = jenkins_one_at_a_time(&refs);
            if let Some(existing) = groups.insert(key, group) {
                panic!("fusion hash collision with group '{}'", existing.name);
            }
        }
        Self {
            groups,
            max_group_size,
            match_max_tries,
            groups_utilized: 0,
        }
    }

    /// Number of registered groups.
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Cumulative count of group hits.
    pub fn groups_utilized(&self) -> u64 {
        self.groups_utilized
    }

    /// Runs fusion over a decode batch in place.
    ///
    /// Ghosts are removed from `batch`; heads stay, carrying the fused flag.
    ///
    /// # Panics
    ///
    /// Panics if matching fails to converge within the watchdog bound.
    pub fn process(&mut self, batch: &mut Vec<InstPtr>) -> FusionOutcome {
        let mut outcome = FusionOutcome::default();
        let mut tries = 0;
        loop {
            let matched = self.match_once(batch, &mut outcome);
            tries += 1;
            if !matched {
                break;
            }
            assert!(
                tries < self.match_max_tries,
                "fusion group match watchdog exceeded ({} tries)",
                tries
            );
        }
        outcome
    }

    /// One matching pass; returns true if a group was applied.
    fn match_once(&mut self, batch: &mut Vec<InstPtr>, outcome: &mut FusionOutcome) -> bool {
        if batch.len() < 2 {
            return false;
        }
        let mnemonics: Vec<String> = batch
            .iter()
            .map(|inst| inst.borrow().mnemonic().to_string())
            .collect();

        let upper = self.max_group_size.min(batch.len());
        for size in (2..=upper).rev() {
            for start in 0..=(batch.len() - size) {
                // Fused heads and windows spanning one cannot fuse again.
                if batch[start..start + size]
                    .iter()
                    .any(|inst| inst.borrow().fused)
                {
                    continue;
                }
                let window: Vec<&str> =
                    mnemonics[start..start + size].iter().map(String::as_str).collect();
                let key = jenkins_one_at_a_time(&window);
                let Some(group) = self.groups.get(&key) else {
                    continue;
                };
                if group.mnemonics != window {
                    continue; // hash alias, not a real match
                }

                debug!(group = %group.name, start, size, "fusion group matched");
                self.groups_utilized += 1;
                batch[start].borrow_mut().fused = true;
                outcome.fused += 1;
                for ghost in batch.drain(start + 1..start + size) {
                    ghost.borrow_mut().set_status(Status::FusionGhost);
                    outcome.ghosts += 1;
                    outcome.cycles_saved += 1;
                }
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{Inst, TargetPipe, UopGenType, into_ptr};

    fn inst(mnemonic: &str, uid: u64) -> InstPtr {
        let mut i = Inst::new(
            mnemonic,
            0,
            TargetPipe::Int,
            1,
            UopGenType::None,
            vec![],
            vec![],
            None,
        );
        i.set_unique_id(uid);
        into_ptr(i)
    }

    fn fuser() -> Fuser {
        Fuser::new(
            vec![
                FusionGroup {
                    name: "lui-addi".to_string(),
                    mnemonics: vec!["lui".to_string(), "addi".to_string()],
                },
                FusionGroup {
                    name: "shift-add-load".to_string(),
                    mnemonics: vec!["slli".to_string(), "add".to_string(), "ld".to_string()],
                },
            ],
            8,
        )
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        assert_ne!(
            jenkins_one_at_a_time(&["lui", "addi"]),
            jenkins_one_at_a_time(&["addi", "lui"])
        );
    }

    #[test]
    fn test_pair_fusion() {
        let mut f = fuser();
        let mut batch = vec![inst("lui", 1), inst("addi", 2), inst("sub", 3)];
        let outcome = f.process(&mut batch);

        assert_eq!(outcome.fused, 1);
        assert_eq!(outcome.ghosts, 1);
        assert_eq!(outcome.cycles_saved, 1);
        assert_eq!(batch.len(), 2);
        assert!(batch[0].borrow().fused);
        assert_eq!(batch[1].borrow().mnemonic(), "sub");
    }

    #[test]
    fn test_longest_group_wins() {
        let mut f = fuser();
        let mut batch = vec![inst("slli", 1), inst("add", 2), inst("ld", 3)];
        let outcome = f.process(&mut batch);
        assert_eq!(outcome.ghosts, 2);
        assert_eq!(batch.len(), 1);
        assert!(batch[0].borrow().fused);
    }

    #[test]
    fn test_no_match_leaves_batch_alone() {
        let mut f = fuser();
        let mut batch = vec![inst("sub", 1), inst("sub", 2)];
        let outcome = f.process(&mut batch);
        assert_eq!(outcome, FusionOutcome::default());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_repeated_matches_in_one_batch() {
        let mut f = fuser();
        let mut batch = vec![
            inst("lui", 1),
            inst("addi", 2),
            inst("lui", 3),
            inst("addi", 4),
        ];
        let outcome = f.process(&mut batch);
        assert_eq!(outcome.fused, 2);
        assert_eq!(outcome.ghosts, 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(f.groups_utilized(), 2);
    }

    #[test]
    fn test_fused_head_does_not_refuse() {
        let mut f = fuser();
        // After lui+addi fuses, the head (lui) precedes another addi; the
        // head must not fuse a second time.
        let mut batch = vec![inst("lui", 1), inst("addi", 2), inst("addi", 3)];
        let outcome = f.process(&mut batch);
        assert_eq!(outcome.fused, 1);
        assert_eq!(batch.len(), 2);
    }
}
